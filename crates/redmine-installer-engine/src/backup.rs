use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use redmine_installer_core::{
    BackupRecord, InstallerError, ToolSettings, BACKUP_DATABASE_DUMP_NAME,
    BACKUP_FILES_ARCHIVE_NAME, BACKUP_RECORD_FILE_NAME,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cancel::is_cancelled;
use crate::database::{dump_database, read_database_config};
use crate::fs_utils::remove_path_if_exists;
use crate::layout::run_timestamp;
use crate::process::ProcessRunner;

pub fn backup(
    root: &Path,
    backups_dir: &Path,
    tools: &ToolSettings,
    runner: &dyn ProcessRunner,
    cancel: &AtomicBool,
) -> Result<BackupRecord> {
    let backup_error = |detail: String| InstallerError::Backup {
        root: root.to_path_buf(),
        detail,
    };

    if !root.is_dir() {
        return Err(backup_error("installation root does not exist".to_string()).into());
    }
    if backups_dir.starts_with(root) {
        return Err(backup_error(format!(
            "backup directory {} is inside the installation root",
            backups_dir.display()
        ))
        .into());
    }

    let timestamp = run_timestamp();
    let directory = claim_backup_dir(backups_dir, &timestamp)
        .map_err(|err| backup_error(format!("{err:#}")))?;

    let files_archive = directory.join(BACKUP_FILES_ARCHIVE_NAME);
    let archived =
        archive_tree(root, &files_archive, cancel).and_then(|()| sha256_file(&files_archive));
    let files_archive_sha256 = match archived {
        Ok(digest) => digest,
        Err(err) => {
            discard_backup_dir(&directory);
            if is_cancelled(cancel) {
                return Err(err);
            }
            return Err(backup_error(format!("{err:#}")).into());
        }
    };
    info!(archive = %files_archive.display(), "installation files archived");

    let mut record = BackupRecord {
        timestamp,
        root: root.to_path_buf(),
        directory: directory.clone(),
        files_archive,
        files_archive_sha256,
        database_dump: None,
    };

    let dump_path = directory.join(BACKUP_DATABASE_DUMP_NAME);
    let dump_result = read_database_config(root).and_then(|config| match config {
        Some(config) => dump_database(&config, root, &dump_path, tools, runner).map(|_| true),
        None => Ok(false),
    });
    let dump_failure = match dump_result {
        Ok(true) => {
            record.database_dump = Some(dump_path);
            None
        }
        Ok(false) => {
            info!("no production database configured; skipping dump");
            None
        }
        Err(err) => {
            let _ = fs::remove_file(&dump_path);
            Some(format!("{err:#}"))
        }
    };

    if let Err(err) = write_record(&record) {
        discard_backup_dir(&directory);
        return Err(backup_error(format!("{err:#}")).into());
    }

    if let Some(detail) = dump_failure {
        warn!(
            archive = %record.files_archive.display(),
            "database dump failed; backup is partial"
        );
        return Err(InstallerError::PartialBackup {
            record: Box::new(record),
            detail,
        }
        .into());
    }
    Ok(record)
}

pub fn claim_backup_dir(backups_dir: &Path, timestamp: &str) -> Result<PathBuf> {
    fs::create_dir_all(backups_dir)
        .with_context(|| format!("failed to create {}", backups_dir.display()))?;

    let mut suffix = 0_u32;
    loop {
        let name = if suffix == 0 {
            timestamp.to_string()
        } else {
            format!("{timestamp}-{suffix}")
        };
        let candidate = backups_dir.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create {}", candidate.display()));
            }
        }
    }
}

fn archive_tree(root: &Path, archive_path: &Path, cancel: &AtomicBool) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let prefix = root
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("root"));
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        if is_cancelled(cancel) {
            return Err(InstallerError::Cancelled {
                step: "backup".to_string(),
            }
            .into());
        }

        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
        let name = prefix.join(relative);
        let file_type = entry.file_type();
        let appended = if file_type.is_dir() {
            builder.append_dir(&name, entry.path())
        } else if file_type.is_file() || file_type.is_symlink() {
            builder.append_path_with_name(entry.path(), &name)
        } else {
            warn!(path = %entry.path().display(), "skipping special file in backup");
            continue;
        };
        appended.with_context(|| format!("failed to archive {}", entry.path().display()))?;
    }

    let encoder = builder
        .into_inner()
        .with_context(|| format!("failed to finish {}", archive_path.display()))?;
    let file = encoder
        .finish()
        .with_context(|| format!("failed to compress {}", archive_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", archive_path.display()))?;
    Ok(())
}

fn discard_backup_dir(directory: &Path) {
    if let Err(err) = remove_path_if_exists(directory) {
        warn!(
            directory = %directory.display(),
            error = %format!("{err:#}"),
            "failed to remove incomplete backup"
        );
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn write_record(record: &BackupRecord) -> Result<()> {
    let path = record.directory.join(BACKUP_RECORD_FILE_NAME);
    fs::write(&path, record.to_toml_string()?)
        .with_context(|| format!("failed to write backup record {}", path.display()))
}
