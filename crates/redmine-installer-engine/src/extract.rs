use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use redmine_installer_core::{ArchiveType, InstallerError, ToolSettings};
use tracing::debug;
use walkdir::WalkDir;

use crate::fs_utils::{is_missing_or_empty_dir, normalize_within};
use crate::process::ProcessRunner;

pub const PACKAGE_MARKERS: &[&str] = &[
    "Gemfile",
    "config.ru",
    "config/database.yml.example",
    "config/settings.yml",
    "lib/redmine.rb",
];

pub fn extract_package(
    archive: &Path,
    archive_type: ArchiveType,
    dest: &Path,
    tools: &ToolSettings,
    runner: &dyn ProcessRunner,
) -> Result<PathBuf> {
    if !is_missing_or_empty_dir(dest)? {
        return Err(InstallerError::configuration(format!(
            "extraction directory is not empty: {}",
            dest.display()
        ))
        .into());
    }
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    match archive_type {
        ArchiveType::TarGz => extract_tar_gz(archive, dest)?,
        ArchiveType::Zip => extract_zip(archive, dest, tools, runner)?,
    }
    ensure_symlinks_contained(dest)?;

    let package_root = locate_package_root(dest)?;
    debug!(package_root = %package_root.display(), "package extracted");
    Ok(package_root)
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .with_context(|| format!("failed to read archive {}", archive_path.display()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| malformed(archive_path, &err.to_string()))?;
        let path = entry
            .path()
            .map_err(|err| malformed(archive_path, &err.to_string()))?
            .into_owned();
        let display = path.display().to_string();
        let relative = validate_entry_path(&display, &path)?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(|err| malformed(archive_path, &err.to_string()))?
                .ok_or_else(|| unsafe_entry(&display, "link entry without a target"))?
                .into_owned();
            if kind.is_symlink() {
                validate_symlink_target(&display, &relative, &target)?;
            } else {
                validate_entry_path(&display, &target)?;
            }
        }

        let unpacked = entry
            .unpack_in(dest)
            .with_context(|| format!("failed to unpack archive entry {display}"))?;
        if !unpacked {
            return Err(unsafe_entry(&display, "resolves outside the destination").into());
        }
    }
    Ok(())
}

fn extract_zip(
    archive_path: &Path,
    dest: &Path,
    tools: &ToolSettings,
    runner: &dyn ProcessRunner,
) -> Result<()> {
    let listing = runner.run(
        &mut build_zip_list_command(&tools.unzip, archive_path),
        "failed to list zip archive",
    )?;
    for name in listing.lines().filter(|line| !line.is_empty()) {
        if name.contains('\\') {
            return Err(unsafe_entry(name, "contains a backslash separator").into());
        }
        validate_entry_path(name, Path::new(name))?;
    }

    runner.run(
        &mut build_zip_extract_command(&tools.unzip, archive_path, dest),
        "failed to extract zip archive",
    )?;
    Ok(())
}

pub fn build_zip_list_command(unzip: &str, archive_path: &Path) -> Command {
    let mut command = Command::new(unzip);
    command.arg("-Z1").arg(archive_path);
    command
}

pub fn build_zip_extract_command(unzip: &str, archive_path: &Path, dest: &Path) -> Command {
    let mut command = Command::new(unzip);
    command.arg("-q").arg("-o").arg(archive_path).arg("-d").arg(dest);
    command
}

pub fn validate_entry_path(entry: &str, path: &Path) -> Result<PathBuf, InstallerError> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(unsafe_entry(entry, "contains a parent directory segment"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry(entry, "is an absolute path"));
            }
        }
    }
    Ok(normalized)
}

fn validate_symlink_target(
    entry: &str,
    relative: &Path,
    target: &Path,
) -> Result<(), InstallerError> {
    if target.is_absolute() {
        return Err(unsafe_entry(entry, "links to an absolute path"));
    }
    let base = relative.parent().unwrap_or(Path::new(""));
    if normalize_within(&base.join(target)).is_none() {
        return Err(unsafe_entry(entry, "links outside the destination"));
    }
    Ok(())
}

pub fn ensure_symlinks_contained(dest: &Path) -> Result<()> {
    for entry in WalkDir::new(dest).follow_links(false).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", dest.display()))?;
        if !entry.path_is_symlink() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dest)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
        let target = fs::read_link(entry.path())
            .with_context(|| format!("failed to read symlink {}", entry.path().display()))?;
        validate_symlink_target(&relative.display().to_string(), relative, &target)?;
    }
    Ok(())
}

pub fn locate_package_root(dest: &Path) -> Result<PathBuf> {
    if has_package_marker(dest) {
        return Ok(dest.to_path_buf());
    }

    let mut top_level = Vec::new();
    for entry in fs::read_dir(dest).with_context(|| format!("failed to read {}", dest.display()))? {
        let entry = entry?;
        top_level.push((entry.path(), entry.file_type()?.is_dir()));
    }
    match top_level.as_slice() {
        [(only, true)] => Ok(only.clone()),
        [] => Err(InstallerError::MalformedPackage {
            reason: "archive is empty".to_string(),
        }
        .into()),
        _ => Err(InstallerError::MalformedPackage {
            reason: format!(
                "expected one top-level directory or any of {} at the top level",
                PACKAGE_MARKERS.join(", ")
            ),
        }
        .into()),
    }
}

fn has_package_marker(dir: &Path) -> bool {
    PACKAGE_MARKERS
        .iter()
        .any(|marker| dir.join(marker).is_file())
}

fn unsafe_entry(entry: &str, reason: &str) -> InstallerError {
    InstallerError::UnsafeArchiveEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}

fn malformed(archive_path: &Path, detail: &str) -> InstallerError {
    InstallerError::MalformedPackage {
        reason: format!("{}: {detail}", archive_path.display()),
    }
}
