use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redmine_installer_core::{KeepSet, PreserveMode};
use tracing::{debug, warn};

use crate::fs_utils::{copy_path, remove_path_if_exists};
use crate::layout::sibling_path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub preserved: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

pub fn merge(
    staging_root: &Path,
    installation_root: &Path,
    keep: &KeepSet,
    mode: PreserveMode,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    for relative in keep.entries() {
        let source = installation_root.join(relative);
        match fs::symlink_metadata(&source) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    path = %relative.display(),
                    "keep entry not present in installation; skipping"
                );
                report.skipped.push(relative.clone());
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", source.display()));
            }
        }

        let destination = staging_root.join(relative);
        remove_path_if_exists(&destination)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        match mode {
            PreserveMode::Copy => match retained_link_target(installation_root, &source) {
                Some(target) => {
                    warn!(
                        path = %relative.display(),
                        target = %target.display(),
                        "copying content out of a retained previous tree"
                    );
                    copy_path(&target, &destination)?;
                }
                None => copy_path(&source, &destination)?,
            },
            PreserveMode::Symlink => create_symlink(&source, &destination)?,
        }
        debug!(path = %relative.display(), mode = mode.as_str(), "preserved");
        report.preserved.push(relative.clone());
    }
    Ok(report)
}

fn retained_link_target(installation_root: &Path, source: &Path) -> Option<PathBuf> {
    let target = fs::read_link(source).ok()?;
    let marker = sibling_path(installation_root, "previous-").ok()?;
    let prefix = marker.file_name()?.to_string_lossy().into_owned();
    let first = target.strip_prefix(marker.parent()?).ok()?.components().next()?;
    if first.as_os_str().to_string_lossy().starts_with(&prefix) {
        Some(target)
    } else {
        None
    }
}

pub fn repoint_symlinks(
    staging_root: &Path,
    preserved: &[PathBuf],
    from: &Path,
    to: &Path,
) -> Result<()> {
    for relative in preserved {
        let link = staging_root.join(relative);
        let Ok(target) = fs::read_link(&link) else {
            continue;
        };
        if target != from.join(relative) {
            continue;
        }
        fs::remove_file(&link)
            .with_context(|| format!("failed to remove symlink {}", link.display()))?;
        create_symlink(&to.join(relative), &link)?;
    }
    Ok(())
}

pub fn plugins_missing_from(installation_root: &Path, package_root: &Path) -> Result<Vec<String>> {
    let plugins_dir = installation_root.join("plugins");
    let entries = match fs::read_dir(&plugins_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", plugins_dir.display()));
        }
    };

    let mut missing = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if !package_root.join("plugins").join(&name).exists() {
            missing.push(format!("plugins/{}", name.to_string_lossy()));
        }
    }
    missing.sort();
    Ok(missing)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).with_context(|| {
        format!(
            "failed to create symlink {} -> {}",
            link.display(),
            target.display()
        )
    })
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    anyhow::bail!(
        "symlink preservation is not supported on this platform: {} -> {}",
        link.display(),
        target.display()
    )
}
