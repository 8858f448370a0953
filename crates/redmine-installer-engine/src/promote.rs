use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redmine_installer_core::InstallerError;
use tracing::{debug, info, warn};

use crate::fs_utils::{copy_dir_recursive, remove_path_if_exists, sync_parent_dir};
use crate::layout::{run_timestamp, unused_sibling_path};
use crate::preserve::repoint_symlinks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub retained_previous: Option<PathBuf>,
}

pub fn promote(package_root: &Path, root: &Path, symlinked: &[PathBuf]) -> Result<Promotion> {
    promote_with_rename(package_root, root, symlinked, &mut |from, to| fs::rename(from, to))
}

pub(crate) fn promote_with_rename(
    package_root: &Path,
    root: &Path,
    symlinked: &[PathBuf],
    rename: &mut dyn FnMut(&Path, &Path) -> io::Result<()>,
) -> Result<Promotion> {
    let tag = format!("{}-{}", run_timestamp(), std::process::id());
    let incoming = unused_sibling_path(root, &format!("incoming-{tag}"))?;
    let previous = unused_sibling_path(root, &format!("previous-{tag}"))?;

    stage_incoming(package_root, &incoming)?;
    if !symlinked.is_empty() {
        if let Err(err) = repoint_symlinks(&incoming, symlinked, root, &previous) {
            discard_incoming(&incoming);
            return Err(err);
        }
    }

    let root_exists = fs::symlink_metadata(root).is_ok();
    if root_exists {
        if let Err(err) = rename(root, &previous) {
            discard_incoming(&incoming);
            return Err(err).with_context(|| {
                format!(
                    "failed to move {} aside; it cannot be renamed in place (a mount point or a read-only parent directory). The installation was left unchanged",
                    root.display()
                )
            });
        }
    }

    if let Err(err) = rename(&incoming, root) {
        if !root_exists {
            discard_incoming(&incoming);
            return Err(err).with_context(|| {
                format!("failed to move {} into {}", incoming.display(), root.display())
            });
        }
        return match rename(&previous, root) {
            Ok(()) => {
                discard_incoming(&incoming);
                Err(err).with_context(|| {
                    format!(
                        "failed to move {} into {}; previous installation restored",
                        incoming.display(),
                        root.display()
                    )
                })
            }
            Err(restore_err) => Err(InstallerError::Promotion {
                root: root.to_path_buf(),
                detail: format!(
                    "new tree could not be moved in ({err}) and the previous tree could not be moved back ({restore_err}); previous tree is at {}, new tree at {}",
                    previous.display(),
                    incoming.display()
                ),
            }
            .into()),
        };
    }
    sync_parent_dir(root);

    if !root_exists {
        return Ok(Promotion {
            retained_previous: None,
        });
    }
    finish(root, &previous, symlinked)
}

fn stage_incoming(package_root: &Path, incoming: &Path) -> Result<()> {
    if fs::rename(package_root, incoming).is_ok() {
        return Ok(());
    }
    debug!(
        from = %package_root.display(),
        to = %incoming.display(),
        "rename refused; copying new tree beside the installation root"
    );
    if let Err(err) = copy_dir_recursive(package_root, incoming) {
        discard_incoming(incoming);
        return Err(err);
    }
    Ok(())
}

fn discard_incoming(incoming: &Path) {
    if let Err(err) = remove_path_if_exists(incoming) {
        warn!(
            incoming = %incoming.display(),
            error = %format!("{err:#}"),
            "failed to remove unpromoted tree"
        );
    }
}

fn finish(root: &Path, previous: &Path, symlinked: &[PathBuf]) -> Result<Promotion> {
    if !symlinked.is_empty() {
        info!(previous = %previous.display(), "previous tree kept; preserved paths link into it");
        return Ok(Promotion {
            retained_previous: Some(previous.to_path_buf()),
        });
    }
    if let Err(err) = remove_path_if_exists(previous) {
        warn!(
            previous = %previous.display(),
            error = %format!("{err:#}"),
            "failed to remove previous tree"
        );
    }
    debug!(root = %root.display(), "promotion complete");
    Ok(Promotion {
        retained_previous: None,
    })
}
