use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::layout::{run_timestamp, unused_sibling_path};

#[derive(Debug)]
pub struct StagingTree {
    dir: PathBuf,
    retained: bool,
}

impl StagingTree {
    pub fn create_beside(root: &Path) -> Result<Self> {
        let tag = format!("staging-{}-{}", std::process::id(), run_timestamp());
        let dir = unused_sibling_path(root, &tag)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::create_dir(&dir)
            .with_context(|| format!("failed to create staging directory {}", dir.display()))?;
        debug!(staging = %dir.display(), "staging directory created");
        Ok(Self {
            dir,
            retained: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn unpack_dir(&self) -> PathBuf {
        self.dir.join("unpacked")
    }

    pub fn retain(&mut self) {
        self.retained = true;
    }

    pub fn is_retained(&self) -> bool {
        self.retained
    }
}

impl Drop for StagingTree {
    fn drop(&mut self) {
        if self.retained {
            info!(staging = %self.dir.display(), "staging directory kept for inspection");
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    staging = %self.dir.display(),
                    error = %err,
                    "failed to remove staging directory"
                );
            }
        }
    }
}
