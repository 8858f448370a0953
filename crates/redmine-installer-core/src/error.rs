use std::path::PathBuf;

use thiserror::Error;

use crate::BackupRecord;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("invalid package reference '{reference}': {reason}")]
    InvalidPackageReference { reference: String, reason: String },

    #[error("failed to fetch package from {url}: {detail}")]
    Network { url: String, detail: String },

    #[error("malformed package: {reason}")]
    MalformedPackage { reason: String },

    #[error("unsafe archive entry '{entry}': {reason}")]
    UnsafeArchiveEntry { entry: String, reason: String },

    #[error("refusing to run as root; pass --enable-user-root to override")]
    Privilege,

    #[error("backup of {root} failed: {detail}")]
    Backup { root: PathBuf, detail: String },

    #[error(
        "database dump failed, files were archived to {}: {detail}",
        record.files_archive.display()
    )]
    PartialBackup { record: Box<BackupRecord>, detail: String },

    #[error("{step} failed: {detail}")]
    FatalUpgrade { step: String, detail: String },

    #[error("promotion of new tree into {root} failed: {detail}")]
    Promotion { root: PathBuf, detail: String },

    #[error("database restore from {dump} failed: {detail}")]
    Restore { dump: PathBuf, detail: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cancelled by signal before step {step}")]
    Cancelled { step: String },
}

impl InstallerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn requires_manual_recovery(&self) -> bool {
        matches!(self, Self::Promotion { .. })
    }
}

pub fn classify(err: &anyhow::Error) -> Option<&InstallerError> {
    err.downcast_ref::<InstallerError>().or_else(|| {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<InstallerError>())
    })
}
