use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const BACKUP_RECORD_FILE_NAME: &str = "record.toml";
pub const BACKUP_FILES_ARCHIVE_NAME: &str = "files.tar.gz";
pub const BACKUP_DATABASE_DUMP_NAME: &str = "database.sql";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub timestamp: String,
    pub root: PathBuf,
    pub directory: PathBuf,
    pub files_archive: PathBuf,
    pub files_archive_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_dump: Option<PathBuf>,
}

impl BackupRecord {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("failed to parse backup record")
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to serialize backup record")
    }
}
