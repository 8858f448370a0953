mod archive;
mod database;
mod error;
mod keep;
mod options;
mod profile;
mod record;
mod reference;
mod settings;

pub use archive::ArchiveType;
pub use database::{
    DatabaseConfig, DatabaseKind, DATABASE_CONFIG_RELATIVE_PATH, PRODUCTION_ENVIRONMENT,
};
pub use error::{classify, InstallerError};
pub use keep::{normalize_keep_entry, KeepSet};
pub use options::{
    ensure_not_root, BackupOptions, InstallOptions, PreserveMode, RestoreOptions, RunConfig,
    UpgradeOptions, UPGRADE_DEFAULT_KEEP,
};
pub use profile::{Profile, ProfileDocument, ProfileStore};
pub use record::{
    BackupRecord, BACKUP_DATABASE_DUMP_NAME, BACKUP_FILES_ARCHIVE_NAME, BACKUP_RECORD_FILE_NAME,
};
pub use reference::{parse_version_tag, PackageReference, DEFAULT_RELEASE_URL_TEMPLATE};
pub use settings::{Settings, ToolSettings, DEFAULT_BUNDLE_OPTIONS};
