mod backup;
mod cancel;
mod database;
mod extract;
mod fetch;
mod fs_utils;
mod layout;
mod oplog;
mod orchestrator;
mod preserve;
mod process;
mod profiles;
mod promote;
mod staging;

pub use backup::{backup, claim_backup_dir, sha256_file};
pub use cancel::{global_flag, install_signal_handlers, is_cancelled};
pub use database::{
    build_dump_command, build_restore_commands, dump_database, read_database_config,
    restore_database, RestoreStep,
};
pub use extract::{
    extract_package, locate_package_root, validate_entry_path, PACKAGE_MARKERS,
};
pub use fetch::{detect_archive_type, resolve_package, ResolvedPackage};
pub use layout::{
    default_installer_home, run_timestamp, sibling_path, unused_sibling_path, InstallerLayout,
    HOME_ENV,
};
pub use oplog::{
    record_digest, verify_log, verify_log_str, LogRecord, LogVerdict, OperationLog, StepOutcome,
    DONE_STEP,
};
pub use orchestrator::{
    build_bundle_install_command, build_rake_command, install, run_backup, run_restore, upgrade,
    RunContext, RunFailure, RunSummary, Step,
};
pub use preserve::{merge, plugins_missing_from, repoint_symlinks, MergeReport};
pub use process::{describe_command, effective_uid, run_command, ProcessRunner, SystemRunner};
pub use profiles::TomlProfileStore;
pub use promote::{promote, Promotion};
pub use staging::StagingTree;
