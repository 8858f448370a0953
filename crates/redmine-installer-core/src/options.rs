use std::path::PathBuf;

use crate::{InstallerError, KeepSet, Profile};

pub const UPGRADE_DEFAULT_KEEP: &[&str] = &[
    "config/database.yml",
    "config/configuration.yml",
    "config/additional_environment.rb",
    "config/initializers/secret_token.rb",
    "files",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub debug: bool,
    pub silent: bool,
    pub keep_staging: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreserveMode {
    #[default]
    Copy,
    Symlink,
}

impl PreserveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Symlink => "symlink",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub package: String,
    pub root: PathBuf,
    pub enable_user_root: bool,
    pub bundle_options: Option<String>,
    pub database_dump: Option<PathBuf>,
    pub database_config: Option<PathBuf>,
}

impl InstallOptions {
    pub fn validate(&self) -> Result<(), InstallerError> {
        validate_root(&self.root)?;
        validate_optional_file("--database-dump", self.database_dump.as_ref())?;
        validate_optional_file("--database-config", self.database_config.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub package: String,
    pub root: PathBuf,
    pub enable_user_root: bool,
    pub bundle_options: Option<String>,
    pub profile: Option<u32>,
    pub keep: KeepSet,
    pub mode: PreserveMode,
    pub save_profile: bool,
}

impl UpgradeOptions {
    pub fn validate(&self) -> Result<(), InstallerError> {
        validate_root(&self.root)?;
        if self.save_profile && self.profile.is_some() {
            return Err(InstallerError::configuration(
                "--save-profile cannot be combined with --profile",
            ));
        }
        Ok(())
    }

    pub fn apply_profile(&mut self, profile: &Profile) -> Result<(), InstallerError> {
        if self.package.trim().is_empty() {
            if let Some(package) = &profile.package {
                self.package = package.clone();
            }
        }
        if self.bundle_options.is_none() {
            self.bundle_options = profile.bundle_options.clone();
        }
        if profile.copy_files_with_symlink {
            self.mode = PreserveMode::Symlink;
        }
        let profile_keep = KeepSet::from_values(&profile.keep)?;
        self.keep.extend_from(&profile_keep);
        Ok(())
    }

    pub fn effective_keep(&self) -> Result<KeepSet, InstallerError> {
        let mut keep = KeepSet::from_values(UPGRADE_DEFAULT_KEEP)?;
        keep.extend_from(&self.keep);
        Ok(keep)
    }

    pub fn to_profile(&self) -> Profile {
        Profile {
            id: 0,
            keep: self.keep.to_strings(),
            bundle_options: self.bundle_options.clone(),
            copy_files_with_symlink: self.mode == PreserveMode::Symlink,
            package: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    pub root: PathBuf,
}

impl BackupOptions {
    pub fn validate(&self) -> Result<(), InstallerError> {
        validate_root(&self.root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    pub dump: PathBuf,
    pub root: PathBuf,
    pub enable_user_root: bool,
}

impl RestoreOptions {
    pub fn validate(&self) -> Result<(), InstallerError> {
        validate_root(&self.root)?;
        if self.dump.as_os_str().is_empty() {
            return Err(InstallerError::configuration("a database dump path is required"));
        }
        Ok(())
    }
}

pub fn ensure_not_root(effective_uid: u32, enable_user_root: bool) -> Result<(), InstallerError> {
    if effective_uid == 0 && !enable_user_root {
        return Err(InstallerError::Privilege);
    }
    Ok(())
}

fn validate_root(root: &std::path::Path) -> Result<(), InstallerError> {
    if root.as_os_str().is_empty() {
        return Err(InstallerError::configuration("installation root must not be empty"));
    }
    if !root.is_absolute() {
        return Err(InstallerError::configuration(format!(
            "installation root must be absolute: {}",
            root.display()
        )));
    }
    if root.parent().is_none() {
        return Err(InstallerError::configuration(
            "installation root must not be the filesystem root",
        ));
    }
    Ok(())
}

fn validate_optional_file(flag: &str, path: Option<&PathBuf>) -> Result<(), InstallerError> {
    match path {
        Some(path) if path.as_os_str().is_empty() => Err(InstallerError::configuration(format!(
            "{flag} requires a file path"
        ))),
        _ => Ok(()),
    }
}
