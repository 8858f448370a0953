use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use redmine_installer_core::Settings;

pub const HOME_ENV: &str = "REDMINE_INSTALLER_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerLayout {
    home: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl InstallerLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            backup_dir: None,
        }
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    pub fn settings_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.home.join("profiles.toml")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.home.join("backups"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn log_path(&self, command: &str, timestamp: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("{command}-{timestamp}-{}.log", std::process::id()))
    }

    pub fn next_log_path(&self, command: &str, timestamp: &str) -> PathBuf {
        let base = self.log_path(command, timestamp);
        let mut candidate = base.clone();
        let mut suffix = 0_u32;
        while fs::symlink_metadata(&candidate).is_ok() {
            suffix += 1;
            candidate = base.with_extension(format!("{suffix}.log"));
        }
        candidate
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.home.clone(), self.backups_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.settings_path();
        match fs::read_to_string(&path) {
            Ok(raw) => Settings::from_toml_str(&raw)
                .with_context(|| format!("failed to load settings: {}", path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read settings: {}", path.display()))
            }
        }
    }
}

pub fn default_installer_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve installer home")?;
    Ok(PathBuf::from(home).join(".redmine-installer"))
}

pub fn sibling_path(root: &Path, tag: &str) -> Result<PathBuf> {
    let parent = root
        .parent()
        .ok_or_else(|| anyhow!("installation root has no parent: {}", root.display()))?;
    let name = root
        .file_name()
        .ok_or_else(|| anyhow!("installation root has no name: {}", root.display()))?;
    Ok(parent.join(format!(".{}.{tag}", name.to_string_lossy())))
}

pub fn unused_sibling_path(root: &Path, tag: &str) -> Result<PathBuf> {
    let base = sibling_path(root, tag)?;
    let mut candidate = base.clone();
    let mut suffix = 0_u32;
    while fs::symlink_metadata(&candidate).is_ok() {
        suffix += 1;
        candidate = sibling_path(root, &format!("{tag}-{suffix}"))?;
    }
    Ok(candidate)
}

pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
