use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redmine_installer_core::{InstallerError, Profile, ProfileDocument, ProfileStore};

use crate::fs_utils::sync_parent_dir;

#[derive(Debug, Clone)]
pub struct TomlProfileStore {
    path: PathBuf,
}

impl TomlProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<ProfileDocument> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => ProfileDocument::from_toml_str(&raw)
                .with_context(|| format!("failed to load profiles: {}", self.path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ProfileDocument::default()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read profiles: {}", self.path.display())),
        }
    }

    fn write_document(&self, document: &ProfileDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, document.to_toml_string()?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        sync_parent_dir(&self.path);
        Ok(())
    }
}

impl ProfileStore for TomlProfileStore {
    fn load_profile(&self, id: u32) -> Result<Profile> {
        let document = self.read_document()?;
        document
            .get(id)
            .cloned()
            .ok_or_else(|| {
                InstallerError::configuration(format!(
                    "profile {id} not found in {}",
                    self.path.display()
                ))
                .into()
            })
    }

    fn save_profile(&self, profile: &Profile) -> Result<u32> {
        let mut document = self.read_document()?;
        let id = document.insert_new(profile);
        self.write_document(&document)?;
        Ok(id)
    }
}
