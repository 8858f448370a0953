use std::path::{Component, Path, PathBuf};

use crate::InstallerError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepSet {
    entries: Vec<PathBuf>,
}

impl KeepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values<I, S>(values: I) -> Result<Self, InstallerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for value in values {
            for part in value.as_ref().split(',') {
                if part.trim().is_empty() {
                    continue;
                }
                set.insert(part)?;
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, raw: &str) -> Result<bool, InstallerError> {
        let entry = normalize_keep_entry(raw)?;
        if self.covers(&entry) {
            return Ok(false);
        }
        self.entries.retain(|existing| !existing.starts_with(&entry));
        self.entries.push(entry);
        self.entries.sort();
        Ok(true)
    }

    pub fn extend_from(&mut self, other: &KeepSet) {
        for entry in &other.entries {
            if self.covers(entry) {
                continue;
            }
            self.entries.retain(|existing| !existing.starts_with(entry));
            self.entries.push(entry.clone());
        }
        self.entries.sort();
    }

    pub fn covers(&self, relative: &Path) -> bool {
        self.entries.iter().any(|entry| relative.starts_with(entry))
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect()
    }
}

pub fn normalize_keep_entry(raw: &str) -> Result<PathBuf, InstallerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InstallerError::configuration("keep path must not be empty"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(InstallerError::configuration(format!(
                    "keep path must be relative: {trimmed}"
                )));
            }
            Component::ParentDir => {
                return Err(InstallerError::configuration(format!(
                    "keep path must stay inside the installation root: {trimmed}"
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(InstallerError::configuration(format!(
            "keep path names the installation root itself: {trimmed}"
        )));
    }
    Ok(normalized)
}
