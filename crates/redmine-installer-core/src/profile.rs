use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: u32,
    #[serde(default)]
    pub keep: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_options: Option<String>,
    #[serde(default)]
    pub copy_files_with_symlink: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

pub trait ProfileStore {
    fn load_profile(&self, id: u32) -> anyhow::Result<Profile>;

    fn save_profile(&self, profile: &Profile) -> anyhow::Result<u32>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileDocument {
    #[serde(default)]
    pub profile: Vec<Profile>,
}

impl ProfileDocument {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let document: Self = toml::from_str(input).context("failed to parse profiles document")?;
        let mut seen = std::collections::HashSet::new();
        for profile in &document.profile {
            if !seen.insert(profile.id) {
                return Err(anyhow!("duplicate profile id {}", profile.id));
            }
        }
        Ok(document)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to serialize profiles document")
    }

    pub fn get(&self, id: u32) -> Option<&Profile> {
        self.profile.iter().find(|profile| profile.id == id)
    }

    pub fn insert_new(&mut self, profile: &Profile) -> u32 {
        let id = self
            .profile
            .iter()
            .map(|existing| existing.id)
            .max()
            .unwrap_or(0)
            + 1;
        self.profile.push(Profile {
            id,
            ..profile.clone()
        });
        id
    }
}
