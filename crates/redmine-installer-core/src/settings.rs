use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::reference::DEFAULT_RELEASE_URL_TEMPLATE;

pub const DEFAULT_BUNDLE_OPTIONS: &str = "--without development test";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub release_url_template: String,
    pub backup_dir: Option<PathBuf>,
    pub default_bundle_options: String,
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    pub bundle: String,
    pub mysql: String,
    pub mysqldump: String,
    pub pg_dump: String,
    pub psql: String,
    pub sqlite3: String,
    pub unzip: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            release_url_template: DEFAULT_RELEASE_URL_TEMPLATE.to_string(),
            backup_dir: None,
            default_bundle_options: DEFAULT_BUNDLE_OPTIONS.to_string(),
            tools: ToolSettings::default(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            bundle: "bundle".to_string(),
            mysql: "mysql".to_string(),
            mysqldump: "mysqldump".to_string(),
            pg_dump: "pg_dump".to_string(),
            psql: "psql".to_string(),
            sqlite3: "sqlite3".to_string(),
            unzip: "unzip".to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(input).context("failed to parse installer settings")?;
        if !settings.release_url_template.contains("{version}") {
            return Err(anyhow!(
                "release_url_template must contain a {{version}} placeholder"
            ));
        }
        Ok(settings)
    }
}
