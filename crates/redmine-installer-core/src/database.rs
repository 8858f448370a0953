use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use serde_yaml::Value;

pub const DATABASE_CONFIG_RELATIVE_PATH: &str = "config/database.yml";
pub const PRODUCTION_ENVIRONMENT: &str = "production";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    MySql,
    PostgreSql,
    Sqlite,
}

impl DatabaseKind {
    pub fn from_adapter(adapter: &str) -> Option<Self> {
        match adapter.trim().to_ascii_lowercase().as_str() {
            "mysql2" | "mysql" | "trilogy" => Some(Self::MySql),
            "postgresql" | "postgis" => Some(Self::PostgreSql),
            "sqlite3" | "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    pub adapter: String,
    pub database: String,
    pub host: Option<String>,
    pub port: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub encoding: Option<String>,
}

impl DatabaseConfig {
    pub fn from_yaml_str(input: &str, environment: &str) -> anyhow::Result<Option<Self>> {
        let mut document: Value =
            serde_yaml::from_str(input).context("failed to parse database configuration")?;
        document
            .apply_merge()
            .context("failed to resolve merge keys in database configuration")?;

        let Some(section) = document.get(environment) else {
            return Ok(None);
        };
        let fields: BTreeMap<String, Value> = serde_yaml::from_value(section.clone())
            .with_context(|| format!("database section '{environment}' is not a mapping"))?;

        let adapter = scalar(&fields, "adapter")
            .ok_or_else(|| anyhow!("database section '{environment}' has no adapter"))?;
        let kind = DatabaseKind::from_adapter(&adapter)
            .ok_or_else(|| anyhow!("unsupported database adapter: {adapter}"))?;
        let database = scalar(&fields, "database")
            .ok_or_else(|| anyhow!("database section '{environment}' has no database name"))?;

        Ok(Some(Self {
            kind,
            adapter,
            database,
            host: scalar(&fields, "host"),
            port: scalar(&fields, "port"),
            username: scalar(&fields, "username"),
            password: scalar(&fields, "password"),
            encoding: scalar(&fields, "encoding"),
        }))
    }
}

fn scalar(fields: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}
