use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use redmine_installer_core::{
    DatabaseConfig, DatabaseKind, InstallerError, ToolSettings, DATABASE_CONFIG_RELATIVE_PATH,
    PRODUCTION_ENVIRONMENT,
};
use tracing::{info, warn};

use crate::fs_utils::remove_file_if_exists;
use crate::process::ProcessRunner;

pub fn read_database_config(root: &Path) -> Result<Option<DatabaseConfig>> {
    let path = root.join(DATABASE_CONFIG_RELATIVE_PATH);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    DatabaseConfig::from_yaml_str(&raw, PRODUCTION_ENVIRONMENT)
        .with_context(|| format!("failed to load {}", path.display()))
}

pub fn dump_database(
    config: &DatabaseConfig,
    root: &Path,
    dump_path: &Path,
    tools: &ToolSettings,
    runner: &dyn ProcessRunner,
) -> Result<()> {
    let mut command = build_dump_command(config, root, dump_path, tools)?;
    runner.run(&mut command, "database dump failed")?;
    info!(dump = %dump_path.display(), adapter = config.kind.as_str(), "database dumped");
    Ok(())
}

pub fn restore_database(
    dump: &Path,
    root: &Path,
    tools: &ToolSettings,
    runner: &dyn ProcessRunner,
) -> Result<()> {
    let restore_error = |detail: String| InstallerError::Restore {
        dump: dump.to_path_buf(),
        detail,
    };

    if !dump.is_file() {
        return Err(restore_error("dump file does not exist".to_string()).into());
    }
    let config = read_database_config(root)
        .map_err(|err| restore_error(format!("{err:#}")))?
        .ok_or_else(|| {
            restore_error(format!(
                "no {PRODUCTION_ENVIRONMENT} database configured in {}",
                root.join(DATABASE_CONFIG_RELATIVE_PATH).display()
            ))
        })?;

    warn!(
        database = %config.database,
        adapter = config.kind.as_str(),
        "dropping existing database contents before restore"
    );
    let steps = build_restore_commands(&config, root, dump, tools)
        .map_err(|err| restore_error(format!("{err:#}")))?;
    for step in steps {
        match step {
            RestoreStep::RemoveFile(path) => {
                remove_file_if_exists(&path).map_err(|err| {
                    restore_error(format!("failed to remove {}: {err}", path.display()))
                })?;
            }
            RestoreStep::Run(mut command) => {
                runner
                    .run(&mut command, "database client failed")
                    .map_err(|err| restore_error(format!("{err:#}")))?;
            }
        }
    }

    info!(dump = %dump.display(), database = %config.database, "database restored");
    Ok(())
}

#[derive(Debug)]
pub enum RestoreStep {
    RemoveFile(PathBuf),
    Run(Command),
}

pub fn build_dump_command(
    config: &DatabaseConfig,
    root: &Path,
    dump_path: &Path,
    tools: &ToolSettings,
) -> Result<Command> {
    let command = match config.kind {
        DatabaseKind::MySql => {
            let mut command = Command::new(&tools.mysqldump);
            apply_mysql_connection(&mut command, config);
            command
                .arg("--single-transaction")
                .arg("--routines")
                .arg(format!("--result-file={}", dump_path.display()))
                .arg(&config.database);
            command
        }
        DatabaseKind::PostgreSql => {
            let mut command = Command::new(&tools.pg_dump);
            apply_postgres_connection(&mut command, config);
            command
                .arg("--no-owner")
                .arg("--file")
                .arg(dump_path)
                .arg(&config.database);
            command
        }
        DatabaseKind::Sqlite => {
            let output = File::create(dump_path)
                .with_context(|| format!("failed to create {}", dump_path.display()))?;
            let mut command = Command::new(&tools.sqlite3);
            command
                .arg(sqlite_path(config, root))
                .arg(".dump")
                .stdout(Stdio::from(output));
            command
        }
    };
    Ok(command)
}

pub fn build_restore_commands(
    config: &DatabaseConfig,
    root: &Path,
    dump: &Path,
    tools: &ToolSettings,
) -> Result<Vec<RestoreStep>> {
    let steps = match config.kind {
        DatabaseKind::MySql => {
            let mut recreate = Command::new(&tools.mysql);
            apply_mysql_connection(&mut recreate, config);
            let charset = config
                .encoding
                .as_deref()
                .map(|encoding| format!(" CHARACTER SET {encoding}"))
                .unwrap_or_default();
            recreate.arg("-e").arg(format!(
                "DROP DATABASE IF EXISTS `{name}`; CREATE DATABASE `{name}`{charset};",
                name = config.database
            ));

            let input =
                File::open(dump).with_context(|| format!("failed to open {}", dump.display()))?;
            let mut load = Command::new(&tools.mysql);
            apply_mysql_connection(&mut load, config);
            load.arg(&config.database).stdin(Stdio::from(input));

            vec![RestoreStep::Run(recreate), RestoreStep::Run(load)]
        }
        DatabaseKind::PostgreSql => {
            let mut reset = Command::new(&tools.psql);
            apply_postgres_connection(&mut reset, config);
            reset
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("--dbname")
                .arg(&config.database)
                .arg("-c")
                .arg("DROP SCHEMA IF EXISTS public CASCADE; CREATE SCHEMA public;");

            let mut load = Command::new(&tools.psql);
            apply_postgres_connection(&mut load, config);
            load.arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("--dbname")
                .arg(&config.database)
                .arg("--file")
                .arg(dump);

            vec![RestoreStep::Run(reset), RestoreStep::Run(load)]
        }
        DatabaseKind::Sqlite => {
            let database = sqlite_path(config, root);
            let input =
                File::open(dump).with_context(|| format!("failed to open {}", dump.display()))?;
            let mut load = Command::new(&tools.sqlite3);
            load.arg(&database).stdin(Stdio::from(input));
            vec![RestoreStep::RemoveFile(database), RestoreStep::Run(load)]
        }
    };
    Ok(steps)
}

fn apply_mysql_connection(command: &mut Command, config: &DatabaseConfig) {
    if let Some(host) = &config.host {
        command.arg(format!("--host={host}"));
    }
    if let Some(port) = &config.port {
        command.arg(format!("--port={port}"));
    }
    if let Some(username) = &config.username {
        command.arg(format!("--user={username}"));
    }
    if let Some(password) = &config.password {
        command.env("MYSQL_PWD", password);
    }
}

fn apply_postgres_connection(command: &mut Command, config: &DatabaseConfig) {
    if let Some(host) = &config.host {
        command.arg("--host").arg(host);
    }
    if let Some(port) = &config.port {
        command.arg("--port").arg(port);
    }
    if let Some(username) = &config.username {
        command.arg("--username").arg(username);
    }
    if let Some(password) = &config.password {
        command.env("PGPASSWORD", password);
    }
}

fn sqlite_path(config: &DatabaseConfig, root: &Path) -> PathBuf {
    let path = Path::new(&config.database);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
