use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

pub trait ProcessRunner {
    fn run(&self, command: &mut Command, context_message: &str) -> Result<String>;
}

impl<F> ProcessRunner for F
where
    F: Fn(&mut Command, &str) -> Result<String>,
{
    fn run(&self, command: &mut Command, context_message: &str) -> Result<String> {
        self(command, context_message)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &mut Command, context_message: &str) -> Result<String> {
        debug!(command = %describe_command(command), "running");
        let stdout = run_command(command, context_message)?;
        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }
        Ok(stdout)
    }
}

pub fn run_command(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

// Environment values stay out: they carry database passwords.
pub fn describe_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

pub fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(ToOwned::to_owned).collect()
}

pub fn effective_uid() -> u32 {
    uzers::get_effective_uid()
}
