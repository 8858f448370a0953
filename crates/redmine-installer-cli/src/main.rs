use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::render::{current_output_style, TerminalRenderer};

mod dispatch;
mod logging;
mod render;

#[cfg(test)]
mod tests;

#[derive(Parser, Debug)]
#[command(name = "redmine", version)]
#[command(about = "Install, upgrade and back up redmine deployments", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, conflicts_with = "silent")]
    debug: bool,
    #[arg(short, long, global = true)]
    silent: bool,
    #[arg(short = 'e', long = "env", global = true, hide = true)]
    env: bool,
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,
    #[arg(long, global = true)]
    keep_staging: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install redmine from an archive, URL or version tag
    #[command(visible_alias = "i")]
    Install(InstallArgs),
    /// Upgrade an existing redmine installation
    #[command(visible_alias = "u")]
    Upgrade(UpgradeArgs),
    /// Back up the files and database of an installation
    #[command(visible_alias = "b")]
    Backup {
        #[arg(value_name = "REDMINE_ROOT")]
        root: Option<PathBuf>,
    },
    /// Restore a database dump, deleting the current data
    RestoreDb {
        #[arg(value_name = "DATABASE_DUMP")]
        dump: PathBuf,
        #[arg(value_name = "REDMINE_ROOT")]
        root: Option<PathBuf>,
        #[arg(long)]
        enable_user_root: bool,
    },
    /// Check an operation log for integrity and completion
    VerifyLog {
        #[arg(value_name = "LOGFILE")]
        logfile: PathBuf,
    },
}

#[derive(Args, Debug)]
struct InstallArgs {
    package: Option<String>,
    #[arg(value_name = "REDMINE_ROOT")]
    root: Option<PathBuf>,
    #[arg(long)]
    enable_user_root: bool,
    #[arg(long, value_name = "OPTIONS", allow_hyphen_values = true)]
    bundle_options: Option<String>,
    #[arg(long, value_name = "DUMP")]
    database_dump: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    database_config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UpgradeArgs {
    package: Option<String>,
    #[arg(value_name = "REDMINE_ROOT")]
    root: Option<PathBuf>,
    #[arg(long)]
    enable_user_root: bool,
    #[arg(long, value_name = "OPTIONS", allow_hyphen_values = true)]
    bundle_options: Option<String>,
    #[arg(short, long, value_name = "PROFILE_ID")]
    profile: Option<u32>,
    #[arg(long, value_name = "PATH", value_delimiter = ',', action = ArgAction::Append)]
    keep: Vec<String>,
    #[arg(long)]
    copy_files_with_symlink: bool,
    #[arg(long)]
    save_profile: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = dispatch::run_config(&cli);
    logging::init_tracing(config);
    let renderer = TerminalRenderer::from_style(current_output_style(config.silent));

    match dispatch::run_cli(cli, renderer) {
        Ok(code) => code,
        Err(err) => dispatch::report_failure(renderer, &err),
    }
}
