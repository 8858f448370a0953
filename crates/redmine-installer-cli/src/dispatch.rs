use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use redmine_installer_core::{
    classify, BackupOptions, InstallOptions, InstallerError, KeepSet, PreserveMode,
    RestoreOptions, RunConfig, Settings, UpgradeOptions,
};
use redmine_installer_engine::{
    default_installer_home, effective_uid, global_flag, install, install_signal_handlers,
    run_backup, run_restore, upgrade, verify_log, InstallerLayout, LogVerdict, RunContext,
    RunFailure, RunSummary, SystemRunner, TomlProfileStore,
};
use tracing::debug;

use crate::render::TerminalRenderer;
use crate::{Cli, Commands, InstallArgs, UpgradeArgs};

pub(crate) const EXIT_MANUAL_RECOVERY: u8 = 3;
pub(crate) const EXIT_CANCELLED: u8 = 130;

#[derive(Debug)]
pub(crate) enum Operation {
    Install(InstallOptions),
    Upgrade(UpgradeOptions),
    Backup(BackupOptions),
    Restore(RestoreOptions),
}

impl Operation {
    fn command(&self) -> &'static str {
        match self {
            Self::Install(_) => "install",
            Self::Upgrade(_) => "upgrade",
            Self::Backup(_) => "backup",
            Self::Restore(_) => "restore-db",
        }
    }
}

type StatusLines = Vec<(&'static str, String)>;

pub(crate) fn run_config(cli: &Cli) -> RunConfig {
    RunConfig {
        debug: cli.debug,
        silent: cli.silent,
        keep_staging: cli.keep_staging,
    }
}

pub(crate) fn run_cli(cli: Cli, renderer: TerminalRenderer) -> Result<ExitCode> {
    let config = run_config(&cli);
    if cli.env {
        debug!("--env is accepted for compatibility; production is always used");
    }

    let operation = match cli.command {
        Commands::VerifyLog { logfile } => return verify_log_command(renderer, &logfile),
        Commands::Install(args) => Operation::Install(install_options(args)?),
        Commands::Upgrade(args) => Operation::Upgrade(upgrade_options(args)?),
        Commands::Backup { root } => Operation::Backup(BackupOptions {
            root: resolve_root(root.as_deref())?,
        }),
        Commands::RestoreDb {
            dump,
            root,
            enable_user_root,
        } => Operation::Restore(RestoreOptions {
            dump: absolute_path(&dump)?,
            root: resolve_root(root.as_deref())?,
            enable_user_root,
        }),
    };

    let (layout, settings) = resolve_layout(cli.home.as_deref())?;
    install_signal_handlers()?;

    let runner = SystemRunner;
    let profiles = TomlProfileStore::new(layout.profiles_path());
    let progress = renderer.download_progress();
    let on_download =
        |downloaded: u64, total: Option<u64>| progress.update(downloaded, total);
    let ctx = RunContext {
        layout: &layout,
        settings: &settings,
        run: config,
        runner: &runner,
        profiles: &profiles,
        cancel: global_flag(),
        effective_uid: effective_uid(),
        on_download: &on_download,
    };

    let result = match &operation {
        Operation::Install(options) => install(&ctx, options),
        Operation::Upgrade(options) => upgrade(&ctx, options),
        Operation::Backup(options) => run_backup(&ctx, options),
        Operation::Restore(options) => run_restore(&ctx, options),
    };
    progress.finish();

    let mut lines = summary_lines(&operation, &result?);
    if config.silent {
        lines.truncate(1);
    }
    renderer.print_lines(&lines);
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn report_failure(renderer: TerminalRenderer, err: &anyhow::Error) -> ExitCode {
    renderer.print_error_lines(&failure_lines(err));
    ExitCode::from(exit_code_for(err))
}

pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    match classify(err) {
        Some(typed) if typed.requires_manual_recovery() => EXIT_MANUAL_RECOVERY,
        Some(InstallerError::Cancelled { .. }) => EXIT_CANCELLED,
        _ => 1,
    }
}

pub(crate) fn install_options(args: InstallArgs) -> Result<InstallOptions> {
    Ok(InstallOptions {
        package: args.package.unwrap_or_default(),
        root: resolve_root(args.root.as_deref())?,
        enable_user_root: args.enable_user_root,
        bundle_options: args.bundle_options,
        database_dump: args.database_dump.as_deref().map(absolute_path).transpose()?,
        database_config: args
            .database_config
            .as_deref()
            .map(absolute_path)
            .transpose()?,
    })
}

pub(crate) fn upgrade_options(args: UpgradeArgs) -> Result<UpgradeOptions> {
    Ok(UpgradeOptions {
        package: args.package.unwrap_or_default(),
        root: resolve_root(args.root.as_deref())?,
        enable_user_root: args.enable_user_root,
        bundle_options: args.bundle_options,
        profile: args.profile,
        keep: KeepSet::from_values(&args.keep)?,
        mode: if args.copy_files_with_symlink {
            PreserveMode::Symlink
        } else {
            PreserveMode::Copy
        },
        save_profile: args.save_profile,
    })
}

pub(crate) fn resolve_layout(home: Option<&Path>) -> Result<(InstallerLayout, Settings)> {
    let home = match home {
        Some(home) => absolute_path(home)?,
        None => default_installer_home()?,
    };
    let settings = InstallerLayout::new(home.clone()).load_settings()?;
    let backup_dir = settings.backup_dir.as_ref().map(|dir| home.join(dir));
    Ok((InstallerLayout::new(home).with_backup_dir(backup_dir), settings))
}

fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    absolute_path(root.unwrap_or_else(|| Path::new(".")))
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    let absolute = path
        .absolutize()
        .with_context(|| format!("failed to resolve path {}", path.display()))?;
    Ok(absolute.into_owned())
}

fn verify_log_command(renderer: TerminalRenderer, logfile: &Path) -> Result<ExitCode> {
    let path = absolute_path(logfile)?;
    let verdict = verify_log(&path)?;
    renderer.print_status(
        verdict_status(&verdict),
        &format!("{}: {verdict}", path.display()),
    );
    Ok(if verdict.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(crate) fn verdict_status(verdict: &LogVerdict) -> &'static str {
    match verdict {
        LogVerdict::Complete => "ok",
        LogVerdict::Interrupted { .. } | LogVerdict::Incomplete { .. } => "warn",
        LogVerdict::Failed { .. } | LogVerdict::Corrupt { .. } => "err",
    }
}

pub(crate) fn summary_lines(operation: &Operation, summary: &RunSummary) -> StatusLines {
    let root = summary.root.display();
    let mut lines = StatusLines::new();
    match operation {
        Operation::Install(_) => lines.push(("ok", format!("installed redmine into {root}"))),
        Operation::Upgrade(_) => lines.push(("ok", format!("upgraded redmine in {root}"))),
        Operation::Backup(_) => lines.push(("ok", format!("backed up {root}"))),
        Operation::Restore(options) => lines.push((
            "ok",
            format!(
                "restored database of {root} from {}",
                options.dump.display()
            ),
        )),
    }

    if let Some(record) = &summary.backup {
        lines.push(("step", format!("backup: {}", record.directory.display())));
        if let Some(dump) = &record.database_dump {
            lines.push(("step", format!("database dump: {}", dump.display())));
        }
    }
    if !summary.merge.preserved.is_empty() {
        let preserved = summary
            .merge
            .preserved
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(("step", format!("preserved: {preserved}")));
    }
    for skipped in &summary.merge.skipped {
        lines.push((
            "warn",
            format!("keep entry not found in installation: {}", skipped.display()),
        ));
    }
    if let Some(previous) = &summary.retained_previous {
        lines.push((
            "warn",
            format!(
                "previous tree retained for symlinked paths: {}",
                previous.display()
            ),
        ));
    }
    if let Some(id) = summary.saved_profile {
        lines.push(("ok", format!("saved profile {id}")));
    }
    lines.push((
        "step",
        format!(
            "{} log: {}",
            operation.command(),
            summary.log_path.display()
        ),
    ));
    lines
}

pub(crate) fn failure_lines(err: &anyhow::Error) -> StatusLines {
    let mut lines = vec![("err", format!("{err:#}"))];
    let failure = err.downcast_ref::<RunFailure>();
    let typed = classify(err);
    let backup = failure.and_then(|failure| failure.backup.as_ref());

    if let Some(InstallerError::PartialBackup { record, .. }) = typed {
        lines.push((
            "warn",
            format!(
                "files were archived to {} without a database dump",
                record.files_archive.display()
            ),
        ));
    }

    if typed.is_some_and(InstallerError::requires_manual_recovery) {
        let guidance = match backup {
            Some(record) => format!(
                "installation root may be inconsistent; recover it from the backup in {}",
                record.directory.display()
            ),
            None => "installation root may be inconsistent and no backup was taken".to_string(),
        };
        lines.push(("err", guidance));
    } else if let Some(record) = backup {
        lines.push((
            "warn",
            format!("backup available in {}", record.directory.display()),
        ));
    }

    if let Some(failure) = failure {
        if let Some(staging) = &failure.staging {
            lines.push((
                "warn",
                format!("staging tree kept for inspection: {}", staging.display()),
            ));
        }
        lines.push((
            "step",
            format!(
                "{} log: {}",
                failure.command,
                failure.log_path.display()
            ),
        ));
    }
    lines
}
