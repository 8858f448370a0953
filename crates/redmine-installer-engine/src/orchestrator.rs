use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use redmine_installer_core::{
    classify, ensure_not_root, BackupOptions, BackupRecord, InstallOptions, InstallerError,
    PreserveMode, ProfileStore, RestoreOptions, RunConfig, Settings, UpgradeOptions,
    DATABASE_CONFIG_RELATIVE_PATH, PRODUCTION_ENVIRONMENT,
};
use tracing::{info, warn};

use crate::backup::backup;
use crate::cancel::is_cancelled;
use crate::database::restore_database;
use crate::extract::extract_package;
use crate::fetch::{resolve_package, ResolvedPackage};
use crate::fs_utils::is_missing_or_empty_dir;
use crate::layout::{run_timestamp, InstallerLayout};
use crate::oplog::{OperationLog, DONE_STEP};
use crate::preserve::{merge, plugins_missing_from, MergeReport};
use crate::process::{split_options, ProcessRunner};
use crate::promote::promote;
use crate::staging::StagingTree;

const SECRET_TOKEN_RELATIVE_PATH: &str = "config/initializers/secret_token.rb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Resolve,
    Backup,
    Extract,
    Preserve,
    ConfigureDatabase,
    DependencyInstall,
    Migrate,
    Promote,
    RestoreDatabase,
    Done,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Backup => "backup",
            Self::Extract => "extract",
            Self::Preserve => "preserve",
            Self::ConfigureDatabase => "configure_database",
            Self::DependencyInstall => "dependency_install",
            Self::Migrate => "migrate",
            Self::Promote => "promote",
            Self::RestoreDatabase => "restore_database",
            Self::Done => DONE_STEP,
        }
    }
}

pub struct RunContext<'a> {
    pub layout: &'a InstallerLayout,
    pub settings: &'a Settings,
    pub run: RunConfig,
    pub runner: &'a dyn ProcessRunner,
    pub profiles: &'a dyn ProfileStore,
    pub cancel: &'a AtomicBool,
    pub effective_uid: u32,
    pub on_download: &'a dyn Fn(u64, Option<u64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub root: PathBuf,
    pub log_path: PathBuf,
    pub backup: Option<BackupRecord>,
    pub merge: MergeReport,
    pub retained_previous: Option<PathBuf>,
    pub saved_profile: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub command: String,
    pub step: String,
    pub log_path: PathBuf,
    pub staging: Option<PathBuf>,
    pub backup: Option<BackupRecord>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed at step '{}'", self.command, self.step)
    }
}

pub fn install(ctx: &RunContext<'_>, options: &InstallOptions) -> Result<RunSummary> {
    options.validate()?;
    ensure_not_root(ctx.effective_uid, options.enable_user_root)?;

    let root = options.root.as_path();
    let mut run = Run::start(ctx, "install")?;
    let result = run.install(options);
    run.conclude(root, result)
}

pub fn upgrade(ctx: &RunContext<'_>, options: &UpgradeOptions) -> Result<RunSummary> {
    options.validate()?;
    ensure_not_root(ctx.effective_uid, options.enable_user_root)?;

    let mut options = options.clone();
    if let Some(id) = options.profile {
        let profile = ctx
            .profiles
            .load_profile(id)
            .with_context(|| format!("failed to load profile {id}"))?;
        options.apply_profile(&profile)?;
        info!(profile = id, "applied saved profile");
    }
    if !options.root.is_dir() {
        return Err(InstallerError::configuration(format!(
            "no installation found at {}; use install for a fresh tree",
            options.root.display()
        ))
        .into());
    }

    let mut run = Run::start(ctx, "upgrade")?;
    let result = run.upgrade(&options);
    let mut summary = run.conclude(&options.root, result)?;

    if options.save_profile {
        let id = ctx.profiles.save_profile(&options.to_profile())?;
        info!(profile = id, "saved upgrade options as profile");
        summary.saved_profile = Some(id);
    }
    Ok(summary)
}

pub fn run_backup(ctx: &RunContext<'_>, options: &BackupOptions) -> Result<RunSummary> {
    options.validate()?;

    let mut run = Run::start(ctx, "backup")?;
    let result = run.backup_step(&options.root).map(|_| RunOutput::default());
    run.conclude(&options.root, result)
}

pub fn run_restore(ctx: &RunContext<'_>, options: &RestoreOptions) -> Result<RunSummary> {
    options.validate()?;
    ensure_not_root(ctx.effective_uid, options.enable_user_root)?;

    let mut run = Run::start(ctx, "restore-db")?;
    let result = run
        .step(Step::RestoreDatabase, |run| {
            restore_database(
                &options.dump,
                &options.root,
                &run.ctx.settings.tools,
                run.ctx.runner,
            )
        })
        .map(|_| RunOutput::default());
    run.conclude(&options.root, result)
}

#[derive(Debug, Default)]
struct RunOutput {
    merge: MergeReport,
    retained_previous: Option<PathBuf>,
}

struct Run<'c, 'a> {
    ctx: &'c RunContext<'a>,
    command: &'static str,
    log: OperationLog,
    current: Option<Step>,
    staging: Option<StagingTree>,
    backup: Option<BackupRecord>,
}

impl<'c, 'a> Run<'c, 'a> {
    fn start(ctx: &'c RunContext<'a>, command: &'static str) -> Result<Self> {
        ctx.layout.ensure_base_dirs()?;
        let log_path = ctx.layout.next_log_path(command, &run_timestamp());
        let log = OperationLog::create(&log_path, command)?;
        info!(command, log = %log_path.display(), "run started");
        Ok(Self {
            ctx,
            command,
            log,
            current: None,
            staging: None,
            backup: None,
        })
    }

    fn step<T>(&mut self, step: Step, work: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.current = Some(step);
        self.log.begin(step.as_str())?;

        if is_cancelled(self.ctx.cancel) {
            let err = anyhow::Error::from(InstallerError::Cancelled {
                step: step.as_str().to_string(),
            });
            self.record_failure(&err);
            return Err(err);
        }

        info!(step = step.as_str(), "step started");
        match work(self) {
            Ok(value) => {
                self.log.succeed()?;
                Ok(value)
            }
            Err(err) => {
                let typed = classify(&err);
                let manual = typed.is_some_and(InstallerError::requires_manual_recovery);
                let already_cancelled = matches!(typed, Some(InstallerError::Cancelled { .. }));
                let err = if is_cancelled(self.ctx.cancel) && !manual && !already_cancelled {
                    err.context(InstallerError::Cancelled {
                        step: step.as_str().to_string(),
                    })
                } else {
                    err
                };
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    fn skip(&mut self, step: Step, reason: &str) -> Result<()> {
        info!(step = step.as_str(), reason, "step skipped");
        self.log.skip(step.as_str())
    }

    fn record_failure(&mut self, err: &anyhow::Error) {
        if let Err(log_err) = self.log.fail(&format!("{err:#}")) {
            warn!(error = %format!("{log_err:#}"), "failed to record step failure");
        }
    }

    fn install(&mut self, options: &InstallOptions) -> Result<RunOutput> {
        let root = options.root.as_path();
        let resolved = self.resolve_step(&options.package)?;

        if is_missing_or_empty_dir(root)? {
            self.skip(Step::Backup, "installation root is missing or empty")?;
        } else {
            self.backup_step(root)?;
        }

        let package_root = self.extract_step(root, &resolved)?;
        drop(resolved);

        self.skip(Step::Preserve, "fresh install keeps nothing")?;
        match &options.database_config {
            Some(source) => self.step(Step::ConfigureDatabase, |_| {
                let destination = package_root.join(DATABASE_CONFIG_RELATIVE_PATH);
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                fs::copy(source, &destination).with_context(|| {
                    format!(
                        "failed to copy database configuration {} to {}",
                        source.display(),
                        destination.display()
                    )
                })?;
                Ok(())
            })?,
            None => self.skip(Step::ConfigureDatabase, "no --database-config given")?,
        }

        let bundle_options = self.bundle_options(options.bundle_options.as_deref());
        self.dependency_install_step(&package_root, &bundle_options)?;
        let needs_secret = !package_root.join(SECRET_TOKEN_RELATIVE_PATH).exists();
        self.migrate_step(&package_root, needs_secret)?;

        let promotion = self.step(Step::Promote, |_| promote(&package_root, root, &[]))?;

        match &options.database_dump {
            Some(dump) => self.step(Step::RestoreDatabase, |run| {
                restore_database(dump, root, &run.ctx.settings.tools, run.ctx.runner)?;
                for task in ["db:migrate", "redmine:plugins:migrate"] {
                    run.rake(root, task, Step::RestoreDatabase).map_err(|err| {
                        anyhow::Error::from(InstallerError::Restore {
                            dump: dump.clone(),
                            detail: format!("{err:#}"),
                        })
                    })?;
                }
                Ok(())
            })?,
            None => self.skip(Step::RestoreDatabase, "no --database-dump given")?,
        }

        Ok(RunOutput {
            merge: MergeReport::default(),
            retained_previous: promotion.retained_previous,
        })
    }

    fn upgrade(&mut self, options: &UpgradeOptions) -> Result<RunOutput> {
        let root = options.root.as_path();
        let mut keep = options.effective_keep()?;

        let resolved = self.resolve_step(&options.package)?;
        self.backup_step(root)?;
        let package_root = self.extract_step(root, &resolved)?;
        drop(resolved);

        let report = self.step(Step::Preserve, |_| {
            for plugin in plugins_missing_from(root, &package_root)? {
                if keep.insert(&plugin)? {
                    info!(plugin = %plugin, "carrying over plugin missing from the new package");
                }
            }
            merge(&package_root, root, &keep, options.mode)
        })?;

        let bundle_options = self.bundle_options(options.bundle_options.as_deref());
        self.dependency_install_step(&package_root, &bundle_options)?;
        self.migrate_step(&package_root, false)?;

        let symlinked = match options.mode {
            PreserveMode::Symlink => report.preserved.clone(),
            PreserveMode::Copy => Vec::new(),
        };
        let promotion = self.step(Step::Promote, |_| promote(&package_root, root, &symlinked))?;

        Ok(RunOutput {
            merge: report,
            retained_previous: promotion.retained_previous,
        })
    }

    fn resolve_step(&mut self, package: &str) -> Result<ResolvedPackage> {
        self.step(Step::Resolve, |run| {
            let on_download = run.ctx.on_download;
            let resolved = resolve_package(
                package,
                run.ctx.settings,
                run.ctx.cancel,
                &mut |received, total| on_download(received, total),
            )?;
            info!(
                package = %resolved.path.display(),
                archive = resolved.archive_type.as_str(),
                downloaded = resolved.is_download(),
                "package resolved"
            );
            Ok(resolved)
        })
    }

    fn backup_step(&mut self, root: &Path) -> Result<BackupRecord> {
        self.step(Step::Backup, |run| {
            let ctx = run.ctx;
            let backups_dir = ctx.layout.backups_dir();
            match backup(root, &backups_dir, &ctx.settings.tools, ctx.runner, ctx.cancel) {
                Ok(record) => {
                    info!(backup = %record.directory.display(), "backup written");
                    run.backup = Some(record.clone());
                    Ok(record)
                }
                Err(err) => {
                    if let Some(InstallerError::PartialBackup { record, .. }) = classify(&err) {
                        run.backup = Some(record.as_ref().clone());
                    }
                    Err(err)
                }
            }
        })
    }

    fn extract_step(&mut self, root: &Path, resolved: &ResolvedPackage) -> Result<PathBuf> {
        self.step(Step::Extract, |run| {
            let staging = StagingTree::create_beside(root)?;
            let unpack_dir = staging.unpack_dir();
            run.staging = Some(staging);
            extract_package(
                &resolved.path,
                resolved.archive_type,
                &unpack_dir,
                &run.ctx.settings.tools,
                run.ctx.runner,
            )
        })
    }

    fn dependency_install_step(&mut self, package_root: &Path, bundle_options: &str) -> Result<()> {
        self.step(Step::DependencyInstall, |run| {
            let mut command = build_bundle_install_command(
                &run.ctx.settings.tools.bundle,
                package_root,
                bundle_options,
            );
            run.ctx
                .runner
                .run(&mut command, "bundle install failed")
                .map(|_| ())
                .map_err(|err| fatal(Step::DependencyInstall, err))
        })
    }

    fn migrate_step(&mut self, package_root: &Path, generate_secret: bool) -> Result<()> {
        self.step(Step::Migrate, |run| {
            if generate_secret {
                run.rake(package_root, "generate_secret_token", Step::Migrate)?;
            }
            for task in ["db:migrate", "redmine:plugins:migrate", "tmp:cache:clear"] {
                run.rake(package_root, task, Step::Migrate)?;
            }
            Ok(())
        })
    }

    fn rake(&self, dir: &Path, task: &str, step: Step) -> Result<()> {
        let mut command = build_rake_command(&self.ctx.settings.tools.bundle, dir, task);
        self.ctx
            .runner
            .run(&mut command, &format!("rake {task} failed"))
            .map(|_| ())
            .map_err(|err| fatal(step, err))
    }

    fn bundle_options(&self, explicit: Option<&str>) -> String {
        explicit
            .unwrap_or(&self.ctx.settings.default_bundle_options)
            .to_string()
    }

    fn conclude(mut self, root: &Path, result: Result<RunOutput>) -> Result<RunSummary> {
        let output = result.and_then(|output| {
            self.step(Step::Done, |_| Ok(()))?;
            Ok(output)
        });

        match output {
            Ok(output) => {
                info!(command = self.command, root = %root.display(), "run complete");
                Ok(RunSummary {
                    root: root.to_path_buf(),
                    log_path: self.log.path().to_path_buf(),
                    backup: self.backup.take(),
                    merge: output.merge,
                    retained_previous: output.retained_previous,
                    saved_profile: None,
                })
            }
            Err(err) => {
                let fatal_step =
                    matches!(classify(&err), Some(InstallerError::FatalUpgrade { .. }));
                if let Some(staging) = self.staging.as_mut() {
                    if self.ctx.run.keep_staging || fatal_step {
                        staging.retain();
                    }
                }
                let staging = self
                    .staging
                    .as_ref()
                    .filter(|staging| staging.is_retained())
                    .map(|staging| staging.path().to_path_buf());
                let failure = RunFailure {
                    command: self.command.to_string(),
                    step: self
                        .current
                        .map(Step::as_str)
                        .unwrap_or("start")
                        .to_string(),
                    log_path: self.log.path().to_path_buf(),
                    staging,
                    backup: self.backup.take(),
                };
                Err(err.context(failure))
            }
        }
    }
}

impl Drop for Run<'_, '_> {
    fn drop(&mut self) {
        if self.log.has_open_step() {
            warn!(log = %self.log.path().display(), "run ended with a step still open");
        }
    }
}

fn fatal(step: Step, err: anyhow::Error) -> anyhow::Error {
    InstallerError::FatalUpgrade {
        step: step.as_str().to_string(),
        detail: format!("{err:#}"),
    }
    .into()
}

pub fn build_bundle_install_command(bundle: &str, package_root: &Path, options: &str) -> Command {
    let mut command = Command::new(bundle);
    command
        .arg("install")
        .args(split_options(options))
        .current_dir(package_root)
        .env("RAILS_ENV", PRODUCTION_ENVIRONMENT);
    command
}

pub fn build_rake_command(bundle: &str, dir: &Path, task: &str) -> Command {
    let mut command = Command::new(bundle);
    command
        .arg("exec")
        .arg("rake")
        .arg(task)
        .current_dir(dir)
        .env("RAILS_ENV", PRODUCTION_ENVIRONMENT);
    command
}
