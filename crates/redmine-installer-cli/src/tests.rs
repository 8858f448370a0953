use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::error::ErrorKind;
use redmine_installer_core::{BackupRecord, InstallerError, PreserveMode, RunConfig};
use redmine_installer_engine::{LogVerdict, MergeReport, RunFailure, RunSummary};

use super::*;
use crate::dispatch::{
    exit_code_for, failure_lines, install_options, resolve_layout, summary_lines,
    upgrade_options, verdict_status, Operation, EXIT_CANCELLED, EXIT_MANUAL_RECOVERY,
};
use crate::logging::default_directive;
use crate::render::{render_status_line, resolve_output_style, OutputStyle};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "redmine-installer-cli-{label}-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn sample_record() -> BackupRecord {
    BackupRecord {
        timestamp: "20240102_030405".to_string(),
        root: PathBuf::from("/srv/redmine"),
        directory: PathBuf::from("/backups/20240102_030405"),
        files_archive: PathBuf::from("/backups/20240102_030405/files.tar.gz"),
        files_archive_sha256: "00".repeat(32),
        database_dump: Some(PathBuf::from("/backups/20240102_030405/database.sql")),
    }
}

fn sample_failure(staging: Option<&str>, backup: Option<BackupRecord>) -> RunFailure {
    RunFailure {
        command: "upgrade".to_string(),
        step: "migrate".to_string(),
        log_path: PathBuf::from("/home/ops/.redmine-installer/logs/upgrade.log"),
        staging: staging.map(PathBuf::from),
        backup,
    }
}

fn upgrade_args(cli: Cli) -> UpgradeArgs {
    match cli.command {
        Commands::Upgrade(args) => args,
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn install_parses_package_root_and_options() {
    let cli = Cli::try_parse_from([
        "redmine",
        "install",
        "v5.1.2",
        "/srv/redmine",
        "--bundle-options",
        "--without development test",
        "--database-dump",
        "/tmp/dump.sql",
        "--database-config",
        "/tmp/database.yml",
        "--enable-user-root",
    ])
    .expect("command must parse");

    match cli.command {
        Commands::Install(args) => {
            assert_eq!(args.package.as_deref(), Some("v5.1.2"));
            assert_eq!(args.root, Some(PathBuf::from("/srv/redmine")));
            assert_eq!(
                args.bundle_options.as_deref(),
                Some("--without development test")
            );
            assert!(args.enable_user_root);

            let options = install_options(args).expect("must build install options");
            assert_eq!(options.database_dump, Some(PathBuf::from("/tmp/dump.sql")));
            assert_eq!(
                options.database_config,
                Some(PathBuf::from("/tmp/database.yml"))
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn short_aliases_select_commands() {
    let install = Cli::try_parse_from(["redmine", "i", "pkg.zip", "/srv/redmine"])
        .expect("alias i must parse");
    assert!(matches!(install.command, Commands::Install(_)));

    let upgrade = Cli::try_parse_from(["redmine", "u", "pkg.zip", "/srv/redmine"])
        .expect("alias u must parse");
    assert!(matches!(upgrade.command, Commands::Upgrade(_)));

    let backup =
        Cli::try_parse_from(["redmine", "b", "/srv/redmine"]).expect("alias b must parse");
    match backup.command {
        Commands::Backup { root } => assert_eq!(root, Some(PathBuf::from("/srv/redmine"))),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn keep_accumulates_repeated_and_comma_separated_values() {
    let cli = Cli::try_parse_from([
        "redmine",
        "upgrade",
        "pkg.tar.gz",
        "/srv/redmine",
        "--keep",
        "git_repositories,public/themes",
        "--keep",
        "vendor/cache",
    ])
    .expect("command must parse");

    let args = upgrade_args(cli);
    assert_eq!(
        args.keep,
        vec!["git_repositories", "public/themes", "vendor/cache"]
    );

    let options = upgrade_options(args).expect("must build upgrade options");
    assert_eq!(
        options.keep.to_strings(),
        vec!["git_repositories", "public/themes", "vendor/cache"]
    );
    assert_eq!(options.mode, PreserveMode::Copy);
}

#[test]
fn absolute_keep_entry_is_a_configuration_error() {
    let cli = Cli::try_parse_from([
        "redmine",
        "upgrade",
        "pkg.tar.gz",
        "/srv/redmine",
        "--keep",
        "/etc/passwd",
    ])
    .expect("command must parse");

    let err = upgrade_options(upgrade_args(cli)).expect_err("absolute keep must fail");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Configuration(_))
    ));
}

#[test]
fn upgrade_parses_profile_symlink_mode_and_save_profile() {
    let cli = Cli::try_parse_from([
        "redmine",
        "upgrade",
        "-p",
        "4",
        "--copy-files-with-symlink",
    ])
    .expect("command must parse");

    let args = upgrade_args(cli);
    assert_eq!(args.profile, Some(4));
    assert!(args.package.is_none());

    let options = upgrade_options(args).expect("must build upgrade options");
    assert_eq!(options.mode, PreserveMode::Symlink);
    assert!(options.package.is_empty());
    assert!(options.root.is_absolute());

    let saving = Cli::try_parse_from(["redmine", "upgrade", "pkg.zip", "--save-profile"])
        .expect("command must parse");
    assert!(upgrade_args(saving).save_profile);
}

#[test]
fn restore_db_takes_dump_then_root() {
    let cli = Cli::try_parse_from([
        "redmine",
        "restore-db",
        "/backups/redmine.sql",
        "/srv/redmine",
        "--enable-user-root",
    ])
    .expect("command must parse");

    match cli.command {
        Commands::RestoreDb {
            dump,
            root,
            enable_user_root,
        } => {
            assert_eq!(dump, PathBuf::from("/backups/redmine.sql"));
            assert_eq!(root, Some(PathBuf::from("/srv/redmine")));
            assert!(enable_user_root);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn global_flags_are_accepted_after_the_subcommand() {
    let cli = Cli::try_parse_from([
        "redmine",
        "upgrade",
        "pkg.zip",
        "/srv/redmine",
        "--keep-staging",
        "-d",
        "--home",
        "/opt/installer",
        "-e",
    ])
    .expect("command must parse");

    assert!(cli.keep_staging);
    assert!(cli.debug);
    assert!(cli.env);
    assert_eq!(cli.home, Some(PathBuf::from("/opt/installer")));
    assert_eq!(
        dispatch::run_config(&cli),
        RunConfig {
            debug: true,
            silent: false,
            keep_staging: true,
        }
    );
}

#[test]
fn debug_and_silent_conflict() {
    let err = Cli::try_parse_from(["redmine", "-d", "-s", "verify-log", "run.log"])
        .expect_err("debug with silent must fail");
    assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
}

#[test]
fn env_flag_is_hidden_from_help() {
    let err = Cli::try_parse_from(["redmine", "--help"]).expect_err("help exits early");
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    let help = err.to_string();
    assert!(help.contains("--keep-staging"));
    assert!(!help.contains("--env"));
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "upgraded redmine in /srv/redmine"),
        "upgraded redmine in /srv/redmine"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "upgraded redmine in /srv/redmine"),
        "[OK] upgraded redmine in /srv/redmine"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "backup available"),
        "[WARN] backup available"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "err", "promotion failed"),
        "[ERR] promotion failed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "upgrade log: run.log"),
        "[..] upgrade log: run.log"
    );
}

#[test]
fn resolve_output_style_is_rich_only_on_a_colour_terminal() {
    assert_eq!(resolve_output_style(true, false, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, false, false), OutputStyle::Plain);
    assert_eq!(resolve_output_style(true, true, false), OutputStyle::Plain);
    assert_eq!(resolve_output_style(true, false, true), OutputStyle::Plain);
}

#[test]
fn default_directive_follows_debug_and_silent() {
    let base = RunConfig::default();
    assert_eq!(default_directive(base), "info");
    assert_eq!(
        default_directive(RunConfig {
            debug: true,
            ..base
        }),
        "debug"
    );
    assert_eq!(
        default_directive(RunConfig {
            silent: true,
            ..base
        }),
        "warn"
    );
}

#[test]
fn exit_code_distinguishes_manual_recovery_and_cancellation() {
    let promotion = anyhow::Error::new(InstallerError::Promotion {
        root: PathBuf::from("/srv/redmine"),
        detail: "rename refused".to_string(),
    })
    .context(sample_failure(None, Some(sample_record())));
    assert_eq!(exit_code_for(&promotion), EXIT_MANUAL_RECOVERY);

    let cancelled = anyhow::Error::new(InstallerError::Cancelled {
        step: "migrate".to_string(),
    });
    assert_eq!(exit_code_for(&cancelled), EXIT_CANCELLED);

    let fatal = anyhow::Error::new(InstallerError::FatalUpgrade {
        step: "migrate".to_string(),
        detail: "rake exited 1".to_string(),
    });
    assert_eq!(exit_code_for(&fatal), 1);
}

#[test]
fn failure_lines_name_backup_staging_and_log() {
    let err = anyhow::Error::new(InstallerError::FatalUpgrade {
        step: "migrate".to_string(),
        detail: "rake exited 1".to_string(),
    })
    .context(sample_failure(
        Some("/srv/.redmine.staging-1-2"),
        Some(sample_record()),
    ));

    let lines = failure_lines(&err);
    assert_eq!(lines[0].0, "err");
    assert!(lines[0].1.starts_with("upgrade failed at step 'migrate'"));
    assert!(lines[0].1.contains("rake exited 1"));
    assert!(lines.contains(&(
        "warn",
        "backup available in /backups/20240102_030405".to_string()
    )));
    assert!(lines.contains(&(
        "warn",
        "staging tree kept for inspection: /srv/.redmine.staging-1-2".to_string()
    )));
    assert_eq!(
        lines.last(),
        Some(&(
            "step",
            "upgrade log: /home/ops/.redmine-installer/logs/upgrade.log".to_string()
        ))
    );
}

#[test]
fn promotion_failure_prints_recovery_guidance() {
    let err = anyhow::Error::new(InstallerError::Promotion {
        root: PathBuf::from("/srv/redmine"),
        detail: "rollback failed".to_string(),
    })
    .context(sample_failure(None, Some(sample_record())));

    let lines = failure_lines(&err);
    assert!(lines.contains(&(
        "err",
        "installation root may be inconsistent; recover it from the backup in /backups/20240102_030405"
            .to_string()
    )));
    assert!(!lines
        .iter()
        .any(|(_, message)| message.starts_with("backup available")));

    let without_backup = anyhow::Error::new(InstallerError::Promotion {
        root: PathBuf::from("/srv/redmine"),
        detail: "rollback failed".to_string(),
    });
    let lines = failure_lines(&without_backup);
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[1].1,
        "installation root may be inconsistent and no backup was taken"
    );
}

#[test]
fn partial_backup_failure_points_at_the_file_archive() {
    let record = sample_record();
    let err = anyhow::Error::new(InstallerError::PartialBackup {
        record: Box::new(BackupRecord {
            database_dump: None,
            ..record.clone()
        }),
        detail: "mysqldump exited 2".to_string(),
    });

    let lines = failure_lines(&err);
    assert_eq!(
        lines[1],
        (
            "warn",
            "files were archived to /backups/20240102_030405/files.tar.gz without a database dump"
                .to_string()
        )
    );
}

#[test]
fn summary_lines_report_preservation_and_profile() {
    let summary = RunSummary {
        root: PathBuf::from("/srv/redmine"),
        log_path: PathBuf::from("/logs/upgrade.log"),
        backup: Some(sample_record()),
        merge: MergeReport {
            preserved: vec![PathBuf::from("files"), PathBuf::from("plugins/agile")],
            skipped: vec![PathBuf::from("git_repositories")],
        },
        retained_previous: None,
        saved_profile: Some(2),
    };
    let cli = Cli::try_parse_from(["redmine", "upgrade", "pkg.zip", "/srv/redmine"])
        .expect("command must parse");
    let operation =
        Operation::Upgrade(upgrade_options(upgrade_args(cli)).expect("must build options"));

    let lines = summary_lines(&operation, &summary);
    assert_eq!(
        lines[0],
        ("ok", "upgraded redmine in /srv/redmine".to_string())
    );
    assert!(lines.contains(&("step", "preserved: files, plugins/agile".to_string())));
    assert!(lines.contains(&(
        "warn",
        "keep entry not found in installation: git_repositories".to_string()
    )));
    assert!(lines.contains(&("ok", "saved profile 2".to_string())));
    assert!(lines.contains(&(
        "step",
        "database dump: /backups/20240102_030405/database.sql".to_string()
    )));
    assert_eq!(
        lines.last(),
        Some(&("step", "upgrade log: /logs/upgrade.log".to_string()))
    );
}

#[test]
fn verdict_status_matches_severity() {
    assert_eq!(verdict_status(&LogVerdict::Complete), "ok");
    assert_eq!(
        verdict_status(&LogVerdict::Interrupted {
            step: "migrate".to_string()
        }),
        "warn"
    );
    assert_eq!(
        verdict_status(&LogVerdict::Corrupt {
            line: 3,
            reason: "digest mismatch".to_string()
        }),
        "err"
    );
}

#[test]
fn resolve_layout_reads_settings_from_home() {
    let home = test_dir("layout");
    fs::write(
        home.join("config.toml"),
        "backup_dir = \"snapshots\"\ndefault_bundle_options = \"--deployment\"\n",
    )
    .expect("must write settings");

    let (layout, settings) = resolve_layout(Some(&home)).expect("must resolve layout");
    assert_eq!(layout.settings_path(), home.join("config.toml"));
    assert_eq!(layout.backups_dir(), home.join("snapshots"));
    assert_eq!(settings.default_bundle_options, "--deployment");

    let _ = fs::remove_dir_all(&home);
}

#[test]
fn resolve_layout_keeps_absolute_backup_dir() {
    let home = test_dir("layout-absolute");
    let elsewhere = test_dir("layout-backups");
    fs::write(
        home.join("config.toml"),
        format!("backup_dir = \"{}\"\n", elsewhere.display()),
    )
    .expect("must write settings");

    let (layout, _) = resolve_layout(Some(&home)).expect("must resolve layout");
    assert_eq!(layout.backups_dir(), elsewhere);

    let _ = fs::remove_dir_all(&home);
    let _ = fs::remove_dir_all(&elsewhere);
}
