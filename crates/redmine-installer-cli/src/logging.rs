use redmine_installer_core::RunConfig;
use tracing_subscriber::filter::EnvFilter;

pub(crate) const LOG_ENV: &str = "REDMINE_INSTALLER_LOG";

pub(crate) fn default_directive(config: RunConfig) -> &'static str {
    if config.debug {
        "debug"
    } else if config.silent {
        "warn"
    } else {
        "info"
    }
}

pub(crate) fn init_tracing(config: RunConfig) {
    let fallback = default_directive(config);
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); using {fallback}");
            EnvFilter::new(fallback)
        }),
        Err(_) => EnvFilter::new(fallback),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.debug)
        .with_writer(std::io::stdout)
        .try_init();
}
