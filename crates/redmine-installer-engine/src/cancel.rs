use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

const EXIT_ON_SECOND_SIGNAL: i32 = 130;

fn shared_flag() -> &'static Arc<AtomicBool> {
    static CANCELLED: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    CANCELLED.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

pub fn install_signal_handlers() -> Result<()> {
    let cancelled = shared_flag();
    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, EXIT_ON_SECOND_SIGNAL, Arc::clone(cancelled))
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
        flag::register(signal, Arc::clone(cancelled))
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

pub fn global_flag() -> &'static AtomicBool {
    shared_flag()
}

pub fn is_cancelled(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}
