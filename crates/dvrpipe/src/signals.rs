//! OS signal wiring.
//!
//! Handlers do nothing but store into atomics; every consequence (teardown,
//! reconnect, process exit) runs on the supervisor and worker threads. The
//! supervisor polls [`pending_control`] for reset requests; termination goes
//! straight to the shared shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dvrpipe_core::ControlSignal;

use crate::exit::{CliError, CliResult, INTERNAL};

static HARD_RESET: AtomicBool = AtomicBool::new(false);
static SOFT_RESET: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigusr1(_: libc::c_int) {
    HARD_RESET.store(true, Ordering::SeqCst);
}

extern "C" fn on_sigusr2(_: libc::c_int) {
    SOFT_RESET.store(true, Ordering::SeqCst);
}

/// Install all handlers: SIGINT/SIGTERM request shutdown, SIGUSR1 a hard
/// reset (full output teardown), SIGUSR2 a soft reset (reconnect only).
pub fn install(shutdown: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    for (signum, handler) in [
        (libc::SIGUSR1, on_sigusr1 as extern "C" fn(libc::c_int)),
        (libc::SIGUSR2, on_sigusr2 as extern "C" fn(libc::c_int)),
    ] {
        let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(CliError::new(
                INTERNAL,
                format!("signal handler setup failed for signal {signum}"),
            ));
        }
    }
    Ok(())
}

/// Take one pending reset request, if any. Hard resets are reported first
/// when both arrived since the last poll.
pub fn pending_control() -> Option<ControlSignal> {
    if HARD_RESET.swap(false, Ordering::SeqCst) {
        return Some(ControlSignal::HardReset);
    }
    if SOFT_RESET.swap(false, Ordering::SeqCst) {
        return Some(ControlSignal::SoftReset);
    }
    None
}
