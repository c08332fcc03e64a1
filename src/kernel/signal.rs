use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Shutdown signalling for the HTTP serve loop.
///
/// The handler only flips atomics; the accept loop polls [`should_continue`]
/// between connections and drains in-flight requests before returning.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Install SIGINT and SIGTERM handlers. Call before spawning request threads.
    pub fn install() -> Result<Self, String> {
        let action = SigAction::new(
            SigHandler::Handler(Self::on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        // SAFETY: `on_signal` only performs atomic stores, which are
        // async-signal-safe.
        unsafe {
            signal::sigaction(Signal::SIGINT, &action)
                .map_err(|e| format!("Failed to install SIGINT handler: {}", e))?;
            signal::sigaction(Signal::SIGTERM, &action)
                .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;
        }

        info!("Shutdown handlers installed (SIGINT, SIGTERM)");
        Ok(Self)
    }

    extern "C" fn on_signal(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        !should_continue()
    }

    /// Signal number that triggered shutdown, 0 if none
    pub fn received(&self) -> u32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }
}

/// False once a shutdown signal arrived or [`request_shutdown`] was called
pub fn should_continue() -> bool {
    !SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Ask the serve loop to stop, as if a signal had arrived
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(test)]
pub(crate) fn reset() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
}
