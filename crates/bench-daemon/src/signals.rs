//! Stop requests from Unix signals.
//!
//! SIGINT and SIGTERM set an atomic flag that the session checks between
//! passes. A pass in flight is never interrupted by the first signal; a
//! second signal exits the process immediately.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exit status used when a second signal forces termination.
const FORCED_EXIT_CODE: i32 = 130;

/// Signals that request a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl SignalKind {
    #[cfg(unix)]
    fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            libc::SIGINT => Some(Self::Interrupt),
            libc::SIGTERM => Some(Self::Terminate),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Stop flag shared between the watcher thread and the session loop.
#[derive(Debug, Default)]
pub struct StopState {
    stop_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl StopState {
    /// Whether a stop has been requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    /// Request a stop from any thread.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    /// Record a received signal and return how many have arrived so far.
    fn record_signal(&self) -> u32 {
        self.signal_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of stop signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Signal number written by the handler, 0 when none is pending.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Installs the handlers and owns the stop state.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<StopState>,
}

impl SignalHandler {
    /// Register SIGINT and SIGTERM handlers.
    ///
    /// On non-Unix platforms no handler is installed and a stop never arrives.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(StopState::default()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        extern "C" fn on_signal(signal: c_int) {
            // Only an atomic store is async-signal-safe here
            PENDING_SIGNAL.store(signal, Ordering::Relaxed);
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("signal-watch".into())
            .spawn(move || loop {
                let raw = PENDING_SIGNAL.swap(0, Ordering::Relaxed);
                if let Some(kind) = SignalKind::from_raw(raw) {
                    let count = state.record_signal();
                    if count > 1 {
                        warn!(signal = %kind, "Second stop signal, exiting immediately");
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                    info!(signal = %kind, "Stop requested, finishing current pass");
                    state.request_stop();
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            })?;

        let handler = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
        // SAFETY: the handler only performs an atomic store
        let failed = unsafe {
            libc::signal(libc::SIGINT, handler) == libc::SIG_ERR
                || libc::signal(libc::SIGTERM, handler) == libc::SIG_ERR
        };
        if failed {
            return Err(std::io::Error::last_os_error());
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Whether a stop has been requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested()
    }

    /// Request a stop without a signal.
    #[cfg(test)]
    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    /// Shared stop state.
    pub fn state(&self) -> &StopState {
        &self.state
    }
}
