//! Cooperative shutdown signaling
//!
//! SIGTERM and SIGINT are converted into a flag raise and nothing else;
//! the relay loop observes the flag at the top of every iteration and
//! performs the shutdown itself on the main thread. The handler never
//! touches session resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

/// Flag the installed handler stores into; first installation wins
static INSTALLED_FLAG: OnceLock<ShutdownFlag> = OnceLock::new();

/// Clonable cancellation flag observed by the relay loop
///
/// Clones share one underlying atomic, so the copy handed to
/// `install` and the copy polled by the loop always agree.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// A fresh, unraised flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; idempotent and async-signal-safe
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

extern "C" fn handle_termination(_signo: libc::c_int) {
    // Only an atomic store may happen here
    if let Some(flag) = INSTALLED_FLAG.get() {
        flag.request();
    }
}

/// Route SIGTERM and SIGINT to `flag`
///
/// Installed without SA_RESTART, so an arriving signal interrupts the
/// relay's poll with EINTR and the loop re-checks the flag right away.
/// The process keeps a single flag registration for its lifetime; a
/// second `install` keeps routing signals to the first flag.
pub fn install(flag: &ShutdownFlag) -> Result<()> {
    let _ = INSTALLED_FLAG.set(flag.clone());

    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );

    // SAFETY: the handler performs only an atomic store
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action).map_err(Error::SignalInstall)?;
        signal::sigaction(Signal::SIGINT, &action).map_err(Error::SignalInstall)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_sets_flag() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_requested());
        flag.request();
        assert!(flag.is_requested());
        // Requesting again is a no-op
        flag.request();
        assert!(flag.is_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = ShutdownFlag::new();
        let observer = flag.clone();
        flag.request();
        assert!(observer.is_requested());
    }

    #[test]
    fn test_sigterm_raises_installed_flag() {
        let flag = ShutdownFlag::new();
        install(&flag).expect("Failed to install handlers");
        assert!(!flag.is_requested());

        // raise() delivers to the calling thread before returning
        signal::raise(Signal::SIGTERM).expect("Failed to raise SIGTERM");

        assert!(flag.is_requested());
    }
}
