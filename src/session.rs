//! Session lifecycle and idempotent shutdown
//!
//! A [`Session`] owns everything one relay invocation acquires: the
//! saved terminal attributes, the PTY master, and the child process.
//! Shutdown may be triggered from several places (signal flag, stdin
//! EOF, child exit, master closed); an atomic gate makes sure the
//! release logic runs exactly once no matter how many triggers fire.

use std::fmt;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::command::CommandSpec;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::pty::Pty;
use crate::term::TerminalState;

/// How often the graceful wait re-checks the child
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Bounded reap window after SIGKILL
const KILL_REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of one relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Resources are being acquired
    Starting = 0,
    /// Child running, bytes being forwarded
    Relaying = 1,
    /// A trigger fired; teardown in progress
    ShuttingDown = 2,
    /// Teardown finished; nothing leaves this state
    Terminated = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Relaying,
            2 => SessionState::ShuttingDown,
            _ => SessionState::Terminated,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::Relaying => write!(f, "relaying"),
            SessionState::ShuttingDown => write!(f, "shutting down"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Which trigger ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT arrived
    Signal,
    /// The controlling input reached end-of-stream
    InputClosed,
    /// The child exited on its own
    ChildExited,
    /// The master reported the child side gone
    MasterClosed,
    /// An unrecoverable stream error was absorbed
    StreamError,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => write!(f, "signal"),
            ShutdownReason::InputClosed => write!(f, "input closed"),
            ShutdownReason::ChildExited => write!(f, "child exited"),
            ShutdownReason::MasterClosed => write!(f, "master closed"),
            ShutdownReason::StreamError => write!(f, "stream error"),
        }
    }
}

/// One relay invocation's resources and lifecycle
pub struct Session {
    config: RelayConfig,
    child_pid: Pid,
    state: AtomicU8,
    shutdown_started: AtomicBool,
    master: Mutex<Option<OwnedFd>>,
    child: Mutex<Child>,
    term: Mutex<Option<TerminalState>>,
    reason: Mutex<Option<ShutdownReason>>,
    exit_status: Mutex<Option<ExitStatus>>,
}

/// Shutdown must make progress even if another thread panicked while
/// holding a lock, so poisoning is ignored throughout
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Acquire everything a session needs and spawn the child
    ///
    /// Captures the terminal attributes of stdin first (failure means
    /// "nothing to restore", not an error), then allocates the PTY
    /// pair and spawns `spec` attached to its slave side. On any
    /// fatal error the handles acquired so far are released before
    /// the error propagates.
    pub fn start(spec: &CommandSpec, config: RelayConfig) -> Result<Self> {
        let term = match io::stdin().as_fd().try_clone_to_owned() {
            Ok(fd) => match TerminalState::capture(fd) {
                Ok(state) => Some(state),
                Err(e) => {
                    debug!(error = %e, "No terminal attributes to restore");
                    None
                },
            },
            Err(e) => {
                debug!(error = %e, "Could not duplicate stdin");
                None
            },
        };

        let session = Self::assemble(spec, config, term)?;
        session.set_state(SessionState::Relaying);
        Ok(session)
    }

    fn assemble(
        spec: &CommandSpec,
        config: RelayConfig,
        term: Option<TerminalState>,
    ) -> Result<Self> {
        let pty = Pty::spawn(spec)?;
        let (master, child) = pty.into_parts();
        let child_pid = Pid::from_raw(child.id() as i32);

        info!(pid = child.id(), command = %spec, "Child spawned");

        Ok(Self {
            config,
            child_pid,
            state: AtomicU8::new(SessionState::Starting as u8),
            shutdown_started: AtomicBool::new(false),
            master: Mutex::new(Some(master)),
            child: Mutex::new(child),
            term: Mutex::new(term),
            reason: Mutex::new(None),
            exit_status: Mutex::new(None),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The spawned child's process id
    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    /// The trigger that won the race to end the session, once any has
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        *lock(&self.reason)
    }

    /// The child's exit status, once reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *lock(&self.exit_status)
    }

    /// The configuration this session runs under
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Lock the master fd; `None` after shutdown closed it
    pub(crate) fn master(&self) -> MutexGuard<'_, Option<OwnedFd>> {
        lock(&self.master)
    }

    /// Non-blocking child liveness check
    ///
    /// Returns the exit status once the child is gone, recording it on
    /// first reap. Wait errors are absorbed: a child reaped behind our
    /// back counts as exited with status 0.
    pub fn poll_child_exit(&self) -> Option<ExitStatus> {
        if let Some(status) = *lock(&self.exit_status) {
            return Some(status);
        }

        let mut child = lock(&self.child);
        match child.try_wait() {
            Ok(Some(status)) => {
                drop(child);
                self.record_exit(status);
                Some(status)
            },
            Ok(None) => None,
            Err(e) => {
                drop(child);
                debug!(error = %e, "Child wait failed; treating as exited");
                let status = ExitStatus::from_raw(0);
                self.record_exit(status);
                Some(status)
            },
        }
    }

    fn record_exit(&self, status: ExitStatus) {
        let mut slot = lock(&self.exit_status);
        if slot.is_none() {
            *slot = Some(status);
            info!(status = %status, "Child exited");
        }
    }

    /// Tear the session down; only the first call does the work
    ///
    /// Steps run in order, each independently best-effort: close the
    /// master, terminate the child (SIGTERM, bounded grace period,
    /// then SIGKILL), restore terminal attributes. Every later call,
    /// from any thread, returns immediately.
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%reason, "Shutdown already ran; ignoring");
            return;
        }

        self.set_state(SessionState::ShuttingDown);
        *lock(&self.reason) = Some(reason);
        info!(%reason, "Shutting down session");

        self.close_master();
        self.terminate_child();
        self.restore_terminal();

        self.set_state(SessionState::Terminated);
    }

    fn set_state(&self, next: SessionState) {
        let prev = SessionState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if prev != next {
            debug!(from = %prev, to = %next, "Session state change");
        }
    }

    fn close_master(&self) {
        if let Some(fd) = lock(&self.master).take() {
            drop(fd);
            debug!("Closed PTY master");
        }
    }

    fn terminate_child(&self) {
        if lock(&self.exit_status).is_some() {
            // Already reaped by the relay loop
            return;
        }

        if let Err(e) = signal::kill(self.child_pid, Signal::SIGTERM) {
            // ESRCH just means the child beat us to the exit
            debug!(error = %e, "SIGTERM failed");
        }

        if self.wait_child(self.config.grace_period) {
            return;
        }

        warn!(pid = %self.child_pid, "Child survived SIGTERM; sending SIGKILL");
        if let Err(e) = lock(&self.child).kill() {
            debug!(error = %e, "SIGKILL failed");
        }
        if !self.wait_child(KILL_REAP_TIMEOUT) {
            warn!(pid = %self.child_pid, "Child not reaped after SIGKILL");
        }
    }

    /// Poll for child exit until the deadline; true once it is gone
    fn wait_child(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            match lock(&self.child).try_wait() {
                Ok(Some(status)) => {
                    self.record_exit(status);
                    return true;
                },
                Ok(None) => {},
                Err(e) => {
                    debug!(error = %e, "Child wait failed; treating as exited");
                    self.record_exit(ExitStatus::from_raw(0));
                    return true;
                },
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    fn restore_terminal(&self) {
        if let Some(term) = lock(&self.term).take() {
            match term.restore() {
                Ok(()) => debug!("Terminal attributes restored"),
                Err(e) => warn!(error = %e, "Could not restore terminal attributes"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return;
        }
        // Abnormal exit path (panic or early return): skip the grace
        // period but leave no child and no mangled terminal behind
        warn!(pid = %self.child_pid, "Session dropped without shutdown");
        if lock(&self.exit_status).is_none() {
            let mut child = lock(&self.child);
            let _ = child.kill();
            let _ = child.wait();
        }
        self.restore_terminal();
    }
}
