//! The forwarding loop
//!
//! Polls the PTY master and the controlling input with a bounded
//! timeout, forwards bytes in both directions, watches for child exit,
//! and observes the cooperative shutdown flag. Stream errors are
//! absorbed: logged as typed values, then either ignored or converted
//! into a shutdown trigger. The loop never exits except through
//! session shutdown.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{read, write};
use tracing::{debug, trace};

use crate::error::{Error, Result, StreamKind};
use crate::session::{Session, ShutdownReason};
use crate::signal::ShutdownFlag;

/// Backoff while the non-blocking master refuses writes
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Bidirectional byte relay between a session's master and a pair of
/// stream endpoints
pub struct Relay {
    session: Arc<Session>,
    shutdown: ShutdownFlag,
    input: OwnedFd,
    output: OwnedFd,
}

impl Relay {
    /// Relay between the session and this process's stdin/stdout
    pub fn stdio(session: Arc<Session>, shutdown: ShutdownFlag) -> Result<Self> {
        let input = io::stdin().as_fd().try_clone_to_owned()?;
        let output = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::new(session, shutdown, input, output))
    }

    /// Relay with explicit endpoints; tests inject pipes here
    pub fn new(
        session: Arc<Session>,
        shutdown: ShutdownFlag,
        input: OwnedFd,
        output: OwnedFd,
    ) -> Self {
        Self {
            session,
            shutdown,
            input,
            output,
        }
    }

    /// Run until a trigger fires, then shut the session down
    ///
    /// All four triggers (shutdown flag, master peer closed, input
    /// EOF, child exit) converge here; the winning one is returned
    /// after shutdown has run to completion.
    pub fn run(self) -> ShutdownReason {
        let reason = self.forward_until_trigger();
        self.session.shutdown(reason);
        reason
    }

    fn forward_until_trigger(&self) -> ShutdownReason {
        let config = self.session.config();
        let timeout = config.poll_timeout_ms();
        let mut pty_buf = vec![0u8; config.pty_chunk];
        let mut input_buf = vec![0u8; config.stdin_chunk];
        let ready_mask = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;

        loop {
            if self.shutdown.is_requested() {
                return ShutdownReason::Signal;
            }

            {
                let guard = self.session.master();
                let Some(master) = guard.as_ref() else {
                    // Closed underneath us by an external shutdown
                    return ShutdownReason::MasterClosed;
                };

                // One bounded wait covering both directions
                let mut fds = [
                    PollFd::new(master, PollFlags::POLLIN),
                    PollFd::new(&self.input, PollFlags::POLLIN),
                ];
                match poll(&mut fds, timeout) {
                    Ok(_) => {},
                    Err(Errno::EINTR) => {
                        // Signal arrival; the flag check at the top of
                        // the loop picks it up
                        continue;
                    },
                    Err(e) => {
                        debug!(error = %Error::Poll(e), "Poll failed");
                        return ShutdownReason::StreamError;
                    },
                }

                let master_ready = fds[0].revents().is_some_and(|r| r.intersects(ready_mask));
                let input_ready = fds[1].revents().is_some_and(|r| r.intersects(ready_mask));

                // Output direction first, then input, then exit check
                if master_ready {
                    if let Some(reason) = self.forward_master_to_output(master, &mut pty_buf) {
                        return reason;
                    }
                }
                if input_ready {
                    if let Some(reason) = self.forward_input_to_master(master, &mut input_buf) {
                        return reason;
                    }
                }
            }

            if self.session.poll_child_exit().is_some() {
                return ShutdownReason::ChildExited;
            }
        }
    }

    /// Master → output; `Some` when the child side is gone
    fn forward_master_to_output(&self, master: &OwnedFd, buf: &mut [u8]) -> Option<ShutdownReason> {
        match read(master.as_raw_fd(), buf) {
            Ok(0) => {
                debug!("Master EOF");
                Some(ShutdownReason::MasterClosed)
            },
            Ok(n) => {
                trace!(bytes = n, "Forwarding master output");
                self.write_output(&buf[..n])
            },
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => None,
            Err(e) => {
                // EIO here means the last slave fd was closed
                let err = Error::StreamRead {
                    stream: StreamKind::PtyMaster,
                    source: e,
                };
                debug!(error = %err, "Treating master read failure as peer closed");
                Some(ShutdownReason::MasterClosed)
            },
        }
    }

    /// Input → master; `Some` on end-of-input
    fn forward_input_to_master(&self, master: &OwnedFd, buf: &mut [u8]) -> Option<ShutdownReason> {
        match read(self.input.as_raw_fd(), buf) {
            Ok(0) => {
                debug!("End of input stream");
                Some(ShutdownReason::InputClosed)
            },
            Ok(n) => {
                trace!(bytes = n, "Forwarding input");
                self.write_master(master, &buf[..n])
            },
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => None,
            Err(e) => {
                let err = Error::StreamRead {
                    stream: StreamKind::Stdin,
                    source: e,
                };
                debug!(error = %err, "Ignoring input read failure");
                None
            },
        }
    }

    /// Blocking write of a whole chunk to the real output
    fn write_output(&self, mut data: &[u8]) -> Option<ShutdownReason> {
        while !data.is_empty() {
            match write(self.output.as_raw_fd(), data) {
                Ok(n) => data = &data[n..],
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    let err = Error::StreamWrite {
                        stream: StreamKind::Stdout,
                        source: e,
                    };
                    debug!(error = %err, "Output write failed");
                    return Some(ShutdownReason::StreamError);
                },
            }
        }
        None
    }

    /// Write a whole chunk to the non-blocking master, backing off on
    /// backpressure
    ///
    /// The retry loop re-checks the shutdown flag so a signal can
    /// always cancel a session stalled on a child that stopped
    /// reading its terminal.
    fn write_master(&self, master: &OwnedFd, mut data: &[u8]) -> Option<ShutdownReason> {
        while !data.is_empty() {
            if self.shutdown.is_requested() {
                return Some(ShutdownReason::Signal);
            }
            match write(master.as_raw_fd(), data) {
                Ok(n) => data = &data[n..],
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => thread::sleep(WRITE_RETRY_DELAY),
                Err(e) => {
                    let err = Error::StreamWrite {
                        stream: StreamKind::PtyMaster,
                        source: e,
                    };
                    debug!(error = %err, "Master write failed");
                    return Some(ShutdownReason::MasterClosed);
                },
            }
        }
        None
    }
}
