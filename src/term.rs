//! Terminal attribute save/restore
//!
//! Captures the invoking terminal's attributes at startup so every exit
//! path can put the terminal back the way it was found, even if the
//! child switched it into raw mode and never switched back.

use std::os::fd::OwnedFd;

use nix::sys::termios::{self, SetArg, Termios};

use crate::error::{Error, Result};

/// Saved terminal attributes for one fd
///
/// Holds its own duplicate of the target fd, so restoration works even
/// after the process's view of stdin has otherwise been torn down. The
/// relay never modifies the attributes itself; this exists purely to
/// undo changes leaked by the child.
#[derive(Debug)]
pub struct TerminalState {
    target: OwnedFd,
    saved: Termios,
}

impl TerminalState {
    /// Capture the current attributes of `target`
    ///
    /// Fails with `Error::AttrsCapture` when the fd is not a terminal.
    /// Callers treat that as "nothing to restore", not as fatal.
    pub fn capture(target: OwnedFd) -> Result<Self> {
        let saved = termios::tcgetattr(&target).map_err(Error::AttrsCapture)?;
        Ok(Self { target, saved })
    }

    /// The attributes as they were at capture time
    pub fn saved(&self) -> &Termios {
        &self.saved
    }

    /// Put the terminal back into its captured mode
    ///
    /// Uses `TCSADRAIN` so output already queued on the terminal is
    /// flushed before the mode flips back.
    pub fn restore(&self) -> Result<()> {
        termios::tcsetattr(&self.target, SetArg::TCSADRAIN, &self.saved)
            .map_err(Error::AttrsRestore)
    }
}
