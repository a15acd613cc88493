//! Error types for the relay
//!
//! One variant per failing step so that suppressed failures stay
//! observable as typed values even when the relay absorbs them.

use std::fmt;
use std::io;

/// Which forwarded stream an I/O failure occurred on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// The PTY master retained by the parent
    PtyMaster,
    /// The invoking process's standard input
    Stdin,
    /// The invoking process's standard output
    Stdout,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::PtyMaster => write!(f, "PTY master"),
            StreamKind::Stdin => write!(f, "stdin"),
            StreamKind::Stdout => write!(f, "stdout"),
        }
    }
}

/// Error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No command specified")]
    Usage,

    #[error("Failed to allocate PTY pair: {0}")]
    PtyAllocation(#[source] nix::Error),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from {stream}: {source}")]
    StreamRead {
        stream: StreamKind,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to write to {stream}: {source}")]
    StreamWrite {
        stream: StreamKind,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to read terminal attributes: {0}")]
    AttrsCapture(#[source] nix::Error),

    #[error("Failed to restore terminal attributes: {0}")]
    AttrsRestore(#[source] nix::Error),

    #[error("Failed to poll streams: {0}")]
    Poll(#[source] nix::Error),

    #[error("Failed to install signal handler: {0}")]
    SignalInstall(#[source] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;
