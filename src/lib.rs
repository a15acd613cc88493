//! PTY Relay Library
//!
//! Runs a command under a freshly allocated pseudo-terminal and relays
//! bytes between that terminal and the wrapper's own stdin/stdout, so
//! the command behaves as if attached to a real terminal even when the
//! wrapper itself is not. The pieces:
//!
//! - `command`: argv parsing into a spawnable command description
//! - `config`: timeouts and chunk sizes for the relay loop
//! - `error`: typed errors for every acquisition and stream failure
//! - `pty`: PTY pair allocation and child spawn on the slave side
//! - `relay`: the bidirectional forwarding loop
//! - `session`: lifecycle state and idempotent shutdown
//! - `signal`: cooperative cancellation flag raised by SIGTERM/SIGINT
//! - `term`: saving and restoring terminal attributes

pub mod command;
pub mod config;
pub mod error;
pub mod pty;
pub mod relay;
pub mod session;
pub mod signal;
pub mod term;
