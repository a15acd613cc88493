//! PTY relay wrapper
//!
//! Spawns the given command under a fresh pseudo-terminal and relays
//! bytes between that terminal and this process's stdin/stdout until
//! the command exits, the input closes, or a termination signal
//! arrives. The wrapper's own exit code is 0 whenever a session ran,
//! regardless of how the child exited.

use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pty_wrapper::command::CommandSpec;
use pty_wrapper::config::RelayConfig;
use pty_wrapper::error::Result;
use pty_wrapper::relay::Relay;
use pty_wrapper::session::{Session, ShutdownReason};
use pty_wrapper::signal::{self, ShutdownFlag};

fn main() -> ExitCode {
    // Initialize logging; stdout is reserved for relayed bytes
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let spec = match CommandSpec::from_args(env::args_os().skip(1)) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: pty-wrapper <command> [args...]");
            return ExitCode::from(1);
        },
    };

    match run(&spec) {
        Ok(reason) => {
            info!(%reason, "Session complete");
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}

/// Run one full session: acquire, relay, shut down
fn run(spec: &CommandSpec) -> Result<ShutdownReason> {
    let session = Arc::new(Session::start(spec, RelayConfig::default())?);

    let shutdown = ShutdownFlag::new();
    signal::install(&shutdown)?;

    let relay = Relay::stdio(Arc::clone(&session), shutdown)?;
    Ok(relay.run())
}
