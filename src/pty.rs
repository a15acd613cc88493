//! PTY allocation and child spawning
//!
//! Opens a pseudo-terminal pair and launches the target command with
//! its standard streams on the slave side, in its own session with the
//! slave as controlling terminal. The parent keeps only the master; its
//! slave handles are all closed by the time `Pty::spawn` returns, so
//! EOF detection on the master is never masked.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{openpty, Winsize};
use nix::unistd::setsid;

use crate::command::CommandSpec;
use crate::error::{Error, Result};

/// A pseudo-terminal master with the child process attached to its
/// slave side
#[derive(Debug)]
pub struct Pty {
    master: OwnedFd,
    child: Child,
}

impl Pty {
    /// Allocate a PTY pair and spawn `spec` attached to the slave
    ///
    /// The pair is sized like the invoking terminal when stdin is a
    /// tty (80x24 otherwise), and the master is set non-blocking. The
    /// child runs `setsid` and takes the slave as its controlling
    /// terminal before exec; it inherits the parent's environment
    /// unmodified. Spawn failures (program missing, not executable)
    /// are reported synchronously, after every slave handle held by
    /// the parent has already been released.
    pub fn spawn(spec: &CommandSpec) -> Result<Self> {
        let size = initial_window_size();
        let pair = openpty(Some(&size), None).map_err(Error::PtyAllocation)?;
        set_nonblocking(pair.master.as_raw_fd()).map_err(Error::PtyAllocation)?;

        let child = spawn_child(spec, pair.slave)?;

        Ok(Self {
            master: pair.master,
            child,
        })
    }

    /// Borrow the master fd
    pub fn master(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// Split into the master fd and the child handle
    pub fn into_parts(self) -> (OwnedFd, Child) {
        (self.master, self.child)
    }
}

/// Spawn the command with stdin/stdout/stderr on `slave`
///
/// Consumes the slave; both it and the duplicates handed to the child's
/// stdio are closed in the parent before this returns, success or not.
fn spawn_child(spec: &CommandSpec, slave: OwnedFd) -> Result<Child> {
    let spawn_err = |source: io::Error| Error::Spawn {
        command: spec.program().to_string_lossy().into_owned(),
        source,
    };

    let stdin = slave.try_clone().map_err(spawn_err)?;
    let stdout = slave.try_clone().map_err(spawn_err)?;

    let mut command = Command::new(spec.program());
    command
        .args(spec.args())
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(slave));

    // SAFETY: the hook only calls setsid and one ioctl, both plain
    // syscalls, which is all that is allowed between fork and exec
    unsafe {
        command.pre_exec(child_setup);
    }

    command.spawn().map_err(spawn_err)
}

/// Runs in the forked child, after its stdio is already on the slave
fn child_setup() -> io::Result<()> {
    // New session so the child is signalable as a unit and insulated
    // from the parent's controlling terminal
    setsid().map_err(io::Error::from)?;

    // The slave is fd 0 at this point; adopt it as controlling
    // terminal. Best-effort: some platforms refuse it here and still
    // give the child a usable terminal.
    // SAFETY: TIOCSCTTY on the new session's terminal-to-be
    let _ = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) };

    Ok(())
}

/// Window size for a fresh PTY: the invoking terminal's size when
/// stdin is a tty, 80x24 otherwise
fn initial_window_size() -> Winsize {
    let mut size = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ fills in a plain struct
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut size) };

    if rc == 0 && size.ws_row > 0 && size.ws_col > 0 {
        size
    } else {
        Winsize {
            ws_row: 24,
            ws_col: 80,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, Instant};

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags};
    use nix::unistd::read;

    /// Drain the master until `pattern` shows up or the deadline passes
    fn read_until(master: &OwnedFd, pattern: &[u8], timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];

        while Instant::now() < deadline {
            let mut fds = [PollFd::new(master, PollFlags::POLLIN)];
            match poll(&mut fds, 50) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {},
                Err(_) => break,
            }
            match read(master.as_raw_fd(), &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if collected
                        .windows(pattern.len())
                        .any(|window| window == pattern)
                    {
                        break;
                    }
                },
            }
        }

        collected
    }

    #[test]
    fn test_spawn_echo_output_arrives_on_master() {
        let spec = CommandSpec::from_args(["/bin/echo", "pty spawn marker"])
            .expect("Failed to parse command");
        let pty = Pty::spawn(&spec).expect("Failed to spawn");
        let (master, mut child) = pty.into_parts();

        let output = read_until(&master, b"pty spawn marker", Duration::from_secs(5));
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("pty spawn marker"), "Unexpected output: {}", text);

        let status = child.wait().expect("Failed to wait for child");
        assert!(status.success());
    }

    #[test]
    fn test_spawn_missing_program_fails_synchronously() {
        let spec = CommandSpec::from_args(["/nonexistent/definitely-not-a-program"])
            .expect("Failed to parse command");
        let err = Pty::spawn(&spec).unwrap_err();
        match err {
            Error::Spawn { command, source } => {
                assert!(command.contains("definitely-not-a-program"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            },
            other => panic!("Expected spawn error, got: {}", other),
        }
    }

    #[test]
    fn test_master_reports_closed_after_child_exits() {
        // /bin/true exits immediately without output; because the
        // parent holds no slave fd, the master must report the peer
        // gone instead of blocking forever
        let spec = CommandSpec::from_args(["/bin/true"]).expect("Failed to parse command");
        let pty = Pty::spawn(&spec).expect("Failed to spawn");
        let (master, mut child) = pty.into_parts();

        child.wait().expect("Failed to wait for child");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 256];
        let mut saw_closed = false;
        while Instant::now() < deadline {
            match read(master.as_raw_fd(), &mut buf) {
                // Linux reports EIO once the last slave fd is gone
                Ok(0) | Err(Errno::EIO) => {
                    saw_closed = true;
                    break;
                },
                Ok(_) => continue,
                Err(Errno::EAGAIN) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => panic!("Unexpected read error: {}", e),
            }
        }
        assert!(saw_closed, "Master never reported the slave side closed");
    }

    #[test]
    fn test_child_runs_in_own_session() {
        // Field 6 of /proc/self/stat is the session id; only shell
        // builtins so the test does not depend on procps
        let spec = CommandSpec::from_args([
            "/bin/sh",
            "-c",
            "read pid comm state ppid pgrp sid rest < /proc/$$/stat && echo \"sid=$sid\"",
        ])
        .expect("Failed to parse command");
        let pty = Pty::spawn(&spec).expect("Failed to spawn");
        let (master, mut child) = pty.into_parts();
        let pid = child.id();

        // The sid line is the only output, so wait for its newline
        let output = read_until(&master, b"\n", Duration::from_secs(5));
        let _ = child.wait();

        let text = String::from_utf8_lossy(&output);
        let sid: u32 = text
            .split("sid=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|field| field.parse().ok())
            .unwrap_or(0);
        // setsid makes the child the leader of a fresh session
        assert_eq!(sid, pid, "Child session id {} != pid {}", sid, pid);
    }
}
