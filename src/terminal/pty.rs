//! Shell processes on a pseudo-terminal.
//!
//! Uses `nix` for `openpty`; everything else is raw `libc`. The shell becomes
//! a session leader with the PTY slave as its controlling terminal, so signals
//! sent to `-pid` reach the whole job tree started from it.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::control::TermSize;

/// A running shell bound to the master side of a PTY.
pub struct PtyShell {
    pid: i32,
    master: OwnedFd,
}

/// Async handles produced by [`PtyShell::spawn`].
pub struct PtyIo {
    /// Reads shell output from the master.
    pub reader: tokio::fs::File,
    /// Writes terminal input to the master.
    pub writer: tokio::fs::File,
    /// Resolves with the exit code (`None` if killed by a signal) once the
    /// shell has been reaped.
    pub exited: oneshot::Receiver<Option<i32>>,
}

impl PtyShell {
    /// Start `shell` in `working_dir` on a fresh PTY of `size`.
    pub fn spawn(shell: &str, working_dir: &Path, term: &str, size: TermSize) -> io::Result<(Self, PtyIo)> {
        let OpenptyResult { master, slave } = openpty(&winsize(size), None).map_err(io::Error::from)?;
        set_cloexec(master.as_raw_fd())?;
        set_cloexec(slave.as_raw_fd())?;

        let slave_fd = slave.as_raw_fd();
        let mut cmd = Command::new(shell);
        cmd.current_dir(working_dir)
            .env("TERM", term)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                for target in 0..=2 {
                    if libc::dup2(slave_fd, target) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                if slave_fd > 2 {
                    libc::close(slave_fd);
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn()?;
        // The parent must not hold the slave, or reads on the master never see EOF.
        drop(slave);

        let pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| io::Error::other("shell exited before its pid was read"))?;

        let reader = dup_file(master.as_raw_fd())?;
        let writer = dup_file(master.as_raw_fd())?;

        let (exit_tx, exited) = oneshot::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("wait on shell {pid} failed: {e}");
                    None
                }
            };
            debug!("shell {pid} reaped with {code:?}");
            let _ = exit_tx.send(code);
        });

        Ok((
            Self { pid, master },
            PtyIo {
                reader,
                writer,
                exited,
            },
        ))
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn resize(&self, size: TermSize) -> io::Result<()> {
        let ws = winsize(size);
        // SAFETY: TIOCSWINSZ reads a Winsize from the pointer.
        let ret = unsafe {
            libc::ioctl(
                self.master.as_raw_fd(),
                libc::TIOCSWINSZ,
                std::ptr::addr_of!(ws),
            )
        };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// SIGHUP to the shell's process group, as a terminal hangup would.
    pub fn hangup(&self) {
        self.signal_group(libc::SIGHUP);
    }

    pub fn kill(&self) {
        self.signal_group(libc::SIGKILL);
    }

    fn signal_group(&self, signal: i32) {
        // SAFETY: plain kill(2); ESRCH just means the group is already gone.
        let ret = unsafe { libc::kill(-self.pid, signal) };
        if ret == -1 {
            debug!(
                "kill(-{}, {signal}) failed: {}",
                self.pid,
                io::Error::last_os_error()
            );
        }
    }
}

fn winsize(size: TermSize) -> Winsize {
    Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Independent handle on the master for the reader or writer task.
fn dup_file(fd: RawFd) -> io::Result<tokio::fs::File> {
    // SAFETY: F_DUPFD_CLOEXEC returns a new descriptor that we take ownership of.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `dup` is a fresh descriptor owned by nobody else.
    let file = unsafe { std::fs::File::from_raw_fd(dup) };
    Ok(tokio::fs::File::from_std(file))
}
