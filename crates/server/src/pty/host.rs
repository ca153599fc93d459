// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::asciinema::AsciinemaWriter;

/// Grace period between SIGTERM and the SIGKILL follow-up.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Commands accepted by a session's PTY task.
#[derive(Debug)]
pub enum PtyCommand {
    /// Write raw bytes to the child's stdin.
    Write(Bytes),
    Resize { cols: u16, rows: u16 },
    /// Restore the spawn-time dimensions.
    ResetSize,
    /// Send a signal; SIGTERM escalates to SIGKILL after the grace period.
    Kill(Signal),
}

/// Cloneable handle for sending commands to a PTY task.
#[derive(Clone)]
pub struct PtyCommander {
    tx: mpsc::Sender<PtyCommand>,
}

impl PtyCommander {
    pub fn channel() -> (Self, mpsc::Receiver<PtyCommand>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }

    /// Send a command; returns false if the PTY task is gone.
    pub async fn send(&self, cmd: PtyCommand) -> bool {
        self.tx.send(cmd).await.is_ok()
    }

    pub async fn write(&self, data: Bytes) -> bool {
        self.send(PtyCommand::Write(data)).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> bool {
        self.send(PtyCommand::Resize { cols, rows }).await
    }

    pub async fn kill(&self, signal: Signal) -> bool {
        self.send(PtyCommand::Kill(signal)).await
    }
}

/// Final child status, collapsed to a single exit code
/// (`128 + signal` for signal deaths).
#[derive(Debug, Clone, Copy)]
pub struct ExitOutcome {
    pub code: i32,
}

/// Parse a signal name (`"SIGTERM"`, `"TERM"`); empty defaults to SIGTERM.
pub fn parse_signal(name: &str) -> Option<Signal> {
    if name.is_empty() {
        return Some(Signal::SIGTERM);
    }
    let upper = name.to_uppercase();
    let full = if upper.starts_with("SIG") { upper } else { format!("SIG{upper}") };
    full.parse().ok()
}

/// The session's PTY master, registered with the runtime for readiness I/O.
#[derive(Debug)]
struct MasterFd(OwnedFd);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

fn errno_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// A spawned child process attached to a PTY master.
pub struct PtyHost {
    master: AsyncFd<MasterFd>,
    child_pid: Pid,
    initial_cols: u16,
    initial_rows: u16,
}

impl PtyHost {
    /// Spawn `command` under a new PTY.
    ///
    /// The child gets `TERM`, the provided extra environment, and `cwd` as
    /// its working directory before exec.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(
        command: &[String],
        cwd: &Path,
        cols: u16,
        rows: u16,
        term: &str,
        env: &[(String, String)],
    ) -> anyhow::Result<Self> {
        if command.is_empty() {
            bail!("command must not be empty");
        }
        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                std::env::set_var("TERM", term);
                for (key, value) in env {
                    std::env::set_var(key, value);
                }
                if std::env::set_current_dir(cwd).is_err() {
                    // Fall back to the inherited cwd rather than dying pre-exec.
                    let _ = std::env::set_current_dir("/");
                }

                let c_args: Vec<CString> = command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<_, _>>()
                    .context("invalid command argument")?;

                execvp(&c_args[0], &c_args).context("execvp failed")?;
                unreachable!();
            }
            ForkptyResult::Parent { child, master } => {
                // The master must be non-blocking before AsyncFd registration.
                let flags =
                    OFlag::from_bits_truncate(fcntl(&master, FcntlArg::F_GETFL).map_err(errno_io)?);
                fcntl(&master, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(errno_io)?;

                let afd = AsyncFd::new(MasterFd(master)).context("AsyncFd::new failed")?;
                Ok(Self {
                    master: afd,
                    child_pid: child,
                    initial_cols: cols,
                    initial_rows: rows,
                })
            }
        }
    }

    pub fn child_pid(&self) -> i32 {
        self.child_pid.as_raw()
    }

    /// Read one chunk of child output. Returns 0 at EOF; `EIO` (the usual
    /// Linux signal that the slave side is gone) surfaces to the caller.
    async fn read_output(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|fd| nix::unistd::read(fd, buf).map_err(errno_io)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write session input to the child, waiting out partial writes.
    async fn write_input(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|fd| nix::unistd::write(fd, data).map_err(errno_io)) {
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    fn set_winsize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
        // size on the PTY master fd. The Winsize struct is properly
        // initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Run the session I/O loop until the child exits.
    ///
    /// Master output is appended to the asciinema writer; commands arrive on
    /// `cmd_rx`. Cancellation starts the SIGTERM→SIGKILL ladder instead of
    /// abandoning the child.
    pub async fn run(
        self,
        session_id: &str,
        mut writer: AsciinemaWriter,
        mut cmd_rx: mpsc::Receiver<PtyCommand>,
        cancel: CancellationToken,
    ) -> anyhow::Result<ExitOutcome> {
        let pid = self.child_pid;
        let mut buf = vec![0u8; 8192];
        let mut kill_deadline: Option<tokio::time::Instant> = None;
        let mut cancel_seen = false;

        loop {
            let kill_at = kill_deadline.unwrap_or_else(|| {
                tokio::time::Instant::now() + Duration::from_secs(86_400)
            });

            tokio::select! {
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    let _ = kill(pid, Signal::SIGTERM);
                    kill_deadline = Some(tokio::time::Instant::now() + KILL_GRACE);
                }
                _ = tokio::time::sleep_until(kill_at), if kill_deadline.is_some() => {
                    let _ = kill(pid, Signal::SIGKILL);
                    kill_deadline = None;
                }
                result = self.read_output(&mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => writer.write_output(&buf[..n])?,
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PtyCommand::Write(data)) => {
                            self.write_input(&data).await?;
                            writer.write_input(&data)?;
                        }
                        Some(PtyCommand::Resize { cols, rows }) => {
                            self.set_winsize(cols, rows)?;
                            writer.write_resize(cols, rows)?;
                        }
                        Some(PtyCommand::ResetSize) => {
                            self.set_winsize(self.initial_cols, self.initial_rows)?;
                            writer.write_resize(self.initial_cols, self.initial_rows)?;
                        }
                        Some(PtyCommand::Kill(signal)) => {
                            let _ = kill(pid, signal);
                            if signal != Signal::SIGKILL {
                                kill_deadline =
                                    Some(tokio::time::Instant::now() + KILL_GRACE);
                            }
                        }
                        None => {}
                    }
                }
            }
        }

        // Reap on a blocking thread to avoid stalling the runtime.
        let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
            .await
            .context("join wait thread")??;

        writer.write_exit(status.code, session_id)?;
        Ok(status)
    }
}

impl Drop for PtyHost {
    fn drop(&mut self) {
        // Best-effort: never leave an orphan holding the slave side.
        let _ = kill(self.child_pid, Signal::SIGHUP);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

/// Block until the child exits.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitOutcome> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitOutcome { code }),
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitOutcome { code: 128 + sig as i32 })
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => return Ok(ExitOutcome { code: 0 }),
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
