//! One terminal session: a shell on a PTY bound to one client connection.
//!
//! The session does not know about WebSockets. It consumes [`ClientFrame`]s
//! from an mpsc receiver and produces [`ServerFrame`]s on an mpsc sender; the
//! connection is considered closed when the inbound channel closes or the
//! outbound receiver is dropped. The shell is considered gone when it has been
//! reaped. Whichever happens first, the other side is torn down before the
//! session reports [`SessionState::Closed`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::control::{classify_text, Inbound};
use super::pty::PtyShell;
use super::TerminalOptions;

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// A frame for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Raw shell output.
    Output(Vec<u8>),
    /// Human-readable diagnostic (e.g. spawn failure).
    Notice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    ShellExited(Option<i32>),
    SpawnFailed(String),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: Uuid,
    pub pid: Option<i32>,
    pub reason: CloseReason,
    pub exit_code: Option<i32>,
    /// The shell outlived SIGKILL; its pid may still be held.
    pub unreaped: bool,
}

/// Why the input pump stopped.
enum InputEnd {
    ClientClosed,
    PtyClosed,
}

pub struct TerminalSession {
    id: Uuid,
    opts: Arc<TerminalOptions>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl TerminalSession {
    pub fn new(
        id: Uuid,
        opts: Arc<TerminalOptions>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state, rx) = watch::channel(SessionState::Pending);
        (
            Self {
                id,
                opts,
                cancel,
                state,
            },
            rx,
        )
    }

    fn set_state(&self, next: SessionState) {
        debug!(session = %self.id, state = ?next, "terminal state");
        self.state.send_replace(next);
    }

    /// Drive the session to completion.
    pub async fn run(
        self,
        inbound: mpsc::Receiver<ClientFrame>,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> SessionReport {
        let opts = Arc::clone(&self.opts);
        let (shell, io) = match PtyShell::spawn(&opts.shell, &opts.working_dir, &opts.term, opts.size) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(session = %self.id, "Failed to start {}: {e}", opts.shell);
                self.set_state(SessionState::Closing);
                let notice = format!("Failed to start shell {}: {e}\r\n", opts.shell);
                let _ = outbound.send(ServerFrame::Notice(notice)).await;
                drop(outbound);
                self.set_state(SessionState::Closed);
                return SessionReport {
                    id: self.id,
                    pid: None,
                    reason: CloseReason::SpawnFailed(e.to_string()),
                    exit_code: None,
                    unreaped: false,
                };
            }
        };
        let shell = Arc::new(shell);
        let pid = shell.pid();
        self.set_state(SessionState::Active);
        info!(session = %self.id, pid, shell = %opts.shell, "Terminal session active");

        let mut input_task = tokio::spawn(pump_input(inbound, io.writer, Arc::clone(&shell), self.id));
        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
        let output_task = tokio::spawn(pump_output(io.reader, output_tx));
        let mut exited = io.exited;

        let mut input_open = true;
        let mut output_open = true;
        // A chunk read from the PTY that the client has not yet accepted.
        let mut pending: Option<Vec<u8>> = None;
        let reason = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break CloseReason::Shutdown,
                end = &mut input_task, if input_open => match end {
                    Ok(InputEnd::PtyClosed) => input_open = false,
                    Ok(InputEnd::ClientClosed) | Err(_) => break CloseReason::ClientClosed,
                },
                chunk = output_rx.recv(), if output_open && pending.is_none() => match chunk {
                    Some(bytes) => pending = Some(bytes),
                    None => output_open = false,
                },
                permit = outbound.reserve(), if pending.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(bytes) = pending.take() {
                            permit.send(ServerFrame::Output(bytes));
                        }
                    }
                    Err(_) => break CloseReason::ClientClosed,
                },
                code = &mut exited => break CloseReason::ShellExited(code.ok().flatten()),
            }
        };

        self.set_state(SessionState::Closing);
        info!(session = %self.id, pid, ?reason, "Terminal session closing");

        let reaped = match reason {
            CloseReason::ShellExited(code) => {
                self.drain(pending, &mut output_rx, &outbound).await;
                Reap::Exited(code)
            }
            _ => {
                reap_with_escalation(&mut exited, opts.kill_grace, || shell.hangup(), || {
                    warn!(session = %self.id, pid, "Shell ignored SIGHUP, killing");
                    shell.kill();
                })
                .await
            }
        };

        input_task.abort();
        output_task.abort();
        drop(outbound);

        let (exit_code, unreaped) = match reaped {
            Reap::Exited(code) => (code, false),
            Reap::Unreaped => {
                error!(session = %self.id, pid, "Shell survived SIGKILL and was not reaped");
                (None, true)
            }
        };
        self.set_state(SessionState::Closed);
        info!(session = %self.id, pid, ?exit_code, unreaped, "Terminal session closed");

        SessionReport {
            id: self.id,
            pid: Some(pid),
            reason,
            exit_code,
            unreaped,
        }
    }

    /// Relay output still buffered in the PTY after the shell exited, for at
    /// most the drain window.
    async fn drain(
        &self,
        mut pending: Option<Vec<u8>>,
        output_rx: &mut mpsc::Receiver<Vec<u8>>,
        outbound: &mpsc::Sender<ServerFrame>,
    ) {
        let deadline = tokio::time::sleep(self.opts.drain);
        tokio::pin!(deadline);
        loop {
            if pending.is_none() {
                tokio::select! {
                    chunk = output_rx.recv() => match chunk {
                        Some(bytes) => pending = Some(bytes),
                        None => break,
                    },
                    () = &mut deadline => break,
                }
            }
            tokio::select! {
                permit = outbound.reserve() => match (permit, pending.take()) {
                    (Ok(permit), Some(bytes)) => permit.send(ServerFrame::Output(bytes)),
                    _ => break,
                },
                () = &mut deadline => break,
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Reap {
    Exited(Option<i32>),
    /// Still not reaped one grace period after SIGKILL.
    Unreaped,
}

/// SIGHUP, wait `grace`, SIGKILL, wait `grace` again.
async fn reap_with_escalation(
    exited: &mut oneshot::Receiver<Option<i32>>,
    grace: Duration,
    hangup: impl FnOnce(),
    kill: impl FnOnce(),
) -> Reap {
    hangup();
    if let Ok(code) = tokio::time::timeout(grace, &mut *exited).await {
        return Reap::Exited(code.ok().flatten());
    }
    kill();
    match tokio::time::timeout(grace, &mut *exited).await {
        Ok(code) => Reap::Exited(code.ok().flatten()),
        Err(_) => Reap::Unreaped,
    }
}

/// Client frames to the PTY. Resize messages are applied, not written.
async fn pump_input(
    mut inbound: mpsc::Receiver<ClientFrame>,
    mut writer: tokio::fs::File,
    shell: Arc<PtyShell>,
    id: Uuid,
) -> InputEnd {
    while let Some(frame) = inbound.recv().await {
        let bytes = match frame {
            ClientFrame::Binary(bytes) => bytes,
            ClientFrame::Text(text) => match classify_text(&text) {
                Inbound::Resize(size) => {
                    match shell.resize(size) {
                        Ok(()) => debug!(session = %id, rows = size.rows, cols = size.cols, "resized"),
                        Err(e) => warn!(session = %id, "resize failed: {e}"),
                    }
                    continue;
                }
                Inbound::Input(bytes) => bytes,
            },
        };
        if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
            return InputEnd::PtyClosed;
        }
    }
    InputEnd::ClientClosed
}

/// PTY output to the session loop, chunk by chunk in read order.
async fn pump_output(mut reader: tokio::fs::File, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            // EIO once every slave descriptor is closed.
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}
