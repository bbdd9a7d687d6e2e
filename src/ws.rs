//! WebSocket transport for terminal sessions.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET <terminal.path>` carrying its session token
//!    (cookie, bearer header, or `?token=`). The connection gate runs before
//!    the upgrade is accepted; rejections are `401`/`404` with
//!    `Connection: close`.
//! 2. Client text and binary frames are terminal input. A text frame
//!    `{"type":"resize","cols":C,"rows":R}` resizes the PTY instead.
//! 3. Shell output is sent as binary frames. A spawn failure is reported as
//!    one text frame before the socket is closed.
//! 4. Either side closing tears down the other.

use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        OriginalUri, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::AuditAction;
use crate::auth::AuthSession;
use crate::gate;
use crate::terminal::{ClientFrame, CloseReason, ServerFrame};
use crate::AppState;

/// How long to keep flushing frames to a slow client after the session ended.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET <terminal.path>` upgrade handler. Authorizes before anything is allocated.
pub async fn terminal_upgrade(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let session = match gate::authorize(
        &uri,
        &headers,
        &state.config.terminal.path,
        state.sessions.as_ref(),
        state.config.terminal.required_role,
        &state.config.auth.cookie_name,
    ) {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| serve_terminal(socket, state, session))
}

async fn serve_terminal(socket: WebSocket, state: AppState, operator: AuthSession) {
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::channel::<ClientFrame>(64);
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(64);

    // Socket -> session. Ends when the client closes or the session stops listening.
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            let frame = match msg {
                Message::Text(text) => ClientFrame::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => ClientFrame::Binary(bytes.to_vec()),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if in_tx.send(frame).await.is_err() {
                break;
            }
        }
        debug!(session = %id, "terminal socket reader done");
    });

    // Session -> socket, then a close frame once the session drops its sender.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let msg = match frame {
                ServerFrame::Output(bytes) => Message::Binary(bytes.into()),
                ServerFrame::Notice(text) => Message::Text(text.into()),
            };
            if sink.send(msg).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    });

    state
        .audit
        .record(&operator.username, AuditAction::TerminalOpen, &id.to_string(), None)
        .await;

    let report = state
        .terminals
        .run_session(id, &operator.username, in_rx, out_tx)
        .await;

    reader.abort();
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    let mut detail = match &report.reason {
        CloseReason::ClientClosed => "client closed".to_string(),
        CloseReason::ShellExited(code) => format!("shell exited ({code:?})"),
        CloseReason::SpawnFailed(e) => format!("spawn failed: {e}"),
        CloseReason::Shutdown => "server shutdown".to_string(),
    };
    if report.unreaped {
        detail.push_str("; shell not reaped");
    }
    info!(session = %id, user = %operator.username, "Terminal connection finished: {detail}");
    state
        .audit
        .record(
            &operator.username,
            AuditAction::TerminalClose,
            &id.to_string(),
            Some(detail),
        )
        .await;
}
