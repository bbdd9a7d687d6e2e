//! End-to-end: real listener, real WebSocket client, real `/bin/sh` behind a PTY.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use opsdeck::{routes, AppState, Config};

const CONFIG: &str = r#"
[auth]
cookie_name = "opsdeck_session"

[[auth.operators]]
token = "root-token"
username = "root"
role = "super_admin"

[[auth.operators]]
token = "admin-token"
username = "ada"
role = "admin"

[terminal]
path = "/ws/terminal"
shell = "/bin/sh"
working_dir = "/tmp"
kill_grace_ms = 200
drain_ms = 100

[supervisor]
program = "/nonexistent/pm2"
"#;

async fn start_server() -> (SocketAddr, AppState) {
    let config = Config::from_toml(CONFIG).expect("config parses");
    let state = AppState::from_config(config);
    let app = routes::router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn rejected_status(err: WsError) -> StatusCode {
    match err {
        WsError::Http(response) => response.status(),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

/// Read frames until the accumulated output contains `needle`.
async fn read_until<S>(stream: &mut S, needle: &str) -> String
where
    S: futures::Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !seen.contains(needle) {
        let next = tokio::time::timeout_at(deadline, stream.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; saw {seen:?}"));
        match next {
            Some(Ok(Message::Binary(bytes))) => seen.push_str(&String::from_utf8_lossy(&bytes)),
            Some(Ok(Message::Text(text))) => seen.push_str(text.as_str()),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("socket error: {e}"),
            None => panic!("socket closed before {needle:?}; saw {seen:?}"),
        }
    }
    seen
}

async fn wait_for_no_sessions(state: &AppState) {
    for _ in 0..100 {
        if state.terminals.session_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("terminal session was not cleaned up");
}

#[tokio::test]
async fn test_upgrade_without_session_is_refused() {
    let (addr, state) = start_server().await;
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/terminal"))
        .await
        .unwrap_err();
    assert_eq!(rejected_status(err), StatusCode::UNAUTHORIZED);
    assert_eq!(state.terminals.session_count().await, 0);
}

#[tokio::test]
async fn test_upgrade_below_required_role_is_refused() {
    let (addr, state) = start_server().await;
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/terminal?token=admin-token"))
        .await
        .unwrap_err();
    assert_eq!(rejected_status(err), StatusCode::UNAUTHORIZED);
    assert_eq!(state.terminals.session_count().await, 0);
}

#[tokio::test]
async fn test_upgrade_on_other_path_is_refused() {
    let (addr, _state) = start_server().await;
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/other?token=root-token"))
        .await
        .unwrap_err();
    assert_eq!(rejected_status(err), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cookie_session_gets_a_shell() {
    let (addr, state) = start_server().await;
    let mut request = format!("ws://{addr}/ws/terminal")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Cookie",
        HeaderValue::from_static("theme=dark; opsdeck_session=root-token"),
    );
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::text(r#"{"type":"resize","cols":100,"rows":40}"#))
        .await
        .unwrap();
    sink.send(Message::text("stty size; echo marker-$((40+2))\n"))
        .await
        .unwrap();
    let output = read_until(&mut stream, "marker-42").await;
    assert!(output.contains("40 100"), "resize not applied: {output:?}");
    assert_eq!(state.terminals.list().await.len(), 1);

    sink.send(Message::Close(None)).await.unwrap();
    wait_for_no_sessions(&state).await;
}

#[tokio::test]
async fn test_shell_exit_closes_socket() {
    let (addr, state) = start_server().await;
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/terminal?token=root-token"))
        .await
        .unwrap();
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::binary(b"echo bye-$((1+1)); exit 3\n".to_vec()))
        .await
        .unwrap();
    read_until(&mut stream, "bye-2").await;

    let closed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match stream.next().await {
                None | Some(Ok(Message::Close(_)) | Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open after the shell exited");
    wait_for_no_sessions(&state).await;
}
