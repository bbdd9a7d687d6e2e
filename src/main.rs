#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # opsdeck
//!
//! Single-host operator console. Exposes an HTTP API to list and control apps
//! running under pm2, read their logs, register new apps, and a WebSocket
//! endpoint that attaches the browser to a PTY-backed shell.
//!
//! ## API surface
//!
//! | Method | Path                            | Role        | Description                     |
//! |--------|---------------------------------|-------------|---------------------------------|
//! | GET    | `/api/health`                   | none        | Liveness probe                  |
//! | GET    | `/api/apps`                     | staff       | Managed apps with status        |
//! | GET    | `/api/apps/{name}/logs`         | staff       | Recent log lines                |
//! | GET    | `/api/system`                   | staff       | Host metrics, pm2 version       |
//! | POST   | `/api/apps/{name}/{action}`     | admin       | start / stop / restart          |
//! | POST   | `/api/apps/{name}/flush-logs`   | admin       | Truncate the app's logs         |
//! | POST   | `/api/apps`                     | super_admin | Register a new app              |
//! | DELETE | `/api/apps/{name}`              | super_admin | Remove an app                   |
//! | POST   | `/api/apps/{name}/toggle-watch` | super_admin | Flip file watching              |
//! | GET    | `/api/check-env`                | super_admin | Env file presence for a script  |
//! | GET    | `/api/audit`                    | super_admin | Operator action trail           |
//! | GET    | `/api/terminals`                | super_admin | Open terminal sessions          |
//! | GET    | `<terminal.path>`               | super_admin | WebSocket terminal              |

use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use opsdeck::{routes, AppState, Config};

/// Single-host operator console for pm2-managed apps.
#[derive(Parser)]
#[command(name = "opsdeck", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("opsdeck: {e}");
            std::process::exit(2);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("opsdeck v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);
    info!(
        "pm2: {}, terminal: {} on {}",
        config.supervisor.program, config.terminal.shell, config.terminal.path
    );

    if config.auth.operators.is_empty() {
        warn!("No operators configured; every protected route will answer 401. Set OPSDECK_OPERATOR_TOKEN or [[auth.operators]]");
    }

    let state = AppState::from_config(config);
    let app = routes::router(state.clone());

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            std::process::exit(1);
        }
    };

    info!("Server ready");

    let shutdown_token = state.terminals.shutdown_token();
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!("Failed to register SIGTERM: {e}");
                    ctrl_c.await.ok();
                    info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
        // Open terminals hold their upgraded connections; end them so serve can return.
        shutdown_token.cancel();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {e}");
    }

    info!("Shutting down...");
    let kill_grace = Duration::from_millis(state.config.terminal.kill_grace_ms);
    state.terminals.shutdown(kill_grace * 2).await;
    info!("Goodbye");
}
