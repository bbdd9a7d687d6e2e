#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! opsdeck library: the building blocks of the operator console.
//!
//! - `supervisor`: typed, validated commands against the pm2 process supervisor
//! - `registry`: app naming rules, script location, env files, dependency install
//! - `terminal`: PTY-backed shell sessions and their lifecycle
//! - `gate`: authorization of terminal connections before upgrade
//! - `auth`: operator sessions, roles and route middleware
//! - `audit`: in-memory trail of operator actions
//! - `routes` / `ws`: HTTP and WebSocket surfaces
//! - `config`: TOML + env-var configuration

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod registry;
pub mod routes;
pub mod shell;
pub mod state;
pub mod supervisor;
pub mod terminal;
pub mod util;
pub mod ws;

pub use config::Config;
pub use error::AppError;
pub use state::AppState;
