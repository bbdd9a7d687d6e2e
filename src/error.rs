//! Error taxonomy for supervisor and registry operations.
//!
//! Every failure a caller can see is an [`AppError`]. Each variant belongs to
//! exactly one [`ErrorKind`], which is what HTTP handlers and tests match on:
//! "your input was wrong" (`Validation`, `NotFound`, `Conflict`) is kept apart
//! from "the subsystem is down" (`ExternalUnavailable`, `Timeout`). Nothing here
//! is retried automatically.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Coarse classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ExternalUnavailable,
    Timeout,
    PartialFailure,
}

/// The side-effecting step of an add at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStep {
    WriteEnv,
    InstallDependencies,
    Register,
    Persist,
}

impl fmt::Display for AddStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WriteEnv => "write-env",
            Self::InstallDependencies => "install-dependencies",
            Self::Register => "register",
            Self::Persist => "persist",
        })
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid app name {name:?}: only letters, numbers, dashes and underscores are allowed")]
    InvalidName { name: String },

    #[error("invalid script path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("action {action:?} is not supported (expected start, stop or restart)")]
    UnsupportedAction { action: String },

    #[error("app {name:?} already exists")]
    AlreadyExists { name: String },

    #[error("app {name:?} not found")]
    NotFound { name: String },

    #[error("no {env_file} found in {} and no environment was provided", .dir.display())]
    EnvRequired { dir: PathBuf, env_file: String },

    #[error("dependency install failed in {}: {detail}; no supervisor registration was created", .dir.display())]
    DependencyInstallFailed { dir: PathBuf, detail: String },

    #[error("process supervisor unavailable: {detail}")]
    SupervisorUnavailable { detail: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("add failed at step {step}: {detail} ({})", rollback_note(*.rolled_back))]
    PartialFailure {
        step: AddStep,
        detail: String,
        rolled_back: bool,
    },
}

fn rollback_note(rolled_back: bool) -> &'static str {
    if rolled_back {
        "no supervisor registration was left behind"
    } else {
        "rollback incomplete, check the supervisor list"
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. }
            | Self::InvalidPath { .. }
            | Self::UnsupportedAction { .. }
            | Self::EnvRequired { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::SupervisorUnavailable { .. } => ErrorKind::ExternalUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DependencyInstallFailed { .. } | Self::PartialFailure { .. } => {
                ErrorKind::PartialFailure
            }
        }
    }

    /// Stable machine-readable code, returned as `code` in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidName { .. } => "INVALID_NAME",
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::UnsupportedAction { .. } => "UNSUPPORTED_ACTION",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::EnvRequired { .. } => "ENV_REQUIRED",
            Self::DependencyInstallFailed { .. } => "DEPENDENCY_INSTALL_FAILED",
            Self::SupervisorUnavailable { .. } => "SUPERVISOR_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::PartialFailure { .. } => "PARTIAL_FAILURE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ExternalUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::PartialFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        match &self {
            Self::PartialFailure {
                step, rolled_back, ..
            } => {
                body["step"] = json!(step.to_string());
                body["rolled_back"] = json!(rolled_back);
            }
            Self::DependencyInstallFailed { .. } => {
                body["step"] = json!(AddStep::InstallDependencies.to_string());
                body["rolled_back"] = json!(true);
            }
            _ => {}
        }
        (self.status_code(), Json(body)).into_response()
    }
}
