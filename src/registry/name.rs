//! Managed application names.

use std::fmt;

use serde::Serialize;

use crate::error::AppError;

/// A validated application name: one or more of `[A-Za-z0-9_-]`.
///
/// Construction never rewrites its input. A name that would only become valid
/// after stripping characters is rejected, not sanitised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AppName(String);

impl AppName {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if is_valid_name(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(AppError::InvalidName {
                name: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn is_valid_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
