//! Host process helpers.
//!
//! - [`process::run_command`]: run an external program with argv (never via a
//!   shell), capture its output, and bound it with a timeout. Every supervisor
//!   and dependency-install invocation goes through it.
//! - [`platform_shell`]: the default interactive shell for terminal sessions.

use std::path::Path;

pub mod process;

/// Resolve the default interactive shell: `$SHELL` if it points at an existing
/// file, otherwise the first available of a short fallback list.
pub fn platform_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() && Path::new(&shell).is_file() {
            return shell;
        }
    }
    ["/bin/bash", "/bin/zsh", "/usr/bin/bash", "/bin/sh"]
        .iter()
        .find(|p| Path::new(p).is_file())
        .map_or_else(|| "/bin/sh".to_string(), |p| (*p).to_string())
}
