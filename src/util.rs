//! Small helpers shared across modules.

use std::path::PathBuf;

/// Resolve a configured directory, expanding a leading `~` to `$HOME`.
///
/// Only `~` and `~/...` are expanded; `~user` and anything else pass through.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return PathBuf::from(path),
    };
    match std::env::var_os("HOME") {
        Some(home) => {
            let mut resolved = PathBuf::from(home);
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                resolved.push(rest);
            }
            resolved
        }
        None => PathBuf::from(path),
    }
}
