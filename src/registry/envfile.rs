//! Line-oriented `KEY=VALUE` environment files.
//!
//! Blank lines and `#` comments are skipped, values may be wrapped in matching
//! single or double quotes, and lines without a key before `=` are ignored
//! rather than failing the whole file.

use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

/// Parse env-file text into ordered key/value pairs. Later keys win.
pub fn parse_env(text: &str) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else { continue };
        if eq == 0 {
            continue;
        }
        let key = line[..eq].trim();
        let value = strip_quotes(line[eq + 1..].trim());
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Prior state of an env file, captured before it is overwritten so a failed
/// add can put it back.
#[derive(Debug)]
pub struct EnvBackup {
    path: PathBuf,
    previous: Option<String>,
}

impl EnvBackup {
    /// Restore the file to what it held before [`replace_env_file`] ran.
    pub fn restore(self) -> io::Result<()> {
        match self.previous {
            Some(content) => std::fs::write(&self.path, content),
            None => match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

/// Write `text` (trimmed, newline-terminated) to `path`, returning a backup of
/// the previous content.
pub fn replace_env_file(path: &Path, text: &str) -> io::Result<EnvBackup> {
    let previous = match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    std::fs::write(path, format!("{}\n", text.trim()))?;
    Ok(EnvBackup {
        path: path.to_path_buf(),
        previous,
    })
}

/// Read and parse the env file at `path`. A missing file is an empty map.
pub fn load_env_file(path: &Path) -> io::Result<IndexMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_env(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(IndexMap::new()),
        Err(e) => Err(e),
    }
}

/// Result of probing a script's project for an env file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvCheck {
    pub exists: bool,
    /// Content of the example file, only when no env file exists.
    pub example: String,
    pub project_root: PathBuf,
}

/// Report whether the project owning `working_dir` already has an env file.
pub fn check_env(working_dir: &Path, env_file: &str, example_file: &str) -> EnvCheck {
    let exists = working_dir.join(env_file).is_file();
    let example = if exists {
        String::new()
    } else {
        std::fs::read_to_string(working_dir.join(example_file)).unwrap_or_default()
    };
    EnvCheck {
        exists,
        example,
        project_root: working_dir.to_path_buf(),
    }
}
