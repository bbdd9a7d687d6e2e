//! Entry-script validation and working-directory resolution.
//!
//! The script path ends up inside a supervisor start invocation, so it is a
//! security boundary: anything carrying shell metacharacters is refused before
//! the filesystem is even consulted.

use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Characters that must never appear in a script path.
pub const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$'];

/// Where a validated script lives and how the supervisor should start it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    /// Canonical absolute path to the script.
    pub script: PathBuf,
    /// Nearest ancestor holding the project manifest, else the script's directory.
    pub working_dir: PathBuf,
    /// `script` relative to `working_dir`.
    pub relative_script: PathBuf,
    /// Whether `working_dir` contains the manifest.
    pub has_manifest: bool,
}

/// Validate `raw` and resolve its working directory.
pub fn locate_script(
    raw: &str,
    extension: &str,
    manifest_file: &str,
) -> Result<ScriptLocation, AppError> {
    let invalid = |reason: &str| AppError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(invalid("path is empty"));
    }
    if raw.contains(SHELL_METACHARACTERS) {
        return Err(invalid("path contains shell metacharacters"));
    }
    if Path::new(raw).extension().and_then(|e| e.to_str()) != Some(extension) {
        return Err(invalid(&format!("only .{extension} scripts are supported")));
    }
    if !Path::new(raw).is_file() {
        return Err(invalid("script not found"));
    }

    let script = std::fs::canonicalize(raw).map_err(|e| invalid(&e.to_string()))?;
    // A symlink may resolve to somewhere less tidy than the name it was given.
    if script.to_string_lossy().contains(SHELL_METACHARACTERS) {
        return Err(invalid("resolved path contains shell metacharacters"));
    }

    let (working_dir, has_manifest) = resolve_working_dir(&script, manifest_file);
    let relative_script = script
        .strip_prefix(&working_dir)
        .map_err(|_| invalid("script is outside its working directory"))?
        .to_path_buf();

    Ok(ScriptLocation {
        script,
        working_dir,
        relative_script,
        has_manifest,
    })
}

/// Walk upward from the script's directory to the nearest directory holding
/// `manifest_file`. Falls back to the script's own directory.
pub fn resolve_working_dir(script: &Path, manifest_file: &str) -> (PathBuf, bool) {
    let start = script
        .parent()
        .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
    let mut dir = start.as_path();
    loop {
        if dir.join(manifest_file).is_file() {
            return (dir.to_path_buf(), true);
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }
    (start, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_manifest_in_ancestor_sets_working_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        touch(&root.join("svc/package.json"));
        touch(&root.join("svc/src/server/index.js"));

        let loc = locate_script(
            root.join("svc/src/server/index.js").to_str().unwrap(),
            "js",
            "package.json",
        )
        .unwrap();
        assert_eq!(loc.working_dir, root.join("svc"));
        assert_eq!(loc.relative_script, PathBuf::from("src/server/index.js"));
        assert!(loc.has_manifest);
    }

    #[test]
    fn test_no_manifest_defaults_to_script_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        touch(&root.join("loose/run.js"));

        let loc = locate_script(root.join("loose/run.js").to_str().unwrap(), "js", "package.json")
            .unwrap();
        assert_eq!(loc.working_dir, root.join("loose"));
        assert_eq!(loc.relative_script, PathBuf::from("run.js"));
        assert!(!loc.has_manifest);
    }

    #[test]
    fn test_rejects_metacharacters_even_if_file_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let sneaky = root.join("a;b.js");
        touch(&sneaky);
        for c in SHELL_METACHARACTERS {
            let raw = format!("{}/x{c}y.js", root.display());
            assert!(matches!(
                locate_script(&raw, "js", "package.json"),
                Err(AppError::InvalidPath { .. })
            ));
        }
        assert!(matches!(
            locate_script(sneaky.to_str().unwrap(), "js", "package.json"),
            Err(AppError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_extension_and_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        touch(&root.join("app.py"));

        let err = locate_script(root.join("app.py").to_str().unwrap(), "js", "package.json")
            .unwrap_err();
        assert!(err.to_string().contains(".js"));

        let err = locate_script(root.join("gone.js").to_str().unwrap(), "js", "package.json")
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        assert!(locate_script("", "js", "package.json").is_err());
    }

    #[test]
    fn test_directory_named_like_script_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("dir.js")).unwrap();
        assert!(locate_script(root.join("dir.js").to_str().unwrap(), "js", "package.json").is_err());
    }
}
