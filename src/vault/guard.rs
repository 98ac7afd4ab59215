use crate::error::SecurityError;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Longest accepted user-supplied path, in characters.
pub const MAX_PATH_CHARS: usize = 1000;

/// Hard cap on import file size. Anything larger is refused before the
/// import pipeline opens it.
pub const MAX_IMPORT_FILE_BYTES: u64 = 1024 * 1024 * 1024;

pub const MAX_FILENAME_LEN: usize = 255;

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// How a user-supplied path is allowed to resolve.
#[derive(Debug, Clone)]
pub struct PathRules {
    /// Resolved path must fall inside this directory when set.
    pub base_dir: Option<PathBuf>,
    /// Permit paths that resolve outside the current working directory.
    pub allow_absolute: bool,
    /// Fail with a not-found error when the target is absent.
    pub must_exist: bool,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            base_dir: None,
            allow_absolute: true,
            must_exist: false,
        }
    }
}

impl PathRules {
    pub fn anywhere() -> Self {
        Self::default()
    }

    pub fn existing_anywhere() -> Self {
        Self {
            must_exist: true,
            ..Self::default()
        }
    }
}

/// Traversal patterns are rejected on the raw input, before any
/// resolution, so a hostile string never reaches the filesystem layer.
fn has_traversal_pattern(input: &str) -> bool {
    let normalized = input.replace('\\', "/");
    normalized.contains("../") || normalized.ends_with("/..")
}

/// Collapse `.` and `..` components without touching the filesystem.
/// Used for targets that do not exist yet and therefore cannot be
/// canonicalized.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn resolve(path: &Path) -> Result<PathBuf, SecurityError> {
    if path.exists() {
        return fs::canonicalize(path).map_err(|err| SecurityError::Unresolvable(err.to_string()));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd =
            env::current_dir().map_err(|err| SecurityError::Unresolvable(err.to_string()))?;
        cwd.join(path)
    };
    Ok(normalize_lexically(&absolute))
}

/// Validate a user-supplied path against `rules` and return its canonical,
/// symlink-free form.
pub fn validate_path(input: &str, rules: &PathRules) -> Result<PathBuf, SecurityError> {
    if input.chars().count() > MAX_PATH_CHARS {
        return Err(SecurityError::PathTooLong {
            limit: MAX_PATH_CHARS,
        });
    }
    if has_traversal_pattern(input) {
        return Err(SecurityError::Traversal(input.to_string()));
    }

    let resolved = resolve(Path::new(input))?;

    if !rules.allow_absolute {
        let cwd =
            env::current_dir().map_err(|err| SecurityError::Unresolvable(err.to_string()))?;
        let cwd = fs::canonicalize(&cwd).unwrap_or(cwd);
        if !resolved.starts_with(&cwd) {
            return Err(SecurityError::OutsideWorkingDir(
                resolved.display().to_string(),
            ));
        }
    }

    if let Some(base) = &rules.base_dir {
        let base = resolve(base)?;
        if !resolved.starts_with(&base) {
            return Err(SecurityError::OutsideBase {
                base: base.display().to_string(),
                path: resolved.display().to_string(),
            });
        }
    }

    if rules.must_exist && !resolved.exists() {
        return Err(SecurityError::NotFound(resolved.display().to_string()));
    }

    Ok(resolved)
}

/// Rewrite `name` into a form safe to hand to the filesystem.
///
/// Characters outside `[A-Za-z0-9_.\- ]` become `_`, leading/trailing dots
/// and spaces are stripped, OS device names get a `file_` prefix, and the
/// result is truncated to `max_len` keeping a trailing extension intact.
pub fn sanitize_filename(name: &str, max_len: usize) -> Result<String, SecurityError> {
    if name.is_empty() {
        return Err(SecurityError::InvalidFilename);
    }

    let replaced: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();

    let mut sanitized = replaced.trim_matches(['.', ' ']).to_string();

    if RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| sanitized.eq_ignore_ascii_case(reserved))
    {
        sanitized = format!("file_{sanitized}");
    }

    if sanitized.len() > max_len {
        // The sanitized name is pure ASCII, so byte truncation is safe.
        sanitized = match sanitized.rsplit_once('.') {
            Some((stem, ext)) if !ext.is_empty() => {
                let keep = max_len.saturating_sub(ext.len() + 1);
                format!("{}.{ext}", &stem[..keep.min(stem.len())])
            }
            _ => sanitized[..max_len].to_string(),
        };
    }

    if sanitized.is_empty() {
        return Err(SecurityError::EmptyFilename);
    }
    Ok(sanitized)
}

/// Validate a path selected for import: it must exist, be a regular file,
/// and stay under [`MAX_IMPORT_FILE_BYTES`].
pub fn validate_import_path(input: &str) -> Result<PathBuf, SecurityError> {
    let path = validate_path(input, &PathRules::existing_anywhere())?;

    let meta =
        fs::metadata(&path).map_err(|err| SecurityError::Unresolvable(err.to_string()))?;
    if !meta.is_file() {
        return Err(SecurityError::NotAFile(path.display().to_string()));
    }
    if meta.len() > MAX_IMPORT_FILE_BYTES {
        return Err(SecurityError::FileTooLarge {
            size: meta.len(),
            max: MAX_IMPORT_FILE_BYTES,
        });
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_patterns_are_rejected_before_resolution() {
        let rules = PathRules::anywhere();
        for input in ["../../etc/passwd", "a/../b", "dir/..", "..\\windows", "../x"] {
            let err = validate_path(input, &rules).unwrap_err();
            assert!(matches!(err, SecurityError::Traversal(_)), "{input}");
        }
    }

    #[test]
    fn plain_relative_name_is_accepted() {
        let got = validate_path("notes.json", &PathRules::anywhere()).expect("valid path");
        assert!(got.is_absolute());
        assert!(got.ends_with("notes.json"));
    }

    #[test]
    fn oversized_path_is_rejected() {
        let long = "a".repeat(MAX_PATH_CHARS + 1);
        let err = validate_path(&long, &PathRules::anywhere()).unwrap_err();
        assert!(matches!(err, SecurityError::PathTooLong { .. }));
    }

    #[test]
    fn must_exist_reports_not_found() {
        let rules = PathRules::existing_anywhere();
        let err = validate_path("definitely_missing_902813.json", &rules).unwrap_err();
        assert!(matches!(err, SecurityError::NotFound(_)));
    }

    #[test]
    fn base_dir_containment_is_enforced() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let inside = tmp.path().join("inner.json");
        std::fs::write(&inside, "{}").expect("write");

        let rules = PathRules {
            base_dir: Some(tmp.path().to_path_buf()),
            allow_absolute: true,
            must_exist: true,
        };
        validate_path(inside.to_str().unwrap(), &rules).expect("inside base");

        let err = validate_path("/etc/hosts", &rules).unwrap_err();
        assert!(matches!(err, SecurityError::OutsideBase { .. }));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(
            sanitize_filename("test<>file.txt", MAX_FILENAME_LEN).unwrap(),
            "test__file.txt"
        );
        assert_eq!(
            sanitize_filename("..hidden. ", MAX_FILENAME_LEN).unwrap(),
            "hidden"
        );
    }

    #[test]
    fn sanitize_prefixes_reserved_device_names() {
        assert_eq!(sanitize_filename("CON", MAX_FILENAME_LEN).unwrap(), "file_CON");
        assert_eq!(
            sanitize_filename("lpt9", MAX_FILENAME_LEN).unwrap(),
            "file_lpt9"
        );
    }

    #[test]
    fn sanitize_truncation_keeps_extension() {
        let long = format!("{}.json", "x".repeat(300));
        let got = sanitize_filename(&long, 32).unwrap();
        assert_eq!(got.len(), 32);
        assert!(got.ends_with(".json"));
    }

    #[test]
    fn sanitize_rejects_names_that_vanish() {
        let err = sanitize_filename("...", MAX_FILENAME_LEN).unwrap_err();
        assert!(matches!(err, SecurityError::EmptyFilename));
    }

    #[test]
    fn import_path_rejects_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = validate_import_path(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SecurityError::NotAFile(_)));
    }
}
