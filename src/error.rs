use thiserror::Error;

/// Raised when a user-supplied path or filename fails validation.
///
/// These are never retried and never downgraded: callers surface them
/// verbatim and abort the operation that supplied the input.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("path exceeds {limit} characters")]
    PathTooLong { limit: usize },
    #[error("potential directory traversal detected: {0}")]
    Traversal(String),
    #[error("invalid path: {0}")]
    Unresolvable(String),
    #[error("path outside allowed directory {base}: {path}")]
    OutsideBase { base: String, path: String },
    #[error("path outside current directory not allowed: {0}")]
    OutsideWorkingDir(String),
    #[error("path does not exist: {0}")]
    NotFound(String),
    #[error("import path must be a regular file: {0}")]
    NotAFile(String),
    #[error("import file too large ({size} bytes, max {max})")]
    FileTooLarge { size: u64, max: u64 },
    #[error("invalid filename")]
    InvalidFilename,
    #[error("filename becomes empty after sanitization")]
    EmptyFilename,
}
