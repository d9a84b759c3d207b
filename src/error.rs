//! Error types for the VRM viewer

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for the viewer
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Instance error: {0}")]
    Instance(#[from] InstanceError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Window error: {0}")]
    Window(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Single-instance lock and forwarding errors
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Failed to acquire instance endpoint {endpoint}: {message}")]
    Acquire { endpoint: String, message: String },

    #[error("Failed to forward launch to running instance: {0}")]
    Forward(String),

    #[error("Malformed instance message: {0}")]
    Protocol(String),
}

/// Everything that can go wrong between "open this" and "model attached".
///
/// I/O failures and decode failures are kept apart so the status line can say
/// which one happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Failed to read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("Malformed model file: {0}")]
    MalformedPayload(String),

    #[error("Unsupported model feature: {0}")]
    UnsupportedFeature(String),

    #[error("Shell is no longer serving requests")]
    ShellUnavailable,
}

impl LoadError {
    /// Classify an I/O failure for `path`.
    pub fn from_io(path: &Path, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                LoadError::PermissionDenied(path.to_path_buf())
            }
            _ => LoadError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }

    /// True for failures that happened before any bytes were decoded.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            LoadError::NotFound(_)
                | LoadError::PermissionDenied(_)
                | LoadError::Io { .. }
                | LoadError::ShellUnavailable
        )
    }
}

/// Result type alias for viewer operations
pub type Result<T> = std::result::Result<T, ViewerError>;
