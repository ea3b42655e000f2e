use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VeneerError>;

/// Crate-wide error type.
///
/// The enum is `Clone` (host errors are shared behind an `Arc`) because a
/// single failed materialization is reported to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum VeneerError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl VeneerError {
    /// Classify a host error against the logical path it occurred on.
    ///
    /// NotFound, AlreadyExists and PermissionDenied become their dedicated
    /// variants so callers can match on them; everything else stays an IO
    /// error with the host code preserved for diagnostics.
    pub fn from_io(err: std::io::Error, path: impl Into<String>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => VeneerError::NotFound(path.into()),
            std::io::ErrorKind::AlreadyExists => VeneerError::AlreadyExists(path.into()),
            std::io::ErrorKind::PermissionDenied => VeneerError::Permission(path.into()),
            _ => VeneerError::Io(Arc::new(err)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VeneerError::NotFound(_))
    }
}

impl From<std::io::Error> for VeneerError {
    fn from(err: std::io::Error) -> Self {
        VeneerError::Io(Arc::new(err))
    }
}
