//! Error types for tagfs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous name '{name}': matches {} files", hashes.len())]
    AmbiguousName { name: String, hashes: Vec<String> },

    #[error("Already linked with different content: {}", .0.display())]
    AlreadyLinked(PathBuf),

    #[error("Store inconsistency: {0}")]
    StoreInconsistency(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TagError {
    /// Narrowest errno for answering a FUSE request with this error.
    pub fn errno(&self) -> i32 {
        match self {
            TagError::NotFound(_) => libc::ENOENT,
            TagError::AlreadyLinked(_) => libc::EEXIST,
            TagError::InvalidName(_) => libc::EINVAL,
            TagError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => libc::ENOENT,
                std::io::ErrorKind::PermissionDenied => libc::EACCES,
                _ => e.raw_os_error().unwrap_or(libc::EIO),
            },
            _ => libc::EIO,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == libc::ENOENT
    }
}

pub type Result<T> = std::result::Result<T, TagError>;
