//! Persistent storage
//!
//! This module handles persistence of user settings.

pub mod settings;

use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

/// Errors raised while reading or writing stored data
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not determine a data directory for this platform")]
    NoDataDir,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-user data directory (e.g. `~/.local/share/localchat` on Linux)
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("", "", "localchat")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
