//! Error types for the update path.
//!
//! Every variant is recoverable: the coordinator turns them into a single
//! user-visible error and returns to a state from which the user can retry.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update server request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid release feed: {0}")]
    Feed(String),

    #[error("invalid version {version:?}: {source}")]
    Version {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sha512 checksum mismatch, expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("no update has been downloaded")]
    NothingStaged,

    #[error("failed to launch installer {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<serde_yaml::Error> for UpdateError {
    fn from(e: serde_yaml::Error) -> Self {
        UpdateError::Feed(e.to_string())
    }
}
