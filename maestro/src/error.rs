use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaestroError {
    /// naming policy or ownership rule broken by the caller
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// command template lacks a required placeholder
    #[error("Invalid command template: {0}")]
    Template(String),
    #[error("Illegal state: {0}")]
    State(String),
    #[error("Database operation failed: {0}")]
    Persistence(#[source] rusqlite::Error),
    #[error("Storage operation on {path:?} failed: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MaestroError {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// true when a storage failure only reports that the target is already gone
    pub fn is_missing_path(&self) -> bool {
        matches!(self, Self::Storage { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, MaestroError>;
