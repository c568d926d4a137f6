//! Failures while reading boundary or statistic sources.
//!
//! Only these two conditions block a layer. Key mismatches and missing fields
//! are not errors; see [`crate::processing::JoinReport`].

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type LoadResult<T> = Result<T, LoadError>;

#[derive(Error, Debug)]
pub enum LoadError {
    /// File missing, permission denied, or any other I/O failure
    #[error("cannot read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source was read but could not be parsed
    #[error("malformed source {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn unreadable(path: &Path, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn malformed<E: std::fmt::Display>(path: &Path, reason: E) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Unreadable { path, .. } | Self::Malformed { path, .. } => path,
        }
    }
}
