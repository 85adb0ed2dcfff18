use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the processing engine.
///
/// Per-feature errors are caught at the call site and logged as warnings; per-file
/// errors abort the current file but not the batch. Only [`CgtError::InvalidArguments`]
/// and an I/O failure opening the very first input are process-fatal.
#[derive(Debug, Error)]
pub enum CgtError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document at {path}: {message}")]
    MalformedDocument { path: PathBuf, message: String },

    #[error("unsupported namespace `{uri}` in {path}, content skipped")]
    UnsupportedNamespace { path: PathBuf, uri: String },

    #[error("no CRS resolvable for geometry `{geometry_id}` and no fallback configured")]
    MissingCrs { geometry_id: String },

    #[error("reprojection failed for feature `{feature_id}`: {message}")]
    ReprojectionFailed { feature_id: String, message: String },

    #[error("texture clipping failed for target `{target}`: {message}")]
    TextureClippingFailed { target: String, message: String },

    #[error("upgrade failed for feature `{feature_id}`: {message}")]
    UpgradeFailed { feature_id: String, message: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("aborted: {0}")]
    Aborted(String),
}

impl CgtError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CgtError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CgtError::MalformedDocument {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error kind is scoped to a single feature (caught, logged, and
    /// skipped by the driver) rather than aborting the whole file.
    pub fn is_per_feature(&self) -> bool {
        matches!(
            self,
            CgtError::ReprojectionFailed { .. }
                | CgtError::TextureClippingFailed { .. }
                | CgtError::UpgradeFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CgtError>;
