//
// error.rs
// Odf-Tools-rs
//
// Typed failures raised by the conversion core; the CLI wraps them with anyhow context.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// A required matrix is absent from a fib or geometry table file.
    #[error("missing required matrix `{key}`")]
    MissingKey { key: String },

    #[error("matrix `{key}` is malformed: {reason}")]
    MalformedMatrix { key: String, reason: String },

    /// Two collections that must line up element by element do not.
    #[error("{what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    /// Mask and amplitude volumes disagree on grid or orientation.
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("mask has no foreground voxels")]
    EmptyMask,

    #[error("unknown ODF discretization `{name}`")]
    UnknownDiscretization { name: String },

    #[error("failed to launch `{tool}`")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{tool}` exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("`{tool}` did not finish within {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    /// The tool reported success but its declared output never appeared.
    #[error("`{tool}` did not create {path}")]
    ToolOutputMissing { tool: String, path: PathBuf },

    /// The conversion was abandoned before it finished.
    #[error("conversion cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Background(#[from] tokio::task::JoinError),

    #[error("invalid MATLAB v4 file: {0}")]
    MatFormat(String),

    #[error(transparent)]
    Nifti(#[from] nifti::error::NiftiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub(crate) fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConvertError::MalformedMatrix {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(what: impl Into<String>, expected: usize, found: usize) -> Self {
        ConvertError::ShapeMismatch {
            what: what.into(),
            expected,
            found,
        }
    }
}
