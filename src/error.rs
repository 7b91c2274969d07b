//! Error taxonomy for the layout pipeline.
//!
//! Every variant names the stage that failed and the path it was working
//! on. All of them are fatal: tolerated outcomes never become a
//! `LayoutError`, they go through [`crate::build::filesystem::tolerate`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::State;
use crate::stages::Stage;

/// Result alias used by the core stages.
pub type Result<T, E = LayoutError> = std::result::Result<T, E>;

/// Fatal pipeline errors.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// A cardinality or shape check failed before any mutation.
    #[error("[{stage}] invariant violated at '{}': {detail}", path.display())]
    InvariantViolation {
        stage: Stage,
        path: PathBuf,
        detail: String,
    },

    /// A filesystem operation failed.
    #[error("[{stage}] {op} '{}' failed: {source}", path.display())]
    Io {
        stage: Stage,
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The tree already carries the output layout.
    #[error("[{stage}] '{}' is already transformed; rebuild from the raw rootfs", path.display())]
    AlreadyTransformed { stage: Stage, path: PathBuf },

    /// The transformer was driven from a state other than the one required.
    #[error("pipeline is in state {state}, expected {expected}")]
    NotReentrant { state: State, expected: State },
}

impl LayoutError {
    pub(crate) fn io(stage: Stage, op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        LayoutError::Io {
            stage,
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invariant(stage: Stage, path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        LayoutError::InvariantViolation {
            stage,
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Stage that produced the error, if it came from one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            LayoutError::InvariantViolation { stage, .. }
            | LayoutError::Io { stage, .. }
            | LayoutError::AlreadyTransformed { stage, .. } => Some(*stage),
            LayoutError::NotReentrant { .. } => None,
        }
    }
}
