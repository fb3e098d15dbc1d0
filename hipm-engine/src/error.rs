//! Error types for hipm-engine
//!
//! `JobError` is the failure taxonomy recorded on batch jobs. Geometry edge
//! cases (degenerate lines, missing landmarks) are not errors: they surface
//! as absent metric values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::JobState;
use crate::segmentation::HipLabel;

/// Structurally invalid segmentation input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentationError {
    /// A contour cannot define a line or shape
    #[error("{label:?} contour has {got} points, at least {needed} required")]
    TooFewPoints {
        label: HipLabel,
        needed: usize,
        got: usize,
    },

    /// Provider returned no frames at all
    #[error("provider returned no frames")]
    NoFrames,
}

/// Failure raised by a segmentation provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Failed(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid segmentation document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("provider not registered: {0}")]
    NotRegistered(String),
}

/// Batch job failure kinds
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum JobError {
    /// Bad or insufficient contour, or malformed provider output
    #[error("Malformed segmentation: {0}")]
    MalformedSegmentation(String),

    /// External model failed
    #[error("Plugin error: {0}")]
    PluginError(String),

    /// Attempt exceeded its time budget (milliseconds)
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Orchestrator misuse
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    /// Cooperative cancellation observed at a checkpoint
    #[error("Cancelled")]
    Cancelled,
}

/// Discriminant of `JobError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    MalformedSegmentation,
    PluginError,
    Timeout,
    InvalidTransition,
    Cancelled,
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::MalformedSegmentation(_) => JobErrorKind::MalformedSegmentation,
            JobError::PluginError(_) => JobErrorKind::PluginError,
            JobError::Timeout(_) => JobErrorKind::Timeout,
            JobError::InvalidTransition { .. } => JobErrorKind::InvalidTransition,
            JobError::Cancelled => JobErrorKind::Cancelled,
        }
    }

    /// Only external failures count against the retry budget
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            JobErrorKind::PluginError | JobErrorKind::Timeout => true,
            JobErrorKind::MalformedSegmentation
            | JobErrorKind::InvalidTransition
            | JobErrorKind::Cancelled => false,
        }
    }
}

/// Job registry misuse
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// The job is owned by a worker
    #[error("job is running: {0}")]
    Running(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl From<SegmentationError> for JobError {
    fn from(err: SegmentationError) -> Self {
        JobError::MalformedSegmentation(err.to_string())
    }
}

impl From<ProviderError> for JobError {
    fn from(err: ProviderError) -> Self {
        JobError::PluginError(err.to_string())
    }
}
