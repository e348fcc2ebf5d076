/// Seams to the outside world: the vision-model scorer and the photo validator.
///
/// The core never looks inside a scorer. It hands over a path, the frozen
/// criteria prompt and a time budget, and gets back either an evaluation or a
/// `ScorerError` that the classifier turns into a failure kind.
use crate::types::{PhotoEvaluation, SetEvaluation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::classifier::ErrorKind;

/// Error surfaced by a scorer adapter.
#[derive(Debug, Error)]
pub enum ScorerError {
    /// The request did not finish within its budget.
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),

    /// The scoring backend itself could not be reached. Fatal for the run.
    #[error("scoring backend unreachable: {0}")]
    Unreachable(String),

    /// Anything else; classified by inspecting the error chain.
    #[error("{0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ScorerError {
    pub fn failed(message: impl Into<String>) -> Self {
        ScorerError::Failed(message.into().into())
    }
}

/// Scores a single photo against the criteria prompt.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn analyze(
        &self,
        photo: &Path,
        criteria_prompt: &str,
        timeout: Duration,
    ) -> Result<PhotoEvaluation, ScorerError>;
}

/// Scores a candidate set as a whole (exhibition cohesion, sequencing, ...).
#[async_trait]
pub trait SetScorer: Send + Sync {
    async fn evaluate_set(
        &self,
        photos: &[PathBuf],
        set_prompt: &str,
        timeout: Duration,
    ) -> Result<SetEvaluation, ScorerError>;
}

/// Why a photo was rejected before reaching the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    /// Detected MIME type, e.g. "image/jpeg".
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Result of the cheap pre-filter run before the expensive scorer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub error: Option<ValidationFailure>,
    pub warning: Option<String>,
    pub metadata: Option<PhotoMetadata>,
}

impl ValidationReport {
    pub fn ok(metadata: PhotoMetadata) -> Self {
        ValidationReport { valid: true, error: None, warning: None, metadata: Some(metadata) }
    }

    pub fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        ValidationReport {
            valid: false,
            error: Some(ValidationFailure { kind, message: message.into() }),
            warning: None,
            metadata: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

#[async_trait]
pub trait PhotoValidator: Send + Sync {
    async fn validate(&self, photo: &Path) -> ValidationReport;
}
