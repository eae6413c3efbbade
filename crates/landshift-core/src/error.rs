//! Error taxonomy.
//!
//! `PipelineError` is fatal: configuration and data problems that every class
//! depends on, so the run aborts before (or instead of) modeling.
//! `ClassError` is local to one class: the class is recorded as failed and the
//! remaining classes proceed.
use serde::Serialize;
use thiserror::Error;

use crate::legend::{ClassId, RawCode};

/// Fatal, run-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raw land-cover codes observed in the input rasters with no legend entry.
    #[error("legend has no entry for observed raw code(s) {codes:?}")]
    UnmappedCode { codes: Vec<RawCode> },

    /// One raw code declared twice with different simplified classes.
    #[error("raw code {code} is mapped to both class {first} and class {second}")]
    AmbiguousMapping {
        code: RawCode,
        first: ClassId,
        second: ClassId,
    },

    /// An option value outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No valid rows survived masking, nodata removal, sampling and filtering.
    #[error("feature matrix is empty: {0}")]
    EmptyDataset(String),

    /// A layer does not share the canonical frame.
    #[error("layer `{layer}` does not match the canonical frame: {detail}")]
    SchemaMismatch { layer: String, detail: String },
}

/// Per-class failures. Recorded in the validation table, never raised past
/// the pipeline.
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassError {
    /// The training partition holds only one label value.
    #[error(
        "class {class}: training partition has only {present} labels ({n_rows} rows){}",
        note_suffix(.note)
    )]
    DegenerateClass {
        class: ClassId,
        present: String,
        n_rows: usize,
        /// Why the labels collapsed, when the cause is known.
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    /// Fewer positive transitions than the configured minimum.
    #[error("class {class}: {positives} positive transitions, need at least {required}")]
    InsufficientPositives {
        class: ClassId,
        positives: usize,
        required: usize,
    },

    /// Hyperparameter search produced no scorable candidate.
    #[error("class {class}: hyperparameter search found no scorable candidate")]
    SearchFailed { class: ClassId },

    /// The estimator rejected its input.
    #[error("class {class}: model fit failed: {message}")]
    Fit { class: ClassId, message: String },
}

impl ClassError {
    pub fn class(&self) -> ClassId {
        match self {
            ClassError::DegenerateClass { class, .. }
            | ClassError::InsufficientPositives { class, .. }
            | ClassError::SearchFailed { class }
            | ClassError::Fit { class, .. } => *class,
        }
    }
}

fn note_suffix(note: &Option<String>) -> String {
    note.as_deref().map(|n| format!(": {n}")).unwrap_or_default()
}

/// Estimator misuse.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForestError {
    #[error("cannot fit on an empty dataset")]
    EmptyInput,
    #[error("row {row} has {found} features, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("{rows} feature rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("invalid hyperparameter: {0}")]
    InvalidParams(String),
    #[error("row has {found} features, model was fit on {expected}")]
    FeatureCount { found: usize, expected: usize },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
