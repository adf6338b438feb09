use lmsft_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

pub type PrepResult<T> = std::result::Result<T, PrepError>;

/// Stage-level failures.
///
/// Which of these abort a run depends on where they surface: a `FetchFailed`
/// `MissingSource` or `AllRecordsDropped` only removes one dataset, while `Config` and
/// `EmptyCorpus` stop the pipeline.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fetch failed for {identifier}: {reason}")]
    FetchFailed { identifier: String, reason: String },

    #[error("no normalizer registered for dataset {0}")]
    UnmappedDataset(String),

    #[error("raw source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("required input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("all {records_read} records were dropped ({reasons})")]
    AllRecordsDropped { records_read: usize, reasons: String },

    #[error("corpus is empty after filtering; refusing to write degenerate splits")]
    EmptyCorpus,

    #[error("template validation failed: {0}")]
    TemplateValidation(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Why a single raw record was dropped. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("unmappable role label '{0}'")]
    UnmappableRole(String),

    #[error("consecutive assistant turns at message {0}")]
    ConsecutiveAssistant(usize),

    #[error("conversation has no messages")]
    Empty,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl RecordError {
    /// Short stable key used when tallying drop reasons.
    #[must_use]
    pub fn reason_key(&self) -> &'static str {
        match self {
            Self::UnmappableRole(_) => "unmappable_role",
            Self::ConsecutiveAssistant(_) => "consecutive_assistant",
            Self::Empty => "empty",
            Self::MissingField(_) => "missing_field",
            Self::Malformed(_) => "malformed",
        }
    }
}
