use crate::pipeline::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DreError {
    #[error("Invalid currency format '{value}': {reason}. Expected format: 'R$ 1.234,56' or '-R$ 1.234,56'")]
    InvalidFormat { value: String, reason: String },

    #[error("Expected {expected} value, got {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("Unknown month abbreviation: '{value}'. Valid abbreviations are: {valid:?}")]
    UnknownMonth { value: String, valid: Vec<String> },

    #[error("Month string cannot be empty")]
    EmptyMonth,

    #[error("Month value is missing")]
    InvalidMonth,

    #[error("Date calculation error: {0}")]
    InvalidDate(String),

    #[error("Missing required columns: {missing:?}. Available columns: {available:?}")]
    MissingColumns {
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("The input contains no data rows after the header")]
    EmptyInput,

    #[error("Category hierarchy cannot be empty")]
    EmptyHierarchy,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Month(s) {0:?} already exist in the narrative report")]
    DuplicatePeriods(Vec<String>),

    #[error("{stage} stage failed{}: {source}", row.map(|r| format!(" at row {}", r)).unwrap_or_default())]
    Stage {
        stage: Stage,
        row: Option<usize>,
        #[source]
        source: Box<DreError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DreError {
    /// Wraps an error with the stage (and row, when known) that produced it.
    pub fn at_stage(self, stage: Stage, row: Option<usize>) -> Self {
        DreError::Stage {
            stage,
            row,
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, unwrapping stage context.
    pub fn root(&self) -> &DreError {
        match self {
            DreError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, DreError>;
