//! Error types for Noodle Pack

use std::fmt;

use thiserror::Error;

/// Errors that can occur while compressing or rehydrating a session
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Session has no time-series rows: {0}")]
    EmptySession(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Artifact schema error: {0}")]
    Schema(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
}

impl CodecError {
    /// How a batch runner should classify this failure.
    pub fn disposition(&self) -> Disposition {
        match self {
            CodecError::EmptySession(_) => Disposition::Skipped,
            _ => Disposition::Error,
        }
    }
}

/// Batch-level classification of a per-file failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Skipped,
    Error,
}

/// Non-fatal disagreement between an artifact and its sidecar.
///
/// These never abort decoding; they are rendered into
/// `rehydration_metadata.warnings`.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMismatchWarning {
    RowCount { parquet: usize, meta: u64 },
    FieldList { parquet: Vec<String>, meta: Vec<String> },
    UnknownColumn(String),
    SidecarUnreadable(String),
}

impl fmt::Display for SchemaMismatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMismatchWarning::RowCount { parquet, meta } => {
                write!(f, "Row count mismatch (parquet: {parquet}, meta: {meta})")
            }
            SchemaMismatchWarning::FieldList { parquet, meta } => write!(
                f,
                "Field list mismatch (parquet: [{}], meta: [{}])",
                parquet.join(", "),
                meta.join(", ")
            ),
            SchemaMismatchWarning::UnknownColumn(name) => {
                write!(f, "Unrecognized column '{name}' ignored")
            }
            SchemaMismatchWarning::SidecarUnreadable(reason) => {
                write!(f, "Sidecar metadata unreadable: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_count_warning_text() {
        let warning = SchemaMismatchWarning::RowCount {
            parquet: 9,
            meta: 10,
        };
        assert_eq!(warning.to_string(), "Row count mismatch (parquet: 9, meta: 10)");
    }

    #[test]
    fn test_empty_session_is_skipped() {
        let err = CodecError::EmptySession("a.json".to_string());
        assert_eq!(err.disposition(), Disposition::Skipped);

        let err = CodecError::Encoding("overflow".to_string());
        assert_eq!(err.disposition(), Disposition::Error);
    }
}
