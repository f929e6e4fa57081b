// ⚠️ Error types
// Row-level problems are recoverable (the row is skipped and counted).
// File and store problems go through anyhow at the boundaries.

use thiserror::Error;

// ============================================================================
// ROW ERRORS
// ============================================================================

/// Why a single export row was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("line {line}: missing value for '{field}'")]
    MissingField { line: u64, field: &'static str },

    #[error("line {line}: '{value}' is not a valid number for '{field}'")]
    InvalidNumber {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: '{value}' is not a valid date for '{field}'")]
    InvalidDate {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: unreadable row ({message})")]
    Unreadable { line: u64, message: String },
}

impl RowError {
    pub fn line(&self) -> u64 {
        match self {
            RowError::MissingField { line, .. }
            | RowError::InvalidNumber { line, .. }
            | RowError::InvalidDate { line, .. }
            | RowError::Unreadable { line, .. } => *line,
        }
    }
}

// ============================================================================
// EXPORT ERRORS
// ============================================================================

/// File-level problems with an export; fatal to the run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("{export} export is missing required column '{field}' (looked for: {aliases})")]
    MissingColumn {
        export: &'static str,
        field: &'static str,
        aliases: String,
    },

    #[error("{export} export has no header row")]
    NoHeader { export: &'static str },
}

// ============================================================================
// CONFIG ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no publications configured")]
    NoPublications,

    #[error("top_rates must be greater than zero")]
    ZeroTopRates,

    #[error("active_status must not be empty")]
    EmptyActiveStatus,

    #[error("no header aliases configured for {export} field '{field}'")]
    EmptyAliases { export: &'static str, field: &'static str },
}
