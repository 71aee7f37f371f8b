//! Formula error types
//!
//! Spreadsheet errors such as `#DIV/0!` are values, not `Err`s. The variants
//! here are for malformed input and engine failures.

use std::fmt;

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// A formula text that does not follow the grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// Character offset where the problem was noticed
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at position {})", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

/// Errors that can occur during formula parsing or evaluation
#[derive(Debug, Error)]
pub enum FormulaError {
    /// Formula parse error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A formula refers to a workbook that is not part of the environment
    #[error("Could not resolve external workbook name '{0}'")]
    WorkbookNotFound(String),

    /// Engine bookkeeping went wrong; the evaluation is abandoned
    #[error("Internal error: {0}")]
    Internal(String),

    /// The same workbook name was given twice when setting up an environment
    #[error("Duplicate workbook name '{0}'")]
    DuplicateWorkbookName(String),

    /// An environment was set up without any workbook
    #[error("An evaluation environment needs at least one workbook")]
    EmptyEnvironment,

    /// More than one evaluator joining an environment had a listener
    #[error("Evaluators joining one environment carry different listeners")]
    ConflictingListeners,

    /// No workbook with that name in the environment
    #[error("Unknown workbook '{0}'")]
    UnknownWorkbook(String),

    /// No stored cell at the given location
    #[error("No cell at sheet {sheet} row {row} column {col}")]
    UnknownCell { sheet: usize, row: u32, col: u16 },

    /// Storage error
    #[error(transparent)]
    Core(#[from] duke_calc_core::Error),
}

impl FormulaError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        FormulaError::Internal(msg.into())
    }
}
