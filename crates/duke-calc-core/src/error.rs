//! Error types for duke-calc-core

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the storage layer
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid cell address format
    #[error("Invalid cell address: {0}")]
    InvalidAddress(String),

    /// Invalid cell range format
    #[error("Invalid cell range: {0}")]
    InvalidRange(String),

    /// Row index out of bounds
    #[error("Row index {0} out of bounds (max: {1})")]
    RowOutOfBounds(u32, u32),

    /// Column index out of bounds
    #[error("Column index {0} out of bounds (max: {1})")]
    ColumnOutOfBounds(u32, u16),

    /// Sheet index out of bounds
    #[error("Sheet index {0} out of bounds (count: {1})")]
    SheetOutOfBounds(usize, usize),

    /// Invalid sheet name
    #[error("Invalid sheet name: {0}")]
    InvalidSheetName(String),

    /// Duplicate sheet name
    #[error("Sheet name already exists: {0}")]
    DuplicateSheetName(String),

    /// Invalid or duplicate defined name
    #[error("Invalid named range: {0}")]
    InvalidName(String),

    /// External workbook link registered twice
    #[error("External link already exists: {0}")]
    DuplicateExternalLink(String),

    /// Operation on a cell that belongs to an array or shared formula group
    #[error("Cell {0} is part of a formula group")]
    FormulaGroupConflict(String),

    /// A formula operation on a cell that holds no formula
    #[error("Cell {0} does not contain a formula")]
    NotAFormula(String),

    /// A group operation on a cell outside any array or shared formula
    #[error("Cell {0} is not part of a formula group")]
    NotInFormulaGroup(String),

    /// No stored cell at the address
    #[error("Cell {0} is empty")]
    EmptyCell(String),
}
