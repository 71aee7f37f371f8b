//! # duke-calc-core
//!
//! Storage types consumed by the duke-calc formula engine.
//!
//! This crate provides the cell and document model the engine evaluates over:
//! - [`CellValue`] and [`CellError`] - literal values and error codes
//! - [`CellAddress`] and [`CellRange`] - cell addressing and ranges
//! - [`Cell`] - a stored cell with a stable [`CellId`]
//! - [`Workbook`], [`Worksheet`] - sheets, defined names and external links
//!
//! ## Example
//!
//! ```rust
//! use duke_calc_core::{Workbook, CellValue};
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//!
//! // Using string addresses
//! sheet.set_cell_value("A1", "Hello").unwrap();
//! sheet.set_cell_formula("B1", "=LEN(A1)").unwrap();
//!
//! // Or using row/column indices (0-based)
//! sheet.set_cell_value_at(1, 1, CellValue::Number(3.14)).unwrap();
//! assert_eq!(sheet.get_formula_at(0, 1), Some("LEN(A1)"));
//! ```

pub mod cell;
pub mod error;
pub mod named_range;
pub mod workbook;
pub mod worksheet;

// Re-exports for convenience
pub use cell::{
    date_to_serial, datetime_to_serial, Cell, CellAddress, CellContent, CellError, CellId,
    CellRange, CellType, CellValue, FormulaCell, FormulaSource, SharedString,
};
pub use error::{Error, Result};
pub use named_range::{NameScope, NamedRange, NamedRangeCollection};
pub use workbook::{moved_sheet_index, ExternalLink, Workbook};
pub use worksheet::Worksheet;

/// Maximum number of rows in a worksheet (Excel limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet (Excel limit)
pub const MAX_COLS: u16 = 16_384;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;
