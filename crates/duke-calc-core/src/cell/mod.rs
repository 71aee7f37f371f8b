//! Cell-related types
//!
//! - [`CellValue`] and [`CellError`] - literal values and error codes
//! - [`CellAddress`] and [`CellRange`] - locations
//! - [`Cell`] - a stored cell with a stable [`CellId`]

mod address;
mod storage;
mod value;

pub use address::{CellAddress, CellRange};
pub use storage::{Cell, CellContent, CellId, FormulaCell, FormulaSource};
pub use value::{date_to_serial, datetime_to_serial, CellError, CellType, CellValue, SharedString};
