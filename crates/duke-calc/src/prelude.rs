//! Prelude module for convenient imports
//!
//! ```rust
//! use duke_calc::prelude::*;
//! ```

pub use crate::calculation::{CalculationOptions, CalculationStats, WorkbookCalculationExt};
pub use crate::evaluator::FormulaEvaluator;
pub use crate::{
    CellAddress, CellError, CellRange, CellType, CellValue, EvaluatorOptions, FormulaError,
    FormulaResult, ValueEval, Workbook, Worksheet,
};
