//! # duke-calc
//!
//! Spreadsheet formula evaluation over an in-memory workbook.
//!
//! Formulas are parsed to reverse Polish tokens and evaluated on demand.
//! Results are cached together with the cells each formula read, so after an
//! edit only the formulas that depend on the edited cell are recomputed.
//!
//! ## Example
//!
//! ```rust
//! use duke_calc::prelude::*;
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 2.0).unwrap();
//! sheet.set_cell_value("A2", 3.0).unwrap();
//! sheet.set_cell_formula("A3", "=A1+A2").unwrap();
//!
//! let mut evaluator = FormulaEvaluator::new(workbook);
//! assert_eq!(evaluator.evaluate(0, "A3").unwrap(), ValueEval::Number(5.0));
//!
//! // Edits go through the evaluator so dependent results are cleared
//! evaluator.set_cell_value(0, "A2", 10.0).unwrap();
//! assert_eq!(evaluator.evaluate(0, "A3").unwrap(), ValueEval::Number(12.0));
//! ```

pub mod calculation;
pub mod evaluator;
pub mod prelude;

pub use calculation::{CalculationOptions, CalculationStats, WorkbookCalculationExt};
pub use evaluator::FormulaEvaluator;

// Re-export core types
pub use duke_calc_core::{
    CellAddress, CellError, CellId, CellRange, CellType, CellValue, Error, ExternalLink,
    NameScope, NamedRange, Result, Workbook, Worksheet, MAX_COLS, MAX_ROWS,
};

// Re-export formula engine types
pub use duke_calc_formula::{
    parse, setup_environment, to_formula_string, CellLocation, EvaluationListener,
    EvaluatorOptions, FormulaError, FormulaKind, FormulaResult, FormulaShifter, FunctionRegistry,
    SpreadsheetVersion, Token, ValueEval, WorkbookEvaluator,
};
