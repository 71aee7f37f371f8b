//! # duke-calc-formula
//!
//! Formula engine for duke-calc.
//!
//! This crate provides:
//! - Formula parsing (text → reverse Polish tokens) and rendering back to text
//! - Operand class assignment (reference, value, array)
//! - Reference shifting for row moves, row copies and sheet moves
//! - An evaluator with a dependency-aware result cache and cycle detection
//! - Evaluation across collaborating workbooks
//! - Built-in Excel functions and user-defined functions
//!
//! ## Example
//!
//! ```rust
//! use duke_calc_core::Workbook;
//! use duke_calc_formula::{ValueEval, WorkbookEvaluator};
//!
//! let mut wb = Workbook::new();
//! let ws = wb.worksheet_mut(0).unwrap();
//! ws.set_cell_value("A1", 5.0).unwrap();
//! ws.set_cell_formula("B1", "A1*2+2").unwrap();
//!
//! let mut evaluator = WorkbookEvaluator::new(wb);
//! assert_eq!(evaluator.evaluate(0, 0, 1).unwrap(), ValueEval::Number(12.0));
//! ```

pub mod blank;
pub mod cache;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod listener;
pub mod operand_class;
pub mod operators;
pub mod parse_node;
pub mod parser;
pub mod render;
pub mod shared_formula;
pub mod shifter;
pub mod token;
pub mod tracker;
pub mod value;
pub mod version;
pub mod workbook;

pub use cache::{CellLocation, EvaluationCache};
pub use environment::{setup_environment, CollaboratingWorkbooksEnvironment};
pub use error::{FormulaError, FormulaResult, ParseError};
pub use evaluator::{EvaluatorOptions, WorkbookEvaluator};
pub use functions::{FunctionDef, FunctionRegistry};
pub use listener::EvaluationListener;
pub use parser::{parse, FormulaKind};
pub use render::to_formula_string;
pub use shifter::FormulaShifter;
pub use token::{OperandClass, Operator, Token};
pub use value::{OperationContext, ValueEval};
pub use version::SpreadsheetVersion;
pub use workbook::{
    EvaluationCell, EvaluationSheet, EvaluationWorkbook, FormulaParsingWorkbook,
    FormulaRenderingWorkbook, ResultWritingWorkbook,
};
