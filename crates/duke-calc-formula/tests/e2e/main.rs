//! End-to-end tests for duke-calc-formula.
//!
//! Each test builds the workbook it needs in memory, evaluates through a
//! [`WorkbookEvaluator`](duke_calc_formula::WorkbookEvaluator), edits cells
//! the way an application would and checks what the next evaluation sees.

mod common;
mod invalidation;
mod listener;
mod roundtrip;
mod scenarios;
mod shifting;

pub use common::*;
