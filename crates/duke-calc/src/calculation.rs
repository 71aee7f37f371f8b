//! Workbook calculation
//!
//! Computes every formula in a workbook and stores the results in the
//! cells, so that a workbook can be saved or displayed with current values.
//!
//! # Example
//!
//! ```rust
//! use duke_calc::prelude::*;
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 10.0).unwrap();
//! sheet.set_cell_value("A2", 20.0).unwrap();
//! sheet.set_cell_formula("A3", "=A1+A2").unwrap();
//!
//! let stats = workbook.calculate().unwrap();
//! assert_eq!(stats.cells_calculated, 1);
//! assert_eq!(workbook.worksheet(0).unwrap().get_value("A3").unwrap(), CellValue::Number(30.0));
//! ```

use std::sync::Arc;

use duke_calc_core::{CellAddress, CellError, Workbook};
use duke_calc_formula::{
    EvaluationWorkbook, EvaluatorOptions, FormulaError, FormulaResult, FunctionRegistry, Token,
    ValueEval, WorkbookEvaluator,
};

use crate::evaluator::FormulaEvaluator;

/// Options for workbook calculation
#[derive(Debug, Clone, Copy)]
pub struct CalculationOptions {
    /// Recalculate every formula, even those with a stored result
    pub force_full_calculation: bool,
    /// Recalculate formulas that call volatile functions (NOW, TODAY, RAND)
    pub calculate_volatile: bool,
    /// Options for the evaluator that does the work
    pub evaluator: EvaluatorOptions,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            force_full_calculation: true,
            calculate_volatile: true,
            evaluator: EvaluatorOptions::default(),
        }
    }
}

/// Statistics from a calculation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalculationStats {
    /// Total number of formula cells
    pub formula_count: usize,
    /// Number of cells calculated
    pub cells_calculated: usize,
    /// Number of formulas found to depend on themselves
    pub circular_references: usize,
    /// Number of cells calling volatile functions
    pub volatile_cells: usize,
    /// Number of formulas that failed or produced an error value
    pub errors: usize,
}

/// Extension trait adding calculation to workbooks
pub trait WorkbookCalculationExt {
    /// Calculate all formulas with default options
    fn calculate(&mut self) -> FormulaResult<CalculationStats> {
        self.calculate_with_options(&CalculationOptions::default())
    }

    /// Calculate all formulas with custom options
    fn calculate_with_options(
        &mut self,
        options: &CalculationOptions,
    ) -> FormulaResult<CalculationStats>;
}

impl WorkbookCalculationExt for Workbook {
    fn calculate_with_options(
        &mut self,
        options: &CalculationOptions,
    ) -> FormulaResult<CalculationStats> {
        let workbook = std::mem::take(self);
        let mut evaluator = WorkbookEvaluator::with_registry(
            workbook,
            Arc::new(FunctionRegistry::new()),
            options.evaluator,
        );
        let result = calculate_all(&mut evaluator, options, true);
        // the workbook goes back even when the run failed
        *self = evaluator
            .into_workbooks()
            .into_iter()
            .next()
            .unwrap_or_default();
        result
    }
}

/// Calculation through a long-lived evaluator trusts its cache rather than
/// the results stored in cells, unless a full calculation is forced
impl WorkbookCalculationExt for FormulaEvaluator {
    fn calculate_with_options(
        &mut self,
        options: &CalculationOptions,
    ) -> FormulaResult<CalculationStats> {
        calculate_all(self.engine_mut(), options, false)
    }
}

/// With `trust_stored`, formulas holding a stored result count as calculated
fn calculate_all(
    evaluator: &mut WorkbookEvaluator<Workbook>,
    options: &CalculationOptions,
    trust_stored: bool,
) -> FormulaResult<CalculationStats> {
    let mut stats = CalculationStats::default();
    let registry = Arc::clone(evaluator.registry());
    if options.force_full_calculation {
        evaluator.clear_all_cached_result_values();
    }

    let formulas: Vec<(usize, u32, u16, bool)> = {
        let wb = evaluator.workbook();
        (0..wb.sheet_count())
            .filter_map(|sheet| wb.worksheet(sheet).map(|ws| (sheet, ws)))
            .flat_map(|(sheet, ws)| {
                ws.formula_cells().map(move |(row, col, f)| {
                    (sheet, row, col, trust_stored && !f.cached_result.is_empty())
                })
            })
            .collect()
    };

    for (sheet, row, col, has_result) in formulas {
        stats.formula_count += 1;
        let location = || format!("sheet {sheet} {}", CellAddress::new(row, col));

        let tokens = match evaluator.workbook().formula_tokens(sheet, row, col, &registry) {
            Ok(tokens) => tokens,
            Err(FormulaError::Parse(e)) => {
                log::warn!("skipping formula at {} that does not parse: {e}", location());
                stats.errors += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let volatile = tokens.iter().any(|t| match t {
            Token::Func { index, .. } | Token::FuncVar { index, .. } => registry.is_volatile(*index),
            _ => false,
        });
        if volatile {
            stats.volatile_cells += 1;
        }

        let needed = if volatile {
            !has_result || options.calculate_volatile
        } else {
            !has_result || options.force_full_calculation
        };
        if !needed {
            continue;
        }
        if volatile && !options.force_full_calculation {
            // a cached volatile result is stale by definition
            if let Some(cell) = evaluator.cell(0, sheet, row, col) {
                evaluator.notify_set_formula(0, sheet, &cell)?;
            }
        }

        let value = match evaluator.evaluate(sheet, row, col) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("failed to calculate formula at {}: {e}", location());
                stats.errors += 1;
                continue;
            }
        };
        match value {
            ValueEval::Error(CellError::Circular) => {
                stats.circular_references += 1;
                stats.errors += 1;
            }
            ValueEval::Error(_) => stats.errors += 1,
            _ => {}
        }
        // answered from the cache; stores the result in the cell
        evaluator.evaluate_formula_cell(sheet, row, col)?;
        stats.cells_calculated += 1;
    }

    log::debug!(
        "calculated {} of {} formula cells ({} errors)",
        stats.cells_calculated,
        stats.formula_count,
        stats.errors
    );
    Ok(stats)
}
