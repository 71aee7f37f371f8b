//! Common utilities for E2E tests.

use duke_calc_core::{CellAddress, CellValue, Workbook};
use duke_calc_formula::{ValueEval, WorkbookEvaluator};

/// Build a one-sheet workbook. Contents starting with `=` become formulas,
/// numbers become numeric cells and anything else is text.
pub fn book(cells: &[(&str, &str)]) -> Workbook {
    let mut wb = Workbook::new();
    let ws = wb.worksheet_mut(0).expect("new workbook has a sheet");
    for (addr, content) in cells {
        match content.strip_prefix('=') {
            Some(formula) => ws.set_cell_formula(addr, formula).unwrap(),
            None => match content.parse::<f64>() {
                Ok(n) => ws.set_cell_value(addr, n).unwrap(),
                Err(_) => ws.set_cell_value(addr, *content).unwrap(),
            },
        }
    }
    wb
}

pub fn evaluator(cells: &[(&str, &str)]) -> WorkbookEvaluator<Workbook> {
    WorkbookEvaluator::new(book(cells))
}

pub fn at(addr: &str) -> (u32, u16) {
    let a = CellAddress::parse(addr).unwrap();
    (a.row, a.col)
}

/// Evaluate a cell on the first sheet
pub fn eval(ev: &mut WorkbookEvaluator<Workbook>, addr: &str) -> ValueEval {
    let (row, col) = at(addr);
    ev.evaluate(0, row, col).unwrap()
}

/// Set a plain value on the first sheet and notify the evaluator
pub fn set_value(ev: &mut WorkbookEvaluator<Workbook>, addr: &str, value: impl Into<CellValue>) {
    let (row, col) = at(addr);
    let ws = ev.workbook_mut().worksheet_mut(0).unwrap();
    let previous = ws.cell_at(row, col).map(|c| c.id());
    ws.set_cell_value_at(row, col, value.into()).unwrap();
    let updated = match ev.cell(0, 0, row, col) {
        Some(cell) => cell,
        // the cell was removed; report it empty under its old identity
        None => match previous {
            Some(id) => duke_calc_formula::EvaluationCell {
                id,
                row,
                col,
                value: CellValue::Empty,
                is_formula: false,
                array_range: None,
            },
            None => return,
        },
    };
    ev.notify_update_cell(0, 0, &updated).unwrap();
}

/// Set a formula on the first sheet and notify the evaluator
pub fn set_formula(ev: &mut WorkbookEvaluator<Workbook>, addr: &str, formula: &str) {
    let (row, col) = at(addr);
    ev.workbook_mut()
        .worksheet_mut(0)
        .unwrap()
        .set_cell_formula_at(row, col, formula)
        .unwrap();
    let updated = ev.cell(0, 0, row, col).unwrap();
    ev.notify_set_formula(0, 0, &updated).unwrap();
}

pub fn n(v: f64) -> ValueEval {
    ValueEval::Number(v)
}
