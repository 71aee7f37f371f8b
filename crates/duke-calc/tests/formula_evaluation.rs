//! Tests for editing and evaluating workbooks through FormulaEvaluator

use duke_calc::prelude::*;
use duke_calc::{CellLocation, Error, EvaluatorOptions, SpreadsheetVersion};
use pretty_assertions::assert_eq;

fn n(v: f64) -> ValueEval {
    ValueEval::Number(v)
}

fn formula_at<'a>(evaluator: &'a FormulaEvaluator, sheet: usize, addr: &str) -> Option<&'a str> {
    let a = CellAddress::parse(addr).unwrap();
    evaluator
        .workbook()
        .worksheet(sheet)
        .unwrap()
        .get_formula_at(a.row, a.col)
}

/// Edits made through the evaluator are picked up by dependent formulas
#[test]
fn test_edit_and_reevaluate() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 10.0).unwrap();
    sheet.set_cell_value("A2", 20.0).unwrap();
    sheet.set_cell_formula("A3", "=A1+A2").unwrap();
    sheet.set_cell_formula("A4", "=A3*2").unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    assert_eq!(evaluator.evaluate(0, "A4").unwrap(), n(60.0));

    evaluator.set_cell_value(0, "A1", 1.0).unwrap();
    assert_eq!(evaluator.evaluate(0, "A4").unwrap(), n(42.0));

    evaluator.set_cell_formula(0, "A3", "A1-A2").unwrap();
    assert_eq!(evaluator.evaluate(0, "A4").unwrap(), n(-38.0));

    evaluator.clear_cell(0, "A2").unwrap();
    assert_eq!(evaluator.evaluate(0, "A4").unwrap(), n(2.0));

    evaluator.set_cell_value(0, "A1", "text").unwrap();
    assert_eq!(
        evaluator.evaluate(0, "A4").unwrap(),
        ValueEval::Error(CellError::Value)
    );
}

#[test]
fn test_recorded_dependencies() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 1.0).unwrap();
    sheet.set_cell_value("B1", 2.0).unwrap();
    sheet.set_cell_formula("C1", "IF(A1>0,B1,D1)").unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    evaluator.evaluate(0, "C1").unwrap();
    let deps: Vec<(u32, u16)> = evaluator
        .recorded_dependencies(0, "C1")
        .unwrap()
        .iter()
        .map(|loc: &CellLocation| (loc.row, loc.col))
        .collect();
    assert_eq!(deps, vec![(0, 0), (0, 1)]);
}

#[test]
fn test_evaluate_formula_cell_stores_result() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 3.0).unwrap();
    sheet.set_cell_formula("B1", "A1*A1").unwrap();
    sheet.set_cell_formula("C1", "B1+1").unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    assert_eq!(
        evaluator.evaluate_formula_cell(0, "B1").unwrap(),
        Some(CellType::Numeric)
    );
    assert_eq!(
        evaluator.evaluate_in_cell(0, "C1").unwrap(),
        CellValue::Number(10.0)
    );

    let wb = evaluator.into_workbook();
    let sheet = wb.worksheet(0).unwrap();
    assert_eq!(sheet.get_value("B1").unwrap(), CellValue::Number(9.0));
    assert_eq!(sheet.get_formula_at(0, 1), Some("A1*A1"));
    assert_eq!(sheet.get_formula_at(0, 2), None);
}

#[test]
fn test_shared_formula_group() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    for (row, v) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        sheet.set_cell_value_at(row as u32, 0, v).unwrap();
    }

    let mut evaluator = FormulaEvaluator::new(wb);
    evaluator
        .set_shared_formula(0, CellRange::parse("B1:B3").unwrap(), "A1*2")
        .unwrap();
    assert_eq!(evaluator.evaluate(0, "B2").unwrap(), n(4.0));

    evaluator.set_cell_value(0, "A2", 5.0).unwrap();
    assert_eq!(evaluator.evaluate(0, "B2").unwrap(), n(10.0));
    assert_eq!(evaluator.evaluate(0, "B3").unwrap(), n(6.0));

    // members cannot be edited one at a time
    assert!(evaluator.set_cell_value(0, "B3", 1.0).is_err());
    evaluator.clear_formula_group(0, 2, 1).unwrap();
    assert_eq!(evaluator.evaluate(0, "B2").unwrap(), ValueEval::Blank);
}

#[test]
fn test_array_formula_group() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 1.0).unwrap();
    sheet.set_cell_value("A2", 2.0).unwrap();
    sheet.set_cell_formula("C1", "SUM(B1:B2)").unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    evaluator
        .set_array_formula(0, CellRange::parse("B1:B2").unwrap(), "A1:A2*10")
        .unwrap();
    assert_eq!(evaluator.evaluate(0, "B2").unwrap(), n(20.0));
    assert_eq!(evaluator.evaluate(0, "C1").unwrap(), n(30.0));

    evaluator.set_cell_value(0, "A1", 4.0).unwrap();
    assert_eq!(evaluator.evaluate(0, "C1").unwrap(), n(60.0));
}

/// Moving rows rewrites references on every sheet and in defined names
#[test]
fn test_move_rows_rewrites_references() {
    let mut wb = Workbook::new();
    wb.add_worksheet_with_name("Sheet2").unwrap();
    let sheet = wb.worksheet_mut(0).unwrap();
    for (row, v) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        sheet.set_cell_value_at(row as u32, 0, v).unwrap();
    }
    sheet.set_cell_formula("B1", "SUM(A1:A3)").unwrap();
    sheet.set_cell_formula("C5", "A2*10").unwrap();
    sheet.set_cell_formula("C10", "A6+0").unwrap();
    sheet.set_cell_formula("E11", "SUM(Data)").unwrap();
    wb.worksheet_mut(1)
        .unwrap()
        .set_cell_formula("A1", "Sheet1!A3+1")
        .unwrap();
    wb.define_name("Data", "Sheet1!$A$1:$A$3").unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    assert_eq!(evaluator.evaluate(0, "C5").unwrap(), n(20.0));

    evaluator.move_rows(0, 0, 2, 5).unwrap();

    assert_eq!(formula_at(&evaluator, 0, "B6"), Some("SUM(A6:A8)"));
    assert_eq!(formula_at(&evaluator, 0, "B1"), None);
    assert_eq!(formula_at(&evaluator, 0, "C5"), Some("A7*10"));
    assert_eq!(formula_at(&evaluator, 0, "C10"), Some("#REF!+0"));
    assert_eq!(formula_at(&evaluator, 1, "A1"), Some("Sheet1!A8+1"));
    assert_eq!(
        evaluator.workbook().named_ranges().by_index(0).unwrap().refers_to,
        "Sheet1!$A$6:$A$8"
    );

    assert_eq!(evaluator.evaluate(0, "B6").unwrap(), n(6.0));
    assert_eq!(evaluator.evaluate(0, "C5").unwrap(), n(20.0));
    assert_eq!(evaluator.evaluate(0, "E11").unwrap(), n(6.0));
    assert_eq!(evaluator.evaluate(1, "A1").unwrap(), n(4.0));
    assert_eq!(
        evaluator.evaluate(0, "C10").unwrap(),
        ValueEval::Error(CellError::Ref)
    );
}

/// A move that splits a shared formula gives the members their own text
#[test]
fn test_move_rows_through_shared_formula() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    for (row, v) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
        sheet.set_cell_value_at(row as u32, 0, v).unwrap();
    }
    sheet
        .set_shared_formula(CellRange::parse("B1:B4").unwrap(), "A1*10")
        .unwrap();
    sheet
        .set_shared_formula(CellRange::parse("D1:D2").unwrap(), "A2+0")
        .unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    assert_eq!(evaluator.evaluate(0, "B4").unwrap(), n(40.0));
    evaluator.move_rows(0, 2, 3, 5).unwrap();

    assert_eq!(formula_at(&evaluator, 0, "B2"), Some("A2*10"));
    assert_eq!(formula_at(&evaluator, 0, "B8"), Some("A8*10"));
    assert_eq!(formula_at(&evaluator, 0, "B9"), Some("A9*10"));
    assert_eq!(formula_at(&evaluator, 0, "D1"), Some("A2+0"));
    assert_eq!(formula_at(&evaluator, 0, "D2"), Some("A8+0"));
    assert_eq!(evaluator.evaluate(0, "B2").unwrap(), n(20.0));
    assert_eq!(evaluator.evaluate(0, "B8").unwrap(), n(30.0));
    assert_eq!(evaluator.evaluate(0, "B9").unwrap(), n(40.0));
    assert_eq!(evaluator.evaluate(0, "D2").unwrap(), n(3.0));

    // the pieces are independent formulas now
    evaluator.set_cell_value(0, "B2", 1.0).unwrap();
    assert_eq!(evaluator.evaluate(0, "B1").unwrap(), n(10.0));
}

#[test]
fn test_move_rows_rejects_bad_ranges() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A6", 1.0).unwrap();
    sheet.set_cell_formula("B1", "A6*2").unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    let err = evaluator.move_rows(0, 5, 2, 1).unwrap_err();
    assert!(matches!(err, FormulaError::Core(Error::InvalidRange(_))));
    assert!(evaluator.move_rows(0, 0, 2, -1).is_err());
    // nothing was rewritten
    assert_eq!(formula_at(&evaluator, 0, "B1"), Some("A6*2"));
    assert_eq!(evaluator.evaluate(0, "B1").unwrap(), n(2.0));

    let options = EvaluatorOptions {
        spreadsheet_version: SpreadsheetVersion::Excel97,
        ..EvaluatorOptions::default()
    };
    let mut evaluator = FormulaEvaluator::with_options(evaluator.into_workbook(), options);
    let err = evaluator.move_rows(0, 5, 5, 65_531).unwrap_err();
    assert!(matches!(
        err,
        FormulaError::Core(Error::RowOutOfBounds(65_536, 65_535))
    ));
    assert_eq!(formula_at(&evaluator, 0, "B1"), Some("A6*2"));
}

#[test]
fn test_copy_row() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 5.0).unwrap();
    sheet.set_cell_formula("B1", "A1*2").unwrap();
    sheet.set_cell_formula("C1", "$A$1+B1").unwrap();
    sheet.set_cell_value("D4", 7.0).unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    evaluator.copy_row(0, 0, 3).unwrap();

    assert_eq!(formula_at(&evaluator, 0, "B4"), Some("A4*2"));
    assert_eq!(formula_at(&evaluator, 0, "C4"), Some("$A$1+B4"));
    assert_eq!(evaluator.evaluate(0, "A4").unwrap(), n(5.0));
    assert_eq!(evaluator.evaluate(0, "D4").unwrap(), ValueEval::Blank);

    evaluator.set_cell_value(0, "A4", 8.0).unwrap();
    assert_eq!(evaluator.evaluate(0, "C4").unwrap(), n(21.0));
    assert_eq!(evaluator.evaluate(0, "C1").unwrap(), n(15.0));
}

#[test]
fn test_move_sheet_keeps_targets() {
    let mut wb = Workbook::new();
    wb.add_worksheet_with_name("Sheet2").unwrap();
    let first = wb.worksheet_mut(0).unwrap();
    first.set_cell_value("A2", 1.0).unwrap();
    first.set_cell_formula("A1", "Sheet2!A1*2+A2").unwrap();
    wb.worksheet_mut(1).unwrap().set_cell_value("A1", 20.0).unwrap();

    let mut evaluator = FormulaEvaluator::new(wb);
    assert_eq!(evaluator.evaluate(0, "A1").unwrap(), n(41.0));

    evaluator.move_sheet(1, 0).unwrap();
    assert_eq!(evaluator.workbook().worksheet(0).unwrap().name(), "Sheet2");
    assert_eq!(formula_at(&evaluator, 1, "A1"), Some("Sheet2!A1*2+A2"));
    assert_eq!(evaluator.evaluate(1, "A1").unwrap(), n(41.0));

    evaluator.set_cell_value(0, "A1", 0.5).unwrap();
    assert_eq!(evaluator.evaluate(1, "A1").unwrap(), n(2.0));
}

#[test]
fn test_missing_sheet() {
    let mut evaluator = FormulaEvaluator::new(Workbook::new());
    let err = evaluator.set_cell_value(3, "A1", 1.0).unwrap_err();
    assert!(matches!(
        err,
        FormulaError::Core(Error::SheetOutOfBounds(3, 1))
    ));
    assert!(evaluator.move_rows(2, 0, 0, 1).is_err());
}

#[test]
fn test_calculate_workbook() {
    let mut wb = Workbook::new();
    let sheet = wb.worksheet_mut(0).unwrap();
    sheet.set_cell_value("A1", 2.0).unwrap();
    sheet.set_cell_formula("A2", "A1^10").unwrap();
    sheet.set_cell_formula("A3", "NOW()>0").unwrap();
    sheet.set_cell_formula("A4", "A4+1").unwrap();

    let stats = wb.calculate().unwrap();
    assert_eq!(stats.formula_count, 3);
    assert_eq!(stats.cells_calculated, 3);
    assert_eq!(stats.volatile_cells, 1);
    assert_eq!(stats.circular_references, 1);

    let sheet = wb.worksheet(0).unwrap();
    assert_eq!(sheet.get_value("A2").unwrap(), CellValue::Number(1024.0));
    assert_eq!(sheet.get_value("A3").unwrap(), CellValue::Boolean(true));
    // the circular marker is stored as #REF!
    assert_eq!(
        sheet.get_value("A4").unwrap(),
        CellValue::Error(CellError::Ref)
    );
}
