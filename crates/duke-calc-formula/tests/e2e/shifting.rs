//! Structural edits: formula text survives parse, shift and render.

use duke_calc_core::Workbook;
use duke_calc_formula::{
    parse, to_formula_string, FormulaKind, FormulaShifter, FunctionRegistry, SpreadsheetVersion,
};
use pretty_assertions::assert_eq;

fn three_sheets() -> Workbook {
    let mut wb = Workbook::new();
    wb.add_worksheet_with_name("Sheet2").unwrap();
    wb.add_worksheet_with_name("Sheet3").unwrap();
    wb
}

/// Shift one formula as seen from `sheet`, rendering against `after`
fn shift(
    before: &Workbook,
    after: &Workbook,
    shifter: &FormulaShifter,
    sheet: usize,
    formula: &str,
) -> String {
    let registry = FunctionRegistry::new();
    let mut tokens = parse(formula, before, FormulaKind::Cell, sheet, &registry).unwrap();
    shifter.adjust_formula(&mut tokens, sheet).unwrap();
    to_formula_string(after, &tokens, &registry).unwrap()
}

#[test]
fn test_sheet_move_keeps_formula_text() {
    let before = three_sheets();
    let mut after = three_sheets();
    after.move_worksheet(2, 0).unwrap();

    let shifter = FormulaShifter::sheet_mover(2, 0);
    for formula in [
        "Sheet3!A1+Sheet2!B1",
        "SUM(Sheet1:Sheet2!A1:B2)",
        "IF(Sheet3!A1>0,Sheet1!C3,\"none\")",
    ] {
        assert_eq!(shift(&before, &after, &shifter, 0, formula), formula);
    }
}

#[test]
fn test_row_move_outcomes() {
    let wb = Workbook::new();
    let mover = FormulaShifter::row_mover(0, 4, 9, 3, SpreadsheetVersion::Excel2007);
    // inside the moved block
    assert_eq!(shift(&wb, &wb, &mover, 0, "SUM(A5:A10)"), "SUM(A8:A13)");
    // overwritten by the move
    assert_eq!(shift(&wb, &wb, &mover, 0, "A12*2"), "#REF!*2");
    // elsewhere
    assert_eq!(shift(&wb, &wb, &mover, 0, "A1+A20"), "A1+A20");
    // a formula on another sheet pointing into the moved rows
    let mut two = Workbook::new();
    two.add_worksheet_with_name("Other").unwrap();
    assert_eq!(shift(&two, &two, &mover, 1, "Sheet1!B6"), "Sheet1!B9");
    assert_eq!(shift(&two, &two, &mover, 1, "B6"), "B6");
}

#[test]
fn test_row_copy_moves_relative_rows() {
    let wb = Workbook::new();
    let copier = FormulaShifter::row_copier(0, 0, 4, SpreadsheetVersion::Excel2007);
    assert_eq!(shift(&wb, &wb, &copier, 0, "A1*$B$1+SUM(C1:C3)"), "A5*$B$1+SUM(C5:C7)");
}

#[test]
fn test_jumps_still_land_after_deletion() {
    // a reference inside an IF branch becomes #REF! without changing jump sizes
    let wb = Workbook::new();
    let mover = FormulaShifter::row_mover(0, 0, 0, 5, SpreadsheetVersion::Excel2007);
    assert_eq!(
        shift(&wb, &wb, &mover, 0, "IF(A1>0,A6,B2)"),
        "IF(A6>0,#REF!,B2)"
    );
}
