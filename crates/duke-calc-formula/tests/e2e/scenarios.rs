//! Evaluation scenarios an application runs into first.

use crate::{eval, evaluator, n, set_value};
use duke_calc_core::CellError;
use duke_calc_formula::{CellLocation, ValueEval};
use pretty_assertions::assert_eq;

#[test]
fn test_sum_of_two_cells_follows_edit() {
    let mut ev = evaluator(&[("A1", "2"), ("A2", "3"), ("A3", "=A1+A2")]);
    assert_eq!(eval(&mut ev, "A3"), n(5.0));

    set_value(&mut ev, "A2", 10.0);
    assert_eq!(eval(&mut ev, "A3"), n(12.0));
}

#[test]
fn test_blank_in_range_counts_as_zero_until_filled() {
    let mut ev = evaluator(&[("A1", "1"), ("A3", "3"), ("B1", "=SUM(A1:A3)")]);
    assert_eq!(eval(&mut ev, "B1"), n(4.0));

    set_value(&mut ev, "A2", 5.0);
    assert_eq!(eval(&mut ev, "B1"), n(9.0));
}

#[test]
fn test_skipped_branch_is_not_a_dependency() {
    let mut ev = evaluator(&[
        ("A1", "-1"),
        ("C1", "100"),
        ("B1", "=IF(A1>0,C1,\"nonpos\")"),
    ]);
    assert_eq!(eval(&mut ev, "B1"), ValueEval::string("nonpos"));
    assert_eq!(ev.recorded_dependencies(0, 0, 1), vec![CellLocation::new(0, 0, 0)]);

    // changing a cell only the skipped branch reads leaves the result cached
    set_value(&mut ev, "C1", 200.0);
    let id = ev.cell(0, 0, 0, 1).unwrap().id;
    let entry = ev.cache().formula_entry(id).unwrap();
    assert_eq!(ev.cache().value(entry), Some(&ValueEval::string("nonpos")));
    assert_eq!(eval(&mut ev, "B1"), ValueEval::string("nonpos"));

    set_value(&mut ev, "A1", 1.0);
    assert_eq!(eval(&mut ev, "B1"), n(200.0));
}

#[test]
fn test_mixed_types_and_errors() {
    let mut ev = evaluator(&[
        ("A1", "abc"),
        ("A2", "4"),
        ("B1", "=A1&\"-\"&A2"),
        ("B2", "=A1+1"),
        ("B3", "=IFERROR(A1+1,-1)"),
        ("B4", "=ISERROR(B2)"),
        ("B5", "=LEN(A1)*A2"),
    ]);
    assert_eq!(eval(&mut ev, "B1"), ValueEval::string("abc-4"));
    assert_eq!(eval(&mut ev, "B2"), ValueEval::Error(CellError::Value));
    assert_eq!(eval(&mut ev, "B3"), n(-1.0));
    assert_eq!(eval(&mut ev, "B4"), ValueEval::Boolean(true));
    assert_eq!(eval(&mut ev, "B5"), n(12.0));
}

#[test]
fn test_cross_sheet_reference() {
    let mut wb = crate::book(&[("A1", "=Data!B2*2")]);
    let data = wb.add_worksheet_with_name("Data").unwrap();
    wb.worksheet_mut(data).unwrap().set_cell_value("B2", 21.0).unwrap();
    let mut ev = duke_calc_formula::WorkbookEvaluator::new(wb);
    assert_eq!(eval(&mut ev, "A1"), n(42.0));
    assert_eq!(ev.recorded_dependencies(0, 0, 0), vec![CellLocation::new(1, 1, 1)]);
}
