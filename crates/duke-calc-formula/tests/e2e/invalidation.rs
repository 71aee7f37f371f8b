//! Cached results must always agree with a fresh recompute.

use crate::{at, eval, evaluator, n, set_formula, set_value};
use duke_calc_core::CellValue;
use duke_calc_formula::{EvaluationCell, ValueEval};
use pretty_assertions::assert_eq;

#[test]
fn test_chain_recomputes_after_root_change() {
    let mut ev = evaluator(&[("A1", "1"), ("B1", "=A1*10"), ("C1", "=B1+1"), ("D1", "=C1+B1")]);
    assert_eq!(eval(&mut ev, "D1"), n(21.0));

    set_value(&mut ev, "A1", 2.0);
    assert_eq!(eval(&mut ev, "D1"), n(41.0));
    // intermediate results were cleared too
    assert_eq!(eval(&mut ev, "C1"), n(21.0));
}

#[test]
fn test_formula_change_reaches_consumers() {
    let mut ev = evaluator(&[("A1", "3"), ("B1", "=A1"), ("C1", "=B1*2")]);
    assert_eq!(eval(&mut ev, "C1"), n(6.0));

    set_formula(&mut ev, "B1", "A1+1");
    assert_eq!(eval(&mut ev, "C1"), n(8.0));
}

#[test]
fn test_formula_replaced_by_literal() {
    let mut ev = evaluator(&[("A1", "3"), ("B1", "=A1"), ("C1", "=B1*2")]);
    assert_eq!(eval(&mut ev, "C1"), n(6.0));

    set_value(&mut ev, "B1", 50.0);
    assert_eq!(eval(&mut ev, "C1"), n(100.0));

    // the old input no longer matters
    set_value(&mut ev, "A1", 7.0);
    assert_eq!(eval(&mut ev, "C1"), n(100.0));
}

#[test]
fn test_literal_replaced_by_formula() {
    let mut ev = evaluator(&[("A1", "3"), ("B1", "4"), ("C1", "=B1*2")]);
    assert_eq!(eval(&mut ev, "C1"), n(8.0));

    set_formula(&mut ev, "B1", "A1*A1");
    assert_eq!(eval(&mut ev, "C1"), n(18.0));
    set_value(&mut ev, "A1", 1.0);
    assert_eq!(eval(&mut ev, "C1"), n(2.0));
}

#[test]
fn test_deleted_cell_reads_as_blank() {
    let mut ev = evaluator(&[("A1", "3"), ("B1", "=A1+1")]);
    assert_eq!(eval(&mut ev, "B1"), n(4.0));

    let (row, col) = at("A1");
    let cell = ev.cell(0, 0, row, col).unwrap();
    ev.notify_delete_cell(0, 0, &cell).unwrap();
    ev.workbook_mut()
        .worksheet_mut(0)
        .unwrap()
        .clear_cell_at(row, col)
        .unwrap();
    assert_eq!(eval(&mut ev, "B1"), n(1.0));
}

#[test]
fn test_cleared_value_is_reported_as_blank() {
    let mut ev = evaluator(&[("A1", "3"), ("B1", "=A1+1")]);
    assert_eq!(eval(&mut ev, "B1"), n(4.0));

    set_value(&mut ev, "A1", CellValue::Empty);
    assert_eq!(eval(&mut ev, "B1"), n(1.0));
    set_value(&mut ev, "A1", 9.0);
    assert_eq!(eval(&mut ev, "B1"), n(10.0));
}

#[test]
fn test_unnotified_edit_needs_full_clear() {
    let mut ev = evaluator(&[("A1", "3"), ("B1", "=A1+1")]);
    assert_eq!(eval(&mut ev, "B1"), n(4.0));

    ev.workbook_mut()
        .worksheet_mut(0)
        .unwrap()
        .set_cell_value("A1", 5.0)
        .unwrap();
    assert_eq!(eval(&mut ev, "B1"), n(4.0));

    ev.clear_all_cached_result_values();
    assert!(ev.cache().is_empty());
    assert_eq!(eval(&mut ev, "B1"), n(6.0));
}

#[test]
fn test_evaluate_in_cell_keeps_dependents_consistent() {
    let mut ev = evaluator(&[("A1", "2"), ("B1", "=A1*3"), ("C1", "=B1+1")]);
    assert_eq!(eval(&mut ev, "C1"), n(7.0));

    let (row, col) = at("B1");
    assert_eq!(ev.evaluate_in_cell(0, row, col).unwrap(), CellValue::Number(6.0));
    set_value(&mut ev, "A1", 10.0);
    // B1 is a literal now, so C1 does not move
    assert_eq!(eval(&mut ev, "C1"), n(7.0));
}

#[test]
fn test_unrelated_change_keeps_cache() {
    let mut ev = evaluator(&[("A1", "2"), ("B1", "=A1*3"), ("Z9", "1")]);
    assert_eq!(eval(&mut ev, "B1"), n(6.0));
    set_value(&mut ev, "Z9", 2.0);

    let cell: EvaluationCell = ev.cell(0, 0, 0, 1).unwrap();
    let entry = ev.cache().formula_entry(cell.id).unwrap();
    assert_eq!(ev.cache().value(entry), Some(&ValueEval::Number(6.0)));
}
