//! Observing evaluation through an [`EvaluationListener`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::{eval, evaluator, n, set_value};
use duke_calc_formula::{CellLocation, EvaluationListener, ValueEval};
use pretty_assertions::assert_eq;

#[derive(Debug, Default)]
struct Events {
    started: Vec<CellLocation>,
    hits: Vec<CellLocation>,
    cleared: Vec<CellLocation>,
    whole_cache_clears: usize,
}

struct Recorder(Rc<RefCell<Events>>);

impl EvaluationListener for Recorder {
    fn on_cache_hit(&mut self, location: CellLocation, _value: &ValueEval) {
        self.0.borrow_mut().hits.push(location);
    }

    fn on_start_evaluate(&mut self, location: CellLocation) {
        self.0.borrow_mut().started.push(location);
    }

    fn on_clear_dependent_cached_value(&mut self, location: CellLocation, _depth: usize) {
        self.0.borrow_mut().cleared.push(location);
    }

    fn on_clear_whole_cache(&mut self) {
        self.0.borrow_mut().whole_cache_clears += 1;
    }
}

const B1: CellLocation = CellLocation { book: 0, sheet: 0, row: 0, col: 1 };
const C1: CellLocation = CellLocation { book: 0, sheet: 0, row: 0, col: 2 };

fn recorded() -> (duke_calc_formula::WorkbookEvaluator<duke_calc_core::Workbook>, Rc<RefCell<Events>>) {
    let mut ev = evaluator(&[("A1", "4"), ("B1", "=A1*2"), ("C1", "=B1+1")]);
    let events = Rc::new(RefCell::new(Events::default()));
    ev.set_listener(Some(Box::new(Recorder(Rc::clone(&events)))));
    (ev, events)
}

#[test]
fn test_each_formula_evaluates_once() {
    let (mut ev, events) = recorded();
    assert_eq!(eval(&mut ev, "C1"), n(9.0));
    assert_eq!(events.borrow().started, vec![C1, B1]);

    assert_eq!(eval(&mut ev, "C1"), n(9.0));
    assert_eq!(eval(&mut ev, "B1"), n(8.0));
    assert_eq!(events.borrow().started.len(), 2);
    assert_eq!(events.borrow().hits, vec![C1, B1]);
}

#[test]
fn test_change_clears_consumers_transitively() {
    let (mut ev, events) = recorded();
    eval(&mut ev, "C1");

    set_value(&mut ev, "A1", 5.0);
    let mut cleared = events.borrow().cleared.clone();
    cleared.sort();
    assert_eq!(cleared, vec![B1, C1]);

    assert_eq!(eval(&mut ev, "C1"), n(11.0));
    assert_eq!(events.borrow().started, vec![C1, B1, C1, B1]);
}

#[test]
fn test_whole_cache_clear_is_reported() {
    let (mut ev, events) = recorded();
    eval(&mut ev, "C1");
    ev.clear_all_cached_result_values();
    assert_eq!(events.borrow().whole_cache_clears, 1);
}
