//! Hooks into cache and evaluation activity
//!
//! Mostly useful in tests, for example to count how often a formula is
//! really evaluated rather than served from the cache.

use crate::cache::CellLocation;
use crate::value::ValueEval;

/// Observer of the evaluation cache. Every method defaults to doing nothing.
pub trait EvaluationListener {
    /// A formula cell's cached value was used
    fn on_cache_hit(&mut self, _location: CellLocation, _value: &ValueEval) {}

    /// A plain (non-formula) cell value was read
    fn on_read_plain_value(&mut self, _location: CellLocation, _value: &ValueEval) {}

    /// A formula cell is about to be evaluated
    fn on_start_evaluate(&mut self, _location: CellLocation) {}

    /// A formula cell finished evaluating
    fn on_end_evaluate(&mut self, _location: CellLocation, _value: &ValueEval) {}

    /// The whole cache was dropped
    fn on_clear_whole_cache(&mut self) {}

    /// The cached value of the cell being notified was dropped
    fn on_clear_cached_value(&mut self, _location: CellLocation) {}

    /// A cell some formula read while it was blank now has a value
    fn on_change_from_blank_value(&mut self, _location: CellLocation) {}

    /// A consumer's cached value was dropped; `depth` counts the steps from
    /// the changed cell
    fn on_clear_dependent_cached_value(&mut self, _location: CellLocation, _depth: usize) {}
}
