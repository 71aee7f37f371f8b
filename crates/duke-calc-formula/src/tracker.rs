//! Evaluation frames
//!
//! One frame per formula cell currently being evaluated, innermost last.
//! Each frame collects what its formula reads. A cell that is asked for
//! while its own frame is still open is part of a cycle.

use ahash::AHashSet;
use duke_calc_core::CellError;

use crate::blank::FormulaUsedBlankCellSet;
use crate::cache::{CellLocation, EntryId, EvaluationCache};
use crate::error::{FormulaError, FormulaResult};
use crate::value::ValueEval;

#[derive(Debug)]
struct Frame {
    entry: EntryId,
    /// Inputs in first-read order, without repeats
    inputs: Vec<EntryId>,
    seen: AHashSet<EntryId>,
    used_blank: FormulaUsedBlankCellSet,
}

impl Frame {
    fn new(entry: EntryId) -> Self {
        Self {
            entry,
            inputs: Vec::new(),
            seen: AHashSet::new(),
            used_blank: FormulaUsedBlankCellSet::new(),
        }
    }

    fn add_input(&mut self, input: EntryId) {
        if self.seen.insert(input) {
            self.inputs.push(input);
        }
    }
}

/// Stack of open evaluation frames
#[derive(Debug, Default)]
pub struct EvaluationTracker {
    frames: Vec<Frame>,
    evaluating: AHashSet<EntryId>,
}

impl EvaluationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a frame for `entry`. Returns `false` if the entry is already
    /// being evaluated further down the stack.
    pub fn start_evaluate(&mut self, entry: EntryId) -> bool {
        if !self.evaluating.insert(entry) {
            return false;
        }
        self.frames.push(Frame::new(entry));
        true
    }

    /// Hand the innermost frame's result and dependencies to the cache.
    ///
    /// A circular reference error is only kept for the outermost cell. Inner
    /// cells may see the error on a branch whose value is not used in the
    /// end, so caching it there could be wrong.
    pub fn update_cache_result(
        &mut self,
        cache: &mut EvaluationCache,
        value: ValueEval,
    ) -> FormulaResult<()> {
        let depth = self.frames.len();
        let Some(frame) = self.frames.last_mut() else {
            return Err(FormulaError::internal(
                "result update without a matching start of evaluation",
            ));
        };
        if depth > 1 && value == ValueEval::Error(CellError::Circular) {
            return Ok(());
        }
        let inputs = std::mem::take(&mut frame.inputs);
        let used_blank = std::mem::take(&mut frame.used_blank);
        frame.seen.clear();
        cache.update_formula_result(frame.entry, value, inputs, used_blank)
    }

    /// Close the innermost frame, which must belong to `entry`
    pub fn end_evaluate(&mut self, entry: EntryId) -> FormulaResult<()> {
        match self.frames.last() {
            None => Err(FormulaError::internal(
                "end of evaluation without a matching start",
            )),
            Some(frame) if frame.entry != entry => Err(FormulaError::internal(format!(
                "end of evaluation for {entry:?} while {:?} is innermost",
                frame.entry
            ))),
            Some(_) => {
                self.frames.pop();
                self.evaluating.remove(&entry);
                Ok(())
            }
        }
    }

    /// The innermost formula read another formula cell
    pub fn accept_formula_dependency(&mut self, entry: EntryId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.add_input(entry);
        }
    }

    /// The innermost formula read a literal or blank cell. Reads made outside
    /// any frame are not recorded.
    pub fn accept_plain_value_dependency(
        &mut self,
        cache: &mut EvaluationCache,
        location: CellLocation,
        value: &ValueEval,
    ) -> FormulaResult<()> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        if matches!(value, ValueEval::Blank) {
            frame
                .used_blank
                .add_cell(location.book, location.sheet, location.row, location.col);
        } else {
            let entry = cache.get_plain_value_entry(location, value)?;
            frame.add_input(entry);
        }
        Ok(())
    }

    /// The innermost formula read a rectangle in which no cell is stored
    pub fn accept_blank_area_dependency(
        &mut self,
        book: usize,
        sheet: usize,
        first_row: u32,
        first_col: u16,
        last_row: u32,
        last_col: u16,
    ) {
        if let Some(frame) = self.frames.last_mut() {
            frame
                .used_blank
                .add_area(book, sheet, first_row, first_col, last_row, last_col);
        }
    }

    /// Nothing is being evaluated
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every open frame, after an evaluation was abandoned with an error
    pub fn reset(&mut self) {
        self.frames.clear();
        self.evaluating.clear();
    }
}
