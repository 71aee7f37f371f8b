//! Evaluation cache
//!
//! Memoized cell values plus the dependency graph between them. Entries live
//! in an arena and refer to each other by [`EntryId`]:
//!
//! - a formula entry (keyed by cell identity) holds the formula's last
//!   result, the entries it read (its sensitive inputs) and the blank cells
//!   it read;
//! - a plain entry (keyed by location) holds a literal value some formula
//!   read.
//!
//! Every entry also knows its consumers, the formula entries that read it.
//! If A is a sensitive input of B then B is a consumer of A; the two sides
//! are always updated together. When a cell changes, the cached results of
//! its consumers are cleared, and theirs, depth first.

use std::fmt;

use ahash::{AHashMap, AHashSet};
use duke_calc_core::{CellAddress, CellId};

use crate::blank::{BookSheetKey, FormulaUsedBlankCellSet};
use crate::error::{FormulaError, FormulaResult};
use crate::listener::EvaluationListener;
use crate::value::{same_value, ValueEval};
use crate::workbook::EvaluationCell;

/// Book, sheet, row and column of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellLocation {
    pub book: usize,
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
}

impl CellLocation {
    /// A cell in the primary workbook
    pub fn new(sheet: usize, row: u32, col: u16) -> Self {
        Self::in_book(0, sheet, row, col)
    }

    pub fn in_book(book: usize, sheet: usize, row: u32, col: u16) -> Self {
        Self {
            book,
            sheet,
            row,
            col,
        }
    }
}

impl fmt::Display for CellLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]{}!{}",
            self.book,
            self.sheet,
            CellAddress::new(self.row, self.col)
        )
    }
}

/// Handle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

#[derive(Debug)]
enum EntryKind {
    Plain,
    Formula {
        sensitive_inputs: Vec<EntryId>,
        used_blank: Option<FormulaUsedBlankCellSet>,
    },
}

#[derive(Debug)]
struct CacheEntry {
    location: CellLocation,
    value: Option<ValueEval>,
    consumers: AHashSet<EntryId>,
    kind: EntryKind,
}

impl CacheEntry {
    fn formula(location: CellLocation) -> Self {
        Self {
            location,
            value: None,
            consumers: AHashSet::new(),
            kind: EntryKind::Formula {
                sensitive_inputs: Vec::new(),
                used_blank: None,
            },
        }
    }

    fn plain(location: CellLocation, value: ValueEval) -> Self {
        Self {
            location,
            value: Some(value),
            consumers: AHashSet::new(),
            kind: EntryKind::Plain,
        }
    }

    fn sensitive_inputs(&self) -> &[EntryId] {
        match &self.kind {
            EntryKind::Formula {
                sensitive_inputs, ..
            } => sensitive_inputs,
            EntryKind::Plain => &[],
        }
    }

    fn uses_blank(&self, key: BookSheetKey, row: u32, col: u16) -> bool {
        match &self.kind {
            EntryKind::Formula {
                used_blank: Some(blank),
                ..
            } => blank.contains_cell(key, row, col),
            _ => false,
        }
    }
}

/// Memoized values and dependencies, shared by every workbook of an
/// evaluation environment
#[derive(Default)]
pub struct EvaluationCache {
    entries: Vec<Option<CacheEntry>>,
    free: Vec<EntryId>,
    formula_index: AHashMap<CellId, EntryId>,
    plain_index: AHashMap<CellLocation, EntryId>,
    listener: Option<Box<dyn EvaluationListener>>,
}

impl fmt::Debug for EvaluationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationCache")
            .field("formula_entries", &self.formula_index.len())
            .field("plain_entries", &self.plain_index.len())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: Box<dyn EvaluationListener>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::default()
        }
    }

    pub fn set_listener(&mut self, listener: Option<Box<dyn EvaluationListener>>) {
        self.listener = listener;
    }

    pub(crate) fn take_listener(&mut self) -> Option<Box<dyn EvaluationListener>> {
        self.listener.take()
    }

    /// Run `f` against the listener, if there is one
    pub(crate) fn listen(&mut self, f: impl FnOnce(&mut dyn EvaluationListener)) {
        if let Some(listener) = self.listener.as_deref_mut() {
            f(listener);
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.formula_index.len() + self.plain_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: EntryId) -> FormulaResult<&CacheEntry> {
        self.entries
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| FormulaError::internal(format!("dangling cache entry {id:?}")))
    }

    fn entry_mut(&mut self, id: EntryId) -> FormulaResult<&mut CacheEntry> {
        self.entries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| FormulaError::internal(format!("dangling cache entry {id:?}")))
    }

    fn allocate(&mut self, entry: CacheEntry) -> EntryId {
        match self.free.pop() {
            Some(id) => {
                self.entries[id.0 as usize] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                EntryId((self.entries.len() - 1) as u32)
            }
        }
    }

    /// Drop an entry nobody refers to any more
    fn release(&mut self, id: EntryId) -> FormulaResult<()> {
        let entry = self.entry(id)?;
        if !entry.consumers.is_empty() || !entry.sensitive_inputs().is_empty() {
            return Err(FormulaError::internal(format!(
                "releasing cache entry for {} while it is still linked",
                entry.location
            )));
        }
        self.entries[id.0 as usize] = None;
        self.free.push(id);
        Ok(())
    }

    /// Cached value of an entry; `None` when it must be (re)computed
    pub fn value(&self, id: EntryId) -> Option<&ValueEval> {
        self.entry(id).ok().and_then(|e| e.value.as_ref())
    }

    pub fn location(&self, id: EntryId) -> Option<CellLocation> {
        self.entry(id).ok().map(|e| e.location)
    }

    /// Entries the formula read when it was last evaluated
    pub fn sensitive_inputs(&self, id: EntryId) -> &[EntryId] {
        self.entry(id).map(CacheEntry::sensitive_inputs).unwrap_or(&[])
    }

    /// Formula entries that read this entry
    pub fn consumers(&self, id: EntryId) -> Vec<EntryId> {
        let mut out: Vec<EntryId> = self
            .entry(id)
            .map(|e| e.consumers.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Whether the last result depended on any cell at all
    pub fn is_input_sensitive(&self, id: EntryId) -> bool {
        match self.entry(id).map(|e| &e.kind) {
            Ok(EntryKind::Formula {
                sensitive_inputs,
                used_blank,
            }) => !sensitive_inputs.is_empty() || used_blank.as_ref().is_some_and(|b| !b.is_empty()),
            _ => false,
        }
    }

    pub fn formula_entry(&self, cell: CellId) -> Option<EntryId> {
        self.formula_index.get(&cell).copied()
    }

    pub fn get_or_create_formula_entry(&mut self, cell: CellId, location: CellLocation) -> EntryId {
        if let Some(&id) = self.formula_index.get(&cell) {
            return id;
        }
        let id = self.allocate(CacheEntry::formula(location));
        self.formula_index.insert(cell, id);
        id
    }

    /// Entry for a non-blank literal read by a formula. An existing entry
    /// must hold the same value; a difference means a change was never
    /// notified.
    pub fn get_plain_value_entry(
        &mut self,
        location: CellLocation,
        value: &ValueEval,
    ) -> FormulaResult<EntryId> {
        if let Some(&id) = self.plain_index.get(&location) {
            let cached = self.entry(id)?.value.as_ref();
            if !cached.is_some_and(|c| same_value(c, value)) {
                return Err(FormulaError::internal(format!(
                    "value of {location} changed without a cache notification"
                )));
            }
            self.listen(|l| l.on_cache_hit(location, value));
            return Ok(id);
        }
        let id = self.allocate(CacheEntry::plain(location, value.clone()));
        self.plain_index.insert(location, id);
        self.listen(|l| l.on_read_plain_value(location, value));
        Ok(id)
    }

    /// Store a formula's result together with everything it read, replacing
    /// the previous dependency links
    pub fn update_formula_result(
        &mut self,
        id: EntryId,
        value: ValueEval,
        inputs: Vec<EntryId>,
        used_blank: FormulaUsedBlankCellSet,
    ) -> FormulaResult<()> {
        let previous = self.entry(id)?.sensitive_inputs().to_vec();
        for &input in &inputs {
            self.entry_mut(input)?.consumers.insert(id);
        }
        let kept: AHashSet<EntryId> = inputs.iter().copied().collect();
        for old in previous.into_iter().filter(|old| !kept.contains(old)) {
            self.clear_consuming_cell(old, id)?;
        }
        let entry = self.entry_mut(id)?;
        entry.value = Some(value);
        entry.kind = EntryKind::Formula {
            sensitive_inputs: inputs,
            used_blank: Some(used_blank),
        };
        Ok(())
    }

    fn clear_consuming_cell(&mut self, input: EntryId, consumer: EntryId) -> FormulaResult<()> {
        let entry = self.entry_mut(input)?;
        if !entry.consumers.remove(&consumer) {
            return Err(FormulaError::internal(format!(
                "cache entry for {} is not consumed by {:?}",
                entry.location, consumer
            )));
        }
        Ok(())
    }

    /// Forget a formula's result and its links to the cells it read
    fn clear_formula_entry(&mut self, id: EntryId) -> FormulaResult<()> {
        let inputs = match &mut self.entry_mut(id)?.kind {
            EntryKind::Formula {
                sensitive_inputs,
                used_blank,
            } => {
                *used_blank = None;
                std::mem::take(sensitive_inputs)
            }
            EntryKind::Plain => Vec::new(),
        };
        for input in inputs.into_iter().rev() {
            self.clear_consuming_cell(input, id)?;
        }
        self.entry_mut(id)?.value = None;
        Ok(())
    }

    /// Clear every transitive consumer of `id`, depth first
    fn recurse_clear_cached_formula_results(&mut self, id: EntryId) -> FormulaResult<()> {
        let location = self.entry(id)?.location;
        self.listen(|l| l.on_clear_cached_value(location));

        let mut visited = AHashSet::new();
        let mut stack: Vec<(EntryId, usize)> =
            self.consumers(id).into_iter().rev().map(|c| (c, 1)).collect();
        while let Some((consumer, depth)) = stack.pop() {
            if !visited.insert(consumer) {
                continue;
            }
            let location = self.entry(consumer)?.location;
            log::trace!("clearing dependent {location} at depth {depth}");
            self.listen(|l| l.on_clear_dependent_cached_value(location, depth));
            self.clear_formula_entry(consumer)?;
            stack.extend(
                self.consumers(consumer)
                    .into_iter()
                    .rev()
                    .map(|c| (c, depth + 1)),
            );
        }
        Ok(())
    }

    /// Formulas that read this location while it was blank must recompute
    fn update_any_blank_referencing_formulas(&mut self, location: CellLocation) -> FormulaResult<()> {
        let key = BookSheetKey {
            book: location.book,
            sheet: location.sheet,
        };
        let affected: Vec<EntryId> = self
            .formula_index
            .values()
            .copied()
            .filter(|&id| {
                self.entry(id)
                    .is_ok_and(|e| e.uses_blank(key, location.row, location.col))
            })
            .collect();
        for id in affected {
            self.clear_formula_entry(id)?;
            self.recurse_clear_cached_formula_results(id)?;
        }
        Ok(())
    }

    /// A cell got a new value or formula. `cell` is its state after the change.
    pub fn notify_update_cell(
        &mut self,
        book: usize,
        sheet: usize,
        cell: &EvaluationCell,
    ) -> FormulaResult<()> {
        let location = CellLocation::in_book(book, sheet, cell.row, cell.col);
        let formula_id = self.formula_index.get(&cell.id).copied();
        let plain_id = self.plain_index.get(&location).copied();

        if cell.is_formula {
            match formula_id {
                None => {
                    let id = self.allocate(CacheEntry::formula(location));
                    if plain_id.is_none() {
                        self.listen(|l| l.on_change_from_blank_value(location));
                        self.update_any_blank_referencing_formulas(location)?;
                    }
                    self.formula_index.insert(cell.id, id);
                }
                Some(id) => {
                    self.clear_formula_entry(id)?;
                    self.recurse_clear_cached_formula_results(id)?;
                }
            }
            if let Some(plain) = plain_id {
                // literal replaced by a formula
                self.recurse_clear_cached_formula_results(plain)?;
                self.plain_index.remove(&location);
                self.release(plain)?;
            }
            return Ok(());
        }

        let value = ValueEval::from(&cell.value);
        let is_blank = matches!(value, ValueEval::Blank);
        match plain_id {
            None => {
                if !is_blank {
                    let id = self.allocate(CacheEntry::plain(location, value));
                    if formula_id.is_none() {
                        self.listen(|l| l.on_change_from_blank_value(location));
                        self.update_any_blank_referencing_formulas(location)?;
                    }
                    self.plain_index.insert(location, id);
                }
            }
            Some(id) => {
                let entry = self.entry_mut(id)?;
                let changed = !entry.value.as_ref().is_some_and(|old| same_value(old, &value));
                entry.value = Some(value);
                if changed {
                    self.recurse_clear_cached_formula_results(id)?;
                }
                if is_blank {
                    self.recurse_clear_cached_formula_results(id)?;
                    self.plain_index.remove(&location);
                    self.release(id)?;
                }
            }
        }
        if let Some(id) = formula_id {
            // formula replaced by a literal
            self.formula_index.remove(&cell.id);
            self.clear_formula_entry(id)?;
            self.recurse_clear_cached_formula_results(id)?;
            self.release(id)?;
        }
        Ok(())
    }

    /// A cell is about to be removed. `cell` is its state before removal.
    pub fn notify_delete_cell(
        &mut self,
        book: usize,
        sheet: usize,
        cell: &EvaluationCell,
    ) -> FormulaResult<()> {
        if cell.is_formula {
            // Nothing to do for a formula that was never evaluated
            if let Some(id) = self.formula_index.remove(&cell.id) {
                self.clear_formula_entry(id)?;
                self.recurse_clear_cached_formula_results(id)?;
                self.release(id)?;
            }
            return Ok(());
        }
        let location = CellLocation::in_book(book, sheet, cell.row, cell.col);
        if let Some(id) = self.plain_index.remove(&location) {
            self.recurse_clear_cached_formula_results(id)?;
            self.release(id)?;
        }
        Ok(())
    }

    /// Drop everything
    pub fn clear(&mut self) {
        log::debug!("clearing evaluation cache ({} entries)", self.len());
        self.listen(|l| l.on_clear_whole_cache());
        self.entries.clear();
        self.free.clear();
        self.formula_index.clear();
        self.plain_index.clear();
    }
}
