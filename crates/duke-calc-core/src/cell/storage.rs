//! Cell storage records
//!
//! A stored cell owns an identity that survives value edits. The formula
//! engine keys its memoized results on that identity, so replacing a value
//! in place keeps the key while clearing and re-creating a cell does not.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{CellRange, CellType, CellValue};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a stored cell, independent of its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Allocate a fresh identity
    pub fn next() -> Self {
        CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identity value
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Where a formula cell gets its formula text from
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaSource {
    /// Formula text owned by this cell (without the leading `=`)
    Text(String),
    /// Member of a shared formula; the template lives on the anchor cell and
    /// is rebased by this cell's offset from the anchor
    Shared { anchor_row: u32, anchor_col: u16 },
    /// Member of an array formula; the formula lives on the anchor cell and
    /// this cell shows one element of its result
    Array { anchor_row: u32, anchor_col: u16 },
}

/// A formula plus its last calculated result
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaCell {
    pub source: FormulaSource,
    /// Last calculated value, `Empty` until first calculated
    pub cached_result: CellValue,
    /// Extent of the array formula group this cell belongs to
    pub array_range: Option<CellRange>,
    /// Extent of the shared formula group, stored on the anchor only
    pub shared_range: Option<CellRange>,
}

impl FormulaCell {
    /// A stand-alone formula
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            source: FormulaSource::Text(text.into()),
            cached_result: CellValue::Empty,
            array_range: None,
            shared_range: None,
        }
    }

    /// The formula text, if this cell owns it
    pub fn text(&self) -> Option<&str> {
        match &self.source {
            FormulaSource::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// What a cell holds
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Value(CellValue),
    Formula(FormulaCell),
}

/// A stored cell
#[derive(Debug, Clone)]
pub struct Cell {
    id: CellId,
    content: CellContent,
}

impl Cell {
    /// Create a cell with a fresh identity
    pub fn new(content: CellContent) -> Self {
        Self {
            id: CellId::next(),
            content,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn content(&self) -> &CellContent {
        &self.content
    }

    /// Replace the content, keeping the identity
    pub fn set_content(&mut self, content: CellContent) {
        self.content = content;
    }

    /// Type tag; formula cells report [`CellType::Formula`]
    pub fn cell_type(&self) -> CellType {
        match &self.content {
            CellContent::Value(v) => v.cell_type(),
            CellContent::Formula(_) => CellType::Formula,
        }
    }

    /// The literal value, or the cached result of a formula
    pub fn value(&self) -> &CellValue {
        match &self.content {
            CellContent::Value(v) => v,
            CellContent::Formula(f) => &f.cached_result,
        }
    }

    pub fn formula(&self) -> Option<&FormulaCell> {
        match &self.content {
            CellContent::Formula(f) => Some(f),
            CellContent::Value(_) => None,
        }
    }

    pub fn formula_mut(&mut self) -> Option<&mut FormulaCell> {
        match &mut self.content {
            CellContent::Formula(f) => Some(f),
            CellContent::Value(_) => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.content, CellContent::Formula(_))
    }
}
