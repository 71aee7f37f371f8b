//! Blank cells read by a formula
//!
//! A formula that reads an empty cell must be recomputed when that cell gets
//! a value, but there is no cache entry to hang the dependency on. Blank
//! reads are kept per book and sheet as row runs that grow into rectangles,
//! since formulas usually read blanks in contiguous blocks.

use ahash::AHashMap;

/// Book and sheet indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookSheetKey {
    pub book: usize,
    pub sheet: usize,
}

#[derive(Debug, Clone, Copy)]
struct Rectangle {
    first_row: u32,
    last_row: u32,
    first_col: u16,
    last_col: u16,
}

impl Rectangle {
    fn contains(&self, row: u32, col: u16) -> bool {
        self.first_row <= row && row <= self.last_row && self.first_col <= col && col <= self.last_col
    }

    /// Grow downwards by a row run with the same columns
    fn accept_row(&mut self, row: u32, first_col: u16, last_col: u16) -> bool {
        if first_col != self.first_col || last_col != self.last_col || row != self.last_row + 1 {
            return false;
        }
        self.last_row = row;
        true
    }
}

/// The row run being built, before it is merged into a rectangle
#[derive(Debug, Clone, Copy)]
struct RowRun {
    row: u32,
    first_col: u16,
    last_col: u16,
}

#[derive(Debug, Default)]
struct SheetGroup {
    rectangles: Vec<Rectangle>,
    current_rectangle: Option<Rectangle>,
    current_run: Option<RowRun>,
}

impl SheetGroup {
    fn add_cell(&mut self, row: u32, col: u16) {
        let Some(run) = &mut self.current_run else {
            self.current_run = Some(RowRun {
                row,
                first_col: col,
                last_col: col,
            });
            return;
        };
        if run.row == row && run.last_col as u32 + 1 == col as u32 {
            run.last_col = col;
            return;
        }
        let finished = *run;
        let merged = self
            .current_rectangle
            .as_mut()
            .is_some_and(|rect| rect.accept_row(finished.row, finished.first_col, finished.last_col));
        if !merged {
            if let Some(rect) = self.current_rectangle.take() {
                self.rectangles.push(rect);
            }
            self.current_rectangle = Some(Rectangle {
                first_row: finished.row,
                last_row: finished.row,
                first_col: finished.first_col,
                last_col: finished.last_col,
            });
        }
        self.current_run = Some(RowRun {
            row,
            first_col: col,
            last_col: col,
        });
    }

    fn add_area(&mut self, first_row: u32, first_col: u16, last_row: u32, last_col: u16) {
        self.rectangles.push(Rectangle {
            first_row,
            last_row,
            first_col,
            last_col,
        });
    }

    fn contains(&self, row: u32, col: u16) -> bool {
        if self.rectangles.iter().rev().any(|r| r.contains(row, col)) {
            return true;
        }
        if self.current_rectangle.is_some_and(|r| r.contains(row, col)) {
            return true;
        }
        self.current_run
            .is_some_and(|run| run.row == row && run.first_col <= col && col <= run.last_col)
    }
}

/// Blank cells read while evaluating one formula
#[derive(Debug, Default)]
pub struct FormulaUsedBlankCellSet {
    sheets: AHashMap<BookSheetKey, SheetGroup>,
}

impl FormulaUsedBlankCellSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cell(&mut self, book: usize, sheet: usize, row: u32, col: u16) {
        self.sheets
            .entry(BookSheetKey { book, sheet })
            .or_default()
            .add_cell(row, col);
    }

    /// Record a whole rectangle at once
    pub fn add_area(
        &mut self,
        book: usize,
        sheet: usize,
        first_row: u32,
        first_col: u16,
        last_row: u32,
        last_col: u16,
    ) {
        self.sheets
            .entry(BookSheetKey { book, sheet })
            .or_default()
            .add_area(first_row, first_col, last_row, last_col);
    }

    pub fn contains_cell(&self, key: BookSheetKey, row: u32, col: u16) -> bool {
        self.sheets
            .get(&key)
            .is_some_and(|group| group.contains(row, col))
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}
