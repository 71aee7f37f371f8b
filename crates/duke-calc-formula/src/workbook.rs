//! Views of a workbook used by the parser, the renderer and the evaluator
//!
//! Each stage asks for the least it needs: rendering only turns indices back
//! into names, parsing also resolves names to indices, and evaluation reads
//! cells and formula tokens. The in-memory [`duke_calc_core::Workbook`]
//! implements all of them.

use duke_calc_core::{
    Cell, CellId, CellRange, CellValue, FormulaCell, FormulaSource, NameScope, Workbook,
    Worksheet,
};

use crate::error::{FormulaError, FormulaResult};
use crate::functions::FunctionRegistry;
use crate::parser::{parse, FormulaKind};
use crate::shared_formula;
use crate::token::Token;
use crate::version::SpreadsheetVersion;

/// Names needed to turn tokens back into text
pub trait FormulaRenderingWorkbook {
    fn spreadsheet_version(&self) -> SpreadsheetVersion {
        SpreadsheetVersion::Excel2007
    }

    fn sheet_name(&self, index: usize) -> Option<&str>;

    /// Workbook name of an external link
    fn external_link_name(&self, link: u16) -> Option<&str>;

    /// Sheet name recorded for an external link
    fn external_sheet_name(&self, link: u16, index: u16) -> Option<&str>;

    /// Text of a defined name
    fn defined_name(&self, index: u32) -> Option<&str>;
}

/// Name lookups needed while parsing
pub trait FormulaParsingWorkbook: FormulaRenderingWorkbook {
    fn find_sheet(&self, name: &str) -> Option<usize>;

    fn find_external_link(&self, workbook: &str) -> Option<u16>;

    fn find_external_sheet(&self, link: u16, name: &str) -> Option<u16>;

    /// Index of a defined name visible from `sheet`; sheet scope wins
    fn find_defined_name(&self, name: &str, sheet: usize) -> Option<u32>;
}

/// A cell as the evaluator sees it
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationCell {
    /// Stable identity, used to key formula cache entries
    pub id: CellId,
    pub row: u32,
    pub col: u16,
    /// Literal value, or the last cached result of a formula
    pub value: CellValue,
    pub is_formula: bool,
    /// Extent of the array formula group this cell belongs to
    pub array_range: Option<CellRange>,
}

/// Cell lookups on one sheet
pub trait EvaluationSheet {
    /// The stored cell at a position; `None` for absent cells
    fn cell(&self, row: u32, col: u16) -> Option<EvaluationCell>;

    /// Stored cells inside a range, row by row
    fn cells_in_range(&self, range: &CellRange) -> Vec<EvaluationCell>;
}

/// Everything the evaluator reads from a workbook
pub trait EvaluationWorkbook: FormulaParsingWorkbook {
    fn sheet(&self, index: usize) -> Option<&dyn EvaluationSheet>;

    /// Tokens of the formula stored at a cell. Shared formula members get a
    /// rebased copy of the group template; array formula members get the
    /// group formula.
    fn formula_tokens(
        &self,
        sheet: usize,
        row: u32,
        col: u16,
        registry: &FunctionRegistry,
    ) -> FormulaResult<Vec<Token>>;

    /// Tokens of a defined name's formula, as seen from `sheet`
    fn name_tokens(
        &self,
        index: u32,
        sheet: usize,
        registry: &FunctionRegistry,
    ) -> FormulaResult<Vec<Token>>;

    /// Drop any representation the workbook caches for evaluation
    fn clear_cached_results(&mut self) {}
}

/// Storage updates made by the evaluator on behalf of the caller
pub trait ResultWritingWorkbook: EvaluationWorkbook {
    /// Store a formula's freshly computed result, keeping the formula
    fn write_cached_result(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> FormulaResult<()>;

    /// Replace a formula with a literal value
    fn replace_formula(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> FormulaResult<()>;
}

// === In-memory workbook ===

impl FormulaRenderingWorkbook for Workbook {
    fn sheet_name(&self, index: usize) -> Option<&str> {
        self.worksheet(index).map(Worksheet::name)
    }

    fn external_link_name(&self, link: u16) -> Option<&str> {
        self.external_link(link).map(|l| l.workbook.as_str())
    }

    fn external_sheet_name(&self, link: u16, index: u16) -> Option<&str> {
        self.external_link(link)
            .and_then(|l| l.sheets.get(index as usize))
            .map(String::as_str)
    }

    fn defined_name(&self, index: u32) -> Option<&str> {
        self.named_ranges()
            .by_index(index)
            .map(|n| n.name.as_str())
    }
}

impl FormulaParsingWorkbook for Workbook {
    fn find_sheet(&self, name: &str) -> Option<usize> {
        self.sheet_index(name)
    }

    fn find_external_link(&self, workbook: &str) -> Option<u16> {
        self.external_link_index(workbook)
    }

    fn find_external_sheet(&self, link: u16, name: &str) -> Option<u16> {
        self.external_link(link).and_then(|l| l.sheet_index(name))
    }

    fn find_defined_name(&self, name: &str, sheet: usize) -> Option<u32> {
        self.named_ranges().find(name, sheet)
    }
}

fn evaluation_cell(row: u32, col: u16, cell: &Cell) -> EvaluationCell {
    EvaluationCell {
        id: cell.id(),
        row,
        col,
        value: cell.value().clone(),
        is_formula: cell.is_formula(),
        array_range: cell.formula().and_then(|f| f.array_range),
    }
}

impl EvaluationSheet for Worksheet {
    fn cell(&self, row: u32, col: u16) -> Option<EvaluationCell> {
        self.cell_at(row, col)
            .map(|cell| evaluation_cell(row, col, cell))
    }

    fn cells_in_range(&self, range: &CellRange) -> Vec<EvaluationCell> {
        Worksheet::cells_in_range(self, range)
            .map(|(row, col, cell)| evaluation_cell(row, col, cell))
            .collect()
    }
}

fn formula_at(book: &Workbook, sheet: usize, row: u32, col: u16) -> FormulaResult<&FormulaCell> {
    book.worksheet(sheet)
        .and_then(|ws| ws.cell_at(row, col))
        .and_then(Cell::formula)
        .ok_or(FormulaError::UnknownCell { sheet, row, col })
}

/// Formula text owned by the anchor of a shared or array group
fn anchor_text(book: &Workbook, sheet: usize, row: u32, col: u16) -> FormulaResult<&str> {
    formula_at(book, sheet, row, col)?
        .text()
        .ok_or_else(|| FormulaError::internal(format!(
            "formula group anchor at sheet {sheet} row {row} column {col} has no formula text"
        )))
}

impl EvaluationWorkbook for Workbook {
    fn sheet(&self, index: usize) -> Option<&dyn EvaluationSheet> {
        self.worksheet(index).map(|ws| ws as &dyn EvaluationSheet)
    }

    fn formula_tokens(
        &self,
        sheet: usize,
        row: u32,
        col: u16,
        registry: &FunctionRegistry,
    ) -> FormulaResult<Vec<Token>> {
        let formula = formula_at(self, sheet, row, col)?;
        match &formula.source {
            FormulaSource::Text(text) => {
                let kind = if formula.array_range.is_some() {
                    FormulaKind::Array
                } else {
                    FormulaKind::Cell
                };
                parse(text, self, kind, sheet, registry)
            }
            FormulaSource::Shared {
                anchor_row,
                anchor_col,
            } => {
                let text = anchor_text(self, sheet, *anchor_row, *anchor_col)?;
                let template = parse(text, self, FormulaKind::Cell, sheet, registry)?;
                Ok(shared_formula::rebase(
                    &template,
                    row as i64 - *anchor_row as i64,
                    col as i64 - *anchor_col as i64,
                    self.spreadsheet_version(),
                ))
            }
            FormulaSource::Array {
                anchor_row,
                anchor_col,
            } => {
                let text = anchor_text(self, sheet, *anchor_row, *anchor_col)?;
                parse(text, self, FormulaKind::Array, sheet, registry)
            }
        }
    }

    fn name_tokens(
        &self,
        index: u32,
        sheet: usize,
        registry: &FunctionRegistry,
    ) -> FormulaResult<Vec<Token>> {
        let name = self
            .named_ranges()
            .by_index(index)
            .ok_or_else(|| FormulaError::internal(format!("no defined name at index {index}")))?;
        let scope_sheet = match name.scope {
            NameScope::Sheet(s) => s,
            NameScope::Workbook => sheet,
        };
        parse(
            &name.refers_to,
            self,
            FormulaKind::NamedRange,
            scope_sheet,
            registry,
        )
    }
}

impl ResultWritingWorkbook for Workbook {
    fn write_cached_result(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> FormulaResult<()> {
        self.worksheet_mut(sheet)
            .ok_or(FormulaError::UnknownCell { sheet, row, col })?
            .set_formula_result(row, col, value)?;
        Ok(())
    }

    fn replace_formula(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> FormulaResult<()> {
        self.worksheet_mut(sheet)
            .ok_or(FormulaError::UnknownCell { sheet, row, col })?
            .replace_formula_with_value(row, col, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duke_calc_core::CellAddress;

    fn book() -> Workbook {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        ws.set_cell_value_at(0, 0, 1.0).unwrap();
        ws.set_cell_formula_at(0, 1, "A1*2").unwrap();
        ws.set_cell_value_at(3, 3, "far").unwrap();
        wb
    }

    #[test]
    fn test_evaluation_cell_view() {
        let wb = book();
        let sheet = EvaluationWorkbook::sheet(&wb, 0).unwrap();
        let a1 = sheet.cell(0, 0).unwrap();
        assert!(!a1.is_formula);
        assert_eq!(a1.value, CellValue::Number(1.0));
        let b1 = sheet.cell(0, 1).unwrap();
        assert!(b1.is_formula);
        assert_eq!(b1.value, CellValue::Empty);
        assert!(sheet.cell(5, 5).is_none());
    }

    #[test]
    fn test_cells_in_range_skips_outside_columns() {
        let wb = book();
        let sheet = EvaluationWorkbook::sheet(&wb, 0).unwrap();
        let range = CellRange::new(CellAddress::new(0, 1), CellAddress::new(5, 3));
        let found: Vec<_> = sheet
            .cells_in_range(&range)
            .into_iter()
            .map(|c| (c.row, c.col))
            .collect();
        assert_eq!(found, vec![(0, 1), (3, 3)]);
    }

    #[test]
    fn test_formula_tokens_parse_stored_text() {
        let wb = book();
        let registry = FunctionRegistry::new();
        let tokens = wb.formula_tokens(0, 0, 1, &registry).unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(wb.formula_tokens(0, 0, 0, &registry).is_err());
    }
}
