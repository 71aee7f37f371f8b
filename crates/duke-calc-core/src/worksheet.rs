//! Worksheet type

use std::collections::BTreeMap;

use crate::cell::{
    Cell, CellAddress, CellContent, CellRange, CellValue, FormulaCell, FormulaSource,
};
use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};

/// A worksheet (single sheet in a workbook)
///
/// Cells are stored sparsely, keyed by `(row, col)` in row-major order.
#[derive(Debug, Clone)]
pub struct Worksheet {
    name: String,
    cells: BTreeMap<(u32, u16), Cell>,
}

impl Worksheet {
    /// Create a new worksheet with the given name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    // === Cell Access ===

    /// Get a cell by address string (e.g., "A1")
    pub fn cell(&self, address: &str) -> Result<Option<&Cell>> {
        let addr = CellAddress::parse(address)?;
        Ok(self.cell_at(addr.row, addr.col))
    }

    /// Get a cell by row and column indices
    pub fn cell_at(&self, row: u32, col: u16) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Get cell value; formulas report their cached result
    pub fn get_value(&self, address: &str) -> Result<CellValue> {
        let addr = CellAddress::parse(address)?;
        Ok(self.get_value_at(addr.row, addr.col))
    }

    /// Get cell value by indices
    pub fn get_value_at(&self, row: u32, col: u16) -> CellValue {
        self.cell_at(row, col)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    /// Formula text of a cell that owns one
    pub fn get_formula_at(&self, row: u32, col: u16) -> Option<&str> {
        self.cell_at(row, col)
            .and_then(Cell::formula)
            .and_then(FormulaCell::text)
    }

    // === Cell Modification ===

    /// Set a cell value by address string
    pub fn set_cell_value<V: Into<CellValue>>(&mut self, address: &str, value: V) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_value_at(addr.row, addr.col, value)
    }

    /// Set a cell value by row and column indices.
    ///
    /// Setting `CellValue::Empty` removes the cell.
    pub fn set_cell_value_at<V: Into<CellValue>>(
        &mut self,
        row: u32,
        col: u16,
        value: V,
    ) -> Result<()> {
        validate_cell_position(row, col)?;
        self.check_not_grouped(row, col)?;
        let value = value.into();
        if value.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.put(row, col, CellContent::Value(value));
        }
        Ok(())
    }

    /// Set a cell formula by address string
    pub fn set_cell_formula(&mut self, address: &str, formula: &str) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_formula_at(addr.row, addr.col, formula)
    }

    /// Set a cell formula by row and column indices. A leading `=` is optional.
    pub fn set_cell_formula_at(&mut self, row: u32, col: u16, formula: &str) -> Result<()> {
        validate_cell_position(row, col)?;
        self.check_not_grouped(row, col)?;
        self.put(
            row,
            col,
            CellContent::Formula(FormulaCell::new(strip_equals(formula))),
        );
        Ok(())
    }

    /// Enter one formula for a whole rectangle as an array formula
    pub fn set_array_formula(&mut self, range: CellRange, formula: &str) -> Result<()> {
        self.set_group(range, formula, |anchor_row, anchor_col| FormulaSource::Array {
            anchor_row,
            anchor_col,
        })?;
        for addr in range.cells() {
            if let Some(f) = self.cell_formula_mut(addr.row, addr.col) {
                f.array_range = Some(range);
            }
        }
        Ok(())
    }

    /// Enter a shared formula: the anchor (top-left) cell holds the template,
    /// every other cell in the range applies it at its own offset
    pub fn set_shared_formula(&mut self, range: CellRange, formula: &str) -> Result<()> {
        self.set_group(range, formula, |anchor_row, anchor_col| FormulaSource::Shared {
            anchor_row,
            anchor_col,
        })?;
        if let Some(f) = self.cell_formula_mut(range.start.row, range.start.col) {
            f.shared_range = Some(range);
        }
        Ok(())
    }

    fn set_group(
        &mut self,
        range: CellRange,
        formula: &str,
        member: impl Fn(u32, u16) -> FormulaSource,
    ) -> Result<()> {
        validate_cell_position(range.end.row, range.end.col)?;
        for addr in range.cells() {
            self.check_not_grouped(addr.row, addr.col)?;
        }
        let (anchor_row, anchor_col) = (range.start.row, range.start.col);
        for addr in range.cells() {
            let source = if (addr.row, addr.col) == (anchor_row, anchor_col) {
                FormulaSource::Text(strip_equals(formula).to_string())
            } else {
                member(anchor_row, anchor_col)
            };
            let mut cell = FormulaCell::new(String::new());
            cell.source = source;
            self.put(addr.row, addr.col, CellContent::Formula(cell));
        }
        Ok(())
    }

    /// Remove an array or shared formula group, given any of its cells
    pub fn clear_formula_group(&mut self, row: u32, col: u16) -> Result<CellRange> {
        let range = self.group_range(row, col).ok_or_else(|| {
            Error::NotInFormulaGroup(CellAddress::new(row, col).to_string())
        })?;
        for addr in range.cells() {
            self.cells.remove(&(addr.row, addr.col));
        }
        Ok(range)
    }

    /// Give each member of the shared formula anchored at `row`,`col` a
    /// formula text of its own. `texts` must cover every member, anchor
    /// included. Cell identities and cached results are kept.
    pub fn unshare_formula(&mut self, row: u32, col: u16, texts: Vec<(u32, u16, String)>) -> Result<()> {
        let range = self
            .cell_at(row, col)
            .and_then(Cell::formula)
            .and_then(|f| f.shared_range)
            .ok_or_else(|| Error::NotInFormulaGroup(CellAddress::new(row, col).to_string()))?;
        if texts.len() as u64 != range.cell_count()
            || texts.iter().any(|(r, c, _)| !range.contains(*r, *c))
        {
            return Err(Error::InvalidRange(format!(
                "formula texts do not cover {}",
                range.to_a1_string()
            )));
        }
        for (r, c, text) in texts {
            if let Some(formula) = self.cell_formula_mut(r, c) {
                formula.source = FormulaSource::Text(strip_equals(&text).to_string());
                formula.shared_range = None;
            }
        }
        Ok(())
    }

    /// Store the cached result of a formula cell
    pub fn set_formula_result(&mut self, row: u32, col: u16, value: CellValue) -> Result<()> {
        let formula = self.cell_formula_mut(row, col).ok_or_else(|| {
            Error::NotAFormula(CellAddress::new(row, col).to_string())
        })?;
        formula.cached_result = value;
        Ok(())
    }

    /// Replace a formula with a literal value, keeping the cell identity
    pub fn replace_formula_with_value(
        &mut self,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> Result<()> {
        self.check_not_grouped(row, col)?;
        if !self.cells.contains_key(&(row, col)) {
            return Err(Error::EmptyCell(CellAddress::new(row, col).to_string()));
        }
        if value.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.put(row, col, CellContent::Value(value));
        }
        Ok(())
    }

    /// Remove a cell, returning it
    pub fn clear_cell_at(&mut self, row: u32, col: u16) -> Result<Option<Cell>> {
        self.check_not_grouped(row, col)?;
        Ok(self.cells.remove(&(row, col)))
    }

    /// Clear a cell by address
    pub fn clear_cell(&mut self, address: &str) -> Result<Option<Cell>> {
        let addr = CellAddress::parse(address)?;
        self.clear_cell_at(addr.row, addr.col)
    }

    /// Move the cell records of rows `first..=last` by `amount` rows.
    ///
    /// Destination cells are overwritten. Formula text is not touched here;
    /// adjusting references is the formula engine's job.
    pub fn move_rows(&mut self, first: u32, last: u32, amount: i32) -> Result<()> {
        if first > last {
            return Err(Error::InvalidRange(format!("rows {first}..={last}")));
        }
        let dest_first = first as i64 + amount as i64;
        let dest_last = last as i64 + amount as i64;
        if dest_first < 0 || dest_last >= MAX_ROWS as i64 {
            return Err(Error::RowOutOfBounds(dest_last.max(0) as u32, MAX_ROWS - 1));
        }

        let moved: Vec<((u32, u16), Cell)> = self
            .cells
            .range((first, 0)..=(last, MAX_COLS - 1))
            .map(|(k, c)| (*k, c.clone()))
            .collect();
        for (key, _) in &moved {
            self.cells.remove(key);
        }
        let (dest_first, dest_last) = (dest_first as u32, dest_last as u32);
        let stale: Vec<(u32, u16)> = self
            .cells
            .range((dest_first, 0)..=(dest_last, MAX_COLS - 1))
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.cells.remove(&key);
        }
        for ((row, col), mut cell) in moved {
            let row = (row as i64 + amount as i64) as u32;
            if let Some(formula) = cell.formula_mut() {
                shift_group_rows(formula, amount as i64);
            }
            self.cells.insert((row, col), cell);
        }
        Ok(())
    }

    /// Replace the text of a formula, keeping its identity, cached result and
    /// group extent. Group members other than the anchor have no text of their own.
    pub fn set_formula_text(&mut self, row: u32, col: u16, formula: &str) -> Result<()> {
        let cell = self.cell_formula_mut(row, col).ok_or_else(|| {
            Error::NotAFormula(CellAddress::new(row, col).to_string())
        })?;
        match &mut cell.source {
            FormulaSource::Text(text) => {
                *text = strip_equals(formula).to_string();
                Ok(())
            }
            _ => Err(Error::FormulaGroupConflict(
                CellAddress::new(row, col).to_string(),
            )),
        }
    }

    // === Iteration ===

    /// Iterate over stored cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (u32, u16, &Cell)> {
        self.cells.iter().map(|(&(r, c), cell)| (r, c, cell))
    }

    /// Iterate over stored cells inside a range, row by row
    pub fn cells_in_range(
        &self,
        range: &CellRange,
    ) -> impl Iterator<Item = (u32, u16, &Cell)> + '_ {
        let (first_col, last_col) = (range.start.col, range.end.col);
        self.cells
            .range((range.start.row, 0)..=(range.end.row, u16::MAX))
            .filter(move |(&(_, c), _)| c >= first_col && c <= last_col)
            .map(|(&(r, c), cell)| (r, c, cell))
    }

    /// Iterate over formula cells
    pub fn formula_cells(&self) -> impl Iterator<Item = (u32, u16, &FormulaCell)> {
        self.cells()
            .filter_map(|(r, c, cell)| cell.formula().map(|f| (r, c, f)))
    }

    /// Number of stored cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Get the used range (bounds of all stored cells)
    pub fn used_range(&self) -> Option<CellRange> {
        let mut keys = self.cells.keys();
        let &(first_row, first_col) = keys.next()?;
        let (mut min_col, mut max_col, mut max_row) = (first_col, first_col, first_row);
        for &(r, c) in keys {
            min_col = min_col.min(c);
            max_col = max_col.max(c);
            max_row = max_row.max(r);
        }
        Some(CellRange::from_indices(first_row, min_col, max_row, max_col))
    }

    fn put(&mut self, row: u32, col: u16, content: CellContent) {
        match self.cells.get_mut(&(row, col)) {
            Some(cell) => cell.set_content(content),
            None => {
                self.cells.insert((row, col), Cell::new(content));
            }
        }
    }

    fn cell_formula_mut(&mut self, row: u32, col: u16) -> Option<&mut FormulaCell> {
        self.cells.get_mut(&(row, col)).and_then(Cell::formula_mut)
    }

    /// Extent of the array or shared formula group a cell belongs to
    pub fn group_range(&self, row: u32, col: u16) -> Option<CellRange> {
        let formula = self.cell_at(row, col)?.formula()?;
        if let Some(range) = formula.array_range {
            return Some(range);
        }
        let (anchor_row, anchor_col) = match formula.source {
            FormulaSource::Shared {
                anchor_row,
                anchor_col,
            } => (anchor_row, anchor_col),
            _ => (row, col),
        };
        self.cell_at(anchor_row, anchor_col)?.formula()?.shared_range
    }

    fn check_not_grouped(&self, row: u32, col: u16) -> Result<()> {
        match self.group_range(row, col) {
            Some(_) => Err(Error::FormulaGroupConflict(
                CellAddress::new(row, col).to_string(),
            )),
            None => Ok(()),
        }
    }
}

/// Group anchors and extents travel with moved formula cells
fn shift_group_rows(formula: &mut FormulaCell, amount: i64) {
    let shift = |row: u32| (row as i64 + amount).clamp(0, MAX_ROWS as i64 - 1) as u32;
    match &mut formula.source {
        FormulaSource::Shared { anchor_row, .. } | FormulaSource::Array { anchor_row, .. } => {
            *anchor_row = shift(*anchor_row);
        }
        FormulaSource::Text(_) => {}
    }
    for range in [&mut formula.array_range, &mut formula.shared_range]
        .into_iter()
        .flatten()
    {
        range.start.row = shift(range.start.row);
        range.end.row = shift(range.end.row);
    }
}

fn strip_equals(formula: &str) -> &str {
    let formula = formula.trim_start();
    formula.strip_prefix('=').unwrap_or(formula)
}

fn validate_cell_position(row: u32, col: u16) -> Result<()> {
    if row >= MAX_ROWS {
        return Err(Error::RowOutOfBounds(row, MAX_ROWS - 1));
    }
    if col >= MAX_COLS {
        return Err(Error::ColumnOutOfBounds(col as u32, MAX_COLS - 1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_and_get_values() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_value("A1", 2.0).unwrap();
        ws.set_cell_value("B3", "x").unwrap();

        assert_eq!(ws.get_value("A1").unwrap(), CellValue::Number(2.0));
        assert_eq!(ws.get_value_at(2, 1), CellValue::string("x"));
        assert_eq!(ws.get_value("C9").unwrap(), CellValue::Empty);
        assert_eq!(ws.used_range(), Some(CellRange::parse("A1:B3").unwrap()));
    }

    #[test]
    fn test_overwrite_keeps_identity_but_clear_does_not() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_value_at(0, 0, 1.0).unwrap();
        let id = ws.cell_at(0, 0).unwrap().id();

        ws.set_cell_formula_at(0, 0, "=1+1").unwrap();
        assert_eq!(ws.cell_at(0, 0).unwrap().id(), id);
        assert_eq!(ws.get_formula_at(0, 0), Some("1+1"));

        ws.clear_cell_at(0, 0).unwrap();
        ws.set_cell_value_at(0, 0, 1.0).unwrap();
        assert_ne!(ws.cell_at(0, 0).unwrap().id(), id);
    }

    #[test]
    fn test_setting_empty_removes_cell() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_value_at(0, 0, 1.0).unwrap();
        ws.set_cell_value_at(0, 0, CellValue::Empty).unwrap();
        assert!(ws.cell_at(0, 0).is_none());
    }

    #[test]
    fn test_array_formula_group() {
        let mut ws = Worksheet::new("Sheet1");
        let range = CellRange::parse("B1:B3").unwrap();
        ws.set_array_formula(range, "=A1:A3*2").unwrap();

        let member = ws.cell_at(2, 1).unwrap().formula().unwrap();
        assert_eq!(
            member.source,
            FormulaSource::Array {
                anchor_row: 0,
                anchor_col: 1
            }
        );
        assert_eq!(member.array_range, Some(range));
        assert_eq!(ws.get_formula_at(0, 1), Some("A1:A3*2"));

        assert!(ws.set_cell_value_at(1, 1, 5.0).is_err());
        assert_eq!(ws.clear_formula_group(1, 1).unwrap(), range);
        assert_eq!(ws.cell_count(), 0);
    }

    #[test]
    fn test_shared_formula_group() {
        let mut ws = Worksheet::new("Sheet1");
        let range = CellRange::parse("C1:C4").unwrap();
        ws.set_shared_formula(range, "A1+B1").unwrap();

        assert_eq!(ws.cell_at(3, 2).unwrap().cell_type(), CellType::Formula);
        assert!(ws.clear_cell_at(2, 2).is_err());
        assert_eq!(ws.clear_formula_group(3, 2).unwrap(), range);
    }

    #[test]
    fn test_move_rows_overwrites_destination() {
        let mut ws = Worksheet::new("Sheet1");
        for row in 0..6 {
            ws.set_cell_value_at(row, 0, row as f64).unwrap();
        }
        ws.move_rows(0, 1, 3).unwrap();

        assert_eq!(ws.get_value_at(0, 0), CellValue::Empty);
        assert_eq!(ws.get_value_at(3, 0), CellValue::Number(0.0));
        assert_eq!(ws.get_value_at(4, 0), CellValue::Number(1.0));
        assert_eq!(ws.get_value_at(5, 0), CellValue::Number(5.0));
        assert!(ws.move_rows(0, 0, -1).is_err());
        assert!(matches!(ws.move_rows(5, 2, 1), Err(Error::InvalidRange(_))));
        assert_eq!(ws.get_value_at(5, 0), CellValue::Number(5.0));
    }

    #[test]
    fn test_move_rows_carries_formula_groups() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_shared_formula(CellRange::from_indices(0, 1, 1, 1), "A1*2")
            .unwrap();
        ws.move_rows(0, 1, 4).unwrap();

        let anchor = ws.cell_at(4, 1).unwrap().formula().unwrap();
        assert_eq!(anchor.shared_range, Some(CellRange::from_indices(4, 1, 5, 1)));
        let member = ws.cell_at(5, 1).unwrap().formula().unwrap();
        assert_eq!(
            member.source,
            FormulaSource::Shared {
                anchor_row: 4,
                anchor_col: 1
            }
        );
    }

    #[test]
    fn test_unshare_formula() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_shared_formula(CellRange::from_indices(0, 1, 1, 1), "A1*2")
            .unwrap();
        let id = ws.cell_at(1, 1).unwrap().id();
        assert!(ws
            .unshare_formula(0, 1, vec![(0, 1, "A1*2".into())])
            .is_err());
        assert!(matches!(
            ws.unshare_formula(1, 1, Vec::new()),
            Err(Error::NotInFormulaGroup(_))
        ));

        ws.unshare_formula(0, 1, vec![(0, 1, "A1*2".into()), (1, 1, "=A2*2".into())])
            .unwrap();
        assert_eq!(ws.get_formula_at(1, 1), Some("A2*2"));
        assert_eq!(ws.cell_at(1, 1).unwrap().id(), id);
        assert_eq!(ws.group_range(0, 1), None);
        ws.set_cell_value_at(1, 1, 3.0).unwrap();
    }

    #[test]
    fn test_set_formula_text_keeps_identity() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_formula_at(0, 0, "B1+1").unwrap();
        ws.set_formula_result(0, 0, CellValue::Number(3.0)).unwrap();
        let id = ws.cell_at(0, 0).unwrap().id();

        ws.set_formula_text(0, 0, "=B2+1").unwrap();
        let cell = ws.cell_at(0, 0).unwrap();
        assert_eq!(cell.id(), id);
        assert_eq!(ws.get_formula_at(0, 0), Some("B2+1"));
        assert_eq!(cell.formula().unwrap().cached_result, CellValue::Number(3.0));
        assert!(ws.set_formula_text(5, 5, "1").is_err());
    }
}
