//! Reference adjustment for structural edits
//!
//! A [`FormulaShifter`] describes one edit (rows moved, rows copied, or a
//! sheet moved) and rewrites the references inside a formula's tokens to
//! follow it. References that end up pointing at overwritten cells become
//! deleted references (`#REF!`). Deleted tokens have the same encoded size
//! as the tokens they replace, so jump distances stay valid.

use crate::error::{FormulaError, FormulaResult};
use crate::token::{AreaRef, ExternSheet, Token};
use crate::version::SpreadsheetVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftMode {
    /// Rows `first..=last` of `sheet` move by `amount`, overwriting the destination
    RowMove { sheet: usize, first: u32, last: u32, amount: i64 },
    /// Formulas from rows `first..=last` are copied `amount` rows away
    RowCopy { first: u32, last: u32, amount: i64 },
    /// The sheet at `src` moves to position `dst`
    SheetMove { src: usize, dst: usize },
}

/// One structural edit to apply to formula references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaShifter {
    mode: ShiftMode,
    version: SpreadsheetVersion,
}

impl FormulaShifter {
    /// Rows `first..=last` on `sheet` move by `amount` (negative is up)
    pub fn row_mover(
        sheet: usize,
        first: u32,
        last: u32,
        amount: i32,
        version: SpreadsheetVersion,
    ) -> Self {
        Self {
            mode: ShiftMode::RowMove {
                sheet,
                first,
                last,
                amount: amount as i64,
            },
            version,
        }
    }

    /// Formulas in rows `first..=last` are copied `amount` rows away
    pub fn row_copier(first: u32, last: u32, amount: i32, version: SpreadsheetVersion) -> Self {
        Self {
            mode: ShiftMode::RowCopy {
                first,
                last,
                amount: amount as i64,
            },
            version,
        }
    }

    /// The sheet at index `src` moves to index `dst`
    pub fn sheet_mover(src: usize, dst: usize) -> Self {
        Self {
            mode: ShiftMode::SheetMove { src, dst },
            version: SpreadsheetVersion::default(),
        }
    }

    /// Rewrite the references of one formula living on `current_sheet`.
    /// Returns whether any token changed.
    pub fn adjust_formula(&self, tokens: &mut [Token], current_sheet: usize) -> FormulaResult<bool> {
        let mut changed = false;
        for token in tokens.iter_mut() {
            let replacement = match self.mode {
                ShiftMode::RowMove { .. } => self.adjust_for_row_move(token, current_sheet)?,
                ShiftMode::RowCopy { .. } => self.adjust_for_row_copy(token),
                ShiftMode::SheetMove { src, dst } => adjust_for_sheet_move(token, src, dst),
            };
            if let Some(new_token) = replacement {
                *token = new_token;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn adjust_for_row_move(&self, token: &Token, current_sheet: usize) -> FormulaResult<Option<Token>> {
        let ShiftMode::RowMove { sheet, .. } = self.mode else {
            return Ok(None);
        };
        let on_moved_sheet = |s: &ExternSheet| s.is_local_sheet(sheet);
        Ok(match token {
            Token::Ref { addr, class } if current_sheet == sheet => {
                match self.move_row(addr.row)? {
                    RowFate::Unchanged => None,
                    RowFate::Moved(row) => Some(Token::Ref {
                        addr: addr.with_row(row),
                        class: *class,
                    }),
                    RowFate::Deleted => Some(Token::RefErr { class: *class }),
                }
            }
            Token::Ref3d { sheet: s, addr, class } if on_moved_sheet(s) => {
                match self.move_row(addr.row)? {
                    RowFate::Unchanged => None,
                    RowFate::Moved(row) => Some(Token::Ref3d {
                        sheet: *s,
                        addr: addr.with_row(row),
                        class: *class,
                    }),
                    RowFate::Deleted => Some(Token::DeletedRef3d {
                        sheet: *s,
                        class: *class,
                    }),
                }
            }
            Token::Area { area, class } if current_sheet == sheet => {
                match self.move_area(area)? {
                    AreaFate::Unchanged => None,
                    AreaFate::Resized(area) => Some(Token::Area { area, class: *class }),
                    AreaFate::Deleted => Some(Token::AreaErr { class: *class }),
                }
            }
            Token::Area3d { sheet: s, area, class } if on_moved_sheet(s) => {
                match self.move_area(area)? {
                    AreaFate::Unchanged => None,
                    AreaFate::Resized(area) => Some(Token::Area3d {
                        sheet: *s,
                        area,
                        class: *class,
                    }),
                    AreaFate::Deleted => Some(Token::DeletedArea3d {
                        sheet: *s,
                        class: *class,
                    }),
                }
            }
            _ => None,
        })
    }

    fn move_row(&self, row: u32) -> FormulaResult<RowFate> {
        let ShiftMode::RowMove { first, last, amount, .. } = self.mode else {
            return Ok(RowFate::Unchanged);
        };
        let (first, last, row) = (first as i64, last as i64, row as i64);
        if first <= row && row <= last {
            return Ok(match self.row_on_sheet(row + amount) {
                Some(row) => RowFate::Moved(row),
                None => RowFate::Deleted,
            });
        }
        let (dest_first, dest_last) = (first + amount, last + amount);
        if dest_last < row || row < dest_first {
            return Ok(RowFate::Unchanged);
        }
        if dest_first <= row && row <= dest_last {
            return Ok(RowFate::Deleted);
        }
        Err(self.not_covered(row, row))
    }

    /// Case analysis of a row move against an area's row span
    fn move_area(&self, area: &AreaRef) -> FormulaResult<AreaFate> {
        let ShiftMode::RowMove { first, last, amount, .. } = self.mode else {
            return Ok(AreaFate::Unchanged);
        };
        let (first, last) = (first as i64, last as i64);
        let (a_first, a_last) = (area.first.row as i64, area.last.row as i64);
        let resized = |top: i64, bottom: i64| match (self.row_on_sheet(top), self.row_on_sheet(bottom)) {
            (Some(top), Some(bottom)) => {
                let mut out = *area;
                out.first = out.first.with_row(top);
                out.last = out.last.with_row(bottom);
                AreaFate::Resized(out)
            }
            _ => AreaFate::Deleted,
        };

        if first <= a_first && a_last <= last {
            // The moved rows carry the whole area along
            return Ok(resized(a_first + amount, a_last + amount));
        }

        let (dest_first, dest_last) = (first + amount, last + amount);

        if a_first < first && last < a_last {
            // Moved rows were strictly inside the area
            if dest_first < a_first && a_first <= dest_last {
                return Ok(resized(dest_last + 1, a_last));
            }
            if dest_first <= a_last && a_last < dest_last {
                return Ok(resized(a_first, dest_first - 1));
            }
            return Ok(AreaFate::Unchanged);
        }

        if first <= a_first && a_first <= last {
            // Moved rows include the top of the area but not the bottom
            if amount < 0 {
                return Ok(resized(a_first + amount, a_last));
            }
            if dest_first > a_last {
                return Ok(AreaFate::Unchanged);
            }
            let mut new_first = a_first + amount;
            if dest_last < a_last {
                return Ok(resized(new_first, a_last));
            }
            let remaining_top = last + 1;
            if dest_first > remaining_top {
                new_first = remaining_top;
            }
            return Ok(resized(new_first, a_last.max(dest_last)));
        }

        if first <= a_last && a_last <= last {
            // Moved rows include the bottom of the area but not the top
            if amount > 0 {
                return Ok(resized(a_first, a_last + amount));
            }
            if dest_last < a_first {
                return Ok(AreaFate::Unchanged);
            }
            let mut new_last = a_last + amount;
            if dest_first > a_first {
                return Ok(resized(a_first, new_last));
            }
            let remaining_bottom = first - 1;
            if dest_last < remaining_bottom {
                new_last = remaining_bottom;
            }
            return Ok(resized(a_first.min(dest_first), new_last));
        }

        // The source rows miss the area; only the destination can clash
        if dest_last < a_first || a_last < dest_first {
            return Ok(AreaFate::Unchanged);
        }
        if dest_first <= a_first && a_last <= dest_last {
            return Ok(AreaFate::Deleted);
        }
        if a_first <= dest_first && dest_last <= a_last {
            return Ok(AreaFate::Unchanged);
        }
        if dest_first < a_first && a_first <= dest_last {
            return Ok(resized(dest_last + 1, a_last));
        }
        if dest_first <= a_last && a_last < dest_last {
            return Ok(resized(a_first, dest_first - 1));
        }
        Err(self.not_covered(a_first, a_last))
    }

    /// A row index after shifting, or `None` when it falls off the grid
    fn row_on_sheet(&self, row: i64) -> Option<u32> {
        u32::try_from(row)
            .ok()
            .filter(|row| *row <= self.version.last_row_index())
    }

    fn not_covered(&self, a_first: i64, a_last: i64) -> FormulaError {
        FormulaError::internal(format!(
            "row shift situation not covered: {:?} against rows {}..={}",
            self.mode, a_first, a_last
        ))
    }

    fn adjust_for_row_copy(&self, token: &Token) -> Option<Token> {
        let ShiftMode::RowCopy { first, last, amount } = self.mode else {
            return None;
        };
        let rows = 0..=self.version.last_row_index() as i64;
        // Copies that land off the sheet lose every relative reference
        let lands_on_sheet =
            rows.contains(&(first as i64 + amount)) && rows.contains(&(last as i64 + amount));
        let shift = |row: u32| {
            let new_row = row as i64 + amount;
            (lands_on_sheet && rows.contains(&new_row)).then_some(new_row as u32)
        };
        match token {
            Token::Ref { addr, class } if !addr.row_absolute => Some(match shift(addr.row) {
                Some(row) => Token::Ref {
                    addr: addr.with_row(row),
                    class: *class,
                },
                None => Token::RefErr { class: *class },
            }),
            Token::Ref3d { sheet, addr, class } if !addr.row_absolute => Some(match shift(addr.row) {
                Some(row) => Token::Ref3d {
                    sheet: *sheet,
                    addr: addr.with_row(row),
                    class: *class,
                },
                None => Token::DeletedRef3d {
                    sheet: *sheet,
                    class: *class,
                },
            }),
            Token::Area { area, class } => match copy_area(area, shift)? {
                Some(area) => Some(Token::Area { area, class: *class }),
                None => Some(Token::AreaErr { class: *class }),
            },
            Token::Area3d { sheet, area, class } => match copy_area(area, shift)? {
                Some(area) => Some(Token::Area3d {
                    sheet: *sheet,
                    area,
                    class: *class,
                }),
                None => Some(Token::DeletedArea3d {
                    sheet: *sheet,
                    class: *class,
                }),
            },
            _ => None,
        }
    }
}

/// Shift the relative rows of a copied area. `None` means unchanged;
/// `Some(None)` means a corner left the sheet.
fn copy_area(area: &AreaRef, shift: impl Fn(u32) -> Option<u32>) -> Option<Option<AreaRef>> {
    if area.first.row_absolute && area.last.row_absolute {
        return None;
    }
    let mut out = *area;
    for corner in [&mut out.first, &mut out.last] {
        if !corner.row_absolute {
            match shift(corner.row) {
                Some(row) => *corner = corner.with_row(row),
                None => return Some(None),
            }
        }
    }
    Some(Some(out.normalized()))
}

fn adjust_for_sheet_move(token: &Token, src: usize, dst: usize) -> Option<Token> {
    let remap = |sheet: &ExternSheet| -> Option<ExternSheet> {
        if sheet.link.is_some() {
            return None;
        }
        let first = moved_sheet_index(sheet.first as usize, src, dst);
        let last = moved_sheet_index(sheet.last as usize, src, dst);
        if first.is_none() && last.is_none() {
            return None;
        }
        let first = first.unwrap_or(sheet.first as usize) as u16;
        let last = last.unwrap_or(sheet.last as usize) as u16;
        Some(ExternSheet {
            link: None,
            first: first.min(last),
            last: first.max(last),
        })
    };
    let mut out = token.clone();
    let sheet = match &mut out {
        Token::Ref3d { sheet, .. }
        | Token::Area3d { sheet, .. }
        | Token::DeletedRef3d { sheet, .. }
        | Token::DeletedArea3d { sheet, .. } => sheet,
        _ => return None,
    };
    *sheet = remap(sheet)?;
    Some(out)
}

/// New position of the sheet at `index` after moving `src` to `dst`,
/// or `None` when it keeps its position
fn moved_sheet_index(index: usize, src: usize, dst: usize) -> Option<usize> {
    if index < src.min(dst) || index > src.max(dst) {
        return None;
    }
    if index == src {
        return Some(dst);
    }
    if dst < src {
        Some(index + 1)
    } else {
        Some(index - 1)
    }
}

enum RowFate {
    Unchanged,
    Moved(u32),
    Deleted,
}

enum AreaFate {
    Unchanged,
    Resized(AreaRef),
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::parser::{parse, FormulaKind};
    use crate::render::to_formula_string;
    use duke_calc_core::Workbook;
    use pretty_assertions::assert_eq;

    fn book() -> Workbook {
        let mut wb = Workbook::new();
        wb.add_worksheet_with_name("Sheet2").unwrap();
        wb.add_worksheet_with_name("Sheet3").unwrap();
        wb
    }

    /// Parse on sheet 0, shift, render
    fn shifted(shifter: FormulaShifter, formula: &str) -> (bool, String) {
        let wb = book();
        let registry = FunctionRegistry::new();
        let mut tokens = parse(formula, &wb, FormulaKind::Cell, 0, &registry).unwrap();
        let changed = shifter.adjust_formula(&mut tokens, 0).unwrap();
        (changed, to_formula_string(&wb, &tokens, &registry).unwrap())
    }

    fn mover(first: u32, last: u32, amount: i32) -> FormulaShifter {
        // rows are zero-based here; A5 is row 4
        FormulaShifter::row_mover(0, first - 1, last - 1, amount, SpreadsheetVersion::Excel2007)
    }

    #[test]
    fn test_area_inside_moved_block_moves_with_it() {
        assert_eq!(shifted(mover(5, 10, 3), "SUM(A5:A10)"), (true, "SUM(A8:A13)".into()));
        assert_eq!(shifted(mover(5, 10, 3), "$B$6+1"), (true, "$B$9+1".into()));
    }

    #[test]
    fn test_destination_clash() {
        // Wholly inside the destination, not the source: deleted
        assert_eq!(shifted(mover(5, 10, 10), "SUM(A16:A18)"), (true, "SUM(#REF!)".into()));
        assert_eq!(shifted(mover(5, 10, 10), "C16"), (true, "#REF!".into()));
        // Disjoint from both blocks: untouched
        assert_eq!(shifted(mover(5, 10, 3), "SUM(A20:A30)"), (false, "SUM(A20:A30)".into()));
        assert_eq!(shifted(mover(5, 10, 3), "A2"), (false, "A2".into()));
    }

    #[test]
    fn test_straddling_areas() {
        // moving the top rows of an area down past its end
        assert_eq!(shifted(mover(5, 6, 10), "SUM(A5:A10)"), (false, "SUM(A5:A10)".into()));
        // moving the top rows up expands the area
        assert_eq!(shifted(mover(5, 6, -2), "SUM(A5:A10)"), (true, "SUM(A3:A10)".into()));
        // moving the bottom rows down expands the area
        assert_eq!(shifted(mover(9, 10, 2), "SUM(A5:A10)"), (true, "SUM(A5:A12)".into()));
        // destination overlaps the top of the area
        assert_eq!(shifted(mover(1, 3, 3), "SUM(A5:A10)"), (true, "SUM(A7:A10)".into()));
        // destination overlaps the bottom of the area
        assert_eq!(shifted(mover(20, 22, -11), "SUM(A5:A10)"), (true, "SUM(A5:A8)".into()));
        // destination strictly inside the area leaves it alone
        assert_eq!(shifted(mover(20, 22, -12), "SUM(A5:A10)"), (false, "SUM(A5:A10)".into()));
        // rows strictly inside the area moved out over its top
        assert_eq!(shifted(mover(7, 8, -3), "SUM(A5:A10)"), (true, "SUM(A6:A10)".into()));
    }

    #[test]
    fn test_rows_moved_off_the_grid_become_deleted() {
        // the last BIFF8 row is 65536
        let shifter = FormulaShifter::row_mover(0, 65_530, 65_535, 3, SpreadsheetVersion::Excel97);
        assert_eq!(shifted(shifter, "A65531+1"), (true, "A65534+1".into()));
        assert_eq!(shifted(shifter, "A65535+1"), (true, "#REF!+1".into()));
        assert_eq!(shifted(shifter, "SUM(A65532:A65536)"), (true, "SUM(#REF!)".into()));
        let up = FormulaShifter::row_mover(0, 0, 1, -1, SpreadsheetVersion::Excel2007);
        assert_eq!(shifted(up, "B1*2"), (true, "#REF!*2".into()));
    }

    #[test]
    fn test_other_sheets_are_untouched_by_row_moves() {
        assert_eq!(shifted(mover(5, 10, 3), "Sheet2!A5"), (false, "Sheet2!A5".into()));
        assert_eq!(shifted(mover(5, 10, 3), "Sheet1!A5"), (true, "Sheet1!A8".into()));
    }

    #[test]
    fn test_row_copy_shifts_relative_rows_only() {
        let copier = FormulaShifter::row_copier(0, 0, 2, SpreadsheetVersion::Excel2007);
        assert_eq!(shifted(copier, "A1+$B$1+C$1"), (true, "A3+$B$1+C$1".into()));
        assert_eq!(shifted(copier, "SUM(A1:$A$5)"), (true, "SUM(A3:$A$5)".into()));
        let up = FormulaShifter::row_copier(5, 5, -3, SpreadsheetVersion::Excel2007);
        assert_eq!(shifted(up, "A2+1"), (true, "#REF!+1".into()));
        assert_eq!(shifted(up, "$A$2+1"), (false, "$A$2+1".into()));
    }

    #[test]
    fn test_sheet_move() {
        // Sheet3 moves to the front: Sheet1 and Sheet2 shift up by one
        let shifter = FormulaShifter::sheet_mover(2, 0);
        let wb = book();
        let registry = FunctionRegistry::new();
        let mut tokens =
            parse("Sheet1!A1+Sheet3!A1+SUM(Sheet1:Sheet2!B1)", &wb, FormulaKind::Cell, 0, &registry).unwrap();
        assert!(shifter.adjust_formula(&mut tokens, 0).unwrap());
        let sheets: Vec<ExternSheet> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Ref3d { sheet, .. } => Some(*sheet),
                _ => None,
            })
            .collect();
        assert_eq!(sheets, vec![ExternSheet::local(1), ExternSheet::local(0), ExternSheet { link: None, first: 1, last: 2 }]);
        assert_eq!(moved_sheet_index(3, 2, 0), None);
        assert_eq!(moved_sheet_index(1, 0, 2), Some(0));
    }
}
