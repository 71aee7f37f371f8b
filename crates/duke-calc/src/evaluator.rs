//! Evaluation over an editable workbook
//!
//! [`FormulaEvaluator`] owns a [`Workbook`] and the engine that evaluates it.
//! Every edit goes through it, so the engine's cache is told about each
//! change and only the formulas that read a changed cell are recomputed.

use std::sync::Arc;

use duke_calc_core::{
    moved_sheet_index, CellAddress, CellRange, CellType, CellValue, Error, FormulaSource,
    NameScope, Workbook, Worksheet, MAX_COLS,
};
use duke_calc_formula::{
    parse, to_formula_string, CellLocation, EvaluationCell, EvaluationSheet, EvaluationWorkbook,
    EvaluatorOptions, FormulaError, FormulaKind, FormulaResult, FormulaShifter, FunctionRegistry,
    SpreadsheetVersion, Token, ValueEval, WorkbookEvaluator,
};

/// Formula whose references changed during a structural edit
#[derive(Debug)]
struct Rewrite {
    target: RewriteTarget,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, Copy)]
enum RewriteTarget {
    Cell { sheet: usize, row: u32, col: u16 },
    Name(u32),
}

/// A workbook with cached, incrementally maintained formula results
pub struct FormulaEvaluator {
    engine: WorkbookEvaluator<Workbook>,
}

impl FormulaEvaluator {
    pub fn new(workbook: Workbook) -> Self {
        Self {
            engine: WorkbookEvaluator::new(workbook),
        }
    }

    pub fn with_options(workbook: Workbook, options: EvaluatorOptions) -> Self {
        Self::with_registry(workbook, Arc::new(FunctionRegistry::new()), options)
    }

    /// Evaluator with a custom function registry, for example one with
    /// user-defined functions registered
    pub fn with_registry(
        workbook: Workbook,
        registry: Arc<FunctionRegistry>,
        options: EvaluatorOptions,
    ) -> Self {
        Self {
            engine: WorkbookEvaluator::with_registry(workbook, registry, options),
        }
    }

    pub fn workbook(&self) -> &Workbook {
        self.engine.workbook()
    }

    pub fn into_workbook(self) -> Workbook {
        self.engine
            .into_workbooks()
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// The underlying engine
    pub fn engine(&self) -> &WorkbookEvaluator<Workbook> {
        &self.engine
    }

    /// The underlying engine. Edits made to its workbook directly must be
    /// reported with its `notify_*` methods.
    pub fn engine_mut(&mut self) -> &mut WorkbookEvaluator<Workbook> {
        &mut self.engine
    }

    fn sheet_mut(&mut self, sheet: usize) -> FormulaResult<&mut Worksheet> {
        let count = self.engine.workbook().sheet_count();
        self.engine
            .workbook_mut()
            .worksheet_mut(sheet)
            .ok_or_else(|| Error::SheetOutOfBounds(sheet, count).into())
    }

    // === Evaluation ===

    /// Value of a cell, computing formulas as needed
    pub fn evaluate(&mut self, sheet: usize, address: &str) -> FormulaResult<ValueEval> {
        let addr = CellAddress::parse(address)?;
        self.engine.evaluate(sheet, addr.row, addr.col)
    }

    pub fn evaluate_at(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<ValueEval> {
        self.engine.evaluate(sheet, row, col)
    }

    /// Compute a formula cell and store its result in the cell
    pub fn evaluate_formula_cell(
        &mut self,
        sheet: usize,
        address: &str,
    ) -> FormulaResult<Option<CellType>> {
        let addr = CellAddress::parse(address)?;
        self.engine.evaluate_formula_cell(sheet, addr.row, addr.col)
    }

    /// Compute a formula cell and replace the formula with its result
    pub fn evaluate_in_cell(&mut self, sheet: usize, address: &str) -> FormulaResult<CellValue> {
        let addr = CellAddress::parse(address)?;
        self.engine.evaluate_in_cell(sheet, addr.row, addr.col)
    }

    /// Cells a formula read the last time it was computed
    pub fn recorded_dependencies(
        &self,
        sheet: usize,
        address: &str,
    ) -> FormulaResult<Vec<CellLocation>> {
        let addr = CellAddress::parse(address)?;
        Ok(self.engine.recorded_dependencies(sheet, addr.row, addr.col))
    }

    pub fn clear_all_cached_result_values(&mut self) {
        self.engine.clear_all_cached_result_values();
    }

    // === Cell edits ===

    pub fn set_cell_value(
        &mut self,
        sheet: usize,
        address: &str,
        value: impl Into<CellValue>,
    ) -> FormulaResult<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_value_at(sheet, addr.row, addr.col, value.into())
    }

    /// Store a literal value. An empty value removes the cell.
    pub fn set_cell_value_at(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> FormulaResult<()> {
        let ws = self.sheet_mut(sheet)?;
        let previous = ws.cell_at(row, col).map(|c| c.id());
        ws.set_cell_value_at(row, col, value)?;

        let updated = match (self.engine.cell(0, sheet, row, col), previous) {
            (Some(cell), _) => cell,
            (None, Some(id)) => EvaluationCell {
                id,
                row,
                col,
                value: CellValue::Empty,
                is_formula: false,
                array_range: None,
            },
            (None, None) => return Ok(()),
        };
        self.engine.notify_update_cell(0, sheet, &updated)
    }

    pub fn set_cell_formula(
        &mut self,
        sheet: usize,
        address: &str,
        formula: &str,
    ) -> FormulaResult<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_formula_at(sheet, addr.row, addr.col, formula)
    }

    /// Store a formula; a leading `=` is optional
    pub fn set_cell_formula_at(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        formula: &str,
    ) -> FormulaResult<()> {
        self.sheet_mut(sheet)?.set_cell_formula_at(row, col, formula)?;
        self.notify_formula(sheet, row, col)
    }

    /// Enter one formula over a rectangle as an array formula
    pub fn set_array_formula(
        &mut self,
        sheet: usize,
        range: CellRange,
        formula: &str,
    ) -> FormulaResult<()> {
        self.sheet_mut(sheet)?.set_array_formula(range, formula)?;
        for addr in range.cells() {
            self.notify_formula(sheet, addr.row, addr.col)?;
        }
        Ok(())
    }

    /// Enter a shared formula; `formula` is written as seen from the top-left cell
    pub fn set_shared_formula(
        &mut self,
        sheet: usize,
        range: CellRange,
        formula: &str,
    ) -> FormulaResult<()> {
        self.sheet_mut(sheet)?.set_shared_formula(range, formula)?;
        for addr in range.cells() {
            self.notify_formula(sheet, addr.row, addr.col)?;
        }
        Ok(())
    }

    fn notify_formula(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<()> {
        let cell = self
            .engine
            .cell(0, sheet, row, col)
            .ok_or(FormulaError::UnknownCell { sheet, row, col })?;
        self.engine.notify_set_formula(0, sheet, &cell)
    }

    pub fn clear_cell(&mut self, sheet: usize, address: &str) -> FormulaResult<()> {
        let addr = CellAddress::parse(address)?;
        self.clear_cell_at(sheet, addr.row, addr.col)
    }

    pub fn clear_cell_at(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<()> {
        let snapshot = self.engine.cell(0, sheet, row, col);
        self.sheet_mut(sheet)?.clear_cell_at(row, col)?;
        match snapshot {
            Some(cell) => self.engine.notify_delete_cell(0, sheet, &cell),
            None => Ok(()),
        }
    }

    /// Remove the array or shared formula group containing a cell
    pub fn clear_formula_group(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<()> {
        let ws = self.sheet_mut(sheet)?;
        let Some(range) = ws.group_range(row, col) else {
            return Err(Error::NotInFormulaGroup(CellAddress::new(row, col).to_string()).into());
        };
        let members = self.cells_in(sheet, range)?;
        self.sheet_mut(sheet)?.clear_formula_group(row, col)?;
        for cell in &members {
            self.engine.notify_delete_cell(0, sheet, cell)?;
        }
        Ok(())
    }

    /// Snapshots of the stored cells inside a range
    fn cells_in(&self, sheet: usize, range: CellRange) -> FormulaResult<Vec<EvaluationCell>> {
        let count = self.engine.workbook().sheet_count();
        let ws = self
            .engine
            .workbook()
            .sheet(sheet)
            .ok_or(Error::SheetOutOfBounds(sheet, count))?;
        Ok(ws.cells_in_range(&range))
    }

    fn row_cells(&self, sheet: usize, row: u32) -> FormulaResult<Vec<EvaluationCell>> {
        self.cells_in(sheet, CellRange::from_indices(row, 0, row, MAX_COLS - 1))
    }

    // === Structural edits ===

    /// Move rows `first..=last` of `sheet` by `amount` rows, overwriting the
    /// destination. References throughout the workbook follow the moved cells;
    /// references to overwritten cells become `#REF!`.
    pub fn move_rows(
        &mut self,
        sheet: usize,
        first: u32,
        last: u32,
        amount: i32,
    ) -> FormulaResult<()> {
        let version = self.engine.options().spreadsheet_version;
        check_row_move(first, last, amount, version)?;
        let (dest_first, dest_last) = (
            (first as i64 + amount as i64) as u32,
            (last as i64 + amount as i64) as u32,
        );
        let shifter = FormulaShifter::row_mover(sheet, first, last, amount, version);
        self.unshare_for_row_move(&shifter, sheet, [(first, last), (dest_first, dest_last)])?;
        let rewrites = self.shift_formulas(&shifter)?;
        self.sheet_mut(sheet)?.move_rows(first, last, amount)?;

        self.apply_rewrites(rewrites, |s, row| {
            if s != sheet {
                Some((s, row))
            } else if (first..=last).contains(&row) {
                Some((s, (row as i64 + amount as i64) as u32))
            } else if (dest_first..=dest_last).contains(&row) {
                None
            } else {
                Some((s, row))
            }
        })?;
        log::debug!("moved rows {first}..={last} of sheet {sheet} by {amount}");
        self.engine.clear_all_cached_result_values();
        Ok(())
    }

    /// Copy row `src` of `sheet` over row `dst`. Relative references in
    /// copied formulas move with the row; cells of `dst` with no counterpart
    /// in `src` are cleared.
    pub fn copy_row(&mut self, sheet: usize, src: u32, dst: u32) -> FormulaResult<()> {
        enum Copied {
            Value(CellValue),
            Formula(String),
        }

        let version = self.engine.options().spreadsheet_version;
        let amount = (dst as i64 - src as i64) as i32;
        let copier = FormulaShifter::row_copier(src, src, amount, version);
        let registry = Arc::clone(self.engine.registry());

        let source = self.row_cells(sheet, src)?;
        let mut copied = Vec::with_capacity(source.len());
        for cell in &source {
            let content = match (&cell.array_range, cell.is_formula) {
                // array members carry their element of the group result
                (Some(_), true) | (_, false) => Copied::Value(cell.value.clone()),
                (None, true) => {
                    let wb = self.engine.workbook();
                    let mut tokens = wb.formula_tokens(sheet, src, cell.col, &registry)?;
                    copier.adjust_formula(&mut tokens, sheet)?;
                    Copied::Formula(to_formula_string(wb, &tokens, &registry)?)
                }
            };
            copied.push((cell.col, content));
        }

        for cell in self.row_cells(sheet, dst)? {
            if !source.iter().any(|s| s.col == cell.col) {
                self.clear_cell_at(sheet, dst, cell.col)?;
            }
        }
        for (col, content) in copied {
            match content {
                Copied::Value(value) => self.set_cell_value_at(sheet, dst, col, value)?,
                Copied::Formula(text) => self.set_cell_formula_at(sheet, dst, col, &text)?,
            }
        }
        Ok(())
    }

    /// Move the sheet at `from` to position `to`. Sheet references in every
    /// formula keep pointing at the same sheets.
    pub fn move_sheet(&mut self, from: usize, to: usize) -> FormulaResult<()> {
        let shifter = FormulaShifter::sheet_mover(from, to);
        let rewrites = self.shift_formulas(&shifter)?;
        self.engine.workbook_mut().move_worksheet(from, to)?;
        self.apply_rewrites(rewrites, |sheet, row| {
            Some((moved_sheet_index(sheet, from, to), row))
        })?;
        log::debug!("moved sheet {from} to {to}");
        self.engine.clear_all_cached_result_values();
        Ok(())
    }

    /// Shared formulas hold one template for all members, so a row move
    /// that would treat members differently first gives each its own text.
    /// That is the case when the moved or overwritten rows cut through the
    /// group, or when the move changes the references of any member.
    fn unshare_for_row_move(
        &mut self,
        shifter: &FormulaShifter,
        moved_sheet: usize,
        blocks: [(u32, u32); 2],
    ) -> FormulaResult<()> {
        let registry = Arc::clone(self.engine.registry());
        let mut unshared = Vec::new();
        let wb = self.engine.workbook();
        for sheet in 0..wb.sheet_count() {
            let Some(ws) = wb.worksheet(sheet) else {
                continue;
            };
            for (row, col, formula) in ws.formula_cells() {
                let Some(range) = formula.shared_range else {
                    continue;
                };
                let mut split =
                    sheet == moved_sheet && blocks.iter().any(|block| cuts_rows(range, *block));
                let mut texts = Vec::new();
                for addr in range.cells() {
                    let tokens = match wb.formula_tokens(sheet, addr.row, addr.col, &registry) {
                        Ok(tokens) => tokens,
                        Err(FormulaError::Parse(e)) => {
                            log::warn!(
                                "leaving unparsable shared formula at {} as it is: {e}",
                                CellAddress::new(row, col)
                            );
                            texts.clear();
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    let mut shifted = tokens.clone();
                    split |= shifter.adjust_formula(&mut shifted, sheet)?;
                    texts.push((addr.row, addr.col, to_formula_string(wb, &tokens, &registry)?));
                }
                if split && !texts.is_empty() {
                    unshared.push((sheet, row, col, texts));
                }
            }
        }

        for (sheet, row, col, texts) in unshared {
            log::debug!(
                "unsharing formula group at sheet {sheet} {}",
                CellAddress::new(row, col)
            );
            self.sheet_mut(sheet)?.unshare_formula(row, col, texts)?;
        }
        Ok(())
    }

    /// Adjust every stored formula and name, returning the changed ones.
    /// Formulas that do not parse are left alone.
    fn shift_formulas(&self, shifter: &FormulaShifter) -> FormulaResult<Vec<Rewrite>> {
        let wb = self.engine.workbook();
        let registry = self.engine.registry();
        let mut rewrites = Vec::new();

        let mut shift = |target: RewriteTarget,
                         text: &str,
                         kind: FormulaKind,
                         sheet: usize|
         -> FormulaResult<()> {
            let mut tokens = match parse(text, wb, kind, sheet, registry) {
                Ok(tokens) => tokens,
                Err(FormulaError::Parse(e)) => {
                    log::warn!("leaving unparsable formula '{text}' unchanged: {e}");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if shifter.adjust_formula(&mut tokens, sheet)? {
                rewrites.push(Rewrite { target, tokens });
            }
            Ok(())
        };

        for sheet in 0..wb.sheet_count() {
            let Some(ws) = wb.worksheet(sheet) else {
                continue;
            };
            for (row, col, formula) in ws.formula_cells() {
                let FormulaSource::Text(text) = &formula.source else {
                    continue;
                };
                let kind = match formula.array_range {
                    Some(_) => FormulaKind::Array,
                    None => FormulaKind::Cell,
                };
                shift(RewriteTarget::Cell { sheet, row, col }, text, kind, sheet)?;
            }
        }
        for (index, name) in wb.named_ranges().iter() {
            let sheet = match name.scope {
                NameScope::Sheet(sheet) => sheet,
                NameScope::Workbook => 0,
            };
            shift(
                RewriteTarget::Name(index),
                &name.refers_to,
                FormulaKind::NamedRange,
                sheet,
            )?;
        }
        Ok(rewrites)
    }

    /// Store shifted formulas after the edit. `locate` maps a cell's position
    /// before the edit to its position after, or `None` if it was overwritten.
    fn apply_rewrites(
        &mut self,
        rewrites: Vec<Rewrite>,
        locate: impl Fn(usize, u32) -> Option<(usize, u32)>,
    ) -> FormulaResult<()> {
        for Rewrite { target, tokens } in rewrites {
            let text = to_formula_string(self.engine.workbook(), &tokens, self.engine.registry())?;
            match target {
                RewriteTarget::Cell { sheet, row, col } => {
                    if let Some((sheet, row)) = locate(sheet, row) {
                        log::trace!(
                            "formula at sheet {sheet} {} now reads {text}",
                            CellAddress::new(row, col)
                        );
                        self.sheet_mut(sheet)?.set_formula_text(row, col, &text)?;
                    }
                }
                RewriteTarget::Name(index) => {
                    self.engine
                        .workbook_mut()
                        .named_ranges_mut()
                        .set_refers_to(index, &text);
                }
            }
        }
        Ok(())
    }
}

/// Whether the rows `first..=last` cut through `range` without covering it
fn cuts_rows(range: CellRange, (first, last): (u32, u32)) -> bool {
    let overlaps = range.start.row <= last && first <= range.end.row;
    let covers = first <= range.start.row && range.end.row <= last;
    overlaps && !covers
}

/// Reject a row move before any formula is rewritten for it
fn check_row_move(
    first: u32,
    last: u32,
    amount: i32,
    version: SpreadsheetVersion,
) -> FormulaResult<()> {
    if first > last {
        return Err(Error::InvalidRange(format!("rows {first}..={last}")).into());
    }
    let dest_first = first as i64 + amount as i64;
    let dest_last = last as i64 + amount as i64;
    if dest_first < 0 || dest_last > version.last_row_index() as i64 {
        let row = u32::try_from(dest_last.max(0)).unwrap_or(u32::MAX);
        return Err(Error::RowOutOfBounds(row, version.last_row_index()).into());
    }
    Ok(())
}
