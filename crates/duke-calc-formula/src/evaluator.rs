//! Workbook evaluator
//!
//! Runs reverse Polish token arrays against one or more workbooks. Results of
//! formula cells are memoized in an [`EvaluationCache`]; while a formula runs,
//! every cell it reads is recorded as one of its inputs so that a later change
//! clears exactly the results that depend on it.
//!
//! References stay lazy on the value stack. A cell is only read, and only
//! recorded as a dependency, when an operator or function asks for its value.
//! Branches of `IF` and `CHOOSE` that are jumped over are never read at all.

use std::sync::Arc;

use duke_calc_core::{CellError, CellRange, CellType, CellValue, SharedString};

use crate::cache::{CellLocation, EvaluationCache};
use crate::environment::CollaboratingWorkbooksEnvironment;
use crate::error::{FormulaError, FormulaResult};
use crate::functions::{
    FunctionRegistry, FUNCTION_INDEX_EXTERNAL, FUNCTION_INDEX_IF, FUNCTION_INDEX_SUM,
};
use crate::listener::EvaluationListener;
use crate::operators;
use crate::token::{Attr, ExternSheet, OperandClass, Operator, Token};
use crate::tracker::EvaluationTracker;
use crate::value::{
    coerce_to_bool, AreaEval, ArrayEval, CellResolver, OperationContext, RefEval, StoredCell,
    ValueEval,
};
use crate::version::SpreadsheetVersion;
use crate::workbook::{EvaluationCell, EvaluationWorkbook, ResultWritingWorkbook};

/// Evaluator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvaluatorOptions {
    /// Use a formula's last cached result when it refers to a workbook that
    /// is not part of the environment, instead of failing
    pub ignore_missing_workbooks: bool,
    /// Grid limits used for whole row/column references and offsets
    pub spreadsheet_version: SpreadsheetVersion,
}

/// What an evaluator is made of, minus its cached values
pub(crate) struct EvaluatorParts<W> {
    pub books: Vec<W>,
    pub environment: CollaboratingWorkbooksEnvironment,
    pub registry: Arc<FunctionRegistry>,
    pub options: EvaluatorOptions,
    pub listener: Option<Box<dyn EvaluationListener>>,
}

/// Evaluates formula cells of a workbook, or of several collaborating
/// workbooks sharing one cache.
///
/// Book 0 is the primary workbook. Every mutation of a workbook must be
/// reported through one of the `notify_*` methods (or followed by
/// [`clear_all_cached_result_values`](Self::clear_all_cached_result_values)),
/// otherwise stale results are served.
pub struct WorkbookEvaluator<W> {
    books: Vec<W>,
    environment: CollaboratingWorkbooksEnvironment,
    cache: EvaluationCache,
    tracker: EvaluationTracker,
    registry: Arc<FunctionRegistry>,
    options: EvaluatorOptions,
    /// Defined names currently being evaluated, to stop self-referencing names
    names_in_progress: Vec<(usize, u32)>,
}

impl<W: EvaluationWorkbook> WorkbookEvaluator<W> {
    /// Evaluator with the built-in functions and default options
    pub fn new(workbook: W) -> Self {
        Self::with_registry(
            workbook,
            Arc::new(FunctionRegistry::new()),
            EvaluatorOptions::default(),
        )
    }

    pub fn with_registry(
        workbook: W,
        registry: Arc<FunctionRegistry>,
        options: EvaluatorOptions,
    ) -> Self {
        Self::from_parts(
            vec![workbook],
            CollaboratingWorkbooksEnvironment::default(),
            registry,
            options,
        )
    }

    pub(crate) fn from_parts(
        books: Vec<W>,
        environment: CollaboratingWorkbooksEnvironment,
        registry: Arc<FunctionRegistry>,
        options: EvaluatorOptions,
    ) -> Self {
        Self {
            books,
            environment,
            cache: EvaluationCache::new(),
            tracker: EvaluationTracker::new(),
            registry,
            options,
            names_in_progress: Vec::new(),
        }
    }

    pub(crate) fn into_parts(mut self) -> EvaluatorParts<W> {
        EvaluatorParts {
            listener: self.cache.take_listener(),
            books: self.books,
            environment: self.environment,
            registry: self.registry,
            options: self.options,
        }
    }

    /// The primary workbook
    pub fn workbook(&self) -> &W {
        &self.books[0]
    }

    /// The primary workbook, for edits that are then notified
    pub fn workbook_mut(&mut self) -> &mut W {
        &mut self.books[0]
    }

    pub fn book(&self, index: usize) -> Option<&W> {
        self.books.get(index)
    }

    pub fn book_mut(&mut self, index: usize) -> Option<&mut W> {
        self.books.get_mut(index)
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    /// Give the workbooks back, primary first
    pub fn into_workbooks(self) -> Vec<W> {
        self.books
    }

    pub fn environment(&self) -> &CollaboratingWorkbooksEnvironment {
        &self.environment
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn options(&self) -> EvaluatorOptions {
        self.options
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    pub fn set_listener(&mut self, listener: Option<Box<dyn EvaluationListener>>) {
        self.cache.set_listener(listener);
    }

    /// Snapshot of a stored cell
    pub fn cell(&self, book: usize, sheet: usize, row: u32, col: u16) -> Option<EvaluationCell> {
        self.books.get(book)?.sheet(sheet)?.cell(row, col)
    }

    // === Evaluation ===

    /// Value of a cell in the primary workbook. Formula cells are computed
    /// or served from the cache; plain cells return their value.
    pub fn evaluate(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<ValueEval> {
        self.evaluate_in_book(0, sheet, row, col)
    }

    pub fn evaluate_in_book(
        &mut self,
        book: usize,
        sheet: usize,
        row: u32,
        col: u16,
    ) -> FormulaResult<ValueEval> {
        let result = self.evaluate_any(book, sheet, row, col);
        if result.is_err() {
            self.tracker.reset();
            self.names_in_progress.clear();
        }
        result
    }

    fn evaluate_any(
        &mut self,
        book: usize,
        sheet: usize,
        row: u32,
        col: u16,
    ) -> FormulaResult<ValueEval> {
        let Some(workbook) = self.books.get(book) else {
            return Err(FormulaError::internal(format!("no workbook at index {book}")));
        };
        let Some(ws) = workbook.sheet(sheet) else {
            return Ok(ValueEval::Error(CellError::Ref));
        };
        match ws.cell(row, col) {
            Some(cell) if cell.is_formula => self.evaluate_formula(book, sheet, cell),
            other => {
                let value = other.map_or(ValueEval::Blank, |c| ValueEval::from(&c.value));
                let location = CellLocation::in_book(book, sheet, row, col);
                self.tracker
                    .accept_plain_value_dependency(&mut self.cache, location, &value)?;
                Ok(value)
            }
        }
    }

    fn evaluate_formula(
        &mut self,
        book: usize,
        sheet: usize,
        cell: EvaluationCell,
    ) -> FormulaResult<ValueEval> {
        let location = CellLocation::in_book(book, sheet, cell.row, cell.col);
        let entry = self.cache.get_or_create_formula_entry(cell.id, location);
        self.tracker.accept_formula_dependency(entry);

        if let Some(value) = self.cache.value(entry).cloned() {
            log::trace!("cache hit for {location}");
            self.cache.listen(|l| l.on_cache_hit(location, &value));
            return Ok(value);
        }
        if !self.tracker.start_evaluate(entry) {
            return Ok(ValueEval::Error(CellError::Circular));
        }

        log::debug!("evaluating {location}");
        self.cache.listen(|l| l.on_start_evaluate(location));
        let result = match self.compute_formula(location, &cell) {
            Ok(value) => self
                .tracker
                .update_cache_result(&mut self.cache, value.clone())
                .map(|()| value),
            Err(FormulaError::WorkbookNotFound(name)) if self.options.ignore_missing_workbooks => {
                log::info!(
                    "workbook '{name}' is not part of the environment, continuing with the cached value of {location}"
                );
                Ok(ValueEval::from(&cell.value))
            }
            Err(e) => Err(e),
        };
        let ended = self.tracker.end_evaluate(entry);
        let value = result?;
        ended?;
        log::debug!("evaluated {location} = {value:?}");
        self.cache.listen(|l| l.on_end_evaluate(location, &value));
        Ok(value)
    }

    fn compute_formula(
        &mut self,
        at: CellLocation,
        cell: &EvaluationCell,
    ) -> FormulaResult<ValueEval> {
        let registry = Arc::clone(&self.registry);
        let book = self
            .books
            .get(at.book)
            .ok_or_else(|| FormulaError::internal(format!("no workbook at index {}", at.book)))?;
        let tokens = book.formula_tokens(at.sheet, at.row, at.col, &registry)?;

        match cell.array_range {
            Some(range) => {
                let value = self.run(&tokens, at, true)?;
                let array = self.context(at, true).to_array(&value)?;
                let element = array
                    .broadcast(
                        at.row.saturating_sub(range.start.row) as usize,
                        at.col.saturating_sub(range.start.col) as usize,
                    )
                    .cloned()
                    .unwrap_or(ValueEval::Error(CellError::Na));
                Ok(blank_as_zero(element))
            }
            None => {
                let value = self.run(&tokens, at, false)?;
                let value = self.context(at, false).single_value(&value)?;
                Ok(blank_as_zero(value))
            }
        }
    }

    fn context(&mut self, at: CellLocation, is_array: bool) -> OperationContext<'_> {
        let version = self.options.spreadsheet_version;
        OperationContext {
            resolver: self,
            book: at.book,
            sheet: at.sheet,
            row: at.row,
            col: at.col,
            is_array,
            version,
        }
    }

    /// Execute tokens and return the raw result, references included
    fn run(&mut self, tokens: &[Token], at: CellLocation, is_array: bool) -> FormulaResult<ValueEval> {
        let registry = Arc::clone(&self.registry);
        let mut stack: Vec<ValueEval> = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Int(n) => stack.push(ValueEval::Number(*n as f64)),
                Token::Number(n) => stack.push(ValueEval::Number(*n)),
                Token::String(s) => stack.push(ValueEval::string(s)),
                Token::Bool(b) => stack.push(ValueEval::Boolean(*b)),
                Token::Error(e) => stack.push(ValueEval::Error(*e)),
                Token::MissingArg => stack.push(ValueEval::MissingArg),

                Token::Ref { addr, class } => {
                    let r = RefEval::new(at.book, at.sheet, addr.row, addr.col);
                    let v = self.operand(ValueEval::Ref(r), *class, at, is_array)?;
                    stack.push(v);
                }
                Token::Area { area, class } => {
                    let a = AreaEval {
                        book: at.book,
                        first_sheet: at.sheet,
                        last_sheet: at.sheet,
                        first_row: area.first.row,
                        first_col: area.first.col,
                        last_row: area.last.row,
                        last_col: area.last.col,
                    };
                    let v = self.operand(ValueEval::Area(a), *class, at, is_array)?;
                    stack.push(v);
                }
                Token::Ref3d { sheet, addr, class } => {
                    let v = match self.resolve_extern(at.book, sheet)? {
                        Ok((book, first_sheet, last_sheet)) => ValueEval::Ref(RefEval {
                            book,
                            first_sheet,
                            last_sheet,
                            row: addr.row,
                            col: addr.col,
                        }),
                        Err(e) => ValueEval::Error(e),
                    };
                    let v = self.operand(v, *class, at, is_array)?;
                    stack.push(v);
                }
                Token::Area3d { sheet, area, class } => {
                    let v = match self.resolve_extern(at.book, sheet)? {
                        Ok((book, first_sheet, last_sheet)) => ValueEval::Area(AreaEval {
                            book,
                            first_sheet,
                            last_sheet,
                            first_row: area.first.row,
                            first_col: area.first.col,
                            last_row: area.last.row,
                            last_col: area.last.col,
                        }),
                        Err(e) => ValueEval::Error(e),
                    };
                    let v = self.operand(v, *class, at, is_array)?;
                    stack.push(v);
                }
                Token::RefErr { .. }
                | Token::AreaErr { .. }
                | Token::DeletedRef3d { .. }
                | Token::DeletedArea3d { .. } => stack.push(ValueEval::Error(CellError::Ref)),

                Token::Name { index, .. } => {
                    let v = self.evaluate_name(*index, at)?;
                    stack.push(v);
                }
                Token::NameX { name, .. } => {
                    stack.push(ValueEval::FunctionName(SharedString::new(name)))
                }
                Token::Array { rows, .. } => {
                    let rows = rows
                        .iter()
                        .map(|row| row.iter().map(ValueEval::from).collect())
                        .collect();
                    stack.push(ValueEval::Array(ArrayEval::from_rows(rows)));
                }

                Token::Func { index, .. } => {
                    let argc = registry.get_by_index(*index).map_or(0, |def| def.min_args);
                    let args = pop_args(&mut stack, argc)?;
                    let v = self.call_function(&registry, *index, args, at, is_array)?;
                    stack.push(v);
                }
                Token::FuncVar { index, argc, .. } => {
                    let args = pop_args(&mut stack, *argc as usize)?;
                    let v = self.call_function(&registry, *index, args, at, is_array)?;
                    stack.push(v);
                }
                Token::Op(op) => {
                    let args = pop_args(&mut stack, op.operand_count())?;
                    let v = self.apply_operator(*op, args, at, is_array)?;
                    stack.push(v);
                }

                Token::Paren | Token::MemFunc { .. } | Token::MemArea { .. } => {}

                Token::Attr(Attr::Sum) => {
                    let args = pop_args(&mut stack, 1)?;
                    let v = self.call_function(&registry, FUNCTION_INDEX_SUM, args, at, is_array)?;
                    stack.push(v);
                }
                // Array formulas evaluate every branch and let IF and CHOOSE
                // run as plain functions
                Token::Attr(_) if is_array => {}
                Token::Attr(Attr::If { distance }) => {
                    let condition = pop(&mut stack)?;
                    match self.context(at, false).bool_arg(&condition)? {
                        Ok(true) => {}
                        Ok(false) => {
                            i += count_tokens_to_skip(tokens, i, *distance as usize)?;
                            // without a false branch the jump lands just before the IF call
                            if matches!(tokens.get(i), Some(Token::Attr(Attr::Skip { .. })))
                                && matches!(
                                    tokens.get(i + 1),
                                    Some(Token::FuncVar { index: FUNCTION_INDEX_IF, .. })
                                )
                            {
                                stack.push(condition);
                                stack.push(ValueEval::Boolean(false));
                            }
                        }
                        Err(e) => {
                            stack.push(ValueEval::Error(e));
                            i += count_tokens_to_skip(tokens, i, *distance as usize)?;
                            let Some(Token::Attr(Attr::Skip { distance: skip })) = tokens.get(i) else {
                                return Err(FormulaError::internal(
                                    "IF jump does not land on a skip attribute",
                                ));
                            };
                            i += count_tokens_to_skip(tokens, i, *skip as usize + 1)?;
                        }
                    }
                }
                Token::Attr(Attr::Skip { distance }) => {
                    i += count_tokens_to_skip(tokens, i, *distance as usize + 1)?;
                    if matches!(stack.last(), Some(ValueEval::MissingArg)) {
                        stack.pop();
                        stack.push(ValueEval::Blank);
                    }
                }
                Token::Attr(Attr::Choose {
                    jump_table,
                    func_offset,
                }) => {
                    let selector = pop(&mut stack)?;
                    let to_function = *func_offset as usize + 4;
                    let distance = match self.context(at, false).number_arg(&selector)? {
                        Ok(n) => {
                            let k = n.floor();
                            if k >= 1.0 && k <= jump_table.len() as f64 {
                                jump_table[k as usize - 1] as usize
                            } else {
                                stack.push(ValueEval::Error(CellError::Value));
                                to_function
                            }
                        }
                        Err(e) => {
                            stack.push(ValueEval::Error(e));
                            to_function
                        }
                    };
                    // jump distances count from the start of the jump table
                    let table_size = 2 * jump_table.len() + 2;
                    let distance = distance.checked_sub(table_size).ok_or_else(|| {
                        FormulaError::internal("CHOOSE jump lands inside its own jump table")
                    })?;
                    i += count_tokens_to_skip(tokens, i, distance)?;
                }
            }
            i += 1;
        }

        let result = pop(&mut stack)?;
        if !stack.is_empty() {
            return Err(FormulaError::internal(format!(
                "{} values left on the evaluation stack",
                stack.len()
            )));
        }
        Ok(result)
    }

    /// References of ARRAY class are read eagerly into arrays
    fn operand(
        &mut self,
        value: ValueEval,
        class: OperandClass,
        at: CellLocation,
        is_array: bool,
    ) -> FormulaResult<ValueEval> {
        if class == OperandClass::Array && value.is_reference() {
            let array = self.context(at, is_array).to_array(&value)?;
            return Ok(ValueEval::Array(array));
        }
        Ok(value)
    }

    /// Book and sheet range named by a 3D reference's qualifier
    fn resolve_extern(
        &self,
        book: usize,
        sheet: &ExternSheet,
    ) -> FormulaResult<Result<(usize, usize, usize), CellError>> {
        let source = self
            .books
            .get(book)
            .ok_or_else(|| FormulaError::internal(format!("no workbook at index {book}")))?;
        let Some(link) = sheet.link else {
            let (first, last) = (sheet.first as usize, sheet.last as usize);
            if source.sheet(first).is_none() || source.sheet(last).is_none() {
                return Ok(Err(CellError::Ref));
            }
            return Ok(Ok((book, first, last)));
        };

        let Some(name) = source.external_link_name(link) else {
            return Ok(Err(CellError::Ref));
        };
        let target = self
            .environment
            .book_index(name)
            .ok_or_else(|| FormulaError::WorkbookNotFound(name.to_string()))?;
        let target_book = self
            .books
            .get(target)
            .ok_or_else(|| FormulaError::internal(format!("no workbook at index {target}")))?;
        let sheet_index = |i: u16| {
            source
                .external_sheet_name(link, i)
                .and_then(|s| target_book.find_sheet(s))
        };
        Ok(match (sheet_index(sheet.first), sheet_index(sheet.last)) {
            (Some(first), Some(last)) => Ok((target, first.min(last), first.max(last))),
            _ => Err(CellError::Ref),
        })
    }

    /// A defined name evaluates its own formula at the referencing cell
    fn evaluate_name(&mut self, index: u32, at: CellLocation) -> FormulaResult<ValueEval> {
        let key = (at.book, index);
        if self.names_in_progress.contains(&key) {
            return Ok(ValueEval::Error(CellError::Name));
        }
        let registry = Arc::clone(&self.registry);
        let book = self
            .books
            .get(at.book)
            .ok_or_else(|| FormulaError::internal(format!("no workbook at index {}", at.book)))?;
        let tokens = book.name_tokens(index, at.sheet, &registry)?;

        self.names_in_progress.push(key);
        let result = self.run(&tokens, at, false);
        self.names_in_progress.pop();
        result
    }

    fn call_function(
        &mut self,
        registry: &FunctionRegistry,
        index: u16,
        args: Vec<ValueEval>,
        at: CellLocation,
        is_array: bool,
    ) -> FormulaResult<ValueEval> {
        if index == FUNCTION_INDEX_EXTERNAL {
            let Some((ValueEval::FunctionName(name), rest)) = args.split_first() else {
                return Ok(ValueEval::Error(CellError::Name));
            };
            let Some(udf) = registry.udf(name.as_str()) else {
                return Ok(ValueEval::Error(CellError::Name));
            };
            return udf(rest, &mut self.context(at, is_array));
        }

        let Some(def) = registry.get_by_index(index) else {
            return Ok(ValueEval::Error(CellError::Name));
        };
        if is_array && index == FUNCTION_INDEX_IF {
            if let Some(v) = self.array_if(&args, at)? {
                return Ok(v);
            }
        }
        (def.implementation)(&args, &mut self.context(at, is_array))
    }

    /// IF over an array condition picks element by element
    fn array_if(&mut self, args: &[ValueEval], at: CellLocation) -> FormulaResult<Option<ValueEval>> {
        let Some((condition, branches)) = args.split_first() else {
            return Ok(None);
        };
        let mut ctx = self.context(at, true);
        let condition = ctx.to_array(condition)?;
        if condition.rows() * condition.cols() <= 1 {
            return Ok(None);
        }
        let branches = branches
            .iter()
            .map(|b| ctx.to_array(b))
            .collect::<FormulaResult<Vec<_>>>()?;

        let mut values = Vec::with_capacity(condition.values().len());
        for r in 0..condition.rows() {
            for c in 0..condition.cols() {
                let chosen = condition.get(r, c).map_or(Ok(false), coerce_to_bool);
                values.push(match chosen {
                    Ok(b) => match branches.get(if b { 0 } else { 1 }) {
                        Some(branch) => branch
                            .broadcast(r, c)
                            .cloned()
                            .unwrap_or(ValueEval::Error(CellError::Na)),
                        None => ValueEval::Boolean(false),
                    },
                    Err(e) => ValueEval::Error(e),
                });
            }
        }
        Ok(Some(ValueEval::Array(ArrayEval::new(
            condition.rows(),
            condition.cols(),
            values,
        ))))
    }

    fn apply_operator(
        &mut self,
        op: Operator,
        args: Vec<ValueEval>,
        at: CellLocation,
        is_array: bool,
    ) -> FormulaResult<ValueEval> {
        match (op, args.as_slice()) {
            (Operator::Range | Operator::Intersection | Operator::Union, [left, right]) => {
                Ok(reference_operator(op, left, right))
            }
            (_, [operand]) => {
                if takes_elementwise(operand, is_array) {
                    let array = self.context(at, is_array).to_array(operand)?;
                    return Ok(ValueEval::Array(operators::unary_elementwise(op, &array)));
                }
                let value = self.context(at, is_array).single_value(operand)?;
                Ok(operators::unary(op, &value))
            }
            (_, [left, right]) => {
                let mut ctx = self.context(at, is_array);
                if takes_elementwise(left, is_array) || takes_elementwise(right, is_array) {
                    let l = ctx.to_array(left)?;
                    let r = ctx.to_array(right)?;
                    return Ok(ValueEval::Array(operators::binary_elementwise(op, &l, &r)));
                }
                let l = ctx.single_value(left)?;
                let r = ctx.single_value(right)?;
                Ok(operators::binary(op, &l, &r))
            }
            _ => Err(FormulaError::internal(format!(
                "operator {op:?} applied to {} operands",
                args.len()
            ))),
        }
    }

    // === Change notification ===

    /// Drop every cached result, for example after bulk edits
    pub fn clear_all_cached_result_values(&mut self) {
        self.cache.clear();
        for book in &mut self.books {
            book.clear_cached_results();
        }
    }

    /// Report a changed cell. `cell` is its state after the change; a cell
    /// that became empty is passed with an empty value and its old identity.
    pub fn notify_update_cell(
        &mut self,
        book: usize,
        sheet: usize,
        cell: &EvaluationCell,
    ) -> FormulaResult<()> {
        self.cache.notify_update_cell(book, sheet, cell)
    }

    /// Report a cell that is about to be removed. `cell` is its current state.
    pub fn notify_delete_cell(
        &mut self,
        book: usize,
        sheet: usize,
        cell: &EvaluationCell,
    ) -> FormulaResult<()> {
        self.cache.notify_delete_cell(book, sheet, cell)
    }

    /// Report a cell whose formula was set or replaced
    pub fn notify_set_formula(
        &mut self,
        book: usize,
        sheet: usize,
        cell: &EvaluationCell,
    ) -> FormulaResult<()> {
        self.cache.notify_update_cell(book, sheet, cell)
    }

    /// Cells recorded as inputs of a formula cell in the primary workbook
    /// when it was last evaluated. Blank cells it read are not listed.
    pub fn recorded_dependencies(&self, sheet: usize, row: u32, col: u16) -> Vec<CellLocation> {
        let Some(entry) = self
            .cell(0, sheet, row, col)
            .and_then(|cell| self.cache.formula_entry(cell.id))
        else {
            return Vec::new();
        };
        let mut deps: Vec<CellLocation> = self
            .cache
            .sensitive_inputs(entry)
            .iter()
            .filter_map(|&id| self.cache.location(id))
            .collect();
        deps.sort();
        deps
    }
}

impl<W: ResultWritingWorkbook> WorkbookEvaluator<W> {
    /// Evaluate a formula cell and store the result as its cached value,
    /// keeping the formula. Returns the type of the result, or `None` for a
    /// cell without a formula.
    pub fn evaluate_formula_cell(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
    ) -> FormulaResult<Option<CellType>> {
        if !self.cell(0, sheet, row, col).is_some_and(|c| c.is_formula) {
            return Ok(None);
        }
        let value = storable(&self.evaluate(sheet, row, col)?);
        let cell_type = value.cell_type();
        self.books[0].write_cached_result(sheet, row, col, value)?;
        Ok(Some(cell_type))
    }

    /// Evaluate a formula cell and replace the formula with its result.
    /// Plain cells are returned unchanged.
    pub fn evaluate_in_cell(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<CellValue> {
        let Some(cell) = self.cell(0, sheet, row, col) else {
            return Ok(CellValue::Empty);
        };
        if !cell.is_formula {
            return Ok(cell.value);
        }
        let value = storable(&self.evaluate(sheet, row, col)?);
        self.books[0].replace_formula(sheet, row, col, value.clone())?;
        let updated = EvaluationCell {
            value: value.clone(),
            is_formula: false,
            array_range: None,
            ..cell
        };
        self.cache.notify_update_cell(0, sheet, &updated)?;
        Ok(value)
    }
}

impl<W: EvaluationWorkbook> CellResolver for WorkbookEvaluator<W> {
    fn cell_value(
        &mut self,
        book: usize,
        sheet: usize,
        row: u32,
        col: u16,
    ) -> FormulaResult<ValueEval> {
        self.evaluate_any(book, sheet, row, col)
    }

    fn stored_cells(&mut self, area: &AreaEval) -> FormulaResult<Vec<StoredCell>> {
        let range = CellRange::from_indices(
            area.first_row,
            area.first_col,
            area.last_row,
            area.last_col,
        );
        let mut out = Vec::new();
        for sheet in area.first_sheet..=area.last_sheet {
            let Some(cells) = self
                .books
                .get(area.book)
                .and_then(|b| b.sheet(sheet))
                .map(|ws| ws.cells_in_range(&range))
            else {
                out.push(StoredCell {
                    sheet,
                    row: area.first_row,
                    col: area.first_col,
                    value: ValueEval::Error(CellError::Ref),
                });
                continue;
            };
            // Cells that are absent now must trigger a recompute once they
            // get a value; stored ones are tracked individually below.
            self.tracker.accept_blank_area_dependency(
                area.book,
                sheet,
                area.first_row,
                area.first_col,
                area.last_row,
                area.last_col,
            );
            for cell in cells {
                let (row, col) = (cell.row, cell.col);
                let value = if cell.is_formula {
                    self.evaluate_formula(area.book, sheet, cell)?
                } else {
                    let value = ValueEval::from(&cell.value);
                    let location = CellLocation::in_book(area.book, sheet, row, col);
                    self.tracker
                        .accept_plain_value_dependency(&mut self.cache, location, &value)?;
                    value
                };
                if value != ValueEval::Blank {
                    out.push(StoredCell {
                        sheet,
                        row,
                        col,
                        value,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Formulas never produce a blank
fn blank_as_zero(value: ValueEval) -> ValueEval {
    match value {
        ValueEval::Blank | ValueEval::MissingArg => ValueEval::Number(0.0),
        other => other,
    }
}

/// Cell value written back for a result; the circular marker is stored as `#REF!`
fn storable(value: &ValueEval) -> CellValue {
    match value.to_cell_value() {
        CellValue::Error(e) => CellValue::Error(e.stored()),
        other => other,
    }
}

/// Operands that make a value operator work element by element
fn takes_elementwise(value: &ValueEval, is_array: bool) -> bool {
    match value {
        ValueEval::Array(_) => true,
        ValueEval::Area(a) if is_array => a.height() > 1 || a.width() > 1,
        ValueEval::RefList(areas) if is_array => areas.len() > 1,
        _ => false,
    }
}

fn pop(stack: &mut Vec<ValueEval>) -> FormulaResult<ValueEval> {
    stack
        .pop()
        .ok_or_else(|| FormulaError::internal("evaluation stack underflow"))
}

/// Pop `n` operands, returned in push order
fn pop_args(stack: &mut Vec<ValueEval>, n: usize) -> FormulaResult<Vec<ValueEval>> {
    if stack.len() < n {
        return Err(FormulaError::internal(format!(
            "evaluation stack underflow: need {n} operands, have {}",
            stack.len()
        )));
    }
    Ok(stack.split_off(stack.len() - n))
}

/// Number of tokens after `start` covering exactly `distance` bytes
fn count_tokens_to_skip(tokens: &[Token], start: usize, distance: usize) -> FormulaResult<usize> {
    let mut remaining = distance;
    let mut index = start;
    while remaining > 0 {
        index += 1;
        let token = tokens.get(index).ok_or_else(|| {
            FormulaError::internal(format!("skip of {distance} bytes runs past the formula end"))
        })?;
        remaining = remaining.checked_sub(token.size()).ok_or_else(|| {
            FormulaError::internal(format!(
                "skip of {distance} bytes does not end on a token boundary"
            ))
        })?;
    }
    Ok(index - start)
}

fn single_area(value: &ValueEval) -> Result<AreaEval, CellError> {
    match value {
        ValueEval::Ref(r) => Ok(r.as_area()),
        ValueEval::Area(a) => Ok(*a),
        ValueEval::RefList(areas) if areas.len() == 1 => Ok(areas[0]),
        ValueEval::Error(e) => Err(*e),
        _ => Err(CellError::Value),
    }
}

/// Range (`:`), intersection (space) and union (`,`) of references
fn reference_operator(op: Operator, left: &ValueEval, right: &ValueEval) -> ValueEval {
    if op == Operator::Union {
        let mut areas = Vec::new();
        for v in [left, right] {
            match v {
                ValueEval::Ref(r) => areas.push(r.as_area()),
                ValueEval::Area(a) => areas.push(*a),
                ValueEval::RefList(list) => areas.extend(list.iter().copied()),
                ValueEval::Error(e) => return ValueEval::Error(*e),
                _ => return ValueEval::Error(CellError::Value),
            }
        }
        return ValueEval::RefList(areas);
    }

    let (a, b) = match (single_area(left), single_area(right)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return ValueEval::Error(e),
    };
    if a.book != b.book || a.first_sheet != b.first_sheet || a.last_sheet != b.last_sheet {
        return ValueEval::Error(CellError::Value);
    }
    if op == Operator::Range {
        return ValueEval::Area(AreaEval {
            first_row: a.first_row.min(b.first_row),
            first_col: a.first_col.min(b.first_col),
            last_row: a.last_row.max(b.last_row),
            last_col: a.last_col.max(b.last_col),
            ..a
        });
    }
    let first_row = a.first_row.max(b.first_row);
    let first_col = a.first_col.max(b.first_col);
    let last_row = a.last_row.min(b.last_row);
    let last_col = a.last_col.min(b.last_col);
    if first_row > last_row || first_col > last_col {
        return ValueEval::Error(CellError::Null);
    }
    ValueEval::Area(AreaEval {
        first_row,
        first_col,
        last_row,
        last_col,
        ..a
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::OperationContext;
    use duke_calc_core::{CellAddress, Workbook};
    use pretty_assertions::assert_eq;

    fn evaluator(cells: &[(&str, &str)]) -> WorkbookEvaluator<Workbook> {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        for (addr, content) in cells {
            match content.strip_prefix('=') {
                Some(formula) => ws.set_cell_formula(addr, formula).unwrap(),
                None => match content.parse::<f64>() {
                    Ok(n) => ws.set_cell_value(addr, n).unwrap(),
                    Err(_) => ws.set_cell_value(addr, *content).unwrap(),
                },
            }
        }
        WorkbookEvaluator::new(wb)
    }

    fn eval(ev: &mut WorkbookEvaluator<Workbook>, addr: &str) -> ValueEval {
        let a = CellAddress::parse(addr).unwrap();
        ev.evaluate(0, a.row, a.col).unwrap()
    }

    fn formula(text: &str) -> ValueEval {
        let mut ev = evaluator(&[("Z100", format!("={text}").as_str())]);
        eval(&mut ev, "Z100")
    }

    fn n(v: f64) -> ValueEval {
        ValueEval::Number(v)
    }

    #[test]
    fn test_literals_and_operators() {
        assert_eq!(formula("1+2*3"), n(7.0));
        assert_eq!(formula("-2^2"), n(4.0));
        assert_eq!(formula("(1+2)*3"), n(9.0));
        assert_eq!(formula("50%"), n(0.5));
        assert_eq!(formula("\"a\"&\"b\""), ValueEval::string("ab"));
        assert_eq!(formula("1/0"), ValueEval::Error(CellError::Div0));
        assert_eq!(formula("3>2"), ValueEval::Boolean(true));
        assert_eq!(formula("#N/A"), ValueEval::Error(CellError::Na));
    }

    #[test]
    fn test_references_and_blanks() {
        let mut ev = evaluator(&[("A1", "2"), ("A2", "3"), ("A3", "=A1+A2"), ("B1", "=C1")]);
        assert_eq!(eval(&mut ev, "A3"), n(5.0));
        // a formula reading a blank yields zero
        assert_eq!(eval(&mut ev, "B1"), n(0.0));
        // plain cells read directly
        assert_eq!(eval(&mut ev, "A1"), n(2.0));
        assert_eq!(eval(&mut ev, "C1"), ValueEval::Blank);
    }

    #[test]
    fn test_implicit_intersection() {
        let mut ev = evaluator(&[
            ("A1", "10"),
            ("A2", "20"),
            ("A3", "30"),
            ("B2", "=A1:A3"),
            ("B5", "=A1:A3"),
        ]);
        assert_eq!(eval(&mut ev, "B2"), n(20.0));
        assert_eq!(eval(&mut ev, "B5"), ValueEval::Error(CellError::Value));
    }

    #[test]
    fn test_functions() {
        let mut ev = evaluator(&[
            ("A1", "1"),
            ("A3", "3"),
            ("B1", "=SUM(A1:A3)"),
            ("B2", "=SUM(A1:A3,10)"),
            ("B3", "=ROUND(2.567,1)"),
            ("B4", "=COUNT(A1:A3)"),
        ]);
        assert_eq!(eval(&mut ev, "B1"), n(4.0));
        assert_eq!(eval(&mut ev, "B2"), n(14.0));
        assert_eq!(eval(&mut ev, "B3"), n(2.6));
        assert_eq!(eval(&mut ev, "B4"), n(2.0));
    }

    #[test]
    fn test_if_skips_untaken_branch() {
        let mut ev = evaluator(&[
            ("A1", "-1"),
            ("B1", "7"),
            ("C1", "8"),
            ("D1", "=IF(A1>0,B1,\"nonpos\")"),
            ("D2", "=IF(A1<0,B1,C1)"),
            ("D3", "=IF(A1>0,B1)"),
            ("D4", "=IF(#N/A,B1,C1)"),
        ]);
        assert_eq!(eval(&mut ev, "D1"), ValueEval::string("nonpos"));
        assert_eq!(ev.recorded_dependencies(0, 0, 3), vec![CellLocation::new(0, 0, 0)]);

        assert_eq!(eval(&mut ev, "D2"), n(7.0));
        assert_eq!(
            ev.recorded_dependencies(0, 1, 3),
            vec![CellLocation::new(0, 0, 0), CellLocation::new(0, 0, 1)]
        );

        assert_eq!(eval(&mut ev, "D3"), ValueEval::Boolean(false));
        assert_eq!(eval(&mut ev, "D4"), ValueEval::Error(CellError::Na));
        assert!(ev.recorded_dependencies(0, 3, 3).is_empty());
    }

    #[test]
    fn test_choose_jumps_to_branch() {
        let mut ev = evaluator(&[
            ("A1", "2"),
            ("B1", "10"),
            ("B2", "20"),
            ("C1", "=CHOOSE(A1,B1,B2)"),
            ("C2", "=CHOOSE(5,B1,B2)"),
            ("C3", "=CHOOSE(1,\"x\",)"),
        ]);
        assert_eq!(eval(&mut ev, "C1"), n(20.0));
        assert_eq!(
            ev.recorded_dependencies(0, 0, 2),
            vec![CellLocation::new(0, 0, 0), CellLocation::new(0, 1, 1)]
        );
        assert_eq!(eval(&mut ev, "C2"), ValueEval::Error(CellError::Value));
        assert_eq!(eval(&mut ev, "C3"), ValueEval::string("x"));
    }

    #[test]
    fn test_circular_reference() {
        let mut ev = evaluator(&[("A1", "=B1+1"), ("B1", "=A1+1"), ("C1", "=C1")]);
        assert_eq!(eval(&mut ev, "A1"), ValueEval::Error(CellError::Circular));
        assert_eq!(eval(&mut ev, "C1"), ValueEval::Error(CellError::Circular));
        // the inner cell was not cached with the error
        assert_eq!(eval(&mut ev, "B1"), ValueEval::Error(CellError::Circular));
    }

    #[test]
    fn test_reference_operators() {
        let mut ev = evaluator(&[
            ("A1", "1"),
            ("B1", "2"),
            ("B2", "4"),
            ("C3", "8"),
            ("D1", "=SUM(A1:B2 B1:C3)"),
            ("D2", "=SUM((A1,C3))"),
            ("D3", "=SUM(A1:A2 C1:C2)"),
            ("D4", "=SUM(A1:B1:C3)"),
        ]);
        assert_eq!(eval(&mut ev, "D1"), n(6.0));
        assert_eq!(eval(&mut ev, "D2"), n(9.0));
        assert_eq!(eval(&mut ev, "D3"), ValueEval::Error(CellError::Null));
        assert_eq!(eval(&mut ev, "D4"), n(15.0));
    }

    #[test]
    fn test_defined_names() {
        let mut ev = evaluator(&[("A1", "5"), ("A2", "6"), ("B1", "=SUM(Data)*Rate")]);
        let wb = ev.workbook_mut();
        wb.define_name("Data", "Sheet1!$A$1:$A$2").unwrap();
        wb.define_name("Rate", "2").unwrap();
        assert_eq!(eval(&mut ev, "B1"), n(22.0));
    }

    #[test]
    fn test_self_referencing_name() {
        let mut ev = evaluator(&[("B1", "=Loop")]);
        ev.workbook_mut().define_name("Loop", "Loop+1").unwrap();
        assert_eq!(eval(&mut ev, "B1"), ValueEval::Error(CellError::Name));
    }

    #[test]
    fn test_array_formula_members() {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        for (row, v) in [(0, 1.0), (1, 2.0), (2, 3.0)] {
            ws.set_cell_value_at(row, 0, v).unwrap();
        }
        ws.set_array_formula(CellRange::from_indices(0, 1, 3, 1), "A1:A3*10")
            .unwrap();
        ws.set_cell_formula("C1", "SUMPRODUCT((A1:A3>1)*A1:A3)").unwrap();
        let mut ev = WorkbookEvaluator::new(wb);
        assert_eq!(eval(&mut ev, "B1"), n(10.0));
        assert_eq!(eval(&mut ev, "B3"), n(30.0));
        assert_eq!(eval(&mut ev, "B4"), ValueEval::Error(CellError::Na));
        assert_eq!(eval(&mut ev, "C1"), n(5.0));
    }

    #[test]
    fn test_array_if() {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        ws.set_cell_value_at(0, 0, 1.0).unwrap();
        ws.set_cell_value_at(1, 0, 5.0).unwrap();
        ws.set_array_formula(CellRange::from_indices(0, 1, 1, 1), "IF(A1:A2>2,\"big\",\"small\")")
            .unwrap();
        let mut ev = WorkbookEvaluator::new(wb);
        assert_eq!(eval(&mut ev, "B1"), ValueEval::string("small"));
        assert_eq!(eval(&mut ev, "B2"), ValueEval::string("big"));
    }

    #[test]
    fn test_shared_formula_members() {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        for row in 0..3 {
            ws.set_cell_value_at(row, 0, (row + 1) as f64).unwrap();
        }
        ws.set_shared_formula(CellRange::from_indices(0, 1, 2, 1), "A1*$A$1*2")
            .unwrap();
        let mut ev = WorkbookEvaluator::new(wb);
        assert_eq!(eval(&mut ev, "B1"), n(2.0));
        assert_eq!(eval(&mut ev, "B3"), n(6.0));
    }

    fn double(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
        let x = match args.first() {
            Some(v) => ctx.number_arg(v)?,
            None => Err(CellError::Value),
        };
        Ok(x.map_or_else(ValueEval::Error, |x| ValueEval::Number(x * 2.0)))
    }

    #[test]
    fn test_user_defined_function() {
        let mut registry = FunctionRegistry::new();
        registry.register_udf("DOUBLE", double);
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        ws.set_cell_value("A1", 21.0).unwrap();
        ws.set_cell_formula("B1", "DOUBLE(A1)").unwrap();
        ws.set_cell_formula("B2", "NOSUCH(A1)").unwrap();
        let mut ev = WorkbookEvaluator::with_registry(wb, Arc::new(registry), EvaluatorOptions::default());
        assert_eq!(eval(&mut ev, "B1"), n(42.0));
        assert_eq!(eval(&mut ev, "B2"), ValueEval::Error(CellError::Name));
    }

    #[test]
    fn test_parse_errors_surface() {
        let mut ev = evaluator(&[("A1", "=SUM(1,")]);
        assert!(matches!(ev.evaluate(0, 0, 0), Err(FormulaError::Parse(_))));
        // the evaluator stays usable
        ev.workbook_mut()
            .worksheet_mut(0)
            .unwrap()
            .set_cell_formula("A2", "1+1")
            .unwrap();
        assert_eq!(eval(&mut ev, "A2"), n(2.0));
    }

    #[test]
    fn test_evaluate_formula_cell_and_in_cell() {
        let mut ev = evaluator(&[("A1", "4"), ("B1", "=A1*2"), ("C1", "=B1+1"), ("D1", "=D1")]);
        assert_eq!(ev.evaluate_formula_cell(0, 0, 1).unwrap(), Some(CellType::Numeric));
        assert_eq!(ev.workbook().worksheet(0).unwrap().get_value_at(0, 1), CellValue::Number(8.0));
        assert_eq!(ev.evaluate_formula_cell(0, 0, 0).unwrap(), None);

        assert_eq!(ev.evaluate_formula_cell(0, 0, 3).unwrap(), Some(CellType::Error));
        assert_eq!(
            ev.workbook().worksheet(0).unwrap().get_value_at(0, 3),
            CellValue::Error(CellError::Ref)
        );

        assert_eq!(eval(&mut ev, "C1"), n(9.0));
        assert_eq!(ev.evaluate_in_cell(0, 0, 1).unwrap(), CellValue::Number(8.0));
        assert!(!ev.cell(0, 0, 0, 1).unwrap().is_formula);
        assert_eq!(eval(&mut ev, "C1"), n(9.0));
    }

    #[test]
    fn test_skip_distance_must_land_on_token() {
        let tokens = vec![Token::Int(1), Token::Number(2.0)];
        assert_eq!(count_tokens_to_skip(&tokens, 0, 9).unwrap(), 1);
        assert!(count_tokens_to_skip(&tokens, 0, 4).is_err());
        assert!(count_tokens_to_skip(&tokens, 0, 20).is_err());
    }
}
