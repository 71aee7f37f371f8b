//! Runtime values on the evaluation stack
//!
//! References stay lazy until a function or operator asks for a value, so a
//! reference that is never read is never recorded as a dependency.

use std::cmp::Ordering;

use duke_calc_core::{CellError, CellValue, SharedString};

use crate::error::FormulaResult;
use crate::version::SpreadsheetVersion;

/// A single cell, possibly repeated across a sheet range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEval {
    pub book: usize,
    pub first_sheet: usize,
    pub last_sheet: usize,
    pub row: u32,
    pub col: u16,
}

impl RefEval {
    pub fn new(book: usize, sheet: usize, row: u32, col: u16) -> Self {
        Self {
            book,
            first_sheet: sheet,
            last_sheet: sheet,
            row,
            col,
        }
    }

    pub fn as_area(&self) -> AreaEval {
        AreaEval {
            book: self.book,
            first_sheet: self.first_sheet,
            last_sheet: self.last_sheet,
            first_row: self.row,
            first_col: self.col,
            last_row: self.row,
            last_col: self.col,
        }
    }
}

/// A rectangle of cells, possibly repeated across a sheet range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaEval {
    pub book: usize,
    pub first_sheet: usize,
    pub last_sheet: usize,
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
}

impl AreaEval {
    pub fn height(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn width(&self) -> u16 {
        self.last_col - self.first_col + 1
    }

    pub fn contains_row(&self, row: u32) -> bool {
        self.first_row <= row && row <= self.last_row
    }

    pub fn contains_col(&self, col: u16) -> bool {
        self.first_col <= col && col <= self.last_col
    }

    pub fn is_single_sheet(&self) -> bool {
        self.first_sheet == self.last_sheet
    }

    /// A sub-area at the given offsets and size, relative to this one's top-left.
    /// Returns `None` when it falls off the grid.
    pub fn offset(
        &self,
        rows: i64,
        cols: i64,
        height: i64,
        width: i64,
        version: SpreadsheetVersion,
    ) -> Option<AreaEval> {
        let mut r1 = self.first_row as i64 + rows;
        let mut c1 = self.first_col as i64 + cols;
        let mut r2 = r1 + height - if height > 0 { 1 } else { -1 };
        let mut c2 = c1 + width - if width > 0 { 1 } else { -1 };
        if r1 > r2 {
            std::mem::swap(&mut r1, &mut r2);
        }
        if c1 > c2 {
            std::mem::swap(&mut c1, &mut c2);
        }
        if r1 < 0
            || c1 < 0
            || r2 > version.last_row_index() as i64
            || c2 > version.last_column_index() as i64
        {
            return None;
        }
        Some(AreaEval {
            first_row: r1 as u32,
            first_col: c1 as u16,
            last_row: r2 as u32,
            last_col: c2 as u16,
            ..*self
        })
    }
}

/// A rectangular block of scalar values
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayEval {
    rows: usize,
    cols: usize,
    values: Vec<ValueEval>,
}

impl ArrayEval {
    /// Build from row-major values; `values.len()` must equal `rows * cols`
    pub fn new(rows: usize, cols: usize, values: Vec<ValueEval>) -> Self {
        debug_assert_eq!(rows * cols, values.len());
        Self { rows, cols, values }
    }

    pub fn from_rows(rows: Vec<Vec<ValueEval>>) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        Self::new(height, width, rows.into_iter().flatten().collect())
    }

    /// A 1x1 array
    pub fn scalar(value: ValueEval) -> Self {
        Self::new(1, 1, vec![value])
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&ValueEval> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// Element lookup that repeats a single row or column, the way
    /// elementwise operators broadcast
    pub fn broadcast(&self, row: usize, col: usize) -> Option<&ValueEval> {
        let r = if self.rows == 1 { 0 } else { row };
        let c = if self.cols == 1 { 0 } else { col };
        self.get(r, c)
    }

    pub fn values(&self) -> &[ValueEval] {
        &self.values
    }
}

/// A value flowing through the evaluation stack
#[derive(Debug, Clone, PartialEq)]
pub enum ValueEval {
    Number(f64),
    String(SharedString),
    Boolean(bool),
    Error(CellError),
    Blank,
    MissingArg,
    Ref(RefEval),
    Area(AreaEval),
    /// Union of references
    RefList(Vec<AreaEval>),
    Array(ArrayEval),
    /// Name of a user-defined function, first operand of an external call
    FunctionName(SharedString),
}

impl ValueEval {
    pub fn string(s: impl AsRef<str>) -> Self {
        ValueEval::String(SharedString::new(s))
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ValueEval::Ref(_) | ValueEval::Area(_) | ValueEval::RefList(_)
        )
    }

    /// The single rectangle a reference value covers
    pub fn as_area(&self) -> Option<AreaEval> {
        match self {
            ValueEval::Ref(r) => Some(r.as_area()),
            ValueEval::Area(a) => Some(*a),
            ValueEval::RefList(areas) if areas.len() == 1 => Some(areas[0]),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ValueEval::Number(_)
                | ValueEval::String(_)
                | ValueEval::Boolean(_)
                | ValueEval::Error(_)
                | ValueEval::Blank
                | ValueEval::MissingArg
        )
    }

    /// Convert a dereferenced scalar to a cell value. Blanks become zero, since
    /// a formula never yields a blank result.
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            ValueEval::Number(n) => CellValue::Number(*n),
            ValueEval::String(s) => CellValue::String(s.clone()),
            ValueEval::Boolean(b) => CellValue::Boolean(*b),
            ValueEval::Error(e) => CellValue::Error(*e),
            ValueEval::Blank | ValueEval::MissingArg => CellValue::Number(0.0),
            _ => CellValue::Error(CellError::Value),
        }
    }
}

impl From<&CellValue> for ValueEval {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => ValueEval::Blank,
            CellValue::Boolean(b) => ValueEval::Boolean(*b),
            CellValue::Number(n) => ValueEval::Number(*n),
            CellValue::String(s) => ValueEval::String(s.clone()),
            CellValue::Error(e) => ValueEval::Error(*e),
        }
    }
}

impl From<CellError> for ValueEval {
    fn from(e: CellError) -> Self {
        ValueEval::Error(e)
    }
}

impl From<f64> for ValueEval {
    fn from(n: f64) -> Self {
        ValueEval::Number(n)
    }
}

impl From<bool> for ValueEval {
    fn from(b: bool) -> Self {
        ValueEval::Boolean(b)
    }
}

/// Typed equality used to decide whether a cached value changed
pub fn same_value(a: &ValueEval, b: &ValueEval) -> bool {
    match (a, b) {
        (ValueEval::Blank, ValueEval::Blank) => true,
        (ValueEval::Number(x), ValueEval::Number(y)) => x == y,
        (ValueEval::String(x), ValueEval::String(y)) => x == y,
        (ValueEval::Boolean(x), ValueEval::Boolean(y)) => x == y,
        (ValueEval::Error(x), ValueEval::Error(y)) => x.code() == y.code(),
        _ => false,
    }
}

/// Order two dereferenced scalars the way comparison operators do.
/// Numbers sort before text, text before booleans; a blank takes the type
/// of the other side. Text compares case-insensitively.
pub fn compare_scalars(a: &ValueEval, b: &ValueEval) -> Result<Ordering, CellError> {
    use ValueEval::{Blank, Boolean, MissingArg, Number, String as Text};
    match (a, b) {
        (ValueEval::Error(e), _) | (_, ValueEval::Error(e)) => Err(*e),
        (Blank | MissingArg, Blank | MissingArg) => Ok(Ordering::Equal),
        (Blank | MissingArg, Number(_)) => compare_scalars(&Number(0.0), b),
        (Number(_), Blank | MissingArg) => compare_scalars(a, &Number(0.0)),
        (Blank | MissingArg, Boolean(_)) => compare_scalars(&Boolean(false), b),
        (Boolean(_), Blank | MissingArg) => compare_scalars(a, &Boolean(false)),
        (Blank | MissingArg, Text(s)) => Ok(if s.is_empty() { Ordering::Equal } else { Ordering::Less }),
        (Text(s), Blank | MissingArg) => Ok(if s.is_empty() { Ordering::Equal } else { Ordering::Greater }),
        (Number(x), Number(y)) => Ok(x.partial_cmp(y).unwrap_or(Ordering::Equal)),
        (Text(x), Text(y)) => Ok(x.as_str().to_lowercase().cmp(&y.as_str().to_lowercase())),
        (Boolean(x), Boolean(y)) => Ok(x.cmp(y)),
        (Number(_), _) => Ok(Ordering::Less),
        (_, Number(_)) => Ok(Ordering::Greater),
        (Text(_), Boolean(_)) => Ok(Ordering::Less),
        (Boolean(_), Text(_)) => Ok(Ordering::Greater),
        _ => Err(CellError::Value),
    }
}

/// Scalar to number. Text is parsed; blank is zero.
pub fn coerce_to_number(v: &ValueEval) -> Result<f64, CellError> {
    match v {
        ValueEval::Number(n) => Ok(*n),
        ValueEval::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        ValueEval::Blank | ValueEval::MissingArg => Ok(0.0),
        ValueEval::String(s) => parse_number(s.as_str()).ok_or(CellError::Value),
        ValueEval::Error(e) => Err(*e),
        _ => Err(CellError::Value),
    }
}

/// Scalar to text, formatting numbers the way the General format does
pub fn coerce_to_string(v: &ValueEval) -> Result<String, CellError> {
    match v {
        ValueEval::String(s) => Ok(s.as_str().to_string()),
        ValueEval::Number(n) => Ok(format_number(*n)),
        ValueEval::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        ValueEval::Blank | ValueEval::MissingArg => Ok(String::new()),
        ValueEval::Error(e) => Err(*e),
        _ => Err(CellError::Value),
    }
}

/// Scalar to boolean. Only `TRUE`/`FALSE` text converts.
pub fn coerce_to_bool(v: &ValueEval) -> Result<bool, CellError> {
    match v {
        ValueEval::Boolean(b) => Ok(*b),
        ValueEval::Number(n) => Ok(*n != 0.0),
        ValueEval::Blank | ValueEval::MissingArg => Ok(false),
        ValueEval::String(s) => {
            if s.as_str().eq_ignore_ascii_case("TRUE") {
                Ok(true)
            } else if s.as_str().eq_ignore_ascii_case("FALSE") {
                Ok(false)
            } else {
                Err(CellError::Value)
            }
        }
        ValueEval::Error(e) => Err(*e),
        _ => Err(CellError::Value),
    }
}

/// Parse text as a number, accepting surrounding spaces
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match s.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok().map(|n| n / 100.0),
        None => s.parse::<f64>().ok().filter(|n| n.is_finite()),
    }
}

/// Render a number without a trailing `.0`
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{}", n);
        // Trim representation noise such as 0.30000000000000004
        match s.parse::<f64>() {
            Ok(_) if s.len() > 17 => format!("{:.15}", n)
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string(),
            _ => s,
        }
    }
}

/// Signature of every function implementation
pub type FunctionImpl =
    fn(&[ValueEval], &mut OperationContext<'_>) -> FormulaResult<ValueEval>;

/// A non-blank cell found inside an area
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCell {
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
    pub value: ValueEval,
}

/// Reads cells on behalf of functions, recording dependencies as it goes
pub trait CellResolver {
    /// Value of one cell. Formula cells are evaluated (or served from cache).
    fn cell_value(&mut self, book: usize, sheet: usize, row: u32, col: u16)
        -> FormulaResult<ValueEval>;

    /// Non-blank cells of an area in row-major order, sheet by sheet. The
    /// blank remainder of the area is recorded as a dependency too.
    fn stored_cells(&mut self, area: &AreaEval) -> FormulaResult<Vec<StoredCell>>;
}

/// Where a formula is being evaluated, and access to the cells around it
pub struct OperationContext<'a> {
    pub resolver: &'a mut dyn CellResolver,
    pub book: usize,
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
    /// Evaluating an array formula
    pub is_array: bool,
    pub version: SpreadsheetVersion,
}

impl<'a> OperationContext<'a> {
    /// Value of a single-cell reference (first sheet of a sheet range)
    pub fn ref_value(&mut self, r: &RefEval) -> FormulaResult<ValueEval> {
        self.resolver
            .cell_value(r.book, r.first_sheet, r.row, r.col)
    }

    /// Value at an offset from an area's top-left corner
    pub fn area_value(
        &mut self,
        area: &AreaEval,
        row_offset: u32,
        col_offset: u16,
    ) -> FormulaResult<ValueEval> {
        self.resolver.cell_value(
            area.book,
            area.first_sheet,
            area.first_row + row_offset,
            area.first_col + col_offset,
        )
    }

    /// Reduce any value to a scalar. Areas use implicit intersection with the
    /// evaluating cell's row or column.
    pub fn single_value(&mut self, v: &ValueEval) -> FormulaResult<ValueEval> {
        match v {
            ValueEval::Ref(r) => {
                if r.first_sheet != r.last_sheet {
                    return Ok(ValueEval::Error(CellError::Value));
                }
                self.ref_value(r)
            }
            ValueEval::Area(a) => self.intersect_area(a),
            ValueEval::RefList(areas) => match areas.as_slice() {
                [only] => self.intersect_area(only),
                _ => Ok(ValueEval::Error(CellError::Value)),
            },
            ValueEval::Array(arr) => Ok(arr
                .get(0, 0)
                .cloned()
                .unwrap_or(ValueEval::Error(CellError::Value))),
            ValueEval::FunctionName(_) => Ok(ValueEval::Error(CellError::Name)),
            ValueEval::MissingArg => Ok(ValueEval::Blank),
            other => Ok(other.clone()),
        }
    }

    fn intersect_area(&mut self, a: &AreaEval) -> FormulaResult<ValueEval> {
        if !a.is_single_sheet() {
            return Ok(ValueEval::Error(CellError::Value));
        }
        let (row, col) = if a.height() == 1 && a.width() == 1 {
            (a.first_row, a.first_col)
        } else if a.width() == 1 {
            if !a.contains_row(self.row) {
                return Ok(ValueEval::Error(CellError::Value));
            }
            (self.row, a.first_col)
        } else if a.height() == 1 {
            if !a.contains_col(self.col) {
                return Ok(ValueEval::Error(CellError::Value));
            }
            (a.first_row, self.col)
        } else if a.contains_row(self.row) && a.contains_col(self.col) {
            (self.row, self.col)
        } else {
            return Ok(ValueEval::Error(CellError::Value));
        };
        self.resolver.cell_value(a.book, a.first_sheet, row, col)
    }

    pub fn number_arg(&mut self, v: &ValueEval) -> FormulaResult<Result<f64, CellError>> {
        Ok(coerce_to_number(&self.single_value(v)?))
    }

    pub fn string_arg(&mut self, v: &ValueEval) -> FormulaResult<Result<String, CellError>> {
        Ok(coerce_to_string(&self.single_value(v)?))
    }

    pub fn bool_arg(&mut self, v: &ValueEval) -> FormulaResult<Result<bool, CellError>> {
        Ok(coerce_to_bool(&self.single_value(v)?))
    }

    /// Flatten arguments for aggregate functions. Each value is paired with
    /// whether it came through a reference or array (where text and booleans
    /// are skipped) rather than being typed directly.
    pub fn flatten_args(&mut self, args: &[ValueEval]) -> FormulaResult<Vec<(ValueEval, bool)>> {
        let mut out = Vec::new();
        for arg in args {
            match arg {
                ValueEval::Ref(r) => {
                    for sheet in r.first_sheet..=r.last_sheet {
                        let v = self.resolver.cell_value(r.book, sheet, r.row, r.col)?;
                        out.push((v, true));
                    }
                }
                ValueEval::Area(a) => {
                    for cell in self.resolver.stored_cells(a)? {
                        out.push((cell.value, true));
                    }
                }
                ValueEval::RefList(areas) => {
                    for a in areas {
                        for cell in self.resolver.stored_cells(a)? {
                            out.push((cell.value, true));
                        }
                    }
                }
                ValueEval::Array(arr) => {
                    out.extend(arr.values().iter().cloned().map(|v| (v, true)));
                }
                ValueEval::MissingArg => out.push((ValueEval::Blank, false)),
                ValueEval::FunctionName(_) => {
                    out.push((ValueEval::Error(CellError::Name), false))
                }
                other => out.push((other.clone(), false)),
            }
        }
        Ok(out)
    }

    /// Materialize a value as a 2D array, blanks included. Multi-sheet
    /// references use their first sheet.
    pub fn to_array(&mut self, v: &ValueEval) -> FormulaResult<ArrayEval> {
        match v {
            ValueEval::Area(a) => {
                let mut values = Vec::with_capacity(a.height() as usize * a.width() as usize);
                for row in a.first_row..=a.last_row {
                    for col in a.first_col..=a.last_col {
                        values.push(self.resolver.cell_value(a.book, a.first_sheet, row, col)?);
                    }
                }
                Ok(ArrayEval::new(
                    a.height() as usize,
                    a.width() as usize,
                    values,
                ))
            }
            ValueEval::Ref(r) => Ok(ArrayEval::scalar(self.ref_value(r)?)),
            ValueEval::RefList(areas) => match areas.as_slice() {
                [only] => self.to_array(&ValueEval::Area(*only)),
                _ => Ok(ArrayEval::scalar(ValueEval::Error(CellError::Value))),
            },
            ValueEval::Array(arr) => Ok(arr.clone()),
            other => Ok(ArrayEval::scalar(self.single_value(other)?)),
        }
    }
}
