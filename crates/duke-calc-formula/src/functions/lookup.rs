//! Lookup and reference functions
//!
//! INDEX, OFFSET and CHOOSE return references; the caller's operand class
//! decides whether they get dereferenced.

use std::cmp::Ordering;

use duke_calc_core::CellError;

use crate::error::FormulaResult;
use crate::value::{compare_scalars, AreaEval, ArrayEval, OperationContext, RefEval, ValueEval};

/// Wrap an area as the narrowest reference value
fn reference(area: AreaEval) -> ValueEval {
    if area.height() == 1 && area.width() == 1 && area.is_single_sheet() {
        ValueEval::Ref(RefEval {
            book: area.book,
            first_sheet: area.first_sheet,
            last_sheet: area.last_sheet,
            row: area.first_row,
            col: area.first_col,
        })
    } else {
        ValueEval::Area(area)
    }
}

fn is_omitted(arg: Option<&ValueEval>) -> bool {
    matches!(arg, None | Some(ValueEval::MissingArg))
}

/// ROW([reference])
pub fn fn_row(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    if is_omitted(args.first()) {
        return Ok(ValueEval::Number(ctx.row as f64 + 1.0));
    }
    Ok(match args[0].as_area() {
        Some(area) => ValueEval::Number(area.first_row as f64 + 1.0),
        None => ValueEval::Error(CellError::Value),
    })
}

/// COLUMN([reference])
pub fn fn_column(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    if is_omitted(args.first()) {
        return Ok(ValueEval::Number(ctx.col as f64 + 1.0));
    }
    Ok(match args[0].as_area() {
        Some(area) => ValueEval::Number(area.first_col as f64 + 1.0),
        None => ValueEval::Error(CellError::Value),
    })
}

pub fn fn_rows(args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(match &args[0] {
        ValueEval::Array(arr) => ValueEval::Number(arr.rows() as f64),
        other => match other.as_area() {
            Some(area) => ValueEval::Number(area.height() as f64),
            None if other.is_scalar() => ValueEval::Number(1.0),
            None => ValueEval::Error(CellError::Value),
        },
    })
}

pub fn fn_columns(args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(match &args[0] {
        ValueEval::Array(arr) => ValueEval::Number(arr.cols() as f64),
        other => match other.as_area() {
            Some(area) => ValueEval::Number(area.width() as f64),
            None if other.is_scalar() => ValueEval::Number(1.0),
            None => ValueEval::Error(CellError::Value),
        },
    })
}

/// Optional 1-based index argument; omitted means 0
fn index_arg(
    arg: Option<&ValueEval>,
    ctx: &mut OperationContext<'_>,
) -> FormulaResult<Result<i64, CellError>> {
    let Some(arg) = arg.filter(|a| !matches!(a, ValueEval::MissingArg)) else {
        return Ok(Ok(0));
    };
    Ok(ctx.number_arg(arg)?.and_then(|n| {
        if n < 0.0 {
            Err(CellError::Value)
        } else {
            Ok(n.trunc() as i64)
        }
    }))
}

/// INDEX(reference, row, [column], [area])
///
/// A zero row or column selects the whole column or row. With a single-row
/// reference and no column, the row argument indexes columns.
pub fn fn_index(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let mut row = value_or_error!(index_arg(args.get(1), ctx)?);
    let mut col = value_or_error!(index_arg(args.get(2), ctx)?);

    if let ValueEval::Array(arr) = &args[0] {
        if is_omitted(args.get(2)) && arr.rows() == 1 {
            std::mem::swap(&mut row, &mut col);
        }
        let r = (row.max(1) - 1) as usize;
        let c = (col.max(1) - 1) as usize;
        return Ok(arr
            .get(r, c)
            .cloned()
            .unwrap_or(ValueEval::Error(CellError::Ref)));
    }

    let area = match &args[0] {
        ValueEval::RefList(areas) => {
            let n = value_or_error!(index_arg(args.get(3), ctx)?).max(1) as usize;
            match areas.get(n - 1) {
                Some(area) => *area,
                None => return Ok(ValueEval::Error(CellError::Ref)),
            }
        }
        other => match other.as_area() {
            Some(area) => area,
            // A scalar behaves like a one-cell array
            None if other.is_scalar() && row <= 1 && col <= 1 => return Ok(other.clone()),
            None => return Ok(ValueEval::Error(CellError::Value)),
        },
    };

    if is_omitted(args.get(2)) && area.height() == 1 && area.width() > 1 {
        std::mem::swap(&mut row, &mut col);
    }
    if row > area.height() as i64 || col > area.width() as i64 {
        return Ok(ValueEval::Error(CellError::Ref));
    }

    let mut selected = area;
    if row > 0 {
        selected.first_row = area.first_row + (row - 1) as u32;
        selected.last_row = selected.first_row;
    }
    if col > 0 {
        selected.first_col = area.first_col + (col - 1) as u16;
        selected.last_col = selected.first_col;
    }
    Ok(reference(selected))
}

/// OFFSET(reference, rows, cols, [height], [width]) (volatile)
pub fn fn_offset(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let Some(base) = args[0].as_area() else {
        return Ok(ValueEval::Error(CellError::Value));
    };
    let rows = value_or_error!(ctx.number_arg(&args[1])?).trunc() as i64;
    let cols = value_or_error!(ctx.number_arg(&args[2])?).trunc() as i64;
    let height = match args.get(3) {
        None | Some(ValueEval::MissingArg) => base.height() as i64,
        Some(v) => value_or_error!(ctx.number_arg(v)?).trunc() as i64,
    };
    let width = match args.get(4) {
        None | Some(ValueEval::MissingArg) => base.width() as i64,
        Some(v) => value_or_error!(ctx.number_arg(v)?).trunc() as i64,
    };
    if height == 0 || width == 0 {
        return Ok(ValueEval::Error(CellError::Ref));
    }
    Ok(match base.offset(rows, cols, height, width, ctx.version) {
        Some(area) => reference(area),
        None => ValueEval::Error(CellError::Ref),
    })
}

/// CHOOSE(index, value1, ...)
///
/// Only reached when the call was not compiled with a jump table.
pub fn fn_choose(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let index = value_or_error!(ctx.number_arg(&args[0])?).trunc();
    if index < 1.0 || index as usize >= args.len() {
        return Ok(ValueEval::Error(CellError::Value));
    }
    Ok(match &args[index as usize] {
        ValueEval::MissingArg => ValueEval::Blank,
        chosen => chosen.clone(),
    })
}

/// First-column values of a lookup table, read one at a time
enum Table<'v> {
    Area(AreaEval),
    Array(&'v ArrayEval),
}

impl Table<'_> {
    fn height(&self) -> usize {
        match self {
            Table::Area(a) => a.height() as usize,
            Table::Array(arr) => arr.rows(),
        }
    }

    fn width(&self) -> usize {
        match self {
            Table::Area(a) => a.width() as usize,
            Table::Array(arr) => arr.cols(),
        }
    }

    fn value(
        &self,
        ctx: &mut OperationContext<'_>,
        row: usize,
        col: usize,
    ) -> FormulaResult<ValueEval> {
        match self {
            Table::Area(a) => ctx.area_value(a, row as u32, col as u16),
            Table::Array(arr) => Ok(arr.get(row, col).cloned().unwrap_or(ValueEval::Blank)),
        }
    }
}

fn same_kind(a: &ValueEval, b: &ValueEval) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// VLOOKUP(value, table, col_index, [approximate])
///
/// Approximate lookup assumes an ascending first column and returns the last
/// row not greater than the value; exact lookup compares case-insensitively.
pub fn fn_vlookup(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let needle = ctx.single_value(&args[0])?;
    if let ValueEval::Error(e) = needle {
        return Ok(ValueEval::Error(e));
    }
    let table = match &args[1] {
        ValueEval::Array(arr) => Table::Array(arr),
        other => match other.as_area() {
            Some(area) => Table::Area(area),
            None => return Ok(ValueEval::Error(CellError::Na)),
        },
    };
    let col_index = value_or_error!(ctx.number_arg(&args[2])?).trunc();
    if col_index < 1.0 {
        return Ok(ValueEval::Error(CellError::Value));
    }
    let col_index = col_index as usize;
    if col_index > table.width() {
        return Ok(ValueEval::Error(CellError::Ref));
    }
    let approximate = match args.get(3) {
        None => true,
        Some(ValueEval::MissingArg) => false,
        Some(v) => value_or_error!(ctx.bool_arg(v)?),
    };

    let mut found = None;
    for row in 0..table.height() {
        let candidate = table.value(ctx, row, 0)?;
        if !same_kind(&candidate, &needle) {
            continue;
        }
        match compare_scalars(&candidate, &needle) {
            Ok(Ordering::Equal) => {
                found = Some(row);
                if !approximate {
                    break;
                }
            }
            Ok(Ordering::Less) if approximate => found = Some(row),
            Ok(Ordering::Greater) if approximate => break,
            _ => {}
        }
    }

    match found {
        Some(row) => table.value(ctx, row, col_index - 1),
        None => Ok(ValueEval::Error(CellError::Na)),
    }
}
