//! Text functions

use duke_calc_core::CellError;

use crate::error::FormulaResult;
use crate::value::{OperationContext, ValueEval};

/// Longest string a cell can hold
const MAX_TEXT_LEN: usize = 32_767;

fn take_left(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn take_right(s: &str, n: usize) -> String {
    let len = s.chars().count();
    if n >= len {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

/// Optional character count argument, defaulting to 1; negative is `#VALUE!`
fn char_count(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
) -> FormulaResult<Result<usize, CellError>> {
    match args.get(1) {
        None | Some(ValueEval::MissingArg) => Ok(Ok(1)),
        Some(v) => Ok(ctx.number_arg(v)?.and_then(|n| {
            if n < 0.0 {
                Err(CellError::Value)
            } else {
                Ok(n.trunc() as usize)
            }
        })),
    }
}

fn map_text(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
    f: impl Fn(&str) -> String,
) -> FormulaResult<ValueEval> {
    let text = value_or_error!(ctx.string_arg(&args[0])?);
    Ok(ValueEval::string(f(&text)))
}

/// LEN(text)
pub fn fn_len(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let text = value_or_error!(ctx.string_arg(&args[0])?);
    Ok(ValueEval::Number(text.chars().count() as f64))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let text = value_or_error!(ctx.string_arg(&args[0])?);
    let n = value_or_error!(char_count(args, ctx)?);
    Ok(ValueEval::string(take_left(&text, n)))
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let text = value_or_error!(ctx.string_arg(&args[0])?);
    let n = value_or_error!(char_count(args, ctx)?);
    Ok(ValueEval::string(take_right(&text, n)))
}

pub fn fn_lower(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    map_text(args, ctx, str::to_lowercase)
}

pub fn fn_upper(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    map_text(args, ctx, str::to_uppercase)
}

/// TRIM drops leading and trailing spaces and collapses inner runs to one
pub fn fn_trim(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    map_text(args, ctx, |s| {
        s.split(' ')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    })
}

pub fn fn_concatenate(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
) -> FormulaResult<ValueEval> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&value_or_error!(ctx.string_arg(arg)?));
    }
    Ok(ValueEval::string(out))
}

/// REPT(text, number_times)
pub fn fn_rept(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let text = value_or_error!(ctx.string_arg(&args[0])?);
    let times = value_or_error!(ctx.number_arg(&args[1])?);
    if times < 0.0 {
        return Ok(ValueEval::Error(CellError::Value));
    }
    let times = times.trunc() as usize;
    if text.chars().count().saturating_mul(times) > MAX_TEXT_LEN {
        return Ok(ValueEval::Error(CellError::Value));
    }
    Ok(ValueEval::string(text.repeat(times)))
}
