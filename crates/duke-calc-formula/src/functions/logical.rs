//! Logical functions

use duke_calc_core::CellError;

use crate::error::FormulaResult;
use crate::value::{coerce_to_bool, OperationContext, ValueEval};

/// IF function
///
/// Usually short-circuited by the evaluator's jump attributes; it only runs
/// itself when the condition is false and there is no false branch.
pub fn fn_if(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let condition = value_or_error!(ctx.bool_arg(&args[0])?);
    let chosen = if condition { args.get(1) } else { args.get(2) };
    Ok(match chosen {
        Some(ValueEval::MissingArg) => ValueEval::Blank,
        Some(v) => v.clone(),
        None => ValueEval::Boolean(false),
    })
}

/// Fold booleans for AND/OR. `None` when no argument was logical.
fn logical_values(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
) -> FormulaResult<Result<Option<Vec<bool>>, CellError>> {
    let mut values = Vec::new();
    for (value, referenced) in ctx.flatten_args(args)? {
        match value {
            ValueEval::Error(e) => return Ok(Err(e)),
            ValueEval::Blank => {}
            ValueEval::String(_) if referenced => {}
            other => match coerce_to_bool(&other) {
                Ok(b) => values.push(b),
                Err(e) => return Ok(Err(e)),
            },
        }
    }
    Ok(Ok(if values.is_empty() { None } else { Some(values) }))
}

/// AND function
pub fn fn_and(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(match value_or_error!(logical_values(args, ctx)?) {
        Some(values) => ValueEval::Boolean(values.iter().all(|b| *b)),
        None => ValueEval::Error(CellError::Value),
    })
}

/// OR function
pub fn fn_or(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(match value_or_error!(logical_values(args, ctx)?) {
        Some(values) => ValueEval::Boolean(values.iter().any(|b| *b)),
        None => ValueEval::Error(CellError::Value),
    })
}

pub fn fn_not(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let b = value_or_error!(ctx.bool_arg(&args[0])?);
    Ok(ValueEval::Boolean(!b))
}

pub fn fn_iferror(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    match ctx.single_value(&args[0])? {
        ValueEval::Error(_) => ctx.single_value(&args[1]),
        value => Ok(value),
    }
}

pub fn fn_true(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Boolean(true))
}

pub fn fn_false(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Boolean(false))
}
