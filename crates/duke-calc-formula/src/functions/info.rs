//! Information functions

use duke_calc_core::CellError;

use crate::error::FormulaResult;
use crate::value::{OperationContext, ValueEval};

fn test_value(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
    predicate: impl Fn(&ValueEval) -> bool,
) -> FormulaResult<ValueEval> {
    let value = ctx.single_value(&args[0])?;
    Ok(ValueEval::Boolean(predicate(&value)))
}

pub fn fn_isblank(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    test_value(args, ctx, |v| matches!(v, ValueEval::Blank))
}

pub fn fn_isnumber(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    test_value(args, ctx, |v| matches!(v, ValueEval::Number(_)))
}

pub fn fn_istext(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    test_value(args, ctx, |v| matches!(v, ValueEval::String(_)))
}

pub fn fn_iserror(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    test_value(args, ctx, |v| matches!(v, ValueEval::Error(_)))
}

/// Any error except `#N/A`
pub fn fn_iserr(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    test_value(args, ctx, |v| {
        matches!(v, ValueEval::Error(e) if *e != CellError::Na)
    })
}

pub fn fn_isna(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    test_value(args, ctx, |v| matches!(v, ValueEval::Error(CellError::Na)))
}

pub fn fn_na(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Error(CellError::Na))
}
