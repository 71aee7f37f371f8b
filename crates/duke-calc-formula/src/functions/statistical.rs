//! Statistical functions

use duke_calc_core::CellError;

use super::criteria::{matching_offsets, Criteria};
use super::math::{collect_numbers, number_result};
use crate::error::FormulaResult;
use crate::value::{coerce_to_number, OperationContext, ValueEval};

/// COUNT(value1, ...) counts numbers. Typed arguments that convert to a
/// number count too; errors are skipped rather than propagated.
pub fn fn_count(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let mut count = 0;
    for (value, referenced) in ctx.flatten_args(args)? {
        match value {
            ValueEval::Number(_) => count += 1,
            ValueEval::String(_) | ValueEval::Boolean(_) if !referenced => {
                if coerce_to_number(&value).is_ok() {
                    count += 1;
                }
            }
            _ => {}
        }
    }
    Ok(ValueEval::Number(count as f64))
}

/// COUNTA(value1, ...) counts every non-blank value, errors included
pub fn fn_counta(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let count = ctx
        .flatten_args(args)?
        .iter()
        .filter(|(value, _)| !matches!(value, ValueEval::Blank))
        .count();
    Ok(ValueEval::Number(count as f64))
}

pub fn fn_average(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let numbers = value_or_error!(collect_numbers(args, ctx)?);
    if numbers.is_empty() {
        return Ok(ValueEval::Error(CellError::Div0));
    }
    Ok(number_result(numbers.iter().sum::<f64>() / numbers.len() as f64))
}

/// MIN of no numbers is zero
pub fn fn_min(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let numbers = value_or_error!(collect_numbers(args, ctx)?);
    Ok(ValueEval::Number(
        numbers.into_iter().reduce(f64::min).unwrap_or(0.0),
    ))
}

/// MAX of no numbers is zero
pub fn fn_max(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let numbers = value_or_error!(collect_numbers(args, ctx)?);
    Ok(ValueEval::Number(
        numbers.into_iter().reduce(f64::max).unwrap_or(0.0),
    ))
}

/// COUNTIF(range, criteria)
pub fn fn_countif(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let Some(range) = args[0].as_area() else {
        return Ok(ValueEval::Error(CellError::Value));
    };
    let criteria = Criteria::new(&ctx.single_value(&args[1])?);
    let matches = matching_offsets(ctx, &range, &criteria)?;
    Ok(ValueEval::Number(matches.len() as f64))
}
