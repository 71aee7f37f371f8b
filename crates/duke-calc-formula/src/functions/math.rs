//! Math functions

use duke_calc_core::CellError;

use super::criteria::{matching_offsets, Criteria};
use crate::error::FormulaResult;
use crate::value::{coerce_to_number, OperationContext, ValueEval};

/// A finite number, or `#NUM!`
pub(crate) fn number_result(n: f64) -> ValueEval {
    if n.is_finite() {
        ValueEval::Number(n)
    } else {
        ValueEval::Error(CellError::Num)
    }
}

/// Numbers for aggregate functions. Typed arguments are coerced; values
/// reached through references only count when they are numbers.
pub(crate) fn collect_numbers(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
) -> FormulaResult<Result<Vec<f64>, CellError>> {
    let mut numbers = Vec::new();
    for (value, referenced) in ctx.flatten_args(args)? {
        match value {
            ValueEval::Number(n) => numbers.push(n),
            ValueEval::Error(e) => return Ok(Err(e)),
            ValueEval::Blank => {}
            other if !referenced => match coerce_to_number(&other) {
                Ok(n) => numbers.push(n),
                Err(e) => return Ok(Err(e)),
            },
            _ => {}
        }
    }
    Ok(Ok(numbers))
}

fn unary(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
    f: impl Fn(f64) -> Result<f64, CellError>,
) -> FormulaResult<ValueEval> {
    let n = value_or_error!(ctx.number_arg(&args[0])?);
    Ok(match f(n) {
        Ok(result) => number_result(result),
        Err(e) => ValueEval::Error(e),
    })
}

/// SUM function
pub fn fn_sum(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let numbers = value_or_error!(collect_numbers(args, ctx)?);
    Ok(number_result(numbers.iter().sum()))
}

pub fn fn_pi(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Number(std::f64::consts::PI))
}

pub fn fn_sqrt(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    unary(args, ctx, |n| {
        if n < 0.0 {
            Err(CellError::Num)
        } else {
            Ok(n.sqrt())
        }
    })
}

pub fn fn_abs(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    unary(args, ctx, |n| Ok(n.abs()))
}

/// INT rounds down, toward negative infinity
pub fn fn_int(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    unary(args, ctx, |n| Ok(n.floor()))
}

pub fn fn_sign(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    unary(args, ctx, |n| {
        Ok(if n > 0.0 {
            1.0
        } else if n < 0.0 {
            -1.0
        } else {
            0.0
        })
    })
}

/// ROUND, halves away from zero; negative digits round left of the point
pub fn fn_round(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let n = value_or_error!(ctx.number_arg(&args[0])?);
    let digits = value_or_error!(ctx.number_arg(&args[1])?).trunc();
    Ok(number_result(round_half_away(n, digits as i32)))
}

pub(crate) fn round_half_away(n: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    // Nudge by a relative epsilon so 2.675 rounds like its decimal text
    let scaled = n * factor;
    let nudged = scaled + scaled.signum() * scaled.abs() * f64::EPSILON * 4.0;
    nudged.round() / factor
}

/// MOD takes the sign of the divisor
pub fn fn_mod(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let n = value_or_error!(ctx.number_arg(&args[0])?);
    let d = value_or_error!(ctx.number_arg(&args[1])?);
    if d == 0.0 {
        return Ok(ValueEval::Error(CellError::Div0));
    }
    Ok(number_result(n - d * (n / d).floor()))
}

/// RAND (volatile)
pub fn fn_rand(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Number(rand::random::<f64>()))
}

pub fn fn_power(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let base = value_or_error!(ctx.number_arg(&args[0])?);
    let exp = value_or_error!(ctx.number_arg(&args[1])?);
    if base == 0.0 && exp < 0.0 {
        return Ok(ValueEval::Error(CellError::Div0));
    }
    Ok(number_result(base.powf(exp)))
}

/// SUMPRODUCT of equally-sized arrays; non-numbers count as zero
pub fn fn_sumproduct(
    args: &[ValueEval],
    ctx: &mut OperationContext<'_>,
) -> FormulaResult<ValueEval> {
    let mut arrays = Vec::with_capacity(args.len());
    for arg in args {
        arrays.push(ctx.to_array(arg)?);
    }
    let (rows, cols) = (arrays[0].rows(), arrays[0].cols());
    if arrays.iter().any(|a| a.rows() != rows || a.cols() != cols) {
        return Ok(ValueEval::Error(CellError::Value));
    }

    let mut total = 0.0;
    for i in 0..rows * cols {
        let mut product = 1.0;
        for array in &arrays {
            match &array.values()[i] {
                ValueEval::Number(n) => product *= n,
                ValueEval::Error(e) => return Ok(ValueEval::Error(*e)),
                _ => product = 0.0,
            }
        }
        total += product;
    }
    Ok(number_result(total))
}

/// SUMIF(range, criteria, [sum_range])
///
/// The sum range takes the shape of `range`, anchored at its own top-left.
pub fn fn_sumif(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let Some(range) = args[0].as_area() else {
        return Ok(ValueEval::Error(CellError::Value));
    };
    let criteria = Criteria::new(&ctx.single_value(&args[1])?);
    let sum_range = match args.get(2) {
        None | Some(ValueEval::MissingArg) => range,
        Some(v) => {
            let Some(anchor) = v.as_area() else {
                return Ok(ValueEval::Error(CellError::Value));
            };
            match anchor.offset(0, 0, range.height() as i64, range.width() as i64, ctx.version) {
                Some(area) => area,
                None => return Ok(ValueEval::Error(CellError::Ref)),
            }
        }
    };

    let mut sum = 0.0;
    for (row, col) in matching_offsets(ctx, &range, &criteria)? {
        match ctx.area_value(&sum_range, row, col)? {
            ValueEval::Number(n) => sum += n,
            ValueEval::Error(e) => return Ok(ValueEval::Error(e)),
            _ => {}
        }
    }
    Ok(number_result(sum))
}
