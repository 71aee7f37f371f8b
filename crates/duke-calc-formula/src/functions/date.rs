//! Date functions, as serial numbers in the 1900 date system

use chrono::{Local, NaiveDate};
use duke_calc_core::{date_to_serial, datetime_to_serial, CellError};

use crate::error::FormulaResult;
use crate::value::{OperationContext, ValueEval};

/// Serial for a year/month/day where month and day may overflow. Days
/// count on from the first of the month in serial space, so the phantom
/// 1900-02-29 is reachable.
fn serial_from_parts(year: i64, month: i64, day: i64) -> Option<f64> {
    let total_months = year * 12 + (month - 1);
    let norm_year = i32::try_from(total_months.div_euclid(12)).ok()?;
    let norm_month = total_months.rem_euclid(12) as u32 + 1;
    let first = NaiveDate::from_ymd_opt(norm_year, norm_month, 1)?;
    Some(date_to_serial(first) + (day - 1) as f64)
}

/// DATE(year, month, day)
///
/// Years below 1900 are offsets from 1900.
pub fn fn_date(args: &[ValueEval], ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    let mut year = value_or_error!(ctx.number_arg(&args[0])?).trunc() as i64;
    let month = value_or_error!(ctx.number_arg(&args[1])?).trunc() as i64;
    let day = value_or_error!(ctx.number_arg(&args[2])?).trunc() as i64;

    if (0..1900).contains(&year) {
        year += 1900;
    }
    if !(0..=9999).contains(&year) {
        return Ok(ValueEval::Error(CellError::Num));
    }
    Ok(match serial_from_parts(year, month, day) {
        Some(serial) if serial >= 0.0 => ValueEval::Number(serial),
        _ => ValueEval::Error(CellError::Num),
    })
}

/// NOW() (volatile)
pub fn fn_now(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Number(datetime_to_serial(Local::now().naive_local())))
}

/// TODAY() (volatile)
pub fn fn_today(_args: &[ValueEval], _ctx: &mut OperationContext<'_>) -> FormulaResult<ValueEval> {
    Ok(ValueEval::Number(date_to_serial(Local::now().date_naive())))
}
