//! Value operators
//!
//! Arithmetic, comparison, concatenation and the unary operators work on
//! dereferenced scalars, or element by element on arrays. The reference
//! operators (range, intersection, union) need the lazy reference values
//! and are handled by the evaluator.

use std::cmp::Ordering;

use duke_calc_core::CellError;

use crate::token::Operator;
use crate::value::{
    coerce_to_number, coerce_to_string, compare_scalars, ArrayEval, ValueEval,
};

/// Numbers never carry a negative zero or a non-finite value
fn number_result(n: f64) -> ValueEval {
    if n == 0.0 {
        ValueEval::Number(0.0)
    } else if n.is_finite() {
        ValueEval::Number(n)
    } else {
        ValueEval::Error(CellError::Num)
    }
}

/// Evaluate a binary value operator on two scalars
pub fn binary(op: Operator, left: &ValueEval, right: &ValueEval) -> ValueEval {
    match op {
        Operator::Add
        | Operator::Subtract
        | Operator::Multiply
        | Operator::Divide
        | Operator::Power => {
            let l = match coerce_to_number(left) {
                Ok(n) => n,
                Err(e) => return ValueEval::Error(e),
            };
            let r = match coerce_to_number(right) {
                Ok(n) => n,
                Err(e) => return ValueEval::Error(e),
            };
            match op {
                Operator::Add => number_result(l + r),
                Operator::Subtract => number_result(l - r),
                Operator::Multiply => number_result(l * r),
                Operator::Divide if r == 0.0 => ValueEval::Error(CellError::Div0),
                Operator::Divide => number_result(l / r),
                _ => number_result(l.powf(r)),
            }
        }

        Operator::Equal
        | Operator::NotEqual
        | Operator::LessThan
        | Operator::LessEqual
        | Operator::GreaterThan
        | Operator::GreaterEqual => match compare_scalars(left, right) {
            Ok(ord) => ValueEval::Boolean(match op {
                Operator::Equal => ord == Ordering::Equal,
                Operator::NotEqual => ord != Ordering::Equal,
                Operator::LessThan => ord == Ordering::Less,
                Operator::LessEqual => ord != Ordering::Greater,
                Operator::GreaterThan => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }),
            Err(e) => ValueEval::Error(e),
        },

        Operator::Concat => match (coerce_to_string(left), coerce_to_string(right)) {
            (Ok(l), Ok(r)) => ValueEval::string(l + &r),
            (Err(e), _) | (_, Err(e)) => ValueEval::Error(e),
        },

        _ => ValueEval::Error(CellError::Value),
    }
}

/// Evaluate a unary value operator on a scalar
pub fn unary(op: Operator, operand: &ValueEval) -> ValueEval {
    // +"text" keeps the text
    if op == Operator::UnaryPlus && matches!(operand, ValueEval::String(_)) {
        return operand.clone();
    }
    let n = match coerce_to_number(operand) {
        Ok(n) => n,
        Err(e) => return ValueEval::Error(e),
    };
    match op {
        Operator::UnaryMinus => number_result(-n),
        Operator::Percent => number_result(n / 100.0),
        _ => number_result(n),
    }
}

/// Apply a binary operator element by element. Single rows and columns
/// repeat; positions outside either operand yield `#N/A`.
pub fn binary_elementwise(op: Operator, left: &ArrayEval, right: &ArrayEval) -> ArrayEval {
    let rows = left.rows().max(right.rows());
    let cols = left.cols().max(right.cols());
    let mut values = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            values.push(match (left.broadcast(r, c), right.broadcast(r, c)) {
                (Some(l), Some(rv)) => binary(op, l, rv),
                _ => ValueEval::Error(CellError::Na),
            });
        }
    }
    ArrayEval::new(rows, cols, values)
}

pub fn unary_elementwise(op: Operator, operand: &ArrayEval) -> ArrayEval {
    let values = operand.values().iter().map(|v| unary(op, v)).collect();
    ArrayEval::new(operand.rows(), operand.cols(), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn n(v: f64) -> ValueEval {
        ValueEval::Number(v)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(binary(Operator::Add, &n(2.0), &n(3.0)), n(5.0));
        assert_eq!(binary(Operator::Subtract, &n(2.0), &ValueEval::Blank), n(2.0));
        assert_eq!(binary(Operator::Multiply, &ValueEval::string("4"), &ValueEval::Boolean(true)), n(4.0));
        assert_eq!(binary(Operator::Power, &n(-2.0), &n(2.0)), n(4.0));
        assert_eq!(binary(Operator::Subtract, &n(-0.0), &n(0.0)), n(0.0));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(binary(Operator::Divide, &n(1.0), &n(0.0)), ValueEval::Error(CellError::Div0));
        assert_eq!(binary(Operator::Power, &n(-8.0), &n(0.5)), ValueEval::Error(CellError::Num));
        assert_eq!(
            binary(Operator::Add, &ValueEval::string("abc"), &n(1.0)),
            ValueEval::Error(CellError::Value)
        );
        // the left operand's error wins
        assert_eq!(
            binary(Operator::Add, &ValueEval::Error(CellError::Na), &ValueEval::Error(CellError::Ref)),
            ValueEval::Error(CellError::Na)
        );
    }

    #[test]
    fn test_comparison_and_concat() {
        assert_eq!(binary(Operator::GreaterThan, &n(-1.0), &n(0.0)), ValueEval::Boolean(false));
        assert_eq!(binary(Operator::Equal, &ValueEval::string("A"), &ValueEval::string("a")), ValueEval::Boolean(true));
        assert_eq!(binary(Operator::LessEqual, &ValueEval::Blank, &n(0.0)), ValueEval::Boolean(true));
        assert_eq!(binary(Operator::Concat, &ValueEval::string("x"), &n(1.5)), ValueEval::string("x1.5"));
        assert_eq!(binary(Operator::Concat, &ValueEval::Boolean(true), &ValueEval::Blank), ValueEval::string("TRUE"));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(Operator::UnaryMinus, &n(3.0)), n(-3.0));
        assert_eq!(unary(Operator::UnaryMinus, &ValueEval::Blank), n(0.0));
        assert_eq!(unary(Operator::Percent, &n(50.0)), n(0.5));
        assert_eq!(unary(Operator::UnaryPlus, &ValueEval::string("abc")), ValueEval::string("abc"));
        assert_eq!(unary(Operator::UnaryMinus, &ValueEval::string("abc")), ValueEval::Error(CellError::Value));
    }

    #[test]
    fn test_elementwise_broadcast() {
        let column = ArrayEval::new(3, 1, vec![n(1.0), n(2.0), n(3.0)]);
        let scalar = ArrayEval::scalar(n(10.0));
        let sum = binary_elementwise(Operator::Add, &column, &scalar);
        assert_eq!(sum.values(), &[n(11.0), n(12.0), n(13.0)]);

        let short = ArrayEval::new(2, 2, vec![n(1.0), n(1.0), n(1.0), n(1.0)]);
        let wide = ArrayEval::new(3, 2, vec![n(1.0); 6]);
        let out = binary_elementwise(Operator::Multiply, &short, &wide);
        assert_eq!(out.get(2, 0), Some(&ValueEval::Error(CellError::Na)));

        let neg = unary_elementwise(Operator::UnaryMinus, &column);
        assert_eq!(neg.values(), &[n(-1.0), n(-2.0), n(-3.0)]);
    }
}
