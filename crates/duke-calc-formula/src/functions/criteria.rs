//! Criteria predicates for SUMIF and COUNTIF
//!
//! A criterion is a number, a boolean, or text that may start with a
//! comparison operator (`>5`, `<>apple`). Text operands support `*` and `?`
//! wildcards with `~` as escape, and compare case-insensitively.

use regex::Regex;

use crate::error::FormulaResult;
use crate::value::{parse_number, AreaEval, OperationContext, ValueEval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Comparison {
    fn split(s: &str) -> (Comparison, &str) {
        for (prefix, op) in [
            ("<>", Comparison::NotEqual),
            ("<=", Comparison::LessEqual),
            (">=", Comparison::GreaterEqual),
            ("<", Comparison::Less),
            (">", Comparison::Greater),
            ("=", Comparison::Equal),
        ] {
            if let Some(rest) = s.strip_prefix(prefix) {
                return (op, rest);
            }
        }
        (Comparison::Equal, s)
    }

    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Comparison::Equal => ordering == Equal,
            Comparison::NotEqual => ordering != Equal,
            Comparison::Less => ordering == Less,
            Comparison::LessEqual => ordering != Greater,
            Comparison::Greater => ordering == Greater,
            Comparison::GreaterEqual => ordering != Less,
        }
    }
}

#[derive(Debug)]
enum Operand {
    Number(f64),
    Boolean(bool),
    Text { lower: String, pattern: Option<Regex> },
    /// Bare `=` or `<>`
    Blank,
}

/// A compiled criterion
#[derive(Debug)]
pub struct Criteria {
    op: Comparison,
    operand: Operand,
}

impl Criteria {
    /// Compile from a dereferenced scalar criterion
    pub fn new(criteria: &ValueEval) -> Self {
        match criteria {
            ValueEval::Number(n) => Self::equal(Operand::Number(*n)),
            ValueEval::Boolean(b) => Self::equal(Operand::Boolean(*b)),
            ValueEval::String(s) => Self::parse(s.as_str()),
            // A blank criterion behaves like zero
            _ => Self::equal(Operand::Number(0.0)),
        }
    }

    fn equal(operand: Operand) -> Self {
        Self {
            op: Comparison::Equal,
            operand,
        }
    }

    fn parse(s: &str) -> Self {
        let (op, rest) = Comparison::split(s);
        let operand = if rest.is_empty() {
            if s.is_empty() {
                // `""` matches empty text and blanks
                Operand::Text {
                    lower: String::new(),
                    pattern: None,
                }
            } else {
                Operand::Blank
            }
        } else if let Some(n) = parse_number(rest) {
            Operand::Number(n)
        } else if rest.eq_ignore_ascii_case("TRUE") {
            Operand::Boolean(true)
        } else if rest.eq_ignore_ascii_case("FALSE") {
            Operand::Boolean(false)
        } else {
            let lower = rest.to_lowercase();
            let pattern = if matches!(op, Comparison::Equal | Comparison::NotEqual) {
                wildcard_regex(&lower)
            } else {
                None
            };
            Operand::Text { lower, pattern }
        };
        Self { op, operand }
    }

    /// Whether a cell value satisfies the criterion
    pub fn matches(&self, value: &ValueEval) -> bool {
        match &self.operand {
            Operand::Blank => {
                let blank = matches!(value, ValueEval::Blank);
                if self.op == Comparison::NotEqual {
                    !blank
                } else {
                    blank
                }
            }
            Operand::Number(n) => match value {
                ValueEval::Number(v) => self.op.holds(v.total_cmp(n)),
                ValueEval::String(s) if self.op == Comparison::Equal => {
                    parse_number(s.as_str()) == Some(*n)
                }
                _ => self.op == Comparison::NotEqual,
            },
            Operand::Boolean(b) => match value {
                ValueEval::Boolean(v) => self.op.holds(v.cmp(b)),
                _ => self.op == Comparison::NotEqual,
            },
            Operand::Text { lower, pattern } => {
                let text = match value {
                    ValueEval::String(s) => s.as_str().to_lowercase(),
                    ValueEval::Blank if lower.is_empty() => String::new(),
                    _ => return self.op == Comparison::NotEqual,
                };
                match pattern {
                    Some(re) => re.is_match(&text) == (self.op == Comparison::Equal),
                    None => self.op.holds(text.as_str().cmp(lower.as_str())),
                }
            }
        }
    }
}

/// Offsets (from the area's top-left) of the cells in `range` that match.
/// Blank cells are only visited when the criterion can match a blank.
pub fn matching_offsets(
    ctx: &mut OperationContext<'_>,
    range: &AreaEval,
    criteria: &Criteria,
) -> FormulaResult<Vec<(u32, u16)>> {
    let mut offsets = Vec::new();
    if criteria.matches(&ValueEval::Blank) {
        for row in 0..range.height() {
            for col in 0..range.width() {
                if criteria.matches(&ctx.area_value(range, row, col)?) {
                    offsets.push((row, col));
                }
            }
        }
    } else {
        let first_sheet_only = AreaEval {
            last_sheet: range.first_sheet,
            ..*range
        };
        for cell in ctx.resolver.stored_cells(&first_sheet_only)? {
            if criteria.matches(&cell.value) {
                offsets.push((cell.row - range.first_row, cell.col - range.first_col));
            }
        }
    }
    Ok(offsets)
}

/// Translate `*`/`?` wildcards into an anchored regex; `None` without wildcards
fn wildcard_regex(pattern: &str) -> Option<Regex> {
    if !pattern.contains(['*', '?']) {
        return None;
    }
    let mut re = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '~' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => re.push('~'),
            },
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}
