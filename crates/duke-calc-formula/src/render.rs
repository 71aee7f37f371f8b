//! Formula rendering
//!
//! Turns reverse Polish tokens back into formula text (no leading `=`).
//! Jump attributes and memory markers only exist for the evaluator and
//! produce no text. Parsing the output gives back equivalent tokens.

use duke_calc_core::{CellAddress, CellValue};

use crate::error::{FormulaError, FormulaResult};
use crate::functions::{FunctionRegistry, FUNCTION_INDEX_EXTERNAL};
use crate::token::{AreaRef, Attr, ExternSheet, Operator, Token};
use crate::version::SpreadsheetVersion;
use crate::workbook::FormulaRenderingWorkbook;

/// Render tokens as formula text
pub fn to_formula_string<W: FormulaRenderingWorkbook + ?Sized>(
    book: &W,
    tokens: &[Token],
    registry: &FunctionRegistry,
) -> FormulaResult<String> {
    let version = book.spreadsheet_version();
    let mut stack: Vec<String> = Vec::new();

    for token in tokens {
        let text = match token {
            Token::Attr(Attr::Sum) => format!("SUM({})", pop(&mut stack)?),
            Token::Attr(_) | Token::MemFunc { .. } | Token::MemArea { .. } => continue,
            Token::Paren => format!("({})", pop(&mut stack)?),
            Token::Op(op) => render_operator(*op, &mut stack)?,
            Token::Func { index, .. } => {
                let def = registry
                    .get_by_index(*index)
                    .ok_or_else(|| FormulaError::internal(format!("unknown function index {index}")))?;
                let args = pop_n(&mut stack, def.min_args)?;
                format!("{}({})", def.name, args.join(","))
            }
            Token::FuncVar { index, argc, .. } => {
                let mut args = pop_n(&mut stack, *argc as usize)?;
                let name = if *index == FUNCTION_INDEX_EXTERNAL {
                    if args.is_empty() {
                        return Err(FormulaError::internal("external call without a name"));
                    }
                    args.remove(0)
                } else {
                    registry
                        .get_by_index(*index)
                        .ok_or_else(|| {
                            FormulaError::internal(format!("unknown function index {index}"))
                        })?
                        .name
                        .to_string()
                };
                format!("{}({})", name, args.join(","))
            }
            Token::Int(n) => n.to_string(),
            Token::Number(n) => render_number(*n),
            Token::String(s) => quote_string(s),
            Token::Bool(b) => bool_text(*b).to_string(),
            Token::Error(e) => e.as_str().to_string(),
            Token::MissingArg => String::new(),
            Token::Ref { addr, .. } => addr.to_a1_string(),
            Token::Area { area, .. } => render_area(area, version),
            Token::Ref3d { sheet, addr, .. } => {
                format!("{}{}", sheet_prefix(book, sheet)?, addr.to_a1_string())
            }
            Token::Area3d { sheet, area, .. } => {
                format!("{}{}", sheet_prefix(book, sheet)?, render_area(area, version))
            }
            Token::RefErr { .. } | Token::AreaErr { .. } => "#REF!".to_string(),
            Token::DeletedRef3d { sheet, .. } | Token::DeletedArea3d { sheet, .. } => {
                format!("{}#REF!", sheet_prefix(book, sheet)?)
            }
            Token::Name { index, .. } => book
                .defined_name(*index)
                .ok_or_else(|| FormulaError::internal(format!("no defined name at index {index}")))?
                .to_string(),
            Token::NameX { name, .. } => name.clone(),
            Token::Array { rows, .. } => render_array(rows),
        };
        stack.push(text);
    }

    let result = pop(&mut stack)?;
    if !stack.is_empty() {
        return Err(FormulaError::internal(format!(
            "{} operands left over after rendering",
            stack.len()
        )));
    }
    Ok(result)
}

fn pop(stack: &mut Vec<String>) -> FormulaResult<String> {
    stack
        .pop()
        .ok_or_else(|| FormulaError::internal("operand stack underflow while rendering"))
}

fn pop_n(stack: &mut Vec<String>, n: usize) -> FormulaResult<Vec<String>> {
    if stack.len() < n {
        return Err(FormulaError::internal("operand stack underflow while rendering"));
    }
    Ok(stack.split_off(stack.len() - n))
}

fn render_operator(op: Operator, stack: &mut Vec<String>) -> FormulaResult<String> {
    Ok(match op {
        Operator::UnaryPlus | Operator::UnaryMinus => format!("{}{}", op.symbol(), pop(stack)?),
        Operator::Percent => format!("{}%", pop(stack)?),
        _ => {
            let right = pop(stack)?;
            let left = pop(stack)?;
            format!("{}{}{}", left, op.symbol(), right)
        }
    })
}

fn bool_text(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Shortest text that parses back to the same number
pub fn render_number(n: f64) -> String {
    let abs = n.abs();
    if abs != 0.0 && !(1e-7..1e21).contains(&abs) {
        format!("{n:e}")
    } else {
        format!("{n}")
    }
}

fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn render_area(area: &AreaRef, version: SpreadsheetVersion) -> String {
    let (first, last) = (area.first, area.last);
    let dollar = |abs: bool| if abs { "$" } else { "" };
    if area.is_whole_column(version) {
        format!(
            "{}{}:{}{}",
            dollar(first.col_absolute),
            CellAddress::column_to_letters(first.col),
            dollar(last.col_absolute),
            CellAddress::column_to_letters(last.col)
        )
    } else if area.is_whole_row(version) {
        format!(
            "{}{}:{}{}",
            dollar(first.row_absolute),
            first.row + 1,
            dollar(last.row_absolute),
            last.row + 1
        )
    } else {
        format!("{}:{}", first.to_a1_string(), last.to_a1_string())
    }
}

fn render_array(rows: &[Vec<CellValue>]) -> String {
    let rows: Vec<String> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| match value {
                    CellValue::Number(n) => render_number(*n),
                    CellValue::String(s) => quote_string(s.as_str()),
                    CellValue::Boolean(b) => bool_text(*b).to_string(),
                    CellValue::Error(e) => e.as_str().to_string(),
                    CellValue::Empty => String::new(),
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    format!("{{{}}}", rows.join(";"))
}

fn sheet_prefix<W: FormulaRenderingWorkbook + ?Sized>(
    book: &W,
    sheet: &ExternSheet,
) -> FormulaResult<String> {
    let unknown = || FormulaError::internal(format!("unknown sheet in reference {sheet:?}"));
    let (book_name, first, last) = match sheet.link {
        None => (
            None,
            book.sheet_name(sheet.first as usize).ok_or_else(unknown)?,
            book.sheet_name(sheet.last as usize).ok_or_else(unknown)?,
        ),
        Some(link) => (
            Some(book.external_link_name(link).ok_or_else(unknown)?),
            book.external_sheet_name(link, sheet.first).ok_or_else(unknown)?,
            book.external_sheet_name(link, sheet.last).ok_or_else(unknown)?,
        ),
    };

    let mut body = String::new();
    if let Some(name) = book_name {
        body.push('[');
        body.push_str(name);
        body.push(']');
    }
    body.push_str(first);
    let mut quote = book_name.is_some_and(|n| n.contains(['\'', ' ', ']'])) || needs_quotes(first);
    if sheet.first != sheet.last {
        body.push(':');
        body.push_str(last);
        quote |= needs_quotes(last);
    }
    if quote {
        Ok(format!("'{}'!", body.replace('\'', "''")))
    } else {
        Ok(format!("{body}!"))
    }
}

/// Sheet names that would not read back as a plain identifier
fn needs_quotes(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return true;
    };
    if !(first.is_alphabetic() || first == '_') {
        return true;
    }
    if name
        .chars()
        .any(|c| !(c.is_alphanumeric() || c == '_' || c == '.'))
    {
        return true;
    }
    if name.eq_ignore_ascii_case("TRUE") || name.eq_ignore_ascii_case("FALSE") {
        return true;
    }
    looks_like_cell_reference(name)
}

/// `A1`, `XFD1048576`, R1C1 style `R1C1`
fn looks_like_cell_reference(name: &str) -> bool {
    let letters: String = name.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &name[letters.len()..];
    if !letters.is_empty()
        && letters.len() <= 3
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
    {
        return true;
    }
    let upper = name.to_ascii_uppercase();
    upper
        .strip_prefix('R')
        .and_then(|rest| rest.split_once('C'))
        .is_some_and(|(r, c)| {
            r.chars().all(|ch| ch.is_ascii_digit()) && c.chars().all(|ch| ch.is_ascii_digit())
        })
}
