//! Formula parser
//!
//! A recursive descent parser over formula text (without a leading `=`).
//! It builds a [`ParseNode`] tree of formula tokens, assigns operand classes
//! and flattens the tree into reverse Polish order.
//!
//! Precedence, loosest first: union (`,`), intersection (a space between two
//! references), comparison, `&`, `+ -`, `* /`, `^`, `%`, then a unary sign
//! applied to a simple factor. The sign binds tighter than `^`, so `-2^2`
//! is 4.
//!
//! # Example
//! ```rust
//! use duke_calc_core::Workbook;
//! use duke_calc_formula::{parse, FormulaKind, FunctionRegistry, Token};
//!
//! let book = Workbook::new();
//! let registry = FunctionRegistry::new();
//! let tokens = parse("1+2", &book, FormulaKind::Cell, 0, &registry).unwrap();
//! assert_eq!(tokens.len(), 3);
//! assert_eq!(tokens[0], Token::Int(1));
//! ```

use duke_calc_core::{CellAddress, CellError, CellValue};

use crate::error::{FormulaResult, ParseError};
use crate::functions::{FunctionRegistry, FUNCTION_INDEX_EXTERNAL, FUNCTION_INDEX_SUM};
use crate::operand_class;
use crate::parse_node::ParseNode;
use crate::token::{AreaRef, Attr, ExternSheet, OperandClass, Operator, Token};
use crate::version::SpreadsheetVersion;
use crate::workbook::FormulaParsingWorkbook;

type ParseResult<T> = Result<T, ParseError>;

/// Where a formula lives; decides the operand class of its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormulaKind {
    /// Ordinary cell formula, producing one value
    Cell,
    /// Array formula entered over a range
    Array,
    /// Defined name (or list validation source), producing a reference
    NamedRange,
}

impl FormulaKind {
    pub fn root_class(self) -> OperandClass {
        match self {
            FormulaKind::Cell => OperandClass::Value,
            FormulaKind::Array => OperandClass::Array,
            FormulaKind::NamedRange => OperandClass::Reference,
        }
    }
}

/// Parse formula text into reverse Polish tokens.
///
/// `sheet` is the sheet the formula belongs to; it scopes name lookups.
/// Coordinates in the result are absolute positions with relative flags,
/// so no cell position is needed.
pub fn parse<W: FormulaParsingWorkbook + ?Sized>(
    formula: &str,
    book: &W,
    kind: FormulaKind,
    sheet: usize,
    registry: &FunctionRegistry,
) -> FormulaResult<Vec<Token>> {
    let mut root = parse_tree(formula, book, sheet, registry)?;
    operand_class::transform(&mut root, kind, registry);
    Ok(root.to_tokens())
}

/// Parse formula text into a tree, before operand classes are assigned
pub fn parse_tree<W: FormulaParsingWorkbook + ?Sized>(
    formula: &str,
    book: &W,
    sheet: usize,
    registry: &FunctionRegistry,
) -> FormulaResult<ParseNode> {
    let mut parser = FormulaParser {
        cursor: Cursor::new(formula),
        book,
        sheet,
        registry,
        version: book.spreadsheet_version(),
    };
    Ok(parser.parse()?)
}

fn is_white(c: Option<char>) -> bool {
    matches!(c, Some(' ' | '\t' | '\r' | '\n'))
}

/// Read position over the formula characters
#[derive(Debug, Clone)]
struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn look(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn char_at(&self, pos: usize) -> Option<char> {
        self.chars.get(pos).copied()
    }

    fn advance(&mut self) {
        if self.pos < self.chars.len() {
            self.pos += 1;
        }
    }

    fn advance_by(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.chars.len());
    }

    fn skip_white(&mut self) {
        while is_white(self.look()) {
            self.pos += 1;
        }
    }

    fn reset(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Whether the character just consumed was a space
    fn after_space(&self) -> bool {
        self.pos > 0 && self.chars[self.pos - 1] == ' '
    }

    fn slice(&self, from: usize, to: usize) -> String {
        self.chars[from.min(to)..to.min(self.chars.len())]
            .iter()
            .collect()
    }

    fn rest(&self) -> String {
        self.slice(self.pos, self.chars.len())
    }

    fn text(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Sheet name as written, remembering whether it was quoted
#[derive(Debug, Clone)]
struct NameIdentifier {
    name: String,
    quoted: bool,
}

/// `[Book]Sheet!`, `Sheet!` or `Sheet1:Sheet3!`
#[derive(Debug, Clone)]
struct SheetIdentifier {
    book: Option<String>,
    first: NameIdentifier,
    last: Option<NameIdentifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Cell,
    Row,
    Column,
}

/// One side of a range: `$A$1`, `A` or `1`
#[derive(Debug, Clone)]
struct SimpleRangePart {
    rep: String,
    kind: PartKind,
    col: Option<(u16, bool)>,
    row: Option<(u32, bool)>,
}

impl SimpleRangePart {
    fn is_cell(&self) -> bool {
        self.kind == PartKind::Cell
    }

    fn is_row(&self) -> bool {
        self.kind == PartKind::Row
    }

    fn is_row_or_column(&self) -> bool {
        self.kind != PartKind::Cell
    }

    fn is_compatible_for_area(&self, other: &SimpleRangePart) -> bool {
        self.kind == other.kind
    }

    fn cell_address(&self) -> Option<CellAddress> {
        let (col, col_abs) = self.col?;
        let (row, row_abs) = self.row?;
        Some(CellAddress::with_absolute(row, col, row_abs, col_abs))
    }
}

/// Pieces of a `$?letters$?digits` run; either part may be missing
struct RepParts<'a> {
    col_abs: bool,
    letters: &'a str,
    row_abs: bool,
    digits: &'a str,
}

fn split_rep(rep: &str) -> Option<RepParts<'_>> {
    let bytes = rep.as_bytes();
    let mut i = 0;

    let col_start = i;
    if bytes.get(i) == Some(&b'$') {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let (col_abs, letters) = if i > letters_start {
        (letters_start > col_start, &rep[letters_start..i])
    } else {
        i = col_start;
        (false, "")
    };

    let row_start = i;
    if bytes.get(i) == Some(&b'$') {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let (row_abs, digits) = if i > digits_start {
        (digits_start > row_start, &rep[digits_start..i])
    } else {
        i = row_start;
        (false, "")
    };

    if i != bytes.len() || (letters.is_empty() && digits.is_empty()) {
        return None;
    }
    Some(RepParts {
        col_abs,
        letters,
        row_abs,
        digits,
    })
}

/// Zero-based column index of column letters, if inside the grid
fn column_index(letters: &str, version: SpreadsheetVersion) -> Option<u16> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let col = col.checked_sub(1)?;
    (col < version.max_columns() as u32).then_some(col as u16)
}

/// Zero-based row index of a one-based row number, if inside the grid
fn row_index(digits: &str, version: SpreadsheetVersion) -> Option<u32> {
    let n: u32 = digits.parse().ok()?;
    (1..=version.max_rows()).contains(&n).then(|| n - 1)
}

fn is_valid_defined_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '?' | '\\' | '_')
}

fn is_unquoted_sheet_name_char(c: char) -> bool {
    c.is_alphanumeric() || c as u32 > 128 || matches!(c, '.' | '_')
}

/// Operands allowed on either side of `:`
fn is_valid_range_operand(node: &ParseNode) -> bool {
    match &node.token {
        t if t.is_operand() => true,
        Token::Func { class, .. } | Token::FuncVar { class, .. } => {
            *class == OperandClass::Reference
        }
        Token::Op(op) => !op.is_value_operator(),
        Token::Paren => node.children.first().is_some_and(is_valid_range_operand),
        Token::Error(CellError::Ref) => true,
        _ => false,
    }
}

/// Whether a reference expression involves a function, a name or a 3D ref
fn needs_mem_func(node: &ParseNode) -> bool {
    match &node.token {
        Token::Func { .. } | Token::FuncVar { .. } | Token::Attr(Attr::Sum) => true,
        Token::Name { .. } | Token::NameX { .. } => true,
        t if t.is_3d() => true,
        Token::Op(_) | Token::Paren => node.children.iter().any(needs_mem_func),
        _ => false,
    }
}

/// Put a memory marker in front of a reference expression
fn augment_with_mem(root: ParseNode) -> ParseNode {
    let len = root.encoded_size() as u16;
    let token = if needs_mem_func(&root) {
        Token::MemFunc {
            len,
            class: OperandClass::Reference,
        }
    } else {
        Token::MemArea {
            len,
            class: OperandClass::Reference,
        }
    };
    ParseNode::new(token, vec![root])
}

struct FormulaParser<'a, W: ?Sized> {
    cursor: Cursor,
    book: &'a W,
    sheet: usize,
    registry: &'a FunctionRegistry,
    version: SpreadsheetVersion,
}

impl<W: FormulaParsingWorkbook + ?Sized> FormulaParser<'_, W> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.cursor.pos)
    }

    fn expected(&self, what: &str) -> ParseError {
        let message = match self.cursor.look() {
            Some(c) => format!(
                "Parse error near char {} '{}' in specified formula '{}'. Expected {}",
                self.cursor.pos,
                c,
                self.cursor.text(),
                what
            ),
            None => format!(
                "Unexpected end of formula '{}'. Expected {}",
                self.cursor.text(),
                what
            ),
        };
        self.error(message)
    }

    fn match_char(&mut self, c: char) -> ParseResult<()> {
        if self.cursor.look() != Some(c) {
            return Err(self.expected(&format!("'{c}'")));
        }
        self.cursor.advance();
        Ok(())
    }

    fn parse(&mut self) -> ParseResult<ParseNode> {
        if self.cursor.look() == Some('=') {
            return Err(self.error("Formula text must not start with '='"));
        }
        let root = self.union_expression()?;
        if !self.cursor.at_end() {
            return Err(self.error(format!(
                "Unused input [{}] after attempting to parse the formula [{}]",
                self.cursor.rest(),
                self.cursor.text()
            )));
        }
        Ok(root)
    }

    // === Operator precedence ===

    fn union_expression(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.intersection_expression()?;
        let mut has_unions = false;
        loop {
            self.cursor.skip_white();
            if self.cursor.look() != Some(',') {
                break;
            }
            self.cursor.advance();
            has_unions = true;
            let other = self.intersection_expression()?;
            result = ParseNode::new(Token::Op(Operator::Union), vec![result, other]);
        }
        Ok(if has_unions {
            augment_with_mem(result)
        } else {
            result
        })
    }

    fn intersection_expression(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.comparison_expression()?;
        let mut has_intersections = false;
        loop {
            self.cursor.skip_white();
            if !self.cursor.after_space() || self.cursor.at_end() {
                break;
            }
            let save = self.cursor.pos;
            match self.comparison_expression() {
                Ok(other) => {
                    self.check_valid_operand("intersection operator", "LHS", save, &result)?;
                    self.check_valid_operand("intersection operator", "RHS", save, &other)?;
                    result = ParseNode::new(Token::Op(Operator::Intersection), vec![result, other]);
                    has_intersections = true;
                }
                Err(_) => {
                    // Plain whitespace after all
                    self.cursor.reset(save);
                    break;
                }
            }
        }
        Ok(if has_intersections {
            augment_with_mem(result)
        } else {
            result
        })
    }

    fn comparison_expression(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.concat_expression()?;
        loop {
            self.cursor.skip_white();
            let op = match self.cursor.look() {
                Some('=') => {
                    self.cursor.advance();
                    Operator::Equal
                }
                Some('>') => {
                    self.cursor.advance();
                    if self.cursor.look() == Some('=') {
                        self.cursor.advance();
                        Operator::GreaterEqual
                    } else {
                        Operator::GreaterThan
                    }
                }
                Some('<') => {
                    self.cursor.advance();
                    match self.cursor.look() {
                        Some('=') => {
                            self.cursor.advance();
                            Operator::LessEqual
                        }
                        Some('>') => {
                            self.cursor.advance();
                            Operator::NotEqual
                        }
                        _ => Operator::LessThan,
                    }
                }
                _ => return Ok(result),
            };
            let other = self.concat_expression()?;
            result = ParseNode::new(Token::Op(op), vec![result, other]);
        }
    }

    fn concat_expression(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.additive_expression()?;
        loop {
            self.cursor.skip_white();
            if self.cursor.look() != Some('&') {
                return Ok(result);
            }
            self.cursor.advance();
            let other = self.additive_expression()?;
            result = ParseNode::new(Token::Op(Operator::Concat), vec![result, other]);
        }
    }

    fn additive_expression(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.term()?;
        loop {
            self.cursor.skip_white();
            let op = match self.cursor.look() {
                Some('+') => Operator::Add,
                Some('-') => Operator::Subtract,
                _ => return Ok(result),
            };
            self.cursor.advance();
            let other = self.term()?;
            result = ParseNode::new(Token::Op(op), vec![result, other]);
        }
    }

    fn term(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.power_factor()?;
        loop {
            self.cursor.skip_white();
            let op = match self.cursor.look() {
                Some('*') => Operator::Multiply,
                Some('/') => Operator::Divide,
                _ => return Ok(result),
            };
            self.cursor.advance();
            let other = self.power_factor()?;
            result = ParseNode::new(Token::Op(op), vec![result, other]);
        }
    }

    fn power_factor(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.percent_factor()?;
        loop {
            self.cursor.skip_white();
            if self.cursor.look() != Some('^') {
                return Ok(result);
            }
            self.cursor.advance();
            let other = self.percent_factor()?;
            result = ParseNode::new(Token::Op(Operator::Power), vec![result, other]);
        }
    }

    fn percent_factor(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.simple_factor()?;
        loop {
            self.cursor.skip_white();
            if self.cursor.look() != Some('%') {
                return Ok(result);
            }
            self.cursor.advance();
            result = ParseNode::new(Token::Op(Operator::Percent), vec![result]);
        }
    }

    fn simple_factor(&mut self) -> ParseResult<ParseNode> {
        self.cursor.skip_white();
        match self.cursor.look() {
            Some('#') => return Ok(ParseNode::leaf(Token::Error(self.parse_error_literal()?))),
            Some('-') => {
                self.cursor.advance();
                return self.parse_unary(false);
            }
            Some('+') => {
                self.cursor.advance();
                return self.parse_unary(true);
            }
            Some('(') => {
                self.cursor.advance();
                let inside = self.union_expression()?;
                self.match_char(')')?;
                return Ok(ParseNode::new(Token::Paren, vec![inside]));
            }
            Some('"') => return Ok(ParseNode::leaf(Token::String(self.parse_string_literal()?))),
            Some('{') => {
                self.cursor.advance();
                let array = self.parse_array()?;
                self.match_char('}')?;
                return Ok(array);
            }
            Some('.') => return Ok(ParseNode::leaf(self.parse_number()?)),
            _ => {}
        }
        match self.cursor.look() {
            Some(c)
                if c.is_alphanumeric() || matches!(c, '\'' | '[' | '_' | '\\' | '$') =>
            {
                self.parse_range_expression()
            }
            _ => Err(self.expected("cell ref or constant literal")),
        }
    }

    /// A sign directly in front of a number literal folds into it
    fn parse_unary(&mut self, is_plus: bool) -> ParseResult<ParseNode> {
        let number_follows = matches!(self.cursor.look(), Some(c) if c.is_ascii_digit() || c == '.');
        let factor = self.simple_factor()?;
        if number_follows {
            let value = match factor.token {
                Token::Number(n) => Some(n),
                Token::Int(n) => Some(n as f64),
                _ => None,
            };
            if let Some(value) = value {
                if is_plus {
                    return Ok(factor);
                }
                return Ok(ParseNode::leaf(Token::Number(-value)));
            }
        }
        let op = if is_plus {
            Operator::UnaryPlus
        } else {
            Operator::UnaryMinus
        };
        Ok(ParseNode::new(Token::Op(op), vec![factor]))
    }

    // === Literals ===

    fn digits(&mut self) -> Option<String> {
        let start = self.cursor.pos;
        while matches!(self.cursor.look(), Some(c) if c.is_ascii_digit()) {
            self.cursor.advance();
        }
        (self.cursor.pos > start).then(|| self.cursor.slice(start, self.cursor.pos))
    }

    /// Integral values in `0..=65535` become `Int`, everything else `Number`
    fn parse_number(&mut self) -> ParseResult<Token> {
        let whole = self.digits();
        let mut fraction = None;
        if self.cursor.look() == Some('.') {
            self.cursor.advance();
            fraction = self.digits();
        }
        let mut exponent = None;
        if matches!(self.cursor.look(), Some('E' | 'e')) {
            self.cursor.advance();
            let mut sign = "";
            match self.cursor.look() {
                Some('+') => self.cursor.advance(),
                Some('-') => {
                    self.cursor.advance();
                    sign = "-";
                }
                _ => {}
            }
            let digits = self.digits().ok_or_else(|| self.expected("Integer"))?;
            exponent = Some(format!("{sign}{digits}"));
        }
        if whole.is_none() && fraction.is_none() {
            return Err(self.expected("Integer"));
        }

        let mut text = whole.unwrap_or_else(|| "0".to_string());
        if let Some(fraction) = fraction {
            text.push('.');
            text.push_str(&fraction);
        }
        if let Some(exponent) = exponent {
            text.push('e');
            text.push_str(&exponent);
        }
        let value: f64 = text
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| self.error(format!("Invalid number '{text}'")))?;
        if value.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&value) {
            Ok(Token::Int(value as u16))
        } else {
            Ok(Token::Number(value))
        }
    }

    fn parse_string_literal(&mut self) -> ParseResult<String> {
        self.match_char('"')?;
        let mut out = String::new();
        loop {
            match self.cursor.look() {
                None => return Err(self.error("Unterminated string literal")),
                Some('"') => {
                    self.cursor.advance();
                    if self.cursor.look() != Some('"') {
                        break;
                    }
                    out.push('"');
                    self.cursor.advance();
                }
                Some(c) => {
                    out.push(c);
                    self.cursor.advance();
                }
            }
        }
        if out.chars().count() > 255 {
            return Err(self.error(
                "String literals in formulas can't be bigger than 255 characters",
            ));
        }
        Ok(out)
    }

    fn parse_error_literal(&mut self) -> ParseResult<CellError> {
        let rest = self.cursor.rest();
        for &err in CellError::literals() {
            let literal = err.as_str();
            if rest
                .get(..literal.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(literal))
            {
                self.cursor.advance_by(literal.chars().count());
                return Ok(err);
            }
        }
        Err(self.expected("#VALUE!, #REF!, #DIV/0!, #NAME?, #NUM!, #NULL! or #N/A"))
    }

    fn parse_unquoted_identifier(&mut self) -> Option<String> {
        let start = self.cursor.pos;
        while matches!(self.cursor.look(), Some(c) if c.is_alphanumeric() || c == '.') {
            self.cursor.advance();
        }
        (self.cursor.pos > start).then(|| self.cursor.slice(start, self.cursor.pos))
    }

    fn parse_array(&mut self) -> ParseResult<ParseNode> {
        let mut rows = Vec::new();
        loop {
            rows.push(self.parse_array_row()?);
            match self.cursor.look() {
                Some('}') => break,
                Some(';') => self.cursor.advance(),
                _ => return Err(self.expected("'}' or ';'")),
            }
        }
        let width = rows[0].len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(self.error(format!(
                    "Array row {} has length {} but row 0 has length {}",
                    i,
                    row.len(),
                    width
                )));
            }
        }
        Ok(ParseNode::leaf(Token::Array {
            rows,
            class: OperandClass::Array,
        }))
    }

    fn parse_array_row(&mut self) -> ParseResult<Vec<CellValue>> {
        let mut row = Vec::new();
        loop {
            row.push(self.parse_array_item()?);
            self.cursor.skip_white();
            match self.cursor.look() {
                Some('}' | ';') => return Ok(row),
                Some(',') => self.cursor.advance(),
                _ => return Err(self.expected("'}' or ','")),
            }
        }
    }

    fn parse_array_item(&mut self) -> ParseResult<CellValue> {
        self.cursor.skip_white();
        match self.cursor.look() {
            Some('"') => Ok(CellValue::string(self.parse_string_literal()?)),
            Some('#') => Ok(CellValue::Error(self.parse_error_literal()?)),
            Some('T' | 't' | 'F' | 'f') => {
                let ident = self.parse_unquoted_identifier().unwrap_or_default();
                if ident.eq_ignore_ascii_case("TRUE") {
                    Ok(CellValue::Boolean(true))
                } else if ident.eq_ignore_ascii_case("FALSE") {
                    Ok(CellValue::Boolean(false))
                } else {
                    Err(self.expected("'TRUE' or 'FALSE'"))
                }
            }
            Some('-') => {
                self.cursor.advance();
                self.cursor.skip_white();
                Ok(CellValue::Number(-self.array_number()?))
            }
            _ => Ok(CellValue::Number(self.array_number()?)),
        }
    }

    fn array_number(&mut self) -> ParseResult<f64> {
        Ok(match self.parse_number()? {
            Token::Int(n) => n as f64,
            Token::Number(n) => n,
            other => return Err(self.error(format!("Unexpected array item {other:?}"))),
        })
    }

    // === References ===

    fn parse_range_expression(&mut self) -> ParseResult<ParseNode> {
        let mut result = self.parse_rangeable()?;
        let mut has_range = false;
        while self.cursor.look() == Some(':') {
            let pos = self.cursor.pos + 1;
            self.cursor.advance();
            let next = self.parse_rangeable()?;
            self.check_valid_operand("range operator ':'", "LHS", pos, &result)?;
            self.check_valid_operand("range operator ':'", "RHS", pos, &next)?;
            result = ParseNode::new(Token::Op(Operator::Range), vec![result, next]);
            has_range = true;
        }
        Ok(if has_range {
            augment_with_mem(result)
        } else {
            result
        })
    }

    fn check_valid_operand(
        &self,
        operator: &str,
        side: &str,
        pos: usize,
        node: &ParseNode,
    ) -> ParseResult<()> {
        if is_valid_range_operand(node) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!(
                    "The {side} of the {operator} at position {pos} is not a proper reference."
                ),
                pos,
            ))
        }
    }

    /// A cell, area, sheet-qualified reference, name, function call or
    /// literal that may take part in a `:` range
    fn parse_rangeable(&mut self) -> ParseResult<ParseNode> {
        self.cursor.skip_white();
        let mut save = self.cursor.pos;
        let sheet = self.parse_sheet_name();
        if sheet.is_none() {
            self.cursor.reset(save);
        } else {
            self.cursor.skip_white();
            save = self.cursor.pos;
        }

        let Some(part1) = self.parse_simple_range_part() else {
            if let Some(sheet) = sheet {
                if self.cursor.look() == Some('#') {
                    let err = self.parse_error_literal()?;
                    return self.sheet_error_node(&sheet, err);
                }
                let name = self.parse_as_name()?;
                if name.is_empty() {
                    return Err(self.error(format!(
                        "Cell reference or Named Range expected after sheet name at index {}.",
                        self.cursor.pos
                    )));
                }
                return self.sheet_name_node(&sheet, &name);
            }
            return self.parse_non_range(save);
        };

        let white_after_part1 = is_white(self.cursor.look());
        if white_after_part1 {
            self.cursor.skip_white();
        }

        match self.cursor.look() {
            Some(':') => {
                let colon = self.cursor.pos;
                self.cursor.advance();
                self.cursor.skip_white();
                let part2 = self
                    .parse_simple_range_part()
                    .filter(|p2| part1.is_compatible_for_area(p2));
                if part2.is_none() {
                    // e.g. A1:OFFSET(B2,1,2); the caller applies an explicit range operator
                    self.cursor.reset(colon);
                    if !part1.is_cell() {
                        let prefix = sheet
                            .as_ref()
                            .map(|s| format!("'{}!", s.first.name))
                            .unwrap_or_default();
                        return Err(self.error(format!(
                            "{prefix}{}' is not a proper reference.",
                            part1.rep
                        )));
                    }
                }
                self.create_area_ref_node(sheet.as_ref(), &part1, part2.as_ref())
            }
            Some('.') => {
                self.cursor.advance();
                let mut dots = 1;
                while self.cursor.look() == Some('.') {
                    dots += 1;
                    self.cursor.advance();
                }
                let white_before_part2 = is_white(self.cursor.look());
                self.cursor.skip_white();
                let part2 = self.parse_simple_range_part();
                let text = self.cursor.slice(save, self.cursor.pos);
                let Some(part2) = part2 else {
                    if sheet.is_some() {
                        return Err(self.error(format!(
                            "Complete area reference expected after sheet name at index {}.",
                            self.cursor.pos
                        )));
                    }
                    return self.parse_non_range(save);
                };
                if white_after_part1 || white_before_part2 {
                    return Err(self.error(format!(
                        "Dotted range expression '{text}' must not contain whitespace."
                    )));
                }
                if dots == 1 && part1.is_row() && part2.is_row() {
                    // A decimal number such as 1.5
                    return self.parse_non_range(save);
                }
                if (part1.is_row_or_column() || part2.is_row_or_column()) && dots != 2 {
                    return Err(self.error(format!(
                        "Dotted range (full row or column) expression '{text}' must have exactly 2 dots."
                    )));
                }
                self.create_area_ref_node(sheet.as_ref(), &part1, Some(&part2))
            }
            _ if part1.is_cell() => self.create_area_ref_node(sheet.as_ref(), &part1, None),
            _ => {
                if sheet.is_some() {
                    return Err(self.error(format!(
                        "Second part of cell reference expected after sheet name at index {}.",
                        self.cursor.pos
                    )));
                }
                self.parse_non_range(save)
            }
        }
    }

    /// Scan a `$?letters$?digits` run at the cursor. The cursor only moves
    /// when the run is a reference that fits in the grid.
    fn parse_simple_range_part(&mut self) -> Option<SimpleRangePart> {
        let start = self.cursor.pos;
        let mut end = start;
        let (mut has_letters, mut has_digits) = (false, false);
        while let Some(c) = self.cursor.char_at(end) {
            if c.is_ascii_digit() {
                has_digits = true;
            } else if c.is_alphabetic() {
                has_letters = true;
            } else if c != '$' && c != '_' {
                break;
            }
            end += 1;
        }
        if end == start {
            return None;
        }
        let rep = self.cursor.slice(start, end);
        let parts = split_rep(&rep)?;
        let col = if parts.letters.is_empty() {
            None
        } else {
            Some((column_index(parts.letters, self.version)?, parts.col_abs))
        };
        let row = if parts.digits.is_empty() {
            None
        } else {
            Some((row_index(parts.digits, self.version)?, parts.row_abs))
        };
        let kind = match (has_letters, has_digits) {
            (true, true) => {
                if self.is_function_call(&rep, end) {
                    return None;
                }
                PartKind::Cell
            }
            (true, false) => PartKind::Column,
            (false, true) => PartKind::Row,
            (false, false) => return None,
        };
        self.cursor.reset(end);
        Some(SimpleRangePart {
            rep,
            kind,
            col,
            row,
        })
    }

    /// A cell-shaped name such as `LOG10` is a call when `(` follows
    fn is_function_call(&self, rep: &str, end: usize) -> bool {
        if self.registry.get(rep).is_none() && self.registry.udf(rep).is_none() {
            return false;
        }
        let mut pos = end;
        while is_white(self.cursor.char_at(pos)) {
            pos += 1;
        }
        self.cursor.char_at(pos) == Some('(')
    }

    fn create_area_ref_node(
        &self,
        sheet: Option<&SheetIdentifier>,
        part1: &SimpleRangePart,
        part2: Option<&SimpleRangePart>,
    ) -> ParseResult<ParseNode> {
        let class = OperandClass::Reference;
        let token = match part2 {
            None => {
                let addr = part1
                    .cell_address()
                    .ok_or_else(|| self.error(format!("'{}' is not a cell reference", part1.rep)))?;
                match sheet {
                    None => Token::Ref { addr, class },
                    Some(s) => Token::Ref3d {
                        sheet: self.resolve_sheet(s)?,
                        addr,
                        class,
                    },
                }
            }
            Some(part2) => {
                let area = self.create_area_ref(part1, part2)?;
                match sheet {
                    None => Token::Area { area, class },
                    Some(s) => Token::Area3d {
                        sheet: self.resolve_sheet(s)?,
                        area,
                        class,
                    },
                }
            }
        };
        Ok(ParseNode::leaf(token))
    }

    fn create_area_ref(
        &self,
        part1: &SimpleRangePart,
        part2: &SimpleRangePart,
    ) -> ParseResult<AreaRef> {
        let incompatible = || {
            self.error(format!(
                "has incompatible parts: '{}' and '{}'.",
                part1.rep, part2.rep
            ))
        };
        if !part1.is_compatible_for_area(part2) {
            return Err(incompatible());
        }
        let (first, last) = match part1.kind {
            PartKind::Row => {
                let ((r1, a1), (r2, a2)) = (
                    part1.row.ok_or_else(incompatible)?,
                    part2.row.ok_or_else(incompatible)?,
                );
                let last_col = self.version.last_column_index();
                (
                    CellAddress::with_absolute(r1, 0, a1, true),
                    CellAddress::with_absolute(r2, last_col, a2, true),
                )
            }
            PartKind::Column => {
                let ((c1, a1), (c2, a2)) = (
                    part1.col.ok_or_else(incompatible)?,
                    part2.col.ok_or_else(incompatible)?,
                );
                let last_row = self.version.last_row_index();
                (
                    CellAddress::with_absolute(0, c1, true, a1),
                    CellAddress::with_absolute(last_row, c2, true, a2),
                )
            }
            PartKind::Cell => (
                part1.cell_address().ok_or_else(incompatible)?,
                part2.cell_address().ok_or_else(incompatible)?,
            ),
        };
        Ok(AreaRef::new(first, last))
    }

    // === Sheet qualifiers ===

    /// Read a sheet qualifier up to and including `!`. Returns `None`
    /// (leaving the cursor wherever it stopped) when there is none.
    fn parse_sheet_name(&mut self) -> Option<SheetIdentifier> {
        let mut book = None;
        if self.cursor.look() == Some('[') {
            book = Some(self.parse_book_name()?);
        }
        let first = match self.cursor.look()? {
            '\'' => {
                self.cursor.advance();
                if self.cursor.look() == Some('[') {
                    book = Some(self.parse_book_name()?);
                }
                let mut name = String::new();
                loop {
                    match self.cursor.look()? {
                        '\'' => {
                            self.cursor.advance();
                            if self.cursor.look() != Some('\'') {
                                break;
                            }
                            name.push('\'');
                            self.cursor.advance();
                        }
                        c => {
                            name.push(c);
                            self.cursor.advance();
                        }
                    }
                }
                NameIdentifier { name, quoted: true }
            }
            c if c == '_' || c.is_alphabetic() => {
                let mut name = String::new();
                while let Some(c) = self.cursor.look().filter(|&c| is_unquoted_sheet_name_char(c)) {
                    name.push(c);
                    self.cursor.advance();
                }
                NameIdentifier {
                    name,
                    quoted: false,
                }
            }
            _ => return None,
        };
        self.cursor.skip_white();
        match self.cursor.look()? {
            '!' => {
                self.cursor.advance();
                Some(SheetIdentifier {
                    book,
                    first,
                    last: None,
                })
            }
            ':' => {
                self.cursor.advance();
                let second = self.parse_sheet_name()?;
                Some(SheetIdentifier {
                    book,
                    first,
                    last: Some(second.first),
                })
            }
            _ => None,
        }
    }

    fn parse_book_name(&mut self) -> Option<String> {
        self.cursor.advance();
        let mut name = String::new();
        loop {
            match self.cursor.look()? {
                ']' => break,
                c => {
                    name.push(c);
                    self.cursor.advance();
                }
            }
        }
        self.cursor.advance();
        Some(name)
    }

    fn resolve_sheet(&self, iden: &SheetIdentifier) -> ParseResult<ExternSheet> {
        let (link, first, last) = match &iden.book {
            None => {
                let first = self.book.find_sheet(&iden.first.name);
                match (&iden.last, first) {
                    (Some(last), _) => {
                        let first = first.ok_or_else(|| self.unknown_sheet(&iden.first.name))?;
                        let last = self
                            .book
                            .find_sheet(&last.name)
                            .ok_or_else(|| self.unknown_sheet(&last.name))?;
                        (None, first, last)
                    }
                    (None, Some(first)) => (None, first, first),
                    // 'Sheet1:Sheet3'! quotes the whole sheet range
                    (None, None) if iden.first.quoted && iden.first.name.contains(':') => {
                        let (a, b) = iden.first.name.split_once(':').unwrap_or_default();
                        let first = self.book.find_sheet(a).ok_or_else(|| self.unknown_sheet(a))?;
                        let last = self.book.find_sheet(b).ok_or_else(|| self.unknown_sheet(b))?;
                        (None, first, last)
                    }
                    (None, None) => return Err(self.unknown_sheet(&iden.first.name)),
                }
            }
            Some(book) => {
                let link = self.book.find_external_link(book).ok_or_else(|| {
                    self.error(format!("Unknown external workbook '{book}'"))
                })?;
                let lookup = |name: &str| {
                    self.book.find_external_sheet(link, name).ok_or_else(|| {
                        self.error(format!(
                            "Sheet '{name}' is not recorded for external workbook '{book}'"
                        ))
                    })
                };
                let first = lookup(&iden.first.name)?;
                let last = match &iden.last {
                    Some(last) => lookup(&last.name)?,
                    None => first,
                };
                (Some(link), first as usize, last as usize)
            }
        };
        Ok(ExternSheet {
            link,
            first: first.min(last) as u16,
            last: first.max(last) as u16,
        })
    }

    fn unknown_sheet(&self, name: &str) -> ParseError {
        self.error(format!("Unknown sheet '{name}'"))
    }

    /// `Sheet1!#REF!` is a deleted reference on that sheet
    fn sheet_error_node(&self, sheet: &SheetIdentifier, err: CellError) -> ParseResult<ParseNode> {
        if err != CellError::Ref {
            return Ok(ParseNode::leaf(Token::Error(err)));
        }
        Ok(ParseNode::leaf(Token::DeletedRef3d {
            sheet: self.resolve_sheet(sheet)?,
            class: OperandClass::Reference,
        }))
    }

    /// A sheet-scoped defined name such as `Sheet1!Rate`
    fn sheet_name_node(&self, sheet: &SheetIdentifier, name: &str) -> ParseResult<ParseNode> {
        let extern_sheet = self.resolve_sheet(sheet)?;
        let index = match extern_sheet.link {
            None => self.book.find_defined_name(name, extern_sheet.first as usize),
            Some(_) => None,
        };
        match index {
            Some(index) => Ok(ParseNode::leaf(Token::Name {
                index,
                class: OperandClass::Reference,
            })),
            None => Err(self.error(format!(
                "Specified name '{name}' for sheet {} not found",
                sheet.first.name
            ))),
        }
    }

    // === Names and functions ===

    fn parse_as_name(&mut self) -> ParseResult<String> {
        match self.cursor.look() {
            Some(c) if c.is_alphabetic() || c == '_' || c == '\\' => {}
            _ => return Err(self.expected("number, string, defined name, or data table")),
        }
        let start = self.cursor.pos;
        while matches!(self.cursor.look(), Some(c) if is_valid_defined_name_char(c)) {
            self.cursor.advance();
        }
        let name = self.cursor.slice(start, self.cursor.pos);
        self.cursor.skip_white();
        Ok(name)
    }

    fn parse_non_range(&mut self, save: usize) -> ParseResult<ParseNode> {
        self.cursor.reset(save);
        match self.cursor.look() {
            Some(c) if c.is_ascii_digit() => return Ok(ParseNode::leaf(self.parse_number()?)),
            Some('"') => return Ok(ParseNode::leaf(Token::String(self.parse_string_literal()?))),
            _ => {}
        }
        let name = self.parse_as_name()?;
        if self.cursor.look() == Some('(') {
            return self.function(&name);
        }
        if name.eq_ignore_ascii_case("TRUE") {
            return Ok(ParseNode::leaf(Token::Bool(true)));
        }
        if name.eq_ignore_ascii_case("FALSE") {
            return Ok(ParseNode::leaf(Token::Bool(false)));
        }
        match self.book.find_defined_name(&name, self.sheet) {
            Some(index) => Ok(ParseNode::leaf(Token::Name {
                index,
                class: OperandClass::Reference,
            })),
            None => Err(self.error(format!(
                "Specified named range '{name}' does not exist in the current workbook."
            ))),
        }
    }

    fn function(&mut self, name: &str) -> ParseResult<ParseNode> {
        let mut name_token = None;
        if self.registry.get(name).is_none() {
            name_token = Some(if let Some(index) = self.book.find_defined_name(name, self.sheet) {
                Token::Name {
                    index,
                    class: OperandClass::Reference,
                }
            } else if self.registry.udf(name).is_some() {
                Token::NameX {
                    name: name.to_uppercase(),
                    class: OperandClass::Reference,
                }
            } else {
                return Err(self.error(format!(
                    "Name '{name}' is completely unknown in the current workbook"
                )));
            });
        }
        self.match_char('(')?;
        let args = self.arguments()?;
        self.match_char(')')?;
        self.get_function(name, name_token, args)
    }

    fn arguments(&mut self) -> ParseResult<Vec<ParseNode>> {
        let mut args = Vec::new();
        self.cursor.skip_white();
        if self.cursor.look() == Some(')') {
            return Ok(args);
        }
        let mut missed_prev_arg = true;
        loop {
            self.cursor.skip_white();
            if matches!(self.cursor.look(), Some(',' | ')')) {
                if missed_prev_arg {
                    args.push(ParseNode::leaf(Token::MissingArg));
                }
                if self.cursor.look() == Some(')') {
                    return Ok(args);
                }
                self.cursor.advance();
                missed_prev_arg = true;
                continue;
            }
            args.push(self.intersection_expression()?);
            missed_prev_arg = false;
            self.cursor.skip_white();
            if !matches!(self.cursor.look(), Some(',' | ')')) {
                return Err(self.expected("',' or ')'"));
            }
        }
    }

    fn get_function(
        &self,
        name: &str,
        name_token: Option<Token>,
        args: Vec<ParseNode>,
    ) -> ParseResult<ParseNode> {
        let Some(def) = self.registry.get(name) else {
            // External function: the name goes first, the call pops it too
            let argc = args.len() + 1;
            if argc > self.version.max_function_args() {
                return Err(self.error(format!(
                    "Too many arguments to function '{name}'. At most {} were expected but got {}.",
                    self.version.max_function_args() - 1,
                    args.len()
                )));
            }
            let mut children = Vec::with_capacity(argc);
            if let Some(token) = name_token {
                children.push(ParseNode::leaf(token));
            }
            children.extend(args);
            return Ok(ParseNode::new(
                Token::FuncVar {
                    index: FUNCTION_INDEX_EXTERNAL,
                    argc: argc as u8,
                    class: OperandClass::Value,
                },
                children,
            ));
        };

        if def.index == FUNCTION_INDEX_SUM && args.len() == 1 {
            return Ok(ParseNode::new(Token::Attr(Attr::Sum), args));
        }
        self.validate_num_args(args.len(), def.name, def.min_args, def.max_args)?;
        let token = if def.is_fixed_arity() {
            Token::Func {
                index: def.index,
                class: def.return_class,
            }
        } else {
            Token::FuncVar {
                index: def.index,
                argc: args.len() as u8,
                class: def.return_class,
            }
        };
        Ok(ParseNode::new(token, args))
    }

    fn validate_num_args(
        &self,
        n: usize,
        name: &str,
        min: usize,
        max: Option<usize>,
    ) -> ParseResult<()> {
        let fixed = max == Some(min);
        if n < min {
            let expected = if fixed {
                format!("Expected {min}")
            } else {
                format!("At least {min} were expected")
            };
            return Err(self.error(format!(
                "Too few arguments to function '{name}'. {expected} but got {n}."
            )));
        }
        let max = max.unwrap_or_else(|| self.version.max_function_args());
        if n > max {
            let expected = if fixed {
                format!("Expected {max}")
            } else {
                format!("At most {max} were expected")
            };
            return Err(self.error(format!(
                "Too many arguments to function '{name}'. {expected} but got {n}."
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormulaError;
    use crate::value::{OperationContext, ValueEval};
    use duke_calc_core::{ExternalLink, Workbook};
    use pretty_assertions::assert_eq;

    fn double_it(
        args: &[ValueEval],
        _ctx: &mut OperationContext<'_>,
    ) -> FormulaResult<ValueEval> {
        Ok(args.first().cloned().unwrap_or(ValueEval::Blank))
    }

    fn book() -> Workbook {
        let mut wb = Workbook::new();
        wb.add_worksheet_with_name("Sheet2").unwrap();
        wb.add_worksheet_with_name("Sheet3").unwrap();
        wb.add_worksheet_with_name("My Sheet").unwrap();
        wb.define_name("Rate", "Sheet1!$B$1").unwrap();
        let mut link = ExternalLink::new("Book2.xlsx");
        link.sheets.push("Data".to_string());
        wb.add_external_link(link).unwrap();
        wb
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register_udf("MYFUNC", double_it);
        registry
    }

    fn tokens(formula: &str) -> Vec<Token> {
        parse(formula, &book(), FormulaKind::Cell, 0, &registry()).unwrap()
    }

    fn parse_err(formula: &str) -> String {
        match parse(formula, &book(), FormulaKind::Cell, 0, &registry()) {
            Err(FormulaError::Parse(e)) => e.message,
            other => panic!("expected a parse error for {formula}, got {other:?}"),
        }
    }

    fn addr(row: u32, col: u16) -> CellAddress {
        CellAddress::new(row, col)
    }

    #[test]
    fn test_cursor_tracks_spaces() {
        let mut cursor = Cursor::new("A1  B1");
        cursor.advance_by(2);
        assert!(!cursor.after_space());
        cursor.skip_white();
        assert!(cursor.after_space());
        assert_eq!(cursor.rest(), "B1");
    }

    #[test]
    fn test_split_rep() {
        let parts = split_rep("$AB$12").unwrap();
        assert!(parts.col_abs && parts.row_abs);
        assert_eq!((parts.letters, parts.digits), ("AB", "12"));
        assert!(split_rep("1A").is_none());
        assert!(split_rep("$").is_none());
        assert_eq!(column_index("XFD", SpreadsheetVersion::Excel2007), Some(16_383));
        assert_eq!(column_index("XFE", SpreadsheetVersion::Excel2007), None);
        assert_eq!(column_index("IV", SpreadsheetVersion::Excel97), Some(255));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            tokens("1+2*3"),
            vec![
                Token::Int(1),
                Token::Int(2),
                Token::Int(3),
                Token::Op(Operator::Multiply),
                Token::Op(Operator::Add),
            ]
        );
        // The sign folds into the literal and binds tighter than ^
        assert_eq!(
            tokens("-2^2"),
            vec![Token::Number(-2.0), Token::Int(2), Token::Op(Operator::Power)]
        );
        assert_eq!(
            tokens("-A1"),
            vec![
                Token::Ref {
                    addr: addr(0, 0),
                    class: OperandClass::Value
                },
                Token::Op(Operator::UnaryMinus),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens("65535"), vec![Token::Int(65535)]);
        assert_eq!(tokens("65536"), vec![Token::Number(65536.0)]);
        assert_eq!(tokens("1.5"), vec![Token::Number(1.5)]);
        assert_eq!(tokens(".5"), vec![Token::Number(0.5)]);
        assert_eq!(tokens("1E3"), vec![Token::Int(1000)]);
        assert_eq!(tokens("2.5e-1"), vec![Token::Number(0.25)]);
    }

    #[test]
    fn test_references() {
        assert_eq!(
            tokens("$B$2"),
            vec![Token::Ref {
                addr: CellAddress::absolute(1, 1),
                class: OperandClass::Value
            }]
        );
        let whole_column = tokens("SUM(A:B)");
        assert_eq!(
            whole_column[0],
            Token::Area {
                area: AreaRef::new(
                    CellAddress::with_absolute(0, 0, true, false),
                    CellAddress::with_absolute(1_048_575, 1, true, false)
                ),
                class: OperandClass::Reference
            }
        );
        assert_eq!(whole_column[1], Token::Attr(Attr::Sum));
        // dotted form of a whole row range
        let rows = tokens("SUM(2..3)");
        assert_eq!(
            rows[0],
            Token::Area {
                area: AreaRef::new(
                    CellAddress::with_absolute(1, 0, false, true),
                    CellAddress::with_absolute(2, 16_383, false, true)
                ),
                class: OperandClass::Reference
            }
        );
    }

    #[test]
    fn test_sheet_qualified_references() {
        assert_eq!(
            tokens("Sheet2!A1"),
            vec![Token::Ref3d {
                sheet: ExternSheet::local(1),
                addr: addr(0, 0),
                class: OperandClass::Value
            }]
        );
        assert_eq!(
            tokens("'My Sheet'!A1"),
            vec![Token::Ref3d {
                sheet: ExternSheet::local(3),
                addr: addr(0, 0),
                class: OperandClass::Value
            }]
        );
        let range = tokens("SUM(Sheet1:Sheet3!A1)");
        assert_eq!(
            range[0],
            Token::Ref3d {
                sheet: ExternSheet {
                    link: None,
                    first: 0,
                    last: 2
                },
                addr: addr(0, 0),
                class: OperandClass::Reference
            }
        );
        assert_eq!(
            tokens("[Book2.xlsx]Data!B2"),
            vec![Token::Ref3d {
                sheet: ExternSheet {
                    link: Some(0),
                    first: 0,
                    last: 0
                },
                addr: addr(1, 1),
                class: OperandClass::Value
            }]
        );
        assert!(parse_err("Nope!A1").contains("Unknown sheet 'Nope'"));
        assert_eq!(
            tokens("Sheet2!#REF!"),
            vec![Token::DeletedRef3d {
                sheet: ExternSheet::local(1),
                class: OperandClass::Value
            }]
        );
    }

    #[test]
    fn test_sheet_named_like_a_cell() {
        let mut wb = Workbook::new();
        wb.add_worksheet_with_name("A1").unwrap();
        let registry = FunctionRegistry::new();
        let parsed = parse("A1!B2+A1", &wb, FormulaKind::Cell, 0, &registry).unwrap();
        assert_eq!(
            parsed,
            vec![
                Token::Ref3d {
                    sheet: ExternSheet::local(1),
                    addr: addr(1, 1),
                    class: OperandClass::Value
                },
                Token::Ref {
                    addr: addr(0, 0),
                    class: OperandClass::Value
                },
                Token::Op(Operator::Add),
            ]
        );
    }

    #[test]
    fn test_range_operator_with_function() {
        let parsed = tokens("SUM(A1:INDEX(B1:B5,2))");
        assert!(matches!(parsed[0], Token::MemFunc { .. }));
        assert_eq!(
            parsed[parsed.len() - 2],
            Token::Op(Operator::Range)
        );
        assert!(parse_err("SUM(A1:1+2)").contains("is not a proper reference"));
    }

    #[test]
    fn test_union_and_intersection() {
        let union = tokens("SUM((A1,B2))");
        assert!(matches!(union[0], Token::MemArea { .. }));
        assert!(union.contains(&Token::Op(Operator::Union)));
        let isect = tokens("SUM(A1:C3 B2:D4)");
        assert!(isect.contains(&Token::Op(Operator::Intersection)));
        // trailing space is not an intersection
        assert_eq!(tokens("A1 ").len(), 1);
        assert!(parse_err("1 2").contains("LHS of the intersection operator"));
        assert!(parse_err("A1:B2 (1+2)").contains("RHS of the intersection operator"));
    }

    #[test]
    fn test_functions_and_arguments() {
        let parsed = tokens("IF(A1,,3)");
        assert!(parsed.contains(&Token::MissingArg));
        assert!(parse_err("ABS()").contains("Too few arguments to function 'ABS'. Expected 1 but got 0."));
        assert!(parse_err("ABS(1,2)").contains("Too many arguments to function 'ABS'. Expected 1 but got 2."));
        assert!(parse_err("AND()").contains("At least 1 were expected"));
        assert!(parse_err("NOSUCH(1)").contains("completely unknown"));
        assert_eq!(
            tokens("MYFUNC(1)"),
            vec![
                Token::NameX {
                    name: "MYFUNC".into(),
                    class: OperandClass::Reference
                },
                Token::Int(1),
                Token::FuncVar {
                    index: FUNCTION_INDEX_EXTERNAL,
                    argc: 2,
                    class: OperandClass::Value
                },
            ]
        );
    }

    #[test]
    fn test_defined_names() {
        assert_eq!(
            tokens("Rate*2")[0],
            Token::Name {
                index: 0,
                class: OperandClass::Value
            }
        );
        assert!(parse_err("Missing+1").contains("does not exist"));
    }

    #[test]
    fn test_literals() {
        assert_eq!(tokens("\"a\"\"b\""), vec![Token::String("a\"b".into())]);
        assert_eq!(tokens("true"), vec![Token::Bool(true)]);
        assert_eq!(tokens("#div/0!"), vec![Token::Error(CellError::Div0)]);
        assert_eq!(tokens("#N/A"), vec![Token::Error(CellError::Na)]);
        assert!(parse_err("\"open").contains("Unterminated"));
    }

    #[test]
    fn test_array_constants() {
        assert_eq!(
            tokens("{1,-2;\"x\",TRUE}"),
            vec![Token::Array {
                rows: vec![
                    vec![CellValue::Number(1.0), CellValue::Number(-2.0)],
                    vec![CellValue::string("x"), CellValue::Boolean(true)],
                ],
                class: OperandClass::Value
            }]
        );
        assert!(parse_err("{1,2;3}").contains("Array row 1 has length 1 but row 0 has length 2"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse_err("=1").contains("must not start with '='"));
        assert!(parse_err("1+").contains("Expected cell ref or constant literal"));
        assert!(parse_err("(1").contains("Expected ')'"));
        assert!(parse_err("1)").contains("Unused input [)]"));
        assert!(parse_err("SUM(A.B)").contains("exactly 2 dots"));
        assert!(parse_err("SUM(A1 ..B2)").contains("must not contain whitespace"));
    }

    #[test]
    fn test_if_is_laid_out_with_jumps() {
        let parsed = tokens("IF(A1>0,\"pos\",\"nonpos\")");
        assert!(matches!(parsed[3], Token::Attr(Attr::If { .. })));
        assert!(matches!(parsed.last(), Some(Token::FuncVar { index: 1, argc: 3, .. })));
    }
}
