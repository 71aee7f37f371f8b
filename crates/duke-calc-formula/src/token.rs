//! Formula tokens
//!
//! A parsed formula is a flat array of tokens in reverse Polish order. Each
//! token knows its encoded size in bytes; the `If`/`Skip`/`Choose` attribute
//! tokens store jump distances in those units, so sizes must match the
//! binary record layout even though the binary form itself is never written.

use duke_calc_core::{CellAddress, CellError, CellValue};

use crate::version::SpreadsheetVersion;

/// How a token's runtime result is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandClass {
    /// A cell or area reference, dereferenced lazily
    Reference,
    /// A single value, obtained by implicit intersection
    Value,
    /// An array of values
    Array,
}

/// Sheet qualifier of a 3D reference
///
/// With `link` unset, `first..=last` are indices of sheets in the formula's
/// own workbook. With `link` set, it indexes the workbook's external links and
/// `first..=last` index the sheet names recorded for that link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternSheet {
    pub link: Option<u16>,
    pub first: u16,
    pub last: u16,
}

impl ExternSheet {
    /// A single local sheet
    pub fn local(sheet: u16) -> Self {
        Self {
            link: None,
            first: sheet,
            last: sheet,
        }
    }

    /// Whether this names exactly the given local sheet
    pub fn is_local_sheet(&self, sheet: usize) -> bool {
        self.link.is_none() && self.first as usize == sheet && self.last as usize == sheet
    }
}

/// Two corners of a rectangular reference, top-left first
///
/// Each corner keeps its own absolute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaRef {
    pub first: CellAddress,
    pub last: CellAddress,
}

impl AreaRef {
    /// Build an area from two corners in any order. Coordinates are swapped
    /// so `first` is top-left; each flag travels with its coordinate.
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        let mut first = a;
        let mut last = b;
        if first.row > last.row {
            std::mem::swap(&mut first.row, &mut last.row);
            std::mem::swap(&mut first.row_absolute, &mut last.row_absolute);
        }
        if first.col > last.col {
            std::mem::swap(&mut first.col, &mut last.col);
            std::mem::swap(&mut first.col_absolute, &mut last.col_absolute);
        }
        Self { first, last }
    }

    /// Restore top-left/bottom-right order after row edits
    pub fn normalized(self) -> Self {
        Self::new(self.first, self.last)
    }

    pub fn is_whole_column(&self, version: SpreadsheetVersion) -> bool {
        self.first.row == 0
            && self.last.row == version.last_row_index()
            && self.first.row_absolute
            && self.last.row_absolute
    }

    pub fn is_whole_row(&self, version: SpreadsheetVersion) -> bool {
        self.first.col == 0
            && self.last.col == version.last_column_index()
            && self.first.col_absolute
            && self.last.col_absolute
    }

    pub fn height(&self) -> u32 {
        self.last.row - self.first.row + 1
    }

    pub fn width(&self) -> u16 {
        self.last.col - self.first.col + 1
    }
}

/// Binary and unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Concat,
    LessThan,
    LessEqual,
    Equal,
    GreaterEqual,
    GreaterThan,
    NotEqual,
    /// Space between two references
    Intersection,
    /// Comma between two references
    Union,
    /// `:` between two reference expressions
    Range,
    UnaryPlus,
    UnaryMinus,
    Percent,
}

impl Operator {
    pub fn operand_count(self) -> usize {
        match self {
            Operator::UnaryPlus | Operator::UnaryMinus | Operator::Percent => 1,
            _ => 2,
        }
    }

    /// Text between (or around) the operands
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add | Operator::UnaryPlus => "+",
            Operator::Subtract | Operator::UnaryMinus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Power => "^",
            Operator::Concat => "&",
            Operator::LessThan => "<",
            Operator::LessEqual => "<=",
            Operator::Equal => "=",
            Operator::GreaterEqual => ">=",
            Operator::GreaterThan => ">",
            Operator::NotEqual => "<>",
            Operator::Intersection => " ",
            Operator::Union => ",",
            Operator::Range => ":",
            Operator::Percent => "%",
        }
    }

    /// Operators that turn their operands into plain values
    pub fn is_value_operator(self) -> bool {
        !matches!(
            self,
            Operator::Intersection | Operator::Union | Operator::Range
        )
    }
}

/// Control-flow and formatting attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attr {
    /// Pops the condition; when false, skips `distance` bytes to the else branch
    If { distance: u16 },
    /// Unconditional jump of `distance + 1` bytes
    Skip { distance: u16 },
    /// Pops the selector and jumps by the matching table entry. Entries and
    /// `func_offset` count from the start of the jump table.
    Choose {
        jump_table: Vec<u16>,
        func_offset: u16,
    },
    /// `SUM` with exactly one argument
    Sum,
}

impl Attr {
    pub fn size(&self) -> usize {
        match self {
            Attr::Choose { jump_table, .. } => 4 + 2 * (jump_table.len() + 1),
            _ => 4,
        }
    }
}

/// A formula token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer literal in `0..=65535`
    Int(u16),
    Number(f64),
    String(String),
    Bool(bool),
    Error(CellError),
    /// Omitted function argument
    MissingArg,

    Ref {
        addr: CellAddress,
        class: OperandClass,
    },
    Area {
        area: AreaRef,
        class: OperandClass,
    },
    Ref3d {
        sheet: ExternSheet,
        addr: CellAddress,
        class: OperandClass,
    },
    Area3d {
        sheet: ExternSheet,
        area: AreaRef,
        class: OperandClass,
    },
    /// A cell reference that was deleted by a structural edit
    RefErr { class: OperandClass },
    AreaErr { class: OperandClass },
    DeletedRef3d {
        sheet: ExternSheet,
        class: OperandClass,
    },
    DeletedArea3d {
        sheet: ExternSheet,
        class: OperandClass,
    },

    /// Defined name, by index in the workbook's name table
    Name { index: u32, class: OperandClass },
    /// User-defined function name, resolved at evaluation time
    NameX { name: String, class: OperandClass },

    /// Array constant, row-major
    Array {
        rows: Vec<Vec<CellValue>>,
        class: OperandClass,
    },

    /// Fixed-arity built-in function
    Func { index: u16, class: OperandClass },
    /// Variable-arity function; `argc` counts every operand popped
    FuncVar {
        index: u16,
        argc: u8,
        class: OperandClass,
    },

    Op(Operator),
    Paren,
    /// Marks a reference subexpression containing a function, name or 3D ref;
    /// `len` is its size in bytes
    MemFunc { len: u16, class: OperandClass },
    /// Marks a reference subexpression built only from plain references
    MemArea { len: u16, class: OperandClass },
    Attr(Attr),
}

impl Token {
    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        match self {
            Token::Int(_) => 3,
            Token::Number(_) => 9,
            Token::String(s) => {
                let units = s.encode_utf16().count();
                if s.chars().any(|c| c as u32 > 0xFF) {
                    3 + 2 * units
                } else {
                    3 + units
                }
            }
            Token::Bool(_) | Token::Error(_) => 2,
            Token::MissingArg => 1,
            Token::Ref { .. } | Token::RefErr { .. } | Token::Name { .. } => 5,
            Token::Area { .. } | Token::AreaErr { .. } => 9,
            Token::Ref3d { .. } | Token::DeletedRef3d { .. } | Token::NameX { .. } => 7,
            Token::Area3d { .. } | Token::DeletedArea3d { .. } => 11,
            Token::Array { .. } => 8,
            Token::Func { .. } => 3,
            Token::FuncVar { .. } => 4,
            Token::Op(_) | Token::Paren => 1,
            Token::MemFunc { .. } => 3,
            Token::MemArea { .. } => 7,
            Token::Attr(attr) => attr.size(),
        }
    }

    /// Operand class of a non-base token
    pub fn class(&self) -> Option<OperandClass> {
        match self {
            Token::Ref { class, .. }
            | Token::Area { class, .. }
            | Token::Ref3d { class, .. }
            | Token::Area3d { class, .. }
            | Token::RefErr { class }
            | Token::AreaErr { class }
            | Token::DeletedRef3d { class, .. }
            | Token::DeletedArea3d { class, .. }
            | Token::Name { class, .. }
            | Token::NameX { class, .. }
            | Token::Array { class, .. }
            | Token::Func { class, .. }
            | Token::FuncVar { class, .. }
            | Token::MemFunc { class, .. }
            | Token::MemArea { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Set the operand class; base tokens are left alone
    pub fn set_class(&mut self, new_class: OperandClass) {
        match self {
            Token::Ref { class, .. }
            | Token::Area { class, .. }
            | Token::Ref3d { class, .. }
            | Token::Area3d { class, .. }
            | Token::RefErr { class }
            | Token::AreaErr { class }
            | Token::DeletedRef3d { class, .. }
            | Token::DeletedArea3d { class, .. }
            | Token::Name { class, .. }
            | Token::NameX { class, .. }
            | Token::Array { class, .. }
            | Token::Func { class, .. }
            | Token::FuncVar { class, .. }
            | Token::MemFunc { class, .. }
            | Token::MemArea { class, .. } => *class = new_class,
            _ => {}
        }
    }

    /// Literals, operators and control tokens carry no operand class
    pub fn is_base(&self) -> bool {
        self.class().is_none()
    }

    /// Reference-producing operand tokens (valid on either side of `:`)
    pub fn is_operand(&self) -> bool {
        matches!(
            self,
            Token::Ref { .. }
                | Token::Area { .. }
                | Token::Ref3d { .. }
                | Token::Area3d { .. }
                | Token::RefErr { .. }
                | Token::AreaErr { .. }
                | Token::DeletedRef3d { .. }
                | Token::DeletedArea3d { .. }
                | Token::Name { .. }
                | Token::NameX { .. }
                | Token::MemFunc { .. }
                | Token::MemArea { .. }
        )
    }

    /// Function index for `Func`/`FuncVar`
    pub fn function_index(&self) -> Option<u16> {
        match self {
            Token::Func { index, .. } | Token::FuncVar { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_3d(&self) -> bool {
        matches!(
            self,
            Token::Ref3d { .. }
                | Token::Area3d { .. }
                | Token::DeletedRef3d { .. }
                | Token::DeletedArea3d { .. }
        )
    }
}

/// Total encoded size of a token slice
pub fn encoded_size(tokens: &[Token]) -> usize {
    tokens.iter().map(Token::size).sum()
}
