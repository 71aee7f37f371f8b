//! Built-in functions and their metadata
//!
//! Every built-in has a fixed index (the number stored in `Func`/`FuncVar`
//! tokens), an argument range, a return class and per-parameter operand
//! classes. User-defined functions are looked up by name only.

/// Unwrap an in-band spreadsheet error, returning it as the function result
macro_rules! value_or_error {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Ok($crate::value::ValueEval::Error(e)),
        }
    };
}

pub mod criteria;
pub mod date;
pub mod info;
pub mod logical;
pub mod lookup;
pub mod math;
pub mod statistical;
pub mod text;

use ahash::AHashMap;

use crate::token::OperandClass;
use crate::value::FunctionImpl;

/// Index of calls to functions that are not built in
pub const FUNCTION_INDEX_EXTERNAL: u16 = 255;
pub const FUNCTION_INDEX_IF: u16 = 1;
pub const FUNCTION_INDEX_SUM: u16 = 4;
pub const FUNCTION_INDEX_CHOOSE: u16 = 100;

use OperandClass::{Array as A, Reference as R, Value as V};

/// Function definition
#[derive(Clone)]
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    /// Stable index used in tokens
    pub index: u16,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Class of the value the function returns
    pub return_class: OperandClass,
    /// Desired class of each parameter; the last entry repeats
    pub param_classes: &'static [OperandClass],
    /// Implementation
    pub implementation: FunctionImpl,
    /// Is volatile (recalculates every time)
    pub volatile: bool,
}

impl FunctionDef {
    pub fn new(
        index: u16,
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        return_class: OperandClass,
        param_classes: &'static [OperandClass],
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            name,
            index,
            min_args,
            max_args,
            return_class,
            param_classes,
            implementation,
            volatile: false,
        }
    }

    fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Fixed-arity functions are encoded as `Func`, the rest as `FuncVar`
    pub fn is_fixed_arity(&self) -> bool {
        self.max_args == Some(self.min_args)
    }

    /// Desired class of the parameter at `i`
    pub fn param_class(&self, i: usize) -> OperandClass {
        match self.param_classes.get(i) {
            Some(class) => *class,
            None => self.param_classes.last().copied().unwrap_or(V),
        }
    }
}

/// Function registry
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: Vec<FunctionDef>,
    by_name: AHashMap<String, usize>,
    by_index: AHashMap<u16, usize>,
    udfs: AHashMap<String, FunctionImpl>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// A registry with no functions at all
    pub fn empty() -> Self {
        Self {
            functions: Vec::new(),
            by_name: AHashMap::new(),
            by_index: AHashMap::new(),
            udfs: AHashMap::new(),
        }
    }

    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register_math_functions();
        registry.register_logical_functions();
        registry.register_text_functions();
        registry.register_info_functions();
        registry.register_date_functions();
        registry.register_lookup_functions();
        registry.register_statistical_functions();

        registry
    }

    /// Look up a built-in by name
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.by_name
            .get(&name.to_uppercase())
            .map(|&i| &self.functions[i])
    }

    /// Look up a built-in by token index
    pub fn get_by_index(&self, index: u16) -> Option<&FunctionDef> {
        self.by_index.get(&index).map(|&i| &self.functions[i])
    }

    /// Register a built-in, replacing any previous one with the same name or index
    pub fn register(&mut self, def: FunctionDef) {
        let slot = self.functions.len();
        self.by_name.insert(def.name.to_uppercase(), slot);
        self.by_index.insert(def.index, slot);
        self.functions.push(def);
    }

    /// Register a user-defined function, called through index 255
    pub fn register_udf(&mut self, name: &str, implementation: FunctionImpl) {
        self.udfs.insert(name.to_uppercase(), implementation);
    }

    pub fn udf(&self, name: &str) -> Option<FunctionImpl> {
        self.udfs.get(&name.to_uppercase()).copied()
    }

    /// Whether a call by this index needs recomputation on every evaluation
    pub fn is_volatile(&self, index: u16) -> bool {
        self.get_by_index(index).is_some_and(|def| def.volatile)
    }

    fn register_math_functions(&mut self) {
        self.register(FunctionDef::new(4, "SUM", 1, None, V, &[R], math::fn_sum));
        self.register(FunctionDef::new(19, "PI", 0, Some(0), V, &[], math::fn_pi));
        self.register(FunctionDef::new(20, "SQRT", 1, Some(1), V, &[V], math::fn_sqrt));
        self.register(FunctionDef::new(24, "ABS", 1, Some(1), V, &[V], math::fn_abs));
        self.register(FunctionDef::new(25, "INT", 1, Some(1), V, &[V], math::fn_int));
        self.register(FunctionDef::new(26, "SIGN", 1, Some(1), V, &[V], math::fn_sign));
        self.register(FunctionDef::new(27, "ROUND", 2, Some(2), V, &[V, V], math::fn_round));
        self.register(FunctionDef::new(39, "MOD", 2, Some(2), V, &[V, V], math::fn_mod));
        self.register(FunctionDef::new(63, "RAND", 0, Some(0), V, &[], math::fn_rand).volatile());
        self.register(FunctionDef::new(228, "SUMPRODUCT", 1, None, V, &[A], math::fn_sumproduct));
        self.register(FunctionDef::new(337, "POWER", 2, Some(2), V, &[V, V], math::fn_power));
        self.register(FunctionDef::new(345, "SUMIF", 2, Some(3), V, &[R, V, R], math::fn_sumif));
    }

    fn register_logical_functions(&mut self) {
        self.register(FunctionDef::new(1, "IF", 2, Some(3), R, &[V, R, R], logical::fn_if));
        self.register(FunctionDef::new(34, "TRUE", 0, Some(0), V, &[], logical::fn_true));
        self.register(FunctionDef::new(35, "FALSE", 0, Some(0), V, &[], logical::fn_false));
        self.register(FunctionDef::new(36, "AND", 1, None, V, &[R], logical::fn_and));
        self.register(FunctionDef::new(37, "OR", 1, None, V, &[R], logical::fn_or));
        self.register(FunctionDef::new(38, "NOT", 1, Some(1), V, &[V], logical::fn_not));
        self.register(FunctionDef::new(480, "IFERROR", 2, Some(2), V, &[V, V], logical::fn_iferror));
    }

    fn register_text_functions(&mut self) {
        self.register(FunctionDef::new(30, "REPT", 2, Some(2), V, &[V, V], text::fn_rept));
        self.register(FunctionDef::new(32, "LEN", 1, Some(1), V, &[V], text::fn_len));
        self.register(FunctionDef::new(112, "LOWER", 1, Some(1), V, &[V], text::fn_lower));
        self.register(FunctionDef::new(113, "UPPER", 1, Some(1), V, &[V], text::fn_upper));
        self.register(FunctionDef::new(115, "LEFT", 1, Some(2), V, &[V, V], text::fn_left));
        self.register(FunctionDef::new(116, "RIGHT", 1, Some(2), V, &[V, V], text::fn_right));
        self.register(FunctionDef::new(118, "TRIM", 1, Some(1), V, &[V], text::fn_trim));
        self.register(FunctionDef::new(336, "CONCATENATE", 1, None, V, &[V], text::fn_concatenate));
    }

    fn register_info_functions(&mut self) {
        self.register(FunctionDef::new(2, "ISNA", 1, Some(1), V, &[V], info::fn_isna));
        self.register(FunctionDef::new(3, "ISERROR", 1, Some(1), V, &[V], info::fn_iserror));
        self.register(FunctionDef::new(10, "NA", 0, Some(0), V, &[], info::fn_na));
        self.register(FunctionDef::new(126, "ISERR", 1, Some(1), V, &[V], info::fn_iserr));
        self.register(FunctionDef::new(127, "ISTEXT", 1, Some(1), V, &[V], info::fn_istext));
        self.register(FunctionDef::new(128, "ISNUMBER", 1, Some(1), V, &[V], info::fn_isnumber));
        self.register(FunctionDef::new(129, "ISBLANK", 1, Some(1), V, &[V], info::fn_isblank));
    }

    fn register_date_functions(&mut self) {
        self.register(FunctionDef::new(65, "DATE", 3, Some(3), V, &[V], date::fn_date));
        self.register(FunctionDef::new(74, "NOW", 0, Some(0), V, &[], date::fn_now).volatile());
        self.register(FunctionDef::new(221, "TODAY", 0, Some(0), V, &[], date::fn_today).volatile());
    }

    fn register_lookup_functions(&mut self) {
        self.register(FunctionDef::new(8, "ROW", 0, Some(1), V, &[R], lookup::fn_row));
        self.register(FunctionDef::new(9, "COLUMN", 0, Some(1), V, &[R], lookup::fn_column));
        self.register(FunctionDef::new(29, "INDEX", 2, Some(4), R, &[R, V], lookup::fn_index));
        self.register(FunctionDef::new(76, "ROWS", 1, Some(1), V, &[R], lookup::fn_rows));
        self.register(FunctionDef::new(77, "COLUMNS", 1, Some(1), V, &[R], lookup::fn_columns));
        self.register(FunctionDef::new(78, "OFFSET", 3, Some(5), R, &[R, V], lookup::fn_offset).volatile());
        self.register(FunctionDef::new(100, "CHOOSE", 2, None, R, &[V, R], lookup::fn_choose));
        self.register(FunctionDef::new(102, "VLOOKUP", 3, Some(4), V, &[V, R, R, V], lookup::fn_vlookup));
    }

    fn register_statistical_functions(&mut self) {
        self.register(FunctionDef::new(0, "COUNT", 0, None, V, &[R], statistical::fn_count));
        self.register(FunctionDef::new(5, "AVERAGE", 1, None, V, &[R], statistical::fn_average));
        self.register(FunctionDef::new(6, "MIN", 1, None, V, &[R], statistical::fn_min));
        self.register(FunctionDef::new(7, "MAX", 1, None, V, &[R], statistical::fn_max));
        self.register(FunctionDef::new(169, "COUNTA", 1, None, V, &[R], statistical::fn_counta));
        self.register(FunctionDef::new(346, "COUNTIF", 2, Some(2), V, &[R, V], statistical::fn_countif));
    }
}
