//! Operand class assignment
//!
//! After parsing, every reference, name, array and function token gets the
//! class its consumer expects: a reference, a single value or an array.
//! The walk starts from the formula kind's root class and follows each
//! function's parameter classes downwards. An array-expecting caller forces
//! nested value functions into array mode.
//!
//! Running the transform twice gives the same classes as running it once.

use crate::functions::{FunctionRegistry, FUNCTION_INDEX_EXTERNAL, FUNCTION_INDEX_SUM};
use crate::parse_node::ParseNode;
use crate::parser::FormulaKind;
use crate::token::{Attr, OperandClass, Operator, Token};

use OperandClass::{Array, Reference, Value};

/// Assign operand classes throughout a parse tree
pub fn transform(root: &mut ParseNode, kind: FormulaKind, registry: &FunctionRegistry) {
    Transformer { registry }.node(root, kind.root_class(), false);
}

/// Default return class and parameter classes of a function token
struct Signature {
    return_class: OperandClass,
    params: Vec<OperandClass>,
}

impl Signature {
    fn param(&self, i: usize) -> OperandClass {
        self.params
            .get(i)
            .or_else(|| self.params.last())
            .copied()
            .unwrap_or(Value)
    }
}

struct Transformer<'a> {
    registry: &'a FunctionRegistry,
}

impl Transformer<'_> {
    fn signature(&self, index: u16) -> Signature {
        if index == FUNCTION_INDEX_EXTERNAL {
            return Signature {
                return_class: Value,
                params: vec![Reference],
            };
        }
        match self.registry.get_by_index(index) {
            Some(def) => Signature {
                return_class: def.return_class,
                params: def.param_classes.to_vec(),
            },
            None => Signature {
                return_class: Value,
                params: vec![Value],
            },
        }
    }

    fn node(&self, node: &mut ParseNode, desired: OperandClass, force_array: bool) {
        let index = match &node.token {
            Token::Func { index, .. } | Token::FuncVar { index, .. } => Some(*index),
            // Arguments of a one-argument SUM are classed like SUM's
            Token::Attr(Attr::Sum) => Some(FUNCTION_INDEX_SUM),
            _ => None,
        };

        if let Some(index) = index {
            let sig = self.signature(index);
            let is_attr = matches!(node.token, Token::Attr(_));
            if !is_attr && self.is_simple_value_function(&sig, node.children.len()) {
                let local_force = desired == Array;
                for child in &mut node.children {
                    self.node(child, desired, local_force);
                }
                let class = if force_array || desired == Array {
                    Array
                } else {
                    Value
                };
                node.token.set_class(class);
                return;
            }
            self.function(node, &sig, desired, force_array, is_attr);
            return;
        }

        match node.token {
            // Range operands keep their reference classes
            Token::Op(Operator::Range) => {}
            Token::Op(_)
            | Token::Paren
            | Token::Attr(_)
            | Token::MemFunc { .. }
            | Token::MemArea { .. } => {
                let local = if desired == Reference { Value } else { desired };
                for child in &mut node.children {
                    self.node(child, local, force_array);
                }
            }
            _ => {
                if let Some(current) = node.token.class() {
                    node.token
                        .set_class(transform_class(current, desired, force_array));
                }
            }
        }
    }

    fn is_simple_value_function(&self, sig: &Signature, argc: usize) -> bool {
        sig.return_class == Value && (0..argc).all(|i| sig.param(i) == Value)
    }

    fn function(
        &self,
        node: &mut ParseNode,
        sig: &Signature,
        desired: OperandClass,
        force_array: bool,
        is_attr: bool,
    ) {
        let default = sig.return_class;
        let (class, local_force) = if force_array {
            match default {
                Reference if desired == Reference => (Reference, false),
                Reference | Array => (Array, false),
                Value => (Array, true),
            }
        } else if default == desired {
            (default, false)
        } else {
            match desired {
                Value => (Value, false),
                // a reference result stays one; its arguments become arrays
                Array => match default {
                    Reference => (Reference, true),
                    _ => (Array, true),
                },
                Reference => (default, false),
            }
        };
        if !is_attr {
            node.token.set_class(class);
        }
        for (i, child) in node.children.iter_mut().enumerate() {
            self.node(child, sig.param(i), local_force);
        }
    }
}

fn transform_class(current: OperandClass, desired: OperandClass, force_array: bool) -> OperandClass {
    match desired {
        Value if !force_array => Value,
        Value | Array => Array,
        Reference if !force_array => current,
        Reference => Reference,
    }
}
