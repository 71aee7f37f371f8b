//! Parse tree produced by the parser and flattened into reverse Polish tokens
//!
//! `IF` and `CHOOSE` calls get attribute tokens inserted around their
//! branches so the evaluator can jump over the branches it does not take.

use crate::functions::{FUNCTION_INDEX_CHOOSE, FUNCTION_INDEX_IF};
use crate::token::{encoded_size, Attr, Token};

/// A node of the parse tree
#[derive(Debug, Clone, PartialEq)]
pub struct ParseNode {
    pub token: Token,
    pub children: Vec<ParseNode>,
}

impl ParseNode {
    pub fn leaf(token: Token) -> Self {
        Self {
            token,
            children: Vec::new(),
        }
    }

    pub fn new(token: Token, children: Vec<ParseNode>) -> Self {
        Self { token, children }
    }

    fn function_index(&self) -> Option<u16> {
        match self.token {
            Token::FuncVar { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Whether the token precedes its operands in the flattened form
    fn is_prefix(&self) -> bool {
        matches!(self.token, Token::MemFunc { .. } | Token::MemArea { .. })
    }

    /// Encoded size in bytes of the flattened subtree
    pub fn encoded_size(&self) -> usize {
        encoded_size(&self.to_tokens())
    }

    /// Flatten into reverse Polish order
    pub fn to_tokens(&self) -> Vec<Token> {
        let mut out = Vec::new();
        self.collate(&mut out);
        out
    }

    fn collate(&self, out: &mut Vec<Token>) {
        match self.function_index() {
            Some(FUNCTION_INDEX_IF) if !self.children.is_empty() => self.collate_if(out),
            Some(FUNCTION_INDEX_CHOOSE) if self.children.len() > 1 => self.collate_choose(out),
            _ => {
                if self.is_prefix() {
                    out.push(self.token.clone());
                }
                for child in &self.children {
                    child.collate(out);
                }
                if !self.is_prefix() {
                    out.push(self.token.clone());
                }
            }
        }
    }

    // Layout: cond, If(a), true, Skip(b), [false, Skip(3)], FuncVar IF
    fn collate_if(&self, out: &mut Vec<Token>) {
        self.children[0].collate(out);
        let if_index = out.len();
        out.push(Token::Attr(Attr::If { distance: 0 }));

        if let Some(true_branch) = self.children.get(1) {
            true_branch.collate(out);
        }
        let skip_after_true = out.len();
        out.push(Token::Attr(Attr::Skip { distance: 0 }));
        let true_size = encoded_size(&out[if_index + 1..skip_after_true]);
        out[if_index] = Token::Attr(Attr::If {
            distance: (true_size + 4) as u16,
        });

        if let Some(false_branch) = self.children.get(2) {
            false_branch.collate(out);
            let skip_after_false = out.len();
            out.push(Token::Attr(Attr::Skip { distance: 3 }));
            let false_size = encoded_size(&out[skip_after_true + 1..skip_after_false]);
            out[skip_after_true] = Token::Attr(Attr::Skip {
                distance: (false_size + 4 + 4 - 1) as u16,
            });
        } else {
            out[skip_after_true] = Token::Attr(Attr::Skip { distance: 3 });
        }
        out.push(self.token.clone());
    }

    // Layout: index, Choose, b0, Skip, b1, Skip, ..., FuncVar CHOOSE.
    // Jump table entries count from the start of the table, whose own size
    // is 2n + 2.
    fn collate_choose(&self, out: &mut Vec<Token>) {
        self.children[0].collate(out);
        let branches: Vec<Vec<Token>> =
            self.children[1..].iter().map(ParseNode::to_tokens).collect();
        let table_size = 2 * branches.len() + 2;

        let mut jump_table = Vec::with_capacity(branches.len());
        let mut offset = 0;
        for branch in &branches {
            jump_table.push((table_size + offset) as u16);
            offset += encoded_size(branch) + 4;
        }
        out.push(Token::Attr(Attr::Choose {
            jump_table,
            func_offset: (table_size + offset) as u16,
        }));

        let mut consumed = 0;
        for branch in branches {
            consumed += encoded_size(&branch) + 4;
            out.extend(branch);
            out.push(Token::Attr(Attr::Skip {
                distance: (offset - consumed + 3) as u16,
            }));
        }
        out.push(self.token.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::OperandClass;
    use pretty_assertions::assert_eq;

    fn int(n: u16) -> ParseNode {
        ParseNode::leaf(Token::Int(n))
    }

    fn func_var(index: u16, argc: u8, children: Vec<ParseNode>) -> ParseNode {
        ParseNode::new(
            Token::FuncVar {
                index,
                argc,
                class: OperandClass::Value,
            },
            children,
        )
    }

    #[test]
    fn test_if_with_both_branches() {
        let node = func_var(FUNCTION_INDEX_IF, 3, vec![int(1), int(2), int(3)]);
        let tokens = node.to_tokens();
        assert_eq!(tokens[1], Token::Attr(Attr::If { distance: 7 }));
        assert_eq!(tokens[3], Token::Attr(Attr::Skip { distance: 10 }));
        assert_eq!(tokens[5], Token::Attr(Attr::Skip { distance: 3 }));
        assert_eq!(tokens.len(), 7);
        assert_eq!(node.encoded_size(), 3 * 3 + 3 * 4 + 4);
    }

    #[test]
    fn test_if_without_false_branch() {
        let tokens = func_var(FUNCTION_INDEX_IF, 2, vec![int(1), int(2)]).to_tokens();
        assert_eq!(
            tokens[..4],
            [
                Token::Int(1),
                Token::Attr(Attr::If { distance: 7 }),
                Token::Int(2),
                Token::Attr(Attr::Skip { distance: 3 }),
            ]
        );
    }

    #[test]
    fn test_choose_jump_table() {
        let node = func_var(FUNCTION_INDEX_CHOOSE, 3, vec![int(2), int(10), int(20)]);
        let tokens = node.to_tokens();
        // table size 6, branch sizes 3 + skip 4
        assert_eq!(
            tokens[1],
            Token::Attr(Attr::Choose {
                jump_table: vec![6, 13],
                func_offset: 20,
            })
        );
        assert_eq!(tokens[3], Token::Attr(Attr::Skip { distance: 10 }));
        assert_eq!(tokens[5], Token::Attr(Attr::Skip { distance: 3 }));
    }

    #[test]
    fn test_mem_token_is_prefix() {
        let node = ParseNode::new(
            Token::MemFunc {
                len: 3,
                class: OperandClass::Reference,
            },
            vec![int(1)],
        );
        assert!(matches!(node.to_tokens()[0], Token::MemFunc { .. }));
    }
}
