//! Shared formula rebasing
//!
//! A shared formula group keeps one token template, parsed at its anchor
//! cell. Each member evaluates a fresh copy whose relative coordinates are
//! moved by the member's offset from the anchor. Coordinates wrap around
//! the grid edges the same way the file format stores them.

use duke_calc_core::CellAddress;

use crate::token::{AreaRef, Token};
use crate::version::SpreadsheetVersion;

/// Copy of `template` as seen from a cell `dr` rows and `dc` columns away
/// from the anchor
pub fn rebase(template: &[Token], dr: i64, dc: i64, version: SpreadsheetVersion) -> Vec<Token> {
    if dr == 0 && dc == 0 {
        return template.to_vec();
    }
    let move_addr = |addr: CellAddress| -> CellAddress {
        let mut out = addr;
        if !addr.row_absolute {
            out.row = wrap(addr.row as i64 + dr, version.max_rows() as i64) as u32;
        }
        if !addr.col_absolute {
            out.col = wrap(addr.col as i64 + dc, version.max_columns() as i64) as u16;
        }
        out
    };
    let move_area = |area: AreaRef| -> AreaRef {
        AreaRef {
            first: move_addr(area.first),
            last: move_addr(area.last),
        }
    };

    template
        .iter()
        .map(|token| match token {
            Token::Ref { addr, class } => Token::Ref {
                addr: move_addr(*addr),
                class: *class,
            },
            Token::Ref3d { sheet, addr, class } => Token::Ref3d {
                sheet: *sheet,
                addr: move_addr(*addr),
                class: *class,
            },
            Token::Area { area, class } => Token::Area {
                area: move_area(*area),
                class: *class,
            },
            Token::Area3d { sheet, area, class } => Token::Area3d {
                sheet: *sheet,
                area: move_area(*area),
                class: *class,
            },
            other => other.clone(),
        })
        .collect()
}

fn wrap(value: i64, size: i64) -> i64 {
    value.rem_euclid(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::OperandClass;
    use pretty_assertions::assert_eq;

    fn cell(addr: CellAddress) -> Token {
        Token::Ref {
            addr,
            class: OperandClass::Value,
        }
    }

    #[test]
    fn test_relative_parts_move() {
        let template = vec![
            cell(CellAddress::new(0, 0)),
            cell(CellAddress::with_absolute(0, 0, true, false)),
            cell(CellAddress::absolute(0, 0)),
        ];
        let rebased = rebase(&template, 2, 1, SpreadsheetVersion::Excel2007);
        assert_eq!(
            rebased,
            vec![
                cell(CellAddress::new(2, 1)),
                cell(CellAddress::with_absolute(0, 1, true, false)),
                cell(CellAddress::absolute(0, 0)),
            ]
        );
        // the template itself is untouched
        assert_eq!(template[0], cell(CellAddress::new(0, 0)));
    }

    #[test]
    fn test_coordinates_wrap_at_grid_edges() {
        let template = vec![cell(CellAddress::new(0, 0))];
        let rebased = rebase(&template, -1, -1, SpreadsheetVersion::Excel97);
        assert_eq!(rebased, vec![cell(CellAddress::new(65_535, 255))]);
    }

    #[test]
    fn test_areas_move_both_corners() {
        let area = AreaRef::new(CellAddress::new(0, 0), CellAddress::new(2, 0));
        let template = vec![Token::Area {
            area,
            class: OperandClass::Reference,
        }];
        let rebased = rebase(&template, 3, 0, SpreadsheetVersion::Excel2007);
        assert_eq!(
            rebased,
            vec![Token::Area {
                area: AreaRef::new(CellAddress::new(3, 0), CellAddress::new(5, 0)),
                class: OperandClass::Reference,
            }]
        );
    }
}
