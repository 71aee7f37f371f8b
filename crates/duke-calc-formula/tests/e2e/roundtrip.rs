//! Rendering parsed tokens gives text that parses to the same tokens.

use duke_calc_core::Workbook;
use duke_calc_formula::{parse, to_formula_string, FormulaKind, FunctionRegistry};
use proptest::prelude::*;

fn cell_ref() -> impl Strategy<Value = String> {
    (0u8..26, 1u32..200, any::<bool>(), any::<bool>()).prop_map(|(col, row, abs_col, abs_row)| {
        format!(
            "{}{}{}{}",
            if abs_col { "$" } else { "" },
            (b'A' + col) as char,
            if abs_row { "$" } else { "" },
            row
        )
    })
}

fn leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..10_000).prop_map(|n| n.to_string()),
        (1u32..1000, 1u32..100).prop_map(|(a, b)| format!("{a}.{b}")),
        "[a-z]{0,6}".prop_map(|s| format!("\"{s}\"")),
        Just("TRUE".to_string()),
        Just("#N/A".to_string()),
        cell_ref(),
        (cell_ref(), cell_ref()).prop_map(|(a, b)| format!("SUM({a}:{b})")),
    ]
}

fn expression() -> impl Strategy<Value = String> {
    leaf().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/", "^", "&", "=", "<>", "<="]), inner.clone())
                .prop_map(|(l, op, r)| format!("{l}{op}{r}")),
            inner.clone().prop_map(|e| format!("({e})")),
            inner.clone().prop_map(|e| format!("-{e}")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, t, f)| format!("IF({c},{t},{f})")),
            (inner.clone(), inner.clone()).prop_map(|(s, a)| format!("CHOOSE({s},{a},0)")),
            prop::collection::vec(inner, 1..4).prop_map(|args| format!("MAX({})", args.join(","))),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_render_then_parse_is_stable(formula in expression()) {
        let wb = Workbook::new();
        let registry = FunctionRegistry::new();
        let tokens = parse(&formula, &wb, FormulaKind::Cell, 0, &registry).unwrap();
        let text = to_formula_string(&wb, &tokens, &registry).unwrap();
        let reparsed = parse(&text, &wb, FormulaKind::Cell, 0, &registry).unwrap();
        prop_assert_eq!(&reparsed, &tokens, "rendered as {}", text);
    }
}
