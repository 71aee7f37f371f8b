use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use duke_calc_core::{CellValue, Workbook};
use duke_calc_formula::{parse, FormulaKind, FunctionRegistry, WorkbookEvaluator};

/// Column A holds numbers, column B a running total over them, column C
/// a lookup-heavy formula per row
fn build_sheet(rows: u32) -> Workbook {
    let mut wb = Workbook::new();
    let ws = wb.worksheet_mut(0).unwrap();
    for row in 0..rows {
        ws.set_cell_value_at(row, 0, (row % 97) as f64).unwrap();
        let total = if row == 0 {
            "A1".to_string()
        } else {
            format!("B{}+A{}", row, row + 1)
        };
        ws.set_cell_formula_at(row, 1, &total).unwrap();
        ws.set_cell_formula_at(
            row,
            2,
            &format!("IF(A{r}>50,SUMIF(A$1:A$200,\">\"&A{r}),CHOOSE(MOD(A{r},3)+1,1,2,3))", r = row + 1),
        )
        .unwrap();
    }
    wb
}

fn bench_parse(c: &mut Criterion) {
    let wb = Workbook::new();
    let registry = FunctionRegistry::new();
    let formula = "IF(AND(A1>0,B2<>\"x\"),SUM(A1:A100)*2,VLOOKUP(C3,Sheet1!$D$1:$F$50,3,FALSE))";
    c.bench_function("parse_nested_formula", |b| {
        b.iter(|| parse(black_box(formula), &wb, FormulaKind::Cell, 0, &registry).unwrap())
    });
}

fn bench_full_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_all");
    for rows in [100u32, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter_batched(
                || WorkbookEvaluator::new(build_sheet(rows)),
                |mut ev| {
                    for row in 0..rows {
                        black_box(ev.evaluate(0, row, 1).unwrap());
                        black_box(ev.evaluate(0, row, 2).unwrap());
                    }
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_incremental_update(c: &mut Criterion) {
    let rows = 1_000;
    let mut ev = WorkbookEvaluator::new(build_sheet(rows));
    for row in 0..rows {
        ev.evaluate(0, row, 1).unwrap();
    }

    let mut value = 0.0;
    c.bench_function("update_first_cell_and_reevaluate", |b| {
        b.iter(|| {
            value += 1.0;
            ev.workbook_mut()
                .worksheet_mut(0)
                .unwrap()
                .set_cell_value_at(0, 0, CellValue::Number(value))
                .unwrap();
            let cell = ev.cell(0, 0, 0, 0).unwrap();
            ev.notify_update_cell(0, 0, &cell).unwrap();
            // in row order, so each total finds its predecessor cached
            for row in 0..rows {
                black_box(ev.evaluate(0, row, 1).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_parse, bench_full_evaluation, bench_incremental_update);
criterion_main!(benches);
