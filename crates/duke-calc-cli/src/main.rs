//! duke-calc CLI - formula inspection and CSV evaluation

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use duke_calc::prelude::*;
use duke_calc::{parse, to_formula_string, FormulaKind, FunctionRegistry, Token};

#[derive(Parser)]
#[command(name = "duke-calc")]
#[command(author, version, about = "Spreadsheet formula parsing and evaluation tool")]
struct Cli {
    /// Log more detail to stderr (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the reverse Polish tokens of a formula
    Parse {
        /// Formula text, with or without a leading `=`
        formula: String,

        #[arg(short, long, value_enum, default_value_t = Kind::Cell)]
        kind: Kind,
    },

    /// Parse a formula and print it back in canonical form
    Render {
        formula: String,

        #[arg(short, long, value_enum, default_value_t = Kind::Cell)]
        kind: Kind,
    },

    /// Evaluate a CSV file whose `=`-prefixed fields are formulas
    Calc {
        /// Input CSV file
        input: PathBuf,

        /// Output CSV file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Field delimiter
        #[arg(short, long, default_value = ",")]
        delimiter: char,

        /// Print calculation statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Cell,
    Array,
    Name,
}

impl From<Kind> for FormulaKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Cell => FormulaKind::Cell,
            Kind::Array => FormulaKind::Array,
            Kind::Name => FormulaKind::NamedRange,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Parse { formula, kind } => show_tokens(&mut out, &formula, kind.into()),
        Commands::Render { formula, kind } => {
            let text = render(&formula, kind.into())?;
            writeln!(out, "{text}").context("Failed to write to stdout")
        }
        Commands::Calc {
            input,
            output,
            delimiter,
            stats,
        } => calc(&input, output.as_deref(), delimiter, stats),
    }
}

/// Parse against an empty one-sheet workbook
fn parse_standalone(formula: &str, kind: FormulaKind) -> Result<Vec<Token>> {
    let workbook = Workbook::new();
    let registry = FunctionRegistry::new();
    let formula = formula.strip_prefix('=').unwrap_or(formula);
    parse(formula, &workbook, kind, 0, &registry)
        .with_context(|| format!("Failed to parse '{formula}'"))
}

fn show_tokens(out: &mut impl Write, formula: &str, kind: FormulaKind) -> Result<()> {
    let tokens = parse_standalone(formula, kind)?;
    for (i, token) in tokens.iter().enumerate() {
        let class = match token.class() {
            Some(class) => format!("{class:?}"),
            None => "-".to_string(),
        };
        writeln!(out, "{i:>3}  {:>2}  {class:<9}  {token:?}", token.size())?;
    }
    let size: usize = tokens.iter().map(Token::size).sum();
    writeln!(out, "{} tokens, {size} bytes", tokens.len())?;
    Ok(())
}

fn render(formula: &str, kind: FormulaKind) -> Result<String> {
    let tokens = parse_standalone(formula, kind)?;
    let text = to_formula_string(&Workbook::new(), &tokens, &FunctionRegistry::new())
        .context("Failed to render formula")?;
    Ok(text)
}

fn calc(input: &Path, output: Option<&Path>, delimiter: char, show_stats: bool) -> Result<()> {
    let delimiter = u8::try_from(delimiter).context("Delimiter must be a single-byte character")?;
    let file =
        File::open(input).with_context(|| format!("Failed to open '{}'", input.display()))?;
    let mut workbook = read_csv(file, delimiter)
        .with_context(|| format!("Failed to read '{}'", input.display()))?;

    let stats = workbook
        .calculate()
        .context("Failed to calculate formulas")?;
    if show_stats {
        eprintln!(
            "Calculated {} of {} formulas ({} errors, {} circular)",
            stats.cells_calculated, stats.formula_count, stats.errors, stats.circular_references
        );
    }

    let sheet = workbook
        .worksheet(0)
        .context("Workbook has no sheet")?;
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create '{}'", path.display()))?;
            write_csv(sheet, file, delimiter)
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
        }
        None => write_csv(sheet, io::stdout().lock(), delimiter)
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

/// Load CSV records into the first sheet. Every record is a row; there is no
/// header line.
fn read_csv(reader: impl Read, delimiter: u8) -> Result<Workbook> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut workbook = Workbook::new();
    let sheet = workbook
        .worksheet_mut(0)
        .context("Workbook has no sheet")?;
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row = u32::try_from(row).context("Too many rows")?;
        for (col, field) in record.iter().enumerate() {
            let col = u16::try_from(col).context("Too many columns")?;
            match field.strip_prefix('=') {
                Some(formula) => sheet.set_cell_formula_at(row, col, formula)?,
                None => sheet.set_cell_value_at(row, col, detect_type(field))?,
            }
        }
    }
    Ok(workbook)
}

fn detect_type(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return CellValue::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return CellValue::Boolean(false);
    }
    if let Some(error) = CellError::from_str(trimmed) {
        return CellValue::Error(error);
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        _ => CellValue::string(field),
    }
}

fn write_csv(sheet: &Worksheet, writer: impl Write, delimiter: u8) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(writer);

    if let Some(range) = sheet.used_range() {
        for row in 0..=range.end.row {
            let record: Vec<String> = (0..=range.end.col)
                .map(|col| sheet.get_value_at(row, col).to_string())
                .collect();
            csv_writer.write_record(&record)?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_calc_writes_values() {
        let input = csv_file("1,2,=A1+B1\n3,4,=SUM(A1:B2)\nitem,\"a,b\",=C1*C2\n");
        let output = NamedTempFile::new().unwrap();

        calc(input.path(), Some(output.path()), ',', false).unwrap();

        let written = std::fs::read_to_string(output.path()).unwrap();
        assert_eq!(written, "1,2,3\n3,4,10\nitem,\"a,b\",30\n");
    }

    #[test]
    fn test_calc_reports_errors_in_cells() {
        let input = csv_file("=1/0;=A2\n=B1;#N/A\n");
        let output = NamedTempFile::new().unwrap();

        calc(input.path(), Some(output.path()), ';', true).unwrap();

        let written = std::fs::read_to_string(output.path()).unwrap();
        assert_eq!(written, "#DIV/0!;#REF!\n#REF!;#N/A\n");
    }

    #[test]
    fn test_read_csv_detects_types() {
        let wb = read_csv("TRUE,1.5e2,text,,=A1\n".as_bytes(), b',').unwrap();
        let sheet = wb.worksheet(0).unwrap();
        assert_eq!(sheet.get_value_at(0, 0), CellValue::Boolean(true));
        assert_eq!(sheet.get_value_at(0, 1), CellValue::Number(150.0));
        assert_eq!(sheet.get_value_at(0, 2), CellValue::string("text"));
        assert_eq!(sheet.get_value_at(0, 3), CellValue::Empty);
        assert_eq!(sheet.get_formula_at(0, 4), Some("A1"));
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = calc(&dir.path().join("none.csv"), None, ',', false).unwrap_err();
        assert!(err.to_string().starts_with("Failed to open"));
    }

    #[test]
    fn test_render_and_parse() {
        assert_eq!(render("=sum(a1,$B$2:c3)", FormulaKind::Cell).unwrap(), "SUM(A1,$B$2:C3)");
        assert!(render("1+", FormulaKind::Cell).is_err());

        let mut out = Vec::new();
        show_tokens(&mut out, "1+A1", FormulaKind::Cell).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.ends_with("3 tokens, 9 bytes\n"));
    }
}
