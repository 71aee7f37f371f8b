//! Spreadsheet format generations and their grid limits

/// File format generation; decides grid size and argument limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpreadsheetVersion {
    /// BIFF8 (.xls): 65 536 rows, 256 columns, 30 function arguments
    Excel97,
    /// Office Open XML (.xlsx): 1 048 576 rows, 16 384 columns, 255 arguments
    #[default]
    Excel2007,
}

impl SpreadsheetVersion {
    pub fn max_rows(self) -> u32 {
        match self {
            SpreadsheetVersion::Excel97 => 65_536,
            SpreadsheetVersion::Excel2007 => 1_048_576,
        }
    }

    pub fn max_columns(self) -> u16 {
        match self {
            SpreadsheetVersion::Excel97 => 256,
            SpreadsheetVersion::Excel2007 => 16_384,
        }
    }

    pub fn last_row_index(self) -> u32 {
        self.max_rows() - 1
    }

    pub fn last_column_index(self) -> u16 {
        self.max_columns() - 1
    }

    /// Upper bound on arguments of functions with open-ended parameter lists
    pub fn max_function_args(self) -> usize {
        match self {
            SpreadsheetVersion::Excel97 => 30,
            SpreadsheetVersion::Excel2007 => 255,
        }
    }
}
