//! Workbook type - the main document structure

use crate::error::{Error, Result};
use crate::named_range::{NameScope, NamedRange, NamedRangeCollection};
use crate::worksheet::Worksheet;
use crate::MAX_SHEET_NAME_LEN;

/// A reference to another workbook: its name and the sheet names formulas use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    /// Workbook name as written between brackets, e.g. `Book2.xlsx`
    pub workbook: String,
    /// Sheets of that workbook referenced from this one
    pub sheets: Vec<String>,
}

impl ExternalLink {
    pub fn new(workbook: impl Into<String>) -> Self {
        Self {
            workbook: workbook.into(),
            sheets: Vec::new(),
        }
    }

    /// Index of a sheet within this link, ignoring case
    pub fn sheet_index(&self, name: &str) -> Option<u16> {
        self.sheets
            .iter()
            .position(|s| s.eq_ignore_ascii_case(name))
            .map(|i| i as u16)
    }
}

/// A workbook (spreadsheet document)
///
/// A workbook contains one or more worksheets, the defined names, and the
/// external workbook links its formulas refer to.
#[derive(Debug)]
pub struct Workbook {
    /// Name other workbooks use to refer to this one
    name: Option<String>,
    /// Worksheets in the workbook
    worksheets: Vec<Worksheet>,
    /// Named ranges (defined names)
    named_ranges: NamedRangeCollection,
    /// External workbook links, indexed by position
    external_links: Vec<ExternalLink>,
}

impl Workbook {
    /// Create a new empty workbook with one worksheet
    pub fn new() -> Self {
        let mut wb = Self::empty();
        wb.worksheets.push(Worksheet::new("Sheet1"));
        wb
    }

    /// Create an empty workbook with no worksheets
    pub fn empty() -> Self {
        Self {
            name: None,
            worksheets: Vec::new(),
            named_ranges: NamedRangeCollection::new(),
            external_links: Vec::new(),
        }
    }

    /// Create a workbook with one worksheet and a name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut wb = Self::new();
        wb.name = Some(name.into());
        wb
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Get the number of worksheets
    pub fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    /// Check if the workbook has no worksheets
    pub fn is_empty(&self) -> bool {
        self.worksheets.is_empty()
    }

    /// Get a worksheet by index
    pub fn worksheet(&self, index: usize) -> Option<&Worksheet> {
        self.worksheets.get(index)
    }

    /// Get a mutable worksheet by index
    pub fn worksheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.worksheets.get_mut(index)
    }

    /// Get the index of a worksheet by name, ignoring case
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.worksheets
            .iter()
            .position(|ws| ws.name().eq_ignore_ascii_case(name))
    }

    /// Iterate over all worksheets
    pub fn worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter()
    }

    /// Add a new worksheet with default name
    pub fn add_worksheet(&mut self) -> Result<usize> {
        let name = self.generate_sheet_name();
        self.add_worksheet_with_name(&name)
    }

    /// Add a new worksheet with specified name
    pub fn add_worksheet_with_name(&mut self, name: &str) -> Result<usize> {
        self.validate_sheet_name(name, None)?;

        let index = self.worksheets.len();
        self.worksheets.push(Worksheet::new(name));
        Ok(index)
    }

    /// Move a worksheet to a new position.
    ///
    /// Only the sheet order and sheet-scoped names are updated. Formulas
    /// holding sheet indices must be adjusted by the caller.
    pub fn move_worksheet(&mut self, from: usize, to: usize) -> Result<()> {
        let count = self.worksheets.len();
        if from >= count {
            return Err(Error::SheetOutOfBounds(from, count));
        }
        if to >= count {
            return Err(Error::SheetOutOfBounds(to, count));
        }

        let worksheet = self.worksheets.remove(from);
        self.worksheets.insert(to, worksheet);
        self.named_ranges
            .remap_sheet_scopes(|idx| moved_sheet_index(idx, from, to));
        Ok(())
    }

    /// Rename a worksheet
    pub fn rename_worksheet(&mut self, index: usize, new_name: &str) -> Result<()> {
        if index >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(index, self.worksheets.len()));
        }
        self.validate_sheet_name(new_name, Some(index))?;
        self.worksheets[index].set_name(new_name);
        Ok(())
    }

    // ==================== Named Ranges ====================

    /// Define a new workbook-scoped name and return its index
    ///
    /// # Example
    /// ```
    /// use duke_calc_core::Workbook;
    ///
    /// let mut wb = Workbook::new();
    /// wb.define_name("TaxRate", "Sheet1!$B$1").unwrap();
    /// ```
    pub fn define_name(&mut self, name: &str, refers_to: &str) -> Result<u32> {
        self.named_ranges
            .define(NamedRange::new(name, refers_to, NameScope::Workbook))
    }

    /// Define a sheet-scoped name and return its index
    pub fn define_name_for_sheet(
        &mut self,
        name: &str,
        refers_to: &str,
        sheet_index: usize,
    ) -> Result<u32> {
        if sheet_index >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(sheet_index, self.worksheets.len()));
        }
        self.named_ranges
            .define(NamedRange::new(name, refers_to, NameScope::Sheet(sheet_index)))
    }

    /// Get a named range by name, sheet scope first
    pub fn get_named_range(&self, name: &str, current_sheet: usize) -> Option<&NamedRange> {
        self.named_ranges.get(name, current_sheet)
    }

    pub fn named_ranges(&self) -> &NamedRangeCollection {
        &self.named_ranges
    }

    pub fn named_ranges_mut(&mut self) -> &mut NamedRangeCollection {
        &mut self.named_ranges
    }

    // ==================== External Links ====================

    /// Register a link to another workbook and return its index
    pub fn add_external_link(&mut self, link: ExternalLink) -> Result<u16> {
        if self.external_link_index(&link.workbook).is_some() {
            return Err(Error::DuplicateExternalLink(link.workbook));
        }
        let index = self.external_links.len() as u16;
        self.external_links.push(link);
        Ok(index)
    }

    /// Index of the link to `workbook`, ignoring case
    pub fn external_link_index(&self, workbook: &str) -> Option<u16> {
        self.external_links
            .iter()
            .position(|l| l.workbook.eq_ignore_ascii_case(workbook))
            .map(|i| i as u16)
    }

    pub fn external_link(&self, index: u16) -> Option<&ExternalLink> {
        self.external_links.get(index as usize)
    }

    pub fn external_links(&self) -> &[ExternalLink] {
        &self.external_links
    }

    // ==================== Helpers ====================

    fn validate_sheet_name(&self, name: &str, exclude_index: Option<usize>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidSheetName("Sheet name cannot be empty".into()));
        }
        if name.chars().count() > MAX_SHEET_NAME_LEN {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name too long (max {} characters)",
                MAX_SHEET_NAME_LEN
            )));
        }

        const INVALID_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];
        if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name cannot contain '{}'",
                c
            )));
        }

        let duplicate = self
            .worksheets
            .iter()
            .enumerate()
            .any(|(i, ws)| Some(i) != exclude_index && ws.name().eq_ignore_ascii_case(name));
        if duplicate {
            return Err(Error::DuplicateSheetName(name.into()));
        }
        Ok(())
    }

    fn generate_sheet_name(&self) -> String {
        let mut n = self.worksheets.len() + 1;
        loop {
            let name = format!("Sheet{}", n);
            if self.sheet_index(&name).is_none() {
                return name;
            }
            n += 1;
        }
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

/// New position of sheet `idx` after the sheet at `from` moved to `to`
pub fn moved_sheet_index(idx: usize, from: usize, to: usize) -> usize {
    if idx == from {
        to
    } else if from < to && idx > from && idx <= to {
        idx - 1
    } else if to < from && idx >= to && idx < from {
        idx + 1
    } else {
        idx
    }
}
