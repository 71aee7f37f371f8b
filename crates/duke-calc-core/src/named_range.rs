//! Defined names
//!
//! A defined name maps an identifier to a formula, usually a reference such
//! as `Sheet1!$B$1`. Formulas refer to names by their index in the
//! collection, so indices stay stable: removing a name leaves a hole.

use ahash::AHashMap;

use crate::error::{Error, Result};

/// Scope of a defined name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Visible from every sheet
    Workbook,
    /// Visible from one sheet only, shadowing a workbook name of the same text
    Sheet(usize),
}

/// A defined name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRange {
    /// The name as written; lookups ignore case
    pub name: String,
    pub scope: NameScope,
    /// Formula text the name stands for, without a leading `=`
    pub refers_to: String,
    /// Optional comment/description for documentation
    pub comment: Option<String>,
}

impl NamedRange {
    /// Create a new defined name; a leading `=` on `refers_to` is dropped
    pub fn new(name: impl Into<String>, refers_to: impl Into<String>, scope: NameScope) -> Self {
        let refers_to = refers_to.into();
        let refers_to = match refers_to.strip_prefix('=') {
            Some(rest) => rest.to_string(),
            None => refers_to,
        };
        Self {
            name: name.into(),
            scope,
            refers_to,
            comment: None,
        }
    }

    /// Create a workbook-scoped name
    pub fn workbook_scope(name: impl Into<String>, refers_to: impl Into<String>) -> Self {
        Self::new(name, refers_to, NameScope::Workbook)
    }

    /// Create a sheet-scoped name
    pub fn sheet_scope(
        name: impl Into<String>,
        refers_to: impl Into<String>,
        sheet_index: usize,
    ) -> Self {
        Self::new(name, refers_to, NameScope::Sheet(sheet_index))
    }

    /// Set a comment for this name
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Defined names with stable indices and case-insensitive lookup
#[derive(Debug, Default, Clone)]
pub struct NamedRangeCollection {
    names: Vec<Option<NamedRange>>,
    index: AHashMap<(String, NameScope), u32>,
}

impl NamedRangeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, scope: NameScope) -> (String, NameScope) {
        (name.to_ascii_lowercase(), scope)
    }

    /// Define a new name and return its index
    pub fn define(&mut self, range: NamedRange) -> Result<u32> {
        if !is_valid_name(&range.name) {
            return Err(Error::InvalidName(range.name));
        }
        let key = Self::key(&range.name, range.scope);
        if self.index.contains_key(&key) {
            return Err(Error::InvalidName(format!(
                "'{}' already exists in this scope",
                range.name
            )));
        }
        let idx = self.names.len() as u32;
        self.names.push(Some(range));
        self.index.insert(key, idx);
        Ok(idx)
    }

    /// Index of the name visible from `current_sheet`: sheet scope first, then workbook
    pub fn find(&self, name: &str, current_sheet: usize) -> Option<u32> {
        self.index
            .get(&Self::key(name, NameScope::Sheet(current_sheet)))
            .or_else(|| self.index.get(&Self::key(name, NameScope::Workbook)))
            .copied()
    }

    /// Name visible from `current_sheet`
    pub fn get(&self, name: &str, current_sheet: usize) -> Option<&NamedRange> {
        self.find(name, current_sheet).and_then(|i| self.by_index(i))
    }

    /// Name by index
    pub fn by_index(&self, index: u32) -> Option<&NamedRange> {
        self.names.get(index as usize).and_then(Option::as_ref)
    }

    /// Replace the formula of the name at `index`. Returns `false` for a hole.
    pub fn set_refers_to(&mut self, index: u32, refers_to: &str) -> bool {
        match self.names.get_mut(index as usize).and_then(Option::as_mut) {
            Some(range) => {
                let refers_to = refers_to.strip_prefix('=').unwrap_or(refers_to);
                range.refers_to = refers_to.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a name; its index is never reused
    pub fn remove(&mut self, name: &str, scope: NameScope) -> Option<NamedRange> {
        let idx = self.index.remove(&Self::key(name, scope))?;
        self.names.get_mut(idx as usize).and_then(Option::take)
    }

    /// Rewrite the sheet index of every sheet-scoped name
    pub fn remap_sheet_scopes(&mut self, f: impl Fn(usize) -> usize) {
        self.index.clear();
        for (i, slot) in self.names.iter_mut().enumerate() {
            if let Some(range) = slot {
                if let NameScope::Sheet(sheet) = range.scope {
                    range.scope = NameScope::Sheet(f(sheet));
                }
                self.index
                    .insert(Self::key(&range.name, range.scope), i as u32);
            }
        }
    }

    /// Iterate over live names with their indices
    pub fn iter(&self) -> impl Iterator<Item = (u32, &NamedRange)> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (i as u32, n)))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Names start with a letter, `_` or `\` and continue with letters, digits, `_`, `.` or `\`
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '\\' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '\\'))
}
