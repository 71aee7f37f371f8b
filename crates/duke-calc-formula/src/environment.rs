//! Collaborating workbooks
//!
//! Several workbooks can be evaluated together so that formulas in one can
//! read cells of another through external references such as
//! `[Prices.xlsx]Sheet1!A1`. They share one evaluation cache, which keeps
//! dependency tracking correct across workbook boundaries.

use std::sync::Arc;

use crate::error::{FormulaError, FormulaResult};
use crate::evaluator::WorkbookEvaluator;
use crate::functions::FunctionRegistry;
use crate::workbook::EvaluationWorkbook;

/// Names of the workbooks evaluated together, in book index order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollaboratingWorkbooksEnvironment {
    names: Vec<String>,
}

impl CollaboratingWorkbooksEnvironment {
    pub fn new<S: AsRef<str>>(names: &[S]) -> FormulaResult<Self> {
        let mut env = Self::default();
        for name in names {
            let name = name.as_ref();
            if env.book_index(name).is_some() {
                return Err(FormulaError::DuplicateWorkbookName(name.to_string()));
            }
            env.names.push(name.to_string());
        }
        Ok(env)
    }

    /// Book index of a workbook, matched without regard to case
    pub fn book_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Join evaluators into one that evaluates all of their workbooks together.
///
/// The first member becomes book 0 and lends its function registry and
/// options to the result. A member that already spans an environment brings
/// all of its books, the secondary ones under the names they had there.
/// At most one member may carry a listener; it listens to the whole
/// environment. Every cached value is discarded.
pub fn setup_environment<W: EvaluationWorkbook>(
    members: Vec<(String, WorkbookEvaluator<W>)>,
) -> FormulaResult<WorkbookEvaluator<W>> {
    let mut names = Vec::with_capacity(members.len());
    let mut books = Vec::with_capacity(members.len());
    let mut shared: Option<(Arc<FunctionRegistry>, _)> = None;
    let mut listener = None;
    for (name, evaluator) in members {
        let parts = evaluator.into_parts();
        for (index, book) in parts.books.into_iter().enumerate() {
            let book_name = match index {
                0 => name.clone(),
                _ => parts
                    .environment
                    .name(index)
                    .ok_or_else(|| {
                        FormulaError::internal(format!("book {index} of '{name}' has no name"))
                    })?
                    .to_string(),
            };
            names.push(book_name);
            books.push(book);
        }
        if let Some(member_listener) = parts.listener {
            if listener.replace(member_listener).is_some() {
                return Err(FormulaError::ConflictingListeners);
            }
        }
        shared.get_or_insert((parts.registry, parts.options));
    }
    let Some((registry, options)) = shared else {
        return Err(FormulaError::EmptyEnvironment);
    };
    let environment = CollaboratingWorkbooksEnvironment::new(&names)?;

    log::debug!(
        "evaluation environment set up with {} workbooks: {}",
        environment.len(),
        names_list(&environment)
    );
    let mut evaluator = WorkbookEvaluator::from_parts(books, environment, registry, options);
    evaluator.set_listener(listener);
    Ok(evaluator)
}

fn names_list(env: &CollaboratingWorkbooksEnvironment) -> String {
    (0..env.len())
        .filter_map(|i| env.name(i))
        .collect::<Vec<_>>()
        .join(", ")
}

impl<W: EvaluationWorkbook> WorkbookEvaluator<W> {
    /// Book index of a workbook in this evaluator's environment
    pub fn book_index(&self, name: &str) -> FormulaResult<usize> {
        self.environment()
            .book_index(name)
            .ok_or_else(|| FormulaError::UnknownWorkbook(name.to_string()))
    }
}
