// A `Sheet` is a named grid with a discovered key row; a `Book` is the
// ordered collection of sheets fetched in one run. Sheets that lack a key
// row cannot be constructed, so every sheet inside a `Book` is usable.

use std::collections::HashMap;

use thiserror::Error;

use crate::core::grid::Grid;
use crate::core::report::RunLog;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetError {
    #[error("sheet '{0}' has no key row")]
    NoKeyRow(String),

    #[error("sheet '{sheet}' is missing the '{column}' column")]
    MissingColumn { sheet: String, column: String },
}

/// One tab of the remote document.
///
/// The key row is the first (topmost) row containing a cell that is exactly
/// `"Key"`; everything above it is treated as preamble and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    id: i64,
    name: String,
    grid: Grid,
    key_row: usize,
}

impl Sheet {
    pub fn new(id: i64, name: impl Into<String>, grid: Grid) -> Result<Self, SheetError> {
        let name = name.into();
        let key_row = (0..grid.row_count())
            .find(|&r| {
                grid.row(r)
                    .is_some_and(|row| row.iter().any(|c| c.as_str() == "Key"))
            })
            .ok_or_else(|| SheetError::NoKeyRow(name.clone()))?;
        Ok(Self {
            id,
            name,
            grid,
            key_row,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn key_row(&self) -> usize {
        self.key_row
    }

    /// The key row itself: the column headers for this sheet.
    pub fn header(&self) -> &[String] {
        self.grid.row(self.key_row).unwrap_or(&[])
    }

    /// Case-sensitive position of a column header within the key row.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.header().iter().position(|c| c.as_str() == column)
    }

    pub fn has_columns(&self, columns: &[&str]) -> bool {
        columns.iter().all(|c| self.index_of(c).is_some())
    }

    /// Data rows, i.e. every row below the key row.
    pub fn rows(&self) -> impl Iterator<Item = &[String]> + '_ {
        (self.key_row + 1..self.grid.row_count()).filter_map(|r| self.grid.row(r))
    }

    /// Extracts the named columns from every data row whose first named
    /// column is non-empty, in row order.
    pub fn select(&self, columns: &[&str]) -> Result<Vec<Vec<String>>, SheetError> {
        let indexes: Vec<usize> = columns
            .iter()
            .map(|c| {
                self.index_of(c).ok_or_else(|| SheetError::MissingColumn {
                    sheet: self.name.clone(),
                    column: (*c).to_string(),
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(self
            .rows()
            .filter(|row| {
                indexes
                    .first()
                    .and_then(|&i| row.get(i))
                    .is_some_and(|cell| !cell.is_empty())
            })
            .map(|row| {
                indexes
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or_default())
                    .collect()
            })
            .collect())
    }
}

/// All sheets fetched in one run, preserving fetch order.
#[derive(Debug, Clone, Default)]
pub struct Book {
    names: Vec<String>,
    sheets: HashMap<String, Sheet>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sheet; a sheet with the same name replaces the earlier one
    /// without changing its position.
    pub fn insert(&mut self, sheet: Sheet) {
        let name = sheet.name().to_string();
        if self.sheets.insert(name.clone(), sheet).is_none() {
            self.names.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Sheet> {
        self.sheets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sheets.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sheet> + '_ {
        self.names.iter().filter_map(|n| self.sheets.get(n))
    }

    /// Looks up a sheet and verifies it carries the given columns. Both
    /// failure modes are reported through the log and yield `None`; callers
    /// skip the sheet rather than aborting the run.
    pub fn sheet_with_columns(
        &self,
        name: &str,
        columns: &[&str],
        log: &dyn RunLog,
    ) -> Option<&Sheet> {
        let Some(sheet) = self.get(name) else {
            log.error(&format!("sheet '{name}' not found"));
            return None;
        };
        for column in columns {
            if sheet.index_of(column).is_none() {
                log.error(&format!("sheet '{name}' is missing the '{column}' column"));
                return None;
            }
        }
        Some(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::MemoryLog;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn text_sheet() -> Sheet {
        Sheet::new(
            7,
            "Text",
            grid(&[
                &["memo above the table", "", ""],
                &["Key", "English", "Comment"],
                &["Welcome", "Hello", "greeting"],
                &["", "orphan", ""],
                &["//Note", "section", "marker"],
            ]),
        )
        .unwrap()
    }

    #[test]
    fn key_row_is_the_topmost_matching_row() {
        let sheet = text_sheet();
        assert_eq!(sheet.key_row(), 1);
        assert_eq!(sheet.header(), ["Key", "English", "Comment"]);
    }

    #[test]
    fn sheet_without_key_row_is_rejected() {
        let result = Sheet::new(0, "Broken", grid(&[&["a", "b"], &["c", "d"]]));
        assert_eq!(result, Err(SheetError::NoKeyRow("Broken".into())));
    }

    #[test]
    fn column_lookup_is_case_sensitive() {
        let sheet = text_sheet();
        assert_eq!(sheet.index_of("English"), Some(1));
        assert_eq!(sheet.index_of("english"), None);
        assert!(sheet.has_columns(&["Key", "Comment"]));
        assert!(!sheet.has_columns(&["Key", "Value"]));
    }

    #[test]
    fn select_skips_rows_with_empty_first_column() {
        let sheet = text_sheet();
        let rows = sheet.select(&["Key", "English"]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Welcome".to_string(), "Hello".to_string()]);
        assert_eq!(rows[1], vec!["//Note".to_string(), "section".to_string()]);
    }

    #[test]
    fn select_reports_the_missing_column() {
        let sheet = text_sheet();
        assert_eq!(
            sheet.select(&["Key", "Value"]),
            Err(SheetError::MissingColumn {
                sheet: "Text".into(),
                column: "Value".into(),
            })
        );
    }

    #[test]
    fn book_preserves_insertion_order() {
        let mut book = Book::new();
        book.insert(text_sheet());
        book.insert(
            Sheet::new(2, "Const", grid(&[&["Key", "Type", "Value", "Comment"]])).unwrap(),
        );
        assert_eq!(book.names(), ["Text", "Const"]);
        assert!(book.contains("Const"));
        assert!(!book.contains("Admin"));
        let ids: Vec<i64> = book.iter().map(Sheet::id).collect();
        assert_eq!(ids, [7, 2]);
    }

    #[test]
    fn duplicate_insert_replaces_in_place() {
        let mut book = Book::new();
        book.insert(text_sheet());
        book.insert(Sheet::new(9, "Text", grid(&[&["Key", "Japanese"]])).unwrap());
        assert_eq!(book.len(), 1);
        assert_eq!(book.get("Text").map(Sheet::id), Some(9));
    }

    #[test]
    fn sheet_with_columns_logs_and_skips_on_failure() {
        let mut book = Book::new();
        book.insert(text_sheet());
        let log = MemoryLog::default();

        assert!(book.sheet_with_columns("Text", &["Key", "Comment"], &log).is_some());
        assert!(book.sheet_with_columns("Missing", &["Key"], &log).is_none());
        assert!(book.sheet_with_columns("Text", &["Key", "Value"], &log).is_none());

        let errors = log.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("Missing"));
        assert!(errors[1].contains("'Value'"));
    }
}
