// Turns a fetched Book into translation data: the "Text" sheet becomes an
// ordered key list with one string table per locale, every other sheet
// becomes typed constant declarations. Bad rows are marked, bad sheets are
// skipped; nothing in here aborts the run.

use std::collections::HashMap;

use crate::core::grid::escape;
use crate::core::locale::Locale;
use crate::core::report::RunLog;
use crate::core::sheet::{Book, Sheet};

/// Appended to a declaration's comment when its type or value is unusable.
/// Two leading spaces, matching the comment text consumers diff against.
const ERROR_MARK: &str = "  /// ERROR ///";

/// Name of the sheet carrying localized text.
const TEXT_SHEET: &str = "Text";

/// One key from the text sheet. Keys whose name starts with `//` are
/// comment keys: they keep their place in the list but carry no ordinal and
/// no translated strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextKey {
    pub name: String,
    /// 0-based position among non-comment keys; `None` for comment keys.
    pub ordinal: Option<usize>,
    pub comment: String,
}

impl TextKey {
    pub fn is_comment(&self) -> bool {
        self.ordinal.is_none()
    }
}

/// The parsed text sheet: keys in row order, and per locale one string per
/// non-comment key, aligned with the ordinals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextTable {
    pub keys: Vec<TextKey>,
    pub locales: Vec<Locale>,
    pub strings: HashMap<Locale, Vec<String>>,
}

/// One typed constant. `value` is the source-ready literal for valid
/// declarations and the raw cell text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDecl {
    pub name: String,
    pub ty: String,
    pub value: String,
    pub comment: String,
    pub valid: bool,
}

/// All declarations from one constant sheet, in row order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantSheet {
    pub name: String,
    pub declarations: Vec<ConstantDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedData {
    pub text: TextTable,
    pub constants: Vec<ConstantSheet>,
}

/// Parses the whole book. A missing or malformed text sheet yields an empty
/// text table (reported through the log); constant sheets are still parsed.
pub fn parse(book: &Book, log: &dyn RunLog) -> ParsedData {
    let text = book
        .sheet_with_columns(TEXT_SHEET, &["Key", "Comment"], log)
        .map(parse_text)
        .unwrap_or_default();

    let mut constants = Vec::new();
    for sheet in book.iter().filter(|s| s.name() != TEXT_SHEET) {
        if book
            .sheet_with_columns(sheet.name(), &["Key", "Type", "Value", "Comment"], log)
            .is_none()
        {
            continue;
        }
        constants.push(parse_constants(sheet));
    }

    ParsedData { text, constants }
}

fn parse_text(sheet: &Sheet) -> TextTable {
    // Callers have verified these columns exist.
    let key_col = sheet.index_of("Key").unwrap_or(0);
    let comment_col = sheet.index_of("Comment").unwrap_or(0);

    let locale_cols: Vec<(Locale, usize)> = sheet
        .header()
        .iter()
        .enumerate()
        .filter_map(|(col, header)| Locale::from_tag(header).map(|locale| (locale, col)))
        .collect();

    let mut keys = Vec::new();
    let mut strings: HashMap<Locale, Vec<String>> = locale_cols
        .iter()
        .map(|(locale, _)| (*locale, Vec::new()))
        .collect();

    let mut ordinal = 0usize;
    for row in sheet.rows() {
        let name = row.get(key_col).cloned().unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let comment = row.get(comment_col).cloned().unwrap_or_default();

        if name.starts_with("//") {
            keys.push(TextKey {
                name,
                ordinal: None,
                comment,
            });
            continue;
        }

        keys.push(TextKey {
            name,
            ordinal: Some(ordinal),
            comment,
        });
        ordinal += 1;

        // Blank cells become empty strings so every locale list stays
        // aligned with the ordinals.
        for (locale, col) in &locale_cols {
            if let Some(list) = strings.get_mut(locale) {
                list.push(row.get(*col).cloned().unwrap_or_default());
            }
        }
    }

    TextTable {
        keys,
        locales: locale_cols.into_iter().map(|(locale, _)| locale).collect(),
        strings,
    }
}

fn parse_constants(sheet: &Sheet) -> ConstantSheet {
    // Column presence was checked by the caller; select cannot fail here.
    let rows = sheet
        .select(&["Key", "Type", "Value", "Comment"])
        .unwrap_or_default();

    let declarations = rows
        .into_iter()
        .map(|row| {
            let mut cells = row.into_iter();
            let name = cells.next().unwrap_or_default();
            let ty = cells.next().unwrap_or_default();
            let raw = cells.next().unwrap_or_default();
            let mut comment = cells.next().unwrap_or_default();

            let coerced = coerce(&ty, &raw);
            let valid = coerced.is_some();
            if !valid {
                comment.push_str(ERROR_MARK);
            }

            ConstantDecl {
                name,
                ty,
                value: coerced.unwrap_or(raw),
                comment,
                valid,
            }
        })
        .collect();

    ConstantSheet {
        name: sheet.name().to_string(),
        declarations,
    }
}

/// Formats a cell as a literal of the declared type; `None` when the type is
/// unknown or the value does not parse. Type names match case-insensitively.
fn coerce(ty: &str, raw: &str) -> Option<String> {
    match ty.to_ascii_lowercase().as_str() {
        "int" => raw.parse::<i64>().ok().map(|v| v.to_string()),
        "float" => raw.parse::<f32>().ok().map(|v| format!("{v}f")),
        "string" => Some(format!("\"{}\"", escape(raw))),
        "bool" => match raw.to_ascii_lowercase().as_str() {
            "true" => Some("true".to_string()),
            "false" => Some("false".to_string()),
            _ => None,
        },
        _ => None,
    }
}
