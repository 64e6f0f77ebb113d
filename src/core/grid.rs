// Containers for the raw spreadsheet payloads: a rectangular grid of cell
// strings and a flat catalog of scalars. The remote service speaks a fixed,
// very small JSON dialect (array-of-arrays of strings, flat arrays of
// strings or integers), so the decoders are written by hand instead of going
// through a derive-based deserializer.

use thiserror::Error;

/// Errors raised while decoding or constructing a container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("rows have unequal lengths")]
    Ragged,
}

// ============================================================================
// CELL TEXT ESCAPING
// ============================================================================

/// Escapes control characters, quotes, and backslashes for embedding a cell
/// value in a quoted literal. The table is the wire contract for
/// [`Grid::to_json`] and for generated string constants.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\u{0B}' => out.push_str("\\v"),
            '\u{0C}' => out.push_str("\\f"),
            '\u{08}' => out.push_str("\\b"),
            '\0' => out.push_str("\\0"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape`]. Not applied automatically when reading JSON (the
/// string scanner already decodes escapes); available for callers that carry
/// escaped text in plain strings.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some('f') => out.push('\u{0C}'),
            Some('b') => out.push('\u{08}'),
            Some('0') => out.push('\0'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                // Unknown escape: keep it verbatim rather than guessing.
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ============================================================================
// GRID
// ============================================================================

/// A rectangular matrix of cell strings, the raw form of one sheet.
///
/// All rows have the same length; that invariant is checked on construction
/// and preserved by the mutators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    /// A grid of the given dimensions filled with empty cells.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows: vec![vec![String::new(); cols]; rows],
        }
    }

    /// Wraps pre-built rows, validating that they form a rectangle.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Result<Self, GridError> {
        if let Some(first) = rows.first() {
            let width = first.len();
            if rows.iter().any(|r| r.len() != width) {
                return Err(GridError::Ragged);
            }
        }
        Ok(Self { rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.row_count() * self.col_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Sets a cell; returns false when the index is out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: impl Into<String>) -> bool {
        match self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = value.into();
                true
            }
            None => false,
        }
    }

    pub fn row(&self, row: usize) -> Option<&[String]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    /// Lazy row-major traversal of every cell. Restartable: each call yields
    /// a fresh iterator.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().flatten().map(String::as_str)
    }

    /// Serializes to the array-of-arrays wire form, escaping each cell per
    /// the [`escape`] table.
    pub fn to_json(&self) -> String {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<String> =
                    row.iter().map(|c| format!("\"{}\"", escape(c))).collect();
                format!("[ {} ]", cells.join(", "))
            })
            .collect();
        format!("[ {} ]", rows.join(", "))
    }

    /// Decodes the array-of-arrays wire form produced by the remote service
    /// (or by [`Grid::to_json`]).
    pub fn from_json(json: &str) -> Result<Self, GridError> {
        let mut scanner = Scanner::new(json);
        let rows = scanner.parse_grid()?;
        scanner.expect_end()?;
        Self::from_rows(rows)
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// An ordered list of scalars; the remote service returns one of sheet names
/// and one of sheet identifiers, matched index-for-index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Catalog<T> {
    values: Vec<T>,
}

impl<T> Catalog<T> {
    pub fn from_values(values: Vec<T>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.values.iter()
    }
}

impl<T: PartialEq> Catalog<T> {
    /// Linear search; `None` when the item is absent.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.values.iter().position(|v| v == item)
    }
}

impl Catalog<String> {
    pub fn from_json(json: &str) -> Result<Self, GridError> {
        let mut scanner = Scanner::new(json);
        let values = scanner.parse_string_array()?;
        scanner.expect_end()?;
        Ok(Self { values })
    }

    pub fn to_json(&self) -> String {
        let items: Vec<String> = self
            .values
            .iter()
            .map(|v| format!("\"{}\"", escape(v)))
            .collect();
        format!("[ {} ]", items.join(", "))
    }
}

impl Catalog<i64> {
    pub fn from_json(json: &str) -> Result<Self, GridError> {
        let mut scanner = Scanner::new(json);
        let values = scanner.parse_int_array()?;
        scanner.expect_end()?;
        Ok(Self { values })
    }

    pub fn to_json(&self) -> String {
        let items: Vec<String> = self.values.iter().map(i64::to_string).collect();
        format!("[ {} ]", items.join(", "))
    }
}

// ============================================================================
// WIRE SCANNER
// ============================================================================

/// Minimal recursive-descent scanner for the two payload shapes this crate
/// consumes. Decodes standard JSON string escapes plus the extended set from
/// [`escape`] (`\v` and `\0`), so a grid round-trips cell-for-cell.
struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(' ' | '\t' | '\r' | '\n')) {
            self.chars.next();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), GridError> {
        self.skip_ws();
        match self.chars.next() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(GridError::Malformed(format!(
                "expected '{expected}', found '{ch}'"
            ))),
            None => Err(GridError::Malformed(format!(
                "expected '{expected}', found end of input"
            ))),
        }
    }

    fn expect_end(&mut self) -> Result<(), GridError> {
        self.skip_ws();
        match self.chars.next() {
            None => Ok(()),
            Some(ch) => Err(GridError::Malformed(format!(
                "trailing content starting at '{ch}'"
            ))),
        }
    }

    fn parse_string(&mut self) -> Result<String, GridError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(GridError::Malformed("unterminated string".into())),
                Some('"') => return Ok(out),
                Some('\\') => out.push(self.parse_escape()?),
                Some(ch) => out.push(ch),
            }
        }
    }

    fn parse_escape(&mut self) -> Result<char, GridError> {
        match self.chars.next() {
            Some('r') => Ok('\r'),
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('v') => Ok('\u{0B}'),
            Some('f') => Ok('\u{0C}'),
            Some('b') => Ok('\u{08}'),
            Some('0') => Ok('\0'),
            Some('"') => Ok('"'),
            Some('\\') => Ok('\\'),
            Some('/') => Ok('/'),
            Some('u') => self.parse_unicode_escape(),
            Some(other) => Err(GridError::Malformed(format!("unknown escape '\\{other}'"))),
            None => Err(GridError::Malformed("unterminated escape".into())),
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char, GridError> {
        let high = self.parse_hex4()?;
        // Surrogate pair: a high surrogate must be followed by \uDC00..DFFF.
        if (0xD800..0xDC00).contains(&high) {
            if self.chars.next() != Some('\\') || self.chars.next() != Some('u') {
                return Err(GridError::Malformed("unpaired surrogate".into()));
            }
            let low = self.parse_hex4()?;
            if !(0xDC00..0xE000).contains(&low) {
                return Err(GridError::Malformed("invalid low surrogate".into()));
            }
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(code)
                .ok_or_else(|| GridError::Malformed("invalid surrogate pair".into()));
        }
        char::from_u32(high).ok_or_else(|| GridError::Malformed("invalid \\u escape".into()))
    }

    fn parse_hex4(&mut self) -> Result<u32, GridError> {
        let mut value = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| GridError::Malformed("bad hex digit in \\u escape".into()))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn parse_int(&mut self) -> Result<i64, GridError> {
        self.skip_ws();
        let mut text = String::new();
        if self.chars.peek() == Some(&'-') {
            text.push(self.chars.next().unwrap_or('-'));
        }
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
            // peek guarantees the next char exists
            if let Some(digit) = self.chars.next() {
                text.push(digit);
            }
        }
        text.parse::<i64>()
            .map_err(|_| GridError::Malformed(format!("expected integer, found '{text}'")))
    }

    /// Parses `[ item, item, … ]` with the given item parser.
    fn parse_array<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, GridError>,
    ) -> Result<Vec<T>, GridError> {
        self.expect('[')?;
        let mut values = Vec::new();
        self.skip_ws();
        if self.chars.peek() == Some(&']') {
            self.chars.next();
            return Ok(values);
        }
        loop {
            values.push(item(self)?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(']') => return Ok(values),
                Some(ch) => {
                    return Err(GridError::Malformed(format!(
                        "expected ',' or ']', found '{ch}'"
                    )))
                }
                None => return Err(GridError::Malformed("unterminated array".into())),
            }
        }
    }

    fn parse_string_array(&mut self) -> Result<Vec<String>, GridError> {
        self.parse_array(|s| {
            s.skip_ws();
            s.parse_string()
        })
    }

    fn parse_int_array(&mut self) -> Result<Vec<i64>, GridError> {
        self.parse_array(Self::parse_int)
    }

    fn parse_grid(&mut self) -> Result<Vec<Vec<String>>, GridError> {
        self.parse_array(|s| {
            s.skip_ws();
            s.parse_string_array()
        })
    }
}
