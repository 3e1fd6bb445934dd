//! Minimal CSV reading/writing for configuration tables, portal exports,
//! and published manifests. Quote- and CRLF-tolerant, std-only.

use std::collections::HashMap;
use std::io::{self, Write};
use std::mem::take;

/// Parse CSV text into rows of fields. Handles quoted fields, doubled-quote
/// escapes, and CRLF line endings. Fully blank lines are dropped.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next(); // double-quote escape
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                row.push(take(&mut field));
            }
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    // Flush the trailing field/row even if the final line lacks a newline.
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// A header-indexed view over parsed rows, for tables addressed by column
/// name (rule files, rosters, exports). Header lookups are exact after
/// trimming; extra columns are simply never asked for.
pub struct Table {
    columns: HashMap<String, usize>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Treat the first parsed row as a header. Returns None for empty input.
    pub fn from_text(text: &str) -> Option<Self> {
        let mut rows = parse_rows(text);
        if rows.is_empty() {
            return None;
        }
        let header = rows.remove(0);
        let columns = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Some(Self { columns, rows })
    }

    /// True if the header declared this column.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Cell value for `name` in `row`, trimmed. Missing column or short row
    /// yields None.
    pub fn get<'a>(&self, row: &'a [String], name: &str) -> Option<&'a str> {
        let idx = *self.columns.get(name)?;
        row.get(idx).map(|s| s.trim())
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row to any writer, quoting only where required.
pub fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}

/// Render header + rows to one CSV string.
pub fn to_csv_string(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = Vec::new();
    // Writing to a Vec<u8> cannot fail.
    let _ = write_row(&mut out, header);
    for row in rows {
        let _ = write_row(&mut out, row);
    }
    String::from_utf8(out).unwrap_or_default()
}
