//! Tabular dataset model
//!
//! Datasets are simple comma-separated files with a header row and no
//! quoting. Cells are kept as text so that rows nobody touched serialize back
//! to exactly the bytes they were read from.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Parsed CSV dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    line_ending: LineEnding,
    trailing_newline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

impl Table {
    /// Build a table from a header and rows
    #[must_use]
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            header,
            rows,
            line_ending: LineEnding::Lf,
            trailing_newline: true,
        }
    }

    /// Parse CSV text
    ///
    /// # Errors
    /// Returns [`TableError::Empty`] if there is no header line.
    pub fn parse(text: &str) -> Result<Self, TableError> {
        let line_ending = if text.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };
        let trailing_newline = text.ends_with('\n');
        let mut lines = text.lines();
        let header = match lines.next() {
            Some(h) if !h.trim().is_empty() => split(h),
            _ => return Err(TableError::Empty),
        };
        let rows = lines.map(split).collect();
        Ok(Self {
            header,
            rows,
            line_ending,
            trailing_newline,
        })
    }

    /// Read and parse a CSV file
    ///
    /// # Errors
    /// Returns [`TableError::Io`] on read failure or any [`Table::parse`] error.
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Serialize back to CSV bytes
    #[must_use]
    pub fn to_csv(&self) -> String {
        let eol = self.line_ending.as_str();
        let mut out = self.header.join(",");
        for row in &self.rows {
            out.push_str(eol);
            out.push_str(&row.join(","));
        }
        if self.trailing_newline {
            out.push_str(eol);
        }
        out
    }

    /// Column names
    #[inline]
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Data rows (header excluded)
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Mutable access to data rows
    #[inline]
    pub fn rows_mut(&mut self) -> &mut Vec<Vec<String>> {
        &mut self.rows
    }

    /// Number of data rows
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the header
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// Index of a named column
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Columns whose every non-empty cell parses as a number
    #[must_use]
    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.column_count())
            .filter(|&col| {
                let mut seen = false;
                for row in &self.rows {
                    match row.get(col).map(String::as_str) {
                        Some("") | None => {}
                        Some(cell) if cell.parse::<f64>().is_ok() => seen = true,
                        Some(_) => return false,
                    }
                }
                seen
            })
            .collect()
    }

    /// Parse one cell as a number
    #[must_use]
    pub fn numeric(&self, row: usize, col: usize) -> Option<f64> {
        self.rows.get(row)?.get(col)?.parse().ok()
    }

    /// Rows containing an empty cell
    #[must_use]
    pub fn rows_with_missing(&self, marker: &str) -> usize {
        self.rows
            .iter()
            .filter(|row| row.iter().any(|c| c == marker))
            .count()
    }

    /// Drop rows that contain `marker` and exact duplicate rows
    ///
    /// Returns the number of rows removed.
    pub fn clean(&mut self, marker: &str) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows
            .retain(|row| !row.iter().any(|c| c == marker) && seen.insert(row.clone()));
        before - self.rows.len()
    }

    /// Structural sanity check
    ///
    /// # Errors
    /// Returns [`TableError::Ragged`] if any row's width differs from the
    /// header, or [`TableError::Empty`] if the header has no columns.
    pub fn integrity(&self) -> Result<(), TableError> {
        if self.header.is_empty() || self.header.iter().all(String::is_empty) {
            return Err(TableError::Empty);
        }
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.header.len() {
                return Err(TableError::Ragged {
                    row: idx + 1,
                    expected: self.header.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }

    /// Number of row positions at which two tables differ
    ///
    /// Rows present in only one table count as differing.
    #[must_use]
    pub fn differing_rows(&self, other: &Self) -> usize {
        let common = self.rows.len().min(other.rows.len());
        let changed = (0..common)
            .filter(|&i| self.rows[i] != other.rows[i])
            .count();
        changed + self.rows.len().max(other.rows.len()) - common
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv())
    }
}

fn split(line: &str) -> Vec<String> {
    line.split(',').map(str::to_string).collect()
}

/// Errors from reading or validating a table
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// No header row
    #[error("table has no header")]
    Empty,

    /// Row width differs from header width
    #[error("row {row} has {actual} cells, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// IO error reading a table
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
