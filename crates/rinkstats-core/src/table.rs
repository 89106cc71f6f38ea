// In-memory table model shared by the loader, the metric deriver, and the
// selection predicates.

use std::fmt;

use crate::error::StatsError;

/// Well-known column names of a normalized player table.
pub mod columns {
    pub const PLAYER: &str = "Player";
    pub const POS: &str = "Pos";
    pub const GP: &str = "GP";
    pub const G: &str = "G";
    pub const A: &str = "A";
    pub const CF: &str = "CF";
    pub const CA: &str = "CA";
    pub const FF: &str = "FF";
    pub const OZS: &str = "oZS%";
    pub const DZS: &str = "dZS%";
    pub const PTS: &str = "PTS";
    pub const CF60: &str = "CF60";
    pub const FF60: &str = "FF60";
    pub const CF_SHARE: &str = "CF_%";
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single cell. `Missing` never stands in for zero: aggregates skip it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Missing,
    Text(String),
    Number(f64),
}

impl Value {
    /// Build a value from a raw text cell. Whitespace is trimmed and blank
    /// cells become `Missing`.
    pub fn from_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Value::Missing
        } else {
            Value::Text(trimmed.to_string())
        }
    }

    /// Build a numeric value. NaN and infinities become `Missing`.
    pub fn number(v: f64) -> Self {
        if v.is_finite() {
            Value::Number(v)
        } else {
            Value::Missing
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text used to match this value as a join key. Missing and blank
    /// values never match anything.
    pub fn key_text(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            Value::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(_) => Some(self.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{}", *v as i64),
            Value::Number(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::number(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from_cell(s)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Value::Missing, Value::number)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// An ordered set of rows sharing one header. Every row holds exactly one
/// value per column.
///
/// Operations that change the row set or columns return a new table; a table
/// handed to a caller is never mutated behind its back.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given header.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from rows, checking that every row matches the header
    /// width.
    pub fn from_rows(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, StatsError> {
        let mut table = Self::new(name, columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Append a row. Fails with a schema error when the width is wrong.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), StatsError> {
        if row.len() != self.columns.len() {
            return Err(StatsError::Schema {
                table: self.name.clone(),
                message: format!(
                    "row has {} values but the header has {} columns",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Return a copy with `name` set to `values`, replacing an existing
    /// column of that name or appending a new one.
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> Result<Table, StatsError> {
        if values.len() != self.rows.len() {
            return Err(StatsError::Schema {
                table: self.name.clone(),
                message: format!(
                    "column `{name}` has {} values but the table has {} rows",
                    values.len(),
                    self.rows.len()
                ),
            });
        }

        let mut out = self.clone();
        match out.column_index(name) {
            Some(idx) => {
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                out.columns.push(name.to_string());
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(out)
    }

    /// Return a copy without the named column. Absent columns are a no-op.
    pub fn without_column(&self, name: &str) -> Table {
        let Some(idx) = self.column_index(name) else {
            return self.clone();
        };
        let mut out = self.clone();
        out.columns.remove(idx);
        for row in &mut out.rows {
            row.remove(idx);
        }
        out
    }

    /// Return a copy keeping only the rows for which `keep` returns true.
    pub fn filter_rows<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(Row<'_>) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|values| {
                keep(Row {
                    columns: &self.columns,
                    values,
                })
            })
            .cloned()
            .collect();
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows,
        }
    }

    pub(crate) fn into_parts(self) -> (String, Vec<String>, Vec<Vec<Value>>) {
        (self.name, self.columns, self.rows)
    }

    pub(crate) fn from_parts_unchecked(
        name: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Table {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Table {
            name,
            columns,
            rows,
        }
    }
}

/// Borrowed view of a single row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn text(&self, column: &str) -> Option<&'a str> {
        self.get(column).and_then(Value::as_text)
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
