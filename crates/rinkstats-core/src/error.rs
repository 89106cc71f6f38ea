// Structural error kinds raised by the loader and the pipeline.
//
// Value-level parse failures are not here: they are recovered in place as
// missing values and reported through `loader::CoerceReport`.

use std::fmt;

use thiserror::Error;

/// Which side of a join an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Primary,
    Secondary,
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSide::Primary => f.write_str("primary"),
            JoinSide::Secondary => f.write_str("secondary"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StatsError {
    /// A required column or positional index is absent from a table, or a
    /// mapping does not fit the table's actual shape.
    #[error("schema error in `{table}`: {message}")]
    Schema { table: String, message: String },

    #[error("join key `{key}` is missing from {side} table `{table}`")]
    MergeKey {
        key: String,
        side: JoinSide,
        table: String,
    },

    /// A filter or merge left no rows. Callers may treat this as a notice
    /// rather than a failure.
    #[error("{operation} left no rows in `{table}`")]
    EmptyResult { operation: String, table: String },

    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("store error reading `{table}` from {path}: {source}")]
    Store {
        path: String,
        table: String,
        source: rusqlite::Error,
    },
}

impl StatsError {
    pub(crate) fn schema(table: &str, message: impl Into<String>) -> Self {
        StatsError::Schema {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// True for errors the caller can surface as a notice and keep going.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, StatsError::EmptyResult { .. })
    }
}
