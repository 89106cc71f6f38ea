// Raw CSV reading. Every cell is read as text; typing happens later in
// `coerce_numeric`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::StatsError;
use crate::table::{Table, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvOptions {
    /// Lines to drop before the real header (grouped super-headers such as
    /// `,,,,Scoring,,,`).
    pub skip_rows: usize,
}

/// Logical table name for a source file: the lowercased file stem with
/// dashes replaced by underscores.
pub fn table_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase().replace('-', "_"))
        .unwrap_or_else(|| "table".to_string())
}

/// Read a CSV file into a raw table named after the file.
pub fn read_csv(path: &Path, options: &CsvOptions) -> Result<Table, StatsError> {
    let file = std::fs::File::open(path).map_err(|e| StatsError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    read_csv_from_reader(&table_name_for(path), file, options).map_err(|e| match e {
        ReadError::Csv(source) => StatsError::Csv {
            path: path.display().to_string(),
            source,
        },
        ReadError::Table(err) => err,
    })
}

/// Errors from the reader-based loader, before the path is known.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Table(#[from] StatsError),
}

/// Read CSV text from any reader. Exposed so callers and tests can load
/// in-memory data without temp files.
pub fn read_csv_from_reader<R: Read>(
    name: &str,
    rdr: R,
    options: &CsvOptions,
) -> Result<Table, ReadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(rdr);

    let mut records = reader.records().skip(options.skip_rows);

    let header = match records.next() {
        Some(record) => record?,
        None => {
            return Err(StatsError::schema(
                name,
                format!("no header row after skipping {} line(s)", options.skip_rows),
            )
            .into())
        }
    };
    let columns = header_names(header.iter());
    let width = columns.len();
    debug!("reading `{}` with {} columns", name, width);

    let mut table = Table::new(name, columns);
    for (line, result) in records.enumerate() {
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut row: Vec<Value> = record.iter().map(Value::from_cell).collect();
        if row.len() != width {
            warn!(
                "`{}` data row {} has {} fields, expected {}; padding/truncating",
                name,
                line + 1,
                row.len(),
                width
            );
            row.resize(width, Value::Missing);
        }
        table.push_row(row)?;
    }
    Ok(table)
}

/// Normalize raw header cells: trim, name blank cells `Unnamed: <index>`,
/// and suffix repeated names with `.1`, `.2`, ...
fn header_names<'a>(cells: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    cells
        .enumerate()
        .map(|(idx, cell)| {
            let trimmed = cell.trim();
            let base = if trimmed.is_empty() {
                format!("Unnamed: {idx}")
            } else {
                trimmed.to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{base}.{count}")
            };
            *count += 1;
            name
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
