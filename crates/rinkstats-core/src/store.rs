// Read-only access to the embedded SQLite store that bulk-imported CSV tables
// live in.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use tracing::debug;

use crate::error::StatsError;
use crate::table::{Table, Value};

/// Open the store at `db_path` read-only, read one table, and close it.
pub fn read_store_table(db_path: &Path, table: &str) -> Result<Table, StatsError> {
    let store_err = |source| StatsError::Store {
        path: db_path.display().to_string(),
        table: table.to_string(),
        source,
    };

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(store_err)?;

    let result = read_table(&conn, table);
    if let Err(e) = conn.close() {
        debug!("closing store {} failed: {}", db_path.display(), e.1);
    }
    result.map_err(|e| match e {
        TableReadError::Sql(source) => store_err(source),
        TableReadError::Structure(err) => err,
    })
}

enum TableReadError {
    Sql(rusqlite::Error),
    Structure(StatsError),
}

impl From<rusqlite::Error> for TableReadError {
    fn from(e: rusqlite::Error) -> Self {
        TableReadError::Sql(e)
    }
}

/// Table names become part of the SQL text, so only plain identifiers are
/// accepted.
fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `SELECT * FROM <table>` on an open connection.
fn read_table(conn: &Connection, table: &str) -> Result<Table, TableReadError> {
    if !is_plain_identifier(table) {
        return Err(TableReadError::Structure(StatsError::schema(
            table,
            "table names may only contain ASCII letters, digits, and underscores",
        )));
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
        params![table],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(TableReadError::Structure(StatsError::schema(
            table,
            "table not found in store",
        )));
    }

    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{table}\""))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(value_from_sql))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    debug!("read {} rows from store table `{}`", rows.len(), table);
    Table::from_rows(table, columns, rows).map_err(TableReadError::Structure)
}

fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Missing,
        ValueRef::Integer(i) => Value::Number(i as f64),
        ValueRef::Real(f) => Value::number(f),
        ValueRef::Text(bytes) => Value::from_cell(&String::from_utf8_lossy(bytes)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
