// Rendering of an enriched table to stdout as CSV or JSON records.

use std::io::Write;

use anyhow::Context;
use rinkstats_core::{Table, Value};
use serde_json::{Map, Number};

/// Write `table` as CSV with a header row. Missing values are empty cells.
pub fn write_csv<W: Write>(table: &Table, out: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(table.columns())
        .context("failed to write CSV header")?;
    for row in table.iter() {
        writer
            .write_record(row.values().iter().map(Value::to_string))
            .context("failed to write CSV row")?;
    }
    writer.flush().context("failed to flush CSV output")?;
    Ok(())
}

/// One JSON object per row, keyed by column name. Missing values become
/// `null`.
pub fn to_json(table: &Table) -> serde_json::Value {
    let records = table
        .iter()
        .map(|row| {
            let record: Map<String, serde_json::Value> = table
                .columns()
                .iter()
                .zip(row.values())
                .map(|(column, value)| (column.clone(), json_value(value)))
                .collect();
            serde_json::Value::Object(record)
        })
        .collect();
    serde_json::Value::Array(records)
}

pub fn write_json<W: Write>(table: &Table, mut out: W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut out, &to_json(table)).context("failed to write JSON")?;
    writeln!(out)?;
    Ok(())
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Missing => serde_json::Value::Null,
        Value::Text(text) => serde_json::Value::String(text.clone()),
        Value::Number(n) => Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
