// Loader: column normalization, numeric coercion, merging, and row filters.
//
// Every operation takes a table by reference and returns a new one. Only
// structural problems (absent columns, absent join keys, mappings that do
// not fit) are errors; unparsable cells become missing values.

pub mod schema;
pub mod source;

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{JoinSide, StatsError};
use crate::table::{Table, Value};

pub use schema::{ColumnMapping, ColumnRef, ColumnRule};
pub use source::{read_csv, read_csv_from_reader, table_name_for, CsvOptions, ReadError};

// ---------------------------------------------------------------------------
// normalize_columns
// ---------------------------------------------------------------------------

/// Rename columns by header text or position.
///
/// Fails when a named column is absent, a positional index is out of range,
/// two rules hit the same source column, two rules share a target, or a
/// target would collide with an unmapped column.
pub fn normalize_columns(table: &Table, mapping: &ColumnMapping) -> Result<Table, StatsError> {
    let mut resolved: Vec<(usize, &str)> = Vec::with_capacity(mapping.rules().len());
    let mut used_sources = HashSet::new();
    let mut used_targets = HashSet::new();

    for rule in mapping.rules() {
        let idx = match &rule.source {
            ColumnRef::Name(name) => table.column_index(name).ok_or_else(|| {
                StatsError::schema(
                    table.name(),
                    format!(
                        "column `{name}` not found (columns: {})",
                        table.columns().join(", ")
                    ),
                )
            })?,
            ColumnRef::Index(idx) => {
                if *idx >= table.columns().len() {
                    return Err(StatsError::schema(
                        table.name(),
                        format!(
                            "positional index {idx} is out of range for {} columns",
                            table.columns().len()
                        ),
                    ));
                }
                *idx
            }
        };
        if !used_sources.insert(idx) {
            return Err(StatsError::schema(
                table.name(),
                format!("column {} is mapped more than once", rule.source),
            ));
        }
        if !used_targets.insert(rule.target.as_str()) {
            return Err(StatsError::schema(
                table.name(),
                format!("target `{}` is produced by more than one rule", rule.target),
            ));
        }
        resolved.push((idx, rule.target.as_str()));
    }

    let (name, mut columns, rows) = table.clone().into_parts();

    if mapping.selects_mapped() {
        let columns = resolved.iter().map(|(_, to)| to.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|row| resolved.iter().map(|(idx, _)| row[*idx].clone()).collect())
            .collect();
        return Ok(Table::from_parts_unchecked(name, columns, rows));
    }

    for (idx, column) in columns.iter().enumerate() {
        if !used_sources.contains(&idx) && used_targets.contains(column.as_str()) {
            return Err(StatsError::schema(
                &name,
                format!("rename target `{column}` collides with an unmapped column"),
            ));
        }
    }
    for (idx, to) in &resolved {
        columns[*idx] = to.to_string();
    }
    Ok(Table::from_parts_unchecked(name, columns, rows))
}

/// Fail with one schema error naming every absent column.
pub fn require_columns<S: AsRef<str>>(table: &Table, required: &[S]) -> Result<(), StatsError> {
    let absent: Vec<&str> = required
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| !table.has_column(c))
        .collect();
    if absent.is_empty() {
        Ok(())
    } else {
        Err(StatsError::schema(
            table.name(),
            format!("required column(s) absent: {}", absent.join(", ")),
        ))
    }
}

// ---------------------------------------------------------------------------
// coerce_numeric
// ---------------------------------------------------------------------------

/// A cell that could not be read as a number. Recovered locally: the cell
/// becomes missing and the failure is recorded in a `CoerceReport`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot parse `{raw}` as a number in column `{column}` (row {row})")]
pub struct ParseError {
    pub column: String,
    pub row: usize,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoerceReport {
    pub failures: Vec<ParseError>,
}

impl CoerceReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure counts per column.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.column.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Parse a text cell as a number. A trailing `%` is accepted.
fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the listed columns as numbers. Unparsable cells become missing,
/// never zero. A listed column absent from the table is a schema error.
pub fn coerce_numeric<S: AsRef<str>>(
    table: &Table,
    columns: &[S],
) -> Result<(Table, CoerceReport), StatsError> {
    require_columns(table, columns)?;
    let indices: Vec<(usize, &str)> = columns
        .iter()
        .map(|c| {
            let c = c.as_ref();
            // require_columns above guarantees presence.
            (table.column_index(c).unwrap_or_default(), c)
        })
        .collect();

    let (name, header, mut rows) = table.clone().into_parts();
    let mut report = CoerceReport::default();

    for (row_idx, row) in rows.iter_mut().enumerate() {
        for &(col_idx, col_name) in &indices {
            let cell = &mut row[col_idx];
            let coerced = match &*cell {
                Value::Missing => Value::Missing,
                Value::Number(v) => Value::number(*v),
                Value::Text(raw) => match parse_number(raw) {
                    Some(v) => Value::Number(v),
                    None => {
                        report.failures.push(ParseError {
                            column: col_name.to_string(),
                            row: row_idx,
                            raw: raw.clone(),
                        });
                        Value::Missing
                    }
                },
            };
            *cell = coerced;
        }
    }

    for (column, count) in report.counts() {
        warn!(
            "`{}`: {} value(s) in column `{}` could not be parsed and are treated as missing",
            name, count, column
        );
    }

    Ok((Table::from_parts_unchecked(name, header, rows), report))
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Left-join `secondary` onto `primary` by the `on` column.
///
/// Every primary row appears exactly once in the result. Unmatched rows get
/// missing values for the secondary's columns. If the secondary repeats a
/// key the first occurrence wins. A secondary column whose name the primary
/// already uses is renamed `<column>_<secondary name>`.
pub fn merge(primary: &Table, secondary: &Table, on: &str) -> Result<Table, StatsError> {
    let primary_key = primary.column_index(on).ok_or_else(|| StatsError::MergeKey {
        key: on.to_string(),
        side: JoinSide::Primary,
        table: primary.name().to_string(),
    })?;
    let secondary_key = secondary
        .column_index(on)
        .ok_or_else(|| StatsError::MergeKey {
            key: on.to_string(),
            side: JoinSide::Secondary,
            table: secondary.name().to_string(),
        })?;

    let mut lookup: HashMap<String, usize> = HashMap::new();
    for (idx, row) in secondary.iter().enumerate() {
        let Some(key) = row.values()[secondary_key].key_text() else {
            continue;
        };
        if lookup.contains_key(&key) {
            warn!(
                "duplicate key '{}' in `{}`, keeping the first row",
                key,
                secondary.name()
            );
            continue;
        }
        lookup.insert(key, idx);
    }

    let carried: Vec<usize> = (0..secondary.columns().len())
        .filter(|&i| i != secondary_key)
        .collect();

    let mut columns = primary.columns().to_vec();
    for &i in &carried {
        let column = &secondary.columns()[i];
        if primary.has_column(column) {
            let renamed = format!("{column}_{}", secondary.name());
            if columns.contains(&renamed) || secondary.has_column(&renamed) {
                return Err(StatsError::schema(
                    secondary.name(),
                    format!(
                        "column `{column}` exists in both tables and its rename `{renamed}` is already taken"
                    ),
                ));
            }
            debug!(
                "column `{}` exists in both tables, secondary copy renamed `{}`",
                column, renamed
            );
            columns.push(renamed);
        } else {
            columns.push(column.clone());
        }
    }

    let mut seen_primary = HashSet::new();
    let mut matched = 0usize;
    let mut rows = Vec::with_capacity(primary.len());
    for row in primary.iter() {
        let key = row.values()[primary_key].key_text();
        if let Some(k) = &key {
            if !seen_primary.insert(k.clone()) {
                warn!("duplicate key '{}' in primary table `{}`", k, primary.name());
            }
        }

        let mut values = row.values().to_vec();
        match key.as_ref().and_then(|k| lookup.get(k)) {
            Some(&sec_idx) => {
                matched += 1;
                let sec_row = secondary.row(sec_idx).map(|r| r.values()).unwrap_or_default();
                values.extend(carried.iter().map(|&i| sec_row[i].clone()));
            }
            None => values.extend(carried.iter().map(|_| Value::Missing)),
        }
        rows.push(values);
    }

    debug!(
        "merged `{}` into `{}` on `{}`: {}/{} rows matched",
        secondary.name(),
        primary.name(),
        on,
        matched,
        primary.len()
    );

    Ok(Table::from_parts_unchecked(
        primary.name().to_string(),
        columns,
        rows,
    ))
}

// ---------------------------------------------------------------------------
// Row filters
// ---------------------------------------------------------------------------

/// Keep rows whose `column` value is present and at least `threshold`.
/// Missing values never meet the threshold.
pub fn filter_min_participation(
    table: &Table,
    column: &str,
    threshold: f64,
) -> Result<Table, StatsError> {
    require_columns(table, &[column])?;
    let kept = table.filter_rows(|row| row.number(column).is_some_and(|v| v >= threshold));
    debug!(
        "`{}`: {} of {} rows have {} >= {}",
        table.name(),
        kept.len(),
        table.len(),
        column,
        threshold
    );
    Ok(kept)
}

/// Drop rows whose `column` is missing or whitespace-only.
pub fn drop_blank(table: &Table, column: &str) -> Result<Table, StatsError> {
    require_columns(table, &[column])?;
    Ok(table.filter_rows(|row| row.get(column).and_then(Value::key_text).is_some()))
}

/// Keep only the first row for each `column` key (compared as trimmed text).
/// Traded players appear once per team after their season total, so the
/// first line is the one to keep. Rows without a key are kept.
pub fn drop_duplicate_keys(table: &Table, column: &str) -> Result<Table, StatsError> {
    require_columns(table, &[column])?;
    let mut seen = HashSet::new();
    let kept = table.filter_rows(|row| match row.get(column).and_then(Value::key_text) {
        Some(key) => {
            if seen.contains(&key) {
                warn!(
                    "duplicate key '{}' in `{}`, keeping the first row",
                    key,
                    table.name()
                );
                false
            } else {
                seen.insert(key);
                true
            }
        }
        None => true,
    });
    Ok(kept)
}

/// Drop header lines repeated inside the data: rows where any cell equals
/// its own column name.
pub fn drop_repeated_headers(table: &Table) -> Table {
    let columns = table.columns();
    let kept = table.filter_rows(|row| {
        !row
            .values()
            .iter()
            .zip(columns)
            .any(|(value, column)| value.as_text() == Some(column.as_str()))
    });
    let dropped = table.len() - kept.len();
    if dropped > 0 {
        warn!("`{}`: dropped {} repeated header row(s)", table.name(), dropped);
    }
    kept
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(name: &str, data: &str) -> Table {
        read_csv_from_reader(name, data.as_bytes(), &CsvOptions::default())
            .map_err(|e| e.to_string())
            .unwrap()
    }

    /// Hockey-reference layout read with its grouped header as the header
    /// row, so most columns arrive unnamed.
    fn standard_export() -> Table {
        csv(
            "flyers_standard_2024",
            "\
,,,,,Scoring,
Rk,Player,Age,Pos,GP,G,A
1,Travis Konecny,27,RW,76,33,35
2,Owen Tippett,25,RW,80,28,25
,,,,,,
Rk,Player,Age,Pos,GP,G,A
3,Sean Couturier,31,C,74,11,--",
        )
    }

    // -- normalize_columns --

    #[test]
    fn positional_and_named_renames() {
        let mapping = ColumnMapping::new(vec![
            ColumnRule {
                source: ColumnRef::Index(1),
                target: "Player".into(),
            },
            ColumnRule {
                source: ColumnRef::Index(3),
                target: "Pos".into(),
            },
            ColumnRule {
                source: ColumnRef::Name("Scoring".into()),
                target: "G".into(),
            },
        ])
        .select_mapped(true);

        let table = normalize_columns(&standard_export(), &mapping).unwrap();
        assert_eq!(table.columns(), &["Player", "Pos", "G"]);
        assert_eq!(table.row(1).unwrap().text("Player"), Some("Travis Konecny"));
        assert_eq!(table.row(1).unwrap().text("G"), Some("33"));
    }

    #[test]
    fn rename_keeps_unmapped_columns_in_place() {
        let table = csv("adv", "Player,Unnamed: 1,CF\nTravis Konecny,RW,1200");
        let mapping = ColumnMapping::renames(&[("Unnamed: 1", "Pos")]);
        let out = normalize_columns(&table, &mapping).unwrap();
        assert_eq!(out.columns(), &["Player", "Pos", "CF"]);
    }

    #[test]
    fn positional_index_out_of_range_is_schema_error() {
        let mapping = ColumnMapping::positional(&[(9, "G")]);
        let err = normalize_columns(&standard_export(), &mapping).unwrap_err();
        match err {
            StatsError::Schema { message, .. } => assert!(message.contains("index 9")),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn missing_named_column_is_schema_error() {
        let mapping = ColumnMapping::renames(&[("Goals", "G")]);
        let err = normalize_columns(&standard_export(), &mapping).unwrap_err();
        assert!(matches!(err, StatsError::Schema { .. }));
    }

    #[test]
    fn duplicate_target_is_schema_error() {
        let mapping = ColumnMapping::positional(&[(1, "Player"), (2, "Player")]);
        assert!(normalize_columns(&standard_export(), &mapping).is_err());
    }

    #[test]
    fn target_colliding_with_unmapped_column_is_schema_error() {
        let table = csv("t", "Player,G,Goals\nA,1,2");
        let mapping = ColumnMapping::renames(&[("Goals", "G")]);
        assert!(normalize_columns(&table, &mapping).is_err());
    }

    #[test]
    fn swapping_names_is_allowed() {
        let table = csv("t", "A,B\n1,2");
        let mapping = ColumnMapping::renames(&[("A", "B"), ("B", "A")]);
        let out = normalize_columns(&table, &mapping).unwrap();
        assert_eq!(out.columns(), &["B", "A"]);
    }

    // -- require_columns --

    #[test]
    fn require_columns_lists_all_absent() {
        let table = csv("t", "Player,GP\nA,1");
        let err = require_columns(&table, &["Player", "CF", "FF"]).unwrap_err();
        match err {
            StatsError::Schema { message, .. } => {
                assert!(message.contains("CF"));
                assert!(message.contains("FF"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    // -- coerce_numeric --

    #[test]
    fn unparsable_values_become_missing_not_zero() {
        let table = csv("t", "Player,GP,G\nA,10,--\nB,abc,4\nC,,5");
        let (out, report) = coerce_numeric(&table, &["GP", "G"]).unwrap();

        assert_eq!(out.row(0).unwrap().number("GP"), Some(10.0));
        assert!(out.row(0).unwrap().get("G").unwrap().is_missing());
        assert!(out.row(1).unwrap().get("GP").unwrap().is_missing());
        assert!(out.row(2).unwrap().get("GP").unwrap().is_missing());
        assert_eq!(out.row(2).unwrap().number("G"), Some(5.0));

        // Blank cells are missing already and are not parse failures.
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.counts().get("GP"), Some(&1));
        assert_eq!(report.failures[0].raw, "--");
    }

    #[test]
    fn every_coerced_value_is_number_or_missing() {
        let table = csv("t", "Player,oZS%,CF\nA,55.2%,1e3\nB,N/A,12.5\nC,inf,-");
        let (out, _) = coerce_numeric(&table, &["oZS%", "CF"]).unwrap();
        for column in ["oZS%", "CF"] {
            for value in out.column_values(column).unwrap() {
                assert!(matches!(value, Value::Number(_) | Value::Missing), "{value:?}");
            }
        }
        assert_eq!(out.row(0).unwrap().number("oZS%"), Some(55.2));
        assert_eq!(out.row(0).unwrap().number("CF"), Some(1000.0));
    }

    #[test]
    fn coerce_leaves_unlisted_columns_alone() {
        let table = csv("t", "Player,Pos,GP\nA,C,3");
        let (out, report) = coerce_numeric(&table, &["GP"]).unwrap();
        assert!(report.is_clean());
        assert_eq!(out.row(0).unwrap().text("Pos"), Some("C"));
    }

    #[test]
    fn coerce_absent_column_is_schema_error() {
        let table = csv("t", "Player,GP\nA,3");
        assert!(matches!(
            coerce_numeric(&table, &["CF"]),
            Err(StatsError::Schema { .. })
        ));
    }

    // -- merge --

    #[test]
    fn left_merge_preserves_primary_rows() {
        let primary = csv("standard", "Player,G\nA,1\nB,2\nC,3");
        let secondary = csv("advanced", "Player,CF\nB,50\nD,70\nB,99");
        let merged = merge(&primary, &secondary, "Player").unwrap();

        assert_eq!(merged.len(), primary.len());
        assert_eq!(merged.columns(), &["Player", "G", "CF"]);
        assert!(merged.row(0).unwrap().get("CF").unwrap().is_missing());
        // First duplicate wins.
        assert_eq!(merged.row(1).unwrap().text("CF"), Some("50"));
        assert!(merged.row(2).unwrap().get("CF").unwrap().is_missing());
    }

    #[test]
    fn merge_with_empty_secondary_keeps_rows_unset() {
        let primary = csv("standard", "Player\nA");
        let secondary = Table::new("advanced", vec!["Player".into(), "CF".into()]);
        let merged = merge(&primary, &secondary, "Player").unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.row(0).unwrap().text("Player"), Some("A"));
        assert!(merged.row(0).unwrap().get("CF").unwrap().is_missing());
    }

    #[test]
    fn merge_key_missing_from_either_side() {
        let with_key = csv("a", "Player,G\nA,1");
        let without_key = csv("b", "Name,CF\nA,1");

        match merge(&with_key, &without_key, "Player").unwrap_err() {
            StatsError::MergeKey { side, table, .. } => {
                assert_eq!(side, JoinSide::Secondary);
                assert_eq!(table, "b");
            }
            other => panic!("expected merge key error, got {other:?}"),
        }
        match merge(&without_key, &with_key, "Player").unwrap_err() {
            StatsError::MergeKey { side, .. } => assert_eq!(side, JoinSide::Primary),
            other => panic!("expected merge key error, got {other:?}"),
        }
    }

    #[test]
    fn merge_matches_trimmed_keys_and_renames_collisions() {
        let primary = csv("standard", "Player,GP\nTravis Konecny,76");
        let mut secondary = Table::new(
            "advanced",
            vec!["Player".into(), "GP".into(), "CF".into()],
        );
        secondary
            .push_row(vec![
                Value::Text("Travis Konecny  ".into()),
                Value::Number(70.0),
                Value::Number(1200.0),
            ])
            .unwrap();

        let merged = merge(&primary, &secondary, "Player").unwrap();
        assert_eq!(merged.columns(), &["Player", "GP", "GP_advanced", "CF"]);
        assert_eq!(merged.row(0).unwrap().text("GP"), Some("76"));
        assert_eq!(merged.row(0).unwrap().number("CF"), Some(1200.0));
    }

    #[test]
    fn merge_rename_that_is_already_taken_is_schema_error() {
        let primary = csv("standard", "Player,GP,GP_advanced\nA,10,1");
        let secondary = csv("advanced", "Player,GP\nA,9");
        match merge(&primary, &secondary, "Player") {
            Err(StatsError::Schema { message, .. }) => {
                assert!(message.contains("GP_advanced"), "{message}")
            }
            other => panic!("expected schema error, got {other:?}"),
        }

        let primary = csv("standard", "Player,GP\nA,10");
        let secondary = csv("advanced", "Player,GP_advanced,GP\nA,1,9");
        assert!(matches!(
            merge(&primary, &secondary, "Player"),
            Err(StatsError::Schema { .. })
        ));
    }

    // -- filters --

    #[test]
    fn duplicate_keys_keep_first_row() {
        let table = csv(
            "standard",
            "Player,GP,CF\nA,10,100\nB,10,100\n A ,4,40\n,1,1\nA,6,60",
        );
        let out = drop_duplicate_keys(&table, "Player").unwrap();
        let players: Vec<_> = out.iter().map(|r| r.text("Player")).collect();
        assert_eq!(players, vec![Some("A"), Some("B"), None]);
        assert_eq!(out.row(0).unwrap().text("GP"), Some("10"));
    }

    #[test]
    fn duplicate_primary_keys_do_not_inflate_share() {
        let primary = csv("standard", "Player,GP,CF\nA,10,100\nA,10,100\nB,10,100");
        let (primary, _) = coerce_numeric(&primary, &["GP", "CF"]).unwrap();
        let primary = drop_duplicate_keys(&primary, "Player").unwrap();
        let secondary = csv("advanced", "Player,FF\nA,1");
        let merged = merge(&primary, &secondary, "Player").unwrap();

        let keys: Vec<_> = merged.iter().filter_map(|r| r.text("Player")).collect();
        assert_eq!(keys, vec!["A", "B"]);
        let shares = crate::metrics::share_of_total(&merged, "CF").unwrap();
        assert_eq!(shares, vec![Value::Number(50.0), Value::Number(50.0)]);
    }

    #[test]
    fn duplicate_keys_on_absent_column_is_schema_error() {
        let table = csv("t", "Name\nA");
        assert!(matches!(
            drop_duplicate_keys(&table, "Player"),
            Err(StatsError::Schema { .. })
        ));
    }

    #[test]
    fn participation_filter_excludes_missing_and_low() {
        let table = csv("t", "Player,GP\nA,10\nB,0\nC,\nD,82");
        let (table, _) = coerce_numeric(&table, &["GP"]).unwrap();
        let kept = filter_min_participation(&table, "GP", 10.0).unwrap();
        let players: Vec<_> = kept.iter().filter_map(|r| r.text("Player")).collect();
        assert_eq!(players, vec!["A", "D"]);
    }

    #[test]
    fn participation_filter_on_text_column_keeps_nothing() {
        // Uncoerced text never meets a numeric threshold.
        let table = csv("t", "Player,GP\nA,10");
        let kept = filter_min_participation(&table, "GP", 1.0).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn participation_filter_absent_column_is_schema_error() {
        let table = csv("t", "Player\nA");
        assert!(filter_min_participation(&table, "GP", 1.0).is_err());
    }

    #[test]
    fn repeated_headers_and_blank_players_dropped() {
        let mapping = ColumnMapping::positional(&[(1, "Player"), (4, "GP"), (5, "G"), (6, "A")]);
        let table = normalize_columns(&standard_export(), &mapping).unwrap();
        let table = drop_blank(&table, "Player").unwrap();
        let table = drop_repeated_headers(&table);

        let players: Vec<_> = table.iter().filter_map(|r| r.text("Player")).collect();
        assert_eq!(players, vec!["Travis Konecny", "Owen Tippett", "Sean Couturier"]);
    }
}
