// Metric deriver: per-60 rates, share-of-total, and combined columns.
//
// Derived columns are pure functions of the rows they are computed over.
// Nothing is cached: call `enrich` again whenever the row set changes.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::table::{columns, Table, Value};

// ---------------------------------------------------------------------------
// Metric specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    /// Sum of all operands.
    #[default]
    Sum,
    /// First operand minus the rest (e.g. CF - CA).
    Difference,
}

fn default_denominator() -> String {
    columns::GP.to_string()
}

/// One derived column, as configured.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSpec {
    #[serde(rename = "rate_per_60")]
    RatePer60 {
        numerator: String,
        #[serde(default = "default_denominator")]
        denominator: String,
        output: String,
    },
    ShareOfTotal {
        column: String,
        output: String,
    },
    Combine {
        columns: Vec<String>,
        #[serde(default)]
        op: CombineOp,
        output: String,
    },
}

impl MetricSpec {
    pub fn output(&self) -> &str {
        match self {
            MetricSpec::RatePer60 { output, .. }
            | MetricSpec::ShareOfTotal { output, .. }
            | MetricSpec::Combine { output, .. } => output,
        }
    }

    /// `PTS = G + A`, `CF60`, `FF60`, and `CF_%`.
    pub fn default_set() -> Vec<MetricSpec> {
        vec![
            MetricSpec::Combine {
                columns: vec![columns::G.into(), columns::A.into()],
                op: CombineOp::Sum,
                output: columns::PTS.into(),
            },
            MetricSpec::RatePer60 {
                numerator: columns::CF.into(),
                denominator: columns::GP.into(),
                output: columns::CF60.into(),
            },
            MetricSpec::RatePer60 {
                numerator: columns::FF.into(),
                denominator: columns::GP.into(),
                output: columns::FF60.into(),
            },
            MetricSpec::ShareOfTotal {
                column: columns::CF.into(),
                output: columns::CF_SHARE.into(),
            },
        ]
    }

    fn compute(&self, table: &Table) -> Result<Vec<Value>, ColumnUnavailable> {
        match self {
            MetricSpec::RatePer60 {
                numerator,
                denominator,
                ..
            } => rate_per_60(table, numerator, denominator),
            MetricSpec::ShareOfTotal { column, .. } => share_of_total(table, column),
            MetricSpec::Combine { columns, op, .. } => combine(table, columns, *op),
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Why a source column cannot feed a derived metric.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColumnUnavailable {
    #[error("column `{0}` is absent")]
    Absent(String),
    #[error("column `{column}` holds non-numeric value `{sample}`")]
    NonNumeric { column: String, sample: String },
}

impl ColumnUnavailable {
    pub fn column(&self) -> &str {
        match self {
            ColumnUnavailable::Absent(column) => column,
            ColumnUnavailable::NonNumeric { column, .. } => column,
        }
    }
}

/// A derived metric left out of the output, and the column that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("metric `{metric}` unavailable: {cause}")]
pub struct MetricDiagnostic {
    pub metric: String,
    pub cause: ColumnUnavailable,
}

// ---------------------------------------------------------------------------
// Column primitives
// ---------------------------------------------------------------------------

/// Read a column as optional numbers. Any remaining text cell means the
/// column was never coerced or is malformed.
fn numeric_column(table: &Table, name: &str) -> Result<Vec<Option<f64>>, ColumnUnavailable> {
    let values = table
        .column_values(name)
        .ok_or_else(|| ColumnUnavailable::Absent(name.to_string()))?;
    values
        .into_iter()
        .map(|value| match value {
            Value::Missing => Ok(None),
            Value::Number(v) => Ok(Some(*v)),
            Value::Text(s) => Err(ColumnUnavailable::NonNumeric {
                column: name.to_string(),
                sample: s.clone(),
            }),
        })
        .collect()
}

/// `numerator / denominator * 60` per row. Missing when either operand is
/// missing or the denominator is zero.
pub fn rate_per_60(
    table: &Table,
    numerator: &str,
    denominator: &str,
) -> Result<Vec<Value>, ColumnUnavailable> {
    let num = numeric_column(table, numerator)?;
    let den = numeric_column(table, denominator)?;
    Ok(num
        .into_iter()
        .zip(den)
        .map(|pair| match pair {
            (Some(n), Some(d)) if d != 0.0 => Value::number(n / d * 60.0),
            _ => Value::Missing,
        })
        .collect())
}

/// Each row's value as a percentage of the column total over the rows in
/// `table`. Missing values are excluded from the total and stay missing.
/// A zero total yields missing for every row.
pub fn share_of_total(table: &Table, column: &str) -> Result<Vec<Value>, ColumnUnavailable> {
    let values = numeric_column(table, column)?;
    let total: f64 = values.iter().flatten().sum();
    if total == 0.0 {
        return Ok(vec![Value::Missing; values.len()]);
    }
    Ok(values
        .into_iter()
        .map(|v| v.map_or(Value::Missing, |v| Value::number(v / total * 100.0)))
        .collect())
}

/// Combine several columns row by row. Missing in any operand makes the
/// result missing.
pub fn combine<S: AsRef<str>>(
    table: &Table,
    operands: &[S],
    op: CombineOp,
) -> Result<Vec<Value>, ColumnUnavailable> {
    let columns = operands
        .iter()
        .map(|c| numeric_column(table, c.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((0..table.len())
        .map(|row| {
            let row_values: Option<Vec<f64>> = columns.iter().map(|col| col[row]).collect();
            let Some((first, rest)) = row_values.as_deref().and_then(<[f64]>::split_first) else {
                return Value::Missing;
            };
            let result = match op {
                CombineOp::Sum => first + rest.iter().sum::<f64>(),
                CombineOp::Difference => first - rest.iter().sum::<f64>(),
            };
            Value::number(result)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// enrich
// ---------------------------------------------------------------------------

/// A table with derived columns, plus one diagnostic per metric that could
/// not be computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    pub table: Table,
    pub diagnostics: Vec<MetricDiagnostic>,
}

impl Enriched {
    /// Whether the named derived column made it into the table. Renderers
    /// use this to disable views instead of failing.
    pub fn is_available(&self, metric: &str) -> bool {
        self.table.has_column(metric)
            && !self.diagnostics.iter().any(|d| d.metric == metric)
    }
}

/// Apply metric specs in order. Later specs may read earlier outputs.
///
/// A metric whose inputs are unavailable is left out entirely (any stale
/// column of that name is removed) and reported in `diagnostics`.
pub fn enrich(table: &Table, specs: &[MetricSpec]) -> Enriched {
    let mut current = table.clone();
    let mut diagnostics = Vec::new();

    for spec in specs {
        let output = spec.output();
        let computed = spec.compute(&current).and_then(|values| {
            current
                .with_column(output, values)
                .map_err(|_| ColumnUnavailable::Absent(output.to_string()))
        });
        match computed {
            Ok(next) => {
                debug!("derived `{}` over {} rows", output, next.len());
                current = next;
            }
            Err(cause) => {
                warn!("metric `{}` skipped: {}", output, cause);
                current = current.without_column(output);
                diagnostics.push(MetricDiagnostic {
                    metric: output.to_string(),
                    cause,
                });
            }
        }
    }

    Enriched {
        table: current,
        diagnostics,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table::from_rows(
            "test",
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        )
        .unwrap()
    }

    fn n(v: f64) -> Value {
        Value::Number(v)
    }

    fn approx(value: &Value, expected: f64) -> bool {
        value.as_f64().is_some_and(|v| (v - expected).abs() < 1e-9)
    }

    #[test]
    fn cf60_scenario() {
        let t = table(
            &["Player", "GP", "CF"],
            vec![
                vec!["A".into(), n(10.0), n(100.0)],
                vec!["B".into(), n(0.0), n(50.0)],
            ],
        );
        let cf60 = rate_per_60(&t, "CF", "GP").unwrap();
        assert!(approx(&cf60[0], 600.0));
        assert_eq!(cf60[1], Value::Missing);
    }

    #[test]
    fn rate_missing_when_any_operand_missing() {
        let t = table(
            &["GP", "FF"],
            vec![
                vec![Value::Missing, n(10.0)],
                vec![n(5.0), Value::Missing],
                vec![n(4.0), n(2.0)],
            ],
        );
        let ff60 = rate_per_60(&t, "FF", "GP").unwrap();
        assert_eq!(ff60[0], Value::Missing);
        assert_eq!(ff60[1], Value::Missing);
        assert!(approx(&ff60[2], 30.0));
        assert!(ff60.iter().all(|v| v.as_f64().map_or(true, f64::is_finite)));
    }

    #[test]
    fn share_sums_to_one_hundred() {
        let t = table(
            &["CF"],
            vec![vec![n(120.0)], vec![Value::Missing], vec![n(80.0)], vec![n(300.0)]],
        );
        let shares = share_of_total(&t, "CF").unwrap();
        assert_eq!(shares[1], Value::Missing);
        let sum: f64 = shares.iter().filter_map(Value::as_f64).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert!(approx(&shares[0], 24.0));
    }

    #[test]
    fn share_with_zero_total_is_missing() {
        let t = table(&["CF"], vec![vec![n(0.0)], vec![Value::Missing]]);
        let shares = share_of_total(&t, "CF").unwrap();
        assert!(shares.iter().all(Value::is_missing));
    }

    #[test]
    fn combine_propagates_missing() {
        let t = table(
            &["G", "A"],
            vec![vec![n(33.0), n(35.0)], vec![n(11.0), Value::Missing]],
        );
        let pts = combine(&t, &["G", "A"], CombineOp::Sum).unwrap();
        assert!(approx(&pts[0], 68.0));
        assert_eq!(pts[1], Value::Missing);
    }

    #[test]
    fn combine_difference() {
        let t = table(&["CF", "CA"], vec![vec![n(1200.0), n(1000.0)]]);
        let diff = combine(&t, &["CF", "CA"], CombineOp::Difference).unwrap();
        assert!(approx(&diff[0], 200.0));
    }

    #[test]
    fn combine_with_no_operands_is_missing() {
        let t = table(&["G"], vec![vec![n(1.0)]]);
        let empty: [&str; 0] = [];
        assert_eq!(combine(&t, &empty, CombineOp::Sum).unwrap(), vec![Value::Missing]);
    }

    #[test]
    fn text_column_is_unavailable() {
        let t = table(&["CF", "GP"], vec![vec!["lots".into(), n(1.0)]]);
        let err = rate_per_60(&t, "CF", "GP").unwrap_err();
        assert_eq!(
            err,
            ColumnUnavailable::NonNumeric {
                column: "CF".into(),
                sample: "lots".into()
            }
        );
    }

    #[test]
    fn enrich_default_set_with_missing_fenwick() {
        let t = table(
            &["Player", "GP", "G", "A", "CF"],
            vec![
                vec!["A".into(), n(10.0), n(2.0), n(3.0), n(100.0)],
                vec!["B".into(), n(0.0), n(1.0), Value::Missing, n(300.0)],
            ],
        );
        let enriched = enrich(&t, &MetricSpec::default_set());

        assert!(enriched.is_available("PTS"));
        assert!(enriched.is_available("CF60"));
        assert!(enriched.is_available("CF_%"));
        assert!(!enriched.is_available("FF60"));
        assert!(!enriched.table.has_column("FF60"));

        assert_eq!(enriched.diagnostics.len(), 1);
        assert_eq!(enriched.diagnostics[0].metric, "FF60");
        assert_eq!(enriched.diagnostics[0].cause.column(), "FF");

        let a = enriched.table.row(0).unwrap();
        assert_eq!(a.number("PTS"), Some(5.0));
        assert!(approx(a.get("CF_%").unwrap(), 25.0));
        let b = enriched.table.row(1).unwrap();
        assert!(b.get("PTS").unwrap().is_missing());
        assert!(b.get("CF60").unwrap().is_missing());
    }

    #[test]
    fn enrich_discards_stale_share_when_recomputing() {
        let full = table(&["CF"], vec![vec![n(100.0)], vec![n(300.0)]]);
        let specs = vec![MetricSpec::ShareOfTotal {
            column: "CF".into(),
            output: "CF_%".into(),
        }];
        let enriched = enrich(&full, &specs).table;
        assert!(approx(enriched.row(0).unwrap().get("CF_%").unwrap(), 25.0));

        // Narrow the population, then recompute on the already-enriched table.
        let narrowed = enriched.filter_rows(|row| row.number("CF") == Some(100.0));
        let recomputed = enrich(&narrowed, &specs).table;
        assert!(approx(recomputed.row(0).unwrap().get("CF_%").unwrap(), 100.0));
    }

    #[test]
    fn enrich_removes_stale_column_when_metric_fails() {
        let t = table(&["CF_%"], vec![vec![n(12.0)]]);
        let specs = vec![MetricSpec::ShareOfTotal {
            column: "CF".into(),
            output: "CF_%".into(),
        }];
        let enriched = enrich(&t, &specs);
        assert!(!enriched.table.has_column("CF_%"));
    }

    #[test]
    fn specs_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            metrics: Vec<MetricSpec>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [[metrics]]
            kind = "rate_per_60"
            numerator = "CF"
            output = "CF60"

            [[metrics]]
            kind = "combine"
            columns = ["CF", "CA"]
            op = "difference"
            output = "CF_diff"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.metrics[0],
            MetricSpec::RatePer60 {
                numerator: "CF".into(),
                denominator: "GP".into(),
                output: "CF60".into(),
            }
        );
        assert_eq!(parsed.metrics[1].output(), "CF_diff");
    }
}
