// Pipeline: raw sources -> normalized player table -> enriched table.
//
// Each call re-reads its sources. Nothing is remembered between runs, so a
// renderer can re-derive for a new selection from the normalized table
// without any stale aggregates.

use std::path::Path;

use tracing::{debug, info};

use crate::config::{Config, SourceConfig, SourceLocation};
use crate::error::StatsError;
use crate::loader::{
    coerce_numeric, drop_blank, drop_duplicate_keys, drop_repeated_headers,
    filter_min_participation, merge, normalize_columns, read_csv, require_columns,
};
use crate::metrics::{enrich, Enriched};
use crate::selection::Selection;
use crate::store::read_store_table;
use crate::table::Table;

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read one source and bring it to normalized form: renamed columns,
    /// required columns checked, blank and repeated-header rows dropped, one
    /// row per player, and numeric columns coerced.
    pub fn load_source(&self, source: &SourceConfig) -> Result<Table, StatsError> {
        let raw = match &source.location {
            SourceLocation::Csv(path) => read_csv(path, &source.csv)?,
            SourceLocation::Store(table) => {
                // validate() guarantees a store path for store sources.
                let db_path = self.config.store_path.as_deref().unwrap_or(Path::new(""));
                read_store_table(db_path, table)?
            }
        };
        debug!(
            "source `{}` (format v{}): {} raw rows, {} columns",
            source.name,
            source.format_version,
            raw.len(),
            raw.columns().len()
        );

        let table = normalize_columns(&raw, &source.mapping)?;
        require_columns(&table, &source.required)?;

        let key = self.config.key.as_str();
        let table = if table.has_column(key) {
            let table = drop_repeated_headers(&drop_blank(&table, key)?);
            drop_duplicate_keys(&table, key)?
        } else {
            drop_repeated_headers(&table)
        };
        let (table, report) = coerce_numeric(&table, &source.numeric)?;
        if !report.is_clean() {
            info!(
                "source `{}`: {} unparsable value(s) treated as missing",
                source.name,
                report.failures.len()
            );
        }
        Ok(table)
    }

    /// Load every source and left-merge the secondaries into the primary on
    /// the player key.
    pub fn load(&self) -> Result<Table, StatsError> {
        let key = self.config.key.as_str();
        let primary_source = self.config.primary_source();
        let mut table = self.load_source(primary_source)?;
        require_columns(&table, &[key])?;

        for source in self.config.secondary_sources() {
            let secondary = self.load_source(source)?;
            table = merge(&table, &secondary, key)?;
        }

        info!(
            "loaded {} players with {} columns from {} source(s)",
            table.len(),
            table.columns().len(),
            self.config.sources.len()
        );
        Ok(table)
    }

    /// Filter a normalized table by participation and `selection`, then
    /// derive metrics over exactly the rows that remain. Metric outputs must
    /// not name columns the sources already provide.
    pub fn derive(&self, normalized: &Table, selection: &Selection) -> Result<Enriched, StatsError> {
        if let Some(taken) = self
            .config
            .metrics
            .iter()
            .map(|m| m.output())
            .find(|output| normalized.has_column(output))
        {
            return Err(StatsError::Schema {
                table: normalized.name().to_string(),
                message: format!("metric output `{taken}` would replace a source column"),
            });
        }

        let participation = &self.config.participation;
        let eligible =
            filter_min_participation(normalized, &participation.column, participation.threshold)?;
        let visible = selection.apply(&eligible, &self.config.key)?;

        if visible.is_empty() {
            return Err(StatsError::EmptyResult {
                operation: "participation filter and selection".to_string(),
                table: normalized.name().to_string(),
            });
        }

        let enriched = enrich(&visible, &self.config.metrics);
        info!(
            "derived {} metric(s) over {} players ({} unavailable)",
            self.config.metrics.len() - enriched.diagnostics.len(),
            enriched.table.len(),
            enriched.diagnostics.len()
        );
        Ok(enriched)
    }

    /// `load` followed by `derive`.
    pub fn run(&self, selection: &Selection) -> Result<Enriched, StatsError> {
        let normalized = self.load()?;
        self.derive(&normalized, selection)
    }
}
