// Configuration loading and parsing (rinkstats.toml).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::loader::{ColumnMapping, ColumnRef, ColumnRule, CsvOptions};
use crate::metrics::MetricSpec;
use crate::selection::Selection;
use crate::table::columns;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub store_path: Option<PathBuf>,
    pub key: String,
    pub sources: Vec<SourceConfig>,
    pub participation: ParticipationConfig,
    pub metrics: Vec<MetricSpec>,
    pub selection: Selection,
    pub output: OutputConfig,
}

impl Config {
    pub fn primary_source(&self) -> &SourceConfig {
        // validate() guarantees exactly one primary source.
        self.sources
            .iter()
            .find(|s| s.primary)
            .unwrap_or(&self.sources[0])
    }

    pub fn secondary_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| !s.primary)
    }
}

/// Where a source's raw table comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Csv(PathBuf),
    Store(String),
}

/// One source table and the versioned mapping for its export format.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub format_version: u32,
    pub location: SourceLocation,
    pub csv: CsvOptions,
    pub primary: bool,
    pub mapping: ColumnMapping,
    pub numeric: Vec<String>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipationConfig {
    #[serde(default = "default_participation_column")]
    pub column: String,
    #[serde(default)]
    pub threshold: f64,
}

impl Default for ParticipationConfig {
    fn default() -> Self {
        Self {
            column: default_participation_column(),
            threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// When set, emit the per-position leaders by this column instead of
    /// the full table.
    #[serde(default)]
    pub leaders_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw file structs
// ---------------------------------------------------------------------------

fn default_key() -> String {
    columns::PLAYER.to_string()
}

fn default_participation_column() -> String {
    columns::GP.to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_key")]
    key: String,
    #[serde(default)]
    store: StoreSection,
    sources: Vec<RawSource>,
    #[serde(default)]
    participation: ParticipationConfig,
    #[serde(default)]
    metrics: Option<Vec<MetricSpec>>,
    #[serde(default)]
    selection: Selection,
    #[serde(default)]
    output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoreSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSource {
    name: String,
    format_version: u32,
    csv: Option<String>,
    table: Option<String>,
    #[serde(default)]
    skip_rows: usize,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    select_mapped: bool,
    #[serde(default)]
    numeric: Vec<String>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    columns: Vec<RawColumnRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawColumnRule {
    to: String,
    name: Option<String>,
    index: Option<usize>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rinkstats.toml";

/// Load and validate configuration from an explicit file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    parse_config(&text, path)
}

/// Convenience wrapper: loads `config/rinkstats.toml` relative to the
/// current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_from(&cwd.join(DEFAULT_CONFIG_PATH))
}

/// Parse and validate config text. `origin` is only used in error messages.
pub fn parse_config(text: &str, origin: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: origin.to_path_buf(),
        source: e,
    })?;

    let sources = file
        .sources
        .into_iter()
        .enumerate()
        .map(|(i, raw)| build_source(i, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let config = Config {
        store_path: file.store.path.map(PathBuf::from),
        key: file.key,
        sources,
        participation: file.participation,
        metrics: file.metrics.unwrap_or_else(MetricSpec::default_set),
        selection: file.selection,
        output: file.output,
    };

    validate(&config)?;
    Ok(config)
}

fn build_source(i: usize, raw: RawSource) -> Result<SourceConfig, ConfigError> {
    let field = |name: &str| format!("sources[{i}].{name}");

    let location = match (raw.csv, raw.table) {
        (Some(csv), None) => SourceLocation::Csv(PathBuf::from(csv)),
        (None, Some(table)) => SourceLocation::Store(table),
        _ => {
            return Err(invalid(
                field("csv"),
                "exactly one of `csv` or `table` must be set",
            ))
        }
    };

    let rules = raw
        .columns
        .into_iter()
        .enumerate()
        .map(|(j, rule)| {
            let source = match (rule.name, rule.index) {
                (Some(name), None) => ColumnRef::Name(name),
                (None, Some(index)) => ColumnRef::Index(index),
                _ => {
                    return Err(invalid(
                        field(&format!("columns[{j}]")),
                        "exactly one of `name` or `index` must be set",
                    ))
                }
            };
            if rule.to.trim().is_empty() {
                return Err(invalid(field(&format!("columns[{j}].to")), "must not be empty"));
            }
            Ok(ColumnRule {
                source,
                target: rule.to,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceConfig {
        name: raw.name,
        format_version: raw.format_version,
        location,
        csv: CsvOptions {
            skip_rows: raw.skip_rows,
        },
        primary: raw.primary,
        mapping: ColumnMapping::new(rules).select_mapped(raw.select_mapped),
        numeric: raw.numeric,
        required: raw.required,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.key.trim().is_empty() {
        return Err(invalid("key", "must not be empty"));
    }

    if config.sources.is_empty() {
        return Err(invalid("sources", "at least one source is required"));
    }

    let primaries = config.sources.iter().filter(|s| s.primary).count();
    if primaries != 1 {
        return Err(invalid(
            "sources.primary",
            format!("exactly one source must be primary, found {primaries}"),
        ));
    }

    let mut names = HashSet::new();
    for (i, source) in config.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            return Err(invalid(format!("sources[{i}].name"), "must not be empty"));
        }
        if !names.insert(source.name.as_str()) {
            return Err(invalid(
                format!("sources[{i}].name"),
                format!("duplicate source name `{}`", source.name),
            ));
        }
        if source.format_version == 0 {
            return Err(invalid(
                format!("sources[{i}].format_version"),
                "must be greater than 0",
            ));
        }
        if matches!(source.location, SourceLocation::Store(_)) && config.store_path.is_none() {
            return Err(invalid(
                "store.path",
                format!("source `{}` reads from the store but no store path is set", source.name),
            ));
        }
    }

    let threshold = config.participation.threshold;
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(invalid(
            "participation.threshold",
            format!("must be a finite number >= 0, got {threshold}"),
        ));
    }

    let source_columns: HashSet<&str> = config
        .sources
        .iter()
        .flat_map(|s| s.mapping.rules().iter().map(|r| r.target.as_str()))
        .chain(std::iter::once(config.key.as_str()))
        .collect();

    let mut outputs = HashSet::new();
    for (i, metric) in config.metrics.iter().enumerate() {
        if metric.output().trim().is_empty() {
            return Err(invalid(format!("metrics[{i}].output"), "must not be empty"));
        }
        if source_columns.contains(metric.output()) {
            return Err(invalid(
                format!("metrics[{i}].output"),
                format!("`{}` is already a source column", metric.output()),
            ));
        }
        if !outputs.insert(metric.output()) {
            return Err(invalid(
                format!("metrics[{i}].output"),
                format!("duplicate metric output `{}`", metric.output()),
            ));
        }
        if let MetricSpec::Combine { columns, .. } = metric {
            if columns.is_empty() {
                return Err(invalid(
                    format!("metrics[{i}].columns"),
                    "must list at least one column",
                ));
            }
        }
    }

    if let Some(range) = &config.selection.range {
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(invalid(
                    "selection.range",
                    format!("min ({min}) is greater than max ({max})"),
                ));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
