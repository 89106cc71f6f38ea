// rinkstats entry point.
//
// 1. Initialize tracing (stderr, so stdout stays clean for the table)
// 2. Load config from the first argument or config/rinkstats.toml
// 3. Load, merge, and derive metrics
// 4. Write the enriched table (or position leaders) to stdout

mod output;

use std::path::PathBuf;

use anyhow::Context;
use rinkstats_core::config::{self, Config, OutputFormat};
use rinkstats_core::pipeline::Pipeline;
use rinkstats_core::selection::{position_leaders, DEFAULT_LEADER_QUOTAS};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = load_config()?;
    info!(
        "config loaded: {} source(s), {} metric(s), key `{}`",
        config.sources.len(),
        config.metrics.len(),
        config.key
    );

    let pipeline = Pipeline::new(config);
    let enriched = match pipeline.run(&pipeline.config().selection) {
        Ok(enriched) => enriched,
        Err(err) if err.is_empty_result() => {
            warn!("{err}");
            return Ok(());
        }
        Err(err) => return Err(err).context("stats pipeline failed"),
    };

    for diagnostic in &enriched.diagnostics {
        warn!("{diagnostic}");
    }

    let output = &pipeline.config().output;
    let table = match &output.leaders_by {
        Some(stat) => position_leaders(&enriched.table, stat, &DEFAULT_LEADER_QUOTAS)
            .with_context(|| format!("failed to pick position leaders by `{stat}`"))?,
        None => enriched.table,
    };

    let stdout = std::io::stdout().lock();
    match output.format {
        OutputFormat::Csv => output::write_csv(&table, stdout)?,
        OutputFormat::Json => output::write_json(&table, stdout)?,
    }
    info!("wrote {} rows", table.len());
    Ok(())
}

fn load_config() -> anyhow::Result<Config> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => config::load_config_from(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => config::load_config().context("failed to load configuration"),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rinkstats=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
