use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use causal_regimes::{
    AnalysisConfig, BootstrapConfig, ColumnWeights, Layout, Panel, RegimeAnalysis, UniformWeights,
    WeightPolicy, WeightProvider, WeightSpec,
};

#[derive(Parser, Debug)]
#[command(name = "causal-regimes")]
#[command(about = "Estimate threshold treatment regimes with cluster-bootstrap standard errors")]
struct Args {
    /// Input CSV (long format unless --wide or the config says otherwise)
    #[arg(long)]
    data: PathBuf,

    /// TOML analysis configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input is one row per subject with `<column>_<visit>` columns
    #[arg(long)]
    wide: bool,

    /// Bootstrap replicates
    #[arg(long)]
    iterations: Option<usize>,

    /// Master seed for the bootstrap
    #[arg(long)]
    seed: Option<u64>,

    /// Refit weights on every replicate instead of reusing the observed fit
    #[arg(long)]
    refit: bool,

    /// Run replicates on a single thread
    #[arg(long)]
    sequential: bool,

    /// Print the table as JSON
    #[arg(long)]
    json: bool,

    /// Write every replicate's draws and estimates to this JSON file
    #[arg(long)]
    replicates: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn resolve_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };

        if self.wide {
            config.data.layout = Layout::Wide;
        }
        if let Some(iterations) = self.iterations {
            config.bootstrap.iterations = iterations;
        }
        if self.seed.is_some() {
            config.bootstrap.seed = self.seed;
        }
        if self.refit {
            config.bootstrap.weight_policy = WeightPolicy::Refit;
        }
        if self.sequential {
            config.bootstrap.parallel = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("causal_regimes={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.resolve_config()?;
    let columns = &config.data.columns;

    let panel = match config.data.layout {
        Layout::Long => Panel::from_long_csv(&args.data, columns),
        Layout::Wide => Panel::from_wide_csv(&args.data, columns),
    }
    .with_context(|| format!("Failed to load panel from {}", args.data.display()))?;
    info!(
        subjects = panel.n_subjects(),
        records = panel.n_records(),
        max_visit = panel.max_visit(),
        "loaded panel"
    );

    let column_provider = columns.weight.as_ref().map(ColumnWeights::new);
    let provider: &dyn WeightProvider = match &column_provider {
        Some(p) => p,
        None => {
            warn!("no weight column configured; using unit weights");
            &UniformWeights
        }
    };

    let table = RegimeAnalysis::new(&panel, provider, WeightSpec::from_columns(columns))
        .regimes(config.regimes.candidates(panel.max_visit()))
        .bootstrap(BootstrapConfig::from(&config.bootstrap))
        .run()
        .context("Regime analysis failed")?;

    if let Some(path) = &args.replicates {
        let dump = serde_json::to_string_pretty(&table.replicates)?;
        fs::write(path, dump)
            .with_context(|| format!("Failed to write replicates to {}", path.display()))?;
    }

    if args.json {
        println!("{}", table.to_json()?);
    } else {
        print!("{}", table);
        println!();
        println!("{}", table.summary());
    }

    Ok(())
}
