//! fanout CLI: run a forecast model sweep over many partitions.
//!
//! Partition ids come from a CSV column or are generated; the data behind
//! each id is synthetic. Every (partition, model) pair becomes one trial and
//! the best model per partition is reported.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fo_data::{PartitionCatalog, SyntheticSource};
use fo_engine::{ForecastModel, ForecastTrainable, Sweep};
use fo_optimizer::{SearchSpace, SweepConfig};
use fo_types::ResourceRequest;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(version)]
#[command(about = "Fan a model grid out over many partitions and keep the best per partition")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sweep and print the per-trial results and per-partition winners
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Sweep configuration (JSON). Flags given alongside override its fields.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CSV file listing partition ids
    #[arg(long, value_name = "FILE")]
    partitions_csv: Option<PathBuf>,

    /// Column of --partitions-csv holding the ids
    #[arg(long, default_value = "partition")]
    partition_column: String,

    /// Generate this many partition ids when no CSV is given
    #[arg(long, value_name = "N")]
    synthetic: Option<usize>,

    /// Forecast models to try for every partition [default: all of them]
    #[arg(long, value_delimiter = ',')]
    models: Option<Vec<String>>,

    /// Maximum number of trials (default: the whole grid)
    #[arg(long)]
    trials: Option<usize>,

    #[arg(long)]
    cpus_per_trial: Option<f64>,

    /// Total cpu capacity shared by all running trials
    #[arg(long)]
    capacity_cpus: Option<f64>,

    #[arg(long, env = "FANOUT_WORKERS")]
    workers: Option<usize>,

    /// Per-trial wall clock limit
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Extra attempts for trials that raise or panic
    #[arg(long)]
    retries: Option<u32>,

    /// Points held out for scoring
    #[arg(long, default_value_t = 14)]
    horizon: usize,

    /// Seasonal period of the synthetic data and the seasonal model
    #[arg(long, default_value_t = 7)]
    season: usize,

    /// Print the report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Command::Run(args) = cli.command;
    let config = build_config(&args)?;

    let source = SyntheticSource::new(120, args.season);
    let trainable = ForecastTrainable::new(Arc::new(source))
        .with_horizon(args.horizon)
        .with_season(args.season)
        .with_params(&config.group_by, &config.label_field);

    let report = Sweep::new(config, Arc::new(trainable)).run()?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_table());
    }

    let code = report.status.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_config(args: &RunArgs) -> Result<SweepConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = SweepConfig::from_json_file(path)
                .with_context(|| format!("reading sweep config {}", path.display()))?;
            if args.partitions_csv.is_some() || args.synthetic.is_some() {
                let partitions = partition_ids(args)?;
                config.search_space = config
                    .search_space
                    .set_grid(config.group_by.clone(), partitions);
            }
            if let Some(models) = &args.models {
                let models = model_names(models)?;
                config.search_space = config
                    .search_space
                    .set_grid(config.label_field.clone(), models);
            }
            config
        }
        None => {
            let partitions = partition_ids(args)?;
            let models = match &args.models {
                Some(models) => model_names(models)?,
                None => ForecastModel::ALL.iter().map(|m| m.as_str().to_string()).collect(),
            };
            info!("Sweeping {} partitions x {} models", partitions.len(), models.len());

            let space = SearchSpace::new()
                .add_grid("partition", partitions)
                .add_grid("model", models);
            SweepConfig::new("forecast", space)
        }
    };

    if let Some(n) = args.trials {
        config.requested_trials = Some(n);
    }
    if let Some(cpus) = args.cpus_per_trial {
        config.resources_per_trial = ResourceRequest::cpus(cpus);
    }
    if let Some(cpus) = args.capacity_cpus {
        config.capacity = ResourceRequest::cpus(cpus);
    }
    if let Some(n) = args.workers {
        config.workers = n;
    }
    if let Some(secs) = args.timeout_secs {
        config.trial_timeout_secs = Some(secs);
    }
    if let Some(n) = args.retries {
        config.max_retries = n;
    }
    Ok(config)
}

fn model_names(models: &[String]) -> Result<Vec<String>> {
    models
        .iter()
        .map(|m| m.parse::<ForecastModel>().map(|m| m.as_str().to_string()))
        .collect()
}

fn partition_ids(args: &RunArgs) -> Result<Vec<String>> {
    if let Some(path) = &args.partitions_csv {
        let catalog = PartitionCatalog::from_csv(path, &args.partition_column)
            .with_context(|| format!("reading partition ids from {}", path.display()))?;
        info!("Loaded {} partition ids from {}", catalog.len(), path.display());
        return Ok(catalog.into_ids());
    }

    let n = args.synthetic.unwrap_or(20);
    Ok(PartitionCatalog::from_ids((0..n).map(|i| format!("partition_{i:04}"))).into_ids())
}
