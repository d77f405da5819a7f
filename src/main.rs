use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use logflow::recipes::{arrival_rate, logparser, wordcount};
use logflow::tap::LocalFs;
use logflow::{CancellationToken, CascadeConnector, EngineConfig, FlowConnector};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "logflow")]
#[command(about = "Run log analysis and word count flows", long_about = None)]
struct Cli {
    /// Engine settings (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Max flows running at once.
    #[arg(long, global = true)]
    parallelism: Option<usize>,

    /// Skip partial aggregation before grouping.
    #[arg(long, global = true)]
    no_combiner: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an Apache access log into tab separated fields.
    Parse { input: String, output: String },

    /// Count requests per second and per minute.
    ArrivalRate { input: String, output: String },

    /// Count words per page and overall in a crawl dump.
    Wordcount {
        input: String,
        output: String,
        local_output: String,
    },
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(parallelism) = cli.parallelism {
        config.parallelism = parallelism;
    }
    if cli.no_combiner {
        config.combiner = false;
    }
    Ok(config.validate()?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let flows = FlowConnector::new(config.clone());
    let cascades = CascadeConnector::new(config);
    let storage = Arc::new(LocalFs::new());
    let cancel = CancellationToken::new();

    match &cli.cmd {
        Commands::Parse { input, output } => {
            let flow = logparser::flow(&flows, input, output)?;
            flow.prepare_sinks(storage.as_ref())?;
            let stats = flow
                .complete(storage.as_ref(), &cancel)
                .with_context(|| format!("flow {} failed", flow.name()))?;
            info!("parsed {} lines into {}", stats.lines_read, output);
        }
        Commands::ArrivalRate { input, output } => {
            let cascade = arrival_rate::cascade(&flows, &cascades, input, output)?;
            let stats = cascade.complete(storage, &cancel)?;
            info!("{} flows completed, results in {}", stats.completed.len(), output);
        }
        Commands::Wordcount {
            input,
            output,
            local_output,
        } => {
            let cascade = wordcount::cascade(&flows, &cascades, input, output, local_output)?;
            let stats = cascade.complete(storage, &cancel)?;
            info!(
                "{} flows completed, results in {}",
                stats.completed.len(),
                local_output
            );
        }
    }

    Ok(())
}
