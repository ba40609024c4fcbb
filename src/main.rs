use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use logical_clock_simulation::abstractions::distributed_system::Cluster;
use logical_clock_simulation::analysis::{RunAnalysis, SweepPoint};
use logical_clock_simulation::config::{
    SimulationConfig, DEFAULT_BASE_PORT, DEFAULT_HOST, DEFAULT_INTERNAL_EVENT_PROBABILITY,
};

/// Simulates independently clocked machines exchanging Lamport timestamps.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a cluster and write one event log per machine.
    Run(RunArgs),
    /// Summarize event logs from a previous run.
    Analyze {
        #[arg(required = true)]
        logs: Vec<PathBuf>,
    },
    /// Repeat runs across internal event probabilities and compare them.
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Internal event probabilities to try; each replaces `--internal-prob`.
    #[arg(long, value_delimiter = ',', default_values_t = [0.1, 0.3, 0.5, 0.7])]
    probs: Vec<f64>,
    /// Runs per probability.
    #[arg(long, default_value_t = 5)]
    runs: usize,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, default_value_t = 3)]
    vms: usize,
    #[arg(long, default_value_t = DEFAULT_BASE_PORT)]
    base_port: u16,
    #[arg(long, default_value_t = DEFAULT_INTERNAL_EVENT_PROBABILITY)]
    internal_prob: f64,
    /// Run time in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u64,
    #[arg(long, default_value_t = 1)]
    min_rate: u32,
    #[arg(long, default_value_t = 6)]
    max_rate: u32,
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
    #[arg(long)]
    seed: Option<u64>,
}

impl From<RunArgs> for SimulationConfig {
    fn from(args: RunArgs) -> Self {
        Self {
            num_vms: args.vms,
            base_port: args.base_port,
            internal_event_probability: args.internal_prob,
            clock_rates: args.min_rate..=args.max_rate,
            duration: Duration::from_secs(args.duration),
            host: args.host,
            log_dir: args.log_dir,
            seed: args.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Command::Run(args) => run(args.into()).await,
        Command::Analyze { logs } => analyze(&logs),
        Command::Sweep(args) => sweep(args).await,
    }
}

async fn run(config: SimulationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut cluster = Cluster::start(&config).await?;
    for vm in cluster.vms() {
        tracing::info!(
            vm = vm.id(),
            clock_rate = vm.config().clock_rate,
            "ticks per second"
        );
    }

    tokio::select! {
        _ = tokio::time::sleep(config.duration) => {}
        signal_result = tokio::signal::ctrl_c() => {
            if let Err(err) = signal_result {
                eprintln!("Unable to listen for shutdown signal: {}", err);
            }
        }
    }

    let logs = cluster.stop().await;
    analyze(&logs)
}

fn analyze(logs: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", RunAnalysis::from_files(logs)?);
    Ok(())
}

async fn sweep(args: SweepArgs) -> Result<(), Box<dyn std::error::Error>> {
    let base = SimulationConfig::from(args.run);

    let mut points = Vec::with_capacity(args.probs.len());
    for &probability in &args.probs {
        let mut runs = Vec::with_capacity(args.runs);
        for run in 1..=args.runs {
            let config = base.sweep_run(probability, run)?;
            tracing::info!(
                probability,
                run,
                base_port = config.base_port,
                "starting sweep run"
            );
            let logs = Cluster::run_for(&config).await?;
            let analysis = RunAnalysis::from_files(&logs)?;
            println!("p={probability} run {run}\n{analysis}");
            runs.push(analysis);
        }
        points.push(SweepPoint::from_runs(probability, &runs));
    }

    for point in &points {
        println!("{point}");
    }
    Ok(())
}
