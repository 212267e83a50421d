mod cluster;
mod report;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lightrail_core::config::{self, LoggingConfig};
use lightrail_core::{Algorithm, LightrailConfig, Objective};
use lightrail_scheduler::{LightrailScheduler, SchedulingEvent};

use cluster::ClusterFile;
use report::RunReport;

#[derive(Parser)]
#[command(name = "lightrail", about = "Task scheduler and router for heterogeneous device pools")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/lightrail/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write daily-rotated logs to this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a cluster's devices, schedule its tasks and print the placements
    Run {
        #[arg(long)]
        cluster: PathBuf,

        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,

        #[arg(long, value_enum)]
        objective: Option<ObjectiveArg>,

        /// Seconds to wait for each scheduling decision
        #[arg(long, default_value = "10")]
        timeout: u64,

        #[arg(long)]
        json: bool,
    },
    /// Print the least-cost route between two devices of a cluster
    Route {
        #[arg(long)]
        cluster: PathBuf,

        #[arg(long)]
        from: u32,

        #[arg(long)]
        to: u32,

        #[arg(long, value_enum, default_value = "latency")]
        objective: ObjectiveArg,

        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Save it to the config path
        #[arg(long)]
        write: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Optimal,
    Greedy,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Optimal => Algorithm::OptimalShortestPath,
            AlgorithmArg::Greedy => Algorithm::GreedyLeastLoaded,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ObjectiveArg {
    Latency,
    Power,
    Cost,
    Throughput,
    Balanced,
}

impl From<ObjectiveArg> for Objective {
    fn from(arg: ObjectiveArg) -> Self {
        match arg {
            ObjectiveArg::Latency => Objective::MinimizeLatency,
            ObjectiveArg::Power => Objective::MinimizePower,
            ObjectiveArg::Cost => Objective::MinimizeCost,
            ObjectiveArg::Throughput => Objective::MaximizeThroughput,
            ObjectiveArg::Balanced => Objective::Balanced,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let config = match &cli.config {
        Some(path) => config::load_config(path),
        None => config::load_or_create_config(),
    };

    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = init_logging(&config.logging, cli.log_dir.clone(), cli.verbose)?;

    match cli.command {
        Command::Run {
            cluster,
            algorithm,
            objective,
            timeout,
            json,
        } => run(config, &cluster, algorithm, objective, Duration::from_secs(timeout), json).await,
        Command::Route {
            cluster,
            from,
            to,
            objective,
            json,
        } => route(config, &cluster, from, to, objective.into(), json),
        Command::Config { write } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if write {
                config::save_config(&config, &config_path)?;
                eprintln!("[lightrail] wrote {}", config_path.display());
            }
            Ok(())
        }
    }
}

fn init_logging(
    logging: &LoggingConfig,
    log_dir: Option<PathBuf>,
    verbose: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("lightrail=debug,lightrail_scheduler=debug,lightrail_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter))
    };

    match log_dir.or_else(|| logging.directory.clone()) {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(&dir, "lightrail.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn run(
    mut config: LightrailConfig,
    cluster_path: &std::path::Path,
    algorithm: Option<AlgorithmArg>,
    objective: Option<ObjectiveArg>,
    wait: Duration,
    json: bool,
) -> Result<()> {
    let cluster = ClusterFile::load(cluster_path)?;

    let mut settings = cluster.scheduler.clone().unwrap_or(config.scheduler);
    if let Some(a) = algorithm {
        settings.algorithm = a.into();
    }
    if let Some(o) = objective {
        settings.objective = o.into();
    }
    // Every attempt, retries included, must fit in the event buffer
    let attempts = cluster.tasks.len() * (settings.retry.max_retries as usize + 1);
    settings.event_capacity = settings.event_capacity.max(attempts);
    config.scheduler = settings;

    let scheduler = LightrailScheduler::new(config.scheduler.clone())?;
    cluster.register_devices(&scheduler)?;

    let mut events = scheduler.subscribe();
    let batch = scheduler.submit_batch(cluster.tasks.clone());
    if let Some(e) = &batch.error {
        warn!("Submitted {} of {} tasks: {}", batch.accepted.len(), cluster.tasks.len(), e);
    }

    scheduler.start()?;
    let mut outstanding = batch.accepted.len();
    while outstanding > 0 {
        match tokio::time::timeout(wait, events.recv()).await {
            Ok(Ok(SchedulingEvent::Failed { will_retry: true, .. })) => {}
            Ok(Ok(_)) => outstanding -= 1,
            Ok(Err(RecvError::Lagged(n))) => {
                warn!("Missed {} scheduling events", n);
                break;
            }
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {
                warn!("Timed out with {} tasks undecided", outstanding);
                break;
            }
        }
    }
    scheduler.stop().await;

    let report = RunReport::collect(&scheduler, &batch);
    info!(
        "Run finished: {} scheduled, {} failed",
        report.scheduled_count(),
        report.tasks.len() - report.scheduled_count()
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_table());
    }
    Ok(())
}

fn route(
    config: LightrailConfig,
    cluster_path: &std::path::Path,
    from: u32,
    to: u32,
    objective: Objective,
    json: bool,
) -> Result<()> {
    let cluster = ClusterFile::load(cluster_path)?;
    let scheduler = LightrailScheduler::new(cluster.scheduler.clone().unwrap_or(config.scheduler))?;
    cluster.register_devices(&scheduler)?;

    let route = scheduler.shortest_path(from, to, objective)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&route)?);
    } else {
        print!("{}", report::render_route(&route));
    }
    Ok(())
}
