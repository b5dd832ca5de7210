//! swarmrun: launch N solver agents in parallel and report the first
//! correct solution.

use std::error::Error;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use swarmrun_core::RunId;
use swarmrun_worker::{
    CancellationPropagator, OutcomeStream, PoolStopHandle, ProcessPool, ResultAggregator, Signal,
    DEFAULT_GRACE_PERIOD,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod json_output;
mod report;

use config::{parse_prompts, timeout_from_secs, Config};

/// Exit status for setup errors, distinct from "no solution found".
const SETUP_ERROR_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "swarmrun")]
#[command(about = "Run parallel solver agents and report the first correct solution")]
#[command(version)]
struct Cli {
    /// Problem statement passed to every agent
    problem_file: PathBuf,

    /// Number of agents to launch
    #[arg(short, long, default_value = "10")]
    num_agents: usize,

    /// Maximum number of agents running at once (default: all)
    #[arg(short = 'w', long)]
    max_workers: Option<usize>,

    /// Timeout per agent in seconds (0 or unset: no limit)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Agent program to launch
    #[arg(short, long, default_value = "agent.py")]
    agent_file: PathBuf,

    /// Interpreter used to run the agent program (e.g. python3)
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Working directory for the agents
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Comma separated auxiliary prompts forwarded to every agent
    #[arg(short, long)]
    other_prompts: Option<String>,

    /// Directory for per-agent log files
    #[arg(short = 'd', long, default_value = "logs")]
    log_dir: PathBuf,

    /// Stop every other agent as soon as one finds a solution
    #[arg(short, long)]
    exit_immediately: bool,

    /// Milliseconds between SIGTERM and SIGKILL when stopping early
    #[arg(long, default_value_t = DEFAULT_GRACE_PERIOD.as_millis() as u64)]
    grace_ms: u64,

    /// Print one JSON event per line instead of text
    #[arg(long)]
    json: bool,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            problem_file: cli.problem_file,
            num_agents: cli.num_agents,
            max_workers: cli.max_workers,
            timeout: timeout_from_secs(cli.timeout),
            agent_file: cli.agent_file,
            interpreter: cli.interpreter,
            working_dir: cli.working_dir,
            other_prompts: cli
                .other_prompts
                .as_deref()
                .map(parse_prompts)
                .unwrap_or_default(),
            log_dir: cli.log_dir,
            exit_immediately: cli.exit_immediately,
            grace_period: Duration::from_millis(cli.grace_ms),
            json: cli.json,
        }
    }
}

/// Filter used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "swarmrun=debug,swarmrun_worker=debug,swarmrun_core=debug"
    } else {
        "swarmrun=info,swarmrun_worker=info"
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from(cli);
    if config.json {
        json_output::enable_json_mode();
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("Error: {e}");
            ExitCode::from(SETUP_ERROR_EXIT)
        }
    }
}

async fn run(config: Config) -> Result<ExitCode, Box<dyn Error>> {
    config.validate()?;

    let run_id = RunId::generate();
    info!(run_id = %run_id, tasks = config.num_agents, width = config.pool_width(), "Starting run");
    report::banner(&config, &run_id);

    let propagator_config = config.propagator_config();
    let pool = ProcessPool::new(config.pool_width(), config.tasks(), config.wrapper_config())?
        .with_exit_policy(propagator_config.policy);
    let stop = pool.stop_handle();
    let mut propagator = CancellationPropagator::new(propagator_config, stop.clone());
    let mut aggregator = ResultAggregator::new(config.num_agents, &config.log_dir);
    let mut outcomes = pool.start();

    consume(
        &mut outcomes,
        &stop,
        &mut propagator,
        &mut aggregator,
        tokio::signal::ctrl_c(),
    )
    .await;

    let summary = aggregator.summary();
    report::summary(&summary, &config.log_dir);
    info!(
        run_id = %run_id,
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        "Run finished"
    );

    // exit_code() is 0 or 1
    Ok(ExitCode::from(summary.exit_code() as u8))
}

/// Feed every outcome to the aggregator and propagator until the pool drains.
///
/// `interrupt` resolving hard-stops the pool with SIGINT; outcomes of the
/// interrupted agents are still collected.
async fn consume<F>(
    outcomes: &mut OutcomeStream,
    stop: &PoolStopHandle,
    propagator: &mut CancellationPropagator,
    aggregator: &mut ResultAggregator,
    interrupt: F,
) where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            next = outcomes.next() => {
                let Some(outcome) = next else { break };
                let first_success = aggregator.record(&outcome).await.cloned();
                report::outcome(
                    &outcome,
                    first_success.as_ref(),
                    aggregator.completed(),
                    aggregator.total(),
                );

                if let Some(hard_stop) = propagator.intercept(&outcome).await {
                    report::early_exit(aggregator.winner(), &hard_stop.report, aggregator.elapsed());
                    hard_stop.execute();
                }
            }
            signal = &mut interrupt, if !interrupted => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                interrupted = true;
                let signalled = stop.hard_stop(Signal::SIGINT);
                debug!(signalled, "Interrupt received, stopping pool");
                aggregator.mark_interrupted();
                report::interrupted();
            }
        }
    }
}
