//! `latency-bench` entry point.
//!
//! Loads the orchestrator configuration, binds the selected hardware
//! backend, and runs measurement sessions until the pass limit or a stop
//! signal.

mod signals;

use anyhow::{bail, Context, Result};
use bench_common::{BackendKind, OrchestratorConfig, SessionLimit};
use bench_hal::{Board, EdgeSequencer, SimulatedBench};
use bench_runtime::{FileSink, PassSummary, RunSummary, Session};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::signals::SignalHandler;

/// Latency bench command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "latency-bench",
    about = "Orchestrate GPIO latency measurements across devices under test",
    version,
    long_about = None
)]
struct Args {
    /// Path to an orchestrator configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of passes, or "unbounded" (overrides config file).
    #[arg(long, short = 'n', value_parser = parse_sessions)]
    sessions: Option<SessionLimit>,

    /// Use the simulated bench instead of real hardware.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Results file (overrides config file).
    #[arg(long, short = 'o', value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Also print every logged pass as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn parse_sessions(value: &str) -> Result<SessionLimit, String> {
    match value {
        "unbounded" | "forever" => Ok(SessionLimit::Unbounded),
        n => match n.parse::<u64>() {
            Ok(0) => Err("session count must be at least 1".into()),
            Ok(n) => Ok(SessionLimit::Count(n)),
            Err(_) => Err(format!("expected a positive integer or \"unbounded\", got {n:?}")),
        },
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting latency bench");
    info!(
        backend = ?config.backend,
        sessions = %config.sessions,
        log = %config.log.path.display(),
        strict = config.strict_handshake,
        "Configuration loaded"
    );
    if config.handshake_timeout.is_none() {
        info!("No handshake timeout configured, a silent device stalls the run");
    }

    let signals = SignalHandler::new().context("Failed to set up signal handlers")?;

    let summary = match config.backend {
        BackendKind::Simulated => {
            let bench = SimulatedBench::from_config(&config)
                .context("Failed to build simulated bench")?;
            run_session(config, bench.board(), bench.sequencer(), &signals, args.json)?
        }
        BackendKind::Sysfs => run_sysfs(config, &signals, args.json)?,
    };

    info!(
        passes = summary.passes,
        failed = summary.failed_measurements,
        aborted = summary.aborted_passes,
        stopped_by_signal = summary.stop_requested,
        signals = signals.state().signal_count(),
        "Latency bench finished"
    );

    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "latency_bench={level},bench_runtime={level},bench_hal={level},bench_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `BENCH_CONFIG_PATH` environment variable
/// 3. `/etc/latency-bench/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<OrchestratorConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return OrchestratorConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("BENCH_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from BENCH_CONFIG_PATH");
            return OrchestratorConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from BENCH_CONFIG_PATH={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "BENCH_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/latency-bench/config.toml", "config/default.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(?path, "Loading config");
            return OrchestratorConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(OrchestratorConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut OrchestratorConfig, args: &Args) {
    if let Some(sessions) = args.sessions {
        config.sessions = sessions;
    }
    if args.simulated {
        config.backend = BackendKind::Simulated;
    }
    if let Some(path) = &args.log_file {
        config.log.path.clone_from(path);
    }
}

#[cfg(target_os = "linux")]
fn run_sysfs(
    config: OrchestratorConfig,
    signals: &SignalHandler,
    json: bool,
) -> Result<RunSummary> {
    use bench_hal::{MonotonicCounter, SysfsBoard, ThreadSequencer};

    let clock = config.clock()?;
    let counter = MonotonicCounter::new(clock);
    let board = SysfsBoard::open(&config.sysfs, &config.devices, counter)
        .context("Failed to open sysfs GPIO")?;
    let sequencer = ThreadSequencer::spawn(&config.sysfs, &config.devices, counter)
        .context("Failed to start sequencer thread")?;
    run_session(config, board, sequencer, signals, json)
}

#[cfg(not(target_os = "linux"))]
fn run_sysfs(
    _config: OrchestratorConfig,
    _signals: &SignalHandler,
    _json: bool,
) -> Result<RunSummary> {
    bail!("the sysfs backend is only available on Linux; use --simulated")
}

/// Run one session over the given hardware.
fn run_session<B, S>(
    config: OrchestratorConfig,
    board: B,
    sequencer: S,
    signals: &SignalHandler,
    json: bool,
) -> Result<RunSummary>
where
    B: Board,
    S: EdgeSequencer,
{
    let sink = FileSink::new(&config.log.path);
    let mut session =
        Session::new(config, board, sequencer, sink).context("Failed to create session")?;

    let mut print_error = None;
    let summary = session.run_with(
        || signals.stop_requested(),
        |pass: &PassSummary| {
            if json && print_error.is_none() {
                if let Err(e) = print_json(pass) {
                    print_error = Some(e);
                }
            }
        },
    );
    if let Some(e) = print_error {
        warn!(error = %e, "Failed to print pass as JSON");
    }

    let summary = summary.context("Measurement run failed")?;
    if summary.passes == 0 && !summary.stop_requested {
        bail!("run ended without logging a pass");
    }
    Ok(summary)
}

fn print_json(pass: &PassSummary) -> Result<()> {
    let json = serde_json::to_string(pass)?;
    println!("{json}");
    Ok(())
}
