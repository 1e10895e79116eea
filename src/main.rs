//! parafmt - parallel file formatter

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::IsTerminal;
use tracing::{Level, debug, info};

use parafmt::cli::{Cli, Role, Verbosity};
use parafmt::discovery::{DiscoveryConfig, IgnoreSet, discover};
use parafmt::logging::{self, LogConfig};
use parafmt::pipeline::{PipelineConfig, run_pipeline};
use parafmt::report::{ProgressReporter, RunSummary};
use parafmt::worker::{
    Isolation, Mode, PoolConfig, ProcessLauncher, ThreadLauncher, UnitLauncher, WorkerPool,
    run_worker_main,
};

/// Program entry point.
///
/// In the unit role this never returns. In the controller role it formats
/// the requested paths, prints the error chain on a fatal failure and exits
/// with the run's status code.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    if cli.role() == Role::Unit {
        logging::init(LogConfig::for_worker().with_env_overrides());
        run_worker_main();
    }

    let log_config = controller_log_config(&cli);
    logging::init(log_config.clone());

    match run(&cli, &log_config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!(
                "{}: {}",
                "error"
                    .if_supports_color(Stderr, |text| text.red())
                    .if_supports_color(Stderr, |text| text.bold()),
                e
            );
            for cause in e.chain().skip(1) {
                eprintln!(
                    "  {}: {}",
                    "caused by".if_supports_color(Stderr, |text| text.yellow()),
                    cause
                );
            }
            std::process::exit(1);
        }
    }
}

/// Logging for the controller. `-v` flags win over environment filters.
fn controller_log_config(cli: &Cli) -> LogConfig {
    let ansi = cli.log_ansi(std::io::stderr().is_terminal());
    let mut config = LogConfig::for_cli().with_ansi(ansi);
    match cli.verbosity() {
        Verbosity::Normal => {}
        Verbosity::Info => config = config.with_filter(Level::INFO.to_string().to_lowercase()),
        Verbosity::Debug => config = config.with_filter(Level::DEBUG.to_string().to_lowercase()),
    }
    let mut config = config.with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format.into());
    }
    config
}

fn run(cli: &Cli, log_config: &LogConfig) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let summary = runtime.block_on(format_paths(cli, log_config))?;
    Ok(summary.exit_code(cli.mode() == Mode::Assert))
}

async fn format_paths(cli: &Cli, log_config: &LogConfig) -> Result<RunSummary> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let ignore = IgnoreSet::load(&cwd.join(&cli.ignore_path))?;

    let mut discovery = DiscoveryConfig::new(&cwd, cli.paths.clone());
    discovery.extensions = cli.extensions.clone();
    discovery.ignore = ignore;

    let isolation = Isolation::from(cli.isolation);
    info!(
        mode = ?cli.mode(),
        concurrency = cli.concurrency(),
        batch_size = cli.batch_size(),
        %isolation,
        "Starting run"
    );

    match isolation {
        Isolation::Process => {
            let mut launcher = ProcessLauncher::current_exe()?;
            for (key, value) in log_config.worker_env() {
                launcher = launcher.with_env(key, value);
            }
            drive(launcher, cli, discovery).await
        }
        Isolation::Thread => drive(ThreadLauncher::default(), cli, discovery).await,
    }
}

/// Run discovery through the pool and report every result.
async fn drive<L: UnitLauncher>(
    launcher: L,
    cli: &Cli,
    discovery: DiscoveryConfig,
) -> Result<RunSummary> {
    let mode = cli.mode();
    let pool = WorkerPool::start(
        launcher,
        PoolConfig {
            concurrency: cli.concurrency(),
            mode,
        },
    )?;
    let pipeline = PipelineConfig::for_concurrency(cli.concurrency(), cli.batch_size());

    let mut reporter = ProgressReporter::new(mode, cli.quiet, std::io::stdout());
    let outcome = run_pipeline(&pool, discover(discovery), pipeline, |result| {
        reporter.record(&result)
    })
    .await;

    let stats = pool.shutdown().await;
    debug!(?stats, "Pool stopped");

    let batches = outcome.map_err(|e| {
        let context = if e.is_fatal_unit_error() {
            "Formatting aborted: an execution unit stopped"
        } else {
            "Formatting aborted"
        };
        anyhow::Error::new(e).context(context)
    })?;
    let summary = reporter.finish();
    info!(
        batches,
        files = summary.total,
        reformatted = summary.reformatted,
        failed = summary.failed,
        "Run complete"
    );
    Ok(summary)
}
