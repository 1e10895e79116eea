//! Command-line interface definitions using clap.

use crate::discovery::{DEFAULT_EXTENSIONS, DEFAULT_IGNORE_FILE};
use crate::logging::LogFormat;
use crate::pipeline::DEFAULT_BATCH_SIZE;
use crate::worker::{Isolation, Mode};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Format many files in parallel across a pool of isolated workers.
#[derive(Parser, Debug)]
#[command(name = "parafmt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Files or directories to format (default: current directory).
    pub paths: Vec<PathBuf>,

    /// Report files that would be reformatted and exit non-zero if any.
    #[arg(short = 'c', long, visible_alias = "list-different", conflicts_with = "write")]
    pub check: bool,

    /// Rewrite files in place.
    #[arg(short, long)]
    pub write: bool,

    /// Maximum number of execution units.
    #[arg(
        short = 'j',
        long,
        env = "PARAFMT_CONCURRENCY",
        default_value_t = default_concurrency(),
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub concurrency: u32,

    /// Files per batch sent to a unit.
    #[arg(
        long,
        default_value_t = DEFAULT_BATCH_SIZE as u32,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub batch_size: u32,

    /// Isolation mechanism for execution units.
    #[arg(long, value_enum, env = "PARAFMT_ISOLATION", default_value_t = IsolationArg::Process)]
    pub isolation: IsolationArg,

    /// Ignore file with one pattern per line.
    #[arg(long, default_value = DEFAULT_IGNORE_FILE)]
    pub ignore_path: PathBuf,

    /// Extensions picked up when walking directories (comma separated).
    #[arg(long = "ext", value_delimiter = ',', default_values_t = default_extensions())]
    pub extensions: Vec<String>,

    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Hide the progress spinner.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log output format [default: compact].
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Run as an execution unit (spawned by parafmt itself).
    #[arg(long, hide = true)]
    pub internal_worker: bool,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_concurrency() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

/// Isolation argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationArg {
    /// Child processes re-executing this binary.
    #[default]
    Process,
    /// Dedicated threads inside this process.
    Thread,
}

impl From<IsolationArg> for Isolation {
    fn from(arg: IsolationArg) -> Self {
        match arg {
            IsolationArg::Process => Isolation::Process,
            IsolationArg::Thread => Isolation::Thread,
        }
    }
}

/// Log format argument.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Default: warnings and errors.
    Normal,
    /// -v: pool and pipeline progress.
    Info,
    /// -vv: per-batch dispatch details.
    Debug,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}

/// Which side of the pool this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Controller,
    Unit,
}

impl Cli {
    /// Get the verbosity level based on -v flags.
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from(self.verbose)
    }

    pub fn role(&self) -> Role {
        if self.internal_worker {
            Role::Unit
        } else {
            Role::Controller
        }
    }

    /// Whether log output may use ANSI colors on a stderr that is (or is
    /// not) a terminal.
    pub fn log_ansi(&self, stderr_is_terminal: bool) -> bool {
        stderr_is_terminal && !self.no_color
    }

    pub fn mode(&self) -> Mode {
        Mode::from_flags(self.check, self.write)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency as usize
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Cli::try_parse_from(["parafmt"]).unwrap();
        assert!(args.paths.is_empty());
        assert_eq!(args.mode(), Mode::Print);
        assert_eq!(args.batch_size(), 50);
        assert!(args.concurrency() >= 1);
        assert_eq!(args.ignore_path, PathBuf::from(".parafmtignore"));
        assert!(args.extensions.contains(&"rs".to_string()));
        assert_eq!(args.role(), Role::Controller);
        assert_eq!(args.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn test_check_mode() {
        let args = Cli::try_parse_from(["parafmt", "--check", "src"]).unwrap();
        assert_eq!(args.mode(), Mode::Assert);
        assert_eq!(args.paths, vec![PathBuf::from("src")]);

        let args = Cli::try_parse_from(["parafmt", "--list-different"]).unwrap();
        assert_eq!(args.mode(), Mode::Assert);
    }

    #[test]
    fn test_write_mode() {
        let args = Cli::try_parse_from(["parafmt", "-w", "a.txt", "b.txt"]).unwrap();
        assert_eq!(args.mode(), Mode::Write);
        assert_eq!(args.paths.len(), 2);
    }

    #[test]
    fn test_check_conflicts_with_write() {
        assert!(Cli::try_parse_from(["parafmt", "--check", "--write"]).is_err());
    }

    #[test]
    fn test_pool_options() {
        let args = Cli::try_parse_from([
            "parafmt",
            "-j",
            "3",
            "--batch-size",
            "7",
            "--isolation",
            "thread",
        ])
        .unwrap();
        assert_eq!(args.concurrency(), 3);
        assert_eq!(args.batch_size(), 7);
        assert_eq!(Isolation::from(args.isolation), Isolation::Thread);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(Cli::try_parse_from(["parafmt", "-j", "0"]).is_err());
        assert!(Cli::try_parse_from(["parafmt", "--batch-size", "0"]).is_err());
    }

    #[test]
    fn test_extension_list() {
        let args = Cli::try_parse_from(["parafmt", "--ext", "md,txt"]).unwrap();
        assert_eq!(args.extensions, vec!["md", "txt"]);
    }

    #[test]
    fn test_global_options() {
        let args = Cli::try_parse_from(["parafmt", "-vv", "--no-color", "--log-format", "json"])
            .unwrap();
        assert_eq!(args.verbosity(), Verbosity::Debug);
        assert!(args.no_color);
        assert_eq!(args.log_format.map(LogFormat::from), Some(LogFormat::Json));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["parafmt", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_log_ansi_needs_terminal() {
        let args = Cli::try_parse_from(["parafmt"]).unwrap();
        assert!(!args.log_ansi(false));
        assert_eq!(args.log_ansi(true), !args.no_color);

        let args = Cli::try_parse_from(["parafmt", "--no-color"]).unwrap();
        assert!(!args.log_ansi(true));
    }

    #[test]
    fn test_internal_worker_role() {
        let args = Cli::try_parse_from(["parafmt", "--internal-worker"]).unwrap();
        assert_eq!(args.role(), Role::Unit);
    }
}
