//! Command-line interface for cachevisor.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::{DEFAULT_CONFIG_FILE, DEFAULT_MAX_FS_FRACTION};

/// Log level given by name (`info`, `debug`, ...) or number (0 = off .. 5 = trace).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(pub LevelFilter);

impl LogLevelArg {
    /// Directive string for `EnvFilter`.
    pub fn as_directive(&self) -> String {
        self.0.to_string().to_ascii_lowercase()
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            const BY_NUMBER: [LevelFilter; 6] = [
                LevelFilter::OFF,
                LevelFilter::ERROR,
                LevelFilter::WARN,
                LevelFilter::INFO,
                LevelFilter::DEBUG,
                LevelFilter::TRACE,
            ];
            return BY_NUMBER
                .get(number as usize)
                .copied()
                .map(LogLevelArg)
                .ok_or_else(|| format!("unsupported log level number '{number}' (expected 0-5)"));
        }

        LevelFilter::from_str(&trimmed.to_ascii_lowercase())
            .map(LogLevelArg)
            .map_err(|_| format!("invalid log level '{trimmed}'"))
    }
}

/// Command-line interface for cachevisor.
#[derive(Parser)]
#[command(name = "cachevisor", version, author)]
#[command(about = "Supervises an xrootd cache and reports its health to a collector", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for cachevisor.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the cache service and supervise it until stopped.
    Run {
        /// Path to the configuration file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },

    /// Collect one health record and print it as JSON.
    Probe {
        /// xrootd URL of the cache, e.g. `root://localhost:1094`.
        url: String,

        /// Top-level cache directory.
        cache_root: String,

        /// Fraction of the filesystem the cache may use.
        #[arg(default_value_t = DEFAULT_MAX_FS_FRACTION)]
        max_fs_fraction: f64,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
