//! Constants and default configuration values for cachevisor.
//!
//! Centralizes magic numbers, strings and defaults used by the supervisor,
//! the heartbeat reporter and the cache probe.

use std::time::Duration;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "cachevisor.yaml";

/// Program used to drive the managed service's lifecycle.
pub const DEFAULT_CONTROL_PROGRAM: &str = "service";

/// Fraction of the cache filesystem the cache is allowed to fill.
pub const DEFAULT_MAX_FS_FRACTION: f64 = 0.99;

/// Time allowed for the probe's ping of the xrootd endpoint.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between the two advertisements of a heartbeat cycle.
///
/// The collector expires an advertised record on its own schedule; two
/// advertisements per cycle keep a fresh record in place across one missed
/// cycle.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Default shell used for executing collector command templates.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

/// Template placeholder replaced with the local hostname.
pub const HOSTNAME_PLACEHOLDER: &str = "{hostname}";

/// Template placeholder replaced with the located master record.
pub const MASTER_PLACEHOLDER: &str = "{master}";

/// Environment variable carrying the hostname into collector commands.
pub const HOSTNAME_ENV: &str = "CACHEVISOR_HOSTNAME";

/// Environment variable carrying the master record into collector commands.
pub const MASTER_ENV: &str = "CACHEVISOR_MASTER";

// ============================================================================
// xrootd Constants
// ============================================================================

/// URL schemes accepted for the probe target.
pub const XROOTD_SCHEMES: [&str; 2] = ["root", "xroot"];

/// Port used when the probe URL does not name one.
pub const XROOTD_DEFAULT_PORT: u16 = 1094;

/// Suffix of the per-file metadata written by the xrootd proxy cache.
pub const CINFO_SUFFIX: &str = ".cinfo";

/// Size of the block unit reported by `st_blocks`.
pub const STAT_BLOCK_SIZE: u64 = 512;
