//! Error handling for cachevisor.
use thiserror::Error;

/// Errors raised while driving the managed service's lifecycle command.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The `start` lifecycle command exited non-zero.
    #[error("Failed to start service: {output}")]
    StartFailed {
        /// Combined stdout/stderr of the failed invocation.
        output: String,
    },

    /// The `status` output did not contain a `(pid N)` marker.
    #[error("No PID found in service status output: {output:?}")]
    PidNotFound {
        /// The raw status output that was searched.
        output: String,
    },

    /// The lifecycle program could not be spawned or waited on.
    #[error("Failed to run lifecycle command `{command}`: {source}")]
    Spawn {
        /// The command line that failed to run.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Delivering the termination signal to the service failed.
    #[error("Failed to signal service process {pid}: {source}")]
    Signal {
        /// The PID that could not be signalled.
        pid: i32,
        /// The errno reported by the kernel.
        #[source]
        source: nix::errno::Errno,
    },
}

/// Errors raised by a collector client.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The master record has not been published yet; callers may retry.
    #[error("Master record not yet available")]
    NotYetAvailable,

    /// The collector could not be reached or rejected the request.
    #[error("Collector communication failed: {0}")]
    Communication(String),

    /// Running the collector command failed locally.
    #[error("Collector command I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failures detected by the heartbeat reporter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisionFailure {
    /// Locating the master, sending a keepalive or advertising failed.
    #[error("Collector unreachable: {0}")]
    CollectorUnreachable(String),

    /// The health probe reported the service as not ok.
    #[error("Service unresponsive: {0}")]
    ServiceUnresponsive(String),
}

impl From<CollectorError> for SupervisionFailure {
    fn from(err: CollectorError) -> Self {
        SupervisionFailure::CollectorUnreachable(err.to_string())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration references an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration field could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// The local hostname could not be determined.
    #[error("Failed to read local hostname: {0}")]
    Hostname(#[source] nix::errno::Errno),

    /// A field holds a value outside its accepted range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised when building a health probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe target is not an xrootd URL.
    #[error("URL '{0}' is not an xrootd url")]
    InvalidUrl(String),
}

/// Top-level error for a supervisor run; every variant maps to exit code 1.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The service could not be started, so there is nothing to supervise.
    #[error("Startup failed: {0}")]
    Startup(#[source] ServiceError),

    /// A lifecycle operation failed while handling a control signal.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The heartbeat reporter delivered a terminal failure.
    #[error(transparent)]
    Failure(#[from] SupervisionFailure),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Registering signal handlers or spawning threads failed.
    #[error("Supervisor I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Every event producer went away while the loop was idle.
    #[error("Supervisor event inbox closed unexpectedly")]
    InboxClosed,
}
