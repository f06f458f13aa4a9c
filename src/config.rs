//! Configuration management for cachevisor.
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::Path, sync::OnceLock, time::Duration};

use crate::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_CONTROL_PROGRAM, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_MAX_FS_FRACTION, DEFAULT_PROBE_TIMEOUT,
};
use crate::error::ConfigError;

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// The managed cache service.
    pub service: ServiceSection,
    /// How the service's health is probed.
    pub probe: ProbeSection,
    /// How the collector is reached.
    pub collector: CollectorSection,
    /// Heartbeat pacing.
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
}

/// The service driven through its lifecycle program.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSection {
    /// Name passed to the lifecycle program (e.g. `xrootd`).
    pub name: String,
    /// Lifecycle program, invoked as `<control> <name> <command>`.
    #[serde(default = "default_control")]
    pub control: String,
}

/// Cache health probe settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ProbeSection {
    /// xrootd endpoint, e.g. `root://localhost:1094`.
    pub url: String,
    /// Top-level directory of the cache; each subdirectory is a VO.
    pub cache_root: String,
    /// Fraction of the filesystem reserved for the cache.
    #[serde(default = "default_max_fs_fraction")]
    pub max_fs_fraction: f64,
    /// Ping timeout, e.g. `10s`.
    pub timeout: Option<String>,
}

/// Collector command templates.
///
/// `{hostname}` and `{master}` reach the command through environment
/// variables; write them bare or inside double quotes, never single quotes.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorSection {
    /// Overrides the hostname used to locate the master.
    pub hostname: Option<String>,
    /// Prints the master record on stdout; empty output means not yet registered.
    pub locate: String,
    /// Sends a keepalive to the located master.
    pub keepalive: String,
    /// Reads ClassAds on stdin and publishes them.
    pub advertise: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HeartbeatSection {
    pub interval: Option<String>,
}

fn default_control() -> String {
    DEFAULT_CONTROL_PROGRAM.to_string()
}

fn default_max_fs_fraction() -> f64 {
    DEFAULT_MAX_FS_FRACTION
}

impl ProbeSection {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        match self.timeout.as_deref() {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_PROBE_TIMEOUT),
        }
    }
}

impl CollectorSection {
    /// Hostname used to locate the master: the configured override, else the
    /// local hostname.
    pub fn hostname(&self) -> Result<String, ConfigError> {
        if let Some(hostname) = self.hostname.as_deref().map(str::trim)
            && !hostname.is_empty()
        {
            return Ok(hostname.to_string());
        }

        let hostname = nix::unistd::gethostname().map_err(ConfigError::Hostname)?;
        hostname.into_string().map_err(|raw| {
            ConfigError::Invalid(format!("hostname {raw:?} is not valid UTF-8"))
        })
    }
}

impl HeartbeatSection {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        match self.interval.as_deref() {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_HEARTBEAT_INTERVAL),
        }
    }
}

impl Config {
    /// Rejects values that deserialize fine but cannot be used.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name cannot be empty".into()));
        }

        let fraction = self.probe.max_fs_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "probe.max_fs_fraction must be in (0, 1], got {fraction}"
            )));
        }

        self.probe.timeout()?;
        self.heartbeat.interval()?;
        Ok(())
    }
}

/// Parses `10s`, `5m`, `2h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("valid env var regex")
    })
}

/// Expands environment variables within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = env_var_pattern();
    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        return Err(ConfigError::MissingEnvVar(missing));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.to_string())
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
    let config_path = Path::new(config_path.unwrap_or(DEFAULT_CONFIG_FILE));

    let content = fs::read_to_string(config_path).map_err(|e| {
        ConfigError::Read(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let config: Config = serde_yaml::from_str(&expanded_content)?;
    config.validate()?;
    Ok(config)
}
