//! Health probing of the xrootd cache service.
//!
//! A probe produces a [`HealthRecord`]: a status plus a flat-ish metrics map
//! that is advertised to the collector as a ClassAd.
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::{
    fmt::Write as _,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::PathBuf,
    time::{Duration, Instant},
};
use strum_macros::{AsRefStr, Display};
use tracing::debug;

use crate::constants::{XROOTD_DEFAULT_PORT, XROOTD_SCHEMES};
use crate::error::ProbeError;

/// `.cinfo` metadata reader.
pub mod cinfo;

/// Cache directory scanning and filesystem usage.
pub mod cache;

/// Outcome of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Failure,
}

/// Snapshot of the service's status and metrics from one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub metrics: Map<String, Value>,
}

impl HealthRecord {
    pub fn new(status: HealthStatus, metrics: Map<String, Value>) -> Self {
        Self { status, metrics }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }

    /// Short reason for a non-ok record, taken from the ping message when present.
    pub fn reason(&self) -> String {
        match self.metrics.get("ping_response_message") {
            Some(Value::String(message)) if !message.is_empty() => message.clone(),
            _ => format!("probe reported status {}", self.status),
        }
    }

    /// Renders the metrics in old ClassAd syntax, one `Attr = value` per line.
    pub fn to_classad(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.metrics {
            let _ = writeln!(out, "{} = {}", classad_name(key), classad_value(value));
        }
        out
    }
}

/// Renders an attribute name, quoting it when it is not a plain identifier.
fn classad_name(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        return name.to_string();
    }
    format!("'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Renders a JSON value as a ClassAd expression literal.
fn classad_value(value: &Value) -> String {
    match value {
        Value::Null => "undefined".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => {
            format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(classad_value).collect();
            format!("{{ {} }}", items.join(", "))
        }
        Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{} = {}", classad_name(key), classad_value(value)))
                .collect();
            format!("[ {} ]", fields.join("; "))
        }
    }
}

/// Queries the managed service and reports its health.
pub trait HealthProbe {
    fn probe(&self) -> HealthRecord;
}

/// Probes an xrootd cache: endpoint reachability plus cache usage statistics.
#[derive(Debug, Clone)]
pub struct CacheProbe {
    url: String,
    /// `host:port` exactly as written in the URL.
    authority: String,
    host: String,
    port: u16,
    cache_root: PathBuf,
    max_fs_fraction: f64,
    timeout: Duration,
}

impl CacheProbe {
    pub fn new(
        url: &str,
        cache_root: impl Into<PathBuf>,
        max_fs_fraction: f64,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let invalid = || ProbeError::InvalidUrl(url.to_string());

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        if !XROOTD_SCHEMES.contains(&scheme) {
            return Err(invalid());
        }

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = split_host_port(authority).ok_or_else(invalid)?;

        Ok(Self {
            url: url.to_string(),
            authority: authority.to_string(),
            host,
            port,
            cache_root: cache_root.into(),
            max_fs_fraction,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connects to the xrootd endpoint and reports how that went.
    fn ping(&self) -> Map<String, Value> {
        let started = Instant::now();
        let outcome = self.connect();
        let elapsed = started.elapsed().as_secs_f64();

        let mut map = Map::new();
        match outcome {
            Ok(addr) => {
                debug!("xrootd endpoint {addr} answered in {elapsed:.3}s");
                map.insert("ping_response_status".into(), json!("ok"));
                map.insert("ping_response_code".into(), json!(0));
                map.insert("ping_response_message".into(), json!(""));
                map.insert("ping_elapsed_time".into(), json!(elapsed));
            }
            Err(err) => {
                debug!("xrootd endpoint {} unreachable: {err}", self.authority);
                map.insert("ping_response_status".into(), json!("failed"));
                map.insert("ping_response_code".into(), json!(-1));
                map.insert("ping_response_message".into(), json!(err.to_string()));
                map.insert("ping_elapsed_time".into(), json!(0.0));
            }
        }
        map
    }

    fn connect(&self) -> std::io::Result<SocketAddr> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return Ok(addr),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {}", self.host),
            )
        }))
    }

    /// Collects the full statistics record.
    pub fn collect(&self) -> HealthRecord {
        let started = Instant::now();

        let mut metrics = Map::new();
        metrics.insert("MyType".into(), json!("Machine"));
        metrics.insert("Name".into(), json!(format!("xrootd@{}", self.authority)));
        metrics.insert("stats_time".into(), json!(Utc::now().timestamp()));

        let ping = self.ping();
        let status = match ping.get("ping_response_status") {
            Some(Value::String(status)) if status == "ok" => HealthStatus::Ok,
            _ => HealthStatus::Failure,
        };
        metrics.extend(ping);

        if let Some(usage) = cache::cache_usage(&self.cache_root, self.max_fs_fraction) {
            metrics.extend(usage.to_metrics());
        }

        let per_vo = cache::scan_cache_dirs(&self.cache_root);
        let totals = cache::total(&per_vo);
        let vo_metrics: Map<String, Value> = per_vo
            .iter()
            .map(|(name, stats)| (name.clone(), Value::Object(stats.to_metrics())))
            .collect();

        metrics.insert("VO".into(), Value::Object(vo_metrics));
        metrics.insert("used_cache_bytes".into(), json!(totals.used_bytes));
        metrics.insert("total_nfiles".into(), json!(totals.nfiles));
        metrics.insert("total_naccesses".into(), json!(totals.naccesses));
        if totals.most_recent_access_time > 0 {
            metrics.insert(
                "most_recent_access_time".into(),
                json!(totals.most_recent_access_time),
            );
        }
        metrics.insert(
            "time_to_collect_stats".into(),
            json!(started.elapsed().as_secs_f64()),
        );

        HealthRecord::new(status, metrics)
    }
}

impl HealthProbe for CacheProbe {
    fn probe(&self) -> HealthRecord {
        self.collect()
    }
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals.
fn split_host_port(authority: &str) -> Option<(String, u16)> {
    if authority.is_empty() {
        return None;
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => XROOTD_DEFAULT_PORT,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host.to_string(), port.parse().ok()?)),
        Some(_) => None,
        None => Some((authority.to_string(), XROOTD_DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use tempfile::tempdir;

    #[test]
    fn rejects_non_xrootd_urls() {
        for url in ["http://localhost:1094", "localhost:1094", "root://", "root://:99"] {
            assert!(
                matches!(
                    CacheProbe::new(url, "/tmp", 1.0, Duration::from_secs(1)),
                    Err(ProbeError::InvalidUrl(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            split_host_port("cache.example.org:2094"),
            Some(("cache.example.org".into(), 2094))
        );
        assert_eq!(
            split_host_port("cache.example.org"),
            Some(("cache.example.org".into(), 1094))
        );
        assert_eq!(split_host_port("[::1]:1095"), Some(("::1".into(), 1095)));
        assert_eq!(split_host_port("[::1]"), Some(("::1".into(), 1094)));
        assert_eq!(split_host_port("host:port"), None);
    }

    #[test]
    fn reachable_endpoint_is_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let root = tempdir().unwrap();
        let probe = CacheProbe::new(
            &format!("root://127.0.0.1:{port}//store"),
            root.path(),
            0.99,
            Duration::from_secs(2),
        )
        .unwrap();

        let record = probe.probe();
        assert!(record.is_ok());
        assert_eq!(
            record.metrics["Name"],
            json!(format!("xrootd@127.0.0.1:{port}"))
        );
        assert_eq!(record.metrics["ping_response_status"], json!("ok"));
        assert!(record.metrics.contains_key("total_cache_bytes"));
        assert_eq!(record.metrics["total_nfiles"], json!(0));
        assert!(!record.metrics.contains_key("most_recent_access_time"));
    }

    #[test]
    fn unreachable_endpoint_is_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let root = tempdir().unwrap();
        let probe = CacheProbe::new(
            &format!("xroot://127.0.0.1:{port}"),
            root.path(),
            0.99,
            Duration::from_secs(2),
        )
        .unwrap();

        let record = probe.probe();
        assert_eq!(record.status, HealthStatus::Failure);
        assert_eq!(record.metrics["ping_response_status"], json!("failed"));
        assert_eq!(record.metrics["ping_response_code"], json!(-1));
        assert!(!record.reason().is_empty());
    }

    #[test]
    fn classad_rendering() {
        let mut vo = Map::new();
        vo.insert("nfiles".into(), json!(2));
        vo.insert("used_bytes".into(), json!(4096));

        let mut metrics = Map::new();
        metrics.insert("Name".into(), json!("xrootd@host:1094"));
        metrics.insert("message".into(), json!("say \"hi\""));
        metrics.insert("free_cache_fraction".into(), json!(0.5));
        metrics.insert("VO".into(), json!({ "cms": vo }));

        let ad = HealthRecord::new(HealthStatus::Ok, metrics).to_classad();
        let lines: Vec<&str> = ad.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Name = \"xrootd@host:1094\"",
                "message = \"say \\\"hi\\\"\"",
                "free_cache_fraction = 0.5",
                "VO = [ cms = [ nfiles = 2; used_bytes = 4096 ] ]",
            ]
        );
    }

    #[test]
    fn classad_quotes_non_identifier_names() {
        let mut metrics = Map::new();
        metrics.insert(
            "VO".into(),
            json!({
                "my-vo": { "nfiles": 1 },
                "1000genomes": { "nfiles": 2 },
                "o'brien\\lab": { "nfiles": 3 },
                "_cms2": { "nfiles": 4 },
            }),
        );

        let ad = HealthRecord::new(HealthStatus::Ok, metrics).to_classad();
        assert_eq!(
            ad.trim_end(),
            "VO = [ 'my-vo' = [ nfiles = 1 ]; '1000genomes' = [ nfiles = 2 ]; \
             'o\\'brien\\\\lab' = [ nfiles = 3 ]; _cms2 = [ nfiles = 4 ] ]"
        );
    }
}
