//! Collector client: master lookup, keepalives and record advertisement.
use std::{
    io::Write,
    process::{Command, Output, Stdio},
};
use tracing::debug;

use crate::config::CollectorSection;
use crate::constants::{
    DEFAULT_SHELL, HOSTNAME_ENV, HOSTNAME_PLACEHOLDER, MASTER_ENV, MASTER_PLACEHOLDER,
    SHELL_COMMAND_FLAG,
};
use crate::error::CollectorError;
use crate::probe::HealthRecord;

/// Handle identifying the supervising master daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRecord(String);

impl MasterRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }
}

/// Operations the heartbeat reporter needs from the collector.
pub trait Collector {
    /// Finds the master record for `hostname`.
    ///
    /// Returns [`CollectorError::NotYetAvailable`] while the master has not
    /// registered yet; any other error is a communication failure.
    fn locate(&self, hostname: &str) -> Result<MasterRecord, CollectorError>;

    /// Tells the master this process is still alive.
    fn send_keepalive(&self, master: &MasterRecord) -> Result<(), CollectorError>;

    /// Publishes (or refreshes) health records at the collector.
    fn advertise(&self, records: &[HealthRecord]) -> Result<(), CollectorError>;
}

/// Collector client driven by shell command templates.
///
/// Templates are run with `sh -c`. `{hostname}` and `{master}` become quoted
/// references to environment variables holding the values, so the shell never
/// parses the values themselves. Placeholders must therefore appear bare, not
/// inside single quotes. Advertised ClassAds are written to the command's
/// stdin, separated by blank lines.
#[derive(Debug, Clone)]
pub struct CommandCollector {
    locate: String,
    keepalive: String,
    advertise: String,
}

impl CommandCollector {
    pub fn new(
        locate: impl Into<String>,
        keepalive: impl Into<String>,
        advertise: impl Into<String>,
    ) -> Self {
        Self {
            locate: locate.into(),
            keepalive: keepalive.into(),
            advertise: advertise.into(),
        }
    }

    pub fn from_config(section: &CollectorSection) -> Self {
        Self::new(&section.locate, &section.keepalive, &section.advertise)
    }

    fn run(
        &self,
        command: &str,
        env: &[(&str, &str)],
        stdin: Option<&str>,
    ) -> Result<Output, CollectorError> {
        debug!("Running collector command `{command}`");
        let mut child = Command::new(DEFAULT_SHELL)
            .arg(SHELL_COMMAND_FLAG)
            .arg(command)
            .envs(env.iter().copied())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // A command that exits without reading its input is judged by its exit status.
            match pipe.write_all(input.as_bytes()) {
                Err(err) if err.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(err.into());
                }
                _ => {}
            }
        }

        Ok(child.wait_with_output()?)
    }

    fn check(command: &str, output: Output) -> Result<Output, CollectorError> {
        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        Err(CollectorError::Communication(format!(
            "`{command}` exited with {}{}{}",
            output.status,
            if detail.is_empty() { "" } else { ": " },
            detail
        )))
    }
}

/// Replaces `placeholder` with a double-quoted expansion of `var`.
fn bind_placeholder(template: &str, placeholder: &str, var: &str) -> String {
    template.replace(placeholder, &format!("\"${var}\""))
}

impl Collector for CommandCollector {
    fn locate(&self, hostname: &str) -> Result<MasterRecord, CollectorError> {
        let command = bind_placeholder(&self.locate, HOSTNAME_PLACEHOLDER, HOSTNAME_ENV);
        let output = Self::check(
            &command,
            self.run(&command, &[(HOSTNAME_ENV, hostname)], None)?,
        )?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let address = stdout.trim();
        if address.is_empty() {
            return Err(CollectorError::NotYetAvailable);
        }
        Ok(MasterRecord::new(address))
    }

    fn send_keepalive(&self, master: &MasterRecord) -> Result<(), CollectorError> {
        let command = bind_placeholder(&self.keepalive, MASTER_PLACEHOLDER, MASTER_ENV);
        Self::check(
            &command,
            self.run(&command, &[(MASTER_ENV, master.address())], None)?,
        )?;
        Ok(())
    }

    fn advertise(&self, records: &[HealthRecord]) -> Result<(), CollectorError> {
        let payload = records
            .iter()
            .map(HealthRecord::to_classad)
            .collect::<Vec<_>>()
            .join("\n");
        Self::check(&self.advertise, self.run(&self.advertise, &[], Some(&payload))?)?;
        Ok(())
    }
}
