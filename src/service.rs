//! Lifecycle control of the managed cache service.
//!
//! Every operation spawns exactly one invocation of the lifecycle program and
//! blocks until it exits. There are no retries and no timeouts; callers decide
//! whether a failed command warrants a kill or a restart.
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use regex::Regex;
use std::{process::Command, sync::OnceLock};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::error::ServiceError;

/// Commands understood by the lifecycle program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleCommand {
    Start,
    Stop,
    Restart,
    Status,
}

/// Captured outcome of one lifecycle command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ServiceCommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined for diagnostics.
    pub fn output(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (false, false) => format!("{stdout}\n{stderr}"),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (true, true) => format!("exit code {}", self.exit_code),
        }
    }
}

/// Lifecycle operations the supervisor needs from the managed service.
pub trait ServiceControl {
    /// Runs a lifecycle command and returns its raw result.
    fn run(&self, command: LifecycleCommand) -> Result<ServiceCommandResult, ServiceError>;

    /// Starts the service, failing if `start` exits non-zero.
    fn start(&self) -> Result<(), ServiceError> {
        let result = self.run(LifecycleCommand::Start)?;
        if !result.success() {
            return Err(ServiceError::StartFailed {
                output: result.output(),
            });
        }
        Ok(())
    }

    /// Looks up the service PID from `status` output.
    fn status(&self) -> Result<i32, ServiceError> {
        let result = self.run(LifecycleCommand::Status)?;
        parse_pid(&result.stdout).ok_or(ServiceError::PidNotFound {
            output: result.stdout,
        })
    }

    /// Sends `SIGKILL` to the PID reported by `status`.
    fn kill(&self) -> Result<(), ServiceError> {
        let pid = self.status()?;
        warn!("Killing service process {pid}");
        signal::kill(Pid::from_raw(pid), Signal::SIGKILL)
            .map_err(|source| ServiceError::Signal { pid, source })
    }
}

impl<T: ServiceControl + ?Sized> ServiceControl for &T {
    fn run(&self, command: LifecycleCommand) -> Result<ServiceCommandResult, ServiceError> {
        (**self).run(command)
    }

    fn start(&self) -> Result<(), ServiceError> {
        (**self).start()
    }

    fn status(&self) -> Result<i32, ServiceError> {
        (**self).status()
    }

    fn kill(&self) -> Result<(), ServiceError> {
        (**self).kill()
    }
}

fn pid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\(pid (\d+)\)").expect("valid pid regex"))
}

/// Extracts `N` from the first `(pid N)` marker in `output`.
pub fn parse_pid(output: &str) -> Option<i32> {
    pid_pattern()
        .captures(output)
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .filter(|pid| *pid > 0)
}

/// Drives a service through a SysV-style control program (`service <name> <cmd>`).
#[derive(Debug, Clone)]
pub struct SystemService {
    name: String,
    control: String,
}

impl SystemService {
    pub fn new(name: impl Into<String>, control: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            control: control.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ServiceControl for SystemService {
    fn run(&self, command: LifecycleCommand) -> Result<ServiceCommandResult, ServiceError> {
        let command_line = format!("{} {} {}", self.control, self.name, command);
        debug!("Running lifecycle command `{command_line}`");

        let output = Command::new(&self.control)
            .arg(&self.name)
            .arg(command.as_ref())
            .output()
            .map_err(|source| ServiceError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        // Killed by a signal: no exit code, report it as a failure.
        let exit_code = output.status.code().unwrap_or(-1);
        let result = ServiceCommandResult {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.success() {
            info!("`{command_line}` succeeded");
        } else {
            warn!("`{command_line}` exited with code {exit_code}");
        }

        Ok(result)
    }
}
