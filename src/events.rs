//! Events consumed by the foreground supervisor loop.
//!
//! OS signals and background failures are all funnelled into one inbox so
//! the supervisor handles them sequentially on its own thread.
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{error, info};

use crate::error::SupervisionFailure;
use crate::service::LifecycleCommand;

/// Externally requested lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Restart,
    Stop,
}

impl ControlSignal {
    /// Maps an OS signal number onto a control signal.
    ///
    /// `SIGHUP` restarts the service; `SIGQUIT` and `SIGTERM` stop it.
    pub fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            signal_hook::consts::SIGHUP => Some(ControlSignal::Restart),
            signal_hook::consts::SIGQUIT | signal_hook::consts::SIGTERM => {
                Some(ControlSignal::Stop)
            }
            _ => None,
        }
    }

    /// Lifecycle command issued in response to this signal.
    pub fn command(&self) -> LifecycleCommand {
        match self {
            ControlSignal::Restart => LifecycleCommand::Restart,
            ControlSignal::Stop => LifecycleCommand::Stop,
        }
    }
}

/// Everything that can wake the supervisor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Control(ControlSignal),
    BackgroundFailure(SupervisionFailure),
}

/// Creates the supervisor inbox.
pub fn inbox() -> (Sender<SupervisorEvent>, Receiver<SupervisorEvent>) {
    mpsc::channel()
}

/// One-shot handoff of a terminal failure from the heartbeat reporter.
///
/// `notify` consumes the notifier, so a reporter can deliver at most one
/// failure over its lifetime.
#[derive(Debug)]
pub struct FailureNotifier {
    inbox: Sender<SupervisorEvent>,
}

impl FailureNotifier {
    pub fn new(inbox: Sender<SupervisorEvent>) -> Self {
        Self { inbox }
    }

    /// Hands `failure` to the supervisor and wakes it.
    pub fn notify(self, failure: SupervisionFailure) {
        info!("Reporting failure to supervisor: {failure}");
        if let Err(mpsc::SendError(event)) =
            self.inbox.send(SupervisorEvent::BackgroundFailure(failure))
        {
            error!("Supervisor is gone; dropping {event:?}");
        }
    }
}
