use std::{
    io,
    sync::mpsc::{Receiver, Sender},
};
use tracing::{info, warn};

use crate::error::{SupervisionFailure, SupervisorError};
use crate::events::{ControlSignal, FailureNotifier, SupervisorEvent, inbox};
use crate::service::ServiceControl;

/// What the loop does after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Idle,
    Exit,
}

/// Foreground control loop for the managed service.
///
/// Starts the service, launches the heartbeat reporter, then handles one
/// inbox event at a time. Only an operator-requested restart ever restarts
/// the service; failures detected in the background kill it and end the run.
pub struct Supervisor<S> {
    service: S,
    sender: Sender<SupervisorEvent>,
    inbox: Receiver<SupervisorEvent>,
}

impl<S: ServiceControl> Supervisor<S> {
    pub fn new(service: S) -> Self {
        let (sender, inbox) = inbox();
        Self {
            service,
            sender,
            inbox,
        }
    }

    /// A handle for producers of control events (e.g. the signal forwarder).
    pub fn sender(&self) -> Sender<SupervisorEvent> {
        self.sender.clone()
    }

    /// Runs until a stop signal (`Ok`) or a fatal error.
    ///
    /// `launch_reporter` receives the only failure notifier for this run.
    pub fn run<F>(self, launch_reporter: F) -> Result<(), SupervisorError>
    where
        F: FnOnce(FailureNotifier) -> io::Result<()>,
    {
        let Supervisor {
            service,
            sender,
            inbox,
        } = self;

        info!("Starting service");
        service.start().map_err(SupervisorError::Startup)?;

        launch_reporter(FailureNotifier::new(sender))?;

        loop {
            let event = inbox.recv().map_err(|_| SupervisorError::InboxClosed)?;
            match handle_event(&service, event)? {
                Transition::Idle => continue,
                Transition::Exit => return Ok(()),
            }
        }
    }
}

fn handle_event<S: ServiceControl>(
    service: &S,
    event: SupervisorEvent,
) -> Result<Transition, SupervisorError> {
    match event {
        SupervisorEvent::Control(signal) => handle_control(service, signal),
        SupervisorEvent::BackgroundFailure(failure) => Err(handle_failure(service, failure)),
    }
}

fn handle_control<S: ServiceControl>(
    service: &S,
    signal: ControlSignal,
) -> Result<Transition, SupervisorError> {
    let command = signal.command();
    info!("Handling {signal:?}: running `{command}`");

    let succeeded = match service.run(command) {
        Ok(result) if result.success() => true,
        Ok(result) => {
            warn!("`{command}` failed: {}", result.output());
            false
        }
        Err(err) => {
            warn!("`{command}` could not run: {err}");
            false
        }
    };

    match signal {
        ControlSignal::Restart => {
            if !succeeded {
                warn!("Restart failed; killing service and starting it again");
                service.kill()?;
                service.start().map_err(SupervisorError::Startup)?;
            }
            info!("Service restarted");
            Ok(Transition::Idle)
        }
        ControlSignal::Stop => {
            // The process exits cleanly even when the stop command failed.
            if !succeeded {
                warn!("Stop failed; killing service");
                if let Err(err) = service.kill() {
                    warn!("Kill after failed stop also failed: {err}");
                }
            }
            info!("Service stopped; exiting");
            Ok(Transition::Exit)
        }
    }
}

fn handle_failure<S: ServiceControl>(service: &S, failure: SupervisionFailure) -> SupervisorError {
    warn!("Background failure: {failure}; killing service");
    if let Err(err) = service.kill() {
        warn!("Best-effort kill failed: {err}");
    }
    SupervisorError::Failure(failure)
}
