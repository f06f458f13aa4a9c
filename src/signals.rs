//! Forwards process signals into the supervisor inbox.
use signal_hook::{
    consts::{SIGHUP, SIGQUIT, SIGTERM},
    iterator::{Handle, Signals},
};
use std::{
    io,
    sync::mpsc::Sender,
    thread::{self, JoinHandle},
};
use tracing::{debug, info};

use crate::events::{ControlSignal, SupervisorEvent};

/// Signals accepted as control input.
pub const CONTROL_SIGNALS: [i32; 3] = [SIGHUP, SIGQUIT, SIGTERM];

/// Background thread translating OS signals into [`SupervisorEvent::Control`].
pub struct SignalForwarder {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl SignalForwarder {
    /// Installs handlers for [`CONTROL_SIGNALS`] and starts forwarding.
    pub fn spawn(inbox: Sender<SupervisorEvent>) -> io::Result<Self> {
        let mut signals = Signals::new(CONTROL_SIGNALS)?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("signal-forwarder".into())
            .spawn(move || {
                for signal in signals.forever() {
                    let Some(control) = ControlSignal::from_signal(signal) else {
                        continue;
                    };
                    info!("Received signal {signal}; requesting {control:?}");
                    if inbox.send(SupervisorEvent::Control(control)).is_err() {
                        debug!("Supervisor inbox closed; signal forwarder exiting");
                        break;
                    }
                }
            })?;

        Ok(Self { handle, thread })
    }

    /// Stops forwarding and waits for the thread to exit.
    pub fn close(self) {
        self.handle.close();
        let _ = self.thread.join();
    }
}
