//! Background heartbeat: probes the service and keeps its record fresh at the collector.
//!
//! The reporter locates the master once, then repeats a cycle of
//! probe, keepalive, and two advertisements separated by the heartbeat
//! interval. Advertising twice per cycle keeps the collector holding a record
//! that outlives one missed cycle. The first failure ends the reporter and is
//! handed to the supervisor.
use std::{
    io,
    slice,
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::collector::{Collector, MasterRecord};
use crate::error::{CollectorError, SupervisionFailure};
use crate::events::FailureNotifier;
use crate::probe::HealthProbe;

/// Advertisements sent per keepalive.
pub const ADVERTISEMENTS_PER_CYCLE: usize = 2;

/// Waits between advertisements. Swappable so cycles can be observed without real sleeps.
pub trait Pacer {
    fn pause(&self, interval: Duration);
}

/// Pacer backed by `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, interval: Duration) {
        thread::sleep(interval);
    }
}

pub struct HeartbeatReporter<C, P, S = ThreadPacer> {
    collector: C,
    probe: P,
    pacer: S,
    hostname: String,
    interval: Duration,
}

impl<C, P> HeartbeatReporter<C, P, ThreadPacer>
where
    C: Collector,
    P: HealthProbe,
{
    pub fn new(collector: C, probe: P, hostname: impl Into<String>, interval: Duration) -> Self {
        Self {
            collector,
            probe,
            pacer: ThreadPacer,
            hostname: hostname.into(),
            interval,
        }
    }
}

impl<C, P, S> HeartbeatReporter<C, P, S>
where
    C: Collector,
    P: HealthProbe,
    S: Pacer,
{
    /// Replaces the pacer used between advertisements.
    pub fn with_pacer<T: Pacer>(self, pacer: T) -> HeartbeatReporter<C, P, T> {
        HeartbeatReporter {
            collector: self.collector,
            probe: self.probe,
            pacer,
            hostname: self.hostname,
            interval: self.interval,
        }
    }

    /// Looks up the master, retrying immediately while it is not yet registered.
    pub fn locate_master(&self) -> Result<MasterRecord, SupervisionFailure> {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match self.collector.locate(&self.hostname) {
                Ok(master) => {
                    info!(
                        "Located master {} for {} after {attempts} attempt(s)",
                        master.address(),
                        self.hostname
                    );
                    return Ok(master);
                }
                Err(CollectorError::NotYetAvailable) => {
                    if attempts == 1 {
                        debug!("Master for {} not registered yet; retrying", self.hostname);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Runs one probe/keepalive/advertise cycle.
    pub fn report_cycle(&self, master: &MasterRecord) -> Result<(), SupervisionFailure> {
        let record = self.probe.probe();
        if !record.is_ok() {
            return Err(SupervisionFailure::ServiceUnresponsive(record.reason()));
        }

        self.collector.send_keepalive(master)?;
        for _ in 0..ADVERTISEMENTS_PER_CYCLE {
            self.collector.advertise(slice::from_ref(&record))?;
            debug!("Advertised health record; next in {:?}", self.interval);
            self.pacer.pause(self.interval);
        }

        Ok(())
    }

    /// Reports until the first failure and returns it.
    pub fn run_until_failure(&self) -> SupervisionFailure {
        let master = match self.locate_master() {
            Ok(master) => master,
            Err(failure) => return failure,
        };

        loop {
            if let Err(failure) = self.report_cycle(&master) {
                return failure;
            }
        }
    }

    /// Reports until the first failure, then hands it to the supervisor.
    pub fn run(self, notifier: FailureNotifier) {
        let failure = self.run_until_failure();
        warn!("Heartbeat stopped: {failure}");
        notifier.notify(failure);
    }
}

impl<C, P, S> HeartbeatReporter<C, P, S>
where
    C: Collector + Send + 'static,
    P: HealthProbe + Send + 'static,
    S: Pacer + Send + 'static,
{
    /// Runs the reporter on its own thread.
    pub fn spawn(self, notifier: FailureNotifier) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || self.run(notifier))
    }
}
