//! Cachevisor supervises an xrootd cache service on behalf of a cluster
//! resource manager's master daemon. It starts the service, reports its
//! health to a collector in the background, and reacts to restart and stop
//! signals as well as to failures detected by the heartbeat.

/// CLI interface.
pub mod cli;

/// Collector client.
pub mod collector;

/// Configuration management.
pub mod config;

/// Default values and fixed names.
pub mod constants;

/// Error handling.
pub mod error;

/// Supervisor inbox events and the failure handoff.
pub mod events;

/// Health probing of the cache service.
pub mod probe;

/// Background heartbeat reporter.
pub mod reporter;

/// Lifecycle control of the managed service.
pub mod service;

/// OS signal forwarding.
pub mod signals;

/// Foreground supervisor loop.
pub mod supervisor;
