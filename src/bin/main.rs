use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cachevisor::{
    cli::{Cli, Commands, parse_args},
    collector::CommandCollector,
    config::load_config,
    error::SupervisorError,
    probe::CacheProbe,
    reporter::HeartbeatReporter,
    service::SystemService,
    signals::SignalForwarder,
    supervisor::Supervisor,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    let result = match args.command {
        Commands::Run { config } => run(&config),
        Commands::Probe {
            url,
            cache_root,
            max_fs_fraction,
        } => probe(&url, &cache_root, max_fs_fraction),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_directive())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(config_path: &str) -> Result<(), SupervisorError> {
    let config = load_config(Some(config_path))?;
    let hostname = config.collector.hostname()?;
    let interval = config.heartbeat.interval()?;

    let probe = CacheProbe::new(
        &config.probe.url,
        &config.probe.cache_root,
        config.probe.max_fs_fraction,
        config.probe.timeout()?,
    )?;
    let collector = CommandCollector::from_config(&config.collector);
    let service = SystemService::new(&config.service.name, &config.service.control);

    info!(
        "Supervising '{}' on {hostname}, reporting every {interval:?}",
        service.name()
    );

    let supervisor = Supervisor::new(service);
    let forwarder = SignalForwarder::spawn(supervisor.sender())?;

    let result = supervisor.run(move |notifier| {
        HeartbeatReporter::new(collector, probe, hostname, interval)
            .spawn(notifier)
            .map(|_| ())
    });

    forwarder.close();
    result
}

fn probe(url: &str, cache_root: &str, max_fs_fraction: f64) -> Result<(), SupervisorError> {
    let probe = CacheProbe::new(
        url,
        cache_root,
        max_fs_fraction,
        cachevisor::constants::DEFAULT_PROBE_TIMEOUT,
    )?;
    let record = probe.collect();
    let rendered = serde_json::to_string_pretty(&record)
        .map_err(|err| SupervisorError::Io(err.into()))?;
    println!("{rendered}");
    Ok(())
}
