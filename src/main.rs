mod collector;
mod config;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use knokspix_client::{
    EventSink, HttpProber, Monitor, MonitorEvent, Prober, Properties, ReachabilityState,
    ReachabilityStatus, ReachabilityTracker,
};

use collector::{HttpChannel, LogChannel, NullChannel};
use config::AppConfig;

/// Headless reachability monitor for the KnoksPix backend
#[derive(Parser, Debug)]
#[command(name = "knokspix-monitor", version, about)]
struct Cli {
    /// Backend base URL (overrides the configured value)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the backend continuously until interrupted
    Watch {
        /// Delay between probes in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Probe timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Mean-latency threshold in milliseconds for degraded status
        #[arg(long)]
        degraded_threshold_ms: Option<u64>,
    },

    /// Run a single probe and exit (0 healthy, 1 degraded, 2 unreachable)
    Check {
        /// Print the state snapshot as JSON
        #[arg(long)]
        json: bool,

        /// Probe timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print the configuration file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(url) = cli.url {
        config.base_url = url;
    }

    match cli.command {
        Command::Watch {
            interval_ms,
            timeout_ms,
            degraded_threshold_ms,
        } => {
            if let Some(v) = interval_ms {
                config.interval_ms = v;
            }
            if let Some(v) = timeout_ms {
                config.timeout_ms = v;
            }
            if let Some(v) = degraded_threshold_ms {
                config.degraded_threshold_ms = v;
            }
            run_watch(config).await
        }
        Command::Check { json, timeout_ms } => {
            if let Some(v) = timeout_ms {
                config.timeout_ms = v;
            }
            run_check(&config, json).await
        }
        Command::ConfigPath => match AppConfig::get_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to resolve config path: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_watch(config: AppConfig) -> ExitCode {
    let sink = Arc::new(EventSink::new());

    // Recorded before the channel exists; flushed on attach.
    let mut props = Properties::new();
    props.insert("base_url".to_string(), Value::from(config.base_url.clone()));
    sink.record("monitor_started", Some(props));

    attach_telemetry_channel(&sink, &config);

    info!(
        "Watching {} every {}ms (timeout {}ms, degraded above {}ms mean)",
        config.base_url, config.interval_ms, config.timeout_ms, config.degraded_threshold_ms
    );

    let monitor = Monitor::spawn(config.monitor_config(), Arc::clone(&sink));
    let mut events = monitor.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(MonitorEvent::StatusChanged { from, to }) => {
                    info!("Backend status: {} -> {}", status_label(from), status_label(to));
                }
                Ok(MonitorEvent::ProbeSucceeded { latency_ms }) => {
                    info!("Probe succeeded in {}ms", latency_ms);
                }
                Ok(MonitorEvent::ProbeFailed { error }) => {
                    warn!("Probe failed: {}", error);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Dropped {} monitor events", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                sink.record("monitor_stopped", None);
                monitor.stop();
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

async fn run_check(config: &AppConfig, json: bool) -> ExitCode {
    let monitor_config = config.monitor_config();
    let prober = HttpProber::new(&monitor_config.base_url, monitor_config.timeout);
    let mut tracker = ReachabilityTracker::new(&monitor_config);

    match prober.probe().await {
        Ok(latency) => {
            tracker.record_success(latency);
        }
        Err(e) => tracker.record_failure(&e),
    }

    let state = tracker.state();
    if json {
        match serde_json::to_string_pretty(state) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                error!("Failed to serialize state: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_state(&config.base_url, state);
    }

    match state.status {
        ReachabilityStatus::Healthy => ExitCode::SUCCESS,
        ReachabilityStatus::Degraded => ExitCode::from(1),
        ReachabilityStatus::Unknown | ReachabilityStatus::Unreachable => ExitCode::from(2),
    }
}

fn attach_telemetry_channel(sink: &EventSink, config: &AppConfig) {
    if !config.telemetry_enabled {
        sink.attach_channel(Box::new(NullChannel));
        return;
    }

    match &config.telemetry_endpoint {
        Some(endpoint) => {
            info!("Forwarding telemetry to {}", endpoint);
            sink.attach_channel(Box::new(HttpChannel::new(endpoint.clone())));
        }
        None => sink.attach_channel(Box::new(LogChannel)),
    }
}

fn print_state(base_url: &str, state: &ReachabilityState) {
    println!("Backend:  {}", base_url);
    println!("Status:   {}", status_label(state.status));
    if let Some(latency) = state.last_latency_ms {
        println!("Latency:  {}ms", latency);
    }
    if let Some(error) = &state.last_error {
        println!("Error:    {}", error);
    }
    if let Some(checked_at) = state.checked_at {
        println!("Checked:  {}", checked_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

fn status_label(status: ReachabilityStatus) -> &'static str {
    match status {
        ReachabilityStatus::Unknown => "unknown",
        ReachabilityStatus::Healthy => "healthy",
        ReachabilityStatus::Degraded => "degraded",
        ReachabilityStatus::Unreachable => "unreachable",
    }
}
