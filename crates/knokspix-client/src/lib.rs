// Copyright 2025 KnoksPix Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client library for monitoring the KnoksPix backend.
//!
//! This library provides a modular, reusable architecture for assessing
//! whether a remote backend is reachable and for delivering telemetry about
//! it. It supports multiple layers that can be used independently or
//! composed together:
//!
//! - **Probe layer**: One-shot liveness checks (HTTP `/healthz`, with a trait
//!   seam for other transports)
//! - **Monitor layer**: Reachability state, rolling latency statistics, and
//!   healthy/degraded/unreachable classification
//! - **Telemetry layer**: Order-preserving deferred event delivery for
//!   channels that finish initializing after the first events are recorded
//!
//! # Quick Start
//!
//! Use the [`Monitor`] type for full-stack operation:
//!
//! ```no_run
//! use std::sync::Arc;
//! use knokspix_client::{EventSink, Monitor, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = Arc::new(EventSink::new());
//!     let monitor = Monitor::spawn(
//!         MonitorConfig {
//!             base_url: "https://api.knokspix.example".to_string(),
//!             ..Default::default()
//!         },
//!         Arc::clone(&sink),
//!     );
//!
//!     // Polling approach
//!     loop {
//!         println!("{:?}", monitor.state().status);
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Tracker Layer Only
//!
//! ```
//! use std::time::Duration;
//! use knokspix_client::monitor::{MonitorConfig, ReachabilityStatus, ReachabilityTracker};
//!
//! let mut tracker = ReachabilityTracker::new(&MonitorConfig::default());
//! tracker.record_success(Duration::from_millis(42));
//! assert_eq!(tracker.state().status, ReachabilityStatus::Healthy);
//! ```
//!
//! ## Telemetry Layer Only
//!
//! ```
//! use knokspix_client::telemetry::{EventSink, TelemetryChannel, TelemetryEvent};
//!
//! struct StdoutChannel;
//!
//! impl TelemetryChannel for StdoutChannel {
//!     fn deliver(&self, event: &TelemetryEvent) {
//!         println!("{}", event.name);
//!     }
//! }
//!
//! let sink = EventSink::new();
//! sink.record("app_started", None); // queued, no channel yet
//! sink.attach_channel(Box::new(StdoutChannel)); // flushes "app_started"
//! sink.record("edit_applied", None); // forwarded immediately
//! ```

pub mod monitor;
pub mod probe;
pub mod telemetry;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use monitor::{
    MonitorConfig, MonitorEvent, ReachabilityState, ReachabilityStatus, ReachabilityTracker,
    DEFAULT_BASE_URL, LATENCY_WINDOW,
};
pub use probe::{HttpProber, ProbeError, Prober, HEALTH_PATH};
pub use telemetry::{EventSink, Properties, TelemetryChannel, TelemetryEvent};

/// Event name recorded after each successful probe.
pub const EVENT_PROBE_SUCCESS: &str = "probe_success";

/// Event name recorded after each failed probe.
pub const EVENT_PROBE_FAILURE: &str = "probe_failure";

/// Full-stack backend monitor that wires all layers together.
///
/// The monitor runs a probe loop in a background task: one probe at spawn
/// time, then one per interval. Each outcome updates the reachability state
/// and records a `probe_success`/`probe_failure` event through the sink.
/// Probes are serialized; a tick that fires while a probe is still
/// outstanding is skipped.
pub struct Monitor {
    tracker: Arc<RwLock<ReachabilityTracker>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Spawn a monitor probing `<base_url>/healthz` over HTTP.
    ///
    /// Telemetry events flow into `sink`; they are queued there until a
    /// delivery channel is attached.
    #[must_use]
    pub fn spawn(config: MonitorConfig, sink: Arc<EventSink>) -> Self {
        let prober = Arc::new(HttpProber::new(&config.base_url, config.timeout));
        Self::spawn_with_prober(config, sink, prober)
    }

    /// Spawn a monitor with a custom probe implementation.
    ///
    /// Each call creates an independent monitor with its own state and
    /// lifecycle, so there is no double-start hazard; stop one by calling
    /// [`stop`](Monitor::stop) or dropping the handle.
    #[must_use]
    pub fn spawn_with_prober(
        config: MonitorConfig,
        sink: Arc<EventSink>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        assert!(!config.interval.is_zero(), "probe interval must be positive");
        assert!(!config.timeout.is_zero(), "probe timeout must be positive");

        let tracker = Arc::new(RwLock::new(ReachabilityTracker::new(&config)));
        let cancel_token = CancellationToken::new();

        let task_tracker = Arc::clone(&tracker);
        let task_cancel = cancel_token.clone();
        let interval = config.interval;

        tokio::spawn(async move {
            probe_loop(prober, task_tracker, sink, interval, task_cancel).await;
        });

        Self {
            tracker,
            cancel_token,
        }
    }

    /// Get a snapshot of the current reachability state.
    ///
    /// The snapshot is a consistent copy; callers never observe a partially
    /// applied probe outcome.
    #[must_use]
    pub fn state(&self) -> ReachabilityState {
        self.tracker
            .read()
            .map(|t| t.state().clone())
            .unwrap_or_default()
    }

    /// Subscribe to monitor events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tracker
            .read()
            .map(|t| t.subscribe())
            .unwrap_or_else(|_| {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            })
    }

    /// Stop the monitor.
    ///
    /// Cancels the probe loop synchronously and renders any in-flight probe
    /// inert: its completion mutates no state and records no event.
    /// Idempotent.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the monitor has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn probe_loop(
    prober: Arc<dyn Prober>,
    tracker: Arc<RwLock<ReachabilityTracker>>,
    sink: Arc<EventSink>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel_token.cancelled() => {
                debug!("Monitor cancelled");
                return;
            }
        }

        let outcome = tokio::select! {
            outcome = prober.probe() => outcome,
            () = cancel_token.cancelled() => {
                debug!("Monitor cancelled with a probe in flight, discarding");
                return;
            }
        };

        // A cancel that lands while the probe completes must still discard
        // the result.
        if cancel_token.is_cancelled() {
            debug!("Monitor cancelled with a probe in flight, discarding");
            return;
        }

        match outcome {
            Ok(latency) => {
                let latency_ms = match tracker.write() {
                    Ok(mut t) => t.record_success(latency),
                    Err(_) => return,
                };
                let mut props = Properties::new();
                props.insert("latency_ms".to_string(), Value::from(latency_ms));
                sink.record(EVENT_PROBE_SUCCESS, Some(props));
                debug!("Probe succeeded in {}ms", latency_ms);
            }
            Err(e) => {
                if let Ok(mut t) = tracker.write() {
                    t.record_failure(&e);
                }
                let mut props = Properties::new();
                props.insert("error".to_string(), Value::from(e.to_string()));
                sink.record(EVENT_PROBE_FAILURE, Some(props));
                warn!("Probe failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Returns scripted outcomes in order, then hangs forever.
    struct ScriptedProber {
        outcomes: Mutex<VecDeque<Result<Duration, ProbeError>>>,
    }

    impl ScriptedProber {
        fn new(outcomes: Vec<Result<Duration, ProbeError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
            })
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self) -> Result<Duration, ProbeError> {
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    /// Blocks each probe until released through a notify handle.
    #[derive(Default)]
    struct GatedProber {
        gate: Notify,
    }

    #[async_trait]
    impl Prober for GatedProber {
        async fn probe(&self) -> Result<Duration, ProbeError> {
            self.gate.notified().await;
            Ok(Duration::from_millis(50))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingChannel {
        delivered: Arc<Mutex<Vec<TelemetryEvent>>>,
    }

    impl RecordingChannel {
        fn names(&self) -> Vec<String> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.name.clone())
                .collect()
        }
    }

    impl TelemetryChannel for RecordingChannel {
        fn deliver(&self, event: &TelemetryEvent) {
            self.delivered.lock().unwrap().push(event.clone());
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(1_000),
            timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_fires_at_spawn() {
        let sink = Arc::new(EventSink::new());
        let prober = ScriptedProber::new(vec![Ok(Duration::from_millis(50))]);
        let monitor = Monitor::spawn_with_prober(test_config(), sink, prober);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = monitor.state();
        assert_eq!(state.status, ReachabilityStatus::Healthy);
        assert_eq!(state.last_latency_ms, Some(50));
        assert_eq!(state.last_error, None);
        assert_eq!(state.recent_latencies, VecDeque::from(vec![50]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_repeat_on_interval() {
        let sink = Arc::new(EventSink::new());
        let prober = ScriptedProber::new(vec![
            Ok(Duration::from_millis(10)),
            Ok(Duration::from_millis(20)),
            Ok(Duration::from_millis(30)),
        ]);
        let monitor = Monitor::spawn_with_prober(test_config(), sink, prober);

        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let state = monitor.state();
        assert_eq!(state.recent_latencies, VecDeque::from(vec![10, 20, 30]));
        assert_eq!(state.last_latency_ms, Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_unreachable() {
        let sink = Arc::new(EventSink::new());
        let prober = ScriptedProber::new(vec![Err(ProbeError::Timeout)]);
        let monitor = Monitor::spawn_with_prober(test_config(), sink, prober);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = monitor.state();
        assert_eq!(state.status, ReachabilityStatus::Unreachable);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
        assert_eq!(state.last_latency_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_outcomes_recorded_to_sink() {
        let sink = Arc::new(EventSink::new());
        let channel = RecordingChannel::default();
        sink.attach_channel(Box::new(channel.clone()));

        let prober = ScriptedProber::new(vec![
            Ok(Duration::from_millis(50)),
            Err(ProbeError::Timeout),
        ]);
        let _monitor = Monitor::spawn_with_prober(test_config(), sink, prober);

        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(channel.names(), vec![EVENT_PROBE_SUCCESS, EVENT_PROBE_FAILURE]);

        let delivered = channel.delivered.lock().unwrap();
        assert_eq!(
            delivered[0].properties.as_ref().unwrap()["latency_ms"],
            Value::from(50)
        );
        assert_eq!(
            delivered[1].properties.as_ref().unwrap()["error"],
            Value::from("timeout")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_inflight_probe() {
        let sink = Arc::new(EventSink::new());
        let channel = RecordingChannel::default();
        sink.attach_channel(Box::new(channel.clone()));

        let prober = Arc::new(GatedProber::default());
        let gated: Arc<dyn Prober> = prober.clone();
        let monitor = Monitor::spawn_with_prober(test_config(), sink, gated);

        // Let the loop dispatch the first probe, which parks on the gate.
        tokio::time::sleep(Duration::from_millis(1)).await;
        let before = monitor.state();
        assert_eq!(before.status, ReachabilityStatus::Unknown);

        monitor.stop();
        prober.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(monitor.state(), before);
        assert!(channel.names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let sink = Arc::new(EventSink::new());
        let prober = ScriptedProber::new(vec![Ok(Duration::from_millis(50))]);
        let monitor = Monitor::spawn_with_prober(test_config(), sink, prober);

        monitor.stop();
        monitor.stop();
        assert!(monitor.is_stopped());
    }
}
