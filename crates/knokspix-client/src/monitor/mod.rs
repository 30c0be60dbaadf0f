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

//! Reachability state tracking and classification.
//!
//! This module maintains backend reachability state from probe outcomes and
//! emits change events. It keeps a bounded window of recent latencies so that
//! a reachable-but-slow backend can be classified as degraded.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::probe::ProbeError;

/// Number of successful probe latencies retained for the rolling mean.
pub const LATENCY_WINDOW: usize = 10;

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Classified reachability of the monitored backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityStatus {
    /// No probe has completed yet.
    #[default]
    Unknown,
    /// Latest probe succeeded and mean latency is within the threshold.
    Healthy,
    /// Latest probe succeeded but mean latency exceeds the threshold.
    Degraded,
    /// Latest probe failed.
    Unreachable,
}

/// Snapshot of backend reachability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReachabilityState {
    /// Current classification.
    pub status: ReachabilityStatus,

    /// Failure reason of the most recent probe, if it failed.
    pub last_error: Option<String>,

    /// Latency of the most recent probe in milliseconds, if it succeeded.
    pub last_latency_ms: Option<u64>,

    /// Latencies of the most recent successful probes, oldest first.
    ///
    /// Bounded to [`LATENCY_WINDOW`] samples. A probe failure does not clear
    /// this window, so recovery immediately reflects the prior trend.
    pub recent_latencies: VecDeque<u64>,

    /// When the most recent probe completed (success or failure).
    pub checked_at: Option<DateTime<Utc>>,
}

impl ReachabilityState {
    /// Mean of the retained latency samples in milliseconds.
    ///
    /// Returns `None` before the first successful probe.
    #[must_use]
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.recent_latencies.is_empty() {
            return None;
        }
        let sum: u64 = self.recent_latencies.iter().sum();
        Some(sum as f64 / self.recent_latencies.len() as f64)
    }
}

/// Events emitted by the tracker when reachability changes.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Classification changed.
    StatusChanged {
        from: ReachabilityStatus,
        to: ReachabilityStatus,
    },
    /// A probe completed successfully.
    ProbeSucceeded { latency_ms: u64 },
    /// A probe failed.
    ProbeFailed { error: String },
}

/// Configuration for the reachability monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Backend base URL, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Delay between probes.
    pub interval: Duration,
    /// Hard timeout for a single probe.
    pub timeout: Duration,
    /// Mean-latency threshold above which a reachable backend is degraded.
    pub degraded_threshold: Duration,
    /// Broadcast channel capacity for monitor events.
    pub event_channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            interval: Duration::from_millis(15_000),
            timeout: Duration::from_millis(4_000),
            degraded_threshold: Duration::from_millis(1_500),
            event_channel_capacity: 64,
        }
    }
}

/// Tracks probe outcomes and classifies backend reachability.
///
/// The tracker is a synchronous state machine; the async probe loop in
/// [`Monitor`](crate::Monitor) drives it. It can also be driven directly,
/// e.g. for a one-shot check.
pub struct ReachabilityTracker {
    state: ReachabilityState,
    degraded_threshold: Duration,
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl std::fmt::Debug for ReachabilityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityTracker")
            .field("status", &self.state.status)
            .field("samples", &self.state.recent_latencies.len())
            .finish_non_exhaustive()
    }
}

impl ReachabilityTracker {
    /// Create a new tracker with the given configuration.
    ///
    /// The initial state is [`ReachabilityStatus::Unknown`] until the first
    /// probe outcome is recorded.
    #[must_use]
    pub fn new(config: &MonitorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Self {
            state: ReachabilityState::default(),
            degraded_threshold: config.degraded_threshold,
            event_tx,
        }
    }

    /// Record a successful probe.
    ///
    /// Pushes the latency into the rolling window (evicting the oldest sample
    /// past [`LATENCY_WINDOW`]), clears the last error, and reclassifies.
    /// Returns the recorded latency in milliseconds, rounded.
    pub fn record_success(&mut self, latency: Duration) -> u64 {
        let latency_ms = (latency.as_secs_f64() * 1000.0).round() as u64;
        let previous = self.state.status;

        if self.state.recent_latencies.len() == LATENCY_WINDOW {
            self.state.recent_latencies.pop_front();
        }
        self.state.recent_latencies.push_back(latency_ms);
        self.state.last_latency_ms = Some(latency_ms);
        self.state.last_error = None;
        self.state.checked_at = Some(Utc::now());
        self.state.status = self.classify();

        let _ = self
            .event_tx
            .send(MonitorEvent::ProbeSucceeded { latency_ms });
        self.notify_transition(previous);

        latency_ms
    }

    /// Record a failed probe.
    ///
    /// Sets the error, clears the last latency, and marks the backend
    /// unreachable. The latency window is left untouched.
    pub fn record_failure(&mut self, error: &ProbeError) {
        let previous = self.state.status;

        self.state.last_error = Some(error.to_string());
        self.state.last_latency_ms = None;
        self.state.checked_at = Some(Utc::now());
        self.state.status = ReachabilityStatus::Unreachable;

        let _ = self.event_tx.send(MonitorEvent::ProbeFailed {
            error: error.to_string(),
        });
        self.notify_transition(previous);
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> &ReachabilityState {
        &self.state
    }

    /// Subscribe to monitor events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    // Degraded applies only when the latest probe succeeded; the window is
    // never empty on this path.
    fn classify(&self) -> ReachabilityStatus {
        let threshold_ms = self.degraded_threshold.as_millis() as f64;
        match self.state.mean_latency_ms() {
            Some(mean) if mean > threshold_ms => ReachabilityStatus::Degraded,
            _ => ReachabilityStatus::Healthy,
        }
    }

    fn notify_transition(&self, previous: ReachabilityStatus) {
        if self.state.status != previous {
            let _ = self.event_tx.send(MonitorEvent::StatusChanged {
                from: previous,
                to: self.state.status,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_threshold(threshold_ms: u64) -> ReachabilityTracker {
        ReachabilityTracker::new(&MonitorConfig {
            degraded_threshold: Duration::from_millis(threshold_ms),
            ..Default::default()
        })
    }

    fn latencies(tracker: &ReachabilityTracker) -> Vec<u64> {
        tracker.state().recent_latencies.iter().copied().collect()
    }

    #[test]
    fn test_initial_state_unknown() {
        let tracker = ReachabilityTracker::new(&MonitorConfig::default());
        let state = tracker.state();
        assert_eq!(state.status, ReachabilityStatus::Unknown);
        assert_eq!(state.last_error, None);
        assert_eq!(state.last_latency_ms, None);
        assert!(state.recent_latencies.is_empty());
        assert_eq!(state.checked_at, None);
    }

    #[test]
    fn test_success_updates_state() {
        let mut tracker = tracker_with_threshold(1_500);
        tracker.record_success(Duration::from_millis(50));

        let state = tracker.state();
        assert_eq!(state.status, ReachabilityStatus::Healthy);
        assert_eq!(state.last_latency_ms, Some(50));
        assert_eq!(state.last_error, None);
        assert_eq!(latencies(&tracker), vec![50]);
        assert!(state.checked_at.is_some());
    }

    #[test]
    fn test_latency_window_bounded() {
        let mut tracker = tracker_with_threshold(10_000);
        for i in 0..12 {
            tracker.record_success(Duration::from_millis(100 + i));
        }

        // Only the most recent 10 samples survive, in arrival order.
        assert_eq!(
            latencies(&tracker),
            (2..12).map(|i| 100 + i).collect::<Vec<u64>>()
        );
    }

    #[test]
    fn test_degraded_when_mean_exceeds_threshold() {
        let mut tracker = tracker_with_threshold(1_500);
        for _ in 0..5 {
            tracker.record_success(Duration::from_millis(2_000));
        }
        assert_eq!(tracker.state().status, ReachabilityStatus::Degraded);
    }

    #[test]
    fn test_healthy_at_exact_threshold() {
        // The threshold must be strictly exceeded.
        let mut tracker = tracker_with_threshold(1_500);
        tracker.record_success(Duration::from_millis(1_500));
        assert_eq!(tracker.state().status, ReachabilityStatus::Healthy);
    }

    #[test]
    fn test_degraded_recovers_when_mean_drops() {
        let mut tracker = tracker_with_threshold(1_500);
        tracker.record_success(Duration::from_millis(2_000));
        assert_eq!(tracker.state().status, ReachabilityStatus::Degraded);

        // Enough fast probes pull the mean back under the threshold.
        for _ in 0..9 {
            tracker.record_success(Duration::from_millis(100));
        }
        assert_eq!(tracker.state().status, ReachabilityStatus::Healthy);
    }

    #[test]
    fn test_failure_marks_unreachable() {
        let mut tracker = tracker_with_threshold(1_500);
        tracker.record_failure(&ProbeError::Timeout);

        let state = tracker.state();
        assert_eq!(state.status, ReachabilityStatus::Unreachable);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
        assert_eq!(state.last_latency_ms, None);
    }

    #[test]
    fn test_failure_preserves_latency_history() {
        let mut tracker = tracker_with_threshold(1_500);
        for latency in [40, 50, 60] {
            tracker.record_success(Duration::from_millis(latency));
        }

        tracker.record_failure(&ProbeError::Http(503));

        let state = tracker.state();
        assert_eq!(state.status, ReachabilityStatus::Unreachable);
        assert_eq!(state.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(latencies(&tracker), vec![40, 50, 60]);
    }

    #[test]
    fn test_recovery_reflects_prior_trend() {
        let mut tracker = tracker_with_threshold(1_500);
        for _ in 0..9 {
            tracker.record_success(Duration::from_millis(2_000));
        }
        tracker.record_failure(&ProbeError::Timeout);

        // One fast probe after an outage: the mean over the retained window
        // is still above the threshold, so the backend is degraded, not
        // healthy.
        tracker.record_success(Duration::from_millis(100));
        assert_eq!(tracker.state().status, ReachabilityStatus::Degraded);
        assert_eq!(tracker.state().last_error, None);
    }

    #[test]
    fn test_events_on_transition() {
        let mut tracker = tracker_with_threshold(1_500);
        let mut events = tracker.subscribe();

        tracker.record_success(Duration::from_millis(50));
        assert!(matches!(
            events.try_recv(),
            Ok(MonitorEvent::ProbeSucceeded { latency_ms: 50 })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(MonitorEvent::StatusChanged {
                from: ReachabilityStatus::Unknown,
                to: ReachabilityStatus::Healthy,
            })
        ));

        // A second healthy probe emits no transition.
        tracker.record_success(Duration::from_millis(60));
        assert!(matches!(
            events.try_recv(),
            Ok(MonitorEvent::ProbeSucceeded { latency_ms: 60 })
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_mean_latency() {
        let mut tracker = tracker_with_threshold(1_500);
        assert_eq!(tracker.state().mean_latency_ms(), None);

        tracker.record_success(Duration::from_millis(100));
        tracker.record_success(Duration::from_millis(200));
        assert_eq!(tracker.state().mean_latency_ms(), Some(150.0));
    }
}
