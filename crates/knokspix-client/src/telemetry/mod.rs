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

//! Deferred telemetry event delivery.
//!
//! Callers record named events at any time, including before the delivery
//! transport exists. Events recorded before a channel is attached are queued
//! and flushed in order the moment the channel arrives, so nothing recorded
//! during startup is lost.
//!
//! The sink is an explicitly constructed object passed by reference to its
//! call sites; there is no process-global state.

use std::collections::VecDeque;
use std::sync::Mutex;

use log::warn;
use serde::Serialize;
use serde_json::Value;

/// Structured payload attached to a telemetry event.
pub type Properties = serde_json::Map<String, Value>;

/// A named telemetry event with optional structured properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    /// Event identifier, e.g. `probe_success`.
    pub name: String,

    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

/// Transport to which telemetry events are ultimately forwarded.
///
/// Implementations must not block for long: delivery happens under the sink
/// lock so that queued events and live events keep a single total order.
pub trait TelemetryChannel: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: &TelemetryEvent);
}

struct SinkInner {
    channel: Option<Box<dyn TelemetryChannel>>,
    pending: VecDeque<TelemetryEvent>,
}

/// Buffering event sink with single-assignment channel attachment.
///
/// [`record`](EventSink::record) never fails: with a channel attached the
/// event is forwarded immediately, otherwise it is queued until
/// [`attach_channel`](EventSink::attach_channel) drains the queue. Events are
/// delivered exactly once, in the order they were recorded.
pub struct EventSink {
    inner: Mutex<SinkInner>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    /// Create a sink with no channel attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                channel: None,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Record an event.
    ///
    /// Best-effort and fire-and-forget. An event with an empty name is
    /// malformed and dropped with a warning.
    pub fn record(&self, name: &str, properties: Option<Properties>) {
        if name.is_empty() {
            warn!("Dropping telemetry event with empty name");
            return;
        }

        let event = TelemetryEvent {
            name: name.to_string(),
            properties,
        };

        if let Ok(mut inner) = self.inner.lock() {
            match &inner.channel {
                Some(channel) => channel.deliver(&event),
                None => inner.pending.push_back(event),
            }
        }
    }

    /// Attach the delivery channel and flush queued events in FIFO order.
    ///
    /// The drain completes before this call returns, so every event recorded
    /// before attachment is delivered ahead of any event recorded after it.
    /// Only the first call takes effect; subsequent calls are ignored with a
    /// warning.
    pub fn attach_channel(&self, channel: Box<dyn TelemetryChannel>) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.channel.is_some() {
                warn!("Telemetry channel already attached, ignoring");
                return;
            }

            while let Some(event) = inner.pending.pop_front() {
                channel.deliver(&event);
            }
            inner.channel = Some(channel);
        }
    }

    /// Whether a delivery channel has been attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.lock().map(|i| i.channel.is_some()).unwrap_or(false)
    }

    /// Number of events waiting for a channel.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().map(|i| i.pending.len()).unwrap_or(0)
    }
}
