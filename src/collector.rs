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

//! Telemetry delivery channels.
//!
//! Concrete [`TelemetryChannel`] implementations the monitor binary attaches
//! to the event sink: HTTP delivery to a collection endpoint, log output for
//! local runs, and a discard channel for opted-out telemetry.

use log::{debug, info};
use serde_json::{json, Value};
use uuid::Uuid;

use knokspix_client::{TelemetryChannel, TelemetryEvent};

/// Posts each telemetry event as JSON to a collection endpoint.
///
/// Delivery is fire-and-forget: the request is dispatched on a background
/// task and failures are logged, never surfaced.
#[derive(Debug)]
pub struct HttpChannel {
    client: reqwest::Client,
    endpoint: String,
    session_id: Uuid,
}

impl HttpChannel {
    /// Create a channel posting to `endpoint`, tagging every event with a
    /// fresh session id.
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            session_id: Uuid::new_v4(),
        }
    }
}

impl TelemetryChannel for HttpChannel {
    fn deliver(&self, event: &TelemetryEvent) {
        let payload = json!({
            "session_id": self.session_id,
            "name": event.name,
            "properties": event.properties,
        });
        let request = self.client.post(&self.endpoint).json(&payload);

        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!("Telemetry delivery failed: {}", e);
            }
        });
    }
}

/// Writes telemetry events to the application log.
#[derive(Debug, Default)]
pub struct LogChannel;

impl TelemetryChannel for LogChannel {
    fn deliver(&self, event: &TelemetryEvent) {
        match &event.properties {
            Some(props) => info!(
                "telemetry: {} {}",
                event.name,
                Value::Object(props.clone())
            ),
            None => info!("telemetry: {}", event.name),
        }
    }
}

/// Discards telemetry events when reporting is disabled.
#[derive(Debug, Default)]
pub struct NullChannel;

impl TelemetryChannel for NullChannel {
    fn deliver(&self, _event: &TelemetryEvent) {}
}
