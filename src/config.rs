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

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format.
//! Every field has a default so a missing or partial config file works out
//! of the box; CLI flags override loaded values.

use std::time::Duration;

use knokspix_client::{MonitorConfig, DEFAULT_BASE_URL};
use serde::{Deserialize, Serialize};

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Backend base URL, probed at `<base_url>/healthz`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Delay between probes in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Hard timeout for a single probe in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Mean-latency threshold in milliseconds above which a reachable
    /// backend is reported as degraded
    #[serde(default = "default_degraded_threshold_ms")]
    pub degraded_threshold_ms: u64,

    /// Whether to forward telemetry events anywhere
    #[serde(default = "default_true")]
    pub telemetry_enabled: bool,

    /// Collection endpoint for telemetry events; events go to the log when
    /// unset
    #[serde(default)]
    pub telemetry_endpoint: Option<String>,
}

// Default value functions for serde
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_interval_ms() -> u64 {
    15_000
}

fn default_timeout_ms() -> u64 {
    4_000
}

fn default_degraded_threshold_ms() -> u64 {
    1_500
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            degraded_threshold_ms: default_degraded_threshold_ms(),
            telemetry_enabled: true,
            telemetry_endpoint: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load("knokspix-monitor", "config")
    }

    /// Save configuration to disk
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store("knokspix-monitor", "config", self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path("knokspix-monitor", "config")
    }

    /// Build the library monitor configuration from the stored values
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            base_url: self.base_url.clone(),
            interval: Duration::from_millis(self.interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            degraded_threshold: Duration::from_millis(self.degraded_threshold_ms),
            ..Default::default()
        }
    }
}
