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

//! Probe layer for backend liveness checks.
//!
//! This module provides a trait-based abstraction over a single reachability
//! check. The default [`HttpProber`] hits the backend's `/healthz` endpoint;
//! alternative implementations can be supplied for other transports or for
//! testing the monitor layer without a network.

mod http;

pub use http::{HttpProber, HEALTH_PATH};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during a reachability probe.
///
/// Probe errors are never surfaced to callers of the monitor; they are
/// absorbed into [`ReachabilityState`](crate::monitor::ReachabilityState) and
/// rendered into its `last_error` field via [`Display`](std::fmt::Display).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The request exceeded the configured timeout.
    #[error("timeout")]
    Timeout,

    /// Network-level failure (DNS, connection refused, TLS).
    #[error("{0}")]
    Transport(String),

    /// The backend answered with a non-success status code.
    #[error("HTTP {0}")]
    Http(u16),
}

/// Trait for reachability probes.
///
/// A probe is one liveness check against the monitored backend, returning the
/// observed latency on success.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Execute a single reachability check.
    async fn probe(&self) -> Result<Duration, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rendering() {
        assert_eq!(ProbeError::Timeout.to_string(), "timeout");
        assert_eq!(ProbeError::Http(503).to_string(), "HTTP 503");
        assert_eq!(
            ProbeError::Transport("connection refused".to_string()).to_string(),
            "connection refused"
        );
    }
}
