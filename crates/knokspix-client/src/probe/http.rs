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

//! HTTP liveness probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{ProbeError, Prober};

/// Well-known liveness path exposed by the backend.
pub const HEALTH_PATH: &str = "/healthz";

/// Probes a backend liveness endpoint over HTTP(S).
///
/// Any 2xx response counts as success; the response body is not inspected.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProber {
    /// Create a prober for the backend at `base_url` with a hard per-request
    /// timeout.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let url = format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH);
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }

    /// The full URL this prober requests.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self) -> Result<Duration, ProbeError> {
        let start = Instant::now();

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_error)?;

        if response.status().is_success() {
            Ok(start.elapsed())
        } else {
            Err(ProbeError::Http(response.status().as_u16()))
        }
    }
}

fn classify_error(err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(err.to_string())
    }
}
