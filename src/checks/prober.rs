//! Single HTTP probe with outcome classification

use std::time::{Duration, Instant};

use crate::data::Failure;

/// Probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Upper bound for the whole request
    pub timeout: Duration,
    pub user_agent: String,
    /// Bytes of response kept for a bad status
    pub max_dump_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: format!("upcheck/{}", env!("CARGO_PKG_VERSION")),
            max_dump_bytes: 4096,
        }
    }
}

impl ProbeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success { status: u16, latency: Duration },
    Failure(Failure),
}

/// Issues one GET per call and classifies what came back
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Timeout maps to `timeout`, any other transport error to `other`, an
    /// unexpected status to `bad_code`. Never fails; failures are data.
    pub async fn probe(&self, url: &str, expected_status: u16) -> ProbeOutcome {
        let started = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ProbeOutcome::Failure(Failure::timeout(e.to_string())),
            Err(e) => return ProbeOutcome::Failure(Failure::other(e.to_string())),
        };

        let latency = started.elapsed();
        let status = response.status().as_u16();
        if status == expected_status {
            return ProbeOutcome::Success { status, latency };
        }

        let dump = self.dump(response).await;
        ProbeOutcome::Failure(Failure::bad_code(status, Some(dump)))
    }

    /// Status line, headers and the start of the body
    async fn dump(&self, response: reqwest::Response) -> String {
        let mut dump = format!("{:?} {}\r\n", response.version(), response.status());
        for (name, value) in response.headers() {
            dump.push_str(name.as_str());
            dump.push_str(": ");
            dump.push_str(value.to_str().unwrap_or("<binary>"));
            dump.push_str("\r\n");
        }
        dump.push_str("\r\n");

        match response.text().await {
            Ok(body) => dump.push_str(&body),
            Err(e) => tracing::debug!(error = %e, "Failed to read response body"),
        }

        truncate(&mut dump, self.config.max_dump_bytes);
        dump
    }
}

fn truncate(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
