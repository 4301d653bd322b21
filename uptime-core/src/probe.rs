//! Liveness probe for a single URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    /// Wall-clock time of the attempt, including failed ones.
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            reachable: true,
            latency_ms,
            status_code: Some(StatusCode::OK.as_u16()),
            error: None,
        }
    }

    pub fn down(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            reachable: false,
            latency_ms,
            status_code: None,
            error: Some(error.into()),
        }
    }
}

/// Transport failures are outcomes, never errors.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    (start.elapsed().as_secs_f64() * 1000.0).round() as u64
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let request = self.client.get(url).send();

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                let latency_ms = elapsed_ms(start);
                let status = response.status();
                // Only an exact 200 counts; dashboards key uptime off it.
                if status == StatusCode::OK {
                    ProbeOutcome::up(latency_ms)
                } else {
                    ProbeOutcome {
                        reachable: false,
                        latency_ms,
                        status_code: Some(status.as_u16()),
                        error: Some(format!("unexpected status {status}")),
                    }
                }
            }
            Ok(Err(e)) => ProbeOutcome::down(elapsed_ms(start), e.to_string()),
            Err(_) => ProbeOutcome::down(
                elapsed_ms(start),
                format!("timed out after {}ms", timeout.as_millis()),
            ),
        }
    }
}
