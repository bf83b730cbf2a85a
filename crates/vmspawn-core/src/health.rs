//! Readiness probe for the notebook server running inside the instance

use crate::error::{Result, SpawnError};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one readiness probe. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not serving yet; carries a short reason for logs
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Checks whether the service behind a URL is ready
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Readiness;
}

/// Health endpoint of a notebook server: `http://<address>:<port><base_path>api`
pub fn health_url(address: &str, port: u16, base_path: &str) -> String {
    let base_path = if base_path.ends_with('/') {
        base_path.to_string()
    } else {
        format!("{}/", base_path)
    };
    format!("http://{}:{}{}api", address, port, base_path)
}

/// HTTP GET probe; only a 200 counts as ready
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Every probe is bounded by `timeout`. Instances are reached directly,
    /// never through a proxy from the environment.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| SpawnError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, url: &str) -> Readiness {
        match self.client.get(url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                tracing::info!("{} is available", url);
                Readiness::Ready
            }
            Ok(response) => {
                tracing::info!("{} failed: {}", url, response.status());
                Readiness::NotReady(format!("HTTP {}", response.status().as_u16()))
            }
            Err(e) => {
                tracing::info!("connection to {} failed: {}", url, e);
                let reason = if e.is_timeout() {
                    "timed out".to_string()
                } else {
                    "connection failed".to_string()
                };
                Readiness::NotReady(reason)
            }
        }
    }
}
