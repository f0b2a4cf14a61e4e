//! HTTP sink writing rollups to an OpenTSDB-compatible `/api/put` endpoint.

use super::{RollupSink, SinkError};
use crate::core::{RolledUpSample, Tags};
use serde::Serialize;
use std::time::Duration;

/// HTTP sink configuration.
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Base URL of the time-series store, e.g. `http://127.0.0.1:4242`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSinkConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Get the data point write endpoint URL.
    pub fn put_url(&self) -> String {
        format!("{}/api/put", self.base_url)
    }

    /// Get the version endpoint used as a health check.
    pub fn version_url(&self) -> String {
        format!("{}/api/version", self.base_url)
    }
}

/// Data point body accepted by `/api/put`.
#[derive(Debug, Clone, Serialize)]
pub struct PutDataPoint<'a> {
    pub metric: String,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    pub value: f64,
    pub tags: &'a Tags,
}

impl<'a> From<&'a RolledUpSample> for PutDataPoint<'a> {
    fn from(rollup: &'a RolledUpSample) -> Self {
        Self {
            metric: rollup.rollup_metric(),
            timestamp: rollup.window_start.div_euclid(1000),
            value: rollup.average,
            tags: &rollup.tags,
        }
    }
}

struct AsyncClient {
    config: HttpSinkConfig,
    client: reqwest::Client,
}

impl AsyncClient {
    async fn test_connection(&self) -> Result<bool, SinkError> {
        let response = self
            .client
            .get(self.config.version_url())
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn put(&self, point: &PutDataPoint<'_>) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.config.put_url())
            .json(point)
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Blocking HTTP sink, safe to call from the flush thread.
pub struct HttpSink {
    inner: AsyncClient,
    runtime: tokio::runtime::Runtime,
}

impl HttpSink {
    /// Create a new sink with its own current-thread runtime.
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SinkError::Network(format!("Failed to create runtime: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: AsyncClient { config, client },
            runtime,
        })
    }

    /// Check that the store answers its version endpoint.
    pub fn test_connection(&self) -> Result<bool, SinkError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    pub fn config(&self) -> &HttpSinkConfig {
        &self.inner.config
    }
}

impl RollupSink for HttpSink {
    fn emit(&self, rollup: &RolledUpSample) -> Result<(), SinkError> {
        let point = PutDataPoint::from(rollup);
        self.runtime.block_on(self.inner.put(&point))
    }
}
