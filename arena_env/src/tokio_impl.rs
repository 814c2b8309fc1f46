//! Production implementations backed by Tokio and reqwest.

use crate::{BattleContext, EnvError, JsonTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::trace;

/// Production context backed by Tokio and the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BattleContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// HTTP transport over a shared reqwest client.
///
/// Every call carries its own timeout; the client itself has none so that
/// the telemetry and agent call sites can use different budgets.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh connection pool.
    pub fn new() -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arena-battle/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EnvError::network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Creates an Arc-wrapped transport for sharing across handles.
    pub fn shared() -> Result<Arc<Self>, EnvError> {
        Ok(Arc::new(Self::new()?))
    }

    fn classify(url: &str, timeout: Duration, err: reqwest::Error) -> EnvError {
        if err.is_timeout() {
            EnvError::Timeout {
                url: url.to_string(),
                after_ms: timeout.as_millis() as u64,
            }
        } else if err.is_connect() {
            EnvError::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            EnvError::network(format!("{}: {}", url, err))
        }
    }
}

#[async_trait]
impl JsonTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value, EnvError> {
        trace!("POST {}", url);
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| Self::classify(url, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| Self::classify(url, timeout, e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), EnvError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(url, timeout, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EnvError::Rejected {
                url: url.to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}
