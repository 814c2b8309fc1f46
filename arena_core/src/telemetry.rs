//! Telemetry sink - timeout-bounded delivery to the messaging server.
//!
//! The messaging server is an external observer that receives a live feed of
//! the battle on four sub-paths:
//!
//! ```text
//! envinfo → initial_obs → step × K → final_info
//! ```
//!
//! Every call carries an explicit timeout and is attempted once. Whether a
//! failed delivery ends the episode is decided per call site through a
//! [`DeliveryPolicy`].

use arena_env::{EnvError, JsonTransport};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::TelemetryError;

/// Well-known telemetry sub-paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryPath {
    EnvInfo,
    InitialObs,
    Step,
    FinalInfo,
}

impl TelemetryPath {
    /// Returns the sub-path without leading slash.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryPath::EnvInfo => "envinfo",
            TelemetryPath::InitialObs => "initial_obs",
            TelemetryPath::Step => "step",
            TelemetryPath::FinalInfo => "final_info",
        }
    }
}

impl std::fmt::Display for TelemetryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a call site does with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Propagate the error
    Fatal,
    /// Log a warning and carry on
    LogAndContinue,
}

/// Best-effort delivery channel to the messaging server.
pub struct TelemetrySink {
    /// `http://host:port`
    base_url: String,

    /// Default timeout of `deliver`
    timeout: Duration,

    /// Shared transport
    transport: Arc<dyn JsonTransport>,

    /// Deliveries that failed under `LogAndContinue`
    dropped: AtomicU64,
}

impl TelemetrySink {
    /// Creates a sink for `http://host:port`.
    pub fn new(host: &str, port: u16, timeout: Duration, transport: Arc<dyn JsonTransport>) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            timeout,
            transport,
            dropped: AtomicU64::new(0),
        }
    }

    /// Creates the sink described by a run configuration.
    pub fn from_config(config: &RunConfig, transport: Arc<dyn JsonTransport>) -> Self {
        Self::new(
            &config.messaging_host,
            config.messaging_port,
            config.telemetry_timeout,
            transport,
        )
    }

    /// Returns the URL of a sub-path.
    pub fn url(&self, path: TelemetryPath) -> String {
        format!("{}/{}", self.base_url, path.as_str())
    }

    /// Sends one payload with an explicit timeout.
    ///
    /// # Errors
    /// * `DeliveryTimeout` - no answer within `timeout`, or no connection
    /// * `DeliveryRejected` - the observer answered with an error
    pub async fn send(&self, path: TelemetryPath, payload: &Value, timeout: Duration) -> Result<(), TelemetryError> {
        let url = self.url(path);
        debug!("sending {} to {}", path, url);

        match self.transport.post_json(&url, payload, timeout).await {
            Ok(_) => Ok(()),
            Err(source) if source.is_no_response() => {
                warn!("Telemetry timeout on {}: make sure the messaging server is running", url);
                Err(TelemetryError::DeliveryTimeout { url, source })
            }
            Err(source @ EnvError::Rejected { .. }) => Err(TelemetryError::DeliveryRejected { url, source }),
            Err(source) => Err(TelemetryError::DeliveryTimeout { url, source }),
        }
    }

    /// Sends one payload with the default timeout and applies `policy`.
    pub async fn deliver(
        &self,
        path: TelemetryPath,
        payload: &Value,
        policy: DeliveryPolicy,
    ) -> Result<(), TelemetryError> {
        match self.send(path, payload, self.timeout).await {
            Ok(()) => Ok(()),
            Err(err) => match policy {
                DeliveryPolicy::Fatal => Err(err),
                DeliveryPolicy::LogAndContinue => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping {} telemetry: {}", path, err);
                    Ok(())
                }
            },
        }
    }

    /// Number of deliveries dropped under `LogAndContinue`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
