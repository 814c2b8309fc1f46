//! JSON-over-HTTP transport abstraction.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::EnvError;

/// Abstraction for the request/response calls the orchestrator makes.
///
/// Both the telemetry sink and the remote agent handles talk through this
/// trait, so tests can swap the network for an in-memory observer.
///
/// # Implementations
///
/// - **Production**: `HttpTransport` (reqwest)
/// - **Simulation**: `MemoryObserver` (in `arena_sim`), records every call
///
/// # Call Flow
///
/// ```text
/// Orchestrator                Transport                  Endpoint
///   |                           |                          |
///   |-- post_json(url, body) -->|                          |
///   |                           |-- POST (timeout) ------->|
///   |                           |<------------- 200 + body-|
///   |<-------------- Ok(body) --|                          |
/// ```
#[async_trait]
pub trait JsonTransport: Send + Sync + 'static {
    /// Posts a JSON body and returns the decoded response body.
    ///
    /// # Returns
    /// * `Ok(Value)` - 2xx response; `Value::Null` when the body is empty,
    ///   `Value::String` when it is not JSON
    /// * `Err(EnvError::Timeout)` - no answer within `timeout`
    /// * `Err(EnvError::Unreachable)` - connection could not be established
    /// * `Err(EnvError::Rejected)` - non-success status
    ///
    /// # Note
    /// Delivery is at-most-once; implementations never retry.
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value, EnvError>;

    /// Issues a GET and succeeds on any 2xx status.
    ///
    /// Used as a readiness probe for freshly started agent containers.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), EnvError>;
}
