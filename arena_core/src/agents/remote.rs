//! Agents behind an HTTP endpoint.
//!
//! Wire format (JSON bodies, all POST):
//!
//! ```text
//! /init_agent   {"id": n, "game_type": "..."}
//! /request      {"obs": {...}, "action_space": 6}  ->  {"action": k}
//! /episode_end  {"reward": r}
//! /shutdown     {}
//! ```

use arena_env::{Action, Endpoint, JsonTransport, Observation};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::AgentHandle;
use crate::descriptor::AgentDescriptor;
use crate::error::AgentError;

/// Handle for `docker`, `docker_hakozaki`, `http` and `multiplayers` agents.
pub struct RemoteHandle {
    descriptor: AgentDescriptor,
    endpoint: Endpoint,
    transport: Arc<dyn JsonTransport>,

    /// Bound of one `/request`
    action_timeout: Duration,

    /// Bound of init, episode end and shutdown calls
    control_timeout: Duration,
}

impl RemoteHandle {
    pub fn new(
        descriptor: AgentDescriptor,
        endpoint: Endpoint,
        transport: Arc<dyn JsonTransport>,
        action_timeout: Duration,
        control_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            endpoint,
            transport,
            action_timeout,
            control_timeout,
        }
    }

    /// Returns the endpoint the agent is reached at.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn call(&self, path: &str, body: &Value, timeout: Duration) -> Result<Value, AgentError> {
        let url = self.endpoint.url(path);
        debug!("agent {} -> {}", self.descriptor.ordinal(), url);
        Ok(self.transport.post_json(&url, body, timeout).await?)
    }
}

/// Reads the action out of a `/request` response.
fn parse_action(response: &Value) -> Result<Action, AgentError> {
    let index = response
        .get("action")
        .and_then(Value::as_u64)
        .ok_or_else(|| AgentError::InvalidResponse(format!("missing integer 'action' in {}", response)))?;
    Action::from_index(index)
        .ok_or_else(|| AgentError::InvalidResponse(format!("action {} outside the action space", index)))
}

#[async_trait]
impl AgentHandle for RemoteHandle {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn init_agent(&self, game_type: &str) -> Result<(), AgentError> {
        let body = json!({ "id": self.descriptor.ordinal(), "game_type": game_type });
        self.call("init_agent", &body, self.control_timeout).await?;
        Ok(())
    }

    async fn act(&self, obs: &Observation) -> Result<Action, AgentError> {
        let body = json!({ "obs": obs, "action_space": Action::SPACE });
        let response = self.call("request", &body, self.action_timeout).await?;
        parse_action(&response)
    }

    async fn episode_end(&self, reward: i32) {
        let body = json!({ "reward": reward });
        if let Err(e) = self.call("episode_end", &body, self.control_timeout).await {
            warn!("agent {} missed episode end: {}", self.descriptor.ordinal(), e);
        }
    }

    async fn shutdown(&self) {
        // The agent may already be gone
        let _ = self.call("shutdown", &json!({}), self.control_timeout).await;
    }
}
