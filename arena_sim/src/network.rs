//! In-memory observer implementing JsonTransport.

use arena_env::{EnvError, JsonTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How the observer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObserverMode {
    /// 200 with an empty body
    #[default]
    Accepting,
    /// Connection refused
    Unreachable,
    /// No answer before the timeout
    Silent,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedCall {
    /// Full URL
    pub url: String,
    /// Path without leading slash, e.g. `step` or `request`
    pub path: String,
    /// Posted body
    pub payload: Value,
}

/// Records every call instead of sending it.
///
/// Stands in for both the messaging server and remote agents: `/request`
/// is answered with `{"action": <configured action>}`.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    mode: Mutex<ObserverMode>,
    rejected_paths: Mutex<BTreeSet<String>>,
    action: Mutex<u64>,
    calls: Mutex<Vec<ObservedCall>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MemoryObserver {
    /// Creates an accepting observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an observer nobody can connect to.
    pub fn unreachable() -> Self {
        let observer = Self::new();
        observer.set_mode(ObserverMode::Unreachable);
        observer
    }

    pub fn set_mode(&self, mode: ObserverMode) {
        *lock(&self.mode) = mode;
    }

    /// Answers calls to `path` with status 500.
    pub fn reject_path(&self, path: &str) {
        lock(&self.rejected_paths).insert(path.trim_start_matches('/').to_string());
    }

    /// Sets the action returned by `/request`.
    pub fn set_action(&self, action: u64) {
        *lock(&self.action) = action;
    }

    /// Every call that reached the observer, in order.
    pub fn calls(&self) -> Vec<ObservedCall> {
        lock(&self.calls).clone()
    }

    /// Paths of every call, in order.
    pub fn paths(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.path.clone()).collect()
    }

    /// Payloads posted to `path`.
    pub fn payloads(&self, path: &str) -> Vec<Value> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.path == path)
            .map(|c| c.payload.clone())
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

/// Strips scheme, host and port.
fn path_of(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.split_once('/')
        .map(|(_, path)| path.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl JsonTransport for MemoryObserver {
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value, EnvError> {
        match *lock(&self.mode) {
            ObserverMode::Accepting => {}
            ObserverMode::Unreachable => {
                return Err(EnvError::Unreachable {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                })
            }
            ObserverMode::Silent => {
                return Err(EnvError::Timeout {
                    url: url.to_string(),
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }

        let path = path_of(url);
        lock(&self.calls).push(ObservedCall {
            url: url.to_string(),
            path: path.clone(),
            payload: body.clone(),
        });

        if lock(&self.rejected_paths).contains(&path) {
            return Err(EnvError::Rejected {
                url: url.to_string(),
                status: 500,
            });
        }
        if path == "request" {
            return Ok(json!({ "action": *lock(&self.action) }));
        }
        Ok(Value::Null)
    }

    async fn probe(&self, url: &str, _timeout: Duration) -> Result<(), EnvError> {
        match *lock(&self.mode) {
            ObserverMode::Accepting => Ok(()),
            _ => Err(EnvError::Unreachable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}
