//! Error types for the arena environment abstraction.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The remote endpoint did not answer in time
    #[error("Timeout after {after_ms}ms waiting for {url}")]
    Timeout { url: String, after_ms: u64 },

    /// Connection to the remote endpoint could not be established
    #[error("Endpoint unreachable: {url} ({reason})")]
    Unreachable { url: String, reason: String },

    /// The remote endpoint answered with a non-success status
    #[error("Endpoint {url} rejected the request with status {status}")]
    Rejected { url: String, status: u16 },

    /// Any other transport failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The simulation refused or failed a step
    #[error("Simulation error: {0}")]
    SimulationError(String),

    /// Recording directory or file could not be written
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container runtime failed to start or reach an agent container
    #[error("Container error: {0}")]
    ContainerError(String),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a simulation error.
    pub fn simulation(msg: impl Into<String>) -> Self {
        Self::SimulationError(msg.into())
    }

    /// Creates a storage error for the given path.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Creates a container error.
    pub fn container(msg: impl Into<String>) -> Self {
        Self::ContainerError(msg.into())
    }

    /// True when the endpoint never produced an answer (timeout or refused connection).
    pub fn is_no_response(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }
}
