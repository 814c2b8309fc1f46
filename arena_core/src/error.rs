//! Error types for battle orchestration.

use arena_env::{AgentId, EnvError};
use thiserror::Error;

/// Errors raised while turning descriptors into agent handles.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The descriptor cannot be split into its expected fields
    #[error("Malformed agent descriptor '{descriptor}': {reason}")]
    MalformedDescriptor { descriptor: String, reason: String },

    /// The kind token is not one of the recognized kinds
    #[error("Unknown agent kind '{kind}' in descriptor '{descriptor}'")]
    UnknownAgentKind { kind: String, descriptor: String },

    /// A human-controlled agent was requested but no input device is configured
    #[error("No human input device configured for descriptor '{descriptor}'")]
    NoHumanInput { descriptor: String },

    /// The container backing a remote agent could not be started
    #[error("Container for agent {agent_id} failed: {source}")]
    Container {
        agent_id: AgentId,
        #[source]
        source: EnvError,
    },
}

impl ResolveError {
    /// Creates a malformed descriptor error.
    pub fn malformed(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the telemetry sink.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The observer did not answer within the timeout or could not be reached
    #[error("Delivery to {url} timed out: {source}")]
    DeliveryTimeout {
        url: String,
        #[source]
        source: EnvError,
    },

    /// The observer answered with an error
    #[error("Delivery to {url} was rejected: {source}")]
    DeliveryRejected {
        url: String,
        #[source]
        source: EnvError,
    },
}

impl TelemetryError {
    /// Returns the URL the delivery was addressed to.
    pub fn url(&self) -> &str {
        match self {
            Self::DeliveryTimeout { url, .. } | Self::DeliveryRejected { url, .. } => url,
        }
    }
}

/// Errors raised by a single agent call.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The transport to a remote agent failed
    #[error("Agent transport error: {0}")]
    Transport(#[from] EnvError),

    /// A remote agent answered with something that is not an action
    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),

    /// The human input device went away
    #[error("Human input closed")]
    InputClosed,
}

/// Phase of a run in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Agent resolution and setup, before any episode
    Resolution,
    /// Episode start: reset and observer handshake
    InitHandshake,
    /// A tick of the running episode (0-based)
    Tick(u64),
    /// Episode end: final info, final frame, merged recording
    Finalization,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Resolution => write!(f, "resolution"),
            Phase::InitHandshake => write!(f, "init handshake"),
            Phase::Tick(n) => write!(f, "tick {}", n),
            Phase::Finalization => write!(f, "finalization"),
        }
    }
}

/// Errors that terminate a run.
#[derive(Debug, Error)]
pub enum BattleError {
    /// An agent descriptor could not be resolved
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    /// A remote agent refused initialization
    #[error("resolution failed: agent {agent_id} did not initialize: {source}")]
    AgentInit {
        agent_id: AgentId,
        #[source]
        source: AgentError,
    },

    /// The observer could not be reached under a fatal delivery policy
    #[error("{phase} failed: {source}")]
    Telemetry {
        phase: Phase,
        #[source]
        source: TelemetryError,
    },

    /// The simulation failed
    #[error("{phase} failed: {source}")]
    SimulationStep {
        phase: Phase,
        #[source]
        source: EnvError,
    },

    /// The run configuration is inconsistent
    #[error("resolution failed: invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BattleError {
    /// Returns the phase the run was in when the error occurred.
    pub fn phase(&self) -> Phase {
        match self {
            BattleError::Resolution(_)
            | BattleError::AgentInit { .. }
            | BattleError::InvalidConfig(_) => Phase::Resolution,
            BattleError::Telemetry { phase, .. } | BattleError::SimulationStep { phase, .. } => *phase,
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
