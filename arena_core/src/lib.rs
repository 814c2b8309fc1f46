//! Arena Core - Multi-agent battle orchestration.
//!
//! This library runs turn-based battles between heterogeneous agents:
//! 1. **Resolution**: `"<kind>::<spec>"` descriptors become agent handles
//!    (in-process strategies, human input devices, HTTP agents, containers)
//! 2. **Battle Loop**: per tick, every agent is polled concurrently, the
//!    simulation steps once and the state is streamed to an observer
//! 3. **Run Management**: seeding, N sequential episodes, and release of every
//!    acquired resource on every exit path
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        RunManager                          │
//! │  RunConfig ──► AgentResolver ──► Run (sim, agents, docker) │
//! │                                    │                       │
//! │                      ┌─────────────┴─────────────┐         │
//! │                      │    BattleLoop (episode)   │         │
//! │                      │  act ×N ─► step ─► send   │         │
//! │                      └─────────────┬─────────────┘         │
//! │                                    ▼                       │
//! │                 TelemetrySink  (envinfo, initial_obs,      │
//! │                                 step, final_info)          │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything external (clock, network, simulation, recorder, containers)
//! comes in through the traits of `arena_env`.

pub mod agents;
pub mod battle;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod run;
pub mod telemetry;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use agents::AgentHandle;
pub use battle::{BattleLoop, BattleState, EpisodeOutcome, EpisodePlan};
pub use config::{parse_agent_env_vars, AgentEnvVars, RunConfig, ServerDirectory};
pub use descriptor::{AgentDescriptor, AgentKind};
pub use error::{AgentError, BattleError, Phase, ResolveError, TelemetryError};
pub use registry::StrategyRegistry;
pub use resolver::{AgentResolver, HumanInputFactory};
pub use run::{EpisodeResult, Run, RunManager, RunReport};
pub use telemetry::{DeliveryPolicy, TelemetryPath, TelemetrySink};
