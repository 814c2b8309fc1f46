//! Agent handles - one capability per agent: "give me an action for this
//! observation".
//!
//! # Variants
//!
//! ```text
//! AgentHandle
//!   ├── ScriptedHandle  in-process strategy (simple, static, random, test::<name>)
//!   ├── HumanHandle     human input device (player, playerblock)
//!   └── RemoteHandle    HTTP endpoint, optionally in a container
//!                       (docker, docker_hakozaki, http, multiplayers)
//! ```
//!
//! Handles are created once per run and shared read-only across episodes;
//! the few that carry state (strategy RNGs, input queues) guard it
//! internally.

mod human;
mod remote;
mod scripted;

pub use human::{ChannelController, ChannelInput, HumanHandle, HumanInput, KeyMap, Presentation};
pub use remote::RemoteHandle;
pub use scripted::{CycleStrategy, RandomStrategy, ScriptedHandle, SimpleStrategy, StaticStrategy, Strategy};

use arena_env::{Action, AgentId, Observation};
use async_trait::async_trait;

use crate::descriptor::{AgentDescriptor, AgentKind};
use crate::error::AgentError;

/// A resolved agent.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Returns the descriptor this handle was built from.
    fn descriptor(&self) -> &AgentDescriptor;

    /// Returns the agent's ordinal.
    fn agent_id(&self) -> AgentId {
        self.descriptor().ordinal()
    }

    /// Returns the backend kind.
    fn kind(&self) -> AgentKind {
        self.descriptor().kind()
    }

    /// Announces the game to the agent, once per run.
    async fn init_agent(&self, _game_type: &str) -> Result<(), AgentError> {
        Ok(())
    }

    /// Chooses an action for `obs`.
    async fn act(&self, obs: &Observation) -> Result<Action, AgentError>;

    /// Shows an observation to the agent.
    ///
    /// Only human handles do anything here. With `waiting` the call returns
    /// once the observation was acknowledged; without it, it returns at once.
    async fn notify_obs(&self, _obs: &Observation, _waiting: bool) -> Result<(), AgentError> {
        Ok(())
    }

    /// Tells the agent its episode is over.
    async fn episode_end(&self, _reward: i32) {}

    /// Re-seeds the agent's own random source.
    fn seed(&self, _seed: u64) {}

    /// Releases the agent's transport resource.
    async fn shutdown(&self) {}
}
