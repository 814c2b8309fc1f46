//! Arena Environment Abstraction Layer
//!
//! This crate provides the seams between the battle orchestrator and
//! everything it does not own:
//! - Time (`now()`, `sleep()`) through [`BattleContext`]
//! - Network (`post_json()`, `probe()`) through [`JsonTransport`]
//! - The simulation, its factory, the recorder and the container runtime as
//!   collaborator traits
//! - Randomness derived from a single master seed ([`seed`])
//!
//! The production implementations ([`TokioContext`], [`HttpTransport`]) live
//! here together with the virtual clock ([`SimContext`]) shared by the test
//! suites of every crate; the other deterministic doubles live in `arena_sim`.
//!
//! # Example
//!
//! ```ignore
//! use arena_env::{BattleContext, JsonTransport};
//!
//! async fn heartbeat<Ctx: BattleContext, Net: JsonTransport>(ctx: &Ctx, net: &Net) {
//!     loop {
//!         let _ = net.post_json("http://localhost:8000/ping", &json!({}), timeout).await;
//!         ctx.sleep(Duration::from_secs(1)).await;
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod simulation;
mod collaborators;
mod tokio_impl;
mod sim_context;
pub mod seed;

pub use context::BattleContext;
pub use network::JsonTransport;
pub use types::{
    Action, AgentId, Endpoint, EpisodeInfo, GameResult, Observation, RenderMode,
    RenderOptions, StepOutcome, StepSnapshot,
};
pub use error::EnvError;
pub use simulation::Simulation;
pub use collaborators::{ContainerRuntime, Recorder, SimulationFactory};
pub use tokio_impl::{HttpTransport, TokioContext};
pub use sim_context::SimContext;
