//! Arena Sim - reference collaborators and the `arena-battle` binary.
//!
//! This crate supplies everything `arena_core` drives but does not own:
//! - **Simulation**: a seeded grid arena ([`ArenaSim`], [`ArenaFactory`])
//! - **Recording**: per-tick JSON frames merged into one record ([`JsonRecorder`])
//! - **Containers**: agent images started through the docker CLI ([`DockerRuntime`])
//! - **Human input**: a stdin-driven front end ([`TerminalInput`])
//! - **Test doubles**: an in-memory observer ([`MemoryObserver`]), plus the
//!   virtual clock ([`SimContext`]) re-exported from `arena_env`
//!
//! # Usage
//!
//! ```ignore
//! use arena_core::{RunConfig, RunManager};
//! use arena_sim::{ArenaFactory, MemoryObserver, SimContext};
//!
//! let observer = Arc::new(MemoryObserver::new());
//! let manager = RunManager::new(SimContext::shared(), observer.clone(), Arc::new(ArenaFactory));
//! let report = manager.run_battles(&RunConfig::default(), 1, Some(42)).await?;
//! assert_eq!(observer.paths().last().map(String::as_str), Some("final_info"));
//! ```

mod arena;
mod docker;
mod exporter;
mod input;
mod network;

pub use arena::{cell, ArenaAgent, ArenaConfig, ArenaFactory, ArenaSim, ArenaState};
pub use arena_env::SimContext;
pub use docker::{DockerRuntime, CONTAINER_PORT};
pub use exporter::{EpisodeRecord, JsonRecorder, RecordedResult, MERGED_FILE};
pub use input::{describe, TerminalInput};
pub use network::{MemoryObserver, ObservedCall, ObserverMode};
