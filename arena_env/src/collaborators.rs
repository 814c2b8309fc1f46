//! Simulation factory, recorder and container runtime collaborator interfaces.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::EnvError;
use crate::simulation::Simulation;
use crate::types::{Endpoint, EpisodeInfo, StepSnapshot};

/// Builds a simulation from its configuration id.
pub trait SimulationFactory: Send + Sync {
    /// Creates the simulation named `config_id`, optionally starting from a
    /// saved game state.
    fn make(
        &self,
        config_id: &str,
        game_state_file: Option<&Path>,
    ) -> Result<Box<dyn Simulation>, EnvError>;
}

/// Persists episode frames and merges them into one record.
pub trait Recorder: Send + Sync {
    /// Writes the frame of one snapshot into `dir`.
    fn persist_frame(&self, dir: &Path, snapshot: &StepSnapshot) -> Result<(), EnvError>;

    /// Merges every frame in `dir` with the episode metadata.
    fn merge_episode(
        &self,
        dir: &Path,
        agents: &[String],
        finished_at: &str,
        config_id: &str,
        info: &EpisodeInfo,
    ) -> Result<(), EnvError>;
}

/// Starts agent containers and tears them down.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Starts `image` listening on `port` and returns its endpoint once it
    /// answers requests.
    async fn start(
        &self,
        image: &str,
        port: u16,
        env: &BTreeMap<String, String>,
    ) -> Result<Endpoint, EnvError>;

    /// Stops every container this runtime started.
    async fn stop_all(&self);
}
