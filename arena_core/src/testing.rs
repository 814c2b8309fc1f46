//! Test doubles shared by the unit tests of this crate.

use arena_env::{
    Action, ContainerRuntime, Endpoint, EnvError, EpisodeInfo, GameResult, JsonTransport,
    Observation, Recorder, RenderOptions, Simulation, SimulationFactory, StepOutcome, StepSnapshot, AgentId,
};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observer/agent double: remembers every post and answers `/request`
/// with `{"action": 0}`.
#[derive(Default)]
pub struct RecordingTransport {
    pub posts: Mutex<Vec<(String, Value)>>,
    pub unreachable: bool,
    /// Path suffix answered with 500
    pub reject_suffix: Option<&'static str>,
}

impl RecordingTransport {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    pub fn rejecting(suffix: &'static str) -> Self {
        Self {
            reject_suffix: Some(suffix),
            ..Default::default()
        }
    }

    /// Paths (without host) posted so far.
    pub fn paths(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.rsplit('/').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn payloads(&self, path: &str) -> Vec<Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.ends_with(&format!("/{}", path)))
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl JsonTransport for RecordingTransport {
    async fn post_json(&self, url: &str, body: &Value, _timeout: Duration) -> Result<Value, EnvError> {
        if self.unreachable {
            return Err(EnvError::Unreachable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.posts.lock().unwrap().push((url.to_string(), body.clone()));
        if self.reject_suffix.is_some_and(|s| url.ends_with(s)) {
            return Err(EnvError::Rejected {
                url: url.to_string(),
                status: 500,
            });
        }
        if url.ends_with("/request") {
            return Ok(json!({ "action": 0 }));
        }
        Ok(Value::Null)
    }

    async fn probe(&self, _url: &str, _timeout: Duration) -> Result<(), EnvError> {
        Ok(())
    }
}

/// Container runtime double.
#[derive(Default)]
pub struct FakeContainers {
    pub started: Mutex<Vec<(String, u16, BTreeMap<String, String>)>>,
    pub stopped: AtomicU64,
    pub fail: bool,
}

#[async_trait]
impl ContainerRuntime for FakeContainers {
    async fn start(&self, image: &str, port: u16, env: &BTreeMap<String, String>) -> Result<Endpoint, EnvError> {
        if self.fail {
            return Err(EnvError::container(format!("cannot pull {}", image)));
        }
        self.started.lock().unwrap().push((image.to_string(), port, env.clone()));
        Ok(Endpoint::new("http://localhost", port))
    }

    async fn stop_all(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Corridor game: every agent walks; the episode ends after `length` ticks
/// with agent 0 winning. Observations carry a seeded random draw so seeding
/// is observable.
pub struct CorridorSim {
    pub num_agents: usize,
    pub length: u64,
    pub step_count: u64,
    pub partial: bool,
    pub rng: ChaCha8Rng,
    pub noise: u64,
    pub fail_at: Option<u64>,
    pub actions: Arc<Mutex<Vec<Vec<Action>>>>,
    pub observability_log: Arc<Mutex<Vec<bool>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl CorridorSim {
    pub fn new(num_agents: usize, length: u64) -> Self {
        Self {
            num_agents,
            length,
            step_count: 0,
            partial: true,
            rng: ChaCha8Rng::seed_from_u64(0),
            noise: 0,
            fail_at: None,
            actions: Arc::default(),
            observability_log: Arc::default(),
            closed: Arc::default(),
        }
    }
}

impl Simulation for CorridorSim {
    fn reset(&mut self) -> Result<Vec<Observation>, EnvError> {
        self.step_count = 0;
        self.noise = self.rng.gen();
        Ok(self.observations())
    }

    fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError> {
        if self.fail_at == Some(self.step_count) {
            return Err(EnvError::simulation("board exploded"));
        }
        self.actions.lock().unwrap().push(actions.to_vec());
        self.step_count += 1;
        let done = self.step_count >= self.length;
        let info = if done {
            EpisodeInfo {
                result: GameResult::Win,
                winners: vec![AgentId(0)],
                step_count: self.step_count,
            }
        } else {
            EpisodeInfo::incomplete(self.step_count)
        };
        let rewards = (0..self.num_agents)
            .map(|i| if !done { 0 } else if i == 0 { 1 } else { -1 })
            .collect();
        Ok(StepOutcome {
            observations: self.observations(),
            rewards,
            done,
            info,
        })
    }

    fn render(&mut self, _options: &RenderOptions) -> Result<(), EnvError> {
        Ok(())
    }

    fn close_render(&mut self) {}

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn observations(&self) -> Vec<Observation> {
        self.observability_log.lock().unwrap().push(self.partial);
        (0..self.num_agents)
            .map(|i| json!({ "agent_id": i, "step": self.step_count, "noise": self.noise }))
            .collect()
    }

    fn is_partially_observable(&self) -> bool {
        self.partial
    }

    fn set_partially_observable(&mut self, partial: bool) {
        self.partial = partial;
    }

    fn state_snapshot(&self) -> Value {
        json!({ "step_count": self.step_count, "noise": self.noise })
    }

    fn env_info(&self) -> Value {
        json!({ "game": "corridor", "length": self.length })
    }

    fn render_fps(&self) -> u32 {
        10
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn game_type(&self) -> &str {
        "corridor"
    }

    fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Factory producing corridor simulations.
pub struct CorridorFactory {
    pub num_agents: usize,
    pub length: u64,
    pub closed: Arc<Mutex<bool>>,
    pub actions: Arc<Mutex<Vec<Vec<Action>>>>,
}

impl CorridorFactory {
    pub fn new(num_agents: usize, length: u64) -> Self {
        Self {
            num_agents,
            length,
            closed: Arc::default(),
            actions: Arc::default(),
        }
    }
}

impl SimulationFactory for CorridorFactory {
    fn make(&self, config_id: &str, _game_state_file: Option<&Path>) -> Result<Box<dyn Simulation>, EnvError> {
        if config_id != "Corridor-v0" {
            return Err(EnvError::simulation(format!("unknown config {}", config_id)));
        }
        let mut sim = CorridorSim::new(self.num_agents, self.length);
        sim.closed = self.closed.clone();
        sim.actions = self.actions.clone();
        Ok(Box::new(sim))
    }
}

/// Recorder double keeping frames in memory.
#[derive(Default)]
pub struct MemoryRecorder {
    pub frames: Mutex<Vec<(PathBuf, u64)>>,
    pub merged: Mutex<Vec<(PathBuf, Vec<String>, String)>>,
    pub fail: bool,
}

impl Recorder for MemoryRecorder {
    fn persist_frame(&self, dir: &Path, snapshot: &StepSnapshot) -> Result<(), EnvError> {
        if self.fail {
            return Err(EnvError::storage(dir, std::io::Error::other("disk full")));
        }
        self.frames.lock().unwrap().push((dir.to_path_buf(), snapshot.step_count));
        Ok(())
    }

    fn merge_episode(
        &self,
        dir: &Path,
        agents: &[String],
        _finished_at: &str,
        _config_id: &str,
        info: &EpisodeInfo,
    ) -> Result<(), EnvError> {
        self.merged
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), agents.to_vec(), info.result.to_string()));
        Ok(())
    }
}
