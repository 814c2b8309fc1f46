//! Run Manager - N sequential episodes over one set of resources.
//!
//! A [`Run`] acquires the agent handles, the simulation and any agent
//! containers once, lends them to every episode and releases them on every
//! exit path: `close()` after the last episode (or the first error), and a
//! `Drop` fallback when the run is abandoned (panic, Ctrl-C).

use arena_env::seed::{agent_seed, derive_seed, random_master_seed, SIMULATION_STREAM};
use arena_env::{
    BattleContext, ContainerRuntime, EpisodeInfo, GameResult, JsonTransport, Recorder, Simulation,
    SimulationFactory,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::agents::AgentHandle;
use crate::battle::{BattleLoop, EpisodeOutcome, EpisodePlan};
use crate::config::RunConfig;
use crate::error::{BattleError, Phase};
use crate::registry::StrategyRegistry;
use crate::resolver::{AgentResolver, HumanInputFactory};
use crate::telemetry::TelemetrySink;

/// Result of one finished episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeResult {
    /// 1-based episode index
    pub index: usize,

    /// Final result
    pub result: GameResult,

    /// Final step info
    pub info: EpisodeInfo,

    /// Final reward of every agent
    pub rewards: Vec<i32>,

    /// Run-clock duration of the episode
    pub duration: Duration,

    /// Ticks executed
    pub ticks: u64,

    /// Recorder failure, if recording stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_error: Option<String>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Master seed actually used
    pub seed: u64,

    /// One entry per episode, in order
    pub episodes: Vec<EpisodeResult>,

    /// Step-level telemetry deliveries that were dropped
    pub dropped_telemetry: u64,
}

/// Resources held for the duration of a run.
pub struct Run {
    sim: Box<dyn Simulation>,
    agents: Vec<Box<dyn AgentHandle>>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    closed: bool,
}

impl Run {
    /// Resolves the agents, builds the simulation and initializes remote agents.
    ///
    /// Descriptors are resolved before the simulation is built, so a bad
    /// descriptor fails without side effects.
    pub async fn open(
        config: &RunConfig,
        resolver: &AgentResolver,
        factory: &dyn SimulationFactory,
    ) -> Result<Self, BattleError> {
        config.validate()?;

        let agents = resolver
            .resolve_all(&config.agent_descriptors, &config.agent_env_vars)
            .await?;
        let containers = resolver.containers().cloned();

        let sim = match factory.make(&config.config_id, config.game_state_file.as_deref()) {
            Ok(sim) => sim,
            Err(source) => {
                if let Some(containers) = &containers {
                    containers.stop_all().await;
                }
                return Err(BattleError::SimulationStep {
                    phase: Phase::Resolution,
                    source,
                });
            }
        };

        let mut run = Self {
            sim,
            agents,
            containers,
            closed: false,
        };

        if run.sim.num_agents() != run.agents.len() {
            let err = BattleError::invalid_config(format!(
                "{} expects {} agents, {} given",
                config.config_id,
                run.sim.num_agents(),
                run.agents.len()
            ));
            run.close().await;
            return Err(err);
        }

        let game_type = run.sim.game_type().to_string();
        for agent in &run.agents {
            if let Err(source) = agent.init_agent(&game_type).await {
                let err = BattleError::AgentInit {
                    agent_id: agent.agent_id(),
                    source,
                };
                run.close().await;
                return Err(err);
            }
        }

        Ok(run)
    }

    /// Seeds the simulation and every agent from one master seed.
    pub fn seed(&mut self, master_seed: u64) {
        self.sim.seed(derive_seed(master_seed, SIMULATION_STREAM));
        for agent in &self.agents {
            agent.seed(agent_seed(master_seed, agent.agent_id().as_u64()));
        }
    }

    /// Agent handles, in ordinal order.
    pub fn agents(&self) -> &[Box<dyn AgentHandle>] {
        &self.agents
    }

    /// Plays one episode with the held resources.
    pub async fn play_episode<Ctx: BattleContext>(
        &mut self,
        ctx: &Ctx,
        telemetry: &TelemetrySink,
        recorder: Option<&dyn Recorder>,
        plan: EpisodePlan,
    ) -> Result<EpisodeOutcome, BattleError> {
        BattleLoop::new(ctx, self.sim.as_mut(), &self.agents, telemetry, recorder, plan)
            .run()
            .await
    }

    /// Releases agents, containers and the simulation. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        join_all(self.agents.iter().map(|agent| agent.shutdown())).await;
        if let Some(containers) = &self.containers {
            containers.stop_all().await;
        }
        self.sim.close();
        info!("Run resources released");
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("Run dropped without close, releasing resources");
        self.sim.close();
        if let Some(containers) = self.containers.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { containers.stop_all().await });
            }
        }
    }
}

/// Runs battles against a fixed set of collaborators.
pub struct RunManager<Ctx: BattleContext> {
    ctx: Arc<Ctx>,
    transport: Arc<dyn JsonTransport>,
    factory: Arc<dyn SimulationFactory>,
    recorder: Option<Arc<dyn Recorder>>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    human_input: Option<HumanInputFactory>,
    registry: StrategyRegistry,
}

impl<Ctx: BattleContext> RunManager<Ctx> {
    pub fn new(ctx: Arc<Ctx>, transport: Arc<dyn JsonTransport>, factory: Arc<dyn SimulationFactory>) -> Self {
        Self {
            ctx,
            transport,
            factory,
            recorder: None,
            containers: None,
            human_input: None,
            registry: StrategyRegistry::with_builtins(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_containers(mut self, containers: Arc<dyn ContainerRuntime>) -> Self {
        self.containers = Some(containers);
        self
    }

    pub fn with_human_input(mut self, factory: HumanInputFactory) -> Self {
        self.human_input = Some(factory);
        self
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn resolver(&self, config: &RunConfig) -> AgentResolver {
        let mut resolver =
            AgentResolver::from_config(config, self.transport.clone()).with_registry(self.registry.clone());
        if let Some(containers) = &self.containers {
            resolver = resolver.with_containers(containers.clone());
        }
        if let Some(human_input) = &self.human_input {
            resolver = resolver.with_human_input(human_input.clone());
        }
        resolver
    }

    /// Runs `episode_count` episodes of `config`.
    ///
    /// Without a seed one is drawn from `[0, 2^31 - 1]` and reported back.
    /// Resources are released whether the episodes succeed or not.
    pub async fn run_battles(
        &self,
        config: &RunConfig,
        episode_count: usize,
        seed: Option<u64>,
    ) -> Result<RunReport, BattleError> {
        let seed = seed.unwrap_or_else(random_master_seed);
        info!(
            "Running {} episode(s) of {} with seed {}",
            episode_count, config.config_id, seed
        );

        let resolver = self.resolver(config);
        let telemetry = TelemetrySink::from_config(config, self.transport.clone());

        let mut run = Run::open(config, &resolver, self.factory.as_ref()).await?;
        run.seed(seed);

        let played = self.play_all(&mut run, config, episode_count, &telemetry).await;
        run.close().await;

        let episodes = played?;
        Ok(RunReport {
            seed,
            episodes,
            dropped_telemetry: telemetry.dropped(),
        })
    }

    async fn play_all(
        &self,
        run: &mut Run,
        config: &RunConfig,
        episode_count: usize,
        telemetry: &TelemetrySink,
    ) -> Result<Vec<EpisodeResult>, BattleError> {
        let mut episodes = Vec::with_capacity(episode_count);

        for index in 1..=episode_count {
            let plan = EpisodePlan::for_episode(config, index);
            let started = self.ctx.now();

            let outcome = run
                .play_episode(self.ctx.as_ref(), telemetry, self.recorder.as_deref(), plan)
                .await
                .map_err(|e| {
                    error!("Episode {} failed during {}: {}", index, e.phase(), e);
                    e
                })?;

            let duration = self.ctx.now().saturating_sub(started);
            info!(
                "Episode {} finished: {} after {} ticks in {:?}",
                index, outcome.info.result, outcome.ticks, duration
            );
            episodes.push(EpisodeResult {
                index,
                result: outcome.info.result,
                info: outcome.info,
                rewards: outcome.rewards,
                duration,
                ticks: outcome.ticks,
                recording_error: outcome.recording_error,
            });
        }

        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CorridorFactory, MemoryRecorder, RecordingTransport};
    use arena_env::SimContext;
    use arena_env::Action;
    use std::sync::atomic::Ordering;

    fn manager(transport: Arc<RecordingTransport>, factory: Arc<CorridorFactory>) -> RunManager<SimContext> {
        RunManager::new(SimContext::shared(), transport, factory)
    }

    #[tokio::test]
    async fn test_episode_indices_and_durations() {
        let transport = Arc::new(RecordingTransport::default());
        let factory = Arc::new(CorridorFactory::new(4, 3));
        let recorder = Arc::new(MemoryRecorder::default());
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let config = RunConfig::new("Corridor-v0", ["test::agents.SimpleAgent"; 4]).with_record_json_dir(&dir);

        let report = manager(transport.clone(), factory.clone())
            .with_recorder(recorder.clone())
            .run_battles(&config, 3, Some(7))
            .await
            .unwrap();

        assert_eq!(report.seed, 7);
        let indices: Vec<usize> = report.episodes.iter().map(|e| e.index).collect();
        assert_eq!(indices, [1, 2, 3]);
        for episode in &report.episodes {
            assert_eq!(episode.ticks, 3);
            assert_eq!(episode.result, GameResult::Win);
            // Four recorded frames paced at 10 fps
            assert_eq!(episode.duration, Duration::from_millis(400));
        }

        let merged = recorder.merged.lock().unwrap();
        let dirs: Vec<_> = merged.iter().map(|(d, _, _)| d.clone()).collect();
        assert_eq!(dirs, [dir.join("1"), dir.join("2"), dir.join("3")]);
        assert_eq!(transport.payloads("final_info").len(), 3);
        assert!(*factory.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_same_seed_same_trajectory() {
        let config = RunConfig::new("Corridor-v0", ["random::x"; 4]);

        let mut trajectories = Vec::new();
        let mut actions = Vec::new();
        for seed in [42, 42, 43] {
            let transport = Arc::new(RecordingTransport::default());
            let factory = Arc::new(CorridorFactory::new(4, 5));
            manager(transport.clone(), factory.clone())
                .run_battles(&config, 1, Some(seed))
                .await
                .unwrap();
            trajectories.push(transport.payloads("step"));
            actions.push(factory.actions.lock().unwrap().clone());
        }

        assert_eq!(trajectories[0], trajectories[1]);
        assert_eq!(actions[0], actions[1]);
        assert_ne!(trajectories[0], trajectories[2]);
        assert_ne!(actions[0], actions[2]);
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_before_any_request() {
        let transport = Arc::new(RecordingTransport::default());
        let factory = Arc::new(CorridorFactory::new(2, 3));
        let config = RunConfig::new("Corridor-v0", ["http::agent:8080", "bogus::x"]);

        let err = manager(transport.clone(), factory.clone())
            .run_battles(&config, 1, None)
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Phase::Resolution);
        assert!(transport.posts.lock().unwrap().is_empty());
        assert!(!*factory.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_observer_releases_resources() {
        let transport = Arc::new(RecordingTransport::unreachable());
        let factory = Arc::new(CorridorFactory::new(2, 3));
        let config = RunConfig::new("Corridor-v0", ["simple::x"; 2]);

        let err = manager(transport, factory.clone())
            .run_battles(&config, 2, Some(1))
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Phase::InitHandshake);
        assert!(factory.actions.lock().unwrap().is_empty());
        assert!(*factory.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_agent_count_must_match() {
        let transport = Arc::new(RecordingTransport::default());
        let factory = Arc::new(CorridorFactory::new(4, 3));
        let config = RunConfig::new("Corridor-v0", ["simple::x"; 2]);

        let err = manager(transport, factory.clone())
            .run_battles(&config, 1, None)
            .await
            .unwrap_err();

        assert!(matches!(err, BattleError::InvalidConfig(_)));
        assert!(*factory.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_remote_agent_lifecycle() {
        let transport = Arc::new(RecordingTransport::default());
        let factory = Arc::new(CorridorFactory::new(2, 2));
        let config = RunConfig::new("Corridor-v0", ["http::agent:8080", "static::x"]);

        manager(transport.clone(), factory.clone())
            .run_battles(&config, 1, Some(3))
            .await
            .unwrap();

        let agent_paths: Vec<String> = transport
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with("http://agent:8080"))
            .map(|(url, _)| url.trim_start_matches("http://agent:8080/").to_string())
            .collect();
        assert_eq!(agent_paths, ["init_agent", "request", "request", "episode_end", "shutdown"]);
        assert_eq!(factory.actions.lock().unwrap()[0], [Action::Stop, Action::Stop]);
    }

    #[tokio::test]
    async fn test_failed_init_is_resolution_error() {
        let transport = Arc::new(RecordingTransport::rejecting("/init_agent"));
        let factory = Arc::new(CorridorFactory::new(1, 2));
        let config = RunConfig::new("Corridor-v0", ["http::agent:8080"]);

        let err = manager(transport.clone(), factory.clone())
            .run_battles(&config, 1, None)
            .await
            .unwrap_err();

        assert!(matches!(err, BattleError::AgentInit { .. }));
        assert_eq!(err.phase(), Phase::Resolution);
        assert!(transport.paths().contains(&"shutdown".to_string()));
        assert!(*factory.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_config_id() {
        let transport = Arc::new(RecordingTransport::default());
        let factory = Arc::new(CorridorFactory::new(1, 2));
        let config = RunConfig::new("Nowhere-v9", ["static::x"]);

        let err = manager(transport, factory)
            .run_battles(&config, 1, None)
            .await
            .unwrap_err();

        assert!(matches!(err, BattleError::SimulationStep { phase: Phase::Resolution, .. }));
    }

    #[tokio::test]
    async fn test_drop_without_close_stops_containers() {
        let transport = Arc::new(RecordingTransport::default());
        let containers = Arc::new(crate::testing::FakeContainers::default());
        let resolver = AgentResolver::new(transport).with_containers(containers.clone());
        let factory = CorridorFactory::new(1, 2);
        let config = RunConfig::new("Corridor-v0", ["docker::arena/agent"]);

        let run = Run::open(&config, &resolver, &factory).await.unwrap();
        drop(run);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        assert!(*factory.closed.lock().unwrap());
        assert_eq!(containers.stopped.load(Ordering::SeqCst), 1);
    }
}
