//! Battle Loop - one episode from reset to final info.
//!
//! # State Machine
//!
//! ```text
//!   Init ──────────► Running ──────────► Finalizing ──────────► Done
//!    │ reset          │ per tick:          │ final_info
//!    │ envinfo        │  render / record   │ full observability notify
//!    │ notify humans  │  notify humans     │ last frame, merge recording
//!    │ initial_obs    │  join all actions  │ episode_end per agent
//!    │                │  step, send step   │
//! ```
//!
//! The loop owns nothing: the simulation, the handles, the sink and the
//! recorder are lent by the `Run` for the duration of one episode.

use arena_env::{
    Action, BattleContext, EpisodeInfo, Observation, Recorder, RenderMode, RenderOptions, Simulation,
    StepSnapshot,
};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agents::AgentHandle;
use crate::config::RunConfig;
use crate::error::{BattleError, Phase};
use crate::telemetry::{DeliveryPolicy, TelemetryPath, TelemetrySink};

/// Pause after the final rendered frame when sleeping is enabled.
pub const FINAL_FRAME_PAUSE: Duration = Duration::from_secs(5);

/// Lifecycle state of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleState {
    Init,
    Running,
    Finalizing,
    Done,
}

/// Per-episode settings derived from the run configuration.
#[derive(Debug, Clone)]
pub struct EpisodePlan {
    /// Simulation configuration id
    pub config_id: String,

    /// Agent descriptors as given, for the merged recording
    pub descriptors: Vec<String>,

    /// Render every tick
    pub render: bool,

    /// Render target
    pub render_mode: RenderMode,

    /// Sleep `1/fps` after each rendered frame and pause after the last one
    pub do_sleep: bool,

    /// Rendered frames of this episode
    pub record_pngs_dir: Option<PathBuf>,

    /// JSON frames of this episode
    pub record_json_dir: Option<PathBuf>,

    /// Policy of `envinfo` / `initial_obs`
    pub handshake_policy: DeliveryPolicy,

    /// Policy of `step` / `final_info`
    pub step_policy: DeliveryPolicy,
}

impl EpisodePlan {
    /// Settings of episode `index` (1-based); recording paths get an
    /// `<index>` subdirectory.
    pub fn for_episode(config: &RunConfig, index: usize) -> Self {
        let subdir = index.to_string();
        Self {
            config_id: config.config_id.clone(),
            descriptors: config.agent_descriptors.clone(),
            render: config.render,
            render_mode: config.render_mode,
            do_sleep: config.do_sleep,
            record_pngs_dir: config.record_pngs_dir.as_ref().map(|d| d.join(&subdir)),
            record_json_dir: config.record_json_dir.as_ref().map(|d| d.join(&subdir)),
            handshake_policy: config.handshake_policy,
            step_policy: config.step_policy,
        }
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            mode: self.render_mode,
            frames_dir: self.record_pngs_dir.clone(),
            do_sleep: self.do_sleep,
        }
    }
}

/// What a finished episode reports.
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    /// Final step info
    pub info: EpisodeInfo,

    /// Final reward of every agent
    pub rewards: Vec<i32>,

    /// Ticks executed
    pub ticks: u64,

    /// First recorder failure, after which recording stopped
    pub recording_error: Option<String>,
}

/// Drives one episode.
pub struct BattleLoop<'a, Ctx: BattleContext> {
    ctx: &'a Ctx,
    sim: &'a mut dyn Simulation,
    agents: &'a [Box<dyn AgentHandle>],
    telemetry: &'a TelemetrySink,
    recorder: Option<&'a dyn Recorder>,
    plan: EpisodePlan,
    state: BattleState,
    recording_error: Option<String>,
}

impl<'a, Ctx: BattleContext> BattleLoop<'a, Ctx> {
    pub fn new(
        ctx: &'a Ctx,
        sim: &'a mut dyn Simulation,
        agents: &'a [Box<dyn AgentHandle>],
        telemetry: &'a TelemetrySink,
        recorder: Option<&'a dyn Recorder>,
        plan: EpisodePlan,
    ) -> Self {
        Self {
            ctx,
            sim,
            agents,
            telemetry,
            recorder,
            plan,
            state: BattleState::Init,
            recording_error: None,
        }
    }

    /// Runs the episode to completion.
    ///
    /// # Errors
    /// * `Telemetry` - a delivery failed under a `Fatal` policy
    /// * `SimulationStep` - reset or step failed
    pub async fn run(mut self) -> Result<EpisodeOutcome, BattleError> {
        let (observations, initial) = self.init().await?;

        self.transition(BattleState::Running);
        let last = self.running(observations, initial).await?;

        self.transition(BattleState::Finalizing);
        self.finalize(&last).await?;

        self.transition(BattleState::Done);
        Ok(EpisodeOutcome {
            info: last.info,
            rewards: last.rewards,
            ticks: last.step_count,
            recording_error: self.recording_error,
        })
    }

    fn transition(&mut self, next: BattleState) {
        debug!("Battle {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn init(&mut self) -> Result<(Vec<Observation>, StepSnapshot), BattleError> {
        self.prepare_directories();

        let observations = self.sim.reset().map_err(|source| BattleError::SimulationStep {
            phase: Phase::InitHandshake,
            source,
        })?;

        let env_info = self.sim.env_info();
        self.deliver(TelemetryPath::EnvInfo, &env_info, self.plan.handshake_policy, Phase::InitHandshake)
            .await?;

        self.notify_humans(&observations, true).await;

        let initial = StepSnapshot {
            step_count: 0,
            state: self.sim.state_snapshot(),
            observations: observations.clone(),
            rewards: vec![0; self.agents.len()],
            done: false,
            info: EpisodeInfo::incomplete(0),
        };
        self.deliver(
            TelemetryPath::InitialObs,
            &initial.state,
            self.plan.handshake_policy,
            Phase::InitHandshake,
        )
        .await?;

        info!("Episode started with {} agents on {}", self.agents.len(), self.plan.config_id);
        Ok((observations, initial))
    }

    async fn running(
        &mut self,
        mut observations: Vec<Observation>,
        mut last: StepSnapshot,
    ) -> Result<StepSnapshot, BattleError> {
        loop {
            let tick = last.step_count;

            self.present_frame(&last).await;
            self.notify_humans(&observations, true).await;

            let actions = self.gather_actions(&observations).await;
            debug!("Tick {} actions {:?}", tick, actions);

            let outcome = self.sim.step(&actions).map_err(|source| BattleError::SimulationStep {
                phase: Phase::Tick(tick),
                source,
            })?;

            last = StepSnapshot {
                step_count: tick + 1,
                state: self.sim.state_snapshot(),
                observations: outcome.observations,
                rewards: outcome.rewards,
                done: outcome.done,
                info: outcome.info,
            };
            self.deliver(
                TelemetryPath::Step,
                &last.with_done_flag(),
                self.plan.step_policy,
                Phase::Tick(tick),
            )
            .await?;

            if last.done {
                info!("Episode done after {} ticks: {}", last.step_count, last.info.result);
                return Ok(last);
            }
            observations = last.observations.clone();
        }
    }

    async fn finalize(&mut self, last: &StepSnapshot) -> Result<(), BattleError> {
        self.deliver(
            TelemetryPath::FinalInfo,
            &last.info.to_json(),
            self.plan.step_policy,
            Phase::Finalization,
        )
        .await?;

        // Humans see the whole board once the episode is over
        let partial = self.sim.is_partially_observable();
        self.sim.set_partially_observable(false);
        let full = self.sim.observations();
        self.notify_humans(&full, false).await;
        self.sim.set_partially_observable(partial);

        if self.plan.render {
            self.render();
            if self.plan.do_sleep {
                self.ctx.sleep(FINAL_FRAME_PAUSE).await;
            }
            self.sim.close_render();
        }
        if self.plan.record_json_dir.is_some() {
            self.persist(last);
            if !self.plan.render {
                self.pace().await;
            }
            self.merge(&last.info);
        }

        let farewells = self
            .agents
            .iter()
            .enumerate()
            .map(|(i, agent)| agent.episode_end(last.rewards.get(i).copied().unwrap_or(0)));
        join_all(farewells).await;
        Ok(())
    }

    /// Renders and/or records the frame before a tick, then paces once.
    async fn present_frame(&mut self, snapshot: &StepSnapshot) {
        if self.plan.render {
            self.render();
        }
        if self.plan.record_json_dir.is_some() {
            self.persist(snapshot);
        }
        let paced = if self.plan.render {
            self.plan.do_sleep
        } else {
            self.plan.record_json_dir.is_some()
        };
        if paced {
            self.pace().await;
        }
    }

    fn render(&mut self) {
        let options = self.plan.render_options();
        if let Err(e) = self.sim.render(&options) {
            warn!("Render failed: {}", e);
        }
    }

    async fn pace(&self) {
        let fps = self.sim.render_fps();
        if fps > 0 {
            self.ctx.sleep(Duration::from_secs_f64(1.0 / fps as f64)).await;
        }
    }

    async fn notify_humans(&self, observations: &[Observation], waiting: bool) {
        for (i, agent) in self.agents.iter().enumerate() {
            if !agent.kind().is_human() {
                continue;
            }
            let Some(obs) = observations.get(i) else { continue };
            if let Err(e) = agent.notify_obs(obs, waiting).await {
                warn!("Agent {} missed an observation: {}", agent.agent_id(), e);
            }
        }
    }

    /// Polls every agent concurrently; failures become `Stop`.
    async fn gather_actions(&self, observations: &[Observation]) -> Vec<Action> {
        let none = Value::Null;
        let requests = self.agents.iter().enumerate().map(|(i, agent)| {
            let obs = observations.get(i).unwrap_or(&none);
            async move {
                match agent.act(obs).await {
                    Ok(action) => action,
                    Err(e) => {
                        warn!("Agent {} failed to act, using {:?}: {}", agent.agent_id(), Action::Stop, e);
                        Action::Stop
                    }
                }
            }
        });
        join_all(requests).await
    }

    async fn deliver(
        &self,
        path: TelemetryPath,
        payload: &Value,
        policy: DeliveryPolicy,
        phase: Phase,
    ) -> Result<(), BattleError> {
        self.telemetry
            .deliver(path, payload, policy)
            .await
            .map_err(|source| BattleError::Telemetry { phase, source })
    }

    fn prepare_directories(&mut self) {
        let dirs = [&self.plan.record_pngs_dir, &self.plan.record_json_dir];
        for dir in dirs.into_iter().flatten() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                let message = format!("cannot create {}: {}", dir.display(), e);
                warn!("Recording disabled: {}", message);
                self.recording_error.get_or_insert(message);
            }
        }
    }

    fn persist(&mut self, snapshot: &StepSnapshot) {
        if self.recording_error.is_some() {
            return;
        }
        let (Some(recorder), Some(dir)) = (self.recorder, self.plan.record_json_dir.as_ref()) else {
            return;
        };
        if let Err(e) = recorder.persist_frame(dir, snapshot) {
            warn!("Recording disabled for this episode: {}", e);
            self.recording_error = Some(e.to_string());
        }
    }

    fn merge(&mut self, info: &EpisodeInfo) {
        if self.recording_error.is_some() {
            return;
        }
        let (Some(recorder), Some(dir)) = (self.recorder, self.plan.record_json_dir.as_ref()) else {
            return;
        };
        let finished_at = DateTime::<Utc>::from(self.ctx.system_time()).to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Err(e) = recorder.merge_episode(dir, &self.plan.descriptors, &finished_at, &self.plan.config_id, info) {
            warn!("Could not merge episode recording: {}", e);
            self.recording_error = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ScriptedHandle, StaticStrategy};
    use crate::descriptor::AgentDescriptor;
    use crate::error::TelemetryError;
    use crate::testing::{CorridorSim, MemoryRecorder, RecordingTransport};
    use arena_env::{AgentId, GameResult, SimContext};
    use std::sync::Arc;

    fn static_agents(n: usize) -> Vec<Box<dyn AgentHandle>> {
        (0..n)
            .map(|i| {
                let descriptor = AgentDescriptor::parse("static::x", AgentId(i)).unwrap();
                Box::new(ScriptedHandle::new(descriptor, Box::new(StaticStrategy))) as Box<dyn AgentHandle>
            })
            .collect()
    }

    fn sink(transport: Arc<RecordingTransport>) -> TelemetrySink {
        TelemetrySink::new("localhost", 8000, Duration::from_secs(3), transport)
    }

    fn plan(config: &RunConfig) -> EpisodePlan {
        EpisodePlan::for_episode(config, 1)
    }

    #[tokio::test]
    async fn test_telemetry_sequence() {
        let transport = Arc::new(RecordingTransport::default());
        let telemetry = sink(transport.clone());
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(4, 3);
        let agents = static_agents(4);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 4]);

        let outcome = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.ticks, 3);
        assert_eq!(outcome.info.result, GameResult::Win);
        assert_eq!(outcome.rewards, vec![1, -1, -1, -1]);
        assert_eq!(
            transport.paths(),
            ["envinfo", "initial_obs", "step", "step", "step", "final_info"]
        );

        let steps = transport.payloads("step");
        assert_eq!(steps[0]["done"], false);
        assert_eq!(steps[2]["done"], true);
        assert_eq!(transport.payloads("final_info")[0]["result"], "Result.Win");
        assert_eq!(sim.actions.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_observer_aborts_before_first_tick() {
        let transport = Arc::new(RecordingTransport::unreachable());
        let telemetry = sink(transport);
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 3);
        let agents = static_agents(2);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]);

        let err = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Phase::InitHandshake);
        assert!(matches!(
            err,
            BattleError::Telemetry {
                source: TelemetryError::DeliveryTimeout { .. },
                ..
            }
        ));
        assert!(sim.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_step_policy() {
        let ctx = SimContext::new();
        let agents = static_agents(2);

        // Default: a rejected step is logged and the episode goes on
        let transport = Arc::new(RecordingTransport::rejecting("/step"));
        let telemetry = sink(transport.clone());
        let mut sim = CorridorSim::new(2, 4);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]);
        let outcome = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.ticks, 4);
        assert_eq!(telemetry.dropped(), 4);
        assert_eq!(transport.paths().last().map(String::as_str), Some("final_info"));

        // Fatal: the first rejected step ends the episode
        let transport = Arc::new(RecordingTransport::rejecting("/step"));
        let telemetry = sink(transport.clone());
        let mut sim = CorridorSim::new(2, 4);
        let config = config.with_step_policy(DeliveryPolicy::Fatal);
        let err = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Phase::Tick(0));
        // The step is committed before the send
        assert_eq!(sim.actions.lock().unwrap().len(), 1);
        assert_eq!(transport.paths(), ["envinfo", "initial_obs", "step"]);
    }

    #[tokio::test]
    async fn test_simulation_failure_names_tick() {
        let transport = Arc::new(RecordingTransport::default());
        let telemetry = sink(transport);
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 10);
        sim.fail_at = Some(2);
        let agents = static_agents(2);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]);

        let err = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, BattleError::SimulationStep { phase: Phase::Tick(2), .. }));
        assert_eq!(err.to_string(), "tick 2 failed: Simulation error: board exploded");
    }

    #[tokio::test]
    async fn test_json_recording_and_pacing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let transport = Arc::new(RecordingTransport::default());
        let telemetry = sink(transport);
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 3);
        let agents = static_agents(2);
        let recorder = MemoryRecorder::default();
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]).with_record_json_dir(&dir);

        let outcome = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, Some(&recorder), plan(&config))
            .run()
            .await
            .unwrap();

        assert!(outcome.recording_error.is_none());
        let frames = recorder.frames.lock().unwrap();
        let steps: Vec<u64> = frames.iter().map(|(_, step)| *step).collect();
        assert_eq!(steps, [0, 1, 2, 3]);
        assert!(frames.iter().all(|(d, _)| *d == dir.join("1")));

        let merged = recorder.merged.lock().unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1, vec!["static::x".to_string(); 2]);
        assert_eq!(merged[0].2, "Result.Win");

        // One 1/fps pause per recorded frame at 10 fps
        assert_eq!(ctx.now(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_recorder_failure_disables_recording() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let telemetry = sink(transport);
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 3);
        let agents = static_agents(2);
        let recorder = MemoryRecorder {
            fail: true,
            ..Default::default()
        };
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]).with_record_json_dir(dir.path());

        let outcome = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, Some(&recorder), plan(&config))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.ticks, 3);
        assert!(outcome.recording_error.unwrap().contains("disk full"));
        assert!(recorder.merged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_final_observations_are_full() {
        let transport = Arc::new(RecordingTransport::default());
        let telemetry = sink(transport);
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 2);
        let log = sim.observability_log.clone();
        let agents = static_agents(2);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]).with_render(RenderMode::Human);

        BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap();

        assert_eq!(log.lock().unwrap().last(), Some(&false));
        assert!(sim.is_partially_observable());
    }

    #[tokio::test]
    async fn test_render_pacing() {
        let transport = Arc::new(RecordingTransport::default());
        let telemetry = sink(transport);
        let agents = static_agents(2);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]).with_render(RenderMode::Human);

        // One 1/fps sleep per rendered tick, then the final pause
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 3);
        BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap();
        assert_eq!(ctx.now(), Duration::from_millis(300) + FINAL_FRAME_PAUSE);
        assert_eq!(ctx.sleep_count(), 4);

        // Without do_sleep rendering runs at full speed
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 3);
        let config = config.with_sleep(false);
        BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap();
        assert_eq!(ctx.now(), Duration::ZERO);
        assert_eq!(ctx.sleep_count(), 0);
    }

    #[tokio::test]
    async fn test_final_info_policy() {
        let ctx = SimContext::new();
        let agents = static_agents(2);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2]);

        // Default: the episode still returns its result
        let transport = Arc::new(RecordingTransport::rejecting("/final_info"));
        let telemetry = sink(transport.clone());
        let mut sim = CorridorSim::new(2, 3);
        let dir = tempfile::tempdir().unwrap();
        let recorder = MemoryRecorder::default();
        let recorded = config.clone().with_record_json_dir(dir.path());
        let outcome = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, Some(&recorder), plan(&recorded))
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.info.result, GameResult::Win);
        assert_eq!(telemetry.dropped(), 1);
        assert_eq!(recorder.merged.lock().unwrap().len(), 1);

        // Fatal: finalization stops at the failed send
        let transport = Arc::new(RecordingTransport::rejecting("/final_info"));
        let telemetry = sink(transport.clone());
        let mut sim = CorridorSim::new(2, 3);
        let log = sim.observability_log.clone();
        let recorder = MemoryRecorder::default();
        let fatal = recorded.with_step_policy(DeliveryPolicy::Fatal);
        let err = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, Some(&recorder), plan(&fatal))
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Phase::Finalization);
        assert!(err.to_string().starts_with("finalization failed"));
        assert_eq!(transport.paths().last().map(String::as_str), Some("final_info"));
        // No full-observability pass and no merged record
        assert_eq!(log.lock().unwrap().last(), Some(&true));
        assert!(recorder.merged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lenient_handshake_survives_unreachable_observer() {
        let telemetry = sink(Arc::new(RecordingTransport::unreachable()));
        let ctx = SimContext::new();
        let mut sim = CorridorSim::new(2, 3);
        let agents = static_agents(2);
        let config = RunConfig::new("Corridor-v0", ["static::x"; 2])
            .with_handshake_policy(DeliveryPolicy::LogAndContinue);

        let outcome = BattleLoop::new(&ctx, &mut sim, &agents, &telemetry, None, plan(&config))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.ticks, 3);
        // envinfo, initial_obs, three steps and final_info
        assert_eq!(telemetry.dropped(), 6);
    }

    #[test]
    fn test_episode_subdirectories() {
        let config = RunConfig::new("Corridor-v0", ["static::x"])
            .with_record_json_dir("/tmp/json")
            .with_record_pngs_dir("/tmp/frames");

        let plan = EpisodePlan::for_episode(&config, 3);
        assert_eq!(plan.record_json_dir, Some(PathBuf::from("/tmp/json/3")));
        assert_eq!(plan.record_pngs_dir, Some(PathBuf::from("/tmp/frames/3")));
    }
}
