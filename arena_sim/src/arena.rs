//! Grid arena - the reference simulation.
//!
//! Agents start in the board corners, walk through passages and eliminate
//! each other with a strike on the four neighbouring cells. A strike also
//! clears neighbouring wood. The last agent standing wins; running out of
//! steps, or everyone falling on the same tick, is a tie.

use arena_env::{
    Action, AgentId, EnvError, EpisodeInfo, GameResult, Observation, RenderMode, RenderOptions, Simulation,
    SimulationFactory, StepOutcome,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};

/// Board cell values as they appear in observations.
pub mod cell {
    pub const PASSAGE: u8 = 0;
    pub const WOOD: u8 = 1;
    /// Outside the agent's view
    pub const FOG: u8 = 5;
}

/// Static parameters of an arena configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArenaConfig {
    /// Configuration id (e.g. `ArenaFFA-v0`)
    pub id: &'static str,

    /// Game type announced to remote agents
    pub game_type: &'static str,

    /// Board edge length
    pub board_size: usize,

    /// Number of agent slots
    pub num_agents: usize,

    /// Step limit; reaching it is a tie
    pub max_steps: u64,

    /// Chebyshev radius of an agent's view
    pub view_radius: usize,

    /// Whether observations start out limited to the view radius
    pub partially_observable: bool,

    /// Probability that a free cell holds wood
    pub wood_density: f64,

    /// Frames per second of recordings
    pub render_fps: u32,
}

impl ArenaConfig {
    /// Every registered configuration.
    pub const ALL: [ArenaConfig; 3] = [
        ArenaConfig {
            id: "ArenaFFA-v0",
            game_type: "FFA",
            board_size: 11,
            num_agents: 4,
            max_steps: 800,
            view_radius: 4,
            partially_observable: false,
            wood_density: 0.3,
            render_fps: 15,
        },
        ArenaConfig {
            id: "ArenaFFASmall-v0",
            game_type: "FFA",
            board_size: 7,
            num_agents: 4,
            max_steps: 300,
            view_radius: 2,
            partially_observable: true,
            wood_density: 0.2,
            render_fps: 15,
        },
        ArenaConfig {
            id: "ArenaDuel-v0",
            game_type: "Duel",
            board_size: 7,
            num_agents: 2,
            max_steps: 300,
            view_radius: 3,
            partially_observable: false,
            wood_density: 0.2,
            render_fps: 15,
        },
    ];

    /// Looks a configuration up by id.
    pub fn by_id(id: &str) -> Option<Self> {
        Self::ALL.iter().find(|c| c.id == id).cloned()
    }
}

/// One agent on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaAgent {
    pub agent_id: AgentId,
    pub position: (usize, usize),
    pub alive: bool,
}

/// Full board state, also the format of a saved game state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaState {
    #[serde(default)]
    pub step_count: u64,
    pub board: Vec<Vec<u8>>,
    pub agents: Vec<ArenaAgent>,
}

impl ArenaState {
    /// Reads a saved state from a JSON file.
    pub fn load(path: &Path) -> Result<Self, EnvError> {
        let text = std::fs::read_to_string(path).map_err(|e| EnvError::storage(path, e))?;
        let state: ArenaState =
            serde_json::from_str(&text).map_err(|e| EnvError::SerializationError(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    fn validate(&self) -> Result<(), EnvError> {
        let size = self.board.len();
        if size == 0 || self.board.iter().any(|row| row.len() != size) {
            return Err(EnvError::simulation("game state board must be square and non-empty"));
        }
        if let Some(agent) = self
            .agents
            .iter()
            .find(|a| a.position.0 >= size || a.position.1 >= size)
        {
            return Err(EnvError::simulation(format!(
                "agent {} placed outside the board",
                agent.agent_id
            )));
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.board.len()
    }

    fn alive(&self) -> impl Iterator<Item = &ArenaAgent> {
        self.agents.iter().filter(|a| a.alive)
    }
}

/// The grid arena simulation.
pub struct ArenaSim {
    config: ArenaConfig,
    rng: ChaCha8Rng,
    state: ArenaState,
    partially_observable: bool,
    /// Layout every reset starts from, when loaded from a file
    initial: Option<ArenaState>,
    render_open: bool,
}

impl ArenaSim {
    /// Creates an arena; the board is generated on `reset`.
    pub fn new(config: ArenaConfig) -> Self {
        let state = ArenaState {
            step_count: 0,
            board: vec![vec![cell::PASSAGE; config.board_size]; config.board_size],
            agents: Vec::new(),
        };
        Self {
            partially_observable: config.partially_observable,
            rng: ChaCha8Rng::seed_from_u64(0),
            config,
            state,
            initial: None,
            render_open: false,
        }
    }

    /// Starts every episode from a saved layout instead of a generated one.
    pub fn with_initial_state(mut self, state: ArenaState) -> Result<Self, EnvError> {
        if state.agents.len() != self.config.num_agents {
            return Err(EnvError::simulation(format!(
                "game state has {} agents, {} expects {}",
                state.agents.len(),
                self.config.id,
                self.config.num_agents
            )));
        }
        self.initial = Some(state);
        Ok(self)
    }

    /// Current state.
    pub fn state(&self) -> &ArenaState {
        &self.state
    }

    fn corners(size: usize) -> [(usize, usize); 4] {
        let far = size - 1;
        [(0, 0), (0, far), (far, far), (far, 0)]
    }

    fn starting_positions(&self) -> Vec<(usize, usize)> {
        let corners = Self::corners(self.config.board_size);
        match self.config.num_agents {
            // Opposite corners
            2 => vec![corners[0], corners[2]],
            n => corners.iter().cycle().take(n).copied().collect(),
        }
    }

    fn generate(&mut self) -> ArenaState {
        let size = self.config.board_size;
        let positions = self.starting_positions();

        let mut board = vec![vec![cell::PASSAGE; size]; size];
        for (r, row) in board.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                // Keep every start cell and its neighbours walkable
                let near_start = positions.iter().any(|&(pr, pc)| pr.abs_diff(r) + pc.abs_diff(c) <= 1);
                if !near_start && self.rng.gen_bool(self.config.wood_density) {
                    *value = cell::WOOD;
                }
            }
        }

        let agents = positions
            .into_iter()
            .enumerate()
            .map(|(i, position)| ArenaAgent {
                agent_id: AgentId(i),
                position,
                alive: true,
            })
            .collect();

        ArenaState {
            step_count: 0,
            board,
            agents,
        }
    }

    fn offset(&self, (r, c): (usize, usize), action: Action) -> Option<(usize, usize)> {
        let (dr, dc) = action.delta();
        let r = r as i64 + dr as i64;
        let c = c as i64 + dc as i64;
        let size = self.state.size() as i64;
        if !(0..size).contains(&r) || !(0..size).contains(&c) {
            return None;
        }
        Some((r as usize, c as usize))
    }

    fn neighbours(&self, pos: (usize, usize)) -> Vec<(usize, usize)> {
        [Action::Up, Action::Down, Action::Left, Action::Right]
            .into_iter()
            .filter_map(|a| self.offset(pos, a))
            .collect()
    }

    fn visible(&self, from: (usize, usize), to: (usize, usize)) -> bool {
        !self.partially_observable
            || (from.0.abs_diff(to.0) <= self.config.view_radius && from.1.abs_diff(to.1) <= self.config.view_radius)
    }

    fn observation(&self, agent: &ArenaAgent) -> Observation {
        let board: Vec<Vec<u8>> = self
            .state
            .board
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(|(c, v)| if self.visible(agent.position, (r, c)) { *v } else { cell::FOG })
                    .collect()
            })
            .collect();

        let enemies: Vec<Value> = self
            .state
            .alive()
            .filter(|other| other.agent_id != agent.agent_id && self.visible(agent.position, other.position))
            .map(|other| json!({ "id": other.agent_id, "position": [other.position.0, other.position.1] }))
            .collect();

        json!({
            "agent_id": agent.agent_id,
            "alive": agent.alive,
            "position": [agent.position.0, agent.position.1],
            "board": board,
            "enemies": enemies,
            "step_count": self.state.step_count,
            "game_type": self.config.game_type,
        })
    }

    fn rewards_and_info(&self) -> (Vec<i32>, bool, EpisodeInfo) {
        let alive: Vec<AgentId> = self.state.alive().map(|a| a.agent_id).collect();
        let step_count = self.state.step_count;

        let (result, winners, done) = if alive.len() == 1 {
            (GameResult::Win, alive.clone(), true)
        } else if alive.is_empty() || step_count >= self.config.max_steps {
            (GameResult::Tie, Vec::new(), true)
        } else {
            (GameResult::Incomplete, Vec::new(), false)
        };

        let rewards = self
            .state
            .agents
            .iter()
            .map(|a| match result {
                GameResult::Win if winners.contains(&a.agent_id) => 1,
                GameResult::Incomplete if a.alive => 0,
                _ => -1,
            })
            .collect();

        let info = EpisodeInfo {
            result,
            winners,
            step_count,
        };
        (rewards, done, info)
    }

    /// ASCII picture of the board: `.` passage, `#` wood, digits for agents.
    pub fn ascii_frame(&self) -> String {
        let mut rows: Vec<Vec<char>> = self
            .state
            .board
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| if *v == cell::WOOD { '#' } else { '.' })
                    .collect()
            })
            .collect();
        for agent in self.state.alive() {
            let glyph = char::from_digit(agent.agent_id.index() as u32 % 10, 10).unwrap_or('?');
            rows[agent.position.0][agent.position.1] = glyph;
        }

        let mut frame = format!("step {}\n", self.state.step_count);
        for row in rows {
            frame.extend(row);
            frame.push('\n');
        }
        frame
    }
}

impl Simulation for ArenaSim {
    fn reset(&mut self) -> Result<Vec<Observation>, EnvError> {
        self.state = match &self.initial {
            Some(initial) => initial.clone(),
            None => self.generate(),
        };
        debug!("{} reset at step {}", self.config.id, self.state.step_count);
        Ok(self.observations())
    }

    fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError> {
        if actions.len() != self.state.agents.len() {
            return Err(EnvError::simulation(format!(
                "expected {} actions, got {}",
                self.state.agents.len(),
                actions.len()
            )));
        }

        // Movement: an agent moves when its target is free passage that no
        // other agent occupies or also wants
        let targets: Vec<Option<(usize, usize)>> = self
            .state
            .agents
            .iter()
            .zip(actions)
            .map(|(agent, action)| match action {
                Action::Up | Action::Down | Action::Left | Action::Right if agent.alive => self
                    .offset(agent.position, *action)
                    .filter(|&(r, c)| self.state.board[r][c] == cell::PASSAGE),
                _ => None,
            })
            .collect();
        let moves: Vec<Option<(usize, usize)>> = targets
            .iter()
            .enumerate()
            .map(|(i, target)| {
                target.filter(|t| {
                    let contested = targets.iter().enumerate().any(|(j, o)| j != i && o.as_ref() == Some(t));
                    let occupied = self.state.alive().any(|a| a.position == *t);
                    !contested && !occupied
                })
            })
            .collect();
        for (agent, target) in self.state.agents.iter_mut().zip(moves) {
            if let Some(target) = target {
                agent.position = target;
            }
        }

        // Strikes resolve simultaneously
        let mut struck_cells = Vec::new();
        for (agent, action) in self.state.agents.iter().zip(actions) {
            if agent.alive && *action == Action::Strike {
                struck_cells.extend(self.neighbours(agent.position));
            }
        }
        for &(r, c) in &struck_cells {
            if self.state.board[r][c] == cell::WOOD {
                self.state.board[r][c] = cell::PASSAGE;
            }
        }
        for agent in self.state.agents.iter_mut() {
            if agent.alive && struck_cells.contains(&agent.position) {
                info!("Agent {} eliminated at {:?}", agent.agent_id, agent.position);
                agent.alive = false;
            }
        }

        self.state.step_count += 1;
        let (rewards, done, info) = self.rewards_and_info();
        Ok(StepOutcome {
            observations: self.observations(),
            rewards,
            done,
            info,
        })
    }

    fn render(&mut self, options: &RenderOptions) -> Result<(), EnvError> {
        self.render_open = true;
        let frame = self.ascii_frame();
        if options.mode == RenderMode::Human {
            println!("{}", frame);
        }
        if let Some(dir) = &options.frames_dir {
            let path = dir.join(format!("{:03}.txt", self.state.step_count));
            std::fs::write(&path, frame).map_err(|e| EnvError::storage(path, e))?;
        }
        Ok(())
    }

    fn close_render(&mut self) {
        if self.render_open {
            debug!("{} render surface closed", self.config.id);
            self.render_open = false;
        }
    }

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn observations(&self) -> Vec<Observation> {
        self.state.agents.iter().map(|a| self.observation(a)).collect()
    }

    fn is_partially_observable(&self) -> bool {
        self.partially_observable
    }

    fn set_partially_observable(&mut self, partial: bool) {
        self.partially_observable = partial;
    }

    fn state_snapshot(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    fn env_info(&self) -> Value {
        json!({
            "config": self.config.id,
            "game_type": self.config.game_type,
            "board_size": self.config.board_size,
            "num_agents": self.config.num_agents,
            "max_steps": self.config.max_steps,
            "view_radius": self.config.view_radius,
            "partially_observable": self.partially_observable,
            "action_space": Action::SPACE,
        })
    }

    fn render_fps(&self) -> u32 {
        self.config.render_fps
    }

    fn num_agents(&self) -> usize {
        self.config.num_agents
    }

    fn game_type(&self) -> &str {
        self.config.game_type
    }

    fn close(&mut self) {
        self.close_render();
    }
}

/// Builds arenas by configuration id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArenaFactory;

impl SimulationFactory for ArenaFactory {
    fn make(&self, config_id: &str, game_state_file: Option<&Path>) -> Result<Box<dyn Simulation>, EnvError> {
        let config = ArenaConfig::by_id(config_id).ok_or_else(|| {
            let known: Vec<&str> = ArenaConfig::ALL.iter().map(|c| c.id).collect();
            EnvError::simulation(format!("unknown config '{}', known: {}", config_id, known.join(", ")))
        })?;

        let mut sim = ArenaSim::new(config);
        if let Some(path) = game_state_file {
            info!("Loading game state from {}", path.display());
            sim = sim.with_initial_state(ArenaState::load(path)?)?;
        }
        Ok(Box::new(sim))
    }
}
