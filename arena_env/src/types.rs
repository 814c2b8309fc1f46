//! Common types shared by the orchestrator and its collaborators.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Per-agent observation as produced by the simulation.
///
/// Kept as opaque JSON: the orchestrator forwards it to agents without
/// interpreting it.
pub type Observation = Value;

/// Position of an agent in the battle (0-based ordinal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub usize);

impl AgentId {
    /// Returns the ordinal as an index into per-agent vectors.
    pub fn index(self) -> usize {
        self.0
    }

    /// Returns the ordinal as a seed extension.
    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discrete action space shared by every agent.
///
/// Serialized as its integer index on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Action {
    #[default]
    Stop,
    Up,
    Down,
    Left,
    Right,
    Strike,
}

impl Action {
    /// Number of actions in the space.
    pub const SPACE: usize = 6;

    /// All actions in index order.
    pub const ALL: [Action; Action::SPACE] = [
        Action::Stop,
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Strike,
    ];

    /// Returns the action for an index, if in range.
    pub fn from_index(index: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(index).ok()?).copied()
    }

    /// Returns the wire index of this action.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Returns the (row, col) displacement of a movement action.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Action::Up => (-1, 0),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
            Action::Right => (0, 1),
            Action::Stop | Action::Strike => (0, 0),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action.index()
    }
}

impl TryFrom<u8> for Action {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Action::from_index(value as u64).ok_or_else(|| format!("Action index out of range: {}", value))
    }
}

/// Outcome of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    Win,
    Loss,
    Tie,
    Incomplete,
}

impl GameResult {
    /// Numeric id used in merged recordings.
    pub fn id(self) -> u8 {
        match self {
            GameResult::Win => 0,
            GameResult::Loss => 1,
            GameResult::Tie => 2,
            GameResult::Incomplete => 3,
        }
    }
}

impl std::fmt::Display for GameResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GameResult::Win => "Win",
            GameResult::Loss => "Loss",
            GameResult::Tie => "Tie",
            GameResult::Incomplete => "Incomplete",
        };
        write!(f, "Result.{}", name)
    }
}

/// Structured info returned by every simulation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Current result (`Incomplete` until the episode is done)
    pub result: GameResult,

    /// Surviving agents when the result is a win
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<AgentId>,

    /// Number of ticks executed so far
    pub step_count: u64,
}

impl EpisodeInfo {
    /// Info for an episode that has not finished yet.
    pub fn incomplete(step_count: u64) -> Self {
        Self {
            result: GameResult::Incomplete,
            winners: Vec::new(),
            step_count,
        }
    }

    /// JSON form with the result rendered as its display string.
    pub fn to_json(&self) -> Value {
        json!({
            "result": self.result.to_string(),
            "winners": self.winners,
            "step_count": self.step_count,
        })
    }
}

/// Everything `Simulation::step` returns for one tick.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Next observation for every agent, indexed by `AgentId`
    pub observations: Vec<Observation>,

    /// Reward for every agent, indexed by `AgentId`
    pub rewards: Vec<i32>,

    /// True once the episode is over
    pub done: bool,

    /// Structured step info
    pub info: EpisodeInfo,
}

/// Authoritative state of the simulation after a tick.
///
/// Built once per tick and never mutated; consumers derive their own
/// payloads from it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSnapshot {
    /// Ticks executed when this snapshot was taken
    pub step_count: u64,

    /// JSON state representation (`Simulation::state_snapshot`)
    pub state: Value,

    /// Per-agent observations
    pub observations: Vec<Observation>,

    /// Per-agent rewards of the tick that produced this snapshot
    pub rewards: Vec<i32>,

    /// Episode over flag
    pub done: bool,

    /// Structured step info
    pub info: EpisodeInfo,
}

impl StepSnapshot {
    /// Returns an owned copy of the state with the `done` flag attached.
    pub fn with_done_flag(&self) -> Value {
        let mut payload = self.state.clone();
        if let Value::Object(map) = &mut payload {
            map.insert("done".to_string(), Value::Bool(self.done));
        } else {
            payload = json!({ "state": payload, "done": self.done });
        }
        payload
    }
}

/// Render target requested from the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Human,
    RgbArray,
    RgbPixel,
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RenderMode::Human => "human",
            RenderMode::RgbArray => "rgb_array",
            RenderMode::RgbPixel => "rgb_pixel",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(RenderMode::Human),
            "rgb_array" => Ok(RenderMode::RgbArray),
            "rgb_pixel" => Ok(RenderMode::RgbPixel),
            _ => Err(format!("Unknown render mode: {}", s)),
        }
    }
}

/// Options passed to `Simulation::render`.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Render target
    pub mode: RenderMode,

    /// Directory to write rendered frames to (`None` = do not record)
    pub frames_dir: Option<PathBuf>,

    /// Whether the renderer may pause between frames
    pub do_sleep: bool,
}

/// Reachable address of a remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Scheme and host, e.g. `http://localhost`
    pub server: String,

    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
        }
    }

    /// Returns `server:port` with no trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.server.trim_end_matches('/'), self.port)
    }

    /// Returns the URL of a sub-path on this endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base_url())
    }
}
