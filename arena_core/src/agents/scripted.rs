//! In-process decision functions.

use arena_env::{Action, Observation};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::sync::Mutex;

use super::AgentHandle;
use crate::descriptor::AgentDescriptor;
use crate::error::AgentError;

/// Board cell an agent can walk on.
const PASSAGE: u64 = 0;

/// Board cell cleared by a strike.
const WOOD: u64 = 1;

/// A deterministic (given its seed) decision function.
pub trait Strategy: Send {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Chooses an action for `obs`.
    fn act(&mut self, obs: &Observation) -> Action;

    /// Re-seeds the strategy's random source.
    fn seed(&mut self, _seed: u64) {}

    /// Called when an episode ends.
    fn episode_end(&mut self, _reward: i32) {}
}

/// Never moves.
#[derive(Debug, Default)]
pub struct StaticStrategy;

impl Strategy for StaticStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    fn act(&mut self, _obs: &Observation) -> Action {
        Action::Stop
    }
}

/// Plays every action in index order, restarting each episode.
#[derive(Debug, Default)]
pub struct CycleStrategy {
    next: usize,
}

impl Strategy for CycleStrategy {
    fn name(&self) -> &'static str {
        "cycle"
    }

    fn act(&mut self, _obs: &Observation) -> Action {
        let action = Action::ALL[self.next % Action::SPACE];
        self.next += 1;
        action
    }

    fn episode_end(&mut self, _reward: i32) {
        self.next = 0;
    }
}

/// Uniformly random actions from a seeded ChaCha8 stream.
pub struct RandomStrategy {
    rng: ChaCha8Rng,
}

impl RandomStrategy {
    /// Creates a strategy seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Strategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn act(&mut self, _obs: &Observation) -> Action {
        Action::ALL[self.rng.gen_range(0..Action::SPACE)]
    }

    fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

/// Walks toward the nearest visible enemy and strikes when adjacent.
///
/// Reads `agent_id`, `alive`, `position`, `enemies` and `board` from the
/// observation; anything missing makes it stand still. Without a visible
/// enemy it heads for the board centre.
#[derive(Debug, Default)]
pub struct SimpleStrategy;

impl SimpleStrategy {
    fn cell(obs: &Observation, (row, col): (i64, i64)) -> Option<u64> {
        if row < 0 || col < 0 {
            return None;
        }
        obs.get("board")?.get(row as usize)?.get(col as usize)?.as_u64()
    }

    fn target(obs: &Observation, pos: (i64, i64), own_id: u64) -> Option<((i64, i64), bool)> {
        let nearest = obs
            .get("enemies")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|enemy| {
                let id = enemy.get("id")?.as_u64()?;
                let position = read_position(enemy.get("position")?)?;
                Some((id, position))
            })
            .min_by_key(|(id, p)| (manhattan(pos, *p), *id));

        match nearest {
            // Of two agents two cells apart only the higher id closes in
            Some((id, p)) => Some((p, manhattan(pos, p) == 2 && own_id < id)),
            None => {
                let size = obs.get("board").and_then(Value::as_array)?.len() as i64;
                Some(((size / 2, size / 2), false))
            }
        }
    }
}

impl Strategy for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn act(&mut self, obs: &Observation) -> Action {
        if obs.get("alive").and_then(Value::as_bool) == Some(false) {
            return Action::Stop;
        }
        let Some(pos) = obs.get("position").and_then(read_position) else {
            return Action::Stop;
        };
        let own_id = obs.get("agent_id").and_then(Value::as_u64).unwrap_or(0);
        let Some((target, wait)) = Self::target(obs, pos, own_id) else {
            return Action::Stop;
        };

        let distance = manhattan(pos, target);
        let enemy_visible = obs
            .get("enemies")
            .and_then(Value::as_array)
            .is_some_and(|e| !e.is_empty());
        if enemy_visible && distance == 1 {
            return Action::Strike;
        }
        if distance == 0 || wait {
            return Action::Stop;
        }

        let (dr, dc) = (target.0 - pos.0, target.1 - pos.1);
        let vertical = if dr < 0 { Action::Up } else { Action::Down };
        let horizontal = if dc < 0 { Action::Left } else { Action::Right };
        let moves = if dr.abs() >= dc.abs() {
            [(vertical, dr != 0), (horizontal, dc != 0)]
        } else {
            [(horizontal, dc != 0), (vertical, dr != 0)]
        };

        for (action, useful) in moves {
            if !useful {
                continue;
            }
            let (mr, mc) = action.delta();
            match Self::cell(obs, (pos.0 + mr as i64, pos.1 + mc as i64)) {
                Some(PASSAGE) => return action,
                Some(WOOD) => return Action::Strike,
                _ => {}
            }
        }
        Action::Stop
    }
}

fn read_position(value: &Value) -> Option<(i64, i64)> {
    let pair = value.as_array()?;
    Some((pair.first()?.as_i64()?, pair.get(1)?.as_i64()?))
}

fn manhattan(a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

/// Handle around an in-process strategy.
pub struct ScriptedHandle {
    descriptor: AgentDescriptor,
    strategy: Mutex<Box<dyn Strategy>>,
}

impl ScriptedHandle {
    /// Wraps `strategy` for the agent described by `descriptor`.
    pub fn new(descriptor: AgentDescriptor, strategy: Box<dyn Strategy>) -> Self {
        Self {
            descriptor,
            strategy: Mutex::new(strategy),
        }
    }

    fn with_strategy<R>(&self, f: impl FnOnce(&mut Box<dyn Strategy>) -> R) -> R {
        let mut guard = self.strategy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl AgentHandle for ScriptedHandle {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn act(&self, obs: &Observation) -> Result<Action, AgentError> {
        Ok(self.with_strategy(|s| s.act(obs)))
    }

    async fn episode_end(&self, reward: i32) {
        self.with_strategy(|s| s.episode_end(reward));
    }

    fn seed(&self, seed: u64) {
        self.with_strategy(|s| s.seed(seed));
    }
}
