//! Simulation collaborator interface.

use serde_json::Value;

use crate::error::EnvError;
use crate::types::{Action, Observation, RenderOptions, StepOutcome};

/// The game being played.
///
/// The orchestrator never looks inside the rules; it only drives this
/// interface. One instance is owned by a `Run` and lent to one episode at a
/// time.
pub trait Simulation: Send {
    /// Starts a new episode and returns the initial observations.
    fn reset(&mut self) -> Result<Vec<Observation>, EnvError>;

    /// Advances one tick with one action per agent.
    ///
    /// The new state is committed before this returns; the orchestrator only
    /// reads it afterwards.
    fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError>;

    /// Renders the current frame.
    fn render(&mut self, options: &RenderOptions) -> Result<(), EnvError>;

    /// Closes the render surface, if any.
    fn close_render(&mut self);

    /// Re-seeds every random source of the simulation.
    fn seed(&mut self, seed: u64);

    /// Observations of the current state under the current observability mode.
    fn observations(&self) -> Vec<Observation>;

    /// Whether observations are limited to each agent's view.
    fn is_partially_observable(&self) -> bool;

    /// Switches between partial and full observability.
    fn set_partially_observable(&mut self, partial: bool);

    /// JSON-serializable snapshot of the full state.
    fn state_snapshot(&self) -> Value;

    /// Static description of the environment sent to the observer.
    fn env_info(&self) -> Value;

    /// Frames per second used to pace recording without rendering.
    fn render_fps(&self) -> u32;

    /// Number of agent slots.
    fn num_agents(&self) -> usize;

    /// Game type announced to remote agents.
    fn game_type(&self) -> &str;

    /// Releases simulation resources.
    fn close(&mut self) {}
}
