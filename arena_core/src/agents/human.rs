//! Human-controlled agents.
//!
//! A human handle turns key names coming from an input device into actions.
//! The device also receives every observation so a front end can show it;
//! with `waiting` the battle does not continue until the front end
//! acknowledged the observation.

use arena_env::{Action, Observation};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::AgentHandle;
use crate::descriptor::{AgentDescriptor, AgentKind};
use crate::error::{AgentError, ResolveError};

/// Key bindings of a human agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMap {
    /// Arrow keys, space strikes
    Arrows,
    /// W/A/S/D, E strikes
    Wasd,
}

impl KeyMap {
    /// Parses the spec of a `player::` / `playerblock::` descriptor.
    pub fn from_spec(descriptor: &AgentDescriptor) -> Result<Self, ResolveError> {
        match descriptor.spec().to_lowercase().as_str() {
            "arrows" => Ok(KeyMap::Arrows),
            "wasd" => Ok(KeyMap::Wasd),
            other => Err(ResolveError::malformed(
                descriptor.to_string(),
                format!("unknown key map '{}', expected 'arrows' or 'wasd'", other),
            )),
        }
    }

    /// Maps a key name to an action, if bound.
    pub fn action_for(&self, key: &str) -> Option<Action> {
        let key = key.trim().to_lowercase();
        match (self, key.as_str()) {
            (KeyMap::Arrows, "up") | (KeyMap::Wasd, "w") => Some(Action::Up),
            (KeyMap::Arrows, "down") | (KeyMap::Wasd, "s") => Some(Action::Down),
            (KeyMap::Arrows, "left") | (KeyMap::Wasd, "a") => Some(Action::Left),
            (KeyMap::Arrows, "right") | (KeyMap::Wasd, "d") => Some(Action::Right),
            (KeyMap::Arrows, "space") | (KeyMap::Wasd, "e") => Some(Action::Strike),
            _ => None,
        }
    }
}

/// A source of key presses that can also display observations.
#[async_trait]
pub trait HumanInput: Send + Sync {
    /// Shows an observation; with `waiting`, returns once it was acknowledged.
    async fn present(&self, obs: &Observation, waiting: bool) -> Result<(), AgentError>;

    /// Returns the most recent key pressed since the last call, without waiting.
    async fn poll_key(&self) -> Option<String>;

    /// Waits for the next key press.
    async fn next_key(&self) -> Result<String, AgentError>;
}

/// An observation handed to the front end.
#[derive(Debug)]
pub struct Presentation {
    /// The observation to show
    pub observation: Observation,

    /// Acknowledge channel, present when the battle is waiting
    pub ack: Option<oneshot::Sender<()>>,
}

impl Presentation {
    /// Acknowledges receipt, if anyone is waiting.
    pub fn acknowledge(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

/// Channel-backed input device.
///
/// The battle side is the `ChannelInput`; a front end (terminal reader,
/// remote-control bridge, test) drives the matching `ChannelController`.
pub struct ChannelInput {
    keys: Mutex<mpsc::UnboundedReceiver<String>>,
    presented: mpsc::UnboundedSender<Presentation>,
}

/// Front-end side of a `ChannelInput`.
pub struct ChannelController {
    /// Send key names here
    pub keys: mpsc::UnboundedSender<String>,

    /// Observations to show arrive here
    pub presented: mpsc::UnboundedReceiver<Presentation>,
}

impl ChannelInput {
    /// Creates a connected input/controller pair.
    pub fn pair() -> (Arc<Self>, ChannelController) {
        let (keys_tx, keys_rx) = mpsc::unbounded_channel();
        let (presented_tx, presented_rx) = mpsc::unbounded_channel();
        let input = Arc::new(Self {
            keys: Mutex::new(keys_rx),
            presented: presented_tx,
        });
        let controller = ChannelController {
            keys: keys_tx,
            presented: presented_rx,
        };
        (input, controller)
    }
}

#[async_trait]
impl HumanInput for ChannelInput {
    async fn present(&self, obs: &Observation, waiting: bool) -> Result<(), AgentError> {
        if !waiting {
            // Fire and forget: a vanished front end is not an error here
            let _ = self.presented.send(Presentation {
                observation: obs.clone(),
                ack: None,
            });
            return Ok(());
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.presented
            .send(Presentation {
                observation: obs.clone(),
                ack: Some(ack_tx),
            })
            .map_err(|_| AgentError::InputClosed)?;
        ack_rx.await.map_err(|_| AgentError::InputClosed)
    }

    async fn poll_key(&self) -> Option<String> {
        let mut keys = self.keys.lock().await;
        let mut latest = None;
        while let Ok(key) = keys.try_recv() {
            latest = Some(key);
        }
        latest
    }

    async fn next_key(&self) -> Result<String, AgentError> {
        self.keys.lock().await.recv().await.ok_or(AgentError::InputClosed)
    }
}

/// Handle for `player::` and `playerblock::` agents.
pub struct HumanHandle {
    descriptor: AgentDescriptor,
    keymap: KeyMap,
    input: Arc<dyn HumanInput>,
}

impl HumanHandle {
    /// Creates a handle reading from `input`.
    pub fn new(descriptor: AgentDescriptor, keymap: KeyMap, input: Arc<dyn HumanInput>) -> Self {
        Self {
            descriptor,
            keymap,
            input,
        }
    }

    fn blocking(&self) -> bool {
        self.descriptor.kind() == AgentKind::LocalHumanBlocking
    }
}

#[async_trait]
impl AgentHandle for HumanHandle {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn act(&self, _obs: &Observation) -> Result<Action, AgentError> {
        if !self.blocking() {
            let key = self.input.poll_key().await;
            return Ok(key.and_then(|k| self.keymap.action_for(&k)).unwrap_or(Action::Stop));
        }

        // Unbound keys are ignored while waiting
        loop {
            let key = self.input.next_key().await?;
            if let Some(action) = self.keymap.action_for(&key) {
                return Ok(action);
            }
        }
    }

    async fn notify_obs(&self, obs: &Observation, waiting: bool) -> Result<(), AgentError> {
        self.input.present(obs, waiting).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_env::AgentId;
    use serde_json::json;

    fn handle(raw: &str) -> (HumanHandle, ChannelController) {
        let descriptor = AgentDescriptor::parse(raw, AgentId(0)).unwrap();
        let keymap = KeyMap::from_spec(&descriptor).unwrap();
        let (input, controller) = ChannelInput::pair();
        (HumanHandle::new(descriptor, keymap, input), controller)
    }

    #[test]
    fn test_keymaps() {
        assert_eq!(KeyMap::Arrows.action_for("Up"), Some(Action::Up));
        assert_eq!(KeyMap::Arrows.action_for("w"), None);
        assert_eq!(KeyMap::Wasd.action_for("e"), Some(Action::Strike));

        let bad = AgentDescriptor::parse("player::joystick", AgentId(0)).unwrap();
        assert!(KeyMap::from_spec(&bad).is_err());
    }

    #[tokio::test]
    async fn test_non_blocking_takes_latest_key() {
        let (agent, controller) = handle("player::arrows");

        assert_eq!(agent.act(&json!({})).await.unwrap(), Action::Stop);

        controller.keys.send("left".to_string()).unwrap();
        controller.keys.send("right".to_string()).unwrap();
        assert_eq!(agent.act(&json!({})).await.unwrap(), Action::Right);
        assert_eq!(agent.act(&json!({})).await.unwrap(), Action::Stop);
    }

    #[tokio::test]
    async fn test_blocking_waits_for_bound_key() {
        let (agent, controller) = handle("playerblock::wasd");

        controller.keys.send("x".to_string()).unwrap();
        controller.keys.send("s".to_string()).unwrap();
        assert_eq!(agent.act(&json!({})).await.unwrap(), Action::Down);

        drop(controller);
        assert!(matches!(agent.act(&json!({})).await, Err(AgentError::InputClosed)));
    }

    #[tokio::test]
    async fn test_waiting_notify_needs_acknowledgement() {
        let (agent, mut controller) = handle("player::arrows");

        let front_end = tokio::spawn(async move {
            let presentation = controller.presented.recv().await.unwrap();
            assert_eq!(presentation.observation["step"], 1);
            presentation.acknowledge();
            controller
        });

        agent.notify_obs(&json!({ "step": 1 }), true).await.unwrap();
        let mut controller = front_end.await.unwrap();

        // Fire-and-forget notifications carry no ack channel
        agent.notify_obs(&json!({ "step": 2 }), false).await.unwrap();
        assert!(controller.presented.recv().await.unwrap().ack.is_none());
    }
}
