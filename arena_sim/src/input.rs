//! Terminal front end for human agents.
//!
//! Keys are typed one per line on stdin (`up`, `left`, `space`, `w`, ...).
//! Every line goes to every human agent; each agent's keymap ignores the keys
//! it does not bind. Observations are printed as a one-line summary and
//! acknowledged right away.

use arena_core::agents::{ChannelController, ChannelInput, HumanInput, Presentation};
use arena_core::HumanInputFactory;
use arena_env::{AgentId, Observation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

type KeySenders = Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Shared stdin reader feeding every attached human agent.
#[derive(Default)]
pub struct TerminalInput {
    keys: KeySenders,
    reader_started: AtomicBool,
}

impl TerminalInput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory for the resolver; the stdin reader starts with the first
    /// human agent.
    pub fn factory(self: &Arc<Self>) -> HumanInputFactory {
        let terminal = Arc::clone(self);
        Arc::new(move |agent_id| {
            terminal.start_reader();
            terminal.attach(agent_id)
        })
    }

    /// Connects one agent without touching stdin.
    pub fn attach(&self, agent_id: AgentId) -> Arc<dyn HumanInput> {
        let (input, ChannelController { keys, presented }) = ChannelInput::pair();
        lock(&self.keys).push(keys);
        tokio::spawn(show(agent_id, presented));
        input
    }

    /// Feeds keys from any line source.
    pub async fn feed<R: AsyncBufRead + Unpin>(&self, reader: R) {
        forward_lines(reader, Arc::clone(&self.keys)).await
    }

    fn start_reader(&self) {
        if self.reader_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let keys = Arc::clone(&self.keys);
        tokio::spawn(forward_lines(BufReader::new(tokio::io::stdin()), keys));
    }
}

async fn forward_lines<R: AsyncBufRead + Unpin>(reader: R, keys: KeySenders) {
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        // Drop agents whose battle is over
        lock(&keys).retain(|tx| tx.send(key.to_string()).is_ok());
    }
    debug!("Key input closed");
}

async fn show(agent_id: AgentId, mut presented: mpsc::UnboundedReceiver<Presentation>) {
    while let Some(presentation) = presented.recv().await {
        println!("{}", describe(agent_id, &presentation.observation));
        presentation.acknowledge();
    }
}

/// One-line summary of an observation.
pub fn describe(agent_id: AgentId, obs: &Observation) -> String {
    let enemies = obs["enemies"].as_array().map(|e| e.len()).unwrap_or(0);
    format!(
        "[agent {}] step {} position {} alive {} enemies in view {}",
        agent_id, obs["step_count"], obs["position"], obs["alive"], enemies
    )
}
