//! Named strategies for `test::` and the built-in scripted kinds.
//!
//! `test::agents.SimpleAgent` and `test::simple` name the same entry: an
//! `agents.` prefix is accepted and ignored. Lookup is a table, never code
//! evaluation.

use std::collections::BTreeMap;

use crate::agents::{CycleStrategy, RandomStrategy, SimpleStrategy, StaticStrategy, Strategy};

/// Constructor of a fresh strategy.
pub type StrategyCtor = fn() -> Box<dyn Strategy>;

/// Constructor for any strategy with a default state.
pub fn boxed<S: Strategy + Default + 'static>() -> Box<dyn Strategy> {
    Box::new(S::default())
}

/// Prefix accepted in front of registered names.
const AGENTS_PREFIX: &str = "agents.";

/// Table of constructible strategies.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, StrategyCtor>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in strategies.
    pub fn with_builtins() -> Self {
        Self::new()
            .with("simple", boxed::<SimpleStrategy>)
            .with("SimpleAgent", boxed::<SimpleStrategy>)
            .with("static", boxed::<StaticStrategy>)
            .with("StaticAgent", boxed::<StaticStrategy>)
            .with("random", boxed::<RandomStrategy>)
            .with("RandomAgent", boxed::<RandomStrategy>)
            .with("cycle", boxed::<CycleStrategy>)
            .with("static_agent_test", boxed::<CycleStrategy>)
            .with("StaticAgentTest", boxed::<CycleStrategy>)
    }

    /// Adds or replaces an entry.
    pub fn register(&mut self, name: impl Into<String>, ctor: StrategyCtor) {
        self.entries.insert(name.into(), ctor);
    }

    /// Builder form of `register`.
    pub fn with(mut self, name: impl Into<String>, ctor: StrategyCtor) -> Self {
        self.register(name, ctor);
        self
    }

    /// Creates a fresh strategy, `None` if `name` is not registered.
    pub fn create(&self, name: &str) -> Option<Box<dyn Strategy>> {
        let name = name.trim();
        let name = name.strip_prefix(AGENTS_PREFIX).unwrap_or(name);
        self.entries.get(name).map(|ctor| ctor())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
