//! Agent resolution - descriptor strings to live handles.
//!
//! # Resolution Table
//!
//! ```text
//! token               handle            endpoint
//! ------------------  ----------------  ----------------------------------------
//! simple/static/...   ScriptedHandle    -
//! test::<name>        ScriptedHandle    - (StrategyRegistry lookup)
//! player/playerblock  HumanHandle       - (human input factory)
//! docker::img[:p]     RemoteHandle      fleet server, else started container
//! docker_hakozaki     RemoteHandle      started container on localhost
//! http::host:p        RemoteHandle      http://host:p
//! multiplayers::h:p   RemoteHandle      fleet server, else http://h:p
//! ```
//!
//! Container ports default to `agent_id + 10000`.

use arena_env::{AgentId, ContainerRuntime, Endpoint, EnvError, JsonTransport};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agents::{
    AgentHandle, CycleStrategy, HumanHandle, HumanInput, KeyMap, RandomStrategy, RemoteHandle, ScriptedHandle,
    SimpleStrategy, StaticStrategy, Strategy,
};
use crate::config::{AgentEnvVars, RunConfig, ServerDirectory};
use crate::descriptor::{parse_descriptors, AgentDescriptor, AgentKind};
use crate::error::ResolveError;
use crate::registry::StrategyRegistry;

/// Creates the input device of one human agent.
pub type HumanInputFactory = Arc<dyn Fn(AgentId) -> Arc<dyn HumanInput> + Send + Sync>;

/// Turns descriptors into agent handles.
pub struct AgentResolver {
    /// Strategies reachable through `test::`
    registry: StrategyRegistry,

    /// Fleet server lookup for remote kinds
    servers: ServerDirectory,

    /// Transport of every remote handle
    transport: Arc<dyn JsonTransport>,

    /// Runtime for `docker` / `docker_hakozaki` agents
    containers: Option<Arc<dyn ContainerRuntime>>,

    /// Input devices for `player` / `playerblock` agents
    human_input: Option<HumanInputFactory>,

    action_timeout: Duration,
    control_timeout: Duration,
}

impl AgentResolver {
    /// Creates a resolver with the built-in strategies and local servers.
    pub fn new(transport: Arc<dyn JsonTransport>) -> Self {
        let defaults = RunConfig::default();
        Self {
            registry: StrategyRegistry::with_builtins(),
            servers: ServerDirectory::local(),
            transport,
            containers: None,
            human_input: None,
            action_timeout: defaults.action_timeout,
            control_timeout: defaults.control_timeout,
        }
    }

    /// Creates a resolver using the servers and timeouts of a run configuration.
    pub fn from_config(config: &RunConfig, transport: Arc<dyn JsonTransport>) -> Self {
        Self::new(transport)
            .with_servers(config.servers.clone())
            .with_timeouts(config.action_timeout, config.control_timeout)
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_servers(mut self, servers: ServerDirectory) -> Self {
        self.servers = servers;
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

    pub fn with_timeouts(mut self, action: Duration, control: Duration) -> Self {
        self.action_timeout = action;
        self.control_timeout = control;
        self
    }

    /// Returns the container runtime, if any.
    pub fn containers(&self) -> Option<&Arc<dyn ContainerRuntime>> {
        self.containers.as_ref()
    }

    /// Resolves one descriptor for the agent at `agent_id`.
    ///
    /// # Errors
    /// * `UnknownAgentKind` - unrecognized kind token
    /// * `MalformedDescriptor` - spec cannot be split into its fields
    /// * `NoHumanInput` - human kind without an input device
    /// * `Container` - the agent's container did not start
    pub async fn resolve(
        &self,
        descriptor: &str,
        agent_id: AgentId,
        env_overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<Box<dyn AgentHandle>, ResolveError> {
        let descriptor = AgentDescriptor::parse(descriptor, agent_id)?;
        self.build(descriptor, env_overrides).await
    }

    /// Resolves a whole lineup, ordinals in list order.
    ///
    /// Every descriptor is parsed before anything is built, so a bad entry
    /// starts no container and makes no request. If building fails midway,
    /// containers started so far are stopped.
    pub async fn resolve_all<S: AsRef<str>>(
        &self,
        descriptors: &[S],
        env_vars: &AgentEnvVars,
    ) -> Result<Vec<Box<dyn AgentHandle>>, ResolveError> {
        let parsed = parse_descriptors(descriptors)?;

        let mut handles = Vec::with_capacity(parsed.len());
        for descriptor in parsed {
            let env = env_vars.get(&descriptor.ordinal());
            match self.build(descriptor, env).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    if let Some(containers) = &self.containers {
                        containers.stop_all().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    async fn build(
        &self,
        descriptor: AgentDescriptor,
        env_overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<Box<dyn AgentHandle>, ResolveError> {
        debug!("Resolving agent {} from '{}'", descriptor.ordinal(), descriptor);

        let handle: Box<dyn AgentHandle> = match descriptor.kind() {
            AgentKind::LocalScripted => {
                let strategy = builtin_strategy(descriptor.token())
                    .ok_or_else(|| ResolveError::malformed(descriptor.to_string(), "no built-in strategy"))?;
                Box::new(ScriptedHandle::new(descriptor, strategy))
            }
            AgentKind::InProcessTest => {
                let strategy = self.registry.create(descriptor.spec()).ok_or_else(|| {
                    ResolveError::malformed(
                        descriptor.to_string(),
                        format!("no registered strategy named '{}'", descriptor.spec()),
                    )
                })?;
                Box::new(ScriptedHandle::new(descriptor, strategy))
            }
            AgentKind::LocalHuman | AgentKind::LocalHumanBlocking => {
                let keymap = KeyMap::from_spec(&descriptor)?;
                let factory = self.human_input.as_ref().ok_or_else(|| ResolveError::NoHumanInput {
                    descriptor: descriptor.to_string(),
                })?;
                let input = factory(descriptor.ordinal());
                Box::new(HumanHandle::new(descriptor, keymap, input))
            }
            AgentKind::ContainerRemote
            | AgentKind::ContainerRemoteVariant
            | AgentKind::BareHttpRemote
            | AgentKind::MultiHostRemote => {
                let endpoint = self.remote_endpoint(&descriptor, env_overrides).await?;
                Box::new(RemoteHandle::new(
                    descriptor,
                    endpoint,
                    self.transport.clone(),
                    self.action_timeout,
                    self.control_timeout,
                ))
            }
        };

        info!("Agent {} resolved as {} ('{}')", handle.agent_id(), handle.kind(), handle.descriptor());
        Ok(handle)
    }

    async fn remote_endpoint(
        &self,
        descriptor: &AgentDescriptor,
        env_overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<Endpoint, ResolveError> {
        match descriptor.kind() {
            AgentKind::ContainerRemote => {
                let (image, port) = descriptor.target_and_port()?;
                let port = port.unwrap_or_else(|| descriptor.default_port());
                // Fleet servers already run the agent
                match self.fleet_server(descriptor)? {
                    Some(server) => Ok(Endpoint::new(server, port)),
                    None => self.start_container(descriptor, &image, port, env_overrides).await,
                }
            }
            AgentKind::ContainerRemoteVariant => {
                let (image, port) = descriptor.target_and_port()?;
                let port = port.unwrap_or_else(|| descriptor.default_port());
                self.start_container(descriptor, &image, port, env_overrides).await
            }
            AgentKind::BareHttpRemote => {
                let (host, port) = descriptor.host_and_port()?;
                Ok(Endpoint::new(with_scheme(&host), port))
            }
            AgentKind::MultiHostRemote => {
                let (host, port) = descriptor.host_and_port()?;
                let server = match self.fleet_server(descriptor)? {
                    Some(server) => server.to_string(),
                    None => with_scheme(&host),
                };
                info!("Using port {} for agent {}", port, descriptor.ordinal());
                Ok(Endpoint::new(server, port))
            }
            kind => Err(ResolveError::malformed(
                descriptor.to_string(),
                format!("{} agents have no endpoint", kind),
            )),
        }
    }

    fn fleet_server(&self, descriptor: &AgentDescriptor) -> Result<Option<&str>, ResolveError> {
        self.servers
            .fleet_server(descriptor.ordinal())
            .map_err(|reason| ResolveError::malformed(descriptor.to_string(), reason))
    }

    async fn start_container(
        &self,
        descriptor: &AgentDescriptor,
        image: &str,
        port: u16,
        env_overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<Endpoint, ResolveError> {
        let agent_id = descriptor.ordinal();
        let containers = self.containers.as_ref().ok_or_else(|| ResolveError::Container {
            agent_id,
            source: EnvError::container("no container runtime configured"),
        })?;

        let empty = BTreeMap::new();
        let env = env_overrides.unwrap_or(&empty);
        containers.start(image, port, env).await.map_err(|source| {
            warn!("Container {} for agent {} failed to start", image, agent_id);
            ResolveError::Container { agent_id, source }
        })
    }
}

/// Strategy behind a built-in scripted token.
fn builtin_strategy(token: &str) -> Option<Box<dyn Strategy>> {
    match token {
        "simple" => Some(Box::new(SimpleStrategy)),
        "static" => Some(Box::new(StaticStrategy)),
        "random" => Some(Box::new(RandomStrategy::default())),
        "static_agent_test" => Some(Box::new(CycleStrategy::default())),
        _ => None,
    }
}

/// Prefixes `http://` unless the host already carries a scheme.
fn with_scheme(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ChannelInput;
    use crate::config::parse_agent_env_vars;
    use crate::testing::{FakeContainers, RecordingTransport};
    use std::sync::atomic::Ordering;

    fn resolver() -> (AgentResolver, Arc<RecordingTransport>, Arc<FakeContainers>) {
        let transport = Arc::new(RecordingTransport::default());
        let containers = Arc::new(FakeContainers::default());
        let human: HumanInputFactory = Arc::new(|_: AgentId| {
            let (input, _controller) = ChannelInput::pair();
            input as Arc<dyn HumanInput>
        });
        let resolver = AgentResolver::new(transport.clone())
            .with_containers(containers.clone())
            .with_human_input(human);
        (resolver, transport, containers)
    }

    #[tokio::test]
    async fn test_every_kind_resolves() {
        let (resolver, _, _) = resolver();
        let cases = [
            ("simple::x", AgentKind::LocalScripted),
            ("static::x", AgentKind::LocalScripted),
            ("random::x", AgentKind::LocalScripted),
            ("static_agent_test::x", AgentKind::LocalScripted),
            ("test::agents.SimpleAgent", AgentKind::InProcessTest),
            ("player::arrows", AgentKind::LocalHuman),
            ("playerblock::wasd", AgentKind::LocalHumanBlocking),
            ("docker::arena/agent", AgentKind::ContainerRemote),
            ("docker_hakozaki::arena/agent:12000", AgentKind::ContainerRemoteVariant),
            ("http::10.0.0.3:8080", AgentKind::BareHttpRemote),
            ("multiplayers::peer:9000", AgentKind::MultiHostRemote),
        ];

        for (i, (descriptor, kind)) in cases.iter().enumerate() {
            let handle = resolver.resolve(descriptor, AgentId(i), None).await.unwrap();
            assert_eq!(handle.kind(), *kind, "{}", descriptor);
            assert_eq!(handle.agent_id(), AgentId(i));
        }
    }

    #[tokio::test]
    async fn test_container_ports_and_env() {
        let (resolver, _, containers) = resolver();
        let env = parse_agent_env_vars("3:foo=lam").unwrap();

        resolver
            .resolve("docker::arena/agent", AgentId(3), env.get(&AgentId(3)))
            .await
            .unwrap();
        resolver
            .resolve("docker_hakozaki::arena/other:12345", AgentId(1), None)
            .await
            .unwrap();

        let started = containers.started.lock().unwrap();
        assert_eq!(started[0].0, "arena/agent");
        assert_eq!(started[0].1, 10003);
        assert_eq!(started[0].2.get("foo").map(String::as_str), Some("lam"));
        assert_eq!(started[1].1, 12345);
        assert!(started[1].2.is_empty());
    }

    #[tokio::test]
    async fn test_fleet_servers() {
        let transport = Arc::new(RecordingTransport::default());
        let containers = Arc::new(FakeContainers::default());
        let servers = ServerDirectory::fleet(BTreeMap::from([(AgentId(0), "http://10.1.0.7".to_string())]));
        let resolver = AgentResolver::new(transport.clone())
            .with_containers(containers.clone())
            .with_servers(servers);

        let handle = resolver.resolve("docker::arena/agent", AgentId(0), None).await.unwrap();
        handle.act(&serde_json::json!({})).await.unwrap();
        assert!(containers.started.lock().unwrap().is_empty());
        assert_eq!(transport.posts.lock().unwrap()[0].0, "http://10.1.0.7:10000/request");

        let err = resolver.resolve("multiplayers::peer:9000", AgentId(1), None).await;
        assert!(matches!(err, Err(ResolveError::MalformedDescriptor { .. })));
    }

    #[tokio::test]
    async fn test_malformed_specs() {
        let (resolver, _, _) = resolver();

        for descriptor in ["http::hostonly", "http::host:port", "multiplayers:::80", "test::agents.Nobody", "player::mouse"] {
            let result = resolver.resolve(descriptor, AgentId(0), None).await;
            assert!(
                matches!(result, Err(ResolveError::MalformedDescriptor { .. })),
                "{}",
                descriptor
            );
        }
    }

    #[tokio::test]
    async fn test_bogus_kind_builds_nothing() {
        let (resolver, transport, containers) = resolver();
        let lineup = ["docker::arena/agent", "simple::x", "bogus::x", "http::h:1"];

        let err = resolver.resolve_all(&lineup, &AgentEnvVars::new()).await.err().unwrap();

        assert!(matches!(err, ResolveError::UnknownAgentKind { ref kind, .. } if kind == "bogus"));
        assert!(containers.started.lock().unwrap().is_empty());
        assert!(transport.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_container_stops_started_ones() {
        let transport = Arc::new(RecordingTransport::default());
        let containers = Arc::new(FakeContainers {
            fail: true,
            ..Default::default()
        });
        let resolver = AgentResolver::new(transport).with_containers(containers.clone());

        let err = resolver
            .resolve_all(&["simple::x", "docker::arena/agent"], &AgentEnvVars::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ResolveError::Container { agent_id: AgentId(1), .. }));
        assert_eq!(containers.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_human_needs_input_device() {
        let resolver = AgentResolver::new(Arc::new(RecordingTransport::default()));
        let result = resolver.resolve("player::arrows", AgentId(0), None).await;
        assert!(matches!(result, Err(ResolveError::NoHumanInput { .. })));
    }
}
