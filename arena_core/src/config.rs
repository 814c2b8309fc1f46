//! Run configuration and server selection.

use arena_env::{AgentId, RenderMode};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BattleError;
use crate::telemetry::DeliveryPolicy;

/// Environment variable that switches remote agents to fleet servers.
pub const USE_GAME_SERVERS_VAR: &str = "ARENA_USE_GAME_SERVERS";

/// Prefix of the per-agent fleet server variables (`ARENA_GAME_INSTANCE_<n>`).
pub const GAME_INSTANCE_VAR_PREFIX: &str = "ARENA_GAME_INSTANCE_";

/// Default simulation configuration id.
pub const DEFAULT_CONFIG_ID: &str = "ArenaFFA-v0";

/// Default agent descriptor (four of these make the default battle).
pub const DEFAULT_AGENT: &str = "test::agents.SimpleAgent";

/// Extra environment variables for each agent's container.
pub type AgentEnvVars = HashMap<AgentId, BTreeMap<String, String>>;

/// Where remote agents live.
///
/// Either every remote agent is addressed on its literal/local host, or each
/// agent ordinal is mapped to a pre-provisioned fleet server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDirectory {
    /// Whether the fleet table is authoritative
    use_fleet: bool,

    /// Fleet server per agent ordinal (e.g. `http://10.0.0.5`)
    servers: BTreeMap<AgentId, String>,
}

impl ServerDirectory {
    /// Remote agents run next to the orchestrator.
    pub fn local() -> Self {
        Self::default()
    }

    /// Remote agents run on the given fleet servers.
    pub fn fleet(servers: BTreeMap<AgentId, String>) -> Self {
        Self {
            use_fleet: true,
            servers,
        }
    }

    /// Builds the directory from a variable lookup, read once at startup.
    ///
    /// Fleet mode is enabled when `ARENA_USE_GAME_SERVERS` is set to a
    /// non-empty value; agent `n` then uses `ARENA_GAME_INSTANCE_<n>`.
    pub fn from_lookup<F>(num_agents: usize, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_fleet = lookup(USE_GAME_SERVERS_VAR).is_some_and(|v| !v.is_empty());
        if !use_fleet {
            return Self::local();
        }

        let servers = (0..num_agents)
            .filter_map(|i| {
                lookup(&format!("{}{}", GAME_INSTANCE_VAR_PREFIX, i)).map(|server| (AgentId(i), server))
            })
            .collect();
        Self::fleet(servers)
    }

    /// Returns true when the fleet table is in use.
    pub fn uses_fleet(&self) -> bool {
        self.use_fleet
    }

    /// Returns the fleet server of an agent, `None` outside fleet mode.
    ///
    /// # Errors
    /// Fleet mode without an entry for `agent_id`.
    pub fn fleet_server(&self, agent_id: AgentId) -> Result<Option<&str>, String> {
        if !self.use_fleet {
            return Ok(None);
        }
        self.servers
            .get(&agent_id)
            .map(|s| Some(s.as_str()))
            .ok_or_else(|| format!("no fleet server configured for agent {}", agent_id))
    }
}

/// Configuration of one run (read-only while the run is active).
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Simulation configuration id
    pub config_id: String,

    /// One descriptor per agent, in ordinal order
    pub agent_descriptors: Vec<String>,

    /// Directory for rendered frames (`None` = not recorded)
    pub record_pngs_dir: Option<PathBuf>,

    /// Directory for JSON frames (`None` = not recorded)
    pub record_json_dir: Option<PathBuf>,

    /// Render every tick
    pub render: bool,

    /// Render target
    pub render_mode: RenderMode,

    /// Saved game state to start from
    pub game_state_file: Option<PathBuf>,

    /// Sleep after each rendered frame and pause after the last one
    pub do_sleep: bool,

    /// Host of the messaging server
    pub messaging_host: String,

    /// Port of the messaging server
    pub messaging_port: u16,

    /// Extra container environment per agent
    pub agent_env_vars: AgentEnvVars,

    /// Timeout of every telemetry call
    pub telemetry_timeout: Duration,

    /// Policy for `envinfo` and `initial_obs`
    pub handshake_policy: DeliveryPolicy,

    /// Policy for `step` and `final_info`
    pub step_policy: DeliveryPolicy,

    /// Timeout of one remote action request
    pub action_timeout: Duration,

    /// Timeout of remote init/episode-end/shutdown calls
    pub control_timeout: Duration,

    /// Server selection for remote agents
    pub servers: ServerDirectory,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            config_id: DEFAULT_CONFIG_ID.to_string(),
            agent_descriptors: vec![DEFAULT_AGENT.to_string(); 4],
            record_pngs_dir: None,
            record_json_dir: None,
            render: false,
            render_mode: RenderMode::Human,
            game_state_file: None,
            do_sleep: true,
            messaging_host: "localhost".to_string(),
            messaging_port: 8000,
            agent_env_vars: AgentEnvVars::new(),
            telemetry_timeout: Duration::from_secs(3),
            handshake_policy: DeliveryPolicy::Fatal,
            step_policy: DeliveryPolicy::LogAndContinue,
            action_timeout: Duration::from_secs(1),
            control_timeout: Duration::from_secs(10),
            servers: ServerDirectory::local(),
        }
    }
}

impl RunConfig {
    /// Creates a config for the given simulation and agents.
    pub fn new<S: Into<String>>(config_id: &str, agents: impl IntoIterator<Item = S>) -> Self {
        Self {
            config_id: config_id.to_string(),
            agent_descriptors: agents.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the messaging server address.
    pub fn with_messaging(mut self, host: &str, port: u16) -> Self {
        self.messaging_host = host.to_string();
        self.messaging_port = port;
        self
    }

    /// Enables JSON recording under `dir`.
    pub fn with_record_json_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_json_dir = Some(dir.into());
        self
    }

    /// Enables frame recording under `dir`.
    pub fn with_record_pngs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_pngs_dir = Some(dir.into());
        self
    }

    /// Enables rendering in the given mode.
    pub fn with_render(mut self, mode: RenderMode) -> Self {
        self.render = true;
        self.render_mode = mode;
        self
    }

    /// Sets whether rendering is paced.
    pub fn with_sleep(mut self, do_sleep: bool) -> Self {
        self.do_sleep = do_sleep;
        self
    }

    /// Sets the telemetry timeout.
    pub fn with_telemetry_timeout(mut self, timeout: Duration) -> Self {
        self.telemetry_timeout = timeout;
        self
    }

    /// Sets the step-level delivery policy.
    pub fn with_step_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.step_policy = policy;
        self
    }

    /// Sets the handshake delivery policy.
    pub fn with_handshake_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.handshake_policy = policy;
        self
    }

    /// Sets the remote action timeout.
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Sets server selection.
    pub fn with_servers(mut self, servers: ServerDirectory) -> Self {
        self.servers = servers;
        self
    }

    /// Sets per-agent container environment variables.
    pub fn with_agent_env_vars(mut self, vars: AgentEnvVars) -> Self {
        self.agent_env_vars = vars;
        self
    }

    /// Starts from a saved game state.
    pub fn with_game_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.game_state_file = Some(path.into());
        self
    }

    /// Checks the config before anything is resolved.
    pub fn validate(&self) -> Result<(), BattleError> {
        if self.agent_descriptors.is_empty() {
            return Err(BattleError::invalid_config("no agents given"));
        }
        if self.config_id.trim().is_empty() {
            return Err(BattleError::invalid_config("empty simulation config id"));
        }
        if let Some(id) = self
            .agent_env_vars
            .keys()
            .find(|id| id.index() >= self.agent_descriptors.len())
        {
            return Err(BattleError::invalid_config(format!(
                "environment variables given for agent {} but only {} agents configured",
                id,
                self.agent_descriptors.len()
            )));
        }
        Ok(())
    }
}

/// Parses per-agent environment variables.
///
/// Format: comma-separated groups `<agent>:<key>=<value>[:<key>=<value>...]`,
/// e.g. `0:foo=bar:baz=lar,3:foo=lam`.
pub fn parse_agent_env_vars(spec: &str) -> Result<AgentEnvVars, BattleError> {
    let mut vars = AgentEnvVars::new();

    for group in spec.split(',').map(str::trim).filter(|g| !g.is_empty()) {
        let mut fields = group.split(':');
        let id = fields
            .next()
            .and_then(|id| id.trim().parse::<usize>().ok())
            .ok_or_else(|| BattleError::invalid_config(format!("bad agent id in env group '{}'", group)))?;

        let entry = vars.entry(AgentId(id)).or_default();
        for pair in fields {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                BattleError::invalid_config(format!("expected key=value in env group '{}', got '{}'", group, pair))
            })?;
            if key.is_empty() {
                return Err(BattleError::invalid_config(format!("empty key in env group '{}'", group)));
            }
            entry.insert(key.to_string(), value.to_string());
        }
    }

    Ok(vars)
}
