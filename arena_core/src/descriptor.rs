//! Declarative agent descriptors (`"<kind>::<spec>"`).

use arena_env::AgentId;

use crate::error::ResolveError;

/// Port offset for container agents without an explicit port.
pub const AGENT_BASE_PORT: u16 = 10000;

/// Separator between the kind token and the spec.
pub const KIND_SEPARATOR: &str = "::";

/// Backend kind of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// Built-in decision function (`simple`, `static`, `random`, `static_agent_test`)
    LocalScripted,
    /// Human input, never waits for a key (`player`)
    LocalHuman,
    /// Human input, waits for a key every tick (`playerblock`)
    LocalHumanBlocking,
    /// Named strategy from the registry (`test`)
    InProcessTest,
    /// Container started per agent, fleet-aware (`docker`)
    ContainerRemote,
    /// Container started per agent on the local host (`docker_hakozaki`)
    ContainerRemoteVariant,
    /// Plain HTTP agent at a literal address (`http`)
    BareHttpRemote,
    /// HTTP agent on a fleet host or literal address (`multiplayers`)
    MultiHostRemote,
}

impl AgentKind {
    /// Maps a kind token to its kind.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "simple" | "static" | "random" | "static_agent_test" => Some(AgentKind::LocalScripted),
            "player" => Some(AgentKind::LocalHuman),
            "playerblock" => Some(AgentKind::LocalHumanBlocking),
            "test" => Some(AgentKind::InProcessTest),
            "docker" => Some(AgentKind::ContainerRemote),
            "docker_hakozaki" => Some(AgentKind::ContainerRemoteVariant),
            "http" => Some(AgentKind::BareHttpRemote),
            "multiplayers" => Some(AgentKind::MultiHostRemote),
            _ => None,
        }
    }

    /// Returns true for kinds backed by a human input device.
    pub fn is_human(&self) -> bool {
        matches!(self, AgentKind::LocalHuman | AgentKind::LocalHumanBlocking)
    }

    /// Returns a short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::LocalScripted => "local-scripted",
            AgentKind::LocalHuman => "local-human",
            AgentKind::LocalHumanBlocking => "local-human-blocking",
            AgentKind::InProcessTest => "in-process-test",
            AgentKind::ContainerRemote => "container-remote",
            AgentKind::ContainerRemoteVariant => "container-remote-variant",
            AgentKind::BareHttpRemote => "bare-http-remote",
            AgentKind::MultiHostRemote => "multi-host-remote",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed agent descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescriptor {
    kind: AgentKind,
    token: String,
    spec: String,
    ordinal: AgentId,
}

impl AgentDescriptor {
    /// Parses `"<kind>::<spec>"` for the agent at `ordinal`.
    ///
    /// # Errors
    /// * `MalformedDescriptor` - no `::` separator, or more than one
    /// * `UnknownAgentKind` - the kind token is not recognized
    pub fn parse(descriptor: &str, ordinal: AgentId) -> Result<Self, ResolveError> {
        let descriptor = descriptor.trim();
        let mut parts = descriptor.split(KIND_SEPARATOR);
        let (token, spec) = match (parts.next(), parts.next(), parts.next()) {
            (Some(token), Some(spec), None) => (token, spec),
            _ => {
                return Err(ResolveError::malformed(
                    descriptor,
                    "expected exactly one '::' between kind and spec",
                ))
            }
        };

        let kind = AgentKind::from_token(token).ok_or_else(|| ResolveError::UnknownAgentKind {
            kind: token.to_string(),
            descriptor: descriptor.to_string(),
        })?;

        Ok(Self {
            kind,
            token: token.to_string(),
            spec: spec.to_string(),
            ordinal,
        })
    }

    /// Returns the backend kind.
    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Returns the kind token as written.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the part after `::`.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Returns the agent ordinal this descriptor is bound to.
    pub fn ordinal(&self) -> AgentId {
        self.ordinal
    }

    /// Splits the spec at its last colon into `(image_or_host, port)`.
    ///
    /// A spec without a colon yields no port; a colon followed by something
    /// that is not a port number is malformed.
    pub fn target_and_port(&self) -> Result<(String, Option<u16>), ResolveError> {
        match self.spec.rsplit_once(':') {
            Some((target, port)) => {
                if target.is_empty() {
                    return Err(ResolveError::malformed(self.to_string(), "missing image or host before ':'"));
                }
                let port = port.parse::<u16>().map_err(|_| {
                    ResolveError::malformed(self.to_string(), format!("invalid port '{}'", port))
                })?;
                Ok((target.to_string(), Some(port)))
            }
            None if self.spec.is_empty() => Err(ResolveError::malformed(self.to_string(), "missing image or host")),
            None => Ok((self.spec.clone(), None)),
        }
    }

    /// Like `target_and_port` but the port is mandatory.
    pub fn host_and_port(&self) -> Result<(String, u16), ResolveError> {
        match self.target_and_port()? {
            (host, Some(port)) => Ok((host, port)),
            (_, None) => Err(ResolveError::malformed(self.to_string(), "expected 'host:port'")),
        }
    }

    /// Default port for this agent: `ordinal + AGENT_BASE_PORT`.
    pub fn default_port(&self) -> u16 {
        AGENT_BASE_PORT.saturating_add(self.ordinal.index() as u16)
    }
}

impl std::fmt::Display for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.token, KIND_SEPARATOR, self.spec)
    }
}

/// Parses every descriptor of a list, assigning ordinals in order.
///
/// Nothing is constructed: this only validates the strings, so a bad entry
/// anywhere in the list fails before any agent is built.
pub fn parse_descriptors<S: AsRef<str>>(descriptors: &[S]) -> Result<Vec<AgentDescriptor>, ResolveError> {
    descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| AgentDescriptor::parse(d.as_ref(), AgentId(i)))
        .collect()
}

/// Splits a comma-delimited descriptor list.
pub fn split_descriptor_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
