/// Identity resolution: maps a presented credential to a known agent.
///
/// The gateway only reads identities. The one write it performs is the
/// presence flip on AUTH and after the disconnect grace window.
use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// A durable agent identity, owned outside the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub name: String,
    /// Credential presented with AUTH.
    #[serde(alias = "apiKey")]
    pub api_key: String,
    /// Static capabilities, answered on the agent's behalf while offline.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl AgentIdentity {
    /// Whether this identity answers to `name_or_id` (ids exact, names case-insensitive).
    pub fn answers_to(&self, name_or_id: &str) -> bool {
        self.id == name_or_id || self.name.eq_ignore_ascii_case(name_or_id)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read agents file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed agents file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Lookup contract consumed by the gateway. Calls may be remote.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Exact-match credential lookup.
    async fn lookup(&self, credential: &str) -> Result<Option<AgentIdentity>, IdentityError>;

    /// Find an identity by name or id.
    async fn find(&self, name_or_id: &str) -> Result<Option<AgentIdentity>, IdentityError>;

    /// Record the agent's presence and last-seen time.
    async fn set_presence(&self, agent_id: &str, presence: Presence) -> Result<(), IdentityError>;
}

/// In-memory identity store, optionally seeded from a JSON file.
#[derive(Debug, Default)]
pub struct StaticIdentities {
    agents: RwLock<Vec<AgentIdentity>>,
    /// agent id → (presence, last seen unix secs)
    presence: RwLock<HashMap<String, (Presence, u64)>>,
}

impl StaticIdentities {
    pub fn new(agents: Vec<AgentIdentity>) -> Self {
        Self {
            agents: RwLock::new(agents),
            presence: RwLock::new(HashMap::new()),
        }
    }

    /// Load a JSON array of identities.
    pub fn from_file(path: &Path) -> Result<Self, IdentityError> {
        let json = std::fs::read_to_string(path)?;
        let agents: Vec<AgentIdentity> = serde_json::from_str(&json)?;
        info!(count = agents.len(), path = %path.display(), "loaded agent identities");
        Ok(Self::new(agents))
    }

    /// Add or replace an identity (matched by id).
    pub async fn insert(&self, identity: AgentIdentity) {
        let mut agents = self.agents.write().await;
        agents.retain(|a| a.id != identity.id);
        agents.push(identity);
    }

    /// Last recorded presence for an agent.
    pub async fn presence_of(&self, agent_id: &str) -> Option<Presence> {
        self.presence.read().await.get(agent_id).map(|(p, _)| *p)
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentities {
    async fn lookup(&self, credential: &str) -> Result<Option<AgentIdentity>, IdentityError> {
        if credential.is_empty() {
            return Ok(None);
        }
        let agents = self.agents.read().await;
        Ok(agents.iter().find(|a| a.api_key == credential).cloned())
    }

    async fn find(&self, name_or_id: &str) -> Result<Option<AgentIdentity>, IdentityError> {
        let agents = self.agents.read().await;
        // Ids win over names when both could match.
        Ok(agents
            .iter()
            .find(|a| a.id == name_or_id)
            .or_else(|| agents.iter().find(|a| a.answers_to(name_or_id)))
            .cloned())
    }

    async fn set_presence(&self, agent_id: &str, presence: Presence) -> Result<(), IdentityError> {
        let now = super::server::unix_now();
        self.presence
            .write()
            .await
            .insert(agent_id.to_owned(), (presence, now));
        Ok(())
    }
}
