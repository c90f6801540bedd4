use serde::{Deserialize, Serialize};

use super::server::{Server, ServerKey};
use crate::Result;

/// A federation member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity identifier
    pub entity_id: String,

    /// Organization name
    #[serde(default)]
    pub organization: Option<String>,

    /// Organization identifier (e.g. a registration number)
    #[serde(default)]
    pub organization_id: Option<String>,

    /// Servers the entity publishes
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// One snapshot of the federation membership document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// All entities in the federation
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Metadata {
    /// Parse the (already verified) metadata payload
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns true if the snapshot has no entities at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every (entity, server) identity in the snapshot, in document order
    #[must_use]
    pub fn server_keys(&self) -> Vec<ServerKey> {
        self.entities
            .iter()
            .flat_map(|entity| {
                entity
                    .servers
                    .iter()
                    .map(|server| ServerKey::new(&entity.entity_id, &server.base_uri))
            })
            .collect()
    }

    /// Look up the live server entry (and so its pins) for a key
    #[must_use]
    pub fn find_server(&self, key: &ServerKey) -> Option<&Server> {
        self.entities
            .iter()
            .filter(|entity| entity.entity_id == key.entity_id)
            .flat_map(|entity| entity.servers.iter())
            .find(|server| server.base_uri == key.base_uri)
    }

    /// Returns true if the key is still published
    #[must_use]
    pub fn contains(&self, key: &ServerKey) -> bool {
        self.find_server(key).is_some()
    }
}
