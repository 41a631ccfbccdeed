use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status given to a node before its first progress report.
pub const REGISTERED_STATUS: &str = "registered";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: Uuid,
    pub name: String,
    /// Remote address the node registered or last reported from
    pub address: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub status: String,
}

impl NodeRecord {
    pub fn new(name: String, address: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            address,
            last_seen: Utc::now(),
            status: REGISTERED_STATUS.to_string(),
        }
    }
}

/// Maps node identity to last-seen metadata.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<Uuid, NodeRecord>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from previously persisted records.
    pub fn from_records(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        Self {
            nodes: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    /// Register a node under a freshly generated identity.
    pub fn register(&mut self, name: String, address: Option<String>) -> NodeRecord {
        let record = NodeRecord::new(name, address);
        tracing::info!(node_id = %record.id, name = %record.name, address = ?record.address, "Node registered");
        self.nodes.insert(record.id, record.clone());
        record
    }

    /// Look a node up by its textual identity.
    pub fn get(&self, node_id: &str) -> Option<&NodeRecord> {
        let id = Uuid::parse_str(node_id.trim()).ok()?;
        self.nodes.get(&id)
    }

    /// Record a status report. Returns `None` for unknown identities.
    pub fn touch(
        &mut self,
        node_id: &str,
        status: &str,
        address: Option<String>,
        at: DateTime<Utc>,
    ) -> Option<NodeRecord> {
        let id = Uuid::parse_str(node_id.trim()).ok()?;
        let record = self.nodes.get_mut(&id)?;
        record.last_seen = at;
        record.status = status.to_string();
        if address.is_some() {
            record.address = address;
        }
        Some(record.clone())
    }

    /// All nodes, most recently seen first.
    pub fn all(&self) -> Vec<&NodeRecord> {
        let mut nodes: Vec<&NodeRecord> = self.nodes.values().collect();
        nodes.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
