//! JSON bodies exchanged between nodes and the coordinator.
//!
//! Field aliases accept the older `client_id` / `progress` spelling.

use serde::{Deserialize, Serialize};

use crate::coordinator::params::ParameterSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default = "unknown_name")]
    pub name: String,
}

fn unknown_name() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(alias = "client_id")]
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    #[serde(alias = "client_id")]
    pub node_id: String,
    #[serde(alias = "progress", default = "unknown_name")]
    pub status: String,
    #[serde(default)]
    pub games: u64,
    #[serde(default)]
    pub positions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Worker slot of the reporting loop; absent for node-level reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<u32>,
}

impl ProgressReport {
    pub fn new(node_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: status.into(),
            games: 0,
            positions: 0,
            output_file: None,
            worker: None,
        }
    }

    pub fn with_counts(mut self, games: u64, positions: u64) -> Self {
        self.games = games;
        self.positions = positions;
        self
    }

    pub fn with_output_file(mut self, output_file: Option<String>) -> Self {
        self.output_file = output_file;
        self
    }

    pub fn with_worker(mut self, worker: u32) -> Self {
        self.worker = Some(worker);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(alias = "file")]
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetParametersResponse {
    pub parameters: ParameterSet,
    pub version: u64,
}
