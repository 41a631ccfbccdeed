//! Coordinator-side state.
//!
//! The coordinator owns four stores, all constructed once at startup and
//! shared with request handlers through [`CoordinatorState`]:
//!
//! - [`ParameterStore`]: current parameters plus the `changed` indicator
//! - [`ArtifactRegistry`]: the engine binary nodes download
//! - [`NodeRegistry`]: node identity to last-seen metadata
//! - [`RunHistory`]: append-only progress records (SQLite)
//!
//! Uploaded batch artifacts land in an [`ArtifactStore`].

pub mod engine;
pub mod history;
pub mod nodes;
pub mod params;
pub mod storage;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{CoordinatorConfig, DEFAULT_PAGE_SIZE};
use crate::error::{FleetError, Result};
use crate::protocol::ProgressReport;

pub use engine::{persist_engine, ArtifactRegistry, EngineArtifact, EngineInfo};
pub use history::{LatestRun, NewRun, RunHistory, RunRecord, RunTotals};
pub use nodes::{NodeRecord, NodeRegistry};
pub use params::{ParameterSet, ParameterSnapshot, ParameterStore};
pub use storage::ArtifactStore;

/// Handles shared by every request handler.
#[derive(Clone)]
pub struct CoordinatorState {
    pub params: Arc<RwLock<ParameterStore>>,
    pub nodes: Arc<RwLock<NodeRegistry>>,
    pub engine: Arc<RwLock<ArtifactRegistry>>,
    /// Serializes engine uploads while they are hashed and written to disk.
    engine_upload: Arc<Mutex<()>>,
    pub history: RunHistory,
    pub artifacts: ArtifactStore,
    pub page_size: usize,
}

impl CoordinatorState {
    /// Open persistent state under the configured data directory.
    pub fn open(config: &CoordinatorConfig) -> Result<Self> {
        let history = RunHistory::open(&config.db_path())?;
        let nodes = NodeRegistry::from_records(history.load_nodes()?);
        if !nodes.is_empty() {
            tracing::info!(count = nodes.len(), "Restored node registry");
        }

        let mut engine = ArtifactRegistry::persistent(config.engine_dir())?;
        if let Some(path) = &config.engine_binary {
            engine.load_file(path)?;
        }

        Ok(Self {
            params: Arc::new(RwLock::new(ParameterStore::default())),
            nodes: Arc::new(RwLock::new(nodes)),
            engine: Arc::new(RwLock::new(engine)),
            engine_upload: Arc::new(Mutex::new(())),
            history,
            artifacts: ArtifactStore::open(config.games_dir())?,
            page_size: config.page_size,
        })
    }

    /// Throwaway state: in-memory history and engine, artifacts under `dir`.
    pub fn ephemeral(artifact_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(Self {
            params: Arc::new(RwLock::new(ParameterStore::default())),
            nodes: Arc::new(RwLock::new(NodeRegistry::new())),
            engine: Arc::new(RwLock::new(ArtifactRegistry::new())),
            engine_upload: Arc::new(Mutex::new(())),
            history: RunHistory::in_memory()?,
            artifacts: ArtifactStore::open(artifact_dir)?,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Register a node and persist its record.
    pub async fn register(&self, name: String, address: Option<String>) -> Result<NodeRecord> {
        let record = self.nodes.write().await.register(name, address);
        let history = self.history.clone();
        let persisted = record.clone();
        blocking(move || history.upsert_node(&persisted)).await?;
        Ok(record)
    }

    /// Record a progress report.
    ///
    /// Unknown node identities are ignored and yield `Ok(None)`; the caller
    /// still acknowledges the report.
    pub async fn report_progress(
        &self,
        report: ProgressReport,
        address: Option<String>,
    ) -> Result<Option<RunRecord>> {
        let now = Utc::now();
        let node = self
            .nodes
            .write()
            .await
            .touch(&report.node_id, &report.status, address, now);
        let Some(node) = node else {
            tracing::warn!(node_id = %report.node_id, "Progress from unknown node ignored");
            return Ok(None);
        };

        let run = NewRun {
            node_id: node.id.to_string(),
            worker: report.worker,
            output_file: report.output_file,
            games: report.games,
            positions: report.positions,
            status: report.status,
            timestamp: now,
        };
        tracing::debug!(
            node_id = %run.node_id,
            worker = ?run.worker,
            status = %run.status,
            games = run.games,
            positions = run.positions,
            "Progress reported"
        );

        let history = self.history.clone();
        let record = blocking(move || {
            history.upsert_node(&node)?;
            history.append(&run)
        })
        .await?;
        Ok(Some(record))
    }

    /// Replace the engine binary served to nodes.
    ///
    /// Hashing and the disk write run on the blocking pool; the registry
    /// lock is only taken to swap the new artifact in, so downloads of the
    /// previous binary keep being served meanwhile.
    pub async fn replace_engine(&self, bytes: axum::body::Bytes) -> Result<EngineInfo> {
        let _upload = self.engine_upload.lock().await;
        let dir = self
            .engine
            .read()
            .await
            .persist_dir()
            .map(|d| d.to_path_buf());
        let artifact = blocking(move || {
            let artifact = EngineArtifact::new(bytes);
            if let Some(dir) = &dir {
                persist_engine(dir, &artifact)?;
            }
            Ok(artifact)
        })
        .await?;

        let mut registry = self.engine.write().await;
        registry.install(artifact);
        Ok(registry.info())
    }

    /// Latest run per reporter, capped at the page size, plus totals over it.
    pub async fn latest_runs(&self) -> Result<(Vec<LatestRun>, RunTotals)> {
        let history = self.history.clone();
        let limit = self.page_size;
        let runs = blocking(move || history.latest_runs(limit)).await?;
        let totals = RunTotals::from_latest(&runs);
        Ok((runs, totals))
    }
}

/// Run a blocking database call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FleetError::Internal(format!("blocking task failed: {e}")))?
}

/// The coordinator process: shared state plus its HTTP surface.
pub struct Coordinator {
    pub config: CoordinatorConfig,
    pub state: CoordinatorState,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let state = CoordinatorState::open(&config)?;
        Ok(Self { config, state })
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        crate::server::serve(listener, self.state, shutdown).await
    }
}
