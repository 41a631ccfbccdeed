//! The node agent.
//!
//! Startup order:
//!
//! 1. Optionally discard local state (`fresh`)
//! 2. Register, or reuse the persisted identity
//! 3. Sync the engine binary; failure here is fatal
//! 4. Poll parameters every `poll_interval`. The first successful poll
//!    starts the [`WorkerPool`]; later polls only log and report changes.
//!
//! Each poll tick also supervises the pool, resyncs the engine and, every
//! `RetentionConfig::sweep_every` ticks, sweeps the output folder.

pub mod client;
pub mod engine_sync;
pub mod identity;
pub mod retention;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::coordinator::params::{ParameterSet, ParameterSnapshot};
use crate::error::{FleetError, Result};
use crate::protocol::ProgressReport;
use crate::worker::{WorkerContext, WorkerPool};

pub use client::{CoordinatorApi, CoordinatorClient};
pub use engine_sync::{EngineSync, LocalEngineState, SyncOutcome, UpdateFrequency};
pub use retention::{RetentionSweeper, SweepReport};

pub const STATUS_PARAMETERS_CHANGED: &str = "parameters changed";
pub const STATUS_WAITING: &str = "waiting for parameter change";

/// Parameters the agent last acted on.
#[derive(Debug, Clone, PartialEq)]
struct Applied {
    version: u64,
    parameters: ParameterSet,
}

impl Applied {
    fn from_snapshot(snapshot: &ParameterSnapshot) -> Self {
        Self {
            version: snapshot.version,
            parameters: snapshot.parameters.clone(),
        }
    }

    /// `changed` alone is unreliable with several pollers, so the version and
    /// values are compared as well.
    fn is_stale(&self, snapshot: &ParameterSnapshot) -> bool {
        snapshot.changed
            || snapshot.version != self.version
            || snapshot.parameters != self.parameters
    }
}

pub struct NodeAgent {
    config: NodeConfig,
    api: Arc<dyn CoordinatorApi>,
}

impl NodeAgent {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let client = CoordinatorClient::new(&config.server_url, config.timeouts)?;
        Ok(Self::with_api(config, Arc::new(client)))
    }

    pub fn with_api(config: NodeConfig, api: Arc<dyn CoordinatorApi>) -> Self {
        Self { config, api }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Returns an error only when no engine binary can be made available or
    /// local state cannot be read or written.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let cfg = &self.config;
        let identity_path = cfg.identity_path();
        let engine_state_path = cfg.engine_state_path();

        if cfg.fresh {
            identity::discard_state(&[&identity_path, &engine_state_path]).await?;
        }
        tokio::fs::create_dir_all(&cfg.output_dir).await?;

        let Some(node_id) = self.register(&shutdown).await? else {
            return Ok(());
        };

        let engine = EngineSync::new(
            &cfg.engine_path,
            &engine_state_path,
            UpdateFrequency::from_config(cfg.update_frequency.as_deref()),
        );
        let outcome = engine.sync(self.api.as_ref()).await?;
        tracing::info!(policy = %engine.policy(), outcome = ?outcome, "Engine ready");

        let sweeper = RetentionSweeper::new(&cfg.output_dir, cfg.retention);
        let sweep_every = cfg.retention.sweep_every(cfg.poll_interval);
        let workers_shutdown = shutdown.child_token();

        let mut pool: Option<WorkerPool> = None;
        let mut applied: Option<Applied> = None;
        let mut ticks: u64 = 0;
        let mut interval = tokio::time::interval(cfg.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                _ = interval.tick() => {}
            }
            ticks += 1;

            match self.api.fetch_parameters().await {
                Ok(snapshot) => match pool.as_mut() {
                    None => {
                        tracing::info!(
                            version = snapshot.version,
                            workers = cfg.concurrency,
                            "Parameters received, starting batch loops"
                        );
                        pool = Some(WorkerPool::start(
                            cfg.concurrency,
                            self.worker_context(&node_id),
                            snapshot.parameters.clone(),
                            workers_shutdown.clone(),
                        ));
                        applied = Some(Applied::from_snapshot(&snapshot));
                    }
                    Some(running) => {
                        let previous = applied.as_ref().map(|a| a.version);
                        if applied.as_ref().map_or(true, |a| a.is_stale(&snapshot)) {
                            tracing::info!(
                                from = ?previous,
                                to = snapshot.version,
                                "Parameters changed; batch loops pick them up on their next batch"
                            );
                            running.set_fallback(snapshot.parameters.clone());
                            applied = Some(Applied::from_snapshot(&snapshot));
                            self.report_node(&node_id, STATUS_PARAMETERS_CHANGED).await;
                        } else {
                            self.report_node(&node_id, STATUS_WAITING).await;
                        }
                    }
                },
                Err(e) => tracing::warn!(error = %e, "Parameter poll failed"),
            }

            if let Some(pool) = pool.as_mut() {
                pool.supervise().await;
            }

            if let Err(e) = engine.sync(self.api.as_ref()).await {
                tracing::error!(error = %e, "Engine binary lost");
                break Err(e);
            }

            if ticks % sweep_every == 0 {
                if let Err(e) = sweeper.run_once().await {
                    tracing::warn!(error = %e, "Retention sweep failed");
                }
            }
        };

        workers_shutdown.cancel();
        if let Some(pool) = pool {
            tracing::info!("Waiting for running batches to finish");
            pool.join().await;
        }
        result
    }

    /// Registration retries every poll interval until it succeeds or
    /// shutdown is requested (`None`).
    async fn register(&self, shutdown: &CancellationToken) -> Result<Option<String>> {
        let path = self.config.identity_path();
        loop {
            match identity::ensure_identity(&path, &self.config.name, self.api.as_ref()).await {
                Ok(id) => return Ok(Some(id)),
                Err(e @ FleetError::Io(_)) => return Err(e),
                Err(e) => tracing::warn!(error = %e, "Registration failed, retrying"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    fn worker_context(&self, node_id: &str) -> WorkerContext {
        WorkerContext {
            api: self.api.clone(),
            node_id: node_id.to_string(),
            node_name: self.config.name.clone(),
            engine_path: self.config.engine_path.clone(),
            output_dir: self.config.output_dir.clone(),
            batch_pause: self.config.batch_pause,
            crash_backoff: self.config.crash_backoff,
        }
    }

    async fn report_node(&self, node_id: &str, status: &str) {
        let report = ProgressReport::new(node_id, status);
        if let Err(e) = self.api.report_progress(&report).await {
            tracing::warn!(status, error = %e, "Progress report failed");
        }
    }
}
