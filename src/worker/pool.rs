use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::params::ParameterSet;
use crate::node::client::CoordinatorApi;
use crate::worker::executor::BatchExecutor;

/// Shared, read-only inputs of every batch loop on a node.
pub struct WorkerContext {
    pub api: Arc<dyn CoordinatorApi>,
    pub node_id: String,
    pub node_name: String,
    pub engine_path: PathBuf,
    pub output_dir: PathBuf,
    /// Sleep after each batch
    pub batch_pause: Duration,
    /// Sleep after a crashed batch
    pub crash_backoff: Duration,
}

/// Keeps a fixed number of batch loops running.
///
/// Loops are never restarted on parameter changes; each one picks up new
/// parameters at the start of its next batch.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    fallback: ParameterSet,
    shutdown: CancellationToken,
    slots: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        size: usize,
        ctx: WorkerContext,
        initial: ParameterSet,
        shutdown: CancellationToken,
    ) -> Self {
        let ctx = Arc::new(ctx);
        let slots = (0..size.max(1))
            .map(|slot| spawn_loop(ctx.clone(), slot as u32, initial.clone(), shutdown.clone()))
            .collect();
        tracing::info!(workers = size.max(1), node_id = %ctx.node_id, "Started batch loops");
        Self {
            ctx,
            fallback: initial,
            shutdown,
            slots,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Parameters a respawned loop starts from if it cannot fetch fresh ones.
    pub fn set_fallback(&mut self, params: ParameterSet) {
        self.fallback = params;
    }

    /// Respawn loops that have exited. Returns how many were replaced.
    pub async fn supervise(&mut self) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }
        let mut respawned = 0;
        for (slot, handle) in self.slots.iter_mut().enumerate() {
            if !handle.is_finished() {
                continue;
            }
            let replacement = spawn_loop(
                self.ctx.clone(),
                slot as u32,
                self.fallback.clone(),
                self.shutdown.clone(),
            );
            let finished = std::mem::replace(handle, replacement);
            match finished.await {
                Ok(()) => tracing::warn!(worker = slot, "Batch loop exited, respawned"),
                Err(e) => tracing::error!(worker = slot, error = %e, "Batch loop panicked, respawned"),
            }
            respawned += 1;
        }
        respawned
    }

    /// Wait for every loop to finish its current batch and exit.
    pub async fn join(self) {
        for (slot, handle) in self.slots.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker = slot, error = %e, "Batch loop panicked");
            }
        }
    }
}

fn spawn_loop(
    ctx: Arc<WorkerContext>,
    slot: u32,
    params: ParameterSet,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(batch_loop(ctx, slot, params, shutdown))
}

async fn batch_loop(
    ctx: Arc<WorkerContext>,
    slot: u32,
    mut last_good: ParameterSet,
    shutdown: CancellationToken,
) {
    let executor = BatchExecutor::new(ctx.clone(), slot);

    while !shutdown.is_cancelled() {
        match ctx.api.fetch_parameters().await {
            Ok(snapshot) => last_good = snapshot.parameters,
            Err(e) => {
                tracing::warn!(worker = slot, error = %e, "Parameter fetch failed, using last known set")
            }
        }

        let pause = match executor.run_batch(&last_good).await {
            Ok(_) => ctx.batch_pause,
            Err(e) => {
                tracing::error!(worker = slot, error = %e, "Batch crashed");
                executor.report_crash(&e.to_string()).await;
                ctx.crash_backoff
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    tracing::debug!(worker = slot, "Batch loop stopped");
}
