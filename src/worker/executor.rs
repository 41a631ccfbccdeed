use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Local};
use rand::Rng;
use tokio::process::Command;

use crate::coordinator::params::ParameterSet;
use crate::error::Result;
use crate::protocol::ProgressReport;
use crate::worker::output::{parse_engine_output, BatchCounts};
use crate::worker::pool::WorkerContext;

/// Operation keyword passed as the engine's first argument.
pub const ENGINE_OPERATION: &str = "datagen";

/// Extension the engine appends to artifacts.
pub const ARTIFACT_EXTENSION: &str = "bin";

/// Characters of stderr kept in a failure report.
pub const STDERR_TAIL_CHARS: usize = 200;

/// Engine argument list: `datagen <key> <value>... filename <path> [skipnoisy]`.
pub fn build_engine_args(params: &ParameterSet, output_path: &Path) -> Vec<String> {
    let mut args = vec![ENGINE_OPERATION.to_string()];
    for (key, value) in params.integer_fields() {
        args.push(key.to_string());
        args.push(value.to_string());
    }
    args.push("filename".to_string());
    args.push(output_path.display().to_string());
    if params.skipnoisy {
        args.push("skipnoisy".to_string());
    }
    args
}

/// `data_<YYYYmmdd_HHMMSS>_<name>_<4 uppercase letters>`
pub fn make_output_stem(node_name: &str, now: DateTime<Local>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| char::from(rng.gen_range(b'A'..=b'Z')))
        .collect();
    let name: String = node_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("data_{}_{}_{}", now.format("%Y%m%d_%H%M%S"), name, suffix)
}

/// Find the artifact a run produced: `<stem>.bin`, then `<stem>`.
pub fn locate_artifact(output_dir: &Path, stem: &str) -> Option<PathBuf> {
    [
        output_dir.join(format!("{stem}.{ARTIFACT_EXTENSION}")),
        output_dir.join(stem),
    ]
    .into_iter()
    .find(|p| p.is_file())
}

fn tail(text: &str, max_chars: usize) -> &str {
    let text = text.trim_end();
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Status string a batch loop reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Starting,
    Finished,
    FinishedNoArtifact,
    Failed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    Crashed(String),
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Starting => write!(f, "starting"),
            BatchStatus::Finished => write!(f, "finished"),
            BatchStatus::FinishedNoArtifact => write!(f, "finished: no artifact"),
            BatchStatus::Failed {
                exit_code: Some(code),
                stderr_tail,
            } => write!(f, "failed: exit {code}: {stderr_tail}"),
            BatchStatus::Failed {
                exit_code: None,
                stderr_tail,
            } => write!(f, "failed: killed by signal: {stderr_tail}"),
            BatchStatus::Crashed(msg) => write!(f, "crashed: {msg}"),
        }
    }
}

/// What one batch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub counts: BatchCounts,
    pub artifact: Option<PathBuf>,
}

/// Runs engine batches for one worker slot.
pub struct BatchExecutor {
    ctx: Arc<WorkerContext>,
    worker: u32,
}

impl BatchExecutor {
    pub fn new(ctx: Arc<WorkerContext>, worker: u32) -> Self {
        Self { ctx, worker }
    }

    /// Run the engine once with `params`, then report and upload.
    ///
    /// A non-zero engine exit is a reported outcome, not an error. Errors
    /// are reserved for failures to run the engine at all.
    pub async fn run_batch(&self, params: &ParameterSet) -> Result<BatchOutcome> {
        let stem = make_output_stem(&self.ctx.node_name, Local::now());
        let output_name = format!("{stem}.{ARTIFACT_EXTENSION}");
        let output_path = self.ctx.output_dir.join(&output_name);

        self.report(
            &BatchStatus::Starting,
            BatchCounts::default(),
            Some(output_name.clone()),
        )
        .await;

        tracing::debug!(
            worker = self.worker,
            engine = %self.ctx.engine_path.display(),
            output = %output_path.display(),
            "Running engine"
        );
        let output = Command::new(&self.ctx.engine_path)
            .args(build_engine_args(params, &output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = BatchStatus::Failed {
                exit_code: output.status.code(),
                stderr_tail: tail(&stderr, STDERR_TAIL_CHARS).to_string(),
            };
            tracing::warn!(worker = self.worker, status = %status, "Engine run failed");
            self.report(&status, BatchCounts::default(), Some(output_name))
                .await;
            return Ok(BatchOutcome {
                status,
                counts: BatchCounts::default(),
                artifact: None,
            });
        }

        let counts = parse_engine_output(&String::from_utf8_lossy(&output.stdout));
        let Some(artifact) = locate_artifact(&self.ctx.output_dir, &stem) else {
            let status = BatchStatus::FinishedNoArtifact;
            tracing::warn!(worker = self.worker, stem = %stem, "Engine produced no artifact");
            self.report(&status, counts, None).await;
            return Ok(BatchOutcome {
                status,
                counts,
                artifact: None,
            });
        };

        let artifact_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        self.report(&BatchStatus::Finished, counts, artifact_name)
            .await;

        match self.ctx.api.upload_artifact(&artifact).await {
            Ok(resp) => {
                tracing::info!(worker = self.worker, filename = %resp.filename, "Uploaded artifact")
            }
            Err(e) => {
                tracing::warn!(worker = self.worker, path = %artifact.display(), error = %e, "Upload failed, artifact kept locally")
            }
        }

        tracing::info!(
            worker = self.worker,
            games = counts.games,
            positions = counts.positions,
            "Batch finished"
        );
        Ok(BatchOutcome {
            status: BatchStatus::Finished,
            counts,
            artifact: Some(artifact),
        })
    }

    pub async fn report_crash(&self, message: &str) {
        self.report(
            &BatchStatus::Crashed(message.to_string()),
            BatchCounts::default(),
            None,
        )
        .await;
    }

    async fn report(&self, status: &BatchStatus, counts: BatchCounts, output_file: Option<String>) {
        let report = ProgressReport::new(self.ctx.node_id.clone(), status.to_string())
            .with_counts(counts.games, counts.positions)
            .with_output_file(output_file)
            .with_worker(self.worker);
        if let Err(e) = self.ctx.api.report_progress(&report).await {
            tracing::warn!(worker = self.worker, status = %status, error = %e, "Progress report failed");
        }
    }
}
