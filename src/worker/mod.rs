//! Batch execution on a node.
//!
//! A node runs a fixed number of batch loops. Each loop repeats:
//!
//! 1. Fetch parameters, keeping the last good set on failure
//! 2. Run the engine via [`BatchExecutor::run_batch`]
//! 3. Parse counts from stdout ([`output::parse_engine_output`])
//! 4. Locate the artifact, report progress, upload
//! 5. Sleep, then start over
//!
//! # Components
//!
//! - [`BatchExecutor`]: one engine invocation plus its report and upload
//! - [`WorkerPool`]: spawns and supervises the loops
//! - [`output`]: the engine's text contract

pub mod executor;
pub mod output;
pub mod pool;

pub use executor::{BatchExecutor, BatchOutcome, BatchStatus};
pub use output::{parse_engine_output, BatchCounts};
pub use pool::{WorkerContext, WorkerPool};
