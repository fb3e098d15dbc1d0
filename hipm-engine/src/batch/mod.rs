//! Batch processing: job state machine, registry, orchestrator

mod job;
mod orchestrator;
mod registry;
mod scan;

pub use job::{BatchJob, JobState, StateTransition};
pub use orchestrator::{BatchOrchestrator, BatchSummary};
pub use registry::{EnqueueOutcome, JobRegistry};
pub use scan::{scan_dataset, ScanError};
