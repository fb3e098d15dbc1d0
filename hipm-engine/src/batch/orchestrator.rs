//! Batch orchestrator
//!
//! Drives pending jobs through the pipeline on a bounded worker pool.
//! Each attempt runs on a blocking thread under the configured timeout; the
//! retry policy decides between another attempt, `dead`/`dead_with_results`
//! and leaving the job `failed`.
//!
//! A blocking thread cannot be killed. An attempt that times out keeps its
//! analysis slot until the thread returns, so at most `workers` analysis
//! threads exist at any time. Waiting for a slot counts against the
//! attempt's timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use hipm_common::{EventBus, HipmEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{BatchJob, JobState};
use super::registry::{EnqueueOutcome, JobRegistry};
use crate::config::AnalysisConfig;
use crate::error::{JobError, RegistryError};
use crate::pipeline::{PartialRecordSlot, Pipeline};
use crate::provider::SegmentationProvider;
use crate::record::MetricRecord;

/// Outcome of one `run_until_idle` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    /// Attempts started during the run
    pub attempts: usize,
    pub completed: usize,
    /// Jobs left in `failed` (not retryable)
    pub failed: usize,
    /// `dead` plus `dead_with_results`
    pub dead: usize,
}

/// Runs batch jobs against one segmentation provider
pub struct BatchOrchestrator {
    registry: Arc<JobRegistry>,
    pipeline: Arc<Pipeline>,
    config: Arc<AnalysisConfig>,
    event_bus: Option<EventBus>,
    /// One permit per analysis thread, held until the thread returns
    slots: Arc<Semaphore>,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        provider: Arc<dyn SegmentationProvider>,
        config: Arc<AnalysisConfig>,
    ) -> Self {
        Self {
            registry,
            pipeline: Arc::new(Pipeline::new(provider, Arc::clone(&config))),
            slots: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            event_bus: None,
        }
    }

    /// Also report batch completion on `event_bus`
    pub fn with_events(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub async fn enqueue(&self, input_id: &str, force: bool) -> EnqueueOutcome {
        self.registry.enqueue(input_id, force).await
    }

    pub async fn status(&self, input_id: &str) -> Option<BatchJob> {
        self.registry.status(input_id).await
    }

    pub async fn list(&self, filter: Option<JobState>) -> Vec<BatchJob> {
        self.registry.list(filter).await
    }

    pub async fn purge(&self, input_id: &str) -> Result<BatchJob, RegistryError> {
        self.registry.purge(input_id).await
    }

    pub async fn cancel(&self, input_id: &str) -> Result<(), RegistryError> {
        self.registry.cancel(input_id).await
    }

    /// Process pending jobs until none are left
    ///
    /// Retried jobs go back to pending and are picked up by a later round.
    pub async fn run_until_idle(&self) -> BatchSummary {
        let batch_id = Uuid::new_v4();
        let workers = self.config.workers.max(1);
        let mut attempts = 0;

        info!(batch_id = %batch_id, workers, "Batch started");

        loop {
            let pending = self.registry.pending_ids().await;
            if pending.is_empty() {
                break;
            }
            debug!(batch_id = %batch_id, jobs = pending.len(), "Batch round");
            attempts += pending.len();

            stream::iter(pending)
                .map(|input_id| async move { self.process_job(&input_id).await })
                .buffer_unordered(workers)
                .for_each(|result| async move {
                    if let Err(e) = result {
                        error!(error = %e, "Job processing failed");
                    }
                })
                .await;
        }

        let counts = self.registry.counts().await;
        let count = |state: JobState| counts.get(&state).copied().unwrap_or(0);
        let summary = BatchSummary {
            batch_id,
            attempts,
            completed: count(JobState::Completed),
            failed: count(JobState::Failed),
            dead: count(JobState::Dead) + count(JobState::DeadWithResults),
        };

        info!(
            batch_id = %batch_id,
            completed = summary.completed,
            failed = summary.failed,
            dead = summary.dead,
            "Batch finished"
        );
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(HipmEvent::BatchFinished {
                batch_id,
                completed: summary.completed,
                failed: summary.failed,
                dead: summary.dead,
                timestamp: Utc::now(),
            });
        }
        summary
    }

    /// Run one attempt of a pending job and apply the retry policy
    ///
    /// Returns the state the job settled in after this attempt.
    pub async fn process_job(&self, input_id: &str) -> Result<JobState, RegistryError> {
        let (transition, job_token) = self.registry.start(input_id).await?;
        let attempt = transition.attempt;
        let attempt_token = job_token.child_token();
        let slot = PartialRecordSlot::new();

        debug!(input_id = %input_id, attempt, "Attempt started");

        let pipeline = Arc::clone(&self.pipeline);
        let slots = Arc::clone(&self.slots);
        let id = input_id.to_string();
        let token = attempt_token.clone();
        let partial = slot.clone();
        let run = async move {
            if slots.available_permits() == 0 {
                debug!(input_id = %id, "Waiting for an analysis thread");
            }
            let permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Err(JobError::PluginError("worker pool closed".to_string())),
            };
            let task = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                pipeline.run(&id, &token, &partial)
            });
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(JobError::PluginError(format!(
                    "analysis task aborted: {}",
                    join_error
                ))),
            }
        };

        let outcome: Result<MetricRecord, JobError> =
            match tokio::time::timeout(self.config.job_timeout, run).await {
                Ok(result) => result,
                Err(_) => {
                    // The thread stops at its next checkpoint and frees its slot then
                    attempt_token.cancel();
                    Err(JobError::Timeout(duration_ms(self.config.job_timeout)))
                }
            };

        match outcome {
            Ok(record) => {
                let critical = record.critical_error();
                self.registry.succeed(input_id, record).await?;
                info!(input_id = %input_id, attempt, critical, "Job completed");
                Ok(JobState::Completed)
            }
            Err(err) => self.handle_failure(input_id, attempt, err, slot).await,
        }
    }

    async fn handle_failure(
        &self,
        input_id: &str,
        attempt: u32,
        err: JobError,
        slot: PartialRecordSlot,
    ) -> Result<JobState, RegistryError> {
        let retryable = err.is_retryable();
        warn!(input_id = %input_id, attempt, error = %err, retryable, "Attempt failed");
        self.registry.fail(input_id, err, slot.take()).await?;

        if !retryable {
            return Ok(JobState::Failed);
        }
        if attempt < self.config.max_attempts {
            self.registry.retry(input_id).await?;
            return Ok(JobState::Pending);
        }

        let transition = self.registry.exhaust(input_id).await?;
        warn!(input_id = %input_id, state = %transition.new_state, "Retries exhausted");
        Ok(transition.new_state)
    }

    /// Settle jobs a previous process left in `running`
    ///
    /// Such an attempt never reported back, so it counts as timed out and
    /// the normal retry policy applies.
    pub async fn recover_interrupted(&self) -> Result<usize, RegistryError> {
        let interrupted = self.registry.list(Some(JobState::Running)).await;
        for job in &interrupted {
            warn!(input_id = %job.input_id, attempt = job.attempts, "Recovering interrupted job");
            self.handle_failure(
                &job.input_id,
                job.attempts,
                JobError::Timeout(duration_ms(self.config.job_timeout)),
                PartialRecordSlot::new(),
            )
            .await?;
        }
        Ok(interrupted.len())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
