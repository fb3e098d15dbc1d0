//! In-memory job registry
//!
//! Each job lives in its own slot behind a `tokio::sync::Mutex`, so
//! transitions on one job never wait on another. The ordered index is an
//! `RwLock` taken for writing only when jobs are added or purged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hipm_common::{EventBus, HipmEvent};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::job::{BatchJob, JobState, StateTransition};
use crate::error::{JobError, RegistryError};
use crate::record::MetricRecord;

/// Outcome of [`JobRegistry::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New pending job
    Created,
    /// Settled job forced back to pending
    Reset,
    /// Job already known; nothing changed
    Unchanged,
}

struct JobEntry {
    job: BatchJob,
    cancel: CancellationToken,
}

struct JobSlot {
    entry: Mutex<JobEntry>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    jobs: HashMap<String, Arc<JobSlot>>,
}

/// Registry of batch jobs keyed by input id
pub struct JobRegistry {
    inner: RwLock<Inner>,
    next_seq: AtomicU64,
    event_bus: Option<EventBus>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_seq: AtomicU64::new(0),
            event_bus: None,
        }
    }

    /// Registry that reports enqueues and transitions on `event_bus`
    pub fn with_events(event_bus: EventBus) -> Self {
        Self {
            event_bus: Some(event_bus),
            ..Self::new()
        }
    }

    async fn slot(&self, input_id: &str) -> Result<Arc<JobSlot>, RegistryError> {
        self.inner
            .read()
            .await
            .jobs
            .get(input_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownJob(input_id.to_string()))
    }

    fn emit(&self, event: HipmEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    fn emit_transition(&self, t: &StateTransition) {
        self.emit(HipmEvent::JobStateChanged {
            input_id: t.input_id.clone(),
            old_state: t.old_state.to_string(),
            new_state: t.new_state.to_string(),
            attempt: t.attempt,
            error: t.error.clone(),
            timestamp: t.transitioned_at,
        });
    }

    /// Add a pending job for `input_id`
    ///
    /// Idempotent: a known id is left alone unless `force` is set and the job
    /// is settled, in which case it is reset with a fresh attempt budget and
    /// cancellation token. Running jobs are never reset.
    pub async fn enqueue(&self, input_id: &str, force: bool) -> EnqueueOutcome {
        let existing = self.inner.read().await.jobs.get(input_id).cloned();
        if let Some(slot) = existing {
            return self.reenqueue(&slot, input_id, force).await;
        }

        let mut inner = self.inner.write().await;
        // Lost a race with another enqueue of the same id
        if let Some(slot) = inner.jobs.get(input_id).cloned() {
            drop(inner);
            return self.reenqueue(&slot, input_id, force).await;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let job = BatchJob::new(input_id, seq);
        inner.order.push(input_id.to_string());
        inner.jobs.insert(
            input_id.to_string(),
            Arc::new(JobSlot {
                entry: Mutex::new(JobEntry {
                    job,
                    cancel: CancellationToken::new(),
                }),
            }),
        );
        drop(inner);

        debug!(input_id = %input_id, seq, "Job enqueued");
        self.emit(HipmEvent::JobEnqueued {
            input_id: input_id.to_string(),
            forced: false,
            timestamp: Utc::now(),
        });
        EnqueueOutcome::Created
    }

    async fn reenqueue(&self, slot: &JobSlot, input_id: &str, force: bool) -> EnqueueOutcome {
        if !force {
            return EnqueueOutcome::Unchanged;
        }
        let mut entry = slot.entry.lock().await;
        if !entry.job.state.is_settled() {
            debug!(input_id = %input_id, state = %entry.job.state, "Forced enqueue ignored");
            return EnqueueOutcome::Unchanged;
        }
        let transition = match entry.job.reset() {
            Ok(t) => t,
            Err(_) => return EnqueueOutcome::Unchanged,
        };
        entry.cancel = CancellationToken::new();
        drop(entry);

        info!(input_id = %input_id, "Job force re-enqueued");
        self.emit_transition(&transition);
        self.emit(HipmEvent::JobEnqueued {
            input_id: input_id.to_string(),
            forced: true,
            timestamp: Utc::now(),
        });
        EnqueueOutcome::Reset
    }

    /// Insert a job loaded from persistence, keeping its enqueue position
    ///
    /// Replaces any job with the same id. Callers restore in enqueue order.
    pub async fn restore(&self, job: BatchJob) {
        let input_id = job.input_id.clone();
        self.next_seq.fetch_max(job.enqueue_seq + 1, Ordering::SeqCst);

        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&input_id) {
            inner.order.push(input_id.clone());
        }
        inner.jobs.insert(
            input_id,
            Arc::new(JobSlot {
                entry: Mutex::new(JobEntry {
                    job,
                    cancel: CancellationToken::new(),
                }),
            }),
        );
    }

    async fn apply<F>(&self, input_id: &str, op: F) -> Result<StateTransition, RegistryError>
    where
        F: FnOnce(&mut BatchJob) -> Result<StateTransition, JobError>,
    {
        let slot = self.slot(input_id).await?;
        let mut entry = slot.entry.lock().await;
        let transition = op(&mut entry.job)?;
        drop(entry);
        self.emit_transition(&transition);
        Ok(transition)
    }

    /// pending → running
    ///
    /// Returns the job's cancellation token for the attempt.
    pub async fn start(
        &self,
        input_id: &str,
    ) -> Result<(StateTransition, CancellationToken), RegistryError> {
        let slot = self.slot(input_id).await?;
        let mut entry = slot.entry.lock().await;
        let transition = entry.job.start()?;
        let token = entry.cancel.clone();
        drop(entry);
        self.emit_transition(&transition);
        Ok((transition, token))
    }

    /// running → completed
    pub async fn succeed(
        &self,
        input_id: &str,
        record: MetricRecord,
    ) -> Result<StateTransition, RegistryError> {
        let critical = record.critical_error();
        let transition = self.apply(input_id, |job| job.succeed(record)).await?;
        self.emit(HipmEvent::JobCompleted {
            input_id: input_id.to_string(),
            critical,
            timestamp: transition.transitioned_at,
        });
        Ok(transition)
    }

    /// running → failed
    pub async fn fail(
        &self,
        input_id: &str,
        error: JobError,
        partial: Option<MetricRecord>,
    ) -> Result<StateTransition, RegistryError> {
        self.apply(input_id, |job| job.fail(error, partial)).await
    }

    /// failed → pending
    pub async fn retry(&self, input_id: &str) -> Result<StateTransition, RegistryError> {
        self.apply(input_id, BatchJob::retry).await
    }

    /// failed → dead | dead_with_results
    pub async fn exhaust(&self, input_id: &str) -> Result<StateTransition, RegistryError> {
        self.apply(input_id, BatchJob::exhaust).await
    }

    /// Snapshot of one job
    pub async fn status(&self, input_id: &str) -> Option<BatchJob> {
        let slot = self.slot(input_id).await.ok()?;
        let entry = slot.entry.lock().await;
        Some(entry.job.clone())
    }

    /// Current state of one job
    pub async fn state(&self, input_id: &str) -> Option<JobState> {
        self.status(input_id).await.map(|job| job.state)
    }

    /// Snapshots in enqueue order, optionally restricted to one state
    pub async fn list(&self, filter: Option<JobState>) -> Vec<BatchJob> {
        let slots: Vec<Arc<JobSlot>> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.jobs.get(id).cloned())
                .collect()
        };

        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            let entry = slot.entry.lock().await;
            if filter.map_or(true, |state| entry.job.state == state) {
                jobs.push(entry.job.clone());
            }
        }
        jobs
    }

    /// Ids of pending jobs in enqueue order
    pub async fn pending_ids(&self) -> Vec<String> {
        self.list(Some(JobState::Pending))
            .await
            .into_iter()
            .map(|job| job.input_id)
            .collect()
    }

    /// Per-state job counts
    pub async fn counts(&self) -> HashMap<JobState, usize> {
        let mut counts = HashMap::new();
        for job in self.list(None).await {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        counts
    }

    /// Remove a job that no worker owns
    pub async fn purge(&self, input_id: &str) -> Result<BatchJob, RegistryError> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .jobs
            .get(input_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownJob(input_id.to_string()))?;
        let entry = slot.entry.lock().await;
        if entry.job.state == JobState::Running {
            return Err(RegistryError::Running(input_id.to_string()));
        }
        let job = entry.job.clone();
        drop(entry);

        inner.jobs.remove(input_id);
        inner.order.retain(|id| id != input_id);
        info!(input_id = %input_id, state = %job.state, "Job purged");
        Ok(job)
    }

    /// Request cooperative cancellation of one job
    ///
    /// A running attempt stops at its next checkpoint; a pending job fails
    /// as soon as it is started.
    pub async fn cancel(&self, input_id: &str) -> Result<(), RegistryError> {
        let slot = self.slot(input_id).await?;
        let entry = slot.entry.lock().await;
        entry.cancel.cancel();
        info!(input_id = %input_id, state = %entry.job.state, "Job cancellation requested");
        Ok(())
    }

    /// Cancel every job that has not settled
    pub async fn cancel_all(&self) {
        let slots: Vec<Arc<JobSlot>> = self.inner.read().await.jobs.values().cloned().collect();
        for slot in slots {
            let entry = slot.entry.lock().await;
            if !entry.job.state.is_settled() {
                entry.cancel.cancel();
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
