//! Batch job state machine
//!
//! pending → running → completed
//!                   ↘ failed → pending (retry)
//!                            → dead | dead_with_results (retries exhausted)
//!
//! Settled jobs (completed, failed, dead, dead_with_results) return to
//! pending only through a forced re-enqueue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::record::MetricRecord;

/// Batch job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker
    Pending,
    /// A worker owns the job
    Running,
    /// Record available
    Completed,
    /// Last attempt failed
    Failed,
    /// Retries exhausted, nothing usable
    Dead,
    /// Retries exhausted, a partial record survives
    DeadWithResults,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Pending,
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
        JobState::DeadWithResults,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
            JobState::DeadWithResults => "dead_with_results",
        }
    }

    /// No worker will pick the job up without outside intervention
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Dead | JobState::DeadWithResults
        )
    }

    /// Whether the orchestrator may move a job from `self` to `to`
    ///
    /// Forced re-enqueue is not covered here; see [`BatchJob::reset`].
    pub fn can_transition_to(&self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Pending)
                | (Failed, Dead)
                | (Failed, DeadWithResults)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown job state '{}'", s))
    }
}

/// One committed state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub input_id: String,
    pub old_state: JobState,
    pub new_state: JobState,
    /// Attempt number at the time of the transition
    pub attempt: u32,
    pub error: Option<String>,
    pub transitioned_at: DateTime<Utc>,
}

/// Transitions kept per job; older ones are dropped first
pub const MAX_HISTORY: usize = 64;

/// One unit of batch work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Input reference (file path or identifier), unique within a registry
    pub input_id: String,
    pub state: JobState,
    /// Attempts started since creation or the last forced re-enqueue
    pub attempts: u32,
    pub last_error: Option<JobError>,
    /// Set once completed
    pub record: Option<MetricRecord>,
    /// Best record captured by a failed attempt
    pub partial_record: Option<MetricRecord>,
    /// Most recent transitions, at most [`MAX_HISTORY`]
    pub history: Vec<StateTransition>,
    /// Position in the registry's enqueue order
    pub enqueue_seq: u64,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(input_id: impl Into<String>, enqueue_seq: u64) -> Self {
        let now = Utc::now();
        Self {
            input_id: input_id.into(),
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            record: None,
            partial_record: None,
            history: Vec::new(),
            enqueue_seq,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Move to `new_state` if the transition table allows it
    pub fn transition_to(&mut self, new_state: JobState) -> Result<StateTransition, JobError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }
        Ok(self.commit(new_state))
    }

    fn commit(&mut self, new_state: JobState) -> StateTransition {
        let now = Utc::now();
        let error = match new_state {
            JobState::Failed => self.last_error.as_ref().map(|e| e.to_string()),
            _ => None,
        };
        let transition = StateTransition {
            input_id: self.input_id.clone(),
            old_state: self.state,
            new_state,
            attempt: self.attempts,
            error,
            transitioned_at: now,
        };
        self.state = new_state;
        self.updated_at = now;
        self.history.push(transition.clone());
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        transition
    }

    /// pending → running; counts an attempt
    pub fn start(&mut self) -> Result<StateTransition, JobError> {
        self.check(JobState::Running)?;
        self.attempts += 1;
        Ok(self.commit(JobState::Running))
    }

    /// running → completed
    pub fn succeed(&mut self, record: MetricRecord) -> Result<StateTransition, JobError> {
        self.check(JobState::Completed)?;
        self.record = Some(record);
        self.partial_record = None;
        self.last_error = None;
        Ok(self.commit(JobState::Completed))
    }

    /// running → failed
    ///
    /// A partial record replaces an earlier one; `None` keeps what an
    /// earlier attempt captured.
    pub fn fail(
        &mut self,
        error: JobError,
        partial: Option<MetricRecord>,
    ) -> Result<StateTransition, JobError> {
        self.check(JobState::Failed)?;
        self.last_error = Some(error);
        if partial.is_some() {
            self.partial_record = partial;
        }
        Ok(self.commit(JobState::Failed))
    }

    /// failed → pending
    pub fn retry(&mut self) -> Result<StateTransition, JobError> {
        self.transition_to(JobState::Pending)
    }

    /// failed → dead or dead_with_results
    pub fn exhaust(&mut self) -> Result<StateTransition, JobError> {
        let target = if self.partial_record.is_some() {
            JobState::DeadWithResults
        } else {
            JobState::Dead
        };
        self.transition_to(target)
    }

    /// Forced re-enqueue: settled → pending with a fresh attempt budget
    pub fn reset(&mut self) -> Result<StateTransition, JobError> {
        if !self.state.is_settled() {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to: JobState::Pending,
            });
        }
        self.attempts = 0;
        self.last_error = None;
        self.record = None;
        self.partial_record = None;
        Ok(self.commit(JobState::Pending))
    }

    /// Record available to callers: the full one, else the partial one of a
    /// dead job
    pub fn result(&self) -> Option<&MetricRecord> {
        match self.state {
            JobState::Completed => self.record.as_ref(),
            JobState::DeadWithResults => self.partial_record.as_ref(),
            _ => None,
        }
    }

    fn check(&self, to: JobState) -> Result<(), JobError> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }
}
