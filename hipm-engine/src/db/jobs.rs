//! Batch job persistence

use chrono::{DateTime, Utc};
use hipm_common::{Error, Result};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::batch::{BatchJob, JobRegistry, JobState};

/// Insert or update one job
pub async fn save_job(pool: &SqlitePool, job: &BatchJob) -> Result<()> {
    let last_error = job.last_error.as_ref().map(serde_json::to_string).transpose()?;
    let record = job.record.as_ref().map(serde_json::to_string).transpose()?;
    let partial_record = job
        .partial_record
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let history = serde_json::to_string(&job.history)?;
    let enqueue_seq = i64::try_from(job.enqueue_seq)
        .map_err(|_| Error::InvalidInput(format!("enqueue_seq out of range: {}", job.enqueue_seq)))?;

    sqlx::query(
        r#"
        INSERT INTO batch_jobs (
            input_id, state, attempts, last_error, record, partial_record,
            history, enqueue_seq, enqueued_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(input_id) DO UPDATE SET
            state = excluded.state,
            attempts = excluded.attempts,
            last_error = excluded.last_error,
            record = excluded.record,
            partial_record = excluded.partial_record,
            history = excluded.history,
            enqueue_seq = excluded.enqueue_seq,
            enqueued_at = excluded.enqueued_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&job.input_id)
    .bind(job.state.as_str())
    .bind(i64::from(job.attempts))
    .bind(&last_error)
    .bind(&record)
    .bind(&partial_record)
    .bind(&history)
    .bind(enqueue_seq)
    .bind(job.enqueued_at.to_rfc3339())
    .bind(job.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one job by input id
pub async fn load_job(pool: &SqlitePool, input_id: &str) -> Result<Option<BatchJob>> {
    let row = sqlx::query(
        r#"
        SELECT input_id, state, attempts, last_error, record, partial_record,
               history, enqueue_seq, enqueued_at, updated_at
        FROM batch_jobs
        WHERE input_id = ?
        "#,
    )
    .bind(input_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| job_from_row(&row)).transpose()
}

/// Load all jobs in enqueue order
pub async fn load_jobs(pool: &SqlitePool) -> Result<Vec<BatchJob>> {
    let rows = sqlx::query(
        r#"
        SELECT input_id, state, attempts, last_error, record, partial_record,
               history, enqueue_seq, enqueued_at, updated_at
        FROM batch_jobs
        ORDER BY enqueue_seq ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Delete one job; returns whether a row existed
pub async fn delete_job(pool: &SqlitePool, input_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM batch_jobs WHERE input_id = ?")
        .bind(input_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Save every job of the registry
pub async fn persist_registry(pool: &SqlitePool, registry: &JobRegistry) -> Result<usize> {
    let jobs = registry.list(None).await;
    for job in &jobs {
        save_job(pool, job).await?;
    }
    tracing::debug!(jobs = jobs.len(), "Registry persisted");
    Ok(jobs.len())
}

/// Load every persisted job into the registry
pub async fn restore_registry(pool: &SqlitePool, registry: &JobRegistry) -> Result<usize> {
    let jobs = load_jobs(pool).await?;
    let count = jobs.len();
    for job in jobs {
        registry.restore(job).await;
    }
    Ok(count)
}

fn job_from_row(row: &SqliteRow) -> Result<BatchJob> {
    let state: String = row.get("state");
    let state: JobState = state
        .parse()
        .map_err(|e: String| Error::Internal(format!("Failed to parse state: {}", e)))?;

    let attempts: i64 = row.get("attempts");
    let enqueue_seq: i64 = row.get("enqueue_seq");

    Ok(BatchJob {
        input_id: row.get("input_id"),
        state,
        attempts: u32::try_from(attempts)
            .map_err(|_| Error::Internal(format!("Invalid attempts: {}", attempts)))?,
        last_error: optional_json(row, "last_error")?,
        record: optional_json(row, "record")?,
        partial_record: optional_json(row, "partial_record")?,
        history: serde_json::from_str(&row.get::<String, _>("history"))?,
        enqueue_seq: u64::try_from(enqueue_seq)
            .map_err(|_| Error::Internal(format!("Invalid enqueue_seq: {}", enqueue_seq)))?,
        enqueued_at: timestamp(row, "enqueued_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn optional_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let value: Option<String> = row.get(column);
    Ok(value.map(|s| serde_json::from_str(&s)).transpose()?)
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
