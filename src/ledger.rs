use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::ReminderOutcome;

/// One attempt to notify a (student, occurrence) pair.
#[derive(Debug, Clone)]
pub struct ReminderAttempt {
    pub student_id: Uuid,
    pub occurrence_id: Uuid,
    pub outcome: ReminderOutcome,
    pub subject_line: String,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptRecorded {
    /// A row was written (fresh insert, or a failed attempt overwritten).
    Recorded,
    /// A concurrent run already holds a final row for this pair.
    AlreadyRecorded,
}

/// Durable record of which reminders have been attempted. The ledger is
/// passive: at-most-once sending is the dispatcher's job, done by checking
/// `already_notified` immediately before each send.
#[async_trait]
pub trait ReminderLedger: Send + Sync {
    /// Whether this pair counts as notified. A failed attempt counts unless
    /// `retry_failed` treats failures as retryable; a success always counts.
    async fn already_notified(
        &self,
        student_id: Uuid,
        occurrence_id: Uuid,
        retry_failed: bool,
    ) -> anyhow::Result<bool>;

    /// Record the outcome of one attempt. Rows are insert-only from the
    /// outside; a second call for the same pair may only overwrite a failed
    /// outcome, never a success.
    async fn record_attempt(&self, attempt: &ReminderAttempt) -> anyhow::Result<AttemptRecorded>;
}

#[async_trait]
impl<T: ReminderLedger + ?Sized> ReminderLedger for std::sync::Arc<T> {
    async fn already_notified(
        &self,
        student_id: Uuid,
        occurrence_id: Uuid,
        retry_failed: bool,
    ) -> anyhow::Result<bool> {
        (**self)
            .already_notified(student_id, occurrence_id, retry_failed)
            .await
    }

    async fn record_attempt(&self, attempt: &ReminderAttempt) -> anyhow::Result<AttemptRecorded> {
        (**self).record_attempt(attempt).await
    }
}

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReminderLedger for PgLedger {
    async fn already_notified(
        &self,
        student_id: Uuid,
        occurrence_id: Uuid,
        retry_failed: bool,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT outcome FROM attendance.reminders \
             WHERE student_id = $1 AND occurrence_id = $2",
        )
        .bind(student_id)
        .bind(occurrence_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => false,
            Some(row) => {
                let outcome: String = row.get("outcome");
                outcome == "sent" || !retry_failed
            }
        })
    }

    async fn record_attempt(&self, attempt: &ReminderAttempt) -> anyhow::Result<AttemptRecorded> {
        // The unique key on (student_id, occurrence_id) turns a duplicate
        // attempt into a no-op instead of a second audit row; only rows that
        // recorded a failure may be overwritten.
        let result = sqlx::query(
            r#"
            INSERT INTO attendance.reminders
            (id, student_id, occurrence_id, outcome, subject_line, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id, occurrence_id) DO UPDATE
            SET outcome = EXCLUDED.outcome,
                subject_line = EXCLUDED.subject_line,
                attempted_at = EXCLUDED.attempted_at
            WHERE attendance.reminders.outcome = 'failed'
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt.student_id)
        .bind(attempt.occurrence_id)
        .bind(attempt.outcome.as_db())
        .bind(&attempt.subject_line)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(AttemptRecorded::Recorded)
        } else {
            Ok(AttemptRecorded::AlreadyRecorded)
        }
    }
}
