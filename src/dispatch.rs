use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use sqlx::PgPool;
use uuid::Uuid;

use crate::completion;
use crate::db;
use crate::eligibility;
use crate::ledger::{AttemptRecorded, ReminderAttempt, ReminderLedger};
use crate::mailer::MailGateway;
use crate::message;
use crate::models::{OccurrenceRecord, ReminderCandidate, ReminderOutcome, RunReport};
use crate::score::ScoringPolicy;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Treat previously failed attempts as not-yet-notified.
    pub retry_failed: bool,
    /// Cap on concurrent mail gateway calls.
    pub max_in_flight: usize,
    /// Availability guard around each gateway call; a timeout is recorded
    /// as a failed attempt.
    pub send_timeout: Duration,
    pub scoring: ScoringPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retry_failed: false,
            max_in_flight: 4,
            send_timeout: Duration::from_secs(10),
            scoring: ScoringPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchCounts {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum CandidateOutcome {
    Sent,
    Failed,
    Skipped,
}

/// Drives one reminder pass: completed occurrences in, emails and ledger
/// rows out. Re-entrant; overlapping invocations are tolerated because the
/// ledger, not the caller, enforces at-most-once delivery.
pub struct Dispatcher<G, L> {
    gateway: G,
    ledger: L,
    settings: DispatchSettings,
}

impl<G: MailGateway, L: ReminderLedger> Dispatcher<G, L> {
    pub fn new(gateway: G, ledger: L, settings: DispatchSettings) -> Self {
        Self {
            gateway,
            ledger,
            settings,
        }
    }

    /// One full pass over occurrences whose last validity window closed
    /// within the lookback. The lookback only bounds the scan; idempotence
    /// comes from the ledger, so generous overlap between runs is safe.
    pub async fn run(&self, pool: &PgPool, lookback_minutes: i64) -> anyhow::Result<RunReport> {
        // An unreachable gateway means "could not even attempt": abort with
        // zero progress instead of writing a failed row for every candidate.
        self.gateway
            .verify()
            .await
            .context("mail gateway unreachable, aborting run")?;

        let now = Utc::now();
        let occurrences = db::fetch_recently_completed(pool, now, lookback_minutes).await?;
        let mut report = RunReport::default();

        for occurrence in &occurrences {
            if !completion::is_complete(occurrence, now) {
                tracing::warn!(
                    occurrence_id = %occurrence.id,
                    "occurrence is missing closed windows, skipping"
                );
                continue;
            }

            tracing::debug!(
                occurrence_id = %occurrence.id,
                week = occurrence.week_number,
                session = occurrence.session_type.as_db(),
                closed_at = ?completion::latest_window_end(occurrence),
                "processing completed occurrence"
            );

            let candidates = match self.collect_candidates(pool, occurrence, now).await {
                Ok(Some(candidates)) => candidates,
                Ok(None) => continue,
                Err(error) => {
                    tracing::error!(
                        occurrence_id = %occurrence.id,
                        error = %error,
                        "failed to evaluate occurrence, continuing with the rest"
                    );
                    continue;
                }
            };

            let counts = self.dispatch_candidates(occurrence, candidates).await;
            report.occurrences_processed += 1;
            report.emails_sent += counts.sent;
            report.emails_failed += counts.failed;
            report.already_notified += counts.skipped;
        }

        tracing::info!(
            occurrences = report.occurrences_processed,
            sent = report.emails_sent,
            failed = report.emails_failed,
            already_notified = report.already_notified,
            "reminder run finished"
        );

        Ok(report)
    }

    /// Load everything the evaluator needs for one occurrence. Returns
    /// `None` for data errors that should skip the occurrence without
    /// aborting the run.
    async fn collect_candidates(
        &self,
        pool: &PgPool,
        occurrence: &OccurrenceRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Vec<ReminderCandidate>>> {
        let course = db::fetch_course(pool, occurrence.course_id).await?;
        let Some(threshold) = course.required_threshold else {
            tracing::warn!(
                course = %course.code,
                occurrence_id = %occurrence.id,
                "course has no attendance threshold configured, skipping occurrence"
            );
            return Ok(None);
        };

        let roster = db::fetch_roster(pool, course.id).await?;
        let closed = db::fetch_closed_occurrences(pool, course.id, now).await?;
        let closed_ids: Vec<Uuid> = closed.iter().map(|record| record.id).collect();
        let checkins = db::fetch_checkins(pool, &closed_ids).await?;

        Ok(Some(eligibility::evaluate(
            self.settings.scoring,
            &course,
            threshold,
            occurrence,
            &closed,
            &roster,
            &checkins,
        )))
    }

    /// Send-and-record for every candidate of one occurrence, with bounded
    /// concurrency. Failures stay per-candidate; the rest of the batch is
    /// always attempted.
    pub async fn dispatch_candidates(
        &self,
        occurrence: &OccurrenceRecord,
        candidates: Vec<ReminderCandidate>,
    ) -> DispatchCounts {
        let outcomes: Vec<CandidateOutcome> = stream::iter(candidates)
            .map(|candidate| self.process_candidate(occurrence, candidate))
            .buffer_unordered(self.settings.max_in_flight.max(1))
            .collect()
            .await;

        let mut counts = DispatchCounts::default();
        for outcome in outcomes {
            match outcome {
                CandidateOutcome::Sent => counts.sent += 1,
                CandidateOutcome::Failed => counts.failed += 1,
                CandidateOutcome::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    async fn process_candidate(
        &self,
        occurrence: &OccurrenceRecord,
        candidate: ReminderCandidate,
    ) -> CandidateOutcome {
        // The at-most-once check happens immediately before the send; the
        // narrow window between overlapping runs is accepted and surfaced by
        // the ledger's unique key below.
        match self
            .ledger
            .already_notified(candidate.student_id, occurrence.id, self.settings.retry_failed)
            .await
        {
            Ok(true) => return CandidateOutcome::Skipped,
            Ok(false) => {}
            Err(error) => {
                tracing::error!(
                    student = %candidate.student_email,
                    occurrence_id = %occurrence.id,
                    error = %error,
                    "could not read the reminder ledger, not sending"
                );
                return CandidateOutcome::Skipped;
            }
        }

        let rendered = message::render(&candidate);
        let outcome =
            match tokio::time::timeout(self.settings.send_timeout, self.gateway.send(&rendered))
                .await
            {
                Ok(Ok(_)) => {
                    tracing::info!(
                        student = %candidate.student_email,
                        occurrence_id = %occurrence.id,
                        "reminder sent"
                    );
                    ReminderOutcome::Sent
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        student = %candidate.student_email,
                        occurrence_id = %occurrence.id,
                        error = %error,
                        "reminder send failed"
                    );
                    ReminderOutcome::Failed
                }
                Err(_) => {
                    tracing::warn!(
                        student = %candidate.student_email,
                        occurrence_id = %occurrence.id,
                        "reminder send timed out"
                    );
                    ReminderOutcome::Failed
                }
            };

        // Record even when the send failed; a failed attempt must not be
        // silently retried forever.
        let attempt = ReminderAttempt {
            student_id: candidate.student_id,
            occurrence_id: occurrence.id,
            outcome,
            subject_line: rendered.subject.clone(),
            attempted_at: Utc::now(),
        };
        match self.ledger.record_attempt(&attempt).await {
            Ok(AttemptRecorded::Recorded) => {}
            Ok(AttemptRecorded::AlreadyRecorded) => {
                tracing::warn!(
                    student = %candidate.student_email,
                    occurrence_id = %occurrence.id,
                    "a concurrent run already recorded this reminder"
                );
            }
            Err(error) => {
                tracing::error!(
                    student = %candidate.student_email,
                    occurrence_id = %occurrence.id,
                    error = %error,
                    "failed to record reminder attempt"
                );
            }
        }

        match outcome {
            ReminderOutcome::Sent => CandidateOutcome::Sent,
            ReminderOutcome::Failed => CandidateOutcome::Failed,
        }
    }
}
