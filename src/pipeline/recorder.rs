//! Outcome recorder — the single writer of `ProcessingRecord`s.
//!
//! The recorder and the dedup gate agree on fingerprint semantics by
//! construction: both operate on the same store keyed by the same
//! `Fingerprint`. Writes are idempotent per invocation, and terminal
//! statuses are never downgraded by the pipeline.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::{AttemptOutcome, SkipReason};
use crate::store::{ProcessingRecord, RecordStatus, RecordStore};

/// Identity fields for creating a record on first sighting.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub fingerprint: String,
    pub message_id: String,
    pub subject: String,
    pub target: String,
    pub category: String,
}

/// Persists attempt outcomes against the record store.
pub struct OutcomeRecorder {
    store: Arc<dyn RecordStore>,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Mark an attempt in flight before the Router runs.
    ///
    /// Creates the record on first sighting; otherwise moves it to
    /// `Processing` with the new attempt number. This is the write the
    /// gate's race check observes.
    pub async fn begin_attempt(&self, meta: &RecordMeta, attempt: u32) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let existing = self.store.get_record(&meta.fingerprint).await?;

        if let Some(ref record) = existing {
            if record.status.is_terminal() {
                // The gate should have stopped this sighting already.
                warn!(
                    fingerprint = %meta.fingerprint,
                    status = record.status.as_str(),
                    "Refusing to reopen a terminal record"
                );
                return Ok(());
            }
        }

        let record = ProcessingRecord {
            fingerprint: meta.fingerprint.clone(),
            // Keep the first-sighting back-reference.
            message_id: existing
                .as_ref()
                .map(|r| r.message_id.clone())
                .unwrap_or_else(|| meta.message_id.clone()),
            subject: meta.subject.clone(),
            target: meta.target.clone(),
            category: meta.category.clone(),
            status: RecordStatus::Processing,
            attempt_count: attempt,
            last_error: existing.as_ref().and_then(|r| r.last_error.clone()),
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.store.upsert_record(&record).await
    }

    /// Record the final status of an attempt.
    pub async fn finish_attempt(
        &self,
        fingerprint: &str,
        outcome: &AttemptOutcome,
    ) -> Result<(), DatabaseError> {
        let Some(mut record) = self.store.get_record(fingerprint).await? else {
            return Err(DatabaseError::NotFound {
                entity: "processing_record".into(),
                id: fingerprint.into(),
            });
        };

        let (status, note) = match outcome {
            AttemptOutcome::Succeeded { detail } => (RecordStatus::Succeeded, Some(detail.clone())),
            AttemptOutcome::ManuallyDeferred => (
                RecordStatus::Succeeded,
                Some("manually deferred (automation disabled)".to_string()),
            ),
            AttemptOutcome::TransientFailure { error } => (RecordStatus::Failed, Some(error.clone())),
            AttemptOutcome::StructuralFailure { error } => (
                RecordStatus::Skipped,
                Some(format!("structural failure: {error}; needs manual review")),
            ),
        };

        if record.status.is_terminal() && record.status != status {
            warn!(
                fingerprint = %fingerprint,
                from = record.status.as_str(),
                to = status.as_str(),
                "Ignoring downgrade of a terminal record"
            );
            return Ok(());
        }

        debug!(
            fingerprint = %fingerprint,
            status = status.as_str(),
            attempt = record.attempt_count,
            "Recording attempt outcome"
        );

        record.status = status;
        record.last_error = note;
        record.updated_at = Utc::now();
        self.store.upsert_record(&record).await
    }

    /// Record a terminal skip (complex, not-a-petition, retry ceiling).
    ///
    /// Idempotent: re-recording a skip for an already-skipped fingerprint
    /// only refreshes `updated_at`.
    pub async fn record_skip(&self, meta: &RecordMeta, reason: &SkipReason) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let existing = self.store.get_record(&meta.fingerprint).await?;

        if let Some(ref record) = existing {
            if record.status == RecordStatus::Succeeded {
                // Never downgrade a success.
                return Ok(());
            }
        }

        let record = ProcessingRecord {
            fingerprint: meta.fingerprint.clone(),
            message_id: existing
                .as_ref()
                .map(|r| r.message_id.clone())
                .unwrap_or_else(|| meta.message_id.clone()),
            subject: meta.subject.clone(),
            target: meta.target.clone(),
            category: meta.category.clone(),
            status: RecordStatus::Skipped,
            attempt_count: existing.as_ref().map(|r| r.attempt_count).unwrap_or(0),
            last_error: Some(reason.note()),
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.store.upsert_record(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;

    fn meta(fingerprint: &str) -> RecordMeta {
        RecordMeta {
            fingerprint: fingerprint.into(),
            message_id: "msg-1".into(),
            subject: "Sign now".into(),
            target: "https://p.example/sign".into(),
            category: "simple_signon".into(),
        }
    }

    async fn recorder() -> (OutcomeRecorder, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        (OutcomeRecorder::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn begin_attempt_creates_processing_record() {
        let (recorder, store) = recorder().await;
        recorder.begin_attempt(&meta("fp-1"), 1).await.unwrap();

        let record = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Processing);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.message_id, "msg-1");
    }

    #[tokio::test]
    async fn begin_attempt_preserves_first_sighting_identity() {
        let (recorder, store) = recorder().await;
        recorder.begin_attempt(&meta("fp-1"), 1).await.unwrap();
        recorder
            .finish_attempt("fp-1", &AttemptOutcome::TransientFailure { error: "timeout".into() })
            .await
            .unwrap();

        let mut second = meta("fp-1");
        second.message_id = "msg-2".into();
        recorder.begin_attempt(&second, 2).await.unwrap();

        let record = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(record.message_id, "msg-1");
        assert_eq!(record.attempt_count, 2);
        let created = record.created_at;

        // created_at survives every later write
        recorder
            .finish_attempt("fp-1", &AttemptOutcome::Succeeded { detail: "ok".into() })
            .await
            .unwrap();
        let record = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(record.created_at, created);
    }

    #[tokio::test]
    async fn finish_attempt_maps_outcomes_to_statuses() {
        let (recorder, store) = recorder().await;

        recorder.begin_attempt(&meta("fp-ok"), 1).await.unwrap();
        recorder
            .finish_attempt("fp-ok", &AttemptOutcome::Succeeded { detail: "filled 4".into() })
            .await
            .unwrap();
        assert_eq!(
            store.get_record("fp-ok").await.unwrap().unwrap().status,
            RecordStatus::Succeeded
        );

        recorder.begin_attempt(&meta("fp-deferred"), 1).await.unwrap();
        recorder
            .finish_attempt("fp-deferred", &AttemptOutcome::ManuallyDeferred)
            .await
            .unwrap();
        let deferred = store.get_record("fp-deferred").await.unwrap().unwrap();
        assert_eq!(deferred.status, RecordStatus::Succeeded);
        assert!(deferred.last_error.unwrap().contains("manually deferred"));

        recorder.begin_attempt(&meta("fp-failed"), 1).await.unwrap();
        recorder
            .finish_attempt("fp-failed", &AttemptOutcome::TransientFailure { error: "timeout".into() })
            .await
            .unwrap();
        let failed = store.get_record("fp-failed").await.unwrap().unwrap();
        assert_eq!(failed.status, RecordStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("timeout"));

        recorder.begin_attempt(&meta("fp-structural"), 1).await.unwrap();
        recorder
            .finish_attempt(
                "fp-structural",
                &AttemptOutcome::StructuralFailure { error: "no submit control".into() },
            )
            .await
            .unwrap();
        let skipped = store.get_record("fp-structural").await.unwrap().unwrap();
        assert_eq!(skipped.status, RecordStatus::Skipped);
        assert!(skipped.last_error.unwrap().contains("manual review"));
    }

    #[tokio::test]
    async fn terminal_status_is_never_downgraded() {
        let (recorder, store) = recorder().await;
        recorder.begin_attempt(&meta("fp-1"), 1).await.unwrap();
        recorder
            .finish_attempt("fp-1", &AttemptOutcome::Succeeded { detail: "ok".into() })
            .await
            .unwrap();

        // A late failure report must not overwrite the success.
        recorder
            .finish_attempt("fp-1", &AttemptOutcome::TransientFailure { error: "late".into() })
            .await
            .unwrap();
        let record = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Succeeded);
        assert_eq!(record.last_error.as_deref(), Some("ok"));

        // And begin_attempt refuses to reopen it.
        recorder.begin_attempt(&meta("fp-1"), 2).await.unwrap();
        let record = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Succeeded);
        assert_eq!(record.attempt_count, 1);
    }

    #[tokio::test]
    async fn record_skip_is_idempotent() {
        let (recorder, store) = recorder().await;
        let reason = SkipReason::Complex { rule: "survey-markers" };

        recorder.record_skip(&meta("fp-1"), &reason).await.unwrap();
        let first = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(first.status, RecordStatus::Skipped);
        assert_eq!(first.attempt_count, 0);

        recorder.record_skip(&meta("fp-1"), &reason).await.unwrap();
        let second = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(second.status, RecordStatus::Skipped);
        assert_eq!(second.attempt_count, 0);
        assert_eq!(second.last_error, first.last_error);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn record_skip_never_downgrades_success() {
        let (recorder, store) = recorder().await;
        recorder.begin_attempt(&meta("fp-1"), 1).await.unwrap();
        recorder
            .finish_attempt("fp-1", &AttemptOutcome::Succeeded { detail: "ok".into() })
            .await
            .unwrap();

        recorder
            .record_skip(&meta("fp-1"), &SkipReason::Duplicate)
            .await
            .unwrap();
        assert_eq!(
            store.get_record("fp-1").await.unwrap().unwrap().status,
            RecordStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn record_skip_at_ceiling_keeps_attempt_count() {
        let (recorder, store) = recorder().await;
        recorder.begin_attempt(&meta("fp-1"), 3).await.unwrap();
        recorder
            .finish_attempt("fp-1", &AttemptOutcome::TransientFailure { error: "timeout".into() })
            .await
            .unwrap();

        recorder
            .record_skip(&meta("fp-1"), &SkipReason::RetryCeiling { attempts: 3 })
            .await
            .unwrap();
        let record = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Skipped);
        assert_eq!(record.attempt_count, 3);
        assert!(record.last_error.unwrap().contains("manual review"));
    }

    #[tokio::test]
    async fn finish_attempt_without_begin_is_an_error() {
        let (recorder, _store) = recorder().await;
        let result = recorder
            .finish_attempt("fp-ghost", &AttemptOutcome::ManuallyDeferred)
            .await;
        assert!(result.is_err());
    }
}
