//! Pass orchestration: extract → classify → gate → route → record.
//!
//! One pass drains the message-source batch sequentially in arrival order
//! (the gate's read-then-write needs no locks that way), then re-drives
//! queued records below the retry ceiling. No candidate failure aborts the
//! pass, and each candidate's final record update is the last action taken
//! for it, so a pass may be aborted between candidates without corrupting
//! state.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::extractor::Extractor;
use crate::pipeline::fingerprint::{DedupGate, Fingerprint, GateDecision};
use crate::pipeline::recorder::{OutcomeRecorder, RecordMeta};
use crate::pipeline::router::ExecutionRouter;
use crate::pipeline::types::{
    ActionTarget, AttemptOutcome, Category, MessageSource, PassSummary, RawMessage, SkipReason,
};
use crate::store::{PetitionType, ProcessingRecord, RecordStore};

/// Max queued records re-driven per pass.
const RETRY_BATCH_LIMIT: usize = 10;

/// Pass-scoped state threaded through the stages. No process-wide mutable
/// singletons: everything a pass touches lives here or behind an `Arc`.
struct PassContext {
    pass_id: Uuid,
    petition_types: Vec<PetitionType>,
    /// Fingerprints already handled this pass; keeps the re-drive step from
    /// retrying a candidate within the same invocation.
    touched: HashSet<String>,
    summary: PassSummary,
}

/// The petition processing pipeline.
pub struct PetitionPipeline {
    store: Arc<dyn RecordStore>,
    extractor: Extractor,
    classifier: Classifier,
    gate: DedupGate,
    router: ExecutionRouter,
    recorder: OutcomeRecorder,
    retry_ceiling: u32,
}

impl PetitionPipeline {
    pub fn new(store: Arc<dyn RecordStore>, router: ExecutionRouter, retry_ceiling: u32) -> Self {
        Self {
            extractor: Extractor::new(),
            classifier: Classifier::default_rules(),
            gate: DedupGate::new(retry_ceiling),
            recorder: OutcomeRecorder::new(Arc::clone(&store)),
            store,
            router,
            retry_ceiling,
        }
    }

    /// Run one full pass: fetch a batch, process it in arrival order, then
    /// re-drive queued records from earlier passes.
    pub async fn run_pass(&self, source: &dyn MessageSource) -> Result<PassSummary, PipelineError> {
        let pass_id = Uuid::new_v4();

        // Snapshot the re-drive queue before processing the batch, so
        // failures from this pass wait for the next one.
        let queued = self
            .store
            .records_to_retry(self.retry_ceiling, RETRY_BATCH_LIMIT)
            .await?;

        let batch = source
            .fetch_new()
            .await
            .map_err(|e| PipelineError::SourceFetch(e.to_string()))?;

        let petition_types: Vec<PetitionType> = self
            .store
            .list_petition_types()
            .await?
            .into_iter()
            .filter(|pt| pt.enabled)
            .collect();

        let mut ctx = PassContext {
            pass_id,
            petition_types,
            touched: HashSet::new(),
            summary: PassSummary { fetched: batch.len(), ..Default::default() },
        };

        info!(
            pass = %ctx.pass_id,
            fetched = batch.len(),
            queued = queued.len(),
            "Pipeline pass started"
        );

        for msg in batch {
            self.process_message(msg, &mut ctx).await;
        }

        for record in queued {
            self.retry_record(record, &mut ctx).await;
        }

        info!(
            pass = %ctx.pass_id,
            succeeded = ctx.summary.succeeded,
            deferred = ctx.summary.deferred,
            skipped = ctx.summary.skipped,
            duplicates = ctx.summary.duplicates,
            failed = ctx.summary.failed,
            retried = ctx.summary.retried,
            "Pipeline pass complete"
        );

        Ok(ctx.summary)
    }

    /// Process one inbound message. Failures are absorbed into the summary;
    /// they never abort the pass.
    async fn process_message(&self, msg: RawMessage, ctx: &mut PassContext) {
        let candidate = self.extractor.extract(&msg);
        let classification = self.classifier.classify(&candidate);
        let fingerprint = Fingerprint::compute(&msg.sender, &candidate.target, &msg.subject);
        ctx.touched.insert(fingerprint.as_str().to_string());

        debug!(
            pass = %ctx.pass_id,
            message_id = %msg.message_id,
            category = classification.category.as_str(),
            rule = classification.matched_rule,
            fingerprint = %fingerprint,
            "Candidate classified"
        );

        let decision = match self.gate.check(self.store.as_ref(), &fingerprint).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(fingerprint = %fingerprint, error = %e, "Gate lookup failed");
                ctx.summary.failed += 1;
                return;
            }
        };

        let meta = RecordMeta {
            fingerprint: fingerprint.as_str().to_string(),
            message_id: msg.message_id.clone(),
            subject: msg.subject.clone(),
            target: candidate.target.canonical(),
            category: classification.category.as_str().to_string(),
        };

        match decision {
            GateDecision::Duplicate { status } => {
                debug!(
                    fingerprint = %fingerprint,
                    status = status.as_str(),
                    "Duplicate petition; no new attempt"
                );
                ctx.summary.duplicates += 1;
            }
            GateDecision::InFlight => {
                debug!(fingerprint = %fingerprint, "Attempt already in flight; deferring");
                ctx.summary.duplicates += 1;
            }
            GateDecision::NeedsReview { attempts } => {
                let reason = SkipReason::RetryCeiling { attempts };
                if let Err(e) = self.recorder.record_skip(&meta, &reason).await {
                    error!(fingerprint = %fingerprint, error = %e, "Failed to record skip");
                    ctx.summary.failed += 1;
                } else {
                    ctx.summary.skipped += 1;
                }
            }
            GateDecision::Proceed { attempt } => {
                if classification.category.is_simple() {
                    self.execute_attempt(&meta, &candidate.target, classification.category, attempt, ctx)
                        .await;
                } else {
                    let reason = match classification.category {
                        Category::NotPetition => SkipReason::NotPetition,
                        _ => SkipReason::Complex { rule: classification.matched_rule },
                    };
                    if let Err(e) = self.recorder.record_skip(&meta, &reason).await {
                        error!(fingerprint = %fingerprint, error = %e, "Failed to record skip");
                        ctx.summary.failed += 1;
                    } else {
                        ctx.summary.skipped += 1;
                    }
                }
            }
        }
    }

    /// Re-drive one queued record from an earlier pass.
    async fn retry_record(&self, record: ProcessingRecord, ctx: &mut PassContext) {
        if ctx.touched.contains(&record.fingerprint) {
            // Already handled from the batch this pass; next pass picks it up.
            return;
        }
        ctx.touched.insert(record.fingerprint.clone());

        let Some(category) = Category::parse(&record.category) else {
            warn!(
                fingerprint = %record.fingerprint,
                category = %record.category,
                "Queued record has an unknown category; skipping"
            );
            return;
        };

        let meta = RecordMeta {
            fingerprint: record.fingerprint.clone(),
            message_id: record.message_id.clone(),
            subject: record.subject.clone(),
            target: record.target.clone(),
            category: record.category.clone(),
        };

        if !category.is_simple() {
            // An operator re-queued a complex/not-petition record; the
            // verdict does not change on retry.
            let reason = match category {
                Category::NotPetition => SkipReason::NotPetition,
                _ => SkipReason::Complex { rule: "fallback-complex" },
            };
            if self.recorder.record_skip(&meta, &reason).await.is_ok() {
                ctx.summary.skipped += 1;
            }
            return;
        }

        let target = rebuild_target(&record);
        let attempt = record.attempt_count + 1;
        ctx.summary.retried += 1;
        self.execute_attempt(&meta, &target, category, attempt, ctx).await;
    }

    /// One attempt: mark in flight, route, record the outcome.
    async fn execute_attempt(
        &self,
        meta: &RecordMeta,
        target: &ActionTarget,
        category: Category,
        attempt: u32,
        ctx: &mut PassContext,
    ) {
        if let Err(e) = self.recorder.begin_attempt(meta, attempt).await {
            error!(fingerprint = %meta.fingerprint, error = %e, "Failed to mark attempt in flight");
            ctx.summary.failed += 1;
            return;
        }

        let petition_type = match_petition_type(&ctx.petition_types, &meta.target);
        let outcome = self.router.execute(target, category, petition_type).await;

        info!(
            pass = %ctx.pass_id,
            fingerprint = %meta.fingerprint,
            category = category.as_str(),
            attempt,
            outcome = outcome.label(),
            "Attempt finished"
        );

        if let Err(e) = self.recorder.finish_attempt(&meta.fingerprint, &outcome).await {
            error!(fingerprint = %meta.fingerprint, error = %e, "Failed to record outcome");
            ctx.summary.failed += 1;
            return;
        }

        match outcome {
            AttemptOutcome::Succeeded { .. } => ctx.summary.succeeded += 1,
            AttemptOutcome::ManuallyDeferred => ctx.summary.deferred += 1,
            AttemptOutcome::TransientFailure { .. } => ctx.summary.failed += 1,
            AttemptOutcome::StructuralFailure { .. } => ctx.summary.skipped += 1,
        }
    }
}

/// First enabled petition type whose `url_pattern` is a substring of the
/// target.
fn match_petition_type<'a>(types: &'a [PetitionType], target: &str) -> Option<&'a PetitionType> {
    if target.is_empty() {
        return None;
    }
    types.iter().find(|pt| {
        pt.url_pattern
            .as_deref()
            .is_some_and(|pattern| !pattern.is_empty() && target.contains(pattern))
    })
}

/// Reconstruct the action target of a stored record for a re-drive.
fn rebuild_target(record: &ProcessingRecord) -> ActionTarget {
    if record.target.is_empty() {
        ActionTarget::None
    } else if let Some(address) = record.target.strip_prefix("mailto:") {
        ActionTarget::SenatorContact {
            address: address.to_string(),
            subject: record.subject.clone(),
        }
    } else {
        ActionTarget::SignUrl { url: record.target.clone() }
    }
}
