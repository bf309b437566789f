//! The petition processing pipeline:
//! extract → classify → dedup gate → route → record.

pub mod classifier;
pub mod extractor;
pub mod fingerprint;
pub mod processor;
pub mod recorder;
pub mod router;
pub mod types;

pub use classifier::Classifier;
pub use extractor::Extractor;
pub use fingerprint::{DedupGate, Fingerprint, GateDecision};
pub use processor::PetitionPipeline;
pub use recorder::{OutcomeRecorder, RecordMeta};
pub use router::ExecutionRouter;
pub use types::{
    ActionTarget, ActionType, AttemptOutcome, Category, Classification, ContactMailer,
    MessageSource, PassSummary, PetitionCandidate, RawMessage, SkipReason,
};
