//! Shared types for the petition processing pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

// ── Inbound message ─────────────────────────────────────────────────

/// Raw email record produced by the message source.
///
/// Immutable; passed by value into the pipeline. The source owns fetching
/// and decoding — by the time a `RawMessage` exists, headers are decoded and
/// the body is plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// RFC 5322 Message-ID (angle brackets stripped), or a generated id.
    pub message_id: String,
    /// Sender address.
    pub sender: String,
    /// Decoded subject line.
    pub subject: String,
    /// Plain-text body (HTML already stripped by the source).
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

// ── Petition candidate ──────────────────────────────────────────────

/// What kind of action the email asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A click-to-sign hyperlink.
    SignLink,
    /// Compose an email to a representative.
    EmailSenator,
    /// No recognizable structure — the not-a-petition sentinel.
    Unknown,
}

/// The extracted action target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionTarget {
    /// Petition page to open and sign.
    SignUrl { url: String },
    /// Representative contact to email.
    SenatorContact { address: String, subject: String },
    /// Nothing actionable found.
    None,
}

impl ActionTarget {
    /// Canonical string form, used for fingerprinting and record storage.
    pub fn canonical(&self) -> String {
        match self {
            Self::SignUrl { url } => url.clone(),
            Self::SenatorContact { address, .. } => format!("mailto:{address}"),
            Self::None => String::new(),
        }
    }
}

/// A parsed, not-yet-classified petition extracted from one email.
///
/// Created by the Extractor from exactly one `RawMessage`; never mutated
/// after creation. Holds a back-reference to the message, not ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionCandidate {
    pub message_id: String,
    pub action_type: ActionType,
    pub target: ActionTarget,
    /// Distinct non-tracking hyperlinks found in the body, in order of
    /// appearance. The classifier counts these.
    pub links: Vec<String>,
    /// Subject plus a bounded body preview.
    pub extracted_text: String,
}

// ── Classification ──────────────────────────────────────────────────

/// Pipeline category for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SimpleSignon,
    SimpleEmailSenator,
    Complex,
    NotPetition,
}

impl Category {
    /// DB string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleSignon => "simple_signon",
            Self::SimpleEmailSenator => "simple_email_senator",
            Self::Complex => "complex",
            Self::NotPetition => "not_petition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple_signon" => Some(Self::SimpleSignon),
            "simple_email_senator" => Some(Self::SimpleEmailSenator),
            "complex" => Some(Self::Complex),
            "not_petition" => Some(Self::NotPetition),
            _ => None,
        }
    }

    /// Simple categories are the only ones the Router will execute.
    pub fn is_simple(&self) -> bool {
        matches!(self, Self::SimpleSignon | Self::SimpleEmailSenator)
    }
}

/// Classifier verdict for a candidate. Derived, never stored on its own.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub category: Category,
    /// Name of the rule that matched (declaration order is the tie-break).
    pub matched_rule: &'static str,
    pub confidence: f32,
}

// ── Attempt outcomes ────────────────────────────────────────────────

/// Why a candidate was skipped without routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Category was Complex — deliberately left for a human.
    Complex { rule: &'static str },
    /// No petition structure found.
    NotPetition,
    /// Fingerprint already has a terminal record.
    Duplicate,
    /// Transient failures exhausted the retry ceiling.
    RetryCeiling { attempts: u32 },
}

impl SkipReason {
    pub fn note(&self) -> String {
        match self {
            Self::Complex { rule } => format!("complex petition (rule: {rule}); left for manual review"),
            Self::NotPetition => "no petition structure detected".to_string(),
            Self::Duplicate => "duplicate of an already-processed petition".to_string(),
            Self::RetryCeiling { attempts } => {
                format!("retry ceiling reached after {attempts} attempts; needs manual review")
            }
        }
    }
}

/// Result of one Router invocation — exactly one attempt.
///
/// All execution failures are converted into one of these at the Router
/// boundary; nothing escapes the pipeline uncaught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Submission confirmed (or contact mail handed to the relay).
    Succeeded { detail: String },
    /// Automation is disabled; recorded as succeeded-manually-deferred.
    ManuallyDeferred,
    /// Retryable: timeout, navigation error, transient send failure.
    TransientFailure { error: String },
    /// Not retryable: no submit affordance, template fields missing.
    StructuralFailure { error: String },
}

impl AttemptOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::ManuallyDeferred => "manually_deferred",
            Self::TransientFailure { .. } => "transient_failure",
            Self::StructuralFailure { .. } => "structural_failure",
        }
    }
}

// ── Pass summary ────────────────────────────────────────────────────

/// Counters for one pipeline pass, for logging and the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    pub fetched: usize,
    pub succeeded: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub retried: usize,
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Message source boundary — pure I/O, no petition logic.
///
/// One call yields the finite batch for one pass. No ordering guarantee
/// beyond "not yet seen".
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_new(&self) -> Result<Vec<RawMessage>, ChannelError>;
}

/// Outbound mail boundary for the senator-contact path.
#[async_trait]
pub trait ContactMailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError>;
}
