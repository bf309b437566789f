//! Browser signing capability.
//!
//! The pipeline sees a narrow interface: one request, one attempt, one
//! tagged result. All attempt-level conditions (timeout, missing submit
//! affordance) come back as `SignAttempt` variants rather than errors, so
//! the Router's branching is a plain match.

pub mod browser;
pub mod fields;

use std::time::Duration;

use async_trait::async_trait;

pub use browser::BrowserSigner;
pub use fields::{FormField, build_field_mapping, selectors_for};

use crate::error::SignerError;

/// One signing request: target page, fields to fill, time budget.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub url: String,
    pub fields: Vec<FormField>,
    pub timeout: Duration,
}

/// Tagged result of exactly one signing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignAttempt {
    /// Form submitted and a confirmation signal observed on the resulting
    /// page state.
    Submitted { filled: usize, confirmation: String },
    /// The time budget elapsed before a confirmation was observed.
    Timeout { budget: Duration },
    /// Navigation to the target did not complete.
    NavigationFailed { reason: String },
    /// None of the profile fields matched an input on the page.
    MissingFields,
    /// Submit was clicked but no confirmation signal appeared.
    NoConfirmation { filled: usize },
    /// The page has no recognizable submit affordance. Not retryable.
    NoSubmitControl,
}

impl SignAttempt {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Timeout { .. } => "timeout",
            Self::NavigationFailed { .. } => "navigation_failed",
            Self::MissingFields => "missing_fields",
            Self::NoConfirmation { .. } => "no_confirmation",
            Self::NoSubmitControl => "no_submit_control",
        }
    }
}

/// Browser automation boundary — a black box with bounded latency.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Run exactly one signing attempt. Never retries internally.
    async fn sign(&self, request: &SignRequest) -> Result<SignAttempt, SignerError>;
}
