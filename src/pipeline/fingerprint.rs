//! Deduplication: stable petition fingerprints and the gate decision table.
//!
//! Two candidates with the same sender, normalized action target, and
//! normalized subject are the same petition, regardless of message_id or
//! arrival time. The gate consults the record store (the same store the
//! Outcome Recorder writes) and decides whether this sighting proceeds.

use sha2::{Digest, Sha256};

use crate::error::DatabaseError;
use crate::pipeline::types::ActionTarget;
use crate::store::{ProcessingRecord, RecordStatus, RecordStore};

/// Query parameters that carry tracking noise, not petition identity.
const TRACKING_PARAM_PREFIXES: &[&str] = &["utm_"];
const TRACKING_PARAMS: &[&str] = &["mc_cid", "mc_eid", "fbclid", "gclid", "source", "ref"];

/// Stable dedup key for one petition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint from sender + normalized target + subject.
    pub fn compute(sender: &str, target: &ActionTarget, subject: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_sender(sender));
        hasher.update(b"\n");
        hasher.update(normalize_target(target));
        hasher.update(b"\n");
        hasher.update(normalize_subject(subject));

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_sender(sender: &str) -> String {
    sender.trim().to_lowercase()
}

/// Lowercase, strip reply/forward prefixes, collapse whitespace.
fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim().to_lowercase();
    loop {
        let stripped = s
            .strip_prefix("re:")
            .or_else(|| s.strip_prefix("fwd:"))
            .or_else(|| s.strip_prefix("fw:"))
            .map(|rest| rest.trim_start().to_string());
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_target(target: &ActionTarget) -> String {
    match target {
        ActionTarget::SignUrl { url } => normalize_url(url),
        ActionTarget::SenatorContact { address, .. } => {
            format!("mailto:{}", address.trim().to_lowercase())
        }
        ActionTarget::None => String::new(),
    }
}

/// Drop the fragment and tracking query params, lowercase scheme and host,
/// trim the trailing slash.
fn normalize_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);

    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (without_fragment, None),
    };

    // Lowercase scheme://host, keep path case as-is.
    let base = match base.find("://") {
        Some(scheme_end) => {
            let after_scheme = &base[scheme_end + 3..];
            let host_end = after_scheme.find('/').unwrap_or(after_scheme.len());
            format!(
                "{}://{}{}",
                base[..scheme_end].to_lowercase(),
                after_scheme[..host_end].to_lowercase(),
                &after_scheme[host_end..],
            )
        }
        None => base.to_string(),
    };
    let base = base.trim_end_matches('/').to_string();

    let kept_params: Vec<&str> = query
        .map(|q| {
            q.split('&')
                .filter(|pair| {
                    let key = pair.split('=').next().unwrap_or("").to_lowercase();
                    !TRACKING_PARAM_PREFIXES.iter().any(|p| key.starts_with(p))
                        && !TRACKING_PARAMS.contains(&key.as_str())
                })
                .collect()
        })
        .unwrap_or_default();

    if kept_params.is_empty() {
        base
    } else {
        format!("{base}?{}", kept_params.join("&"))
    }
}

// ── Gate ────────────────────────────────────────────────────────────

/// What the gate decided about a sighting of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// First sighting, queued record, or retryable failure: run an attempt.
    Proceed { attempt: u32 },
    /// A terminal record already exists; no action, no error.
    Duplicate { status: RecordStatus },
    /// Another attempt is in flight for this fingerprint; defer silently.
    InFlight,
    /// Transient failures exhausted the ceiling; surface for manual review.
    NeedsReview { attempts: u32 },
}

/// Deduplication gate.
pub struct DedupGate {
    retry_ceiling: u32,
}

impl DedupGate {
    pub fn new(retry_ceiling: u32) -> Self {
        Self { retry_ceiling }
    }

    /// Look up the fingerprint and decide.
    pub async fn check(
        &self,
        store: &dyn RecordStore,
        fingerprint: &Fingerprint,
    ) -> Result<GateDecision, DatabaseError> {
        let existing = store.get_record(fingerprint.as_str()).await?;
        Ok(self.decide(existing.as_ref()))
    }

    /// Pure decision table over the existing record, if any.
    pub fn decide(&self, existing: Option<&ProcessingRecord>) -> GateDecision {
        let Some(record) = existing else {
            return GateDecision::Proceed { attempt: 1 };
        };

        match record.status {
            RecordStatus::Succeeded | RecordStatus::Skipped => {
                GateDecision::Duplicate { status: record.status }
            }
            RecordStatus::Processing => GateDecision::InFlight,
            RecordStatus::Pending => GateDecision::Proceed { attempt: record.attempt_count + 1 },
            RecordStatus::Failed => {
                if record.attempt_count < self.retry_ceiling {
                    GateDecision::Proceed { attempt: record.attempt_count + 1 }
                } else {
                    GateDecision::NeedsReview { attempts: record.attempt_count }
                }
            }
        }
    }
}
