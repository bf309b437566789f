//! Petition extractor — turns a raw email into a structured candidate.
//!
//! Extraction is pure and deterministic: the same `RawMessage` always yields
//! the same candidate. Absence of petition structure is a normal outcome
//! (a candidate with `ActionType::Unknown`), never an error.

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{ActionTarget, ActionType, PetitionCandidate, RawMessage};

/// Max characters of body carried into `extracted_text`.
const BODY_PREVIEW_CHARS: usize = 500;

/// Call-to-action phrasing for click-to-sign petitions.
const SIGN_PHRASES: &[&str] = &[
    "sign the petition",
    "sign this petition",
    "sign now",
    "add your name",
    "one click",
    "quick action",
    "take action",
];

/// Phrasing for email-your-representative petitions.
const CONTACT_PHRASES: &[&str] = &[
    "email your senator",
    "email your representative",
    "contact your senator",
    "contact your representative",
    "write your senator",
    "write your representative",
    "tell congress",
];

/// Links that are list plumbing, not petition actions.
const NON_ACTION_LINK_MARKERS: &[&str] = &["unsubscribe", "email-preferences", "manage-subscription"];

/// Petition extractor with pre-compiled patterns.
pub struct Extractor {
    url_re: Regex,
    mailto_re: Regex,
    address_re: Regex,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            url_re: Regex::new(r#"(?i)https?://[^\s<>"']+"#).unwrap(),
            mailto_re: Regex::new(r#"(?i)mailto:([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})"#)
                .unwrap(),
            address_re: Regex::new(
                r"(?i)\b([A-Za-z0-9._%+-]+@(?:[A-Za-z0-9-]+\.)*(?:senate|house|congress)\.gov)\b",
            )
            .unwrap(),
        }
    }

    /// Parse one raw message into a candidate.
    pub fn extract(&self, msg: &RawMessage) -> PetitionCandidate {
        let haystack = format!("{}\n{}", msg.subject, msg.body);
        let haystack_lower = haystack.to_lowercase();

        let links = self.action_links(&msg.body);
        let extracted_text = preview_text(&msg.subject, &msg.body);

        // Representative-contact structure wins over a stray sign link: these
        // emails often carry both phrasings, and the compose instruction is
        // the more specific marker.
        if contains_any(&haystack_lower, CONTACT_PHRASES) {
            if let Some(address) = self.contact_address(&msg.body) {
                debug!(message_id = %msg.message_id, address = %address, "Extracted senator-contact candidate");
                return PetitionCandidate {
                    message_id: msg.message_id.clone(),
                    action_type: ActionType::EmailSenator,
                    target: ActionTarget::SenatorContact {
                        address,
                        subject: msg.subject.clone(),
                    },
                    links,
                    extracted_text,
                };
            }
        }

        if contains_any(&haystack_lower, SIGN_PHRASES) {
            if let Some(primary) = links.first() {
                debug!(message_id = %msg.message_id, url = %primary, "Extracted sign-link candidate");
                return PetitionCandidate {
                    message_id: msg.message_id.clone(),
                    action_type: ActionType::SignLink,
                    target: ActionTarget::SignUrl { url: primary.clone() },
                    links,
                    extracted_text,
                };
            }
        }

        PetitionCandidate {
            message_id: msg.message_id.clone(),
            action_type: ActionType::Unknown,
            target: ActionTarget::None,
            links,
            extracted_text,
        }
    }

    /// Distinct non-tracking hyperlinks, in order of appearance.
    fn action_links(&self, body: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for m in self.url_re.find_iter(body) {
            let url = m.as_str().trim_end_matches(['.', ',', ')', ']']).to_string();
            let lower = url.to_lowercase();
            if NON_ACTION_LINK_MARKERS.iter().any(|marker| lower.contains(marker)) {
                continue;
            }
            if !seen.contains(&url) {
                seen.push(url);
            }
        }
        seen
    }

    /// First compose address: a mailto: link, or a bare congressional address.
    fn contact_address(&self, body: &str) -> Option<String> {
        if let Some(caps) = self.mailto_re.captures(body) {
            return Some(caps[1].to_lowercase());
        }
        self.address_re
            .captures(body)
            .map(|caps| caps[1].to_lowercase())
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Subject plus a bounded body preview.
fn preview_text(subject: &str, body: &str) -> String {
    let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
    format!("{subject}\n\n{preview}")
}
