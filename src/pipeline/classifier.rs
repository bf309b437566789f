//! Petition classifier — an explicit ordered rule list, first match wins.
//!
//! The chain is data, not an if/else cascade: each rule is a named predicate
//! over the candidate paired with a category. Declaration order is the
//! tie-break, and the final rule always matches (fail safe toward manual
//! review rather than mis-automating). Evaluation is side-effect-free and
//! never mutates the candidate.

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{ActionTarget, ActionType, Category, Classification, PetitionCandidate};

/// Subject/body markers of survey-style mail.
const SURVEY_KEYWORDS: &[&str] = &["survey", "poll", "quiz", "feedback form", "tell us about"];

/// Markers of layered multi-field forms.
const LAYERED_KEYWORDS: &[&str] = &[
    "select all that apply",
    "multiple choice",
    "rate each",
    "on a scale of",
];

/// A single classification rule.
pub struct Rule {
    pub name: &'static str,
    pub category: Category,
    pub confidence: f32,
    matches: Box<dyn Fn(&PetitionCandidate) -> bool + Send + Sync>,
}

impl Rule {
    fn new(
        name: &'static str,
        category: Category,
        confidence: f32,
        matches: impl Fn(&PetitionCandidate) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { name, category, confidence, matches: Box::new(matches) }
    }
}

/// Ordered rule evaluator.
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl Classifier {
    /// The production rule chain, in evaluation order.
    pub fn default_rules() -> Self {
        let multi_section_re = Regex::new(r"(?i)\b(?:section|step)\s+\d+\s+of\b").unwrap();
        let numbered_question_re = Regex::new(r"(?m)^\s*\d+[.)][^\n]*\?").unwrap();

        let rules = vec![
            Rule::new("unknown-action", Category::NotPetition, 1.0, |c| {
                c.action_type == ActionType::Unknown
            }),
            Rule::new("survey-markers", Category::Complex, 0.9, move |c| {
                let text = c.extracted_text.to_lowercase();
                SURVEY_KEYWORDS.iter().any(|kw| text.contains(kw))
                    || LAYERED_KEYWORDS.iter().any(|kw| text.contains(kw))
                    || multi_section_re.is_match(&c.extracted_text)
                    || numbered_question_re.find_iter(&c.extracted_text).count() >= 2
            }),
            Rule::new("single-sign-link", Category::SimpleSignon, 0.9, |c| {
                c.action_type == ActionType::SignLink && c.links.len() == 1
            }),
            Rule::new("senator-contact", Category::SimpleEmailSenator, 0.85, |c| {
                c.action_type == ActionType::EmailSenator
                    && matches!(c.target, ActionTarget::SenatorContact { .. })
            }),
            Rule::new("fallback-complex", Category::Complex, 0.5, |_| true),
        ];

        Self { rules }
    }

    /// Evaluate the chain; the fallback rule guarantees a verdict.
    pub fn classify(&self, candidate: &PetitionCandidate) -> Classification {
        for rule in &self.rules {
            if (rule.matches)(candidate) {
                debug!(
                    message_id = %candidate.message_id,
                    rule = rule.name,
                    category = rule.category.as_str(),
                    "Candidate classified"
                );
                return Classification {
                    category: rule.category,
                    matched_rule: rule.name,
                    confidence: rule.confidence,
                };
            }
        }
        // Unreachable with default_rules; kept total for custom rule sets.
        Classification {
            category: Category::Complex,
            matched_rule: "fallback-complex",
            confidence: 0.5,
        }
    }

    /// Rule names in evaluation order, for the status endpoint.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }
}
