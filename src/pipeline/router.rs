//! Execution router — runs exactly one attempt for a simple petition.
//!
//! Paths never mix: a candidate is either browser-signed or turned into a
//! templated contact email, decided by its category. Every failure is
//! converted into an `AttemptOutcome` here; nothing propagates out. Retries
//! happen across pipeline runs via the ProcessingRecord, never inside one
//! invocation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::UserProfile;
use crate::pipeline::types::{ActionTarget, AttemptOutcome, Category, ContactMailer};
use crate::signer::{SignAttempt, SignRequest, Signer, build_field_mapping};
use crate::store::PetitionType;

/// Router over the two execution paths.
pub struct ExecutionRouter {
    signer: Arc<dyn Signer>,
    mailer: Arc<dyn ContactMailer>,
    profile: UserProfile,
    /// Safe default false: no browser, no outbound mail, ever.
    automation_enabled: bool,
    sign_timeout: Duration,
}

impl ExecutionRouter {
    pub fn new(
        signer: Arc<dyn Signer>,
        mailer: Arc<dyn ContactMailer>,
        profile: UserProfile,
        automation_enabled: bool,
        sign_timeout: Duration,
    ) -> Self {
        Self { signer, mailer, profile, automation_enabled, sign_timeout }
    }

    /// Execute one attempt for a simple petition.
    pub async fn execute(
        &self,
        target: &ActionTarget,
        category: Category,
        petition_type: Option<&PetitionType>,
    ) -> AttemptOutcome {
        if !self.automation_enabled {
            info!(category = category.as_str(), "Automation disabled; deferring to manual action");
            return AttemptOutcome::ManuallyDeferred;
        }

        match (category, target) {
            (Category::SimpleSignon, ActionTarget::SignUrl { url }) => {
                self.sign_on(url, petition_type).await
            }
            (Category::SimpleEmailSenator, ActionTarget::SenatorContact { address, subject }) => {
                self.contact_senator(address, subject).await
            }
            (category, target) => {
                warn!(
                    category = category.as_str(),
                    target = %target.canonical(),
                    "Router invoked with a non-executable candidate"
                );
                AttemptOutcome::StructuralFailure {
                    error: format!(
                        "no execution path for category {} with target '{}'",
                        category.as_str(),
                        target.canonical()
                    ),
                }
            }
        }
    }

    async fn sign_on(&self, url: &str, petition_type: Option<&PetitionType>) -> AttemptOutcome {
        let fields = build_field_mapping(&self.profile, petition_type);
        if fields.is_empty() {
            return AttemptOutcome::StructuralFailure {
                error: "no user profile fields configured for form filling".into(),
            };
        }

        let request = SignRequest {
            url: url.to_string(),
            fields,
            timeout: self.sign_timeout,
        };

        let attempt = match self.signer.sign(&request).await {
            Ok(attempt) => attempt,
            Err(e) => {
                return AttemptOutcome::TransientFailure { error: format!("signer: {e}") };
            }
        };

        match attempt {
            SignAttempt::Submitted { filled, confirmation } => AttemptOutcome::Succeeded {
                detail: format!("filled {filled} fields; {confirmation}"),
            },
            SignAttempt::NoSubmitControl => AttemptOutcome::StructuralFailure {
                error: "target page has no recognizable submit affordance".into(),
            },
            SignAttempt::Timeout { budget } => AttemptOutcome::TransientFailure {
                error: format!("signing attempt exceeded {budget:?}"),
            },
            SignAttempt::NavigationFailed { reason } => AttemptOutcome::TransientFailure {
                error: format!("navigation failed: {reason}"),
            },
            SignAttempt::MissingFields => AttemptOutcome::TransientFailure {
                error: "no profile fields matched the page".into(),
            },
            SignAttempt::NoConfirmation { filled } => AttemptOutcome::TransientFailure {
                error: format!("submitted ({filled} fields) but no confirmation observed"),
            },
        }
    }

    async fn contact_senator(&self, address: &str, subject: &str) -> AttemptOutcome {
        if !self.profile.is_complete() {
            return AttemptOutcome::StructuralFailure {
                error: "contact template fields missing (profile needs name and email)".into(),
            };
        }

        let body = compose_contact_body(&self.profile, subject);
        match self.mailer.send(address, subject, &body).await {
            Ok(()) => AttemptOutcome::Succeeded {
                detail: format!("contact email sent to {address}"),
            },
            Err(e) => AttemptOutcome::TransientFailure { error: format!("send failed: {e}") },
        }
    }
}

/// Fill the representative-contact template from the user profile.
fn compose_contact_body(profile: &UserProfile, subject: &str) -> String {
    let mut body = format!(
        "Dear Senator,\n\n\
         As your constituent, I am writing about \"{subject}\". I urge you to \
         give this matter your attention and support.\n\n\
         Sincerely,\n{}\n",
        profile.full_name(),
    );
    if let (Some(city), Some(state)) = (&profile.city, &profile.state) {
        body.push_str(&format!("{city}, {state} "));
    }
    if !profile.zip_code.is_empty() {
        body.push_str(&profile.zip_code);
    }
    body.push('\n');
    body.push_str(&profile.email);
    body.push('\n');
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::{ChannelError, SignerError};

    struct MockSigner {
        attempt: SignAttempt,
        calls: AtomicUsize,
    }

    impl MockSigner {
        fn new(attempt: SignAttempt) -> Arc<Self> {
            Arc::new(Self { attempt, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Signer for MockSigner {
        async fn sign(&self, _request: &SignRequest) -> Result<SignAttempt, SignerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.attempt.clone())
        }
    }

    #[derive(Default)]
    struct MockMailer {
        fail: bool,
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ContactMailer for MockMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::SendFailed {
                    to: to.into(),
                    reason: "relay unavailable".into(),
                });
            }
            self.sent.lock().unwrap().push((to.into(), subject.into(), body.into()));
            Ok(())
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            zip_code: "02139".into(),
            city: Some("Cambridge".into()),
            state: Some("MA".into()),
            ..Default::default()
        }
    }

    fn router(
        signer: Arc<MockSigner>,
        mailer: Arc<MockMailer>,
        automation_enabled: bool,
    ) -> ExecutionRouter {
        ExecutionRouter::new(signer, mailer, profile(), automation_enabled, Duration::from_secs(5))
    }

    fn sign_target() -> ActionTarget {
        ActionTarget::SignUrl { url: "https://p.example/sign".into() }
    }

    fn contact_target() -> ActionTarget {
        ActionTarget::SenatorContact {
            address: "senator@senate.gov".into(),
            subject: "Save the Park".into(),
        }
    }

    #[tokio::test]
    async fn disabled_automation_defers_without_invoking_anything() {
        let signer = MockSigner::new(SignAttempt::Submitted { filled: 4, confirmation: "x".into() });
        let mailer = Arc::new(MockMailer::default());
        let router = router(Arc::clone(&signer), Arc::clone(&mailer), false);

        let outcome = router.execute(&sign_target(), Category::SimpleSignon, None).await;
        assert_eq!(outcome, AttemptOutcome::ManuallyDeferred);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);

        let outcome = router.execute(&contact_target(), Category::SimpleEmailSenator, None).await;
        assert_eq!(outcome, AttemptOutcome::ManuallyDeferred);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn submitted_sign_attempt_succeeds() {
        let signer = MockSigner::new(SignAttempt::Submitted {
            filled: 4,
            confirmation: "page contains \"thank you\"".into(),
        });
        let router = router(signer, Arc::new(MockMailer::default()), true);

        match router.execute(&sign_target(), Category::SimpleSignon, None).await {
            AttemptOutcome::Succeeded { detail } => assert!(detail.contains("thank you")),
            other => panic!("Expected Succeeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let signer = MockSigner::new(SignAttempt::Timeout { budget: Duration::from_secs(5) });
        let router = router(signer, Arc::new(MockMailer::default()), true);

        let outcome = router.execute(&sign_target(), Category::SimpleSignon, None).await;
        assert!(matches!(outcome, AttemptOutcome::TransientFailure { .. }));
    }

    #[tokio::test]
    async fn missing_submit_affordance_is_structural() {
        let signer = MockSigner::new(SignAttempt::NoSubmitControl);
        let router = router(signer, Arc::new(MockMailer::default()), true);

        let outcome = router.execute(&sign_target(), Category::SimpleSignon, None).await;
        assert!(matches!(outcome, AttemptOutcome::StructuralFailure { .. }));
    }

    #[tokio::test]
    async fn empty_profile_is_structural_for_sign_path() {
        let signer = MockSigner::new(SignAttempt::Submitted { filled: 0, confirmation: "x".into() });
        let router = ExecutionRouter::new(
            Arc::clone(&signer) as Arc<dyn Signer>,
            Arc::new(MockMailer::default()),
            UserProfile::default(),
            true,
            Duration::from_secs(5),
        );

        let outcome = router.execute(&sign_target(), Category::SimpleSignon, None).await;
        assert!(matches!(outcome, AttemptOutcome::StructuralFailure { .. }));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn contact_email_fills_template_and_sends() {
        let mailer = Arc::new(MockMailer::default());
        let router = router(
            MockSigner::new(SignAttempt::NoSubmitControl),
            Arc::clone(&mailer),
            true,
        );

        let outcome = router.execute(&contact_target(), Category::SimpleEmailSenator, None).await;
        assert!(matches!(outcome, AttemptOutcome::Succeeded { .. }));

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, subject, body) = &sent[0];
        assert_eq!(to, "senator@senate.gov");
        assert_eq!(subject, "Save the Park");
        assert!(body.contains("Ada Lovelace"));
        assert!(body.contains("02139"));
        assert!(body.contains("Save the Park"));
    }

    #[tokio::test]
    async fn send_failure_is_transient() {
        let mailer = Arc::new(MockMailer { fail: true, ..Default::default() });
        let router = router(MockSigner::new(SignAttempt::NoSubmitControl), mailer, true);

        let outcome = router.execute(&contact_target(), Category::SimpleEmailSenator, None).await;
        assert!(matches!(outcome, AttemptOutcome::TransientFailure { .. }));
    }

    #[tokio::test]
    async fn incomplete_profile_is_structural_for_contact_path() {
        let mailer = Arc::new(MockMailer::default());
        let router = ExecutionRouter::new(
            MockSigner::new(SignAttempt::NoSubmitControl),
            Arc::clone(&mailer) as Arc<dyn ContactMailer>,
            UserProfile { first_name: "Ada".into(), ..Default::default() },
            true,
            Duration::from_secs(5),
        );

        let outcome = router.execute(&contact_target(), Category::SimpleEmailSenator, None).await;
        assert!(matches!(outcome, AttemptOutcome::StructuralFailure { .. }));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_target_is_structural() {
        let router = router(
            MockSigner::new(SignAttempt::NoSubmitControl),
            Arc::new(MockMailer::default()),
            true,
        );
        let outcome = router.execute(&ActionTarget::None, Category::SimpleSignon, None).await;
        assert!(matches!(outcome, AttemptOutcome::StructuralFailure { .. }));
    }
}
