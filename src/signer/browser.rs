//! Headless-browser signer built on chromiumoxide.
//!
//! One `sign()` call is one attempt: launch, navigate, fill profile fields,
//! click a submit affordance, look for a confirmation signal on the
//! resulting page. The whole attempt runs under the caller-supplied time
//! budget; expiry surfaces as `SignAttempt::Timeout`.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::SignerError;
use crate::signer::{FormField, SignAttempt, SignRequest, Signer, selectors_for};

/// Time given to the page to settle after navigation / submission.
const SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// CSS selectors tried for the submit affordance, in order.
const SUBMIT_SELECTORS: &[&str] = &[
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
    r#"[class*="submit"]"#,
    r#"[class*="sign"]"#,
];

/// Fallback: click the first visible control whose text reads like a
/// petition submit. Returns true if something was clicked.
const SUBMIT_BY_TEXT_JS: &str = r#"
() => {
    const candidates = Array.from(
        document.querySelectorAll('button, input[type="submit"], a')
    );
    const el = candidates.find(e =>
        /\b(sign|submit|add (my|your) name)\b/i.test(e.innerText || e.value || '')
    );
    if (el) { el.click(); return true; }
    return false;
}
"#;

/// Words on the resulting page that count as a confirmation signal.
const CONFIRMATION_MARKERS: &[&str] = &[
    "thank you",
    "thanks for signing",
    "signature added",
    "signature recorded",
    "you're signed",
    "you have signed",
    "we received your",
];

/// Chromium-driven signer.
pub struct BrowserSigner {
    user_agent: String,
}

impl Default for BrowserSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserSigner {
    pub fn new() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
        }
    }

    async fn attempt(&self, request: &SignRequest) -> Result<SignAttempt, SignerError> {
        let config = BrowserConfig::builder()
            .arg(format!("--user-agent={}", self.user_agent))
            .build()
            .map_err(SignerError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SignerError::Launch(e.to_string()))?;

        // Drain CDP events for the lifetime of the attempt.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self.drive(&browser, request).await;

        if let Err(e) = browser.close().await {
            debug!(error = %e, "Browser close failed");
        }
        handler_task.abort();

        result
    }

    async fn drive(&self, browser: &Browser, request: &SignRequest) -> Result<SignAttempt, SignerError> {
        let page = match browser.new_page(request.url.as_str()).await {
            Ok(page) => page,
            Err(e) => return Ok(SignAttempt::NavigationFailed { reason: e.to_string() }),
        };

        if let Err(e) = page.wait_for_navigation().await {
            return Ok(SignAttempt::NavigationFailed { reason: e.to_string() });
        }
        tokio::time::sleep(SETTLE_DELAY).await;

        let filled = fill_fields(&page, &request.fields).await;
        if filled == 0 && !request.fields.is_empty() {
            info!(url = %request.url, "No profile fields matched the page");
            return Ok(SignAttempt::MissingFields);
        }
        debug!(url = %request.url, filled, "Filled form fields");

        if !click_submit(&page).await {
            return Ok(SignAttempt::NoSubmitControl);
        }

        // Observe the resulting page state.
        let _ = page.wait_for_navigation().await;
        tokio::time::sleep(SETTLE_DELAY).await;

        match page.content().await {
            Ok(html) => {
                let lower = html.to_lowercase();
                if let Some(marker) = CONFIRMATION_MARKERS.iter().find(|m| lower.contains(**m)) {
                    Ok(SignAttempt::Submitted {
                        filled,
                        confirmation: format!("page contains \"{marker}\""),
                    })
                } else {
                    Ok(SignAttempt::NoConfirmation { filled })
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not read post-submission page");
                Ok(SignAttempt::NoConfirmation { filled })
            }
        }
    }
}

/// Fill each field via its selector candidates; count the ones that landed.
async fn fill_fields(page: &Page, fields: &[FormField]) -> usize {
    let mut filled = 0;
    for field in fields {
        for selector in selectors_for(field) {
            let Ok(element) = page.find_element(selector.as_str()).await else {
                continue;
            };
            match element.click().await {
                Ok(_) => {}
                Err(e) => {
                    debug!(selector = %selector, error = %e, "Could not focus field");
                    continue;
                }
            }
            match element.type_str(&field.value).await {
                Ok(_) => {
                    filled += 1;
                    break;
                }
                Err(e) => {
                    debug!(selector = %selector, error = %e, "Could not fill field");
                }
            }
        }
    }
    filled
}

/// Click the first submit affordance found; CSS selectors first, then the
/// text-based fallback.
async fn click_submit(page: &Page) -> bool {
    for selector in SUBMIT_SELECTORS {
        if let Ok(element) = page.find_element(*selector).await {
            if element.click().await.is_ok() {
                debug!(selector = %selector, "Clicked submit control");
                return true;
            }
        }
    }

    match page.evaluate_function(SUBMIT_BY_TEXT_JS).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(e) => {
            debug!(error = %e, "Submit-by-text evaluation failed");
            false
        }
    }
}

#[async_trait]
impl Signer for BrowserSigner {
    async fn sign(&self, request: &SignRequest) -> Result<SignAttempt, SignerError> {
        info!(url = %request.url, budget = ?request.timeout, "Browser signing attempt");
        match tokio::time::timeout(request.timeout, self.attempt(request)).await {
            Ok(result) => result,
            Err(_) => Ok(SignAttempt::Timeout { budget: request.timeout }),
        }
    }
}
