//! Environment-derived configuration. Single source of truth for all settings.

use std::time::Duration;

use secrecy::SecretString;

/// Identity used to fill petition forms and contact templates.
///
/// Injected via environment (deployment secrets). The pipeline consumes the
/// fields verbatim; empty optional fields are simply not filled.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub zip_code: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl UserProfile {
    /// Build from `USER_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            first_name: env_trimmed("USER_FIRST_NAME"),
            last_name: env_trimmed("USER_LAST_NAME"),
            email: env_trimmed("USER_EMAIL"),
            zip_code: env_trimmed("USER_ZIP_CODE"),
            phone: env_opt("USER_PHONE"),
            address: env_opt("USER_ADDRESS"),
            city: env_opt("USER_CITY"),
            state: env_opt("USER_STATE"),
        }
    }

    /// The minimum a contact template or sign-on form needs.
    pub fn is_complete(&self) -> bool {
        !self.first_name.is_empty() && !self.last_name.is_empty() && !self.email.is_empty()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// IMAP/SMTP connection settings for the petition inbox.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailSettings {
    /// Build from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (email disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USER").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}

/// Top-level application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the local libSQL database file.
    pub database_path: String,
    /// Inbox credentials; `None` disables polling entirely.
    pub email: Option<EmailSettings>,
    /// Identity used when filling forms and templates.
    pub profile: UserProfile,
    /// Whether the Router may actually drive a browser / send contact mail.
    /// Default false: the system never auto-submits unless explicitly enabled.
    pub automation_enabled: bool,
    /// Poll cadence for the pass loop.
    pub check_interval: Duration,
    /// Transient failures per fingerprint before a record is permanently
    /// skipped for manual review.
    pub retry_ceiling: u32,
    /// Wall-clock budget for one browser signing attempt.
    pub sign_timeout: Duration,
    /// Port for the admin web API.
    pub web_port: u16,
}

impl Settings {
    /// Build settings from the environment, applying documented defaults.
    pub fn from_env() -> Self {
        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/petitioner.db".to_string());

        let automation_enabled = std::env::var("AUTOMATION_ENABLED")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let interval_minutes: u64 = std::env::var("EMAIL_CHECK_INTERVAL_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
            .max(1);

        let retry_ceiling: u32 = std::env::var("RETRY_CEILING")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        let sign_timeout_secs: u64 = std::env::var("SIGN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(45);

        let web_port: u16 = std::env::var("WEB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        Self {
            database_path,
            email: EmailSettings::from_env(),
            profile: UserProfile::from_env(),
            automation_enabled,
            check_interval: Duration::from_secs(interval_minutes * 60),
            retry_ceiling,
            sign_timeout: Duration::from_secs(sign_timeout_secs),
            web_port,
        }
    }
}

fn env_trimmed(key: &str) -> String {
    std::env::var(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_completeness() {
        let mut profile = UserProfile {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            ..Default::default()
        };
        assert!(profile.is_complete());
        assert_eq!(profile.full_name(), "Ada Lovelace");

        profile.email.clear();
        assert!(!profile.is_complete());
    }

    #[test]
    fn empty_profile_is_incomplete() {
        assert!(!UserProfile::default().is_complete());
    }
}
