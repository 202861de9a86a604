//! Governance configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Workflow behavior knobs
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Reject submissions without a justification at the boundary
    pub require_justification: bool,
    /// Days before a pending request is considered expired
    pub max_pending_days: i64,
    /// Master switch for outbound notifications
    pub notification_enabled: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            require_justification: true,
            max_pending_days: 7,
            notification_enabled: true,
        }
    }
}

/// Outbound notification endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
    pub slack_webhook: Option<String>,
    pub teams_webhook: Option<String>,
    /// Recipients for the email_admins channel
    pub admin_emails: Vec<String>,
}

/// Complete governance settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where the append-only audit trail lives (JSONL)
    pub audit_log_path: PathBuf,
    pub workflow: WorkflowConfig,
    pub notifications: NotificationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audit_log_path: PathBuf::from("csl_audit.jsonl"),
            workflow: WorkflowConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            require_justification: env_bool(
                "GOV_REQUIRE_JUSTIFICATION",
                defaults.require_justification,
            ),
            max_pending_days: std::env::var("GOV_MAX_PENDING_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_pending_days),
            notification_enabled: env_bool("GOV_NOTIFICATIONS_ENABLED", defaults.notification_enabled),
        };

        let notifications = NotificationConfig {
            slack_webhook: env_webhook("SLACK_WEBHOOK_URL")?,
            teams_webhook: env_webhook("TEAMS_WEBHOOK_URL")?,
            admin_emails: std::env::var("GOV_ADMIN_EMAILS")
                .ok()
                .map(|s| s.split(',').map(|e| e.trim().to_string()).collect())
                .unwrap_or_default(),
        };

        Ok(Self {
            audit_log_path: std::env::var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Settings::default().audit_log_path),
            workflow,
            notifications,
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read an optional webhook URL, rejecting values that do not parse as URLs
fn env_webhook(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            url::Url::parse(&raw).map_err(|_| {
                ConfigError::InvalidValue(format!("{key} is not a valid URL: {raw}"))
            })?;
            Ok(Some(raw))
        }
        _ => Ok(None),
    }
}
