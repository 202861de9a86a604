//! Governance stack wiring
//!
//! Builds the long-lived component graph once at process start; callers share
//! it by reference. Each component exclusively owns its own state.

use crate::audit::AuditLogger;
use crate::config::Settings;
use crate::engine::ApprovalEngine;
use crate::error::GovernanceResult;
use crate::notify::{
    EmailChannel, LogTransport, NotificationRouter, SlackChannel, TeamsChannel, WebhookTransport,
};
use crate::rbac::AccessControlManager;
use std::sync::Arc;

/// The assembled governance core
pub struct Governance {
    pub audit: Arc<AuditLogger>,
    pub access: Arc<AccessControlManager>,
    pub notifier: Arc<NotificationRouter>,
    pub engine: ApprovalEngine,
}

impl Governance {
    /// Wire the full stack from settings using the default (logging) webhook
    /// transport
    pub fn from_settings(settings: &Settings) -> GovernanceResult<Self> {
        Self::with_transport(settings, Arc::new(LogTransport))
    }

    /// Wire the full stack with a caller-supplied webhook transport
    pub fn with_transport(
        settings: &Settings,
        transport: Arc<dyn WebhookTransport>,
    ) -> GovernanceResult<Self> {
        let audit = Arc::new(AuditLogger::new(&settings.audit_log_path)?);
        let access = Arc::new(AccessControlManager::new(audit.clone()));

        let mut notifier = NotificationRouter::new();
        if let Some(webhook) = &settings.notifications.slack_webhook {
            notifier.add_channel(
                "slack_stewards",
                Box::new(SlackChannel::new(
                    webhook.clone(),
                    Some("#data-stewards".to_string()),
                    transport.clone(),
                )),
            );
            notifier.add_channel(
                "slack_general",
                Box::new(SlackChannel::new(webhook.clone(), None, transport.clone())),
            );
        }
        if let Some(webhook) = &settings.notifications.teams_webhook {
            notifier.add_channel(
                "teams_stewards",
                Box::new(TeamsChannel::new(webhook.clone(), transport.clone())),
            );
        }
        if !settings.notifications.admin_emails.is_empty() {
            notifier.add_channel(
                "email_admins",
                Box::new(EmailChannel::new(settings.notifications.admin_emails.clone())),
            );
        }
        let notifier = Arc::new(notifier);

        let engine = ApprovalEngine::new(audit.clone(), notifier.clone(), settings.workflow.clone());

        Ok(Self {
            audit,
            access,
            notifier,
            engine,
        })
    }
}
