//! Notification routing
//!
//! Fire-and-forget delivery of governance events to named channels, grouped
//! by event category. Delivery is best-effort: one channel failing never
//! blocks another channel or the governance decision that triggered it.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capability implemented by every concrete notification transport
pub trait NotificationChannel: Send + Sync {
    /// Attempt delivery; returns whether the channel accepted the message
    fn send(&self, message: &str, metadata: Option<&Value>) -> bool;
}

/// Posts a prepared payload to a webhook endpoint
///
/// Real HTTP delivery is owned by the hosting service; the default transport
/// only records the payload.
pub trait WebhookTransport: Send + Sync {
    fn post(&self, url: &str, payload: &Value) -> bool;
}

/// Default transport: log the payload and report success
pub struct LogTransport;

impl WebhookTransport for LogTransport {
    fn post(&self, url: &str, payload: &Value) -> bool {
        debug!(url, %payload, "webhook dispatch");
        true
    }
}

/// Slack incoming-webhook channel
pub struct SlackChannel {
    webhook_url: String,
    default_channel: Option<String>,
    transport: Arc<dyn WebhookTransport>,
}

impl SlackChannel {
    pub fn new(
        webhook_url: impl Into<String>,
        default_channel: Option<String>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            default_channel,
            transport,
        }
    }
}

impl NotificationChannel for SlackChannel {
    fn send(&self, message: &str, metadata: Option<&Value>) -> bool {
        let mut payload = json!({
            "text": message,
            "username": "CSL Governance",
            "icon_emoji": ":shield:",
        });

        if let Some(channel) = &self.default_channel {
            payload["channel"] = json!(channel);
        }

        // Rich formatting for approval requests
        if let Some(metadata) = metadata {
            if let Some(approval_id) = metadata.get("approval_id") {
                let approved = metadata.get("decision").and_then(Value::as_str) == Some("approved");
                payload["attachments"] = json!([{
                    "color": if approved { "good" } else { "warning" },
                    "fields": [
                        { "title": "Approval ID", "value": approval_id, "short": true },
                        {
                            "title": "Change Type",
                            "value": metadata.get("change_type").cloned().unwrap_or(json!("unknown")),
                            "short": true
                        },
                    ],
                }]);
            }
        }

        self.transport.post(&self.webhook_url, &payload)
    }
}

/// Microsoft Teams message-card channel
pub struct TeamsChannel {
    webhook_url: String,
    transport: Arc<dyn WebhookTransport>,
}

impl TeamsChannel {
    pub fn new(webhook_url: impl Into<String>, transport: Arc<dyn WebhookTransport>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            transport,
        }
    }
}

impl NotificationChannel for TeamsChannel {
    fn send(&self, message: &str, metadata: Option<&Value>) -> bool {
        let mut payload = json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "summary": "CSL Governance Notification",
            "themeColor": "0078D4",
            "title": "Customer Semantic Layer",
            "text": message,
        });

        if let Some(approval_id) = metadata.and_then(|m| m.get("approval_id")).and_then(Value::as_str) {
            payload["potentialAction"] = json!([{
                "@type": "OpenUri",
                "name": "View Approval",
                "targets": [{ "os": "default", "uri": format!("/approvals/{approval_id}") }],
            }]);
        }

        self.transport.post(&self.webhook_url, &payload)
    }
}

/// Email channel; SMTP delivery belongs to the hosting service, so this
/// records the outbound message and reports success
pub struct EmailChannel {
    recipients: Vec<String>,
}

impl EmailChannel {
    pub fn new(recipients: Vec<String>) -> Self {
        Self { recipients }
    }
}

impl NotificationChannel for EmailChannel {
    fn send(&self, message: &str, _metadata: Option<&Value>) -> bool {
        debug!(recipients = ?self.recipients, message, "email notification");
        true
    }
}

/// Routes governance events to channel groups
///
/// A group (`stewards`, `general`, `critical`) expands to a fixed list of
/// concrete channel names. Every member channel is attempted independently
/// and reports its own outcome.
pub struct NotificationRouter {
    channels: HashMap<String, Box<dyn NotificationChannel>>,
    routing: HashMap<String, Vec<String>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        let routing = HashMap::from([
            (
                "stewards".to_string(),
                vec!["slack_stewards".to_string(), "teams_stewards".to_string()],
            ),
            ("general".to_string(), vec!["slack_general".to_string()]),
            (
                "critical".to_string(),
                vec![
                    "slack_stewards".to_string(),
                    "teams_stewards".to_string(),
                    "email_admins".to_string(),
                ],
            ),
        ]);

        Self {
            channels: HashMap::new(),
            routing,
        }
    }

    /// Register a concrete channel under a name referenced by the routing table
    pub fn add_channel(&mut self, name: impl Into<String>, channel: Box<dyn NotificationChannel>) {
        self.channels.insert(name.into(), channel);
    }

    /// Dispatch `message` to every channel in `group`
    ///
    /// Unregistered channels report `false`; an unknown group warns and
    /// returns an empty map. Never fails the caller.
    pub fn send_notification(
        &self,
        group: &str,
        message: &str,
        metadata: Option<&Value>,
    ) -> HashMap<String, bool> {
        let Some(targets) = self.routing.get(group) else {
            warn!(group, "unknown notification channel group");
            return HashMap::new();
        };

        let mut results = HashMap::new();
        for name in targets {
            let delivered = match self.channels.get(name) {
                Some(channel) => channel.send(message, metadata),
                None => false,
            };
            results.insert(name.clone(), delivered);
        }
        results
    }

    /// Announce a new approval request; breaking changes escalate to the
    /// critical group
    pub fn notify_approval_request(
        &self,
        metric_name: &str,
        change_type: &str,
        author: &str,
        approval_id: &str,
        breaking_change: bool,
    ) -> HashMap<String, bool> {
        let group = if breaking_change { "critical" } else { "stewards" };

        let message = format!(
            "Semantic change approval required\n\n\
             Metric: {metric_name}\n\
             Type: {change_type}\n\
             Author: {author}\n\
             Breaking change: {}\n\n\
             Please review and approve/reject this change.\n\
             Approval ID: {approval_id}",
            if breaking_change { "YES" } else { "no" }
        );

        self.send_notification(
            group,
            &message,
            Some(&json!({
                "approval_id": approval_id,
                "change_type": change_type,
                "breaking_change": breaking_change,
            })),
        )
    }

    /// Announce an approve/reject decision to the general group
    pub fn notify_approval_decision(
        &self,
        metric_name: &str,
        decision: &str,
        approver: &str,
        approval_id: &str,
        comments: &str,
    ) -> HashMap<String, bool> {
        let message = format!(
            "Semantic change {decision}\n\n\
             Metric: {metric_name}\n\
             Approver: {approver}\n\
             Comments: {}\n\
             Approval ID: {approval_id}",
            if comments.is_empty() { "None" } else { comments }
        );

        self.send_notification(
            "general",
            &message,
            Some(&json!({
                "approval_id": approval_id,
                "decision": decision,
            })),
        )
    }

    /// Escalate approval requests that have sat pending past the age limit
    pub fn notify_stale_approvals(&self, stale: &[StaleApproval]) -> HashMap<String, bool> {
        if stale.is_empty() {
            return HashMap::new();
        }

        let mut message = format!(
            "{} stale approval request(s) need attention:\n\n",
            stale.len()
        );
        for entry in stale {
            message.push_str(&format!(
                "- {} ({}) - pending {} day(s)\n",
                entry.metric_name, entry.change_type, entry.days_pending
            ));
        }
        message.push_str("\nPlease review these requests to maintain governance compliance.");

        self.send_notification("critical", &message, None)
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending request that has outlived the configured age limit
#[derive(Debug, Clone)]
pub struct StaleApproval {
    pub approval_id: String,
    pub metric_name: String,
    pub change_type: String,
    pub days_pending: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records every message it receives; delivery outcome is configurable
    struct MemoryChannel {
        sent: Arc<Mutex<Vec<String>>>,
        succeed: bool,
    }

    impl MemoryChannel {
        fn new(succeed: bool) -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    sent: sent.clone(),
                    succeed,
                },
                sent,
            )
        }
    }

    impl NotificationChannel for MemoryChannel {
        fn send(&self, message: &str, _metadata: Option<&Value>) -> bool {
            self.sent.lock().unwrap().push(message.to_string());
            self.succeed
        }
    }

    #[test]
    fn group_expands_to_all_members() {
        let mut router = NotificationRouter::new();
        let (slack, slack_sent) = MemoryChannel::new(true);
        let (teams, teams_sent) = MemoryChannel::new(true);
        router.add_channel("slack_stewards", Box::new(slack));
        router.add_channel("teams_stewards", Box::new(teams));

        let results = router.send_notification("stewards", "hello", None);
        assert_eq!(results.len(), 2);
        assert_eq!(results["slack_stewards"], true);
        assert_eq!(results["teams_stewards"], true);
        assert_eq!(slack_sent.lock().unwrap().len(), 1);
        assert_eq!(teams_sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn one_failure_never_blocks_others() {
        let mut router = NotificationRouter::new();
        let (failing, _) = MemoryChannel::new(false);
        let (working, working_sent) = MemoryChannel::new(true);
        router.add_channel("slack_stewards", Box::new(failing));
        router.add_channel("teams_stewards", Box::new(working));

        let results = router.send_notification("stewards", "hello", None);
        assert_eq!(results["slack_stewards"], false);
        assert_eq!(results["teams_stewards"], true);
        assert_eq!(working_sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn unregistered_channel_reports_failure() {
        let router = NotificationRouter::new();
        let results = router.send_notification("general", "hello", None);
        assert_eq!(results["slack_general"], false);
    }

    #[test]
    fn unknown_group_returns_empty_map() {
        let router = NotificationRouter::new();
        let results = router.send_notification("nobody", "hello", None);
        assert!(results.is_empty());
    }

    #[test]
    fn breaking_changes_route_to_critical() {
        let mut router = NotificationRouter::new();
        let (email, email_sent) = MemoryChannel::new(true);
        router.add_channel("email_admins", Box::new(email));

        router.notify_approval_request("revenue", "delete", "alice", "id-1", true);
        assert_eq!(email_sent.lock().unwrap().len(), 1);

        // Non-breaking requests stay on the stewards group
        router.notify_approval_request("revenue", "update", "alice", "id-2", false);
        assert_eq!(email_sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn slack_payload_carries_approval_fields() {
        struct CapturingTransport(Arc<Mutex<Vec<Value>>>);
        impl WebhookTransport for CapturingTransport {
            fn post(&self, _url: &str, payload: &Value) -> bool {
                self.0.lock().unwrap().push(payload.clone());
                true
            }
        }

        let captured = Arc::new(Mutex::new(Vec::new()));
        let channel = SlackChannel::new(
            "https://hooks.slack.example/T000",
            Some("#governance".to_string()),
            Arc::new(CapturingTransport(captured.clone())),
        );

        let delivered = channel.send(
            "needs review",
            Some(&json!({"approval_id": "abc", "change_type": "update"})),
        );
        assert!(delivered);

        let payloads = captured.lock().unwrap();
        assert_eq!(payloads[0]["channel"], "#governance");
        assert_eq!(payloads[0]["attachments"][0]["fields"][0]["value"], "abc");
    }

    #[test]
    fn stale_report_lists_each_request() {
        let mut router = NotificationRouter::new();
        let (email, email_sent) = MemoryChannel::new(true);
        router.add_channel("email_admins", Box::new(email));

        let stale = vec![StaleApproval {
            approval_id: "id-1".to_string(),
            metric_name: "revenue".to_string(),
            change_type: "update".to_string(),
            days_pending: 9,
        }];
        router.notify_stale_approvals(&stale);

        let sent = email_sent.lock().unwrap();
        assert!(sent[0].contains("revenue"));
        assert!(sent[0].contains("9 day"));

        assert!(router.notify_stale_approvals(&[]).is_empty());
    }
}
