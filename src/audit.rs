//! Audit trail
//!
//! Append-only JSONL log of who changed what, when, and why. Critical for
//! compliance, security review, and debugging. Entries are never mutated or
//! deleted after write; reads are linear scans with filter predicates.

use crate::error::GovernanceResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One immutable audit fact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    /// Action name drawn from [`AuditAction`]; kept as a string so older and
    /// newer log lines stay readable across versions
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Known action vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    ChangeSubmitted,
    ChangeApproved,
    ChangeRejected,
    MetricCreate,
    MetricUpdate,
    MetricDelete,
    AdapterGenerated,
    ApiAccess,
    UserCreated,
    StewardAssigned,
    MetricDomainAssigned,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ChangeSubmitted => "change_submitted",
            AuditAction::ChangeApproved => "change_approved",
            AuditAction::ChangeRejected => "change_rejected",
            AuditAction::MetricCreate => "metric_create",
            AuditAction::MetricUpdate => "metric_update",
            AuditAction::MetricDelete => "metric_delete",
            AuditAction::AdapterGenerated => "adapter_generated",
            AuditAction::ApiAccess => "api_access",
            AuditAction::UserCreated => "user_created",
            AuditAction::StewardAssigned => "steward_assigned",
            AuditAction::MetricDomainAssigned => "metric_domain_assigned",
        }
    }
}

/// Filters for trail queries; all supplied filters are ANDed
#[derive(Debug, Clone)]
pub struct TrailFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub user: Option<String>,
    pub resource_type: Option<String>,
    pub action: Option<String>,
    pub limit: usize,
}

impl Default for TrailFilter {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            user: None,
            resource_type: None,
            action: None,
            limit: 1000,
        }
    }
}

impl TrailFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if &entry.user != user {
                return false;
            }
        }
        if let Some(resource_type) = &self.resource_type {
            if &entry.resource_type != resource_type {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        true
    }
}

/// Compliance aggregation over a trail window
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub report_period: ReportPeriod,
    pub statistics: ComplianceStats,
    pub entries: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceStats {
    pub total_actions: usize,
    pub unique_users: usize,
    pub actions_by_type: std::collections::HashMap<String, usize>,
    pub users_by_activity: std::collections::HashMap<String, usize>,
    pub metrics_modified: usize,
    pub failed_operations: usize,
}

/// Result of a full-log integrity scan
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub total_entries: usize,
    pub corrupted_entries: usize,
    /// (total - corrupted) / total; 0.0 for an empty log
    pub integrity_score: f64,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Append-only audit logger backed by a newline-delimited JSON file
///
/// Appends are serialized through a mutex so concurrent callers never
/// interleave partial lines. Scans open the file independently and may run
/// concurrently with appends.
pub struct AuditLogger {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl AuditLogger {
    /// Open (creating if necessary) the audit log at `path`
    pub fn new(path: impl AsRef<Path>) -> GovernanceResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::File::create(&path)?;
        }
        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    /// Append one action to the trail and return the stored entry
    pub async fn log_action(
        &self,
        user: &str,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: Value,
    ) -> GovernanceResult<AuditEntry> {
        self.log_action_with_client(user, action, resource_type, resource_id, details, None, None)
            .await
    }

    /// Append one action carrying optional client metadata
    #[allow(clippy::too_many_arguments)]
    pub async fn log_action_with_client(
        &self,
        user: &str,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: Value,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> GovernanceResult<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user: user.to_string(),
            action: action.as_str().to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            ip_address,
            user_agent,
        };

        let line = serde_json::to_string(&entry)?;

        // One write_all per entry under the lock keeps appends atomic per call
        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(format!("{line}\n").as_bytes())?;

        Ok(entry)
    }

    /// Log a semantic metric change (metric_create / metric_update / metric_delete)
    pub async fn log_metric_change(
        &self,
        user: &str,
        metric_name: &str,
        change_type: crate::models::ChangeType,
        old_definition: Option<Value>,
        new_definition: Value,
        approved_by: Option<&str>,
    ) -> GovernanceResult<AuditEntry> {
        let action = match change_type {
            crate::models::ChangeType::Create => AuditAction::MetricCreate,
            crate::models::ChangeType::Update => AuditAction::MetricUpdate,
            crate::models::ChangeType::Delete => AuditAction::MetricDelete,
        };
        self.log_action(
            user,
            action,
            "metric",
            metric_name,
            serde_json::json!({
                "old_definition": old_definition,
                "new_definition": new_definition,
                "approved_by": approved_by,
                "change_type": change_type.as_str(),
            }),
        )
        .await
    }

    /// Log a vendor adapter generation attempt
    pub async fn log_adapter_generation(
        &self,
        user: &str,
        metric_name: &str,
        adapter_type: &str,
        output_file: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> GovernanceResult<AuditEntry> {
        self.log_action(
            user,
            AuditAction::AdapterGenerated,
            "adapter",
            &format!("{metric_name}_{adapter_type}"),
            serde_json::json!({
                "metric_name": metric_name,
                "adapter_type": adapter_type,
                "output_file": output_file,
                "success": success,
                "error_message": error_message,
            }),
        )
        .await
    }

    /// Log an API access event
    #[allow(clippy::too_many_arguments)]
    pub async fn log_api_access(
        &self,
        user: &str,
        endpoint: &str,
        method: &str,
        response_code: u16,
        ip_address: &str,
        user_agent: &str,
    ) -> GovernanceResult<AuditEntry> {
        self.log_action_with_client(
            user,
            AuditAction::ApiAccess,
            "endpoint",
            endpoint,
            serde_json::json!({
                "method": method,
                "response_code": response_code,
            }),
            Some(ip_address.to_string()),
            Some(user_agent.to_string()),
        )
        .await
    }

    /// Scan the trail applying `filter`; malformed lines are skipped
    pub async fn get_audit_trail(&self, filter: &TrailFilter) -> GovernanceResult<Vec<AuditEntry>> {
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            // Undecodable bytes are skipped exactly like malformed JSON
            let Ok(line) = line else { continue };
            let entry: AuditEntry = match serde_json::from_str(line.trim()) {
                Ok(entry) => entry,
                Err(_) => continue, // skip malformed lines
            };
            if !filter.matches(&entry) {
                continue;
            }
            entries.push(entry);
            if entries.len() >= filter.limit {
                break;
            }
        }

        Ok(entries)
    }

    /// Complete change history for one metric
    pub async fn get_metric_history(&self, metric_name: &str) -> GovernanceResult<Vec<AuditEntry>> {
        let trail = self
            .get_audit_trail(&TrailFilter {
                resource_type: Some("metric".to_string()),
                ..Default::default()
            })
            .await?;
        Ok(trail
            .into_iter()
            .filter(|e| e.resource_id == metric_name)
            .collect())
    }

    /// Aggregate trail statistics for a compliance window
    pub async fn generate_compliance_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> GovernanceResult<ComplianceReport> {
        let entries = self
            .get_audit_trail(&TrailFilter {
                start: Some(start),
                end: Some(end),
                ..Default::default()
            })
            .await?;

        let mut actions_by_type = std::collections::HashMap::new();
        let mut users_by_activity = std::collections::HashMap::new();
        let mut users = std::collections::HashSet::new();
        let mut metrics_modified = std::collections::HashSet::new();
        let mut failed_operations = 0;

        for entry in &entries {
            *actions_by_type.entry(entry.action.clone()).or_insert(0) += 1;
            *users_by_activity.entry(entry.user.clone()).or_insert(0) += 1;
            users.insert(entry.user.clone());

            if entry.resource_type == "metric" {
                metrics_modified.insert(entry.resource_id.clone());
            }
            if entry.resource_type == "adapter"
                && entry.details.get("success").and_then(Value::as_bool) == Some(false)
            {
                failed_operations += 1;
            }
        }

        Ok(ComplianceReport {
            report_period: ReportPeriod { start, end },
            statistics: ComplianceStats {
                total_actions: entries.len(),
                unique_users: users.len(),
                actions_by_type,
                users_by_activity,
                metrics_modified: metrics_modified.len(),
                failed_operations,
            },
            entries,
        })
    }

    /// Count corrupted lines across the whole log
    ///
    /// A line is corrupted when it does not parse as JSON or lacks a valid
    /// timestamp. Corruption degrades the score but never aborts the scan.
    pub async fn verify_integrity(&self) -> GovernanceResult<IntegrityReport> {
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut total_entries = 0;
        let mut corrupted_entries = 0;
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for line in reader.lines() {
            total_entries += 1;

            // A line that fails to decode counts as corrupted, same as bad JSON
            let Ok(line) = line else {
                corrupted_entries += 1;
                continue;
            };

            let timestamp = serde_json::from_str::<Value>(line.trim())
                .ok()
                .and_then(|v| {
                    v.get("timestamp")
                        .and_then(Value::as_str)
                        .and_then(|ts| ts.parse::<DateTime<Utc>>().ok())
                });

            match timestamp {
                Some(ts) => {
                    if earliest.map_or(true, |e| ts < e) {
                        earliest = Some(ts);
                    }
                    if latest.map_or(true, |l| ts > l) {
                        latest = Some(ts);
                    }
                }
                None => corrupted_entries += 1,
            }
        }

        let integrity_score = if total_entries > 0 {
            (total_entries - corrupted_entries) as f64 / total_entries as f64
        } else {
            0.0
        };

        Ok(IntegrityReport {
            total_entries,
            corrupted_entries,
            integrity_score,
            date_range: DateRange { earliest, latest },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn temp_logger() -> (tempfile::TempDir, AuditLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("audit.jsonl")).unwrap();
        (dir, logger)
    }

    #[tokio::test]
    async fn log_and_read_back() {
        let (_dir, logger) = temp_logger();
        logger
            .log_action(
                "alice",
                AuditAction::ChangeSubmitted,
                "approval_request",
                "abc",
                json!({"metric_name": "revenue"}),
            )
            .await
            .unwrap();

        let trail = logger.get_audit_trail(&TrailFilter::default()).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].user, "alice");
        assert_eq!(trail[0].action, "change_submitted");
        assert_eq!(trail[0].details["metric_name"], "revenue");
    }

    #[tokio::test]
    async fn filters_are_conjunctive() {
        let (_dir, logger) = temp_logger();
        logger
            .log_action("alice", AuditAction::ChangeSubmitted, "approval_request", "1", json!({}))
            .await
            .unwrap();
        logger
            .log_action("bob", AuditAction::ChangeApproved, "approval_request", "1", json!({}))
            .await
            .unwrap();
        logger
            .log_action("alice", AuditAction::ApiAccess, "endpoint", "/metrics", json!({}))
            .await
            .unwrap();

        let trail = logger
            .get_audit_trail(&TrailFilter {
                user: Some("alice".to_string()),
                action: Some("change_submitted".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].resource_id, "1");
    }

    #[tokio::test]
    async fn limit_caps_results() {
        let (_dir, logger) = temp_logger();
        for i in 0..5 {
            logger
                .log_action("alice", AuditAction::ApiAccess, "endpoint", &format!("/{i}"), json!({}))
                .await
                .unwrap();
        }
        let trail = logger
            .get_audit_trail(&TrailFilter {
                limit: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(trail.len(), 3);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_on_reads() {
        let (_dir, logger) = temp_logger();
        logger
            .log_action("alice", AuditAction::ChangeSubmitted, "approval_request", "1", json!({}))
            .await
            .unwrap();

        // Corrupt the log by hand
        {
            let mut file = OpenOptions::new().append(true).open(&logger.path).unwrap();
            file.write_all(b"{not json at all\n").unwrap();
        }

        let trail = logger.get_audit_trail(&TrailFilter::default()).await.unwrap();
        assert_eq!(trail.len(), 1);

        let report = logger.verify_integrity().await.unwrap();
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.corrupted_entries, 1);
        assert!((report.integrity_score - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn non_utf8_lines_never_abort_reads() {
        let (_dir, logger) = temp_logger();
        logger
            .log_action("alice", AuditAction::ChangeSubmitted, "approval_request", "1", json!({}))
            .await
            .unwrap();

        // Inject a line of raw bytes that is not valid UTF-8
        {
            let mut file = OpenOptions::new().append(true).open(&logger.path).unwrap();
            file.write_all(&[0xff, 0xfe, 0x92, b'\n']).unwrap();
        }

        logger
            .log_action("bob", AuditAction::ChangeApproved, "approval_request", "1", json!({}))
            .await
            .unwrap();

        // Entries on either side of the bad line are still returned
        let trail = logger.get_audit_trail(&TrailFilter::default()).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].user, "bob");

        let report = logger.verify_integrity().await.unwrap();
        assert_eq!(report.total_entries, 3);
        assert_eq!(report.corrupted_entries, 1);
    }

    #[tokio::test]
    async fn integrity_of_empty_log_is_zero() {
        let (_dir, logger) = temp_logger();
        let report = logger.verify_integrity().await.unwrap();
        assert_eq!(report.total_entries, 0);
        assert_eq!(report.corrupted_entries, 0);
        assert_eq!(report.integrity_score, 0.0);
        assert!(report.date_range.earliest.is_none());
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let (_dir, logger) = temp_logger();
        let logger = Arc::new(logger);

        let mut handles = Vec::new();
        for i in 0..20 {
            let logger = logger.clone();
            handles.push(tokio::spawn(async move {
                logger
                    .log_action(
                        &format!("user{i}"),
                        AuditAction::ApiAccess,
                        "endpoint",
                        "/concurrent",
                        json!({"i": i}),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let report = logger.verify_integrity().await.unwrap();
        assert_eq!(report.total_entries, 20);
        assert_eq!(report.corrupted_entries, 0);
    }

    #[tokio::test]
    async fn compliance_report_aggregates() {
        let (_dir, logger) = temp_logger();
        let start = Utc::now() - chrono::Duration::hours(1);

        logger
            .log_metric_change(
                "alice",
                "revenue",
                crate::models::ChangeType::Update,
                Some(json!({"expression": "SUM(a)"})),
                json!({"expression": "SUM(b)"}),
                Some("bob"),
            )
            .await
            .unwrap();
        logger
            .log_metric_change("alice", "churn", crate::models::ChangeType::Create, None, json!({}), None)
            .await
            .unwrap();
        logger
            .log_adapter_generation("bob", "revenue", "looker", "out.lkml", false, Some("boom"))
            .await
            .unwrap();

        let end = Utc::now() + chrono::Duration::hours(1);
        let report = logger.generate_compliance_report(start, end).await.unwrap();

        assert_eq!(report.statistics.total_actions, 3);
        assert_eq!(report.statistics.unique_users, 2);
        assert_eq!(report.statistics.metrics_modified, 2);
        assert_eq!(report.statistics.failed_operations, 1);
        assert_eq!(report.statistics.actions_by_type["metric_update"], 1);
        assert_eq!(report.statistics.users_by_activity["alice"], 2);
    }

    #[tokio::test]
    async fn metric_history_scopes_to_one_metric() {
        let (_dir, logger) = temp_logger();
        logger
            .log_metric_change("alice", "revenue", crate::models::ChangeType::Create, None, json!({}), None)
            .await
            .unwrap();
        logger
            .log_metric_change("alice", "churn", crate::models::ChangeType::Create, None, json!({}), None)
            .await
            .unwrap();

        let history = logger.get_metric_history("revenue").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].resource_id, "revenue");
    }
}
