//! Approval workflow engine
//!
//! The governance state machine: accepts semantic change proposals, decides
//! auto-approval against the active policy set, tracks pending requests, and
//! applies approve/reject transitions exactly once. Every transition is
//! written to the audit trail; notifications are best-effort side effects.

use crate::audit::{AuditAction, AuditLogger};
use crate::config::WorkflowConfig;
use crate::error::{not_found, permission_denied, GovernanceResult};
use crate::models::{
    ApprovalRequest, ApprovalStatus, ChangeType, GovernancePolicy, SemanticChange, User, UserRole,
};
use crate::notify::{NotificationRouter, StaleApproval};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Approver recorded on auto-approved requests
pub const SYSTEM_APPROVER: &str = "system";

/// Comment recorded on auto-approved requests
pub const AUTO_APPROVAL_COMMENT: &str = "Auto-approved based on governance policy";

/// Pure auto-approval decision over a change, its submitter, and the active
/// policies
///
/// Rule order: breaking changes never auto-approve; admins always do;
/// a non-breaking update by its own author does; otherwise any matching
/// criterion of any policy does (OR across policies and criteria).
pub fn auto_approval_decision(
    change: &SemanticChange,
    user: &User,
    policies: &[GovernancePolicy],
) -> bool {
    if change.breaking_change {
        return false;
    }

    if user.role == UserRole::Admin {
        return true;
    }

    // Self-service non-breaking updates
    if change.change_type == ChangeType::Update && change.author == user.username {
        return true;
    }

    policies
        .iter()
        .flat_map(|policy| policy.auto_approval_criteria.iter())
        .any(|criterion| criterion.matches(change))
}

/// The approval workflow engine
///
/// Exclusively owns the pending-request table and the policy set. Each
/// operation performs its read-modify-write of the pending table under one
/// write lock, so racing decisions on the same id resolve to exactly one
/// winner.
pub struct ApprovalEngine {
    audit: Arc<AuditLogger>,
    notifier: Arc<NotificationRouter>,
    workflow: WorkflowConfig,
    pending: RwLock<HashMap<Uuid, ApprovalRequest>>,
    policies: RwLock<HashMap<String, GovernancePolicy>>,
}

impl ApprovalEngine {
    pub fn new(
        audit: Arc<AuditLogger>,
        notifier: Arc<NotificationRouter>,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            audit,
            notifier,
            workflow,
            pending: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) an active governance policy
    pub async fn add_policy(&self, policy: GovernancePolicy) {
        let mut policies = self.policies.write().await;
        policies.insert(policy.name.clone(), policy);
    }

    pub async fn remove_policy(&self, name: &str) -> Option<GovernancePolicy> {
        let mut policies = self.policies.write().await;
        policies.remove(name)
    }

    /// Submit a semantic change for approval
    ///
    /// Auto-approved changes come back already approved, attributed to the
    /// system approver, and never enter the pending table. Everything else is
    /// parked pending and announced to the stewards (or, for breaking
    /// changes, the critical group - that routing lives in the notifier).
    pub async fn submit_change(
        &self,
        change: &SemanticChange,
        requesting_user: &User,
    ) -> GovernanceResult<ApprovalRequest> {
        let auto_approved = {
            let policies = self.policies.read().await;
            let active: Vec<GovernancePolicy> = policies.values().cloned().collect();
            auto_approval_decision(change, requesting_user, &active)
        };

        let now = Utc::now();
        let criteria_snapshot = json!({
            "metric_name": change.metric_name,
            "change_type": change.change_type.as_str(),
            "author": change.author,
            "breaking_change": change.breaking_change,
        });

        let request = if auto_approved {
            ApprovalRequest {
                id: Uuid::new_v4(),
                change_id: change.id,
                status: ApprovalStatus::Approved,
                approver: Some(SYSTEM_APPROVER.to_string()),
                approved_at: Some(now),
                comments: AUTO_APPROVAL_COMMENT.to_string(),
                auto_approved: true,
                approval_criteria: criteria_snapshot,
                created_at: now,
            }
        } else {
            let request = ApprovalRequest {
                id: Uuid::new_v4(),
                change_id: change.id,
                status: ApprovalStatus::Pending,
                approver: None,
                approved_at: None,
                comments: String::new(),
                auto_approved: false,
                approval_criteria: criteria_snapshot,
                created_at: now,
            };

            {
                let mut pending = self.pending.write().await;
                pending.insert(request.id, request.clone());
            }

            if self.workflow.notification_enabled {
                self.notifier.notify_approval_request(
                    &change.metric_name,
                    change.change_type.as_str(),
                    &change.author,
                    &request.id.to_string(),
                    change.breaking_change,
                );
            }

            request
        };

        self.audit
            .log_action(
                &requesting_user.username,
                AuditAction::ChangeSubmitted,
                "approval_request",
                &request.id.to_string(),
                json!({
                    "change_type": change.change_type.as_str(),
                    "metric_name": change.metric_name,
                    "auto_approved": auto_approved,
                    "breaking_change": change.breaking_change,
                }),
            )
            .await?;

        info!(
            approval_id = %request.id,
            metric = %change.metric_name,
            auto_approved,
            "change submitted"
        );

        Ok(request)
    }

    /// Approve a pending change
    pub async fn approve_change(
        &self,
        approval_id: Uuid,
        approver: &User,
        comments: &str,
    ) -> GovernanceResult<ApprovalRequest> {
        let request = self
            .decide(
                approval_id,
                approver,
                ApprovalStatus::Approved,
                comments,
                AuditAction::ChangeApproved,
                json!({
                    "status": ApprovalStatus::Approved,
                    "approver": approver.username,
                    "comments": comments,
                }),
            )
            .await?;

        if self.workflow.notification_enabled {
            self.notifier.notify_approval_decision(
                request
                    .approval_criteria
                    .get("metric_name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown"),
                "approved",
                &approver.username,
                &approval_id.to_string(),
                comments,
            );
        }

        Ok(request)
    }

    /// Reject a pending change
    ///
    /// The non-empty-reason rule is enforced at the boundary; whatever string
    /// arrives here is stored as the comments.
    pub async fn reject_change(
        &self,
        approval_id: Uuid,
        approver: &User,
        reason: &str,
    ) -> GovernanceResult<ApprovalRequest> {
        let request = self
            .decide(
                approval_id,
                approver,
                ApprovalStatus::Rejected,
                reason,
                AuditAction::ChangeRejected,
                json!({
                    "status": ApprovalStatus::Rejected,
                    "approver": approver.username,
                    "reason": reason,
                }),
            )
            .await?;

        if self.workflow.notification_enabled {
            self.notifier.notify_approval_decision(
                request
                    .approval_criteria
                    .get("metric_name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown"),
                "rejected",
                &approver.username,
                &approval_id.to_string(),
                reason,
            );
        }

        Ok(request)
    }

    /// Shared terminal transition: remove from pending, stamp the decision,
    /// and persist it to the audit trail
    ///
    /// NotFound is checked before authorization, and the removal happens in
    /// the same critical section as the lookup - a second racing decision on
    /// the same id observes NotFound. The audit log is the durable home of
    /// terminal decisions, so a failed append puts the request back into the
    /// pending table and surfaces the error.
    async fn decide(
        &self,
        approval_id: Uuid,
        approver: &User,
        status: ApprovalStatus,
        comments: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) -> GovernanceResult<ApprovalRequest> {
        let original = {
            let mut pending = self.pending.write().await;

            if !pending.contains_key(&approval_id) {
                return Err(not_found(format!("Approval request {approval_id} not found")));
            }

            if !Self::can_approve(approver) {
                return Err(permission_denied(format!(
                    "User {} cannot decide this change",
                    approver.username
                )));
            }

            pending
                .remove(&approval_id)
                .ok_or_else(|| not_found(format!("Approval request {approval_id} not found")))?
        };

        let mut request = original.clone();
        request.status = status;
        request.approver = Some(approver.username.clone());
        request.approved_at = Some(Utc::now());
        request.comments = comments.to_string();

        if let Err(err) = self
            .audit
            .log_action(
                &approver.username,
                action,
                "approval_request",
                &approval_id.to_string(),
                details,
            )
            .await
        {
            let mut pending = self.pending.write().await;
            pending.insert(approval_id, original);
            return Err(err);
        }

        debug!(%approval_id, ?status, approver = %approver.username, "approval decided");
        Ok(request)
    }

    /// Whether `user` may approve or reject changes
    ///
    /// Stewards may currently decide regardless of domain; domain scoping of
    /// steward decisions is an open follow-up recorded in DESIGN.md.
    fn can_approve(user: &User) -> bool {
        matches!(user.role, UserRole::Admin | UserRole::Steward)
    }

    /// Snapshot of all currently pending requests (order not significant)
    pub async fn get_pending_approvals(&self) -> Vec<ApprovalRequest> {
        let pending = self.pending.read().await;
        pending.values().cloned().collect()
    }

    /// Drop pending requests older than the configured age limit
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_approvals(self.workflow.max_pending_days)
            .await
    }

    /// Drop pending requests older than `max_age_days`; returns the count
    /// removed
    pub async fn cleanup_expired_approvals(&self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, request| request.created_at >= cutoff);
        let removed = before - pending.len();
        if removed > 0 {
            info!(removed, max_age_days, "expired pending approvals removed");
        }
        removed
    }

    /// Escalate still-pending requests older than `max_age_days` to the
    /// critical channel group without removing them
    pub async fn notify_stale_approvals(&self, max_age_days: i64) -> Vec<StaleApproval> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let pending = self.pending.read().await;

        let stale: Vec<StaleApproval> = pending
            .values()
            .filter(|request| request.created_at < cutoff)
            .map(|request| StaleApproval {
                approval_id: request.id.to_string(),
                metric_name: request
                    .approval_criteria
                    .get("metric_name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                change_type: request
                    .approval_criteria
                    .get("change_type")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                days_pending: (Utc::now() - request.created_at).num_days(),
            })
            .collect();
        drop(pending);

        if self.workflow.notification_enabled {
            self.notifier.notify_stale_approvals(&stale);
        }
        stale
    }
}
