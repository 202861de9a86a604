//! Governance data models
//!
//! Defines the records flowing through the approval workflow: proposed
//! semantic changes, their approval requests, users, and governance policies.

use crate::config::WorkflowConfig;
use crate::error::{GovernanceError, GovernanceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// Kind of mutation proposed against a metric or dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

/// Status of an approval request in the governance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a steward or admin decision
    Pending,
    /// Approved (by a human or auto-approved by policy)
    Approved,
    /// Rejected by reviewer
    Rejected,
    /// Reviewer asked for amendments
    ChangesRequested,
}

/// User role in the governance hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Analyst,
    Steward,
    Admin,
}

/// A registered user of the semantic layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub email: String,
    pub role: UserRole,
    /// Domain teams the user belongs to
    #[serde(default)]
    pub teams: Vec<String>,
    /// Fine-grained overrides: resource name -> granted permission names
    #[serde(default)]
    pub permissions: HashMap<String, Vec<String>>,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            role,
            teams: Vec::new(),
            permissions: HashMap::new(),
        }
    }

    pub fn with_teams(mut self, teams: Vec<String>) -> Self {
        self.teams = teams;
        self
    }
}

/// A proposed mutation to a named metric or dimension definition
///
/// Immutable once constructed; the approval engine never rewrites it.
/// `breaking_change` is asserted by the author, not derived, and disables
/// auto-approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticChange {
    pub id: Uuid,
    pub change_type: ChangeType,
    pub metric_name: String,
    /// Prior definition, absent for creates. Opaque to the governance core.
    pub old_definition: Option<Value>,
    /// Proposed definition. Opaque to the governance core.
    pub new_definition: Value,
    pub author: String,
    pub author_email: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub justification: String,
    /// Downstream adapters (dbt, looker, ...) affected by this change
    #[serde(default)]
    pub affected_adapters: Vec<String>,
    #[serde(default)]
    pub breaking_change: bool,
}

impl SemanticChange {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        change_type: ChangeType,
        metric_name: impl Into<String>,
        old_definition: Option<Value>,
        new_definition: Value,
        author: impl Into<String>,
        author_email: impl Into<String>,
        description: impl Into<String>,
        justification: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_type,
            metric_name: metric_name.into(),
            old_definition,
            new_definition,
            author: author.into(),
            author_email: author_email.into(),
            created_at: Utc::now(),
            description: description.into(),
            justification: justification.into(),
            affected_adapters: Vec::new(),
            breaking_change: false,
        }
    }

    pub fn with_breaking(mut self, breaking: bool) -> Self {
        self.breaking_change = breaking;
        self
    }

    pub fn with_adapters(mut self, adapters: Vec<String>) -> Self {
        self.affected_adapters = adapters;
        self
    }
}

/// Governance record tracking one [`SemanticChange`] through review
///
/// Created pending or approved, never rejected. Transitions
/// pending -> approved/rejected exactly once, then terminal. While pending it
/// lives in the engine's pending table; terminal decisions survive in the
/// audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub change_id: Uuid,
    pub status: ApprovalStatus,
    /// Username of the deciding approver, or "system" for auto-approvals
    pub approver: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub auto_approved: bool,
    /// Snapshot of the change attributes the approval decision was based on
    pub approval_criteria: Value,
    /// When the request entered the workflow; drives expiry cleanup
    pub created_at: DateTime<Utc>,
}

/// One auto-approval predicate over change attributes
///
/// Unset fields are wildcards; `owner` uses contains semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoApprovalCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaking_change: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Vec<String>>,
}

impl AutoApprovalCriterion {
    /// Check whether every specified field equals (or, for `owner`,
    /// contains) the corresponding change attribute.
    pub fn matches(&self, change: &SemanticChange) -> bool {
        if let Some(change_type) = self.change_type {
            if change.change_type != change_type {
                return false;
            }
        }
        if let Some(breaking) = self.breaking_change {
            if change.breaking_change != breaking {
                return false;
            }
        }
        if let Some(owners) = &self.owner {
            if !owners.contains(&change.author) {
                return false;
            }
        }
        true
    }
}

/// Named bundle of governance rules and auto-approval criteria
///
/// A change is auto-approvable if it matches ANY criterion of ANY active
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernancePolicy {
    pub name: String,
    pub description: String,
    /// Free-form rule documents; carried for reporting, not evaluated here
    #[serde(default)]
    pub rules: Vec<Value>,
    #[serde(default)]
    pub auto_approval_criteria: Vec<AutoApprovalCriterion>,
    #[serde(default = "default_required_approvers")]
    pub required_approvers: u32,
    #[serde(default)]
    pub steward_domains: Vec<String>,
    #[serde(default)]
    pub notification_channels: Vec<String>,
}

fn default_required_approvers() -> u32 {
    1
}

impl GovernancePolicy {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            rules: Vec::new(),
            auto_approval_criteria: Vec::new(),
            required_approvers: 1,
            steward_domains: Vec::new(),
            notification_channels: Vec::new(),
        }
    }

    pub fn with_criteria(mut self, criteria: Vec<AutoApprovalCriterion>) -> Self {
        self.auto_approval_criteria = criteria;
        self
    }
}

/// Boundary payload for submitting a change through an API layer
///
/// Caller input is validated here, before anything reaches the engine.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSubmission {
    pub change_type: ChangeType,
    #[validate(length(min = 1, message = "metric name must not be empty"))]
    pub metric_name: String,
    pub old_definition: Option<Value>,
    pub new_definition: Value,
    #[validate(length(min = 1, message = "description must not be empty"))]
    pub description: String,
    /// Required unless the workflow config waives justifications
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub affected_adapters: Vec<String>,
    #[serde(default)]
    pub breaking_change: bool,
}

impl ChangeSubmission {
    /// Validate caller input and build the immutable change record
    ///
    /// The justification requirement follows the workflow configuration;
    /// the remaining field rules are always enforced. The author identity
    /// comes from the authenticated caller, never the payload.
    pub fn into_change(
        self,
        workflow: &WorkflowConfig,
        author: &str,
        author_email: &str,
    ) -> GovernanceResult<SemanticChange> {
        self.validate()
            .map_err(|e| GovernanceError::Validation(e.to_string()))?;
        if workflow.require_justification && self.justification.trim().is_empty() {
            return Err(GovernanceError::Validation(
                "justification must not be empty".to_string(),
            ));
        }

        Ok(SemanticChange {
            id: Uuid::new_v4(),
            change_type: self.change_type,
            metric_name: self.metric_name,
            old_definition: self.old_definition,
            new_definition: self.new_definition,
            author: author.to_string(),
            author_email: author_email.to_string(),
            created_at: Utc::now(),
            description: self.description,
            justification: self.justification,
            affected_adapters: self.affected_adapters,
            breaking_change: self.breaking_change,
        })
    }
}

/// Boundary payload for a rejection decision; the reason is mandatory
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInput {
    pub approval_id: Uuid,
    #[validate(length(min = 1, message = "a rejection reason is required"))]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_change(change_type: ChangeType, author: &str, breaking: bool) -> SemanticChange {
        SemanticChange::new(
            change_type,
            "revenue_mrr",
            None,
            json!({"expression": "SUM(amount)"}),
            author,
            format!("{author}@example.com"),
            "test change",
            "because",
        )
        .with_breaking(breaking)
    }

    #[test]
    fn empty_criterion_matches_everything() {
        let criterion = AutoApprovalCriterion::default();
        assert!(criterion.matches(&sample_change(ChangeType::Create, "alice", false)));
        assert!(criterion.matches(&sample_change(ChangeType::Delete, "bob", true)));
    }

    #[test]
    fn criterion_fields_are_conjunctive() {
        let criterion = AutoApprovalCriterion {
            change_type: Some(ChangeType::Update),
            breaking_change: Some(false),
            owner: Some(vec!["alice".to_string(), "carol".to_string()]),
        };
        assert!(criterion.matches(&sample_change(ChangeType::Update, "alice", false)));
        assert!(!criterion.matches(&sample_change(ChangeType::Create, "alice", false)));
        assert!(!criterion.matches(&sample_change(ChangeType::Update, "alice", true)));
        assert!(!criterion.matches(&sample_change(ChangeType::Update, "bob", false)));
    }

    fn sample_submission(justification: &str) -> ChangeSubmission {
        ChangeSubmission {
            change_type: ChangeType::Update,
            metric_name: "revenue_mrr".to_string(),
            old_definition: Some(json!({"expression": "SUM(a)"})),
            new_definition: json!({"expression": "SUM(b)"}),
            description: "switch aggregation".to_string(),
            justification: justification.to_string(),
            affected_adapters: vec!["looker".to_string()],
            breaking_change: true,
        }
    }

    #[test]
    fn submission_converts_into_a_change() {
        let change = sample_submission("finance request")
            .into_change(&WorkflowConfig::default(), "alice", "alice@example.com")
            .unwrap();
        assert_eq!(change.change_type, ChangeType::Update);
        assert_eq!(change.metric_name, "revenue_mrr");
        assert_eq!(change.author, "alice");
        assert_eq!(change.justification, "finance request");
        assert!(change.breaking_change);
    }

    #[test]
    fn submission_justification_follows_workflow_config() {
        let err = sample_submission("  ")
            .into_change(&WorkflowConfig::default(), "alice", "alice@example.com")
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));

        let relaxed = WorkflowConfig {
            require_justification: false,
            ..Default::default()
        };
        let change = sample_submission("")
            .into_change(&relaxed, "alice", "alice@example.com")
            .unwrap();
        assert_eq!(change.justification, "");
    }

    #[test]
    fn submission_rejects_empty_metric_name() {
        let mut submission = sample_submission("fine");
        submission.metric_name = String::new();
        let relaxed = WorkflowConfig {
            require_justification: false,
            ..Default::default()
        };
        let err = submission
            .into_change(&relaxed, "alice", "alice@example.com")
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[test]
    fn decision_input_requires_reason() {
        let input = DecisionInput {
            approval_id: Uuid::new_v4(),
            reason: String::new(),
        };
        assert!(input.validate().is_err());

        let input = DecisionInput {
            approval_id: Uuid::new_v4(),
            reason: "stale definition".to_string(),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ChangeType::Update).unwrap(),
            "\"update\""
        );
        assert_eq!(
            serde_json::to_string(&ApprovalStatus::ChangesRequested).unwrap(),
            "\"changes_requested\""
        );
        assert_eq!(serde_json::to_string(&UserRole::Steward).unwrap(), "\"steward\"");
    }
}
