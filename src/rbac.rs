//! Role-based access control
//!
//! Resolves (user, resource, permission, optional resource id) tuples to
//! allow/deny decisions using a static role table plus domain-scoped
//! overrides. Domain assignment lets teams manage their own metrics.

use crate::audit::{AuditAction, AuditLogger};
use crate::error::GovernanceResult;
use crate::models::{User, UserRole};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Grantable permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Approve,
    Delete,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Approve => "approve",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
        }
    }
}

/// Governed resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Metric,
    Dimension,
    Adapter,
    Approval,
    Audit,
    User,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Metric => "metric",
            Resource::Dimension => "dimension",
            Resource::Adapter => "adapter",
            Resource::Approval => "approval",
            Resource::Audit => "audit",
            Resource::User => "user",
        }
    }
}

/// Static role -> resource -> permissions table
static ROLE_PERMISSIONS: Lazy<HashMap<UserRole, HashMap<Resource, Vec<Permission>>>> =
    Lazy::new(|| {
        use Permission::*;
        use Resource::*;

        let mut table = HashMap::new();

        table.insert(
            UserRole::Analyst,
            HashMap::from([
                (Metric, vec![Read]),
                (Dimension, vec![Read]),
                (Adapter, vec![Read]),
            ]),
        );

        table.insert(
            UserRole::Steward,
            HashMap::from([
                (Metric, vec![Read, Write, Approve]),
                (Dimension, vec![Read, Write, Approve]),
                (Adapter, vec![Read, Write]),
                (Approval, vec![Read, Write]),
                (Audit, vec![Read]),
            ]),
        );

        table.insert(
            UserRole::Admin,
            HashMap::from([
                (Metric, vec![Read, Write, Approve, Delete, Admin]),
                (Dimension, vec![Read, Write, Approve, Delete, Admin]),
                (Adapter, vec![Read, Write, Delete, Admin]),
                (Approval, vec![Read, Write, Approve, Delete, Admin]),
                (Audit, vec![Read, Admin]),
                (User, vec![Read, Write, Delete, Admin]),
            ]),
        );

        table
    });

/// Comprehensive per-user permission summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSummary {
    pub username: String,
    pub role: UserRole,
    pub teams: Vec<String>,
    pub domains: Vec<String>,
    pub accessible_metrics_count: usize,
    pub can_write_metrics: bool,
    pub can_approve_changes: bool,
    pub can_delete_metrics: bool,
    pub can_manage_users: bool,
    pub can_view_audit: bool,
}

/// Access control manager owning the user registry and domain mappings
///
/// The domain/steward maps are exclusively owned here; other components go
/// through the public methods.
pub struct AccessControlManager {
    audit: Arc<AuditLogger>,
    users: RwLock<HashMap<String, User>>,
    /// domain -> steward usernames
    domain_stewards: RwLock<HashMap<String, Vec<String>>>,
    /// metric name -> assigned domain (None while ungated)
    metric_domains: RwLock<HashMap<String, Option<String>>>,
}

impl AccessControlManager {
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self {
            audit,
            users: RwLock::new(HashMap::new()),
            domain_stewards: RwLock::new(HashMap::new()),
            metric_domains: RwLock::new(HashMap::new()),
        }
    }

    /// Register a user
    pub async fn add_user(&self, user: User) -> GovernanceResult<()> {
        let username = user.username.clone();
        let role = user.role;
        {
            let mut users = self.users.write().await;
            users.insert(username.clone(), user);
        }
        self.audit
            .log_action(
                &username,
                AuditAction::UserCreated,
                Resource::User.as_str(),
                &username,
                serde_json::json!({ "role": role }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, username: &str) -> Option<User> {
        let users = self.users.read().await;
        users.get(username).cloned()
    }

    /// Assign a user as steward for a domain; repeated assignment is a no-op
    pub async fn assign_domain_steward(&self, domain: &str, username: &str) -> GovernanceResult<()> {
        let newly_assigned = {
            let mut stewards = self.domain_stewards.write().await;
            let entry = stewards.entry(domain.to_string()).or_default();
            if entry.iter().any(|s| s == username) {
                false
            } else {
                entry.push(username.to_string());
                true
            }
        };

        // Mirror the assignment into the user's team list
        {
            let mut users = self.users.write().await;
            if let Some(user) = users.get_mut(username) {
                if !user.teams.iter().any(|t| t == domain) {
                    user.teams.push(domain.to_string());
                }
            }
        }

        if newly_assigned {
            self.audit
                .log_action(
                    username,
                    AuditAction::StewardAssigned,
                    Resource::User.as_str(),
                    username,
                    serde_json::json!({ "domain": domain }),
                )
                .await?;
        }
        Ok(())
    }

    /// Register a metric with no domain gate
    pub async fn register_metric(&self, metric_name: &str) {
        let mut domains = self.metric_domains.write().await;
        domains.entry(metric_name.to_string()).or_insert(None);
    }

    /// Assign a metric to a domain (last write wins)
    pub async fn set_metric_domain(&self, metric_name: &str, domain: &str) -> GovernanceResult<()> {
        {
            let mut domains = self.metric_domains.write().await;
            domains.insert(metric_name.to_string(), Some(domain.to_string()));
        }
        self.audit
            .log_action(
                "system",
                AuditAction::MetricDomainAssigned,
                Resource::Metric.as_str(),
                metric_name,
                serde_json::json!({ "domain": domain }),
            )
            .await?;
        Ok(())
    }

    /// Resolve an access decision
    ///
    /// Resolution order: user existence, role table, domain gate (metric and
    /// dimension resources with a resource id), then per-user overrides.
    /// A role-table miss denies before overrides are consulted, so overrides
    /// can only confirm an allow the role already granted.
    pub async fn check_permission(
        &self,
        username: &str,
        resource: Resource,
        permission: Permission,
        resource_id: Option<&str>,
    ) -> bool {
        let users = self.users.read().await;
        let Some(user) = users.get(username) else {
            return false;
        };

        let Some(role_perms) = ROLE_PERMISSIONS.get(&user.role) else {
            return false;
        };
        let Some(granted) = role_perms.get(&resource) else {
            debug!(username, resource = resource.as_str(), "role table miss");
            return false;
        };
        if !granted.contains(&permission) {
            return false;
        }

        if matches!(resource, Resource::Metric | Resource::Dimension) {
            if let Some(resource_id) = resource_id {
                return self.check_domain_access(user, resource_id).await;
            }
        }

        if let Some(user_perms) = user.permissions.get(resource.as_str()) {
            if user_perms.iter().any(|p| p == permission.as_str()) {
                return true;
            }
        }

        true // role already granted it
    }

    /// Domain gate for a specific metric or dimension
    async fn check_domain_access(&self, user: &User, resource_id: &str) -> bool {
        if user.role == UserRole::Admin {
            return true;
        }

        let domains = self.metric_domains.read().await;
        let domain = match domains.get(resource_id) {
            // Unknown or ungated metrics are open to anyone the role admits
            None | Some(None) => return true,
            Some(Some(domain)) => domain.clone(),
        };
        drop(domains);

        if user.teams.iter().any(|t| t == &domain) {
            return true;
        }

        let stewards = self.domain_stewards.read().await;
        stewards
            .get(&domain)
            .map(|list| list.iter().any(|s| s == &user.username))
            .unwrap_or(false)
    }

    pub async fn can_read_metric(&self, username: &str, metric_name: &str) -> bool {
        self.check_permission(username, Resource::Metric, Permission::Read, Some(metric_name))
            .await
    }

    pub async fn can_write_metric(&self, username: &str, metric_name: &str) -> bool {
        self.check_permission(username, Resource::Metric, Permission::Write, Some(metric_name))
            .await
    }

    pub async fn can_approve_changes(&self, username: &str, metric_name: &str) -> bool {
        self.check_permission(username, Resource::Metric, Permission::Approve, Some(metric_name))
            .await
    }

    pub async fn can_view_audit(&self, username: &str) -> bool {
        self.check_permission(username, Resource::Audit, Permission::Read, None)
            .await
    }

    /// Domains the user can act in: team memberships plus steward assignments
    pub async fn get_user_domains(&self, username: &str) -> Vec<String> {
        let users = self.users.read().await;
        let Some(user) = users.get(username) else {
            return Vec::new();
        };
        let mut domains: HashSet<String> = user.teams.iter().cloned().collect();
        drop(users);

        let stewards = self.domain_stewards.read().await;
        for (domain, list) in stewards.iter() {
            if list.iter().any(|s| s == username) {
                domains.insert(domain.clone());
            }
        }
        domains.into_iter().collect()
    }

    /// Metrics the user can access; admins see everything, others see
    /// in-domain and ungated metrics
    pub async fn get_accessible_metrics(&self, username: &str) -> Vec<String> {
        let users = self.users.read().await;
        let Some(user) = users.get(username) else {
            return Vec::new();
        };
        let is_admin = user.role == UserRole::Admin;
        drop(users);

        let metric_domains = self.metric_domains.read().await;
        if is_admin {
            return metric_domains.keys().cloned().collect();
        }

        let user_domains = self.get_user_domains(username).await;
        metric_domains
            .iter()
            .filter(|(_, domain)| match domain {
                Some(domain) => user_domains.iter().any(|d| d == domain),
                None => true,
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Comprehensive permission summary for one user
    pub async fn get_permission_summary(&self, username: &str) -> Option<PermissionSummary> {
        let user = self.get_user(username).await?;
        let domains = self.get_user_domains(username).await;
        let accessible = self.get_accessible_metrics(username).await;

        Some(PermissionSummary {
            username: user.username.clone(),
            role: user.role,
            teams: user.teams.clone(),
            domains,
            accessible_metrics_count: accessible.len(),
            can_write_metrics: matches!(user.role, UserRole::Steward | UserRole::Admin),
            can_approve_changes: matches!(user.role, UserRole::Steward | UserRole::Admin),
            can_delete_metrics: user.role == UserRole::Admin,
            can_manage_users: user.role == UserRole::Admin,
            can_view_audit: matches!(user.role, UserRole::Steward | UserRole::Admin),
        })
    }
}
