//! Governance core for a customer semantic layer
//!
//! Canonical metric and dimension definitions are governed here: change
//! proposals flow through an approval state machine with policy-driven
//! auto-approval, every action lands in an append-only audit trail, and
//! role-based access control with domain scoping decides who may do what.
//!
//! Out of scope by design: the HTTP API, vendor artifact generators, the
//! definition store, and real webhook/Git delivery. Those collaborate through
//! the boundary DTOs in [`models`] and the transport traits in [`notify`].

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod notify;
pub mod rbac;
pub mod state;

pub use audit::{AuditAction, AuditEntry, AuditLogger, TrailFilter};
pub use config::Settings;
pub use engine::{auto_approval_decision, ApprovalEngine};
pub use error::{GovernanceError, GovernanceResult};
pub use models::{
    ApprovalRequest, ApprovalStatus, ChangeType, GovernancePolicy, SemanticChange, User, UserRole,
};
pub use notify::{NotificationChannel, NotificationRouter};
pub use rbac::{AccessControlManager, Permission, Resource};
pub use state::Governance;
