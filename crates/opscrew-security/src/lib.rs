//! Security primitives for the OpsCrew orchestration engine.
//!
//! Everything that decides whether a task may reach an agent lives here: the
//! role-based action policy, input sanitization, the pre-dispatch security
//! gate, and the audit trail of its decisions.
//!
//! # Main types
//!
//! - [`RbacPolicy`]: Role → allowed actions, installed once per process.
//! - [`SecurityGate`]: Authorizes a task for an agent before dispatch.
//! - [`GatePolicy`]: Denylist patterns and structural limits for the gate.
//! - [`Sanitizer`]: Control-character and length checks for descriptions.
//! - [`AuditLog`]: Append-only JSONL record of gate decisions.

/// Audit logging module.
pub mod audit;
/// Pre-dispatch authorization gate.
pub mod gate;
/// Role-based access control policy.
pub mod rbac;
/// Input sanitization utilities.
pub mod sanitizer;

pub use audit::AuditLog;
pub use gate::{GatePolicy, SecurityGate};
pub use rbac::RbacPolicy;
pub use sanitizer::{SanitizeResult, Sanitizer};
