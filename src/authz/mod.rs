//! Authorization module - permission resolution engine
//!
//! This module implements the resolution engine with support for:
//! - Superuser/staff bypass and resource ownership
//! - Role grants, optionally narrowed by a per-assignment resource scope
//! - Direct, time-bounded grants on a single resource
//! - Condition sets attached to grants

mod condition;
mod evaluator;
mod scope;

pub use condition::{Condition, ConditionSet};
pub use evaluator::{AllowReason, Decision, DefaultPolicyEvaluator, DenyReason, PolicyEvaluator};
pub use scope::{ResourceScope, ScopeRule};
