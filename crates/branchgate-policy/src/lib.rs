//! branchgate policy module
//!
//! A spending policy is an ordered set of mutually exclusive branches. Each
//! branch needs `k` of its `n` signers and may additionally be gated behind an
//! absolute block height.
//!
//! # Example Policy
//!
//! ```text
//! or(
//!   thresh(2, pk(DAILY1), pk(DAILY2), pk(DAILY3)),
//!   or(
//!     and(thresh(1, pk(RECOVERY1), pk(RECOVERY2)), after(REF + 3)),
//!     and(pk(EMERGENCY), after(REF + 5))
//!   )
//! )
//! ```
//!
//! Gate heights are fixed when the policy is built: `REF` is the chain tip at
//! that moment, and the resulting address commits to the absolute heights.

pub mod evaluate;
pub mod participant;
pub mod policy;
pub mod template;

pub use evaluate::{approx_minutes, authorize, evaluate, BranchGrant, BranchStatus, GateError, StatusMap};
pub use participant::{Participant, ParticipantError};
pub use policy::{
    build_policy, validate_specs, Authorization, Branch, BranchSpec, CompiledPolicy, Policy, PolicyError, TimeGate,
};
pub use template::{BranchTemplate, ParticipantSpec, PolicyTemplate, TemplateError};
