//! Branch gate evaluation.
//!
//! Pure logic: no I/O, no network. Takes a policy and the current chain
//! height, answers which branches are open. The caller fetches the height.
//!
//! ```text
//!   reference            gate
//!       |------ locked ----|------ spendable ------>
//!       R                  R + offset
//! ```

use crate::policy::{Branch, Policy};
use serde::Serialize;
use thiserror::Error;

/// Average block interval used for human-readable estimates.
const MINUTES_PER_BLOCK: u32 = 10;

/// Rough wall-clock wait in minutes for `blocks` blocks
pub fn approx_minutes(blocks: u32) -> u32 {
    blocks.saturating_mul(MINUTES_PER_BLOCK)
}

/// Status of one branch at a given height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchStatus {
    pub branch_id: String,
    /// Absolute gate, if the branch has one
    pub gate_height: Option<u32>,
    /// `gate_height - current_height`, floored at zero
    pub blocks_remaining: u32,
    pub spendable_now: bool,
}

impl BranchStatus {
    /// Rough wall-clock wait in minutes (~10 min per block)
    pub fn approx_minutes_remaining(&self) -> u32 {
        approx_minutes(self.blocks_remaining)
    }
}

/// Evaluate a single branch
pub fn branch_status(branch: &Branch, current_height: u32) -> BranchStatus {
    let blocks_remaining = branch
        .time_gate
        .map(|gate| gate.height.saturating_sub(current_height))
        .unwrap_or(0);

    BranchStatus {
        branch_id: branch.id.clone(),
        gate_height: branch.time_gate.map(|g| g.height),
        blocks_remaining,
        spendable_now: blocks_remaining == 0,
    }
}

/// Statuses of every branch, in policy order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMap {
    pub current_height: u32,
    statuses: Vec<BranchStatus>,
}

impl StatusMap {
    pub fn get(&self, branch_id: &str) -> Option<&BranchStatus> {
        self.statuses.iter().find(|s| s.branch_id == branch_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BranchStatus> {
        self.statuses.iter()
    }

    /// Branches that can be spent right now
    pub fn spendable(&self) -> impl Iterator<Item = &BranchStatus> {
        self.statuses.iter().filter(|s| s.spendable_now)
    }

    /// The locked branch that opens soonest, if any
    pub fn next_opening(&self) -> Option<&BranchStatus> {
        self.statuses
            .iter()
            .filter(|s| !s.spendable_now)
            .min_by_key(|s| s.blocks_remaining)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

/// Evaluate every branch of `policy` at `current_height`.
///
/// Never underflows: a height below the reference height simply reports the
/// full distance to each gate.
pub fn evaluate(policy: &Policy, current_height: u32) -> StatusMap {
    StatusMap {
        current_height,
        statuses: policy
            .branches()
            .iter()
            .map(|b| branch_status(b, current_height))
            .collect(),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Branch '{branch}' is locked until block {gate_height} ({blocks_remaining} blocks remaining)")]
    Locked {
        branch: String,
        gate_height: u32,
        blocks_remaining: u32,
    },
}

/// Proof that a branch was open at a specific height.
///
/// Only [`authorize`] hands these out, so anything that takes a grant knows
/// the gate check already happened.
#[derive(Debug, Clone, Copy)]
pub struct BranchGrant<'p> {
    branch: &'p Branch,
    evaluated_at: u32,
}

impl<'p> BranchGrant<'p> {
    pub fn branch(&self) -> &'p Branch {
        self.branch
    }

    /// Height the gate was checked against
    pub fn evaluated_at(&self) -> u32 {
        self.evaluated_at
    }

    pub fn gate_height(&self) -> Option<u32> {
        self.branch.time_gate.map(|g| g.height)
    }
}

/// Check that `branch_id` exists and is open at `current_height`.
pub fn authorize<'p>(
    policy: &'p Policy,
    branch_id: &str,
    current_height: u32,
) -> Result<BranchGrant<'p>, GateError> {
    let branch = policy
        .branch(branch_id)
        .ok_or_else(|| GateError::UnknownBranch(branch_id.to_string()))?;

    let status = branch_status(branch, current_height);
    if !status.spendable_now {
        return Err(GateError::Locked {
            branch: branch.id.clone(),
            gate_height: status.gate_height.unwrap_or_default(),
            blocks_remaining: status.blocks_remaining,
        });
    }

    Ok(BranchGrant {
        branch,
        evaluated_at: current_height,
    })
}
