//! Failure taxonomy of the spend controller

use crate::assemble::AssembleError;
use crate::plan::PlanError;
use crate::select::SelectError;
use crate::session::SpendStage;
use bitcoin::Amount;
use branchgate_chain::ChainError;
use branchgate_policy::{GateError, PolicyError, TemplateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpendError {
    #[error("Session is not initialized")]
    NotInitialized,

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    /// Refused locally; nothing was built or broadcast
    #[error("Branch '{branch}' unlocks at block {gate_height}: {blocks_remaining} blocks remaining")]
    BranchLocked {
        branch: String,
        gate_height: u32,
        blocks_remaining: u32,
    },

    #[error("No funds at the policy address")]
    NoFunds,

    #[error("Output of {value} cannot cover the {fee} fee")]
    InsufficientFunds { value: Amount, fee: Amount },

    #[error("Network failure while {during}: {source}")]
    NetworkFailure {
        during: &'static str,
        #[source]
        source: ChainError,
    },

    #[error("Spend failed after stage {stage}: {source}")]
    Assembly {
        stage: SpendStage,
        #[source]
        source: AssembleError,
    },

    /// The node rejected the transaction as not final yet
    #[error("Timelock of branch '{branch}' not yet satisfied: {message}")]
    PrematureTimelock { branch: String, message: String },

    #[error("Broadcast rejected: {0}")]
    OtherBroadcastFailure(String),
}

impl SpendError {
    /// Whether waiting for more blocks could make the same spend succeed
    pub fn is_premature(&self) -> bool {
        matches!(
            self,
            SpendError::BranchLocked { .. } | SpendError::PrematureTimelock { .. }
        )
    }

    pub(crate) fn network(during: &'static str) -> impl FnOnce(ChainError) -> SpendError {
        move |source| SpendError::NetworkFailure { during, source }
    }

    pub(crate) fn assembly(stage: SpendStage) -> impl FnOnce(AssembleError) -> SpendError {
        move |source| SpendError::Assembly { stage, source }
    }
}

impl From<PolicyError> for SpendError {
    fn from(e: PolicyError) -> Self {
        SpendError::InvalidPolicy(e.to_string())
    }
}

impl From<TemplateError> for SpendError {
    fn from(e: TemplateError) -> Self {
        SpendError::InvalidPolicy(e.to_string())
    }
}

impl From<GateError> for SpendError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::UnknownBranch(id) => SpendError::UnknownBranch(id),
            GateError::Locked {
                branch,
                gate_height,
                blocks_remaining,
            } => SpendError::BranchLocked {
                branch,
                gate_height,
                blocks_remaining,
            },
        }
    }
}

impl From<SelectError> for SpendError {
    fn from(e: SelectError) -> Self {
        match e {
            SelectError::NoFunds => SpendError::NoFunds,
        }
    }
}

impl From<PlanError> for SpendError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::InsufficientFunds { value, fee } => SpendError::InsufficientFunds { value, fee },
        }
    }
}
