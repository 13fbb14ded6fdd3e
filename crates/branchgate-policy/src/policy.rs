//! Branch-gated policy construction
//!
//! Builds a [`Policy`] from branch specifications and compiles it to a P2WSH
//! miniscript descriptor.
//!
//! # Policy Structure
//!
//! ```text
//! or(
//!   BRANCH_1,
//!   or(BRANCH_2, or(BRANCH_3, ...))
//! )
//!
//! BRANCH   = thresh(k, pk(K1), ..., pk(Kn))               (ungated)
//!          | and(thresh(k, pk(K1), ..., pk(Kn)), after(H)) (gated)
//! ```
//!
//! `H = reference_height + offset` is computed once, in [`build_policy`].

use bitcoin::{Address, Network, ScriptBuf};
use miniscript::descriptor::{DefiniteDescriptorKey, DescriptorPublicKey};
use miniscript::policy::Concrete;
use miniscript::{AbsLockTime, Descriptor, Miniscript, Segwitv0};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Heights at or above this value are interpreted as UNIX timestamps by
/// `nLockTime`, so a height gate must stay below it.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy has no branches")]
    NoBranches,

    #[error("Invalid threshold in branch '{branch}': {required} of {size} keys")]
    InvalidThreshold {
        branch: String,
        required: usize,
        size: usize,
    },

    #[error("Invalid time gate in branch '{branch}': {reason}")]
    InvalidTimeGate { branch: String, reason: String },

    #[error("Duplicate branch id: {0}")]
    DuplicateBranch(String),

    #[error("Key {0} appears more than once in the policy")]
    DuplicateKey(String),

    #[error("Every branch is time-gated; funds would be frozen until the earliest gate")]
    NoUngatedBranch,

    #[error("Miniscript error: {0}")]
    Miniscript(#[from] miniscript::Error),

    #[error("Policy compilation failed: {0}")]
    Compilation(String),

    #[error("Compiled script failed sanity check: {0}")]
    Insane(String),
}

/// Specification of one branch before it is anchored to a reference height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSpec {
    /// Stable identifier ("daily", "recovery", ...)
    pub id: String,
    /// Signatures required (`k`)
    pub threshold: usize,
    /// Candidate signer keys (`n`)
    pub signers: Vec<DescriptorPublicKey>,
    /// Blocks after the reference height at which the branch opens.
    /// `None` means the branch is never time-gated.
    pub offset_blocks: Option<u32>,
}

impl BranchSpec {
    pub fn new(
        id: impl Into<String>,
        threshold: usize,
        signers: Vec<DescriptorPublicKey>,
        offset_blocks: Option<u32>,
    ) -> Self {
        Self {
            id: id.into(),
            threshold,
            signers,
            offset_blocks,
        }
    }
}

/// `k`-of-`n` signature requirement of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    required: usize,
    signers: Vec<DescriptorPublicKey>,
}

impl Authorization {
    /// Number of signatures required (`k`)
    pub fn required(&self) -> usize {
        self.required
    }

    /// All candidate signers
    pub fn signers(&self) -> &[DescriptorPublicKey] {
        &self.signers
    }

    /// Number of candidate signers (`n`)
    pub fn size(&self) -> usize {
        self.signers.len()
    }

    /// Signers that sign by default: the first `k`.
    pub fn default_signers(&self) -> &[DescriptorPublicKey] {
        &self.signers[..self.required]
    }

    fn to_policy(&self, branch: &str) -> Result<Concrete<DescriptorPublicKey>, PolicyError> {
        if self.signers.len() == 1 {
            return Ok(Concrete::Key(self.signers[0].clone()));
        }
        let key_policies: Vec<Arc<Concrete<DescriptorPublicKey>>> = self
            .signers
            .iter()
            .map(|k| Arc::new(Concrete::Key(k.clone())))
            .collect();
        let thresh = miniscript::Threshold::new(self.required, key_policies).map_err(|_| {
            PolicyError::InvalidThreshold {
                branch: branch.to_string(),
                required: self.required,
                size: self.signers.len(),
            }
        })?;
        Ok(Concrete::Thresh(thresh))
    }
}

/// Absolute block-height gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeGate {
    /// First block height at which the branch may be spent
    pub height: u32,
}

impl fmt::Display for TimeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "after block {}", self.height)
    }
}

/// A single spending branch, anchored to absolute heights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub id: String,
    pub authorization: Authorization,
    pub time_gate: Option<TimeGate>,
    /// Offset the gate was computed from (kept for display)
    pub offset_blocks: Option<u32>,
}

impl Branch {
    pub fn is_gated(&self) -> bool {
        self.time_gate.is_some()
    }

    fn to_policy(&self) -> Result<Concrete<DescriptorPublicKey>, PolicyError> {
        let auth = self.authorization.to_policy(&self.id)?;
        match self.time_gate {
            None => Ok(auth),
            Some(gate) => {
                let after = AbsLockTime::from_consensus(gate.height).map_err(|e| {
                    PolicyError::InvalidTimeGate {
                        branch: self.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Concrete::And(vec![Arc::new(auth), Arc::new(Concrete::After(after))]))
            }
        }
    }
}

/// A branch-gated spending policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    reference_height: u32,
    branches: Vec<Branch>,
}

/// Check everything about `specs` that does not depend on a reference height.
///
/// Empty policies, bad thresholds, empty signer lists, zero offsets and
/// duplicate ids or keys are rejected here, so callers can fail before
/// touching the network.
pub fn validate_specs(specs: &[BranchSpec]) -> Result<(), PolicyError> {
    if specs.is_empty() {
        return Err(PolicyError::NoBranches);
    }

    let mut seen_ids = HashSet::new();
    let mut seen_keys = HashSet::new();

    for spec in specs {
        if !seen_ids.insert(spec.id.as_str()) {
            return Err(PolicyError::DuplicateBranch(spec.id.clone()));
        }

        let size = spec.signers.len();
        if spec.threshold == 0 || spec.threshold > size {
            return Err(PolicyError::InvalidThreshold {
                branch: spec.id.clone(),
                required: spec.threshold,
                size,
            });
        }

        for key in &spec.signers {
            let key_str = key.to_string();
            if !seen_keys.insert(key_str.clone()) {
                return Err(PolicyError::DuplicateKey(key_str));
            }
        }

        if spec.offset_blocks == Some(0) {
            return Err(PolicyError::InvalidTimeGate {
                branch: spec.id.clone(),
                reason: "offset must be at least one block".into(),
            });
        }
    }
    Ok(())
}

/// Build a policy from branch specifications.
///
/// Every relative offset becomes an absolute gate `reference_height + offset`
/// here and nowhere else; the resulting heights stay fixed for the lifetime of
/// the address.
///
/// Does not require an ungated branch; see [`Policy::ensure_liveness`].
pub fn build_policy(specs: Vec<BranchSpec>, reference_height: u32) -> Result<Policy, PolicyError> {
    validate_specs(&specs)?;

    let mut branches = Vec::with_capacity(specs.len());

    for spec in specs {
        let time_gate = match spec.offset_blocks {
            None => None,
            Some(offset) => {
                let height = reference_height
                    .checked_add(offset)
                    .filter(|h| *h < LOCKTIME_THRESHOLD)
                    .ok_or_else(|| PolicyError::InvalidTimeGate {
                        branch: spec.id.clone(),
                        reason: format!(
                            "{} + {} is not a valid block height",
                            reference_height, offset
                        ),
                    })?;
                Some(TimeGate { height })
            }
        };

        branches.push(Branch {
            id: spec.id,
            authorization: Authorization {
                required: spec.threshold,
                signers: spec.signers,
            },
            time_gate,
            offset_blocks: spec.offset_blocks,
        });
    }

    log::debug!(
        "Built policy with {} branches at reference height {}",
        branches.len(),
        reference_height
    );

    Ok(Policy {
        reference_height,
        branches,
    })
}

impl Policy {
    /// Tip height the gates were computed from
    pub fn reference_height(&self) -> u32 {
        self.reference_height
    }

    /// Branches, in declaration order
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Look up a branch by id
    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    /// Whether some branch can be spent without waiting for a gate
    pub fn has_ungated_branch(&self) -> bool {
        self.branches.iter().any(|b| !b.is_gated())
    }

    /// Fail if every branch is gated.
    pub fn ensure_liveness(&self) -> Result<(), PolicyError> {
        if self.has_ungated_branch() {
            Ok(())
        } else {
            Err(PolicyError::NoUngatedBranch)
        }
    }

    /// Build a concrete policy (for compilation to miniscript)
    pub fn to_concrete_policy(&self) -> Result<Concrete<DescriptorPublicKey>, PolicyError> {
        let mut policies = self
            .branches
            .iter()
            .map(|b| b.to_policy().map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        // Nest right-to-left: or(b1, or(b2, or(b3, ...)))
        let mut combined = policies.pop().ok_or(PolicyError::NoBranches)?;
        while let Some(branch) = policies.pop() {
            combined = Arc::new(Concrete::Or(vec![(1, branch), (1, combined)]));
        }
        Ok(Arc::unwrap_or_clone(combined))
    }

    /// Compile to a sanity-checked P2WSH descriptor
    pub fn compile(&self) -> Result<CompiledPolicy, PolicyError> {
        let policy = self.to_concrete_policy()?;
        let ms: Miniscript<DescriptorPublicKey, Segwitv0> = policy
            .compile()
            .map_err(|e| PolicyError::Compilation(e.to_string()))?;
        ms.sanity_check()
            .map_err(|e| PolicyError::Insane(e.to_string()))?;

        let miniscript = ms.to_string();
        let descriptor = Descriptor::new_wsh(ms)?;

        Ok(CompiledPolicy {
            expression: policy.to_string(),
            miniscript,
            descriptor,
        })
    }
}

/// Output of the policy compiler.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    expression: String,
    miniscript: String,
    descriptor: Descriptor<DescriptorPublicKey>,
}

impl CompiledPolicy {
    /// Policy language expression the script was compiled from
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Compiled miniscript (inside the `wsh()` wrapper)
    pub fn miniscript(&self) -> &str {
        &self.miniscript
    }

    pub fn descriptor(&self) -> &Descriptor<DescriptorPublicKey> {
        &self.descriptor
    }

    /// Descriptor with every key at its concrete derivation
    pub fn definite(&self) -> Result<Descriptor<DefiniteDescriptorKey>, PolicyError> {
        self.descriptor
            .at_derivation_index(0)
            .map_err(|e| PolicyError::Compilation(e.to_string()))
    }

    /// Receiving address of the policy
    pub fn address(&self, network: Network) -> Result<Address, PolicyError> {
        Ok(self.definite()?.address(network)?)
    }

    /// Output script locking the funds
    pub fn script_pubkey(&self) -> Result<ScriptBuf, PolicyError> {
        Ok(self.definite()?.script_pubkey())
    }
}
