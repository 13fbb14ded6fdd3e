//! Transaction assembly, signing and finalization
//!
//! ```text
//! BranchGrant + SpendPlan + prev tx
//!        │  assemble()
//!        ▼
//!   UnsignedSpend ──sign()──▶ SignedSpend ──finalize()──▶ FinalizedSpend
//! ```
//!
//! The miniscript planner only gets the keys of the granted branch (and its
//! gate height as an available locktime), so it cannot pick a satisfaction
//! through any other branch. The resulting plan is cross-checked against the
//! grant before a PSBT is built.

use crate::plan::SpendPlan;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::{GetKey, Psbt};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{absolute, transaction, Address, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use branchgate_policy::{BranchGrant, CompiledPolicy, PolicyError};
use miniscript::plan::Assets;
use miniscript::psbt::PsbtExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Previous output does not match the selected UTXO: {0}")]
    PrevoutMismatch(String),

    #[error("Branch '{0}' cannot satisfy the policy with its signers")]
    Unsatisfiable(String),

    #[error("Planned locktime {planned:?} does not match gate {expected:?} of branch '{branch}'")]
    TimelockMismatch {
        branch: String,
        expected: Option<u32>,
        planned: Option<u32>,
    },

    #[error("Invalid locktime: {0}")]
    LockTime(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("PSBT error: {0}")]
    Psbt(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Only {have} of {need} signatures available")]
    MissingSignatures { have: usize, need: usize },

    #[error("Finalization failed: {0}")]
    Finalize(String),

    #[error("Extraction failed: {0}")]
    Extract(String),
}

/// Assembled, not yet signed
#[derive(Debug, Clone)]
pub struct UnsignedSpend {
    psbt: Psbt,
    branch_id: String,
    required_sigs: usize,
}

/// Signed with enough keys for the branch
#[derive(Debug, Clone)]
pub struct SignedSpend {
    psbt: Psbt,
    branch_id: String,
}

/// Final, broadcastable transaction
#[derive(Debug, Clone)]
pub struct FinalizedSpend {
    tx: Transaction,
    branch_id: String,
}

/// Build the PSBT spending `spend.utxo` through the granted branch.
pub fn assemble(
    grant: &BranchGrant<'_>,
    compiled: &CompiledPolicy,
    spend: &SpendPlan,
    prev_tx: &Transaction,
    destination: &Address,
) -> Result<UnsignedSpend, AssembleError> {
    let branch = grant.branch();

    // The fetched transaction has to be the one the UTXO points at, and pay
    // the policy script.
    let prev_txid = prev_tx.compute_txid();
    if prev_txid != spend.utxo.txid {
        return Err(AssembleError::PrevoutMismatch(format!(
            "fetched {} for {}",
            prev_txid, spend.utxo.txid
        )));
    }
    let prevout = prev_tx
        .output
        .get(spend.utxo.vout as usize)
        .ok_or_else(|| {
            AssembleError::PrevoutMismatch(format!("no output {}", spend.utxo.outpoint()))
        })?
        .clone();
    if prevout.value != spend.utxo.value {
        return Err(AssembleError::PrevoutMismatch(format!(
            "value {} != {}",
            prevout.value, spend.utxo.value
        )));
    }
    if prevout.script_pubkey != compiled.script_pubkey()? {
        return Err(AssembleError::PrevoutMismatch(
            "output does not pay the policy script".into(),
        ));
    }

    let gate = grant
        .gate_height()
        .map(absolute::LockTime::from_height)
        .transpose()
        .map_err(|e| AssembleError::LockTime(e.to_string()))?;

    let mut assets = Assets::new();
    for key in branch.authorization.default_signers() {
        assets = assets.add(key.clone());
    }
    if let Some(lock) = gate {
        assets = assets.after(lock);
    }

    let plan = compiled
        .definite()?
        .plan(&assets)
        .map_err(|_| AssembleError::Unsatisfiable(branch.id.clone()))?;

    if plan.absolute_timelock != gate
        || gate.is_some_and(|g| g.to_consensus_u32() > grant.evaluated_at())
    {
        return Err(AssembleError::TimelockMismatch {
            branch: branch.id.clone(),
            expected: gate.map(|g| g.to_consensus_u32()),
            planned: plan.absolute_timelock.map(|g| g.to_consensus_u32()),
        });
    }

    let unsigned_tx = Transaction {
        version: transaction::Version::TWO,
        lock_time: plan.absolute_timelock.unwrap_or(absolute::LockTime::ZERO),
        input: vec![TxIn {
            previous_output: spend.utxo.outpoint(),
            script_sig: Default::default(),
            sequence: plan
                .relative_timelock
                .map(|lt| lt.to_sequence())
                .unwrap_or(Sequence::ENABLE_RBF_NO_LOCKTIME),
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: spend.value_out,
            script_pubkey: destination.script_pubkey(),
        }],
    };

    let mut psbt =
        Psbt::from_unsigned_tx(unsigned_tx).map_err(|e| AssembleError::Psbt(e.to_string()))?;
    let input = &mut psbt.inputs[0];
    plan.update_psbt_input(input);
    input.witness_utxo = Some(prevout);
    input.non_witness_utxo = Some(prev_tx.clone());

    log::debug!(
        "Assembled spend of {} via '{}' (locktime {})",
        spend.utxo.outpoint(),
        branch.id,
        psbt.unsigned_tx.lock_time
    );

    Ok(UnsignedSpend {
        psbt,
        branch_id: branch.id.clone(),
        required_sigs: branch.authorization.required(),
    })
}

impl UnsignedSpend {
    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Sign with every key `signer` can provide for this input.
    ///
    /// Fails unless the branch's threshold of signatures is reached.
    pub fn sign<K: GetKey>(mut self, signer: &K) -> Result<SignedSpend, AssembleError> {
        let secp = Secp256k1::new();
        self.psbt
            .sign(signer, &secp)
            .map_err(|(_, errors)| AssembleError::Signing(format!("{:?}", errors)))?;

        let have = self.psbt.inputs[0].partial_sigs.len();
        if have < self.required_sigs {
            return Err(AssembleError::MissingSignatures {
                have,
                need: self.required_sigs,
            });
        }

        Ok(SignedSpend {
            psbt: self.psbt,
            branch_id: self.branch_id,
        })
    }
}

impl SignedSpend {
    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    /// Build the witness and extract the final transaction
    pub fn finalize(mut self) -> Result<FinalizedSpend, AssembleError> {
        let secp = Secp256k1::verification_only();
        self.psbt.finalize_mut(&secp).map_err(|errors| {
            AssembleError::Finalize(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let tx = self
            .psbt
            .extract_tx()
            .map_err(|e| AssembleError::Extract(e.to_string()))?;

        Ok(FinalizedSpend {
            tx,
            branch_id: self.branch_id,
        })
    }
}

impl FinalizedSpend {
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Consensus-serialized hex, as explorers expect it
    pub fn to_hex(&self) -> String {
        serialize_hex(&self.tx)
    }
}
