//! Spend session
//!
//! A [`Session`] owns one policy for its whole lifetime: the reference height
//! is read once at initialization and the address never changes afterwards.
//! Every spend runs the same pipeline and stops at the first failure:
//!
//! ```text
//! tip ─▶ utxos ─▶ select ─▶ plan ─▶ authorize ─▶ prev tx ─▶ assemble
//!                                                              │
//!                 classify ◀─ broadcast ◀─ finalize ◀─ sign ◀──┘
//! ```
//!
//! Nothing is broadcast unless every earlier step succeeded.

use crate::assemble::assemble;
use crate::broadcast::{BroadcastClassifier, BroadcastOutcome};
use crate::error::SpendError;
use crate::plan::{plan, SpendPlan, DEFAULT_FEE_SATS};
use crate::select::{select, sort_oldest_first, total_value};
use bitcoin::bip32::Xpriv;
use bitcoin::{absolute, Address, Amount, Network, Txid};
use branchgate_chain::{classify_activity, latest, Activity, ChainSource, Utxo};
use branchgate_policy::{
    authorize, build_policy, evaluate, validate_specs, BranchSpec, CompiledPolicy, Policy,
    StatusMap,
};
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

/// Progress of a single spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpendStage {
    Idle,
    UtxoSelected,
    PlanComputed,
    Assembled,
    Signed,
    Finalized,
    Broadcast,
}

impl fmt::Display for SpendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpendStage::Idle => "idle",
            SpendStage::UtxoSelected => "utxo-selected",
            SpendStage::PlanComputed => "plan-computed",
            SpendStage::Assembled => "assembled",
            SpendStage::Signed => "signed",
            SpendStage::Finalized => "finalized",
            SpendStage::Broadcast => "broadcast",
        };
        f.write_str(s)
    }
}

/// Observable lifecycle of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Ready {
        reference_height: u32,
        address: Address,
    },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub network: Network,
    /// Flat fee per spend
    pub fee: Amount,
    pub classifier: BroadcastClassifier,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            fee: Amount::from_sat(DEFAULT_FEE_SATS),
            classifier: BroadcastClassifier::default(),
        }
    }
}

/// Balance of the policy address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundsReport {
    /// Oldest first
    pub utxos: Vec<Utxo>,
    pub total: Amount,
}

/// A transaction accepted by the explorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendReceipt {
    pub branch_id: String,
    pub txid: Txid,
    pub plan: SpendPlan,
    pub lock_time: absolute::LockTime,
    pub tx_hex: String,
}

struct ReadyState {
    policy: Policy,
    compiled: CompiledPolicy,
    address: Address,
}

pub struct Session<C: ChainSource> {
    chain: C,
    master: Xpriv,
    config: SessionConfig,
    ready: Option<ReadyState>,
    phase: watch::Sender<SessionPhase>,
}

fn enter(branch: &str, stage: SpendStage) {
    log::debug!("Spend via '{}': {}", branch, stage);
}

impl<C: ChainSource> Session<C> {
    /// Create an uninitialized session signing with `master`
    pub fn new(chain: C, master: Xpriv, config: SessionConfig) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Uninitialized);
        Self {
            chain,
            master,
            config,
            ready: None,
            phase,
        }
    }

    /// Receive every phase change from now on
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    /// Build the policy against the current chain tip.
    ///
    /// Specs are validated first; an invalid policy never reaches the chain.
    pub async fn initialize(&mut self, specs: Vec<BranchSpec>) -> Result<&Address, SpendError> {
        validate_specs(&specs)?;
        let tip = self
            .chain
            .tip_height()
            .await
            .map_err(SpendError::network("fetching the tip height"))?;
        self.initialize_at(specs, tip)
    }

    /// Build the policy against a known reference height.
    ///
    /// Re-initializing replaces the previous policy, and with it the address.
    pub fn initialize_at(
        &mut self,
        specs: Vec<BranchSpec>,
        reference_height: u32,
    ) -> Result<&Address, SpendError> {
        let policy = build_policy(specs, reference_height)?;
        if !policy.has_ungated_branch() {
            log::warn!("Every branch is time-gated: nothing can be spent before the first gate opens");
        }
        let compiled = policy.compile()?;
        let address = compiled.address(self.config.network)?;

        log::info!(
            "Policy ready at reference height {}: {} branches, address {}",
            reference_height,
            policy.branches().len(),
            address
        );
        log::debug!("Descriptor: {}", compiled.descriptor());

        self.phase.send_replace(SessionPhase::Ready {
            reference_height,
            address: address.clone(),
        });
        let ready = self.ready.insert(ReadyState {
            policy,
            compiled,
            address,
        });
        Ok(&ready.address)
    }

    fn ready(&self) -> Result<&ReadyState, SpendError> {
        self.ready.as_ref().ok_or(SpendError::NotInitialized)
    }

    pub fn policy(&self) -> Result<&Policy, SpendError> {
        Ok(&self.ready()?.policy)
    }

    pub fn compiled(&self) -> Result<&CompiledPolicy, SpendError> {
        Ok(&self.ready()?.compiled)
    }

    pub fn address(&self) -> Result<&Address, SpendError> {
        Ok(&self.ready()?.address)
    }

    /// Gate status of every branch at the current tip
    pub async fn status(&self) -> Result<StatusMap, SpendError> {
        let ready = self.ready()?;
        let height = self
            .chain
            .tip_height()
            .await
            .map_err(SpendError::network("fetching the tip height"))?;
        Ok(evaluate(&ready.policy, height))
    }

    pub async fn funds(&self) -> Result<FundsReport, SpendError> {
        let ready = self.ready()?;
        let mut utxos = self
            .chain
            .address_utxos(&ready.address)
            .await
            .map_err(SpendError::network("listing address outputs"))?;
        sort_oldest_first(&mut utxos);
        let total = total_value(&utxos);
        Ok(FundsReport { utxos, total })
    }

    /// Most recent transaction touching the policy address
    pub async fn last_activity(&self) -> Result<Option<Activity>, SpendError> {
        let ready = self.ready()?;
        let txs = self
            .chain
            .address_transactions(&ready.address)
            .await
            .map_err(SpendError::network("listing address transactions"))?;
        let script = ready.address.script_pubkey();
        Ok(latest(&txs).map(|tx| classify_activity(tx, &script)))
    }

    /// Spend the oldest output of the policy address to `destination`
    /// through `branch_id`.
    pub async fn spend(
        &self,
        branch_id: &str,
        destination: &Address,
    ) -> Result<SpendReceipt, SpendError> {
        let ready = self.ready()?;
        if ready.policy.branch(branch_id).is_none() {
            return Err(SpendError::UnknownBranch(branch_id.to_string()));
        }
        enter(branch_id, SpendStage::Idle);

        let current_height = self
            .chain
            .tip_height()
            .await
            .map_err(SpendError::network("fetching the tip height"))?;
        let utxos = self
            .chain
            .address_utxos(&ready.address)
            .await
            .map_err(SpendError::network("listing address outputs"))?;

        let utxo = select(&utxos)?;
        enter(branch_id, SpendStage::UtxoSelected);

        let spend_plan = plan(&utxo, self.config.fee)?;
        enter(branch_id, SpendStage::PlanComputed);

        // Refuse locally before touching any transaction
        let grant = authorize(&ready.policy, branch_id, current_height)?;

        let prev_tx = self
            .chain
            .raw_transaction(&utxo.txid)
            .await
            .map_err(SpendError::network("fetching the previous transaction"))?;

        let unsigned = assemble(&grant, &ready.compiled, &spend_plan, &prev_tx, destination)
            .map_err(SpendError::assembly(SpendStage::PlanComputed))?;
        enter(branch_id, SpendStage::Assembled);

        let signed = unsigned
            .sign(&self.master)
            .map_err(SpendError::assembly(SpendStage::Assembled))?;
        enter(branch_id, SpendStage::Signed);

        let finalized = signed
            .finalize()
            .map_err(SpendError::assembly(SpendStage::Signed))?;
        enter(branch_id, SpendStage::Finalized);

        let tx_hex = finalized.to_hex();
        let local_txid = finalized.txid();
        let response = self
            .chain
            .broadcast_raw(&tx_hex)
            .await
            .map_err(SpendError::network("broadcasting"))?;
        enter(branch_id, SpendStage::Broadcast);

        match self.config.classifier.classify(&response) {
            BroadcastOutcome::Sent(txid) => {
                if txid != local_txid {
                    log::warn!("Explorer reported txid {} for local transaction {}", txid, local_txid);
                }
                log::info!(
                    "Spent {} via '{}': {} ({} out)",
                    utxo.outpoint(),
                    branch_id,
                    txid,
                    spend_plan.value_out
                );
                Ok(SpendReceipt {
                    branch_id: branch_id.to_string(),
                    txid,
                    lock_time: finalized.tx().lock_time,
                    plan: spend_plan,
                    tx_hex,
                })
            }
            BroadcastOutcome::Premature { message } => {
                log::info!("Broadcast via '{}' rejected as premature: {}", branch_id, message);
                Err(SpendError::PrematureTimelock {
                    branch: branch_id.to_string(),
                    message,
                })
            }
            BroadcastOutcome::OtherFailure(text) => {
                log::warn!("Broadcast via '{}' rejected: {}", branch_id, text);
                Err(SpendError::OtherBroadcastFailure(text))
            }
        }
    }
}
