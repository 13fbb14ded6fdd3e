//! End-to-end integration test for branchgate.
//!
//! Drives complete policy lifecycles without a live Bitcoin network:
//!
//! 1. Seed → participant keys → policy → address
//! 2. Funding, gate evaluation as blocks arrive
//! 3. Spending through each branch, with the resulting witness checked
//!    against the compiled descriptor
//! 4. Address history after a spend
//! 5. Custom TOML policies with watch-only participants
//!
//! Run with: cargo test --test e2e_integration

use bitcoin::absolute::LockTime;
use bitcoin::bip32::Xpriv;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{
    transaction, Address, Amount, Network, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use branchgate_chain::{ChainError, ChainSource, Direction, TxEndpoint, TxSummary, Utxo};
use branchgate_core::{derive_master, derive_seed, parse_mnemonic, MnemonicLanguage, DEMO_MNEMONIC};
use branchgate_policy::PolicyTemplate;
use branchgate_spend::{
    AssembleError, BroadcastClassifier, Session, SessionConfig, SpendError, SpendStage,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ============================================================================
// In-memory chain
// ============================================================================

/// A tiny chain: confirmed outputs, a tip, and a mempool that accepts any
/// transaction spending a known output.
#[derive(Default)]
struct Chain {
    tip: u32,
    txs: HashMap<Txid, Transaction>,
    heights: HashMap<Txid, Option<u32>>,
    unspent: Vec<OutPoint>,
    reject_with: Option<String>,
}

#[derive(Clone, Default)]
struct SimulatedChain(Arc<Mutex<Chain>>);

impl SimulatedChain {
    fn mine_to(&self, height: u32) {
        self.0.lock().unwrap().tip = height;
    }

    fn reject_with(&self, text: &str) {
        self.0.lock().unwrap().reject_with = Some(text.to_string());
    }

    fn fund(&self, address: &Address, sats: u64) -> Txid {
        let mut chain = self.0.lock().unwrap();
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([chain.txs.len() as u8 + 1; 32]),
                    vout: 0,
                },
                script_sig: Default::default(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(sats),
                script_pubkey: address.script_pubkey(),
            }],
        };
        let txid = tx.compute_txid();
        let tip = chain.tip;
        chain.txs.insert(txid, tx);
        chain.heights.insert(txid, Some(tip));
        chain.unspent.push(OutPoint { txid, vout: 0 });
        txid
    }

    fn output(chain: &Chain, outpoint: &OutPoint) -> Option<TxOut> {
        chain
            .txs
            .get(&outpoint.txid)
            .and_then(|tx| tx.output.get(outpoint.vout as usize))
            .cloned()
    }
}

impl ChainSource for SimulatedChain {
    async fn tip_height(&self) -> Result<u32, ChainError> {
        Ok(self.0.lock().unwrap().tip)
    }

    async fn address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, ChainError> {
        let chain = self.0.lock().unwrap();
        let script = address.script_pubkey();
        Ok(chain
            .unspent
            .iter()
            .filter_map(|op| {
                let out = Self::output(&chain, op)?;
                if out.script_pubkey != script {
                    return None;
                }
                let height = chain.heights.get(&op.txid).copied().flatten();
                Some(Utxo {
                    txid: op.txid,
                    vout: op.vout,
                    value: out.value,
                    confirmed: height.is_some(),
                    block_height: height,
                })
            })
            .collect())
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        let chain = self.0.lock().unwrap();
        chain.txs.get(txid).cloned().ok_or(ChainError::TxNotFound(*txid))
    }

    async fn broadcast_raw(&self, tx_hex: &str) -> Result<String, ChainError> {
        let mut chain = self.0.lock().unwrap();
        if let Some(text) = &chain.reject_with {
            return Ok(text.clone());
        }
        let tx: Transaction =
            deserialize_hex(tx_hex).map_err(|e| ChainError::Decode(e.to_string()))?;

        // Consensus: absolute locktime must be below the next block
        if tx.lock_time.is_block_height() && tx.lock_time.to_consensus_u32() > chain.tip {
            return Ok("sendrawtransaction RPC error: non-final".into());
        }
        for input in &tx.input {
            if !chain.unspent.contains(&input.previous_output) {
                return Ok("bad-txns-inputs-missingorspent".into());
            }
        }

        let spent: Vec<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        chain.unspent.retain(|op| !spent.contains(op));
        let txid = tx.compute_txid();
        chain.txs.insert(txid, tx);
        chain.heights.insert(txid, None);
        Ok(txid.to_string())
    }

    async fn address_transactions(&self, address: &Address) -> Result<Vec<TxSummary>, ChainError> {
        let chain = self.0.lock().unwrap();
        let script = address.script_pubkey();
        let endpoint = |o: &TxOut| TxEndpoint {
            script_pubkey: o.script_pubkey.clone(),
            value: o.value,
        };

        Ok(chain
            .txs
            .iter()
            .filter_map(|(txid, tx)| {
                let inputs: Vec<TxEndpoint> = tx
                    .input
                    .iter()
                    .filter_map(|i| Self::output(&chain, &i.previous_output))
                    .map(|o| endpoint(&o))
                    .collect();
                let outputs: Vec<TxEndpoint> = tx.output.iter().map(endpoint).collect();
                let touches = inputs.iter().chain(&outputs).any(|e| e.script_pubkey == script);
                touches.then(|| {
                    let height = chain.heights.get(txid).copied().flatten();
                    TxSummary {
                        txid: *txid,
                        confirmed: height.is_some(),
                        block_height: height,
                        inputs,
                        outputs,
                    }
                })
            })
            .collect())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn demo_master() -> Xpriv {
    let mnemonic = parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::Spanish).unwrap();
    derive_master(&derive_seed(&mnemonic, ""), Network::Testnet).unwrap()
}

fn destination() -> Address {
    Address::from_str("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx")
        .unwrap()
        .require_network(Network::Testnet)
        .unwrap()
}

async fn open(
    template: &PolicyTemplate,
    chain: &SimulatedChain,
    config: SessionConfig,
) -> Session<SimulatedChain> {
    let master = demo_master();
    let specs = template.branch_specs(&Secp256k1::new(), &master).unwrap();
    let mut session = Session::new(chain.clone(), master, config);
    session.initialize(specs).await.unwrap();
    session
}

// ============================================================================
// Lifecycles
// ============================================================================

#[tokio::test]
async fn test_inheritance_lifecycle() {
    let chain = SimulatedChain::default();
    chain.mine_to(2_000);
    let session = open(&PolicyTemplate::inheritance(), &chain, SessionConfig::default()).await;
    let address = session.address().unwrap().clone();

    chain.fund(&address, 100_000);
    chain.fund(&address, 50_000);

    // Descendants wait three blocks
    for height in 2_000..2_003 {
        chain.mine_to(height);
        let err = session.spend("inheritance", &destination()).await.unwrap_err();
        match err {
            SpendError::BranchLocked {
                blocks_remaining, ..
            } => assert_eq!(blocks_remaining, 2_003 - height),
            other => panic!("height {}: expected BranchLocked, got {:?}", height, other),
        }
    }

    chain.mine_to(2_003);
    let status = session.status().await.unwrap();
    assert!(status.get("inheritance").unwrap().spendable_now);
    assert!(!status.get("recovery").unwrap().spendable_now);

    let first = session.spend("inheritance", &destination()).await.unwrap();
    assert_eq!(first.lock_time, LockTime::from_height(2_003).unwrap());

    // The remaining output goes to the owner, who never waits
    let second = session.spend("progenitor", &destination()).await.unwrap();
    assert_eq!(second.lock_time, LockTime::ZERO);
    assert_ne!(first.plan.utxo.outpoint(), second.plan.utxo.outpoint());

    let funds = session.funds().await.unwrap();
    assert!(funds.utxos.is_empty());
    assert!(matches!(
        session.spend("progenitor", &destination()).await,
        Err(SpendError::NoFunds)
    ));

    let last = session.last_activity().await.unwrap().unwrap();
    assert_eq!(last.direction, Direction::Outgoing);
    assert!(last.block_height.is_none());
}

#[tokio::test]
async fn test_self_custody_every_branch() {
    for (branch, opens_after) in [("daily", 0), ("recovery", 3), ("emergency", 5)] {
        let chain = SimulatedChain::default();
        chain.mine_to(300);
        let session = open(&PolicyTemplate::self_custody(), &chain, SessionConfig::default()).await;
        chain.fund(session.address().unwrap(), 25_000);

        chain.mine_to(300 + opens_after);
        let receipt = session.spend(branch, &destination()).await.unwrap();
        let expected = if opens_after == 0 {
            LockTime::ZERO
        } else {
            LockTime::from_height(300 + opens_after).unwrap()
        };
        assert_eq!(receipt.lock_time, expected, "{}", branch);
        assert_eq!(receipt.plan.value_out, Amount::from_sat(24_800));
    }
}

#[tokio::test]
async fn test_witness_commits_to_policy_script() {
    let chain = SimulatedChain::default();
    chain.mine_to(10);
    let session = open(&PolicyTemplate::vault(), &chain, SessionConfig::default()).await;
    chain.fund(session.address().unwrap(), 12_345);
    chain.mine_to(11);

    let receipt = session.spend("delayed", &destination()).await.unwrap();
    let tx: Transaction = deserialize_hex(&receipt.tx_hex).unwrap();

    let witness_script = session
        .compiled()
        .unwrap()
        .definite()
        .unwrap()
        .explicit_script()
        .unwrap();
    let witness = &tx.input[0].witness;
    assert_eq!(witness.last().unwrap(), witness_script.as_bytes());
    assert_eq!(tx.lock_time, LockTime::from_height(11).unwrap());
}

#[tokio::test]
async fn test_node_rejects_early_broadcast_as_premature() {
    let chain = SimulatedChain::default();
    chain.mine_to(500);
    let session = open(&PolicyTemplate::vault(), &chain, SessionConfig::default()).await;
    chain.fund(session.address().unwrap(), 10_000);
    chain.mine_to(501);

    // The explorer lags behind the node that validates the broadcast
    chain.reject_with(r#"sendrawtransaction RPC error: {"code":-26,"message":"non-final"}"#);
    let err = session.spend("delayed", &destination()).await.unwrap_err();
    assert!(matches!(err, SpendError::PrematureTimelock { .. }));
    assert!(err.is_premature());
}

#[tokio::test]
async fn test_custom_premature_markers() {
    let chain = SimulatedChain::default();
    chain.mine_to(500);
    chain.reject_with("mempool-locktime-not-reached");

    let default = open(&PolicyTemplate::vault(), &chain, SessionConfig::default()).await;
    chain.fund(default.address().unwrap(), 10_000);
    assert!(matches!(
        default.spend("immediate", &destination()).await,
        Err(SpendError::OtherBroadcastFailure(_))
    ));

    let config = SessionConfig {
        classifier: BroadcastClassifier::new(["locktime-not-reached".to_string()]),
        ..SessionConfig::default()
    };
    let custom = open(&PolicyTemplate::vault(), &chain, config).await;
    assert!(matches!(
        custom.spend("immediate", &destination()).await,
        Err(SpendError::PrematureTimelock { .. })
    ));
}

// ============================================================================
// Custom policies
// ============================================================================

const TWO_PARTY: &str = r#"
name = "two-party"

[[participants]]
id = "alice"
origin_path = "m/401'/1'/0'"

[[participants]]
id = "carol"
descriptor = "[d34db33f/84'/1'/0']xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8"

[[branches]]
id = "alice"
threshold = 1
participants = ["alice"]

[[branches]]
id = "carol-later"
threshold = 1
participants = ["carol"]
offset_blocks = 2
"#;

#[tokio::test]
async fn test_custom_policy_from_toml() {
    let template: PolicyTemplate = toml::from_str(TWO_PARTY).unwrap();
    let chain = SimulatedChain::default();
    chain.mine_to(900);
    let session = open(&template, &chain, SessionConfig::default()).await;
    chain.fund(session.address().unwrap(), 5_000);

    let receipt = session.spend("alice", &destination()).await.unwrap();
    assert_eq!(receipt.plan.value_out, Amount::from_sat(4_800));
}

#[tokio::test]
async fn test_watch_only_participant_cannot_sign() {
    let template: PolicyTemplate = toml::from_str(TWO_PARTY).unwrap();
    let chain = SimulatedChain::default();
    chain.mine_to(900);
    let session = open(&template, &chain, SessionConfig::default()).await;
    chain.fund(session.address().unwrap(), 5_000);
    chain.mine_to(902);

    // Gate is open, but our seed does not hold carol's key
    let err = session.spend("carol-later", &destination()).await.unwrap_err();
    match err {
        SpendError::Assembly {
            stage: SpendStage::Assembled,
            source: AssembleError::MissingSignatures { have: 0, need: 1 },
        } => {}
        other => panic!("expected MissingSignatures, got {:?}", other),
    }
    assert_eq!(session.funds().await.unwrap().utxos.len(), 1);
}
