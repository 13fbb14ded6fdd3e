//! Live Integration Tests — public testnet4 explorer
//!
//! These tests make REAL network calls. No mocks.
//! Run with: cargo test -p branchgate-e2e --test live_integration -- --ignored --nocapture

use bitcoin::secp256k1::Secp256k1;
use bitcoin::Network;
use branchgate_chain::{ChainSource, EsploraClient, ExplorerFlavor};
use branchgate_core::{derive_master, derive_seed, parse_mnemonic, MnemonicLanguage, DEMO_MNEMONIC};
use branchgate_policy::{build_policy, evaluate, PolicyTemplate};
use branchgate_spend::{BroadcastClassifier, BroadcastOutcome};
use std::time::Duration;

const EXPLORER: &str = "https://mempool.space/testnet4";

fn explorer() -> EsploraClient {
    EsploraClient::new(EXPLORER, Duration::from_secs(30)).unwrap()
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_demo_policy_against_live_tip() {
    let client = explorer();
    assert_eq!(client.flavor(), ExplorerFlavor::Testnet4);

    let tip = client.tip_height().await.unwrap();
    println!("testnet4 tip: {}", tip);
    assert!(tip > 0);

    let mnemonic = parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::Spanish).unwrap();
    let master = derive_master(&derive_seed(&mnemonic, ""), Network::Testnet).unwrap();
    let specs = PolicyTemplate::inheritance()
        .branch_specs(&Secp256k1::new(), &master)
        .unwrap();
    let policy = build_policy(specs, tip).unwrap();
    let address = policy.compile().unwrap().address(Network::Testnet).unwrap();
    println!("address: {}", client.address_url(&address));

    // A fresh policy address has never been funded
    let utxos = client.address_utxos(&address).await.unwrap();
    println!("utxos: {}", utxos.len());

    let status = evaluate(&policy, client.tip_height().await.unwrap());
    assert!(status.get("progenitor").unwrap().spendable_now);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_garbage_broadcast_is_other_failure() {
    let client = explorer();
    let response = client.broadcast_raw("00").await.unwrap();
    println!("explorer said: {}", response);

    match BroadcastClassifier::default().classify(&response) {
        BroadcastOutcome::OtherFailure(text) => assert!(!text.is_empty()),
        other => panic!("unexpected outcome: {:?}", other),
    }
}
