//! Electrum backend
//!
//! Provides the same [`ChainSource`] surface over the Electrum protocol.
//! `electrum-client` is blocking, so every call runs on tokio's blocking pool.
//!
//! # Security
//!
//! - Always use SSL/TLS connections (ssl:// or tcp+tls://)
//! - Never send private keys over the wire

use crate::{ChainError, ChainSource, TxEndpoint, TxSummary, Utxo};
use bitcoin::hex::FromHex;
use bitcoin::{Address, Amount, Network, Transaction, Txid};
use electrum_client::{ElectrumApi, Error as ElectrumError};
use std::collections::HashMap;
use std::sync::Arc;

/// Electrum-backed chain source
#[derive(Clone)]
pub struct ElectrumSource {
    client: Arc<electrum_client::Client>,
}

impl ElectrumSource {
    /// Connect to an Electrum server
    ///
    /// # Arguments
    /// * `url` - Electrum server URL (e.g., "ssl://electrum.blockstream.info:60002")
    ///
    /// # Security
    /// Always use SSL URLs in production. Plaintext connections can be MITM'd.
    pub fn new(url: &str) -> Result<Self, ChainError> {
        if !url.starts_with("ssl://") && !url.contains("tls") {
            log::warn!("Connecting to Electrum without SSL - insecure for mainnet!");
        }

        let client = electrum_client::Client::new(url)
            .map_err(|e: ElectrumError| ChainError::Electrum(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, ChainError>
    where
        T: Send + 'static,
        F: FnOnce(&electrum_client::Client) -> Result<T, ChainError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| ChainError::Join(e.to_string()))?
    }
}

fn electrum_err(e: ElectrumError) -> ChainError {
    ChainError::Electrum(e.to_string())
}

/// Map a `transaction_get` failure. Only the server's own "unknown
/// transaction" reply becomes [`ChainError::TxNotFound`]; transport errors
/// stay transport errors.
fn tx_get_err(txid: Txid, e: ElectrumError) -> ChainError {
    let missing = rejection_text(&e).is_some_and(|text| {
        let text = text.to_ascii_lowercase();
        text.contains("not found") || text.contains("no such mempool or blockchain transaction")
    });
    if missing {
        ChainError::TxNotFound(txid)
    } else {
        electrum_err(e)
    }
}

/// Server-side rejection text for a failed broadcast, if the error is one.
fn rejection_text(e: &ElectrumError) -> Option<String> {
    match e {
        ElectrumError::Protocol(value) => Some(
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        ),
        _ => None,
    }
}

impl ChainSource for ElectrumSource {
    async fn tip_height(&self) -> Result<u32, ChainError> {
        self.call(|c| {
            let header = c.block_headers_subscribe().map_err(electrum_err)?;
            Ok(header.height as u32)
        })
        .await
    }

    async fn address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, ChainError> {
        let script = address.script_pubkey();
        self.call(move |c| {
            let unspent = c.script_list_unspent(&script).map_err(electrum_err)?;
            Ok(unspent
                .into_iter()
                .map(|u| Utxo {
                    txid: u.tx_hash,
                    vout: u.tx_pos as u32,
                    value: Amount::from_sat(u.value),
                    // Height 0 means mempool
                    confirmed: u.height > 0,
                    block_height: (u.height > 0).then_some(u.height as u32),
                })
                .collect())
        })
        .await
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        let txid = *txid;
        self.call(move |c| c.transaction_get(&txid).map_err(|e| tx_get_err(txid, e)))
            .await
    }

    async fn broadcast_raw(&self, tx_hex: &str) -> Result<String, ChainError> {
        let raw = Vec::<u8>::from_hex(tx_hex.trim())
            .map_err(|e| ChainError::Decode(format!("tx hex: {}", e)))?;
        self.call(move |c| match c.transaction_broadcast_raw(&raw) {
            Ok(txid) => Ok(txid.to_string()),
            Err(e) => match rejection_text(&e) {
                Some(text) => Ok(text),
                None => Err(electrum_err(e)),
            },
        })
        .await
    }

    async fn address_transactions(&self, address: &Address) -> Result<Vec<TxSummary>, ChainError> {
        let script = address.script_pubkey();
        self.call(move |c| {
            let history = c.script_get_history(&script).map_err(electrum_err)?;
            let mut cache: HashMap<Txid, Transaction> = HashMap::new();
            let mut summaries = Vec::with_capacity(history.len());

            for entry in history {
                let tx = fetch_cached(c, &mut cache, entry.tx_hash)?;

                let mut inputs = Vec::with_capacity(tx.input.len());
                for txin in &tx.input {
                    if txin.previous_output.is_null() {
                        continue;
                    }
                    let prev = fetch_cached(c, &mut cache, txin.previous_output.txid)?;
                    if let Some(out) = prev.output.get(txin.previous_output.vout as usize) {
                        inputs.push(TxEndpoint {
                            script_pubkey: out.script_pubkey.clone(),
                            value: out.value,
                        });
                    }
                }

                let outputs = tx
                    .output
                    .iter()
                    .map(|o| TxEndpoint {
                        script_pubkey: o.script_pubkey.clone(),
                        value: o.value,
                    })
                    .collect();

                let confirmed = entry.height > 0;
                summaries.push(TxSummary {
                    txid: entry.tx_hash,
                    confirmed,
                    block_height: confirmed.then_some(entry.height as u32),
                    inputs,
                    outputs,
                });
            }
            Ok(summaries)
        })
        .await
    }
}

fn fetch_cached(
    client: &electrum_client::Client,
    cache: &mut HashMap<Txid, Transaction>,
    txid: Txid,
) -> Result<Transaction, ChainError> {
    if let Some(tx) = cache.get(&txid) {
        return Ok(tx.clone());
    }
    let tx = client
        .transaction_get(&txid)
        .map_err(|e| tx_get_err(txid, e))?;
    cache.insert(txid, tx.clone());
    Ok(tx)
}

/// Default Electrum servers for each network
pub fn default_server(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "ssl://electrum.blockstream.info:60002",
        Network::Testnet => "ssl://electrum.blockstream.info:60004",
        Network::Signet => "ssl://mempool.space:60602",
        Network::Regtest => "tcp://127.0.0.1:60401",
        _ => "ssl://electrum.blockstream.info:60002",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use serde_json::json;

    #[test]
    fn test_default_servers() {
        assert!(default_server(Network::Bitcoin).contains("60002"));
        assert!(default_server(Network::Testnet).contains("60004"));
    }

    #[test]
    fn test_rejection_text_prefers_message() {
        let err = ElectrumError::Protocol(json!({"code": -26, "message": "non-BIP68-final"}));
        assert_eq!(rejection_text(&err).unwrap(), "non-BIP68-final");

        let err = ElectrumError::Protocol(json!("something odd"));
        assert_eq!(rejection_text(&err).unwrap(), "\"something odd\"");

        let err = ElectrumError::Message("socket closed".into());
        assert!(rejection_text(&err).is_none());
    }

    #[test]
    fn test_only_server_reply_means_not_found() {
        let txid = Txid::from_byte_array([7; 32]);

        let err = ElectrumError::Protocol(json!({
            "code": 2,
            "message": "daemon error: No such mempool or blockchain transaction."
        }));
        assert!(matches!(tx_get_err(txid, err), ChainError::TxNotFound(t) if t == txid));

        let err = ElectrumError::Protocol(json!({"code": -5, "message": "Transaction not found"}));
        assert!(matches!(tx_get_err(txid, err), ChainError::TxNotFound(_)));

        let err = ElectrumError::Message("socket closed".into());
        assert!(matches!(tx_get_err(txid, err), ChainError::Electrum(m) if m.contains("socket closed")));

        let err = ElectrumError::Protocol(json!({"code": -32600, "message": "invalid request"}));
        assert!(matches!(tx_get_err(txid, err), ChainError::Electrum(_)));
    }

    // Integration tests require network access
    // Run with: cargo test --package branchgate-chain -- --ignored

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_get_height_testnet() {
        let source = ElectrumSource::new(default_server(Network::Testnet)).unwrap();
        let height = source.tip_height().await.unwrap();
        assert!(height > 0);
        println!("Current testnet height: {}", height);
    }
}
