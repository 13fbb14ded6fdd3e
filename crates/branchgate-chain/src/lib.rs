//! branchgate chain access
//!
//! Everything the spend controller needs from the outside world:
//! - current tip height (gate evaluation)
//! - UTXOs and history of the policy address
//! - raw previous transactions (PSBT inputs)
//! - broadcasting, returning the explorer's answer verbatim
//!
//! Two backends implement [`ChainSource`]: [`esplora::EsploraClient`] (the
//! block-explorer REST API used by the demos) and
//! [`electrum::ElectrumSource`].
//!
//! # Example
//!
//! ```ignore
//! use branchgate_chain::{esplora::EsploraClient, ChainSource};
//!
//! let explorer = EsploraClient::new("https://mempool.space/testnet4", Duration::from_secs(30))?;
//! let height = explorer.tip_height().await?;
//! println!("Current block height: {}", height);
//! ```

use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Transaction, Txid};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

pub mod activity;
pub mod electrum;
pub mod esplora;

pub use activity::{classify_activity, latest, Activity, Direction};
pub use esplora::{EsploraClient, ExplorerFlavor};

/// Errors from chain access
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Explorer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not decode explorer response: {0}")]
    Decode(String),

    #[error("Electrum error: {0}")]
    Electrum(String),

    #[error("Transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("Background task failed: {0}")]
    Join(String),
}

/// An unspent output of the policy address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: Amount,
    pub confirmed: bool,
    /// Confirmation height; `None` while in the mempool
    pub block_height: Option<u32>,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// One side of a transaction as seen from an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxEndpoint {
    pub script_pubkey: ScriptBuf,
    pub value: Amount,
}

/// A transaction touching the policy address, with resolved prevouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxSummary {
    pub txid: Txid,
    pub confirmed: bool,
    pub block_height: Option<u32>,
    /// Spent outputs (coinbase inputs have none and are omitted)
    pub inputs: Vec<TxEndpoint>,
    pub outputs: Vec<TxEndpoint>,
}

/// Read access to the chain plus broadcasting.
///
/// Each call is independent; callers re-fetch state for every operation.
pub trait ChainSource: Send + Sync {
    /// Current tip height
    fn tip_height(&self) -> impl Future<Output = Result<u32, ChainError>> + Send;

    /// Unspent outputs paying to `address`
    fn address_utxos(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Vec<Utxo>, ChainError>> + Send;

    /// Full previous transaction
    fn raw_transaction(
        &self,
        txid: &Txid,
    ) -> impl Future<Output = Result<Transaction, ChainError>> + Send;

    /// Submit a serialized transaction.
    ///
    /// Returns the backend's response text whether it accepted the
    /// transaction or not; only transport failures are errors. Callers
    /// classify the text.
    fn broadcast_raw(
        &self,
        tx_hex: &str,
    ) -> impl Future<Output = Result<String, ChainError>> + Send;

    /// Transactions that pay to or spend from `address`
    fn address_transactions(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Vec<TxSummary>, ChainError>> + Send;
}

impl<T: ChainSource> ChainSource for Arc<T> {
    async fn tip_height(&self) -> Result<u32, ChainError> {
        (**self).tip_height().await
    }

    async fn address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, ChainError> {
        (**self).address_utxos(address).await
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        (**self).raw_transaction(txid).await
    }

    async fn broadcast_raw(&self, tx_hex: &str) -> Result<String, ChainError> {
        (**self).broadcast_raw(tx_hex).await
    }

    async fn address_transactions(&self, address: &Address) -> Result<Vec<TxSummary>, ChainError> {
        (**self).address_transactions(address).await
    }
}
