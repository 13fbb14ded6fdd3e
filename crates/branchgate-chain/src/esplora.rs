//! Esplora block-explorer backend (blockstream.info, mempool.space)
//!
//! Endpoints used, relative to `{explorer}/api`:
//!
//! ```text
//! GET  /blocks/tip/height
//! GET  /address/{address}/utxo
//! GET  /address/{address}/txs
//! GET  /tx/{txid}/hex
//! POST /tx                     (body: raw tx hex)
//! ```

use crate::{ChainError, ChainSource, TxEndpoint, TxSummary, Utxo};
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{Address, Amount, Network, ScriptBuf, Transaction, Txid};
use serde::Deserialize;
use std::time::Duration;

/// Which chain an explorer URL serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerFlavor {
    Mainnet,
    Testnet3,
    Testnet4,
    Signet,
}

impl ExplorerFlavor {
    /// Guess the chain from the explorer URL
    pub fn from_url(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if url.contains("testnet4") {
            ExplorerFlavor::Testnet4
        } else if url.contains("testnet") {
            ExplorerFlavor::Testnet3
        } else if url.contains("signet") {
            ExplorerFlavor::Signet
        } else {
            ExplorerFlavor::Mainnet
        }
    }

    /// Address network. Both testnets share the `tb1` encoding.
    pub fn network(self) -> Network {
        match self {
            ExplorerFlavor::Mainnet => Network::Bitcoin,
            ExplorerFlavor::Testnet3 | ExplorerFlavor::Testnet4 => Network::Testnet,
            ExplorerFlavor::Signet => Network::Signet,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExplorerFlavor::Mainnet => "Bitcoin mainnet",
            ExplorerFlavor::Testnet3 => "Testnet 3",
            ExplorerFlavor::Testnet4 => "Testnet 4",
            ExplorerFlavor::Signet => "Signet",
        }
    }

    /// Where to get test coins, if anywhere
    pub fn faucet(self) -> Option<&'static str> {
        match self {
            ExplorerFlavor::Testnet4 => Some("https://faucet.testnet4.dev/"),
            ExplorerFlavor::Testnet3 => Some("https://bitcoinfaucet.uo1.net/send.php"),
            ExplorerFlavor::Signet => Some("https://signetfaucet.com/"),
            ExplorerFlavor::Mainnet => None,
        }
    }

    /// Default public explorer
    pub fn default_explorer(self) -> &'static str {
        match self {
            ExplorerFlavor::Mainnet => "https://mempool.space",
            ExplorerFlavor::Testnet3 => "https://blockstream.info/testnet",
            ExplorerFlavor::Testnet4 => "https://mempool.space/testnet4",
            ExplorerFlavor::Signet => "https://mempool.space/signet",
        }
    }
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: Txid,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraOutput {
    scriptpubkey: String,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraInput {
    #[serde(default)]
    prevout: Option<EsploraOutput>,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: Txid,
    vin: Vec<EsploraInput>,
    vout: Vec<EsploraOutput>,
    status: EsploraStatus,
}

impl EsploraOutput {
    fn into_endpoint(self) -> Result<TxEndpoint, ChainError> {
        let script_pubkey = ScriptBuf::from_hex(&self.scriptpubkey)
            .map_err(|e| ChainError::Decode(format!("scriptpubkey: {}", e)))?;
        Ok(TxEndpoint {
            script_pubkey,
            value: Amount::from_sat(self.value),
        })
    }
}

impl EsploraUtxo {
    fn into_utxo(self) -> Utxo {
        Utxo {
            txid: self.txid,
            vout: self.vout,
            value: Amount::from_sat(self.value),
            confirmed: self.status.confirmed,
            block_height: self.status.block_height.filter(|_| self.status.confirmed),
        }
    }
}

impl EsploraTx {
    fn into_summary(self) -> Result<TxSummary, ChainError> {
        let inputs = self
            .vin
            .into_iter()
            .filter_map(|i| i.prevout)
            .map(EsploraOutput::into_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self
            .vout
            .into_iter()
            .map(EsploraOutput::into_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TxSummary {
            txid: self.txid,
            confirmed: self.status.confirmed,
            block_height: self.status.block_height.filter(|_| self.status.confirmed),
            inputs,
            outputs,
        })
    }
}

/// Esplora REST client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    http: reqwest::Client,
    explorer_url: String,
}

impl EsploraClient {
    /// Create a client for an explorer such as `https://mempool.space/testnet4`.
    ///
    /// A trailing `/api` is accepted and stripped; links are built from the
    /// bare explorer URL and API calls from `{explorer}/api`.
    pub fn new(explorer_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        if explorer_url.starts_with("http://") {
            log::warn!("Explorer URL is not HTTPS: {}", explorer_url);
        }

        let explorer_url = explorer_url
            .trim()
            .trim_end_matches('/')
            .trim_end_matches("/api")
            .to_string();

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, explorer_url })
    }

    pub fn explorer_url(&self) -> &str {
        &self.explorer_url
    }

    pub fn flavor(&self) -> ExplorerFlavor {
        ExplorerFlavor::from_url(&self.explorer_url)
    }

    /// Human link to a transaction
    pub fn tx_url(&self, txid: &Txid) -> String {
        format!("{}/tx/{}", self.explorer_url, txid)
    }

    /// Human link to an address
    pub fn address_url(&self, address: &Address) -> String {
        format!("{}/address/{}", self.explorer_url, address)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api{}", self.explorer_url, path)
    }

    async fn get_text(&self, path: &str) -> Result<String, ChainError> {
        let url = self.api(path);
        log::debug!("GET {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChainError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body).map_err(|e| ChainError::Decode(format!("{}: {}", path, e)))
    }
}

impl ChainSource for EsploraClient {
    async fn tip_height(&self) -> Result<u32, ChainError> {
        let body = self.get_text("/blocks/tip/height").await?;
        body.trim()
            .parse()
            .map_err(|_| ChainError::Decode(format!("tip height '{}'", body.trim())))
    }

    async fn address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, ChainError> {
        let utxos: Vec<EsploraUtxo> = self
            .get_json(&format!("/address/{}/utxo", address))
            .await?;
        Ok(utxos.into_iter().map(EsploraUtxo::into_utxo).collect())
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        let hex = match self.get_text(&format!("/tx/{}/hex", txid)).await {
            Err(ChainError::Status { status: 404, .. }) => return Err(ChainError::TxNotFound(*txid)),
            other => other?,
        };
        let tx: Transaction = deserialize_hex(hex.trim())
            .map_err(|e| ChainError::Decode(format!("tx {}: {}", txid, e)))?;

        if tx.compute_txid() != *txid {
            log::warn!("Explorer returned tx {} when asked for {}", tx.compute_txid(), txid);
            return Err(ChainError::Decode(format!("txid mismatch for {}", txid)));
        }
        Ok(tx)
    }

    async fn broadcast_raw(&self, tx_hex: &str) -> Result<String, ChainError> {
        let url = self.api("/tx");
        log::debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::debug!("Broadcast rejected with {}: {}", status, body);
        }
        Ok(body)
    }

    async fn address_transactions(&self, address: &Address) -> Result<Vec<TxSummary>, ChainError> {
        let txs: Vec<EsploraTx> = self
            .get_json(&format!("/address/{}/txs", address))
            .await?;
        txs.into_iter().map(EsploraTx::into_summary).collect()
    }
}
