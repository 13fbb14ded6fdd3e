//! Runtime choice between the chain backends

use crate::config::{Backend, Config};
use anyhow::{Context, Result};
use bitcoin::{Address, Transaction, Txid};
use branchgate_chain::electrum::{default_server, ElectrumSource};
use branchgate_chain::{ChainError, ChainSource, EsploraClient, TxSummary, Utxo};

pub enum ChainBackend {
    Esplora(EsploraClient),
    Electrum(ElectrumSource),
}

impl ChainBackend {
    pub fn connect(config: &Config) -> Result<Self> {
        match config.chain.backend {
            Backend::Esplora => {
                let client = EsploraClient::new(&config.chain.explorer_url, config.timeout())
                    .with_context(|| {
                        format!("Failed to set up explorer {}", config.chain.explorer_url)
                    })?;
                Ok(ChainBackend::Esplora(client))
            }
            Backend::Electrum => {
                let url = match &config.chain.electrum_url {
                    Some(url) => url.clone(),
                    None => default_server(config.network()?).to_string(),
                };
                let source = ElectrumSource::new(&url)
                    .with_context(|| format!("Failed to connect to Electrum at {}", url))?;
                Ok(ChainBackend::Electrum(source))
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ChainBackend::Esplora(_) => "esplora",
            ChainBackend::Electrum(_) => "electrum",
        }
    }
}

impl ChainSource for ChainBackend {
    async fn tip_height(&self) -> Result<u32, ChainError> {
        match self {
            ChainBackend::Esplora(c) => c.tip_height().await,
            ChainBackend::Electrum(c) => c.tip_height().await,
        }
    }

    async fn address_utxos(&self, address: &Address) -> Result<Vec<Utxo>, ChainError> {
        match self {
            ChainBackend::Esplora(c) => c.address_utxos(address).await,
            ChainBackend::Electrum(c) => c.address_utxos(address).await,
        }
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        match self {
            ChainBackend::Esplora(c) => c.raw_transaction(txid).await,
            ChainBackend::Electrum(c) => c.raw_transaction(txid).await,
        }
    }

    async fn broadcast_raw(&self, tx_hex: &str) -> Result<String, ChainError> {
        match self {
            ChainBackend::Esplora(c) => c.broadcast_raw(tx_hex).await,
            ChainBackend::Electrum(c) => c.broadcast_raw(tx_hex).await,
        }
    }

    async fn address_transactions(&self, address: &Address) -> Result<Vec<TxSummary>, ChainError> {
        match self {
            ChainBackend::Esplora(c) => c.address_transactions(address).await,
            ChainBackend::Electrum(c) => c.address_transactions(address).await,
        }
    }
}
