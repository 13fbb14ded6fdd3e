//! CLI configuration — parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use bitcoin::{Address, Amount, Network};
use branchgate_chain::ExplorerFlavor;
use branchgate_core::{MnemonicLanguage, DEMO_MNEMONIC};
use branchgate_policy::PolicyTemplate;
use branchgate_spend::{BroadcastClassifier, SessionConfig, DEFAULT_PREMATURE_MARKERS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Seed and policy selection
    #[serde(default)]
    pub session: SessionSection,

    /// Explorer / Electrum settings
    #[serde(default)]
    pub chain: ChainSection,

    #[serde(default)]
    pub spend: SpendSection,

    /// Custom policy; replaces `session.template` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Built-in template: "inheritance", "self-custody" or "vault"
    #[serde(default = "default_template")]
    pub template: String,

    /// BIP-39 mnemonic every participant key is derived from
    #[serde(default = "default_mnemonic")]
    pub mnemonic: String,

    #[serde(default = "default_language")]
    pub language: MnemonicLanguage,

    #[serde(default)]
    pub passphrase: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pin the reference height; otherwise the chain tip at startup is used
    /// and the address changes from one run to the next.
    #[serde(default)]
    pub reference_height: Option<u32>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            template: default_template(),
            mnemonic: default_mnemonic(),
            language: default_language(),
            passphrase: String::new(),
            log_level: default_log_level(),
            reference_height: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Esplora,
    Electrum,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "esplora" => Ok(Backend::Esplora),
            "electrum" => Ok(Backend::Electrum),
            other => anyhow::bail!("Unknown backend '{}' (expected esplora or electrum)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection {
    #[serde(default)]
    pub backend: Backend,

    /// "bitcoin", "testnet", "testnet4", "signet", "regtest".
    /// Guessed from `explorer_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Esplora explorer base URL, also used for links
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,

    /// Electrum server URL; a public default per network when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub electrum_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            network: None,
            explorer_url: default_explorer_url(),
            electrum_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendSection {
    /// Flat fee per spend, in satoshis
    #[serde(default = "default_fee_sats")]
    pub fee_sats: u64,

    /// Default destination for `spend`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Broadcast rejections containing any of these mean "too early"
    #[serde(default = "default_premature_markers")]
    pub premature_markers: Vec<String>,
}

impl Default for SpendSection {
    fn default() -> Self {
        Self {
            fee_sats: default_fee_sats(),
            destination: None,
            premature_markers: default_premature_markers(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_template() -> String {
    "inheritance".to_string()
}

fn default_mnemonic() -> String {
    DEMO_MNEMONIC.to_string()
}

fn default_language() -> MnemonicLanguage {
    MnemonicLanguage::Spanish
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_explorer_url() -> String {
    ExplorerFlavor::Testnet4.default_explorer().to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_fee_sats() -> u64 {
    branchgate_spend::DEFAULT_FEE_SATS
}

fn default_premature_markers() -> Vec<String> {
    DEFAULT_PREMATURE_MARKERS.iter().map(|m| m.to_string()).collect()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `BRANCHGATE_TEMPLATE`
    /// - `BRANCHGATE_MNEMONIC`
    /// - `BRANCHGATE_LANGUAGE`
    /// - `BRANCHGATE_PASSPHRASE`
    /// - `BRANCHGATE_LOG_LEVEL`
    /// - `BRANCHGATE_REFERENCE_HEIGHT`
    /// - `BRANCHGATE_BACKEND`
    /// - `BRANCHGATE_NETWORK`
    /// - `BRANCHGATE_EXPLORER_URL`
    /// - `BRANCHGATE_ELECTRUM_URL`
    /// - `BRANCHGATE_FEE_SATS`
    /// - `BRANCHGATE_DESTINATION`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BRANCHGATE_TEMPLATE") {
            self.session.template = v;
        }
        if let Ok(v) = std::env::var("BRANCHGATE_MNEMONIC") {
            self.session.mnemonic = v;
        }
        if let Ok(v) = std::env::var("BRANCHGATE_LANGUAGE") {
            if let Ok(language) = v.parse::<MnemonicLanguage>() {
                self.session.language = language;
            }
        }
        if let Ok(v) = std::env::var("BRANCHGATE_PASSPHRASE") {
            self.session.passphrase = v;
        }
        if let Ok(v) = std::env::var("BRANCHGATE_LOG_LEVEL") {
            self.session.log_level = v;
        }
        if let Ok(v) = std::env::var("BRANCHGATE_REFERENCE_HEIGHT") {
            if let Ok(height) = v.parse::<u32>() {
                self.session.reference_height = Some(height);
            }
        }
        if let Ok(v) = std::env::var("BRANCHGATE_BACKEND") {
            if let Ok(backend) = v.parse::<Backend>() {
                self.chain.backend = backend;
            }
        }
        if let Ok(v) = std::env::var("BRANCHGATE_NETWORK") {
            self.chain.network = Some(v);
        }
        if let Ok(v) = std::env::var("BRANCHGATE_EXPLORER_URL") {
            self.chain.explorer_url = v;
        }
        if let Ok(v) = std::env::var("BRANCHGATE_ELECTRUM_URL") {
            self.chain.electrum_url = Some(v);
        }
        if let Ok(v) = std::env::var("BRANCHGATE_FEE_SATS") {
            if let Ok(sats) = v.parse::<u64>() {
                self.spend.fee_sats = sats;
            }
        }
        if let Ok(v) = std::env::var("BRANCHGATE_DESTINATION") {
            self.spend.destination = Some(v);
        }
    }

    /// Bitcoin network: the configured one, or the explorer's.
    pub fn network(&self) -> Result<Network> {
        match self.chain.network.as_deref() {
            None => Ok(ExplorerFlavor::from_url(&self.chain.explorer_url).network()),
            Some(name) => parse_network(name),
        }
    }

    /// The policy to build: the custom `[policy]` if present, else the
    /// named built-in template.
    pub fn template(&self) -> Result<PolicyTemplate> {
        match &self.policy {
            Some(custom) => Ok(custom.clone()),
            None => PolicyTemplate::builtin(&self.session.template)
                .with_context(|| format!("Unknown template '{}'", self.session.template)),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.chain.timeout_secs)
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            network: self.network()?,
            fee: Amount::from_sat(self.spend.fee_sats),
            classifier: BroadcastClassifier::new(self.spend.premature_markers.iter().cloned()),
        })
    }

    /// Parse an address and check it belongs to the configured network
    pub fn parse_destination(&self, s: &str) -> Result<Address> {
        let network = self.network()?;
        Address::from_str(s.trim())
            .with_context(|| format!("Invalid address: {}", s))?
            .require_network(network)
            .with_context(|| format!("Address {} is not valid on {}", s, network))
    }

    pub fn default_destination(&self) -> Result<Option<Address>> {
        self.spend
            .destination
            .as_deref()
            .map(|s| self.parse_destination(s))
            .transpose()
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.session.mnemonic.trim().is_empty(),
            "session.mnemonic must not be empty"
        );
        branchgate_core::parse_mnemonic(&self.session.mnemonic, self.session.language)
            .context("session.mnemonic is not a valid BIP-39 mnemonic")?;

        let template = self.template()?;
        anyhow::ensure!(
            !template.branches.is_empty(),
            "policy must have at least one branch"
        );

        self.network()?;

        if self.chain.backend == Backend::Esplora {
            anyhow::ensure!(
                self.chain.explorer_url.starts_with("http://")
                    || self.chain.explorer_url.starts_with("https://"),
                "chain.explorer_url must be an http(s) URL"
            );
        }

        anyhow::ensure!(self.chain.timeout_secs > 0, "chain.timeout_secs must be > 0");

        anyhow::ensure!(self.spend.fee_sats > 0, "spend.fee_sats must be > 0");

        anyhow::ensure!(
            self.spend.premature_markers.iter().any(|m| !m.is_empty()),
            "spend.premature_markers must contain at least one marker"
        );

        self.default_destination()
            .context("spend.destination is invalid")?;

        Ok(())
    }
}

fn parse_network(name: &str) -> Result<Network> {
    match name.to_ascii_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
        "testnet" | "testnet3" | "testnet4" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => anyhow::bail!("Unknown network '{}'", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
