//! Command handlers shared by one-shot invocations and the interactive shell.

use crate::backend::ChainBackend;
use crate::config::Config;
use anyhow::{Context, Result};
use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Txid};
use branchgate_chain::{Direction, EsploraClient, ExplorerFlavor};
use branchgate_core::{derive_master, derive_seed, parse_mnemonic};
use branchgate_policy::{approx_minutes, Participant, PolicyTemplate};
use branchgate_spend::{Session, SpendError};

/// An initialized session plus everything needed to present its results
pub struct App {
    config: Config,
    template: PolicyTemplate,
    participants: Vec<Participant>,
    session: Session<ChainBackend>,
    links: EsploraClient,
}

impl App {
    /// Derive keys, connect the backend and build the policy.
    pub async fn open(config: Config) -> Result<Self> {
        let secp = Secp256k1::new();
        let network = config.network()?;

        let mnemonic = parse_mnemonic(&config.session.mnemonic, config.session.language)
            .context("Invalid mnemonic")?;
        let seed = derive_seed(&mnemonic, &config.session.passphrase);
        let master: Xpriv = derive_master(&seed, network).context("Key derivation failed")?;

        let template = config.template()?;
        let participants = template.participants(&secp, &master)?;
        let specs = template.branch_specs(&secp, &master)?;

        let backend = ChainBackend::connect(&config)?;
        let links = EsploraClient::new(&config.chain.explorer_url, config.timeout())?;

        log::info!(
            "Opening '{}' policy on {} via {}",
            template.name,
            network,
            backend.describe()
        );

        let mut session = Session::new(backend, master, config.session_config()?);
        match config.session.reference_height {
            Some(height) => {
                session.initialize_at(specs, height)?;
            }
            None => {
                session
                    .initialize(specs)
                    .await
                    .context("Failed to initialize policy")?;
            }
        }

        Ok(Self {
            config,
            template,
            participants,
            session,
            links,
        })
    }

    pub fn address(&self) -> Result<&Address> {
        Ok(self.session.address()?)
    }

    /// Print the policy address and its origin
    pub fn print_address(&self) -> Result<()> {
        let policy = self.session.policy()?;
        let address = self.address()?;
        println!("Policy:            {}", self.template.name);
        println!("Reference height:  {}", policy.reference_height());
        println!("Address:           {}", address);
        println!("Explorer:          {}", self.links.address_url(address));
        if self.config.session.reference_height.is_none() {
            println!(
                "  (set session.reference_height = {} to keep this address across runs)",
                policy.reference_height()
            );
        }
        if let Some(faucet) = self.links.flavor().faucet() {
            println!("Faucet:            {}", faucet);
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        let policy = self.session.policy()?;
        let statuses = self.session.status().await?;

        self.print_address()?;
        println!("Current height:    {}", statuses.current_height);
        println!();

        for branch in policy.branches() {
            let Some(status) = statuses.get(&branch.id) else {
                continue;
            };
            let auth = &branch.authorization;
            let gate = gate_label(status.gate_height, branch.offset_blocks);
            let state = if status.spendable_now {
                "spendable".to_string()
            } else {
                format!(
                    "locked, {} blocks (~{} min)",
                    status.blocks_remaining,
                    status.approx_minutes_remaining()
                )
            };
            println!(
                "  {:<14} {}-of-{}  {:<20} {}",
                branch.id,
                auth.required(),
                auth.size(),
                gate,
                state
            );
        }

        if !policy.has_ungated_branch() {
            println!();
            println!("⚠ Every branch is time-gated: funds are stuck until the first gate opens.");
        }
        if let Some(next) = statuses.next_opening() {
            log::debug!("Next branch to open: {}", next.branch_id);
        }
        Ok(())
    }

    pub async fn funds(&self) -> Result<()> {
        let report = self.session.funds().await?;
        if report.utxos.is_empty() {
            println!("No funds at {}", self.address()?);
            return Ok(());
        }

        for utxo in &report.utxos {
            let height = match utxo.block_height {
                Some(h) => format!("block {}", h),
                None => "mempool".to_string(),
            };
            println!(
                "  {:>12} sats  {:<14} {}",
                utxo.value.to_sat(),
                height,
                self.links.tx_url(&utxo.txid)
            );
        }
        println!("Total: {} sats in {} outputs", report.total.to_sat(), report.utxos.len());
        Ok(())
    }

    pub async fn last_tx(&self) -> Result<()> {
        let Some(activity) = self.session.last_activity().await? else {
            println!("No transactions yet for {}", self.address()?);
            return Ok(());
        };

        let what = match activity.direction {
            Direction::Incoming => format!("received {} sats", activity.received.to_sat()),
            Direction::Outgoing => format!("sent {} sats", activity.sent.to_sat()),
            Direction::OutgoingWithChange => format!(
                "sent {} sats, {} sats back as change",
                activity.sent.to_sat(),
                activity.received.to_sat()
            ),
            Direction::Unrelated => "does not touch this address".to_string(),
        };
        let when = match activity.block_height {
            Some(h) => format!("block {}", h),
            None => "unconfirmed".to_string(),
        };
        println!("Last transaction ({}): {}", when, what);
        println!("  {}", self.links.tx_url(&activity.txid));
        Ok(())
    }

    /// Spend through `branch`. `to` overrides the configured destination.
    pub async fn spend(&self, branch: &str, to: Option<&str>) -> Result<Option<Txid>> {
        let destination = match to {
            Some(s) => self.config.parse_destination(s)?,
            None => self.config.default_destination()?.context(
                "No destination: pass one after the branch or set spend.destination",
            )?,
        };

        match self.session.spend(branch, &destination).await {
            Ok(receipt) => {
                println!(
                    "Sent {} sats via '{}' (fee {} sats, locktime {})",
                    receipt.plan.value_out.to_sat(),
                    receipt.branch_id,
                    receipt.plan.fee.to_sat(),
                    receipt.lock_time
                );
                println!("  {}", self.links.tx_url(&receipt.txid));
                Ok(Some(receipt.txid))
            }
            Err(e) if e.is_premature() => {
                println!("Not yet: {}", e);
                if let SpendError::BranchLocked {
                    blocks_remaining, ..
                } = e
                {
                    println!("Try again in ~{} minutes.", approx_minutes(blocks_remaining));
                }
                Ok(None)
            }
            Err(SpendError::NoFunds) => {
                println!("No funds at the policy address {}", self.address()?);
                if let Some(faucet) = self.links.flavor().faucet() {
                    println!("Fund it first, e.g. from {}", faucet);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn keys(&self) -> Result<()> {
        for participant in &self.participants {
            println!("{}", participant.label);
            println!("  fingerprint: {}", participant.fingerprint);
            println!("  origin:      {}", participant.origin_path);
            println!("  xpub:        {}", participant.xpub);
            println!("  key:         {}", participant.to_descriptor_key());
        }
        let compiled = self.session.compiled()?;
        println!();
        println!("Policy:     {}", compiled.expression());
        println!("Miniscript: {}", compiled.miniscript());
        println!("Descriptor: {}", compiled.descriptor());
        Ok(())
    }
}

/// Human-readable network name for the explorer in use
pub fn explorer_label(config: &Config) -> &'static str {
    ExplorerFlavor::from_url(&config.chain.explorer_url).label()
}

/// Gate column of `status`: the absolute height and the offset it came from
fn gate_label(gate_height: Option<u32>, offset_blocks: Option<u32>) -> String {
    match (gate_height, offset_blocks) {
        (Some(h), Some(offset)) => format!("after block {} (+{})", h, offset),
        (Some(h), None) => format!("after block {}", h),
        (None, _) => "no time gate".to_string(),
    }
}
