//! branchgate — spend from a branch-gated, timelocked policy address
//!
//! One seed derives every participant. The chosen policy (inheritance,
//! self-custody, vault or a custom one) is compiled against the current tip,
//! and each spend goes through exactly one branch once its gate is open.
//!
//! # Usage
//!
//! ```bash
//! branchgate status
//! branchgate --config vault.toml spend delayed tb1q...
//! branchgate shell          # keep one policy address for the whole session
//! branchgate --validate
//! ```

mod backend;
mod commands;
mod config;
mod shell;

use anyhow::{Context, Result};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "branchgate.toml";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Address,
    Funds,
    LastTx,
    Spend { branch: String, to: Option<String> },
    Keys,
    Shell,
}

#[derive(Debug)]
struct Args {
    config_path: Option<PathBuf>,
    validate_only: bool,
    command: Command,
}

enum Parsed {
    Run(Args),
    Exit,
}

fn parse_args(args: &[String]) -> Result<Parsed> {
    let mut config_path = None;
    let mut validate_only = false;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(Parsed::Exit);
            }
            "--version" | "-V" => {
                println!("branchgate {}", env!("CARGO_PKG_VERSION"));
                return Ok(Parsed::Exit);
            }
            flag if flag.starts_with('-') => {
                anyhow::bail!("Unknown argument: {}", flag);
            }
            word => positional.push(word.to_string()),
        }
        i += 1;
    }

    let mut words = positional.into_iter();
    let command = match words.next().as_deref() {
        None | Some("status") => Command::Status,
        Some("address") => Command::Address,
        Some("funds") => Command::Funds,
        Some("last-tx") => Command::LastTx,
        Some("spend") => {
            let branch = words
                .next()
                .context("spend requires a branch, e.g. `branchgate spend inheritance`")?;
            Command::Spend {
                branch,
                to: words.next(),
            }
        }
        Some("keys") => Command::Keys,
        Some("shell") => Command::Shell,
        Some(other) => anyhow::bail!("Unknown command: {}", other),
    };
    if let Some(extra) = words.next() {
        anyhow::bail!("Unexpected argument: {}", extra);
    }

    Ok(Parsed::Run(Args {
        config_path,
        validate_only,
        command,
    }))
}

fn load_config(path: Option<&PathBuf>) -> Result<config::Config> {
    let config = match path {
        Some(path) => config::Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                config::Config::from_file(&default)?
            } else {
                config::Config::default()
            }
        }
    };
    Ok(config)
}

fn main() -> Result<()> {
    // Electrum TLS needs a process-wide rustls provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&args)? {
        Parsed::Run(args) => args,
        Parsed::Exit => return Ok(()),
    };

    let mut config = load_config(args.config_path.as_ref())?;
    config.apply_env_overrides();
    config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", &config.session.log_level);
    }
    env_logger::init();

    if args.validate_only {
        let template = config.template()?;
        println!("✅ Configuration is valid.");
        println!("  Policy:        {}", template.name);
        for branch in &template.branches {
            println!(
                "    {:<14} {}-of-{} {}",
                branch.id,
                branch.threshold,
                branch.participants.len(),
                branch
                    .offset_blocks
                    .map(|o| format!("after +{} blocks", o))
                    .unwrap_or_default()
            );
        }
        println!("  Network:       {}", config.network()?);
        println!("  Explorer:      {} ({})", config.chain.explorer_url, commands::explorer_label(&config));
        println!("  Backend:       {:?}", config.chain.backend);
        println!("  Fee:           {} sats", config.spend.fee_sats);
        match config.session.reference_height {
            Some(h) => println!("  Reference:     block {}", h),
            None => println!("  Reference:     chain tip at startup"),
        }
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let result = rt.block_on(async {
        let app = commands::App::open(config).await?;
        match args.command {
            Command::Status => app.status().await,
            Command::Address => app.print_address(),
            Command::Funds => app.funds().await,
            Command::LastTx => app.last_tx().await,
            Command::Spend { branch, to } => app.spend(&branch, to.as_deref()).await.map(|_| ()),
            Command::Keys => app.keys(),
            Command::Shell => {
                tokio::select! {
                    result = shell::run(&app) => result,
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("Received shutdown signal. Exiting…");
                        Ok(())
                    }
                }
            }
        }
    });

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"branchgate — branch-gated spending from a timelocked policy address

USAGE:
    branchgate [OPTIONS] [COMMAND]

COMMANDS:
    status                   Policy address and branch gates (default)
    address                  Policy address only
    funds                    Outputs held by the policy address
    last-tx                  Most recent transaction of the address
    spend <branch> [addr]    Spend the oldest output through <branch>
    keys                     Participant keys and compiled policy
    shell                    Interactive session with a fixed reference height

OPTIONS:
    -c, --config <PATH>   Config file path (default: ./branchgate.toml if present)
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    BRANCHGATE_TEMPLATE          inheritance / self-custody / vault
    BRANCHGATE_MNEMONIC          BIP-39 mnemonic
    BRANCHGATE_LANGUAGE          english / spanish
    BRANCHGATE_PASSPHRASE        BIP-39 passphrase
    BRANCHGATE_LOG_LEVEL         Log level (error/warn/info/debug/trace)
    BRANCHGATE_REFERENCE_HEIGHT  Pin the reference height
    BRANCHGATE_BACKEND           esplora / electrum
    BRANCHGATE_NETWORK           bitcoin / testnet / testnet4 / signet / regtest
    BRANCHGATE_EXPLORER_URL      Esplora explorer base URL
    BRANCHGATE_ELECTRUM_URL      Electrum server URL
    BRANCHGATE_FEE_SATS          Flat fee per spend
    BRANCHGATE_DESTINATION       Default spend destination

EXAMPLES:
    # Inheritance demo on testnet4 with the built-in demo seed
    branchgate shell

    # Vault policy, spend the delayed branch once it opens
    BRANCHGATE_TEMPLATE=vault branchgate spend delayed tb1q...
"#
    );
}
