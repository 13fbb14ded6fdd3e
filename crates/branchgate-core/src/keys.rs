//! Key derivation from a BIP-39 seed
//!
//! Every policy participant is an account-level extended key derived at a
//! hardened origin path below the master key. The key that actually goes into
//! the script is the account key's first receive child, [`KEY_PATH`].

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, Signing};
use bitcoin::Network;
use std::str::FromStr;
use thiserror::Error;

/// Child path below an account key that holds the spending key (`/0/0`).
pub const KEY_PATH: [ChildNumber; 2] = [ChildNumber::Normal { index: 0 }, ChildNumber::Normal { index: 0 }];

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Derivation failed: {0}")]
    DerivationFailed(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Account-level key of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKey {
    /// Fingerprint of the master key this account descends from
    pub master_fingerprint: Fingerprint,
    /// Hardened path from master to the account
    pub origin: DerivationPath,
    /// Extended public key at `origin`
    pub xpub: Xpub,
}

/// Parse a derivation path, accepting both `m/301'/1'/0'` and `301'/1'/0'`
pub fn parse_path(path: &str) -> Result<DerivationPath, KeyError> {
    let trimmed = path.trim();
    let normalized = if trimmed.starts_with('m') {
        trimmed.to_string()
    } else {
        format!("m/{}", trimmed)
    };
    DerivationPath::from_str(&normalized)
        .map_err(|e: bitcoin::bip32::Error| KeyError::InvalidPath(format!("{}: {}", path, e)))
}

/// Derive the master extended private key for a network
pub fn derive_master(seed: &[u8; 64], network: Network) -> Result<Xpriv, KeyError> {
    Xpriv::new_master(network, seed).map_err(|e| KeyError::DerivationFailed(e.to_string()))
}

/// Fingerprint of the master key, as shown next to every participant key
pub fn master_fingerprint<C: Signing>(secp: &Secp256k1<C>, master: &Xpriv) -> Fingerprint {
    master.fingerprint(secp)
}

/// Derive the account key at `origin` below `master`
pub fn derive_account<C: Signing>(
    secp: &Secp256k1<C>,
    master: &Xpriv,
    origin: &DerivationPath,
) -> Result<AccountKey, KeyError> {
    let account = master
        .derive_priv(secp, origin)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;

    Ok(AccountKey {
        master_fingerprint: master_fingerprint(secp, master),
        origin: origin.clone(),
        xpub: Xpub::from_priv(secp, &account),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{derive_seed, parse_mnemonic, MnemonicLanguage, DEMO_MNEMONIC};

    fn demo_master() -> Xpriv {
        let mnemonic = parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::Spanish).unwrap();
        let seed = derive_seed(&mnemonic, "");
        derive_master(&seed, Network::Testnet).unwrap()
    }

    #[test]
    fn test_account_derivation_deterministic() {
        let secp = Secp256k1::new();
        let master = demo_master();
        let origin = parse_path("m/301'/1'/0'").unwrap();

        let a = derive_account(&secp, &master, &origin).unwrap();
        let b = derive_account(&secp, &master, &origin).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.master_fingerprint, master_fingerprint(&secp, &master));
        assert!(a.xpub.to_string().starts_with("tpub"));
    }

    #[test]
    fn test_distinct_origins_distinct_keys() {
        let secp = Secp256k1::new();
        let master = demo_master();
        let a = derive_account(&secp, &master, &parse_path("302'/1'/0'").unwrap()).unwrap();
        let b = derive_account(&secp, &master, &parse_path("303'/1'/0'").unwrap()).unwrap();
        assert_ne!(a.xpub, b.xpub);
        assert_eq!(a.master_fingerprint, b.master_fingerprint);
    }

    #[test]
    fn test_parse_path_forms() {
        assert_eq!(parse_path("m/107'/1'/0'").unwrap(), parse_path("107'/1'/0'").unwrap());
        assert!(parse_path("m/not/a/path").is_err());
    }

    #[test]
    fn test_network_affects_encoding_only() {
        let mnemonic = parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::Spanish).unwrap();
        let seed = derive_seed(&mnemonic, "");
        let secp = Secp256k1::new();
        let main = derive_master(&seed, Network::Bitcoin).unwrap();
        let test = derive_master(&seed, Network::Testnet).unwrap();
        assert_eq!(main.fingerprint(&secp), test.fingerprint(&secp));
        assert_eq!(main.private_key, test.private_key);
    }
}
