//! Participant key management
//!
//! A participant is one signer of a policy: an account xpub plus the origin
//! it was derived at, rendered into the script as `[fp/origin]xpub/0/0`.

use bitcoin::bip32::{DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, Signing};
use branchgate_core::keys::{derive_account, KeyError, KEY_PATH};
use miniscript::descriptor::{DescriptorPublicKey, DescriptorXKey, Wildcard};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParticipantError {
    #[error("Invalid xpub: {0}")]
    InvalidXpub(String),

    #[error("Missing fingerprint for xpub")]
    MissingFingerprint,

    #[error("Key derivation failed: {0}")]
    Key(#[from] KeyError),
}

/// A signer of the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Human-readable label ("descendant_1", "recovery", ...)
    pub label: String,
    /// Master fingerprint of the signer's seed (hex string)
    #[serde(with = "fingerprint_serde")]
    pub fingerprint: Fingerprint,
    /// Account-level extended public key (base58 string)
    #[serde(with = "xpub_serde")]
    pub xpub: Xpub,
    /// Derivation path from master to the account
    #[serde(with = "derivation_path_serde")]
    pub origin_path: DerivationPath,
}

/// Macro for creating serde modules that use FromStr/ToString
macro_rules! string_serde {
    ($mod_name:ident, $type:ty) => {
        mod $mod_name {
            use super::*;
            use serde::{Deserializer, Serializer};

            pub fn serialize<S>(value: &$type, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&value.to_string())
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<$type, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                <$type>::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(fingerprint_serde, Fingerprint);
string_serde!(xpub_serde, Xpub);
string_serde!(derivation_path_serde, DerivationPath);

impl Participant {
    /// Derive a participant from a master key at `origin_path`
    pub fn from_master<C: Signing>(
        secp: &Secp256k1<C>,
        master: &Xpriv,
        label: impl Into<String>,
        origin_path: &DerivationPath,
    ) -> Result<Self, ParticipantError> {
        let account = derive_account(secp, master, origin_path)?;
        Ok(Self {
            label: label.into(),
            fingerprint: account.master_fingerprint,
            xpub: account.xpub,
            origin_path: account.origin,
        })
    }

    /// Parse from a descriptor key string like "[fingerprint/path]xpub"
    pub fn from_descriptor_str(label: impl Into<String>, s: &str) -> Result<Self, ParticipantError> {
        let desc_key = DescriptorPublicKey::from_str(s)
            .map_err(|e| ParticipantError::InvalidXpub(e.to_string()))?;

        let (origin, xpub) = match desc_key {
            DescriptorPublicKey::XPub(xkey) => (xkey.origin, xkey.xkey),
            _ => {
                return Err(ParticipantError::InvalidXpub(
                    "Expected a single-path xpub".into(),
                ))
            }
        };

        let (fingerprint, origin_path) = origin.ok_or(ParticipantError::MissingFingerprint)?;

        Ok(Self {
            label: label.into(),
            fingerprint,
            xpub,
            origin_path,
        })
    }

    /// Descriptor key of the spending key: `[fingerprint/origin]xpub/0/0`
    pub fn to_descriptor_key(&self) -> DescriptorPublicKey {
        DescriptorPublicKey::XPub(DescriptorXKey {
            origin: Some((self.fingerprint, self.origin_path.clone())),
            xkey: self.xpub,
            derivation_path: DerivationPath::from(KEY_PATH.to_vec()),
            wildcard: Wildcard::None,
        })
    }
}
