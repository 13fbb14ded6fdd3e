//! BIP-39 seed management
//!
//! Parses mnemonics (English or Spanish) and stretches them into seed bytes.

use bip39::{Language, Mnemonic};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Mnemonic shared by the demo wallets (Spanish wordlist).
pub const DEMO_MNEMONIC: &str =
    "fábula medalla sastre pronto mármol rutina diez poder fuente pulpo empate lagarto";

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// Wordlist a mnemonic is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MnemonicLanguage {
    #[default]
    English,
    Spanish,
}

impl MnemonicLanguage {
    fn wordlist(self) -> Language {
        match self {
            MnemonicLanguage::English => Language::English,
            MnemonicLanguage::Spanish => Language::Spanish,
        }
    }
}

impl std::str::FromStr for MnemonicLanguage {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(MnemonicLanguage::English),
            "spanish" | "es" => Ok(MnemonicLanguage::Spanish),
            other => Err(SeedError::InvalidMnemonic(format!(
                "unsupported language '{}'",
                other
            ))),
        }
    }
}

/// Parse a mnemonic from words in the given language
pub fn parse_mnemonic(words: &str, language: MnemonicLanguage) -> Result<Mnemonic, SeedError> {
    Mnemonic::parse_in(language.wordlist(), words.trim())
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// Derive seed bytes from mnemonic (with optional passphrase).
///
/// The returned buffer is wiped on drop.
pub fn derive_seed(mnemonic: &Mnemonic, passphrase: &str) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed(passphrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_mnemonic_is_spanish() {
        let mnemonic = parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::Spanish).unwrap();
        assert_eq!(mnemonic.word_count(), 12);
        assert_eq!(mnemonic.language(), Language::Spanish);

        assert!(parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::English).is_err());
    }

    #[test]
    fn test_english_vector_seed() {
        // BIP-39 reference vector (passphrase "TREZOR")
        let mnemonic = parse_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
            MnemonicLanguage::English,
        )
        .unwrap();
        let seed = derive_seed(&mnemonic, "TREZOR");
        let hex: String = seed[..4].iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "c55257c3");
    }

    #[test]
    fn test_passphrase_changes_seed() {
        let mnemonic = parse_mnemonic(DEMO_MNEMONIC, MnemonicLanguage::Spanish).unwrap();
        let a = derive_seed(&mnemonic, "");
        let b = derive_seed(&mnemonic, "otra frase");
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_mnemonic("not a mnemonic", MnemonicLanguage::English).is_err());
        assert!(parse_mnemonic("", MnemonicLanguage::Spanish).is_err());
    }

    #[test]
    fn test_language_from_str_and_serde() {
        assert_eq!("Spanish".parse::<MnemonicLanguage>().unwrap(), MnemonicLanguage::Spanish);
        assert_eq!("en".parse::<MnemonicLanguage>().unwrap(), MnemonicLanguage::English);
        assert!("klingon".parse::<MnemonicLanguage>().is_err());

        let json = serde_json::to_string(&MnemonicLanguage::Spanish).unwrap();
        assert_eq!(json, "\"spanish\"");
    }
}
