//! branchgate core
//!
//! Seed handling and key derivation shared by the policy and spend crates.
//!
//! # Key Derivation
//!
//! Every participant of a policy is derived from one BIP-39 seed:
//! - account key at a hardened origin path, e.g. `m/301'/1'/0'`
//! - spending key at `<account>/0/0` (see [`keys::KEY_PATH`])
//!
//! The demo wallets all share [`seed::DEMO_MNEMONIC`], a Spanish mnemonic.

pub mod keys;
pub mod seed;

pub use keys::*;
pub use seed::*;
