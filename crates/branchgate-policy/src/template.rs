//! Data-driven policy templates
//!
//! A template names the participants (by origin path below one seed, or by an
//! external descriptor key) and lists the branches as
//! `{id, threshold, participants, offset_blocks}`. The three demo wallets are
//! built-in templates; custom ones deserialize from TOML.
//!
//! ```toml
//! name = "self-custody"
//!
//! [[participants]]
//! id = "daily_1"
//! origin_path = "m/101'/1'/0'"
//!
//! [[branches]]
//! id = "daily"
//! threshold = 2
//! participants = ["daily_1", "daily_2", "daily_3"]
//! ```

use crate::participant::{Participant, ParticipantError};
use crate::policy::BranchSpec;
use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::{Secp256k1, Signing};
use branchgate_core::keys::{parse_path, KeyError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Branch '{branch}' references unknown participant '{participant}'")]
    UnknownParticipant { branch: String, participant: String },

    #[error("Participant '{0}' is declared twice")]
    DuplicateParticipant(String),

    #[error("Participant '{0}' needs exactly one of origin_path or descriptor")]
    KeySource(String),

    #[error(transparent)]
    Participant(#[from] ParticipantError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Where a participant's key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSpec {
    pub id: String,
    /// Hardened origin below the session seed, e.g. `m/302'/1'/0'`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<String>,
    /// External key `[fingerprint/path]xpub` (watch-only signer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
}

impl ParticipantSpec {
    fn derived(id: &str, origin_path: &str) -> Self {
        Self {
            id: id.to_string(),
            origin_path: Some(origin_path.to_string()),
            descriptor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTemplate {
    pub id: String,
    pub threshold: usize,
    /// Participant ids, in signing preference order
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_blocks: Option<u32>,
}

impl BranchTemplate {
    fn new(id: &str, threshold: usize, participants: &[&str], offset_blocks: Option<u32>) -> Self {
        Self {
            id: id.to_string(),
            threshold,
            participants: participants.iter().map(|p| p.to_string()).collect(),
            offset_blocks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTemplate {
    pub name: String,
    pub participants: Vec<ParticipantSpec>,
    pub branches: Vec<BranchTemplate>,
}

impl PolicyTemplate {
    /// Inheritance: the owner spends freely, two descendants together after
    /// 3 blocks, a recovery key alone after 5.
    pub fn inheritance() -> Self {
        Self {
            name: "inheritance".into(),
            participants: vec![
                ParticipantSpec::derived("progenitor", "m/301'/1'/0'"),
                ParticipantSpec::derived("descendant_1", "m/302'/1'/0'"),
                ParticipantSpec::derived("descendant_2", "m/303'/1'/0'"),
                ParticipantSpec::derived("recovery", "m/304'/1'/0'"),
            ],
            branches: vec![
                BranchTemplate::new("progenitor", 1, &["progenitor"], None),
                BranchTemplate::new("inheritance", 2, &["descendant_1", "descendant_2"], Some(3)),
                BranchTemplate::new("recovery", 1, &["recovery"], Some(5)),
            ],
        }
    }

    /// Self-custody: 2-of-3 daily keys, 1-of-2 recovery after 3 blocks, an
    /// emergency key after 5.
    pub fn self_custody() -> Self {
        Self {
            name: "self-custody".into(),
            participants: vec![
                ParticipantSpec::derived("daily_1", "m/101'/1'/0'"),
                ParticipantSpec::derived("daily_2", "m/102'/1'/0'"),
                ParticipantSpec::derived("daily_3", "m/103'/1'/0'"),
                ParticipantSpec::derived("recovery_1", "m/105'/1'/0'"),
                ParticipantSpec::derived("recovery_2", "m/106'/1'/0'"),
                ParticipantSpec::derived("emergency", "m/107'/1'/0'"),
            ],
            branches: vec![
                BranchTemplate::new("daily", 2, &["daily_1", "daily_2", "daily_3"], None),
                BranchTemplate::new("recovery", 1, &["recovery_1", "recovery_2"], Some(3)),
                BranchTemplate::new("emergency", 1, &["emergency"], Some(5)),
            ],
        }
    }

    /// Vault: an emergency key that moves funds at once, and an unvault key
    /// that has to wait one block.
    pub fn vault() -> Self {
        Self {
            name: "vault".into(),
            participants: vec![
                ParticipantSpec::derived("unvault", "m/201'/1'/0'"),
                ParticipantSpec::derived("emergency", "m/202'/1'/0'"),
            ],
            branches: vec![
                BranchTemplate::new("immediate", 1, &["emergency"], None),
                BranchTemplate::new("delayed", 1, &["unvault"], Some(1)),
            ],
        }
    }

    /// Built-in template by name (English or the original Spanish names)
    pub fn builtin(name: &str) -> Result<Self, TemplateError> {
        match name.to_ascii_lowercase().as_str() {
            "inheritance" | "herencia" => Ok(Self::inheritance()),
            "self-custody" | "self_custody" | "autocustodia" => Ok(Self::self_custody()),
            "vault" | "boveda" => Ok(Self::vault()),
            other => Err(TemplateError::UnknownTemplate(other.to_string())),
        }
    }

    /// Resolve every participant to a key
    pub fn participants<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        master: &Xpriv,
    ) -> Result<Vec<Participant>, TemplateError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.participants.len());

        for spec in &self.participants {
            if !seen.insert(spec.id.as_str()) {
                return Err(TemplateError::DuplicateParticipant(spec.id.clone()));
            }
            let participant = match (&spec.origin_path, &spec.descriptor) {
                (Some(path), None) => {
                    Participant::from_master(secp, master, &spec.id, &parse_path(path)?)?
                }
                (None, Some(desc)) => Participant::from_descriptor_str(&spec.id, desc)?,
                _ => return Err(TemplateError::KeySource(spec.id.clone())),
            };
            out.push(participant);
        }
        Ok(out)
    }

    /// Branch specifications ready for [`crate::policy::build_policy`]
    pub fn branch_specs<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        master: &Xpriv,
    ) -> Result<Vec<BranchSpec>, TemplateError> {
        let participants = self.participants(secp, master)?;
        let by_id: HashMap<&str, &Participant> =
            participants.iter().map(|p| (p.label.as_str(), p)).collect();

        self.branches
            .iter()
            .map(|branch| {
                let signers = branch
                    .participants
                    .iter()
                    .map(|id| {
                        by_id
                            .get(id.as_str())
                            .map(|p| p.to_descriptor_key())
                            .ok_or_else(|| TemplateError::UnknownParticipant {
                                branch: branch.id.clone(),
                                participant: id.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(BranchSpec::new(
                    branch.id.clone(),
                    branch.threshold,
                    signers,
                    branch.offset_blocks,
                ))
            })
            .collect()
    }
}
