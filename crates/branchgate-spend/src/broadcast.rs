//! Broadcast response classification
//!
//! Explorers answer a broadcast with plain text: the txid on success, a node
//! error message otherwise. A spend that is valid but submitted before its
//! timelock matured is rejected by the node as `non-final` (absolute lock) or
//! `non-BIP68-final` (relative lock); that case is reported separately so the
//! caller can simply retry later.

use bitcoin::Txid;
use serde::Serialize;
use std::str::FromStr;

/// Substrings that mark a "timelock not yet satisfied" rejection
pub const DEFAULT_PREMATURE_MARKERS: &[&str] = &["non-BIP68-final", "non-final"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BroadcastOutcome {
    /// Accepted; the explorer echoed the txid
    Sent(Txid),
    /// Rejected because a timelock has not matured yet
    Premature { message: String },
    /// Anything else, verbatim
    OtherFailure(String),
}

/// Maps explorer responses to [`BroadcastOutcome`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastClassifier {
    premature_markers: Vec<String>,
}

impl Default for BroadcastClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PREMATURE_MARKERS.iter().map(|m| m.to_string()))
    }
}

impl BroadcastClassifier {
    /// Classifier with a custom marker list (for backends that word the
    /// rejection differently)
    pub fn new(markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            premature_markers: markers.into_iter().filter(|m| !m.is_empty()).collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.premature_markers
    }

    pub fn classify(&self, response: &str) -> BroadcastOutcome {
        if self
            .premature_markers
            .iter()
            .any(|m| response.contains(m.as_str()))
        {
            return BroadcastOutcome::Premature {
                message: response.trim().to_string(),
            };
        }

        let trimmed = response.trim();
        if trimmed.len() == 64 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let Ok(txid) = Txid::from_str(trimmed) {
                return BroadcastOutcome::Sent(txid);
            }
        }

        BroadcastOutcome::OtherFailure(trimmed.to_string())
    }
}

/// Classify with the default markers
pub fn classify(response: &str) -> BroadcastOutcome {
    BroadcastClassifier::default().classify(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

    #[test]
    fn test_sent() {
        assert_eq!(
            classify(&format!("{}\n", TXID)),
            BroadcastOutcome::Sent(Txid::from_str(TXID).unwrap())
        );
    }

    #[test]
    fn test_premature_markers() {
        let bip68 = r#"sendrawtransaction RPC error: {"code":-26,"message":"non-BIP68-final"}"#;
        assert!(matches!(classify(bip68), BroadcastOutcome::Premature { .. }));

        let absolute = r#"sendrawtransaction RPC error: {"code":-26,"message":"non-final"}"#;
        assert!(matches!(classify(absolute), BroadcastOutcome::Premature { .. }));
    }

    #[test]
    fn test_other_failures() {
        let spent = r#"sendrawtransaction RPC error: {"code":-25,"message":"bad-txns-inputs-missingorspent"}"#;
        assert_eq!(classify(spent), BroadcastOutcome::OtherFailure(spent.to_string()));

        assert_eq!(classify(""), BroadcastOutcome::OtherFailure(String::new()));
        assert_eq!(classify("   "), BroadcastOutcome::OtherFailure(String::new()));
        // 63 hex chars is not a txid
        assert!(matches!(classify(&TXID[1..]), BroadcastOutcome::OtherFailure(_)));
    }

    #[test]
    fn test_custom_markers() {
        let classifier = BroadcastClassifier::new(vec!["locktime not reached".to_string()]);
        assert!(matches!(
            classifier.classify("error: locktime not reached"),
            BroadcastOutcome::Premature { .. }
        ));
        assert!(matches!(classifier.classify("non-final"), BroadcastOutcome::OtherFailure(_)));
    }

    #[test]
    fn test_empty_markers_ignored() {
        let classifier = BroadcastClassifier::new(vec![String::new()]);
        assert!(classifier.markers().is_empty());
        assert!(matches!(classifier.classify("x"), BroadcastOutcome::OtherFailure(_)));
    }
}
