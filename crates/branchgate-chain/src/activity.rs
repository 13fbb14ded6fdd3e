//! Classification of address activity
//!
//! Answers "what happened last" for the policy address: did funds arrive,
//! leave, or leave with change coming back?

use crate::TxSummary;
use bitcoin::{Amount, Script, SignedAmount, Txid};
use serde::Serialize;

/// Direction of a transaction relative to one script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Pays to the script, spends nothing from it
    Incoming,
    /// Spends from the script, nothing comes back
    Outgoing,
    /// Spends from the script and pays change back to it
    OutgoingWithChange,
    /// Neither spends from nor pays to the script
    Unrelated,
}

/// One transaction seen from the policy address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activity {
    pub txid: Txid,
    pub direction: Direction,
    pub block_height: Option<u32>,
    /// Value spent from the script
    pub sent: Amount,
    /// Value paid to the script
    pub received: Amount,
}

impl Activity {
    /// Net effect on the address balance
    pub fn net(&self) -> SignedAmount {
        SignedAmount::from_sat(self.received.to_sat() as i64 - self.sent.to_sat() as i64)
    }
}

/// Classify a transaction relative to `script`
pub fn classify_activity(tx: &TxSummary, script: &Script) -> Activity {
    let sent: Amount = tx
        .inputs
        .iter()
        .filter(|i| i.script_pubkey.as_script() == script)
        .map(|i| i.value)
        .sum();
    let received: Amount = tx
        .outputs
        .iter()
        .filter(|o| o.script_pubkey.as_script() == script)
        .map(|o| o.value)
        .sum();

    let spends = tx.inputs.iter().any(|i| i.script_pubkey.as_script() == script);
    let pays = tx.outputs.iter().any(|o| o.script_pubkey.as_script() == script);

    let direction = match (spends, pays) {
        (true, true) => Direction::OutgoingWithChange,
        (true, false) => Direction::Outgoing,
        (false, true) => Direction::Incoming,
        (false, false) => Direction::Unrelated,
    };

    Activity {
        txid: tx.txid,
        direction,
        block_height: tx.block_height,
        sent,
        received,
    }
}

/// Most recent transaction: mempool first, then the highest block.
pub fn latest(txs: &[TxSummary]) -> Option<&TxSummary> {
    txs.iter()
        .max_by_key(|tx| tx.block_height.map_or(u64::MAX, u64::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxEndpoint;
    use bitcoin::hashes::Hash;
    use bitcoin::ScriptBuf;

    fn ours() -> ScriptBuf {
        ScriptBuf::from_bytes(vec![0x00, 0x20, 0xaa])
    }

    fn theirs() -> ScriptBuf {
        ScriptBuf::from_bytes(vec![0x00, 0x14, 0xbb])
    }

    fn endpoint(script: ScriptBuf, sats: u64) -> TxEndpoint {
        TxEndpoint {
            script_pubkey: script,
            value: Amount::from_sat(sats),
        }
    }

    fn tx(n: u8, height: Option<u32>, inputs: Vec<TxEndpoint>, outputs: Vec<TxEndpoint>) -> TxSummary {
        TxSummary {
            txid: Txid::from_byte_array([n; 32]),
            confirmed: height.is_some(),
            block_height: height,
            inputs,
            outputs,
        }
    }

    #[test]
    fn test_incoming() {
        let t = tx(1, Some(10), vec![endpoint(theirs(), 20_000)], vec![endpoint(ours(), 10_000)]);
        let a = classify_activity(&t, &ours());
        assert_eq!(a.direction, Direction::Incoming);
        assert_eq!(a.received, Amount::from_sat(10_000));
        assert_eq!(a.net(), SignedAmount::from_sat(10_000));
    }

    #[test]
    fn test_outgoing_and_change() {
        let out = tx(2, Some(11), vec![endpoint(ours(), 10_000)], vec![endpoint(theirs(), 9_800)]);
        assert_eq!(classify_activity(&out, &ours()).direction, Direction::Outgoing);

        let change = tx(
            3,
            Some(12),
            vec![endpoint(ours(), 10_000)],
            vec![endpoint(theirs(), 4_000), endpoint(ours(), 5_800)],
        );
        let a = classify_activity(&change, &ours());
        assert_eq!(a.direction, Direction::OutgoingWithChange);
        assert_eq!(a.net(), SignedAmount::from_sat(-4_200));
    }

    #[test]
    fn test_unrelated() {
        let t = tx(4, None, vec![endpoint(theirs(), 1)], vec![endpoint(theirs(), 1)]);
        assert_eq!(classify_activity(&t, &ours()).direction, Direction::Unrelated);
    }

    #[test]
    fn test_latest_prefers_mempool_then_height() {
        let txs = vec![
            tx(1, Some(100), vec![], vec![]),
            tx(2, Some(105), vec![], vec![]),
            tx(3, Some(90), vec![], vec![]),
        ];
        assert_eq!(latest(&txs).unwrap().txid, Txid::from_byte_array([2; 32]));

        let mut with_mempool = txs.clone();
        with_mempool.push(tx(4, None, vec![], vec![]));
        assert_eq!(latest(&with_mempool).unwrap().txid, Txid::from_byte_array([4; 32]));

        assert!(latest(&[]).is_none());
    }
}
