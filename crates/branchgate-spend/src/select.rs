//! UTXO selection
//!
//! Spends exactly one output: the oldest confirmed one. Mempool outputs sort
//! after every confirmed output.

use bitcoin::Amount;
use branchgate_chain::Utxo;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("No funds at the policy address")]
    NoFunds,
}

fn age_key(utxo: &Utxo) -> u64 {
    match utxo.block_height {
        Some(h) if utxo.confirmed => u64::from(h),
        _ => u64::MAX,
    }
}

/// Pick the output with the lowest confirmation height.
///
/// Ties keep the first one in input order.
pub fn select(candidates: &[Utxo]) -> Result<Utxo, SelectError> {
    candidates
        .iter()
        .min_by_key(|u| age_key(u))
        .cloned()
        .ok_or(SelectError::NoFunds)
}

/// Sort oldest first (stable)
pub fn sort_oldest_first(utxos: &mut [Utxo]) {
    utxos.sort_by_key(age_key);
}

pub fn total_value(utxos: &[Utxo]) -> Amount {
    utxos.iter().map(|u| u.value).sum()
}
