//! Fee-adjusted spend planning
//!
//! One input, one output, a flat fee. The plan is pure and computed before
//! any transaction is built or signed.

use bitcoin::Amount;
use branchgate_chain::Utxo;
use serde::Serialize;
use thiserror::Error;

/// Flat fee of the demo wallets, in satoshis
pub const DEFAULT_FEE_SATS: u64 = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Output of {value} cannot pay a fee of {fee}")]
    InsufficientFunds { value: Amount, fee: Amount },
}

/// What a spend will do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendPlan {
    pub utxo: Utxo,
    pub fee: Amount,
    /// `utxo.value - fee`, always positive
    pub value_out: Amount,
}

/// Plan spending `utxo` with a flat `fee`.
///
/// Fails iff the output is not worth more than the fee.
pub fn plan(utxo: &Utxo, fee: Amount) -> Result<SpendPlan, PlanError> {
    match utxo.value.checked_sub(fee) {
        Some(value_out) if value_out > Amount::ZERO => Ok(SpendPlan {
            utxo: utxo.clone(),
            fee,
            value_out,
        }),
        _ => Err(PlanError::InsufficientFunds {
            value: utxo.value,
            fee,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;
    use proptest::prelude::*;

    fn utxo(sats: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([9; 32]),
            vout: 1,
            value: Amount::from_sat(sats),
            confirmed: true,
            block_height: Some(1),
        }
    }

    #[test]
    fn test_standard_plan() {
        let p = plan(&utxo(10_000), Amount::from_sat(DEFAULT_FEE_SATS)).unwrap();
        assert_eq!(p.value_out, Amount::from_sat(9_800));
        assert_eq!(p.fee, Amount::from_sat(200));
    }

    #[test]
    fn test_dust_rejected() {
        let err = plan(&utxo(150), Amount::from_sat(DEFAULT_FEE_SATS)).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientFunds {
                value: Amount::from_sat(150),
                fee: Amount::from_sat(200),
            }
        );
    }

    #[test]
    fn test_value_equal_to_fee_rejected() {
        assert!(plan(&utxo(200), Amount::from_sat(200)).is_err());
        assert!(plan(&utxo(201), Amount::from_sat(200)).is_ok());
    }

    proptest! {
        /// Fails iff value <= fee; otherwise value_out = value - fee.
        #[test]
        fn plan_matches_arithmetic(value in 0u64..1_000_000, fee in 0u64..10_000) {
            let result = plan(&utxo(value), Amount::from_sat(fee));
            if value <= fee {
                prop_assert!(result.is_err());
            } else {
                prop_assert_eq!(result.unwrap().value_out, Amount::from_sat(value - fee));
            }
        }

        /// Planning twice gives the same answer.
        #[test]
        fn plan_is_idempotent(value in 0u64..1_000_000, fee in 0u64..10_000) {
            let u = utxo(value);
            let fee = Amount::from_sat(fee);
            prop_assert_eq!(plan(&u, fee), plan(&u, fee));
        }
    }
}
