//! Seconds-weighted earnings calculator
//!
//! The data feed tracks subsidy as accumulated "seconds x effective value"
//! units at 18 decimals. A participant's total at time `end` is the stored
//! accumulator plus the elapsed time since the last update weighted by the
//! last effective value, converted to whole tokens.

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use crate::clients::{AccountSubsidy, CalculationError, Calculator};
use crate::types::decimal;

/// Accumulator units per token
const UNITS_PER_TOKEN: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct SecondsWeightedCalculator;

impl SecondsWeightedCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Accumulated units to whole tokens, truncating
    pub fn seconds_to_tokens(seconds: &BigUint) -> BigUint {
        seconds / BigUint::from(UNITS_PER_TOKEN)
    }

    pub fn total_earned(subsidy: &AccountSubsidy, end_timestamp: i64) -> Result<BigUint, CalculationError> {
        let accumulated = decimal::parse(&subsidy.seconds_accumulated).map_err(|_| CalculationError::InvalidField {
            field: "secondsAccumulated",
            value: subsidy.seconds_accumulated.clone(),
        })?;
        let effective = decimal::parse(&subsidy.last_effective_value).map_err(|_| CalculationError::InvalidField {
            field: "lastEffectiveValue",
            value: subsidy.last_effective_value.clone(),
        })?;
        let updated_at: i64 = subsidy
            .updated_at_timestamp
            .trim()
            .parse()
            .map_err(|_| CalculationError::InvalidField {
                field: "updatedAtTimestamp",
                value: subsidy.updated_at_timestamp.clone(),
            })?;

        // An end before the last update shrinks the total; it never goes below zero
        let elapsed = BigInt::from(end_timestamp) - BigInt::from(updated_at);
        let total = BigInt::from(accumulated) + elapsed * BigInt::from(effective);
        let total = total.to_biguint().unwrap_or_else(BigUint::zero);

        Ok(Self::seconds_to_tokens(&total))
    }
}

#[async_trait::async_trait]
impl Calculator for SecondsWeightedCalculator {
    async fn calculate_total_earned(
        &self,
        subsidy: &AccountSubsidy,
        end_timestamp: i64,
    ) -> Result<BigUint, CalculationError> {
        Self::total_earned(subsidy, end_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Account;

    fn subsidy(accumulated: &str, effective: &str, updated_at: &str) -> AccountSubsidy {
        AccountSubsidy {
            account: Account { id: "0xuser".to_string() },
            seconds_accumulated: accumulated.to_string(),
            last_effective_value: effective.to_string(),
            updated_at_timestamp: updated_at.to_string(),
        }
    }

    #[test]
    fn test_accumulates_elapsed_time() {
        // 2 tokens accumulated, then 100s at 1e16 units/s = 1 more token
        let s = subsidy("2000000000000000000", "10000000000000000", "1000");
        let total = SecondsWeightedCalculator::total_earned(&s, 1100).unwrap();
        assert_eq!(total, BigUint::from(3u32));
    }

    #[test]
    fn test_truncates_partial_tokens() {
        let s = subsidy("1999999999999999999", "0", "0");
        assert_eq!(SecondsWeightedCalculator::total_earned(&s, 10).unwrap(), BigUint::from(1u32));
    }

    #[test]
    fn test_end_before_update_never_negative() {
        let s = subsidy("0", "1000000000000000000", "500");
        assert_eq!(SecondsWeightedCalculator::total_earned(&s, 100).unwrap(), BigUint::zero());
    }

    #[test]
    fn test_rejects_malformed_fields() {
        let err = SecondsWeightedCalculator::total_earned(&subsidy("abc", "1", "1"), 1).unwrap_err();
        assert_eq!(
            err,
            CalculationError::InvalidField {
                field: "secondsAccumulated",
                value: "abc".to_string()
            }
        );
        assert!(SecondsWeightedCalculator::total_earned(&subsidy("1", "-5", "1"), 1).is_err());
        assert!(SecondsWeightedCalculator::total_earned(&subsidy("1", "1", "soon"), 1).is_err());
    }

    #[tokio::test]
    async fn test_trait_delegates() {
        let calc = SecondsWeightedCalculator::new();
        let s = subsidy("5000000000000000000", "0", "0");
        assert_eq!(calc.calculate_total_earned(&s, 0).await.unwrap(), BigUint::from(5u32));
    }
}
