//! Payment evaluator
//!
//! Binds the required coin amount exactly once, from the exchange rate at
//! purchase creation time, and applies the strict sufficiency rule. The
//! creation-time rate is never re-fetched during evaluation: a moving target
//! would let price drift flip an already-adequate payment to insufficient.

use broker_common::{Error, Result, COIN};

/// Sufficiency check bound to a purchase's fixed required amount
#[derive(Debug, Clone, Copy)]
pub struct PaymentEvaluator {
    required_units: u64,
}

impl PaymentEvaluator {
    /// Compute the required coin amount from the fiat price target and the
    /// rate captured at creation. Rounds up to the smallest unit so the
    /// buyer can never underpay by rounding.
    pub fn bind(price_target_fiat: f64, fiat_per_coin: f64) -> Result<Self> {
        if !fiat_per_coin.is_finite() || fiat_per_coin <= 0.0 {
            return Err(Error::OracleUnavailable(format!(
                "cannot price against rate {}",
                fiat_per_coin
            )));
        }
        if !price_target_fiat.is_finite() || price_target_fiat <= 0.0 {
            return Err(Error::Configuration(format!(
                "invalid price target {}",
                price_target_fiat
            )));
        }

        let units = (price_target_fiat / fiat_per_coin * COIN as f64).ceil() as u64;
        if units == 0 {
            return Err(Error::Configuration(
                "price target rounds to zero coin units".to_string(),
            ));
        }

        Ok(Self {
            required_units: units,
        })
    }

    /// Rebuild from an already-persisted required amount (workflow resume)
    pub fn from_required_units(required_units: u64) -> Self {
        Self { required_units }
    }

    pub fn required_units(&self) -> u64 {
        self.required_units
    }

    /// Strict sufficiency: observed value must meet or exceed the target
    pub fn is_sufficient(&self, observed_units: u64) -> bool {
        observed_units >= self.required_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_exact_division() {
        // 30 fiat at 100 fiat/coin -> 0.30 coin
        let eval = PaymentEvaluator::bind(30.0, 100.0).unwrap();
        assert_eq!(eval.required_units(), 30_000_000);
    }

    #[test]
    fn test_bind_rounds_up() {
        // 1 fiat at 3 fiat/coin -> 0.33333333... rounds up by one unit
        let eval = PaymentEvaluator::bind(1.0, 3.0).unwrap();
        assert_eq!(eval.required_units(), 33_333_334);
    }

    #[test]
    fn test_sufficiency_is_strict() {
        let eval = PaymentEvaluator::bind(30.0, 100.0).unwrap();
        assert!(eval.is_sufficient(30_000_000));
        assert!(eval.is_sufficient(30_000_001));
        assert!(!eval.is_sufficient(29_999_999));
        assert!(!eval.is_sufficient(25_000_000));
    }

    #[test]
    fn test_bind_rejects_bad_rate() {
        assert!(PaymentEvaluator::bind(30.0, 0.0).is_err());
        assert!(PaymentEvaluator::bind(30.0, -5.0).is_err());
        assert!(PaymentEvaluator::bind(30.0, f64::NAN).is_err());
    }

    #[test]
    fn test_bind_rejects_bad_target() {
        assert!(PaymentEvaluator::bind(0.0, 100.0).is_err());
        assert!(PaymentEvaluator::bind(-1.0, 100.0).is_err());
    }
}
