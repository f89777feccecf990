use crate::symbol::validate_symbol;
use crate::{Error, Result, TradeRecord};

/// Paper-trading ledger for one pool of cash and its positions.
///
/// `PaperLedger` in `crates/paper` implements this. Invalid inputs are
/// rejected with `Error::Validation`; a well-formed trade that cannot be
/// funded (or covered) returns `Ok(false)` and leaves the ledger untouched.
pub trait Ledger: Send + Sync {
    /// Cash balance.
    fn balance(&self) -> f64;

    /// balance.increase
    fn deposit(&mut self, amount: f64) -> Result<()>;

    /// balance.decrease; fails on overdraw.
    fn withdraw(&mut self, amount: f64) -> Result<()>;

    /// Open volume for `symbol` (zero when flat).
    fn position(&self, symbol: &str) -> f64;

    /// Weighted-average entry price of the open lot.
    fn average_entry(&self, symbol: &str) -> Option<f64>;

    fn execute_buy(&mut self, symbol: &str, price: f64, volume: f64) -> Result<bool>;

    fn execute_sell(&mut self, symbol: &str, price: f64, volume: f64) -> Result<bool>;

    /// Every executed trade, oldest first.
    fn trades(&self) -> &[TradeRecord];
}

/// Shared trade-input validation: well-formed symbol, finite positive price
/// and volume.
pub fn validate_trade(symbol: &str, price: f64, volume: f64) -> Result<()> {
    validate_symbol(symbol)?;
    if !price.is_finite() || price <= 0.0 {
        return Err(Error::Validation(format!(
            "price must be positive, got {price} for {symbol}"
        )));
    }
    if !volume.is_finite() || volume <= 0.0 {
        return Err(Error::Validation(format!(
            "volume must be positive, got {volume} for {symbol}"
        )));
    }
    Ok(())
}

/// Validation for deposits and withdrawals.
pub fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(Error::Validation(format!(
            "amount must be a non-negative number, got {amount}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_price_and_volume() {
        assert!(validate_trade("BTC/USDT", 0.0, 1.0).is_err());
        assert!(validate_trade("BTC/USDT", -5.0, 1.0).is_err());
        assert!(validate_trade("BTC/USDT", 100.0, 0.0).is_err());
        assert!(validate_trade("BTC/USDT", f64::NAN, 1.0).is_err());
        assert!(validate_trade("", 100.0, 1.0).is_err());
        assert!(validate_trade("BTC/USDT", 100.0, 0.5).is_ok());
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(validate_amount(-1.0).is_err());
        assert!(validate_amount(f64::INFINITY).is_err());
        assert!(validate_amount(0.0).is_ok());
    }
}
