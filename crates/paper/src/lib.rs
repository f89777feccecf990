use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use common::ledger::{validate_amount, validate_trade};
use common::{Error, Ledger, OrderSide, Result, TradeRecord};

/// Open lot for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Lot {
    pub volume: f64,
    /// Total cost basis of `volume`.
    pub cost: f64,
}

impl Lot {
    pub fn average_price(&self) -> Option<f64> {
        (self.volume > 0.0).then(|| self.cost / self.volume)
    }
}

/// Simulated ledger for paper trading.
///
/// Fills happen at exactly the requested price. No real orders are ever
/// sent to the exchange.
#[derive(Debug, Clone, Default)]
pub struct PaperLedger {
    balance: f64,
    lots: HashMap<String, Lot>,
    trades: Vec<TradeRecord>,
}

impl PaperLedger {
    pub fn new(initial_balance: f64) -> Result<Self> {
        validate_amount(initial_balance)?;
        debug!(balance = initial_balance, "PaperLedger initialized");
        Ok(Self {
            balance: initial_balance,
            ..Self::default()
        })
    }

    pub fn lot(&self, symbol: &str) -> Option<Lot> {
        self.lots.get(symbol).copied()
    }

    /// Sum of realized P&L over all sells.
    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().filter_map(|t| t.realized_pnl).sum()
    }

    fn record(&mut self, symbol: &str, side: OrderSide, price: f64, volume: f64, pnl: Option<f64>) {
        self.trades.push(TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            price,
            volume,
            value: price * volume,
            realized_pnl: pnl,
            balance_after: self.balance,
            timestamp: Utc::now(),
        });
    }
}

impl Ledger for PaperLedger {
    fn balance(&self) -> f64 {
        self.balance
    }

    fn deposit(&mut self, amount: f64) -> Result<()> {
        validate_amount(amount)?;
        self.balance += amount;
        Ok(())
    }

    fn withdraw(&mut self, amount: f64) -> Result<()> {
        validate_amount(amount)?;
        if amount > self.balance {
            return Err(Error::Validation(format!(
                "cannot withdraw {amount:.8}, balance is {:.8}",
                self.balance
            )));
        }
        self.balance -= amount;
        Ok(())
    }

    fn position(&self, symbol: &str) -> f64 {
        self.lots.get(symbol).map(|l| l.volume).unwrap_or(0.0)
    }

    fn average_entry(&self, symbol: &str) -> Option<f64> {
        self.lots.get(symbol).and_then(Lot::average_price)
    }

    fn execute_buy(&mut self, symbol: &str, price: f64, volume: f64) -> Result<bool> {
        validate_trade(symbol, price, volume)?;

        let cost = price * volume;
        if cost > self.balance {
            debug!(symbol, cost, balance = self.balance, "Paper buy rejected: insufficient balance");
            return Ok(false);
        }

        self.balance -= cost;
        let lot = self.lots.entry(symbol.to_string()).or_default();
        lot.volume += volume;
        lot.cost += cost;
        self.record(symbol, OrderSide::Buy, price, volume, None);

        info!(symbol, price, volume, cost, "Paper buy filled");
        Ok(true)
    }

    fn execute_sell(&mut self, symbol: &str, price: f64, volume: f64) -> Result<bool> {
        validate_trade(symbol, price, volume)?;

        let Some(lot) = self.lots.get_mut(symbol) else {
            debug!(symbol, "Paper sell rejected: no position");
            return Ok(false);
        };
        if volume > lot.volume {
            debug!(symbol, volume, held = lot.volume, "Paper sell rejected: insufficient position");
            return Ok(false);
        }

        let average = lot.cost / lot.volume;
        let proceeds = price * volume;
        let pnl = (price - average) * volume;

        // Closing the full lot clears it so no float dust is left behind.
        if volume == lot.volume {
            self.lots.remove(symbol);
        } else {
            lot.cost -= average * volume;
            lot.volume -= volume;
        }
        self.balance += proceeds;
        self.record(symbol, OrderSide::Sell, price, volume, Some(pnl));

        info!(symbol, price, volume, proceeds, pnl, "Paper sell filled");
        Ok(true)
    }

    fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }
}
