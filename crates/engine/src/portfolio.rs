use std::collections::HashMap;
use std::fmt;

use tracing::{info, warn};

use common::ledger::validate_trade;
use common::symbol::validate_symbol;
use common::{Error, Ledger, Result, SymbolState};

/// Aggregate trade counters for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TradeStats {
    /// Filled buys and sells.
    pub total_trades: u32,
    pub sells: u32,
    /// Sells with positive realized P&L.
    pub profitable_trades: u32,
    pub realized_pnl: f64,
}

impl TradeStats {
    /// Profitable sells over all sells, in percent.
    pub fn win_rate(&self) -> f64 {
        if self.sells == 0 {
            0.0
        } else {
            f64::from(self.profitable_trades) / f64::from(self.sells) * 100.0
        }
    }
}

struct SymbolBook {
    state: SymbolState,
    /// Cash balance of this ledger is the symbol's allocation.
    ledger: Box<dyn Ledger>,
}

/// What a switch did, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOutcome {
    pub from: Option<String>,
    pub to: String,
    /// `(price, volume)` of the liquidation sell, if one happened.
    pub liquidated: Option<(f64, f64)>,
    pub allocated: f64,
}

/// Capital allocation across monitored symbols.
///
/// Holds the unallocated pool plus one ledger per symbol. At most one symbol
/// is Active; Idle symbols have zero allocation. Every mutation happens in a
/// single `&mut self` call, so whoever owns the lock sees either the state
/// before a switch or the state after it.
pub struct Portfolio {
    initial_capital: f64,
    available: f64,
    symbols: Vec<String>,
    books: HashMap<String, SymbolBook>,
    active: Option<String>,
    stats: TradeStats,
}

impl Portfolio {
    /// `ledgers` must start with zero cash; all capital begins in the pool.
    pub fn new(initial_capital: f64, ledgers: Vec<(String, Box<dyn Ledger>)>) -> Result<Self> {
        if !initial_capital.is_finite() || initial_capital <= 0.0 {
            return Err(Error::Config(format!(
                "initial capital must be positive, got {initial_capital}"
            )));
        }
        let mut symbols = Vec::with_capacity(ledgers.len());
        let mut books = HashMap::with_capacity(ledgers.len());
        for (symbol, ledger) in ledgers {
            validate_symbol(&symbol)?;
            if ledger.balance() != 0.0 {
                return Err(Error::Config(format!(
                    "ledger for {symbol} must start empty, has {}",
                    ledger.balance()
                )));
            }
            if books.contains_key(&symbol) {
                return Err(Error::Config(format!("duplicate symbol {symbol}")));
            }
            symbols.push(symbol.clone());
            books.insert(
                symbol,
                SymbolBook {
                    state: SymbolState::Idle,
                    ledger,
                },
            );
        }
        Ok(Self {
            initial_capital,
            available: initial_capital,
            symbols,
            books,
            active: None,
            stats: TradeStats::default(),
        })
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn available(&self) -> f64 {
        self.available
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn stats(&self) -> TradeStats {
        self.stats
    }

    pub fn state(&self, symbol: &str) -> Option<SymbolState> {
        self.books.get(symbol).map(|b| b.state)
    }

    /// Cash allocated to `symbol` (zero for Idle or unknown symbols).
    pub fn allocated(&self, symbol: &str) -> f64 {
        self.books
            .get(symbol)
            .map(|b| b.ledger.balance())
            .unwrap_or(0.0)
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.books
            .get(symbol)
            .map(|b| b.ledger.position(symbol))
            .unwrap_or(0.0)
    }

    pub fn average_entry(&self, symbol: &str) -> Option<f64> {
        self.books.get(symbol)?.ledger.average_entry(symbol)
    }

    pub fn trade_count(&self, symbol: &str) -> usize {
        self.books
            .get(symbol)
            .map(|b| b.ledger.trades().len())
            .unwrap_or(0)
    }

    /// `available + Σ allocated + Σ position·mark`. Positions without a mark
    /// are valued at their entry price.
    pub fn total_value(&self, mark: impl Fn(&str) -> Option<f64>) -> f64 {
        let held: f64 = self
            .books
            .iter()
            .map(|(symbol, book)| {
                let volume = book.ledger.position(symbol);
                let price = if volume > 0.0 {
                    mark(symbol)
                        .or_else(|| book.ledger.average_entry(symbol))
                        .unwrap_or(0.0)
                } else {
                    0.0
                };
                book.ledger.balance() + volume * price
            })
            .sum();
        self.available + held
    }

    /// Move the allocation to `new_symbol`.
    ///
    /// Liquidates the current active position at `liquidation_price` (skipped
    /// with a warning when `None`), returns its cash to the pool, then
    /// allocates `fraction` of the pool to `new_symbol`.
    pub fn switch_active_symbol(
        &mut self,
        new_symbol: &str,
        liquidation_price: Option<f64>,
        fraction: f64,
    ) -> Result<SwitchOutcome> {
        if !self.books.contains_key(new_symbol) {
            return Err(Error::Validation(format!(
                "{new_symbol} is not a monitored symbol"
            )));
        }
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::Validation(format!(
                "allocation fraction must be in (0, 1], got {fraction}"
            )));
        }
        if self.active.as_deref() == Some(new_symbol) {
            return Ok(SwitchOutcome {
                from: self.active.clone(),
                to: new_symbol.to_string(),
                liquidated: None,
                allocated: self.allocated(new_symbol),
            });
        }

        let from = self.active.clone();
        let mut liquidated = None;
        if let Some(old) = from.as_deref() {
            liquidated = self.liquidate(old, liquidation_price)?;
            if let Some(book) = self.books.get_mut(old) {
                let cash = book.ledger.balance();
                if cash > 0.0 {
                    book.ledger.withdraw(cash)?;
                    self.available += cash;
                }
                book.state = SymbolState::Idle;
            }
        }

        let amount = self.available * fraction;
        let book = self
            .books
            .get_mut(new_symbol)
            .ok_or_else(|| Error::Validation(format!("{new_symbol} is not a monitored symbol")))?;
        book.ledger.deposit(amount)?;
        book.state = SymbolState::Active;
        self.available -= amount;
        self.active = Some(new_symbol.to_string());

        info!(
            from = ?from,
            to = new_symbol,
            liquidation = ?liquidated,
            allocated = amount,
            pool = self.available,
            "Switched active symbol"
        );
        Ok(SwitchOutcome {
            from,
            to: new_symbol.to_string(),
            liquidated,
            allocated: amount,
        })
    }

    fn liquidate(&mut self, symbol: &str, price: Option<f64>) -> Result<Option<(f64, f64)>> {
        let volume = self.position(symbol);
        if volume <= 0.0 {
            return Ok(None);
        }
        let Some(price) = price.filter(|p| p.is_finite() && *p > 0.0) else {
            warn!(symbol, volume, "No price available, skipping liquidation");
            return Ok(None);
        };
        if self.execute_sell(symbol, price, volume)? {
            Ok(Some((price, volume)))
        } else {
            warn!(symbol, volume, price, "Liquidation sell was refused");
            Ok(None)
        }
    }

    /// Buy against the symbol's allocation. `Ok(false)` when unfunded.
    pub fn execute_buy(&mut self, symbol: &str, price: f64, volume: f64) -> Result<bool> {
        validate_trade(symbol, price, volume)?;
        let book = self.book_mut(symbol)?;
        let filled = book.ledger.execute_buy(symbol, price, volume)?;
        if filled {
            self.stats.total_trades += 1;
        }
        Ok(filled)
    }

    /// Sell from the symbol's position. `Ok(false)` when not covered.
    pub fn execute_sell(&mut self, symbol: &str, price: f64, volume: f64) -> Result<bool> {
        validate_trade(symbol, price, volume)?;
        let book = self.book_mut(symbol)?;
        let filled = book.ledger.execute_sell(symbol, price, volume)?;
        if filled {
            let pnl = book
                .ledger
                .trades()
                .last()
                .and_then(|t| t.realized_pnl)
                .unwrap_or(0.0);
            self.stats.total_trades += 1;
            self.stats.sells += 1;
            self.stats.realized_pnl += pnl;
            if pnl > 0.0 {
                self.stats.profitable_trades += 1;
            }
        }
        Ok(filled)
    }

    fn book_mut(&mut self, symbol: &str) -> Result<&mut SymbolBook> {
        self.books
            .get_mut(symbol)
            .ok_or_else(|| Error::Validation(format!("{symbol} is not a monitored symbol")))
    }

    pub fn summary(&self, mark: impl Fn(&str) -> Option<f64>) -> SessionSummary {
        let final_value = self.total_value(&mark);
        let pnl = final_value - self.initial_capital;
        SessionSummary {
            initial_capital: self.initial_capital,
            final_value,
            pnl,
            pnl_percent: pnl / self.initial_capital * 100.0,
            stats: self.stats,
            active_symbol: self.active.clone(),
            available: self.available,
            symbols: self
                .symbols
                .iter()
                .map(|s| SymbolSummary {
                    symbol: s.clone(),
                    state: self.state(s).unwrap_or_default(),
                    allocated: self.allocated(s),
                    position: self.position(s),
                    trades: self.trade_count(s),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSummary {
    pub symbol: String,
    pub state: SymbolState,
    pub allocated: f64,
    pub position: f64,
    pub trades: usize,
}

/// End-of-session report.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub initial_capital: f64,
    pub final_value: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub stats: TradeStats,
    pub active_symbol: Option<String>,
    pub available: f64,
    pub symbols: Vec<SymbolSummary>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trading Session Summary")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Initial portfolio: {:.2}", self.initial_capital)?;
        writeln!(f, "Final portfolio:   {:.2}", self.final_value)?;
        writeln!(f, "Profit/loss:       {:.2} ({:.2}%)", self.pnl, self.pnl_percent)?;
        writeln!(f, "Realized P&L:      {:.2}", self.stats.realized_pnl)?;
        writeln!(f, "Total trades:      {}", self.stats.total_trades)?;
        if self.stats.sells > 0 {
            writeln!(f, "Win rate:          {:.2}%", self.stats.win_rate())?;
        }
        writeln!(
            f,
            "Active symbol:     {}",
            self.active_symbol.as_deref().unwrap_or("none")
        )?;
        writeln!(f, "Unallocated pool:  {:.2}", self.available)?;
        writeln!(f)?;
        writeln!(f, "Per symbol:")?;
        for s in &self.symbols {
            writeln!(
                f,
                "  {:<12} {:<6} allocated {:>12.2}  position {:>14.8}  trades {}",
                s.symbol, s.state.to_string(), s.allocated, s.position, s.trades
            )?;
        }
        Ok(())
    }
}
