use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Candle, PriceUpdate, Result};

/// Observer slot on the market feed.
///
/// Invoked synchronously from the feed's read loop, so implementations must
/// return quickly and must not block.
pub trait PriceObserver: Send + Sync {
    /// Called after every ticker message has been written to the price cache.
    fn on_price_update(&self, update: &PriceUpdate);

    /// Called after every OHLC message has been upserted into the candle store.
    fn on_candle(&self, _symbol: &str, _candle: &Candle) {}
}

/// Result of a multi-symbol historical fetch that at least partly succeeded.
#[derive(Debug, Clone, Default)]
pub struct HistoryBatch {
    /// Canonical symbol -> candles, oldest first.
    pub candles: HashMap<String, Vec<Candle>>,
    /// Canonical symbol -> failure reason.
    pub failures: HashMap<String, String>,
}

impl HistoryBatch {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Abstraction over the real-time market data source.
///
/// `KrakenClient` in `crates/engine` is the production implementation. The
/// orchestrator only talks to the market through this trait.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Establish (or confirm) the streaming connection.
    async fn connect(&self) -> Result<()>;

    /// Subscribe canonical symbols. Already-subscribed symbols are skipped.
    async fn subscribe(&self, symbols: &[String]) -> Result<()>;

    /// Fetch candle history for every symbol and seed the candle store.
    /// Fails only when every symbol failed.
    async fn fetch_history(
        &self,
        symbols: &[String],
        interval_minutes: u32,
        limit: usize,
    ) -> Result<HistoryBatch>;

    /// Replace the registered observer.
    fn set_observer(&self, observer: Arc<dyn PriceObserver>);

    /// Latest cached trade price.
    fn latest_price(&self, symbol: &str) -> Option<f64>;

    /// Copy of the cached candle series, oldest first.
    fn candles(&self, symbol: &str) -> Vec<Candle>;

    /// Stop the read loop and close the connection.
    async fn close(&self);
}
