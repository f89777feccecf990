use std::collections::HashMap;

use parking_lot::RwLock;

use common::{Candle, PriceSnapshot};

/// Bounded candle history for one symbol.
///
/// Timestamps are strictly ascending and unique. Upserting an existing
/// timestamp replaces that candle in place; overflow evicts the oldest.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    max_len: usize,
}

impl CandleSeries {
    pub fn new(max_len: usize) -> Self {
        Self {
            candles: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    pub fn upsert(&mut self, candle: Candle) {
        match self
            .candles
            .binary_search_by_key(&candle.timestamp, |c| c.timestamp)
        {
            Ok(i) => self.candles[i] = candle,
            Err(i) => {
                self.candles.insert(i, candle);
                if self.candles.len() > self.max_len {
                    let excess = self.candles.len() - self.max_len;
                    self.candles.drain(..excess);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }
}

/// Symbol-keyed price and candle store shared between the read loop and
/// readers. Every accessor hands out copies; the maps never leave the lock.
#[derive(Debug)]
pub struct MarketCache {
    max_candles: usize,
    prices: RwLock<HashMap<String, PriceSnapshot>>,
    candles: RwLock<HashMap<String, CandleSeries>>,
}

impl MarketCache {
    pub fn new(max_candles: usize) -> Self {
        Self {
            max_candles,
            prices: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
        }
    }

    /// Last write wins.
    pub fn upsert_price(&self, symbol: &str, snapshot: PriceSnapshot) {
        self.prices.write().insert(symbol.to_string(), snapshot);
    }

    pub fn price(&self, symbol: &str) -> Option<PriceSnapshot> {
        self.prices.read().get(symbol).copied()
    }

    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.price(symbol).map(|s| s.price)
    }

    pub fn all_prices(&self) -> HashMap<String, PriceSnapshot> {
        self.prices.read().clone()
    }

    pub fn upsert_candle(&self, symbol: &str, candle: Candle) {
        let mut candles = self.candles.write();
        candles
            .entry(symbol.to_string())
            .or_insert_with(|| CandleSeries::new(self.max_candles))
            .upsert(candle);
    }

    /// Merge a batch (e.g. history) into the symbol's series.
    pub fn upsert_candles(&self, symbol: &str, batch: &[Candle]) {
        let mut candles = self.candles.write();
        let series = candles
            .entry(symbol.to_string())
            .or_insert_with(|| CandleSeries::new(self.max_candles));
        for candle in batch {
            series.upsert(*candle);
        }
    }

    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.candles
            .read()
            .get(symbol)
            .map(|s| s.as_slice().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn same_timestamp_updates_in_place() {
        let mut series = CandleSeries::new(10);
        series.upsert(candle(60, 1.0));
        series.upsert(candle(60, 2.0));
        assert_eq!(series.len(), 1);
        assert_eq!(series.as_slice()[0].close, 2.0);
    }

    #[test]
    fn out_of_order_candles_stay_sorted() {
        let mut series = CandleSeries::new(10);
        for ts in [300, 60, 180, 120, 240] {
            series.upsert(candle(ts, ts as f64));
        }
        let stamps: Vec<i64> = series.as_slice().iter().map(|c| c.timestamp).collect();
        assert_eq!(stamps, vec![60, 120, 180, 240, 300]);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut series = CandleSeries::new(3);
        for ts in 1..=5 {
            series.upsert(candle(ts, ts as f64));
        }
        let stamps: Vec<i64> = series.as_slice().iter().map(|c| c.timestamp).collect();
        assert_eq!(stamps, vec![3, 4, 5]);
    }

    #[test]
    fn cache_returns_copies() {
        let cache = MarketCache::new(5);
        cache.upsert_candles("BTC/USDT", &[candle(1, 1.0), candle(2, 2.0)]);
        let mut copy = cache.candles("BTC/USDT");
        copy.clear();
        assert_eq!(cache.candles("BTC/USDT").len(), 2);
        assert!(cache.candles("ETH/USDT").is_empty());
    }

    #[test]
    fn price_is_last_write_wins() {
        let cache = MarketCache::new(5);
        let snap = |price| PriceSnapshot {
            price,
            volume: 1.0,
            low: price,
            high: price,
            timestamp: Utc::now(),
        };
        cache.upsert_price("BTC/USDT", snap(1.0));
        cache.upsert_price("BTC/USDT", snap(2.0));
        assert_eq!(cache.latest_price("BTC/USDT"), Some(2.0));
        assert_eq!(cache.all_prices().len(), 1);
        assert_eq!(cache.latest_price("ETH/USDT"), None);
    }
}
