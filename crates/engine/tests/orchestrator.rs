use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use common::{
    Candle, EngineState, Error, HistoryBatch, Ledger, MarketFeed, PriceObserver, PriceSnapshot,
    PriceUpdate, Result, Signal, SymbolState, TradingConfig,
};
use engine::{HistorySettings, Orchestrator};
use paper::PaperLedger;
use strategy::{AnalyzerConfig, OpportunityAnalyzer, Strategy};

/// In-memory feed whose prices and history are set by the test.
#[derive(Default)]
struct ScriptedFeed {
    prices: Mutex<HashMap<String, f64>>,
    history: Mutex<HashMap<String, Vec<Candle>>>,
    observer: Mutex<Option<Arc<dyn PriceObserver>>>,
    subscribed: Mutex<Vec<String>>,
    fail_connect: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedFeed {
    fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().insert(symbol.to_string(), price);
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_price_update(&PriceUpdate {
                symbol: symbol.to_string(),
                data: PriceSnapshot {
                    price,
                    volume: 1.0,
                    low: price,
                    high: price,
                    timestamp: Utc::now(),
                },
            });
        }
    }
}

#[async_trait]
impl MarketFeed for ScriptedFeed {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection("scripted failure".into()));
        }
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        self.subscribed.lock().extend(symbols.iter().cloned());
        Ok(())
    }

    async fn fetch_history(
        &self,
        symbols: &[String],
        _interval_minutes: u32,
        _limit: usize,
    ) -> Result<HistoryBatch> {
        let history = self.history.lock();
        let mut batch = HistoryBatch::default();
        for symbol in symbols {
            match history.get(symbol) {
                Some(candles) => {
                    batch.candles.insert(symbol.clone(), candles.clone());
                }
                None => {
                    batch.failures.insert(symbol.clone(), "no data".into());
                }
            }
        }
        if batch.candles.is_empty() {
            return Err(Error::HistoryUnavailable(batch.failures.into_iter().collect()));
        }
        Ok(batch)
    }

    fn set_observer(&self, observer: Arc<dyn PriceObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.prices.lock().get(symbol).copied()
    }

    fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.history.lock().get(symbol).cloned().unwrap_or_default()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Emits whatever signal the test last set.
struct ScriptedStrategy {
    signal: Arc<Mutex<Signal>>,
    calls: Arc<AtomicUsize>,
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_signals(&self, prices: &[f64]) -> Vec<Signal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = vec![Signal::Hold; prices.len()];
        if let Some(last) = out.last_mut() {
            *last = *self.signal.lock();
        }
        out
    }
}

const SYMBOLS: [&str; 3] = ["BTC/USDT", "ETH/USDT", "SOL/USDT"];

struct Harness {
    feed: Arc<ScriptedFeed>,
    signal: Arc<Mutex<Signal>>,
    calls: Arc<AtomicUsize>,
    orchestrator: Orchestrator,
}

fn harness(config: TradingConfig) -> Harness {
    let feed = Arc::new(ScriptedFeed::default());
    let signal = Arc::new(Mutex::new(Signal::Hold));
    let calls = Arc::new(AtomicUsize::new(0));
    let ledgers: Vec<(String, Box<dyn Ledger>)> = SYMBOLS
        .iter()
        .map(|s| {
            let ledger: Box<dyn Ledger> = Box::new(PaperLedger::new(0.0).unwrap());
            (s.to_string(), ledger)
        })
        .collect();
    let orchestrator = Orchestrator::new(
        feed.clone(),
        Box::new(ScriptedStrategy {
            signal: signal.clone(),
            calls: calls.clone(),
        }),
        OpportunityAnalyzer::new(AnalyzerConfig::default()).unwrap(),
        ledgers,
        config,
        HistorySettings::default(),
    )
    .unwrap();
    Harness {
        feed,
        signal,
        calls,
        orchestrator,
    }
}

fn quick_config() -> TradingConfig {
    TradingConfig {
        initial_balance: 1_000.0,
        analysis_interval: Duration::from_secs(3600),
        trading_interval: Duration::from_secs(3600),
        allocation_fraction: 0.8,
        buy_fraction: 0.5,
        error_pause: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(1),
        ..TradingConfig::default()
    }
}

fn flat_history(price: f64, n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| Candle {
            timestamp: 1_700_000_000 + i as i64 * 300,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        })
        .collect()
}

fn falling_history(start: f64, n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let price = start - i as f64;
            Candle {
                timestamp: 1_700_000_000 + i as i64 * 300,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1.0,
            }
        })
        .collect()
}

#[tokio::test]
async fn start_selects_best_symbol_and_allocates() {
    let h = harness(quick_config());
    {
        let mut history = h.feed.history.lock();
        history.insert("BTC/USDT".into(), flat_history(100.0, 40));
        // A steady decline is oversold and scores highest.
        history.insert("ETH/USDT".into(), falling_history(200.0, 40));
        history.insert("SOL/USDT".into(), flat_history(50.0, 40));
    }

    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.state(), EngineState::Running);
    assert_eq!(h.orchestrator.active_symbol().await.as_deref(), Some("ETH/USDT"));
    assert_eq!(h.feed.subscribed.lock().len(), 3);

    let scores = h.orchestrator.scores();
    assert!(scores["ETH/USDT"] > scores["BTC/USDT"]);
    assert!((h.orchestrator.portfolio_value().await - 1_000.0).abs() < 1e-9);

    let summary = h.orchestrator.stop().await;
    assert_eq!(h.orchestrator.state(), EngineState::Stopped);
    assert!(h.feed.closed.load(Ordering::SeqCst));
    assert_eq!(summary.active_symbol.as_deref(), Some("ETH/USDT"));
    let eth = summary.symbols.iter().find(|s| s.symbol == "ETH/USDT").unwrap();
    assert_eq!(eth.state, SymbolState::Active);
    assert!((eth.allocated - 800.0).abs() < 1e-9);
    assert!((summary.available - 200.0).abs() < 1e-9);
}

#[tokio::test]
async fn start_survives_missing_history() {
    let h = harness(quick_config());
    h.orchestrator.start().await.unwrap();
    // All neutral: the first configured symbol wins the tie.
    assert_eq!(h.orchestrator.active_symbol().await.as_deref(), Some("BTC/USDT"));
    h.orchestrator.stop().await;
}

#[tokio::test]
async fn start_uses_whatever_history_loaded() {
    let h = harness(quick_config());
    h.feed
        .history
        .lock()
        .insert("ETH/USDT".into(), falling_history(200.0, 40));

    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.active_symbol().await.as_deref(), Some("ETH/USDT"));
    let scores = h.orchestrator.scores();
    assert_eq!(scores["BTC/USDT"], 50);
    assert_eq!(scores["SOL/USDT"], 50);
    h.orchestrator.stop().await;
}

#[tokio::test]
async fn start_surfaces_connection_failure() {
    let h = harness(quick_config());
    h.feed.fail_connect.store(true, Ordering::SeqCst);
    assert!(matches!(h.orchestrator.start().await, Err(Error::Connection(_))));
    assert_eq!(h.orchestrator.state(), EngineState::Stopped);

    // A summary is still produced.
    let summary = h.orchestrator.stop().await;
    assert_eq!(summary.stats.total_trades, 0);
    assert!((summary.final_value - 1_000.0).abs() < 1e-9);
}

#[tokio::test]
async fn trade_once_buys_when_flat_and_sells_whole_position() {
    let h = harness(quick_config());
    h.orchestrator.start().await.unwrap();
    h.orchestrator.switch_active_symbol("SOL/USDT").await.unwrap();

    // No price yet: nothing happens and the strategy is not consulted.
    assert_eq!(h.orchestrator.trade_once().await.unwrap(), None);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    h.feed.set_price("SOL/USDT", 100.0);
    *h.signal.lock() = Signal::Buy;
    assert_eq!(h.orchestrator.trade_once().await.unwrap(), Some(Signal::Buy));
    // Already holding: a second buy signal does not add to the lot.
    h.orchestrator.trade_once().await.unwrap();

    h.feed.set_price("SOL/USDT", 110.0);
    *h.signal.lock() = Signal::Sell;
    h.orchestrator.trade_once().await.unwrap();

    let summary = h.orchestrator.stop().await;
    assert_eq!(summary.stats.total_trades, 2);
    assert_eq!(summary.stats.profitable_trades, 1);
    let sol = summary.symbols.iter().find(|s| s.symbol == "SOL/USDT").unwrap();
    assert_eq!(sol.position, 0.0);
    assert_eq!(sol.trades, 2);
    // 800 allocated, half spent at 100 (4 units), sold at 110: +40.
    assert!((summary.stats.realized_pnl - 40.0).abs() < 1e-9);
    assert!((summary.final_value - 1_040.0).abs() < 1e-9);
}

#[tokio::test]
async fn switching_mid_session_liquidates_at_cached_price() {
    let h = harness(quick_config());
    h.orchestrator.start().await.unwrap();
    let first = h.orchestrator.active_symbol().await.unwrap();

    h.feed.set_price(&first, 10.0);
    *h.signal.lock() = Signal::Buy;
    h.orchestrator.trade_once().await.unwrap();
    h.feed.set_price(&first, 12.0);

    let target = SYMBOLS.iter().find(|s| **s != first).unwrap();
    let outcome = h.orchestrator.switch_active_symbol(target).await.unwrap();
    assert_eq!(outcome.liquidated.map(|(price, _)| price), Some(12.0));
    assert_eq!(h.orchestrator.active_symbol().await.as_deref(), Some(*target));

    // 1000 * 0.8 = 800, half bought at 10 (40 units) and sold at 12: +80.
    let summary = h.orchestrator.stop().await;
    assert!((summary.final_value - 1_080.0).abs() < 1e-9);
}

#[tokio::test]
async fn analysis_respects_hysteresis() {
    let h = harness(quick_config());
    h.orchestrator.start().await.unwrap();
    assert_eq!(h.orchestrator.active_symbol().await.as_deref(), Some("BTC/USDT"));

    // Flat BTC reads as overbought; ETH ends on a sharp drop below its band.
    for i in 0..40 {
        h.feed.set_price("BTC/USDT", 100.0);
        h.feed.set_price("ETH/USDT", if i < 39 { 300.0 } else { 250.0 });
    }
    let scores = h.orchestrator.scores();
    assert!(scores.is_empty() || scores.values().all(|s| *s == 50));
    let switched = h.orchestrator.analyze_once().await.unwrap();
    assert_eq!(switched.as_deref(), Some("ETH/USDT"));

    // Re-running with no new data never flips back.
    assert_eq!(h.orchestrator.analyze_once().await.unwrap(), None);
    h.orchestrator.stop().await;
}

#[tokio::test]
async fn loops_run_and_stop_promptly() {
    let config = TradingConfig {
        trading_interval: Duration::from_millis(10),
        analysis_interval: Duration::from_millis(20),
        ..quick_config()
    };
    let h = harness(config);
    h.orchestrator.start().await.unwrap();
    h.feed.set_price("BTC/USDT", 100.0);
    *h.signal.lock() = Signal::Buy;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.calls.load(Ordering::SeqCst) > 0);

    let started = std::time::Instant::now();
    let summary = tokio::time::timeout(Duration::from_secs(3), h.orchestrator.stop())
        .await
        .expect("stop should finish within the grace period");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.stats.total_trades, 1);
}
