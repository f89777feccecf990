use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{
    EngineState, Error, Ledger, MarketFeed, PriceObserver, PriceUpdate, Result, Signal,
    TradingConfig,
};
use strategy::{select_switch, OpportunityAnalyzer, Strategy};

use crate::portfolio::{Portfolio, SessionSummary, SwitchOutcome};

/// Where the orchestrator pulls history from and how much of it.
#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub interval_minutes: u32,
    pub limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            limit: 200,
        }
    }
}

/// Forwards ticker updates for monitored symbols into the analyzer window.
struct AnalyzerFeed {
    analyzer: Arc<Mutex<OpportunityAnalyzer>>,
    symbols: Vec<String>,
}

impl PriceObserver for AnalyzerFeed {
    fn on_price_update(&self, update: &PriceUpdate) {
        if !self.symbols.iter().any(|s| s == &update.symbol) {
            return;
        }
        if let Err(e) = self
            .analyzer
            .lock()
            .update(&update.symbol, update.data.price, update.data.volume)
        {
            debug!(symbol = %update.symbol, error = %e, "Ticker rejected by analyzer");
        }
    }
}

struct Shared {
    feed: Arc<dyn MarketFeed>,
    strategy: Box<dyn Strategy>,
    analyzer: Arc<Mutex<OpportunityAnalyzer>>,
    /// Switches and trade iterations both run under this lock, and neither
    /// awaits while holding it.
    portfolio: tokio::sync::Mutex<Portfolio>,
    symbols: Vec<String>,
    config: TradingConfig,
    history: HistorySettings,
    state: RwLock<EngineState>,
}

/// Multi-symbol paper-trading orchestrator.
///
/// Owns the capital allocation and runs two loops: periodic opportunity
/// analysis (which may switch the active symbol) and frequent trading on the
/// active symbol.
pub struct Orchestrator {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// `ledgers` must hold one empty ledger per monitored symbol.
    pub fn new(
        feed: Arc<dyn MarketFeed>,
        strategy: Box<dyn Strategy>,
        mut analyzer: OpportunityAnalyzer,
        ledgers: Vec<(String, Box<dyn Ledger>)>,
        config: TradingConfig,
        history: HistorySettings,
    ) -> Result<Self> {
        if !(config.allocation_fraction > 0.0 && config.allocation_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "allocation fraction must be in (0, 1], got {}",
                config.allocation_fraction
            )));
        }
        let portfolio = Portfolio::new(config.initial_balance, ledgers)?;
        let symbols = portfolio.symbols().to_vec();
        if symbols.is_empty() {
            return Err(Error::Config("no symbols to trade".into()));
        }
        for symbol in &symbols {
            analyzer.track(symbol);
        }

        info!(
            symbols = ?symbols,
            strategy = %strategy.name(),
            capital = config.initial_balance,
            "Orchestrator initialized"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                feed,
                strategy,
                analyzer: Arc::new(Mutex::new(analyzer)),
                portfolio: tokio::sync::Mutex::new(portfolio),
                symbols,
                config,
                history,
                state: RwLock::new(EngineState::Stopped),
            }),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.read()
    }

    pub async fn active_symbol(&self) -> Option<String> {
        self.shared.portfolio.lock().await.active().map(str::to_string)
    }

    /// Scores from the most recent analysis.
    pub fn scores(&self) -> HashMap<String, u8> {
        self.shared.analyzer.lock().scores()
    }

    /// Pool + allocations + positions marked at the cached price.
    pub async fn portfolio_value(&self) -> f64 {
        let feed = Arc::clone(&self.shared.feed);
        self.shared
            .portfolio
            .lock()
            .await
            .total_value(|s| feed.latest_price(s))
    }

    /// Connect, subscribe, seed history, pick the initial symbol and spawn
    /// both loops.
    pub async fn start(&self) -> Result<()> {
        if self.state() == EngineState::Running {
            info!("Orchestrator already running");
            return Ok(());
        }
        let shared = &self.shared;

        shared.feed.set_observer(Arc::new(AnalyzerFeed {
            analyzer: Arc::clone(&shared.analyzer),
            symbols: shared.symbols.clone(),
        }));

        shared.feed.connect().await?;
        shared.feed.subscribe(&shared.symbols).await?;

        match shared
            .feed
            .fetch_history(&shared.symbols, shared.history.interval_minutes, shared.history.limit)
            .await
        {
            Ok(batch) => {
                if batch.is_partial() {
                    for (symbol, reason) in &batch.failures {
                        warn!(symbol = %symbol, reason = %reason, "No history for symbol");
                    }
                    warn!(
                        loaded = batch.candles.len(),
                        failed = batch.failures.len(),
                        "History only partially loaded"
                    );
                }
                let mut analyzer = shared.analyzer.lock();
                for (symbol, candles) in &batch.candles {
                    analyzer.load_history(symbol, candles);
                }
            }
            Err(e) => warn!(error = %e, "History unavailable, starting on live data only"),
        }

        let ranked = shared.rank();
        match select_switch(None, &ranked, shared.config.hysteresis_margin) {
            Some(best) => {
                info!(symbol = %best, "Selecting initial symbol");
                shared.switch_to(&best).await?;
            }
            None => warn!("No symbol could be ranked, waiting for the analysis loop"),
        }

        let analysis = tokio::spawn(analysis_loop(Arc::clone(shared), self.cancel.child_token()));
        let trading = tokio::spawn(trading_loop(Arc::clone(shared), self.cancel.child_token()));
        self.tasks.lock().extend([analysis, trading]);

        *shared.state.write() = EngineState::Running;
        info!(symbols = ?shared.symbols, "Orchestrator started");
        Ok(())
    }

    /// Cancel both loops, wait for them within the shutdown grace, close the
    /// feed and report. Always returns a summary.
    pub async fn stop(&self) -> SessionSummary {
        info!("Stopping orchestrator");
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let deadline = Instant::now() + self.shared.config.shutdown_grace;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Loop exited abnormally"),
                Err(_) => {
                    warn!("Loop did not stop within the grace period, aborting");
                    handle.abort();
                }
            }
        }

        self.shared.feed.close().await;
        *self.shared.state.write() = EngineState::Stopped;

        let feed = Arc::clone(&self.shared.feed);
        let summary = self
            .shared
            .portfolio
            .lock()
            .await
            .summary(|s| feed.latest_price(s));
        info!(
            initial = summary.initial_capital,
            final_value = summary.final_value,
            pnl = summary.pnl,
            trades = summary.stats.total_trades,
            win_rate = summary.stats.win_rate(),
            "Session finished"
        );
        summary
    }

    /// Switch now, liquidating the current symbol at its cached price.
    pub async fn switch_active_symbol(&self, symbol: &str) -> Result<SwitchOutcome> {
        self.shared.switch_to(symbol).await
    }

    /// One analysis pass. Returns the new active symbol if a switch happened.
    pub async fn analyze_once(&self) -> Result<Option<String>> {
        self.shared.analyze_once().await
    }

    /// One trading pass on the active symbol.
    pub async fn trade_once(&self) -> Result<Option<Signal>> {
        self.shared.trade_once().await
    }
}

impl Shared {
    fn rank(&self) -> Vec<(String, u8)> {
        let mut analyzer = self.analyzer.lock();
        analyzer.calculate_scores();
        let ranked = analyzer.ranked();
        let top: Vec<String> = ranked
            .iter()
            .take(3)
            .map(|(s, score)| format!("{s}={score}"))
            .collect();
        info!(top = ?top, "Opportunity scores");
        ranked
    }

    async fn switch_to(&self, symbol: &str) -> Result<SwitchOutcome> {
        let mut portfolio = self.portfolio.lock().await;
        let price = portfolio.active().and_then(|old| self.feed.latest_price(old));
        portfolio.switch_active_symbol(symbol, price, self.config.allocation_fraction)
    }

    async fn analyze_once(&self) -> Result<Option<String>> {
        let ranked = self.rank();
        let mut portfolio = self.portfolio.lock().await;
        let Some(target) = select_switch(portfolio.active(), &ranked, self.config.hysteresis_margin)
        else {
            return Ok(None);
        };
        let price = portfolio.active().and_then(|old| self.feed.latest_price(old));
        portfolio.switch_active_symbol(&target, price, self.config.allocation_fraction)?;
        Ok(Some(target))
    }

    async fn trade_once(&self) -> Result<Option<Signal>> {
        let mut portfolio = self.portfolio.lock().await;
        let Some(symbol) = portfolio.active().map(str::to_string) else {
            debug!("No active symbol yet");
            return Ok(None);
        };
        let allocated = portfolio.allocated(&symbol);
        let position = portfolio.position(&symbol);
        if allocated <= 0.0 && position <= 0.0 {
            debug!(symbol = %symbol, "Active symbol has no allocation");
            return Ok(None);
        }
        let Some(price) = self.feed.latest_price(&symbol).filter(|p| *p > 0.0) else {
            debug!(symbol = %symbol, "No price yet");
            return Ok(None);
        };

        let mut prices: Vec<f64> = self.feed.candles(&symbol).iter().map(|c| c.close).collect();
        if prices.last() != Some(&price) {
            prices.push(price);
        }
        let signal = self.strategy.latest_signal(&prices);

        match signal {
            Signal::Buy if position <= 0.0 => {
                let volume = allocated * self.config.buy_fraction / price;
                if volume < self.config.min_trade_volume {
                    debug!(symbol = %symbol, volume, "Buy below minimum volume, skipped");
                } else if portfolio.execute_buy(&symbol, price, volume)? {
                    info!(symbol = %symbol, price, volume, "Bought");
                }
            }
            Signal::Sell if position > 0.0 => {
                if portfolio.execute_sell(&symbol, price, position)? {
                    info!(symbol = %symbol, price, volume = position, "Sold");
                }
            }
            _ => {}
        }
        Ok(Some(signal))
    }
}

async fn analysis_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.analysis_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period = ?period, "Analysis loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match shared.analyze_once().await {
            Ok(Some(symbol)) => info!(symbol = %symbol, "Analysis switched active symbol"),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Analysis iteration failed");
                if pause(&cancel, shared.config.error_pause).await {
                    break;
                }
            }
        }
    }
    info!("Analysis loop stopped");
}

async fn trading_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.trading_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period = ?period, "Trading loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = shared.trade_once().await {
            warn!(error = %e, "Trading iteration failed");
            if pause(&cancel, shared.config.error_pause).await {
                break;
            }
        }
    }
    info!("Trading loop stopped");
}

/// Sleep unless cancelled first. Returns true on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
