use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::symbol::{is_stablecoin_base, validate_symbol};
use common::{Config, Ledger};
use engine::{HistorySettings, KrakenClient, Orchestrator};
use paper::PaperLedger;
use strategy::{build_strategy, OpportunityAnalyzer, StrategyFileConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid configuration")?;
    info!(symbols = ?cfg.symbols, capital = cfg.trading.initial_balance, "CoinSwitch starting");

    let mut symbols: Vec<String> = Vec::new();
    for symbol in &cfg.symbols {
        if let Err(e) = validate_symbol(symbol) {
            warn!(symbol = %symbol, error = %e, "Skipping symbol");
        } else if is_stablecoin_base(symbol) {
            warn!(symbol = %symbol, "Skipping stablecoin pair");
        } else if !symbols.contains(symbol) {
            symbols.push(symbol.clone());
        }
    }
    anyhow::ensure!(!symbols.is_empty(), "no tradable symbols configured");

    // ── Strategy + analyzer ───────────────────────────────────────────────────
    let strategy_file = match &cfg.strategy_config_path {
        Some(path) => StrategyFileConfig::load(path)
            .with_context(|| format!("failed to load strategy config {path}"))?,
        None => StrategyFileConfig::default(),
    };
    let strategy = build_strategy(&strategy_file.strategy)?;
    let analyzer = OpportunityAnalyzer::new(strategy_file.analyzer.clone())?;

    // ── Market feed ───────────────────────────────────────────────────────────
    let history = HistorySettings {
        interval_minutes: cfg.feed.ohlc_interval.unwrap_or(5),
        limit: cfg.feed.history_limit,
    };
    let feed = Arc::new(KrakenClient::new(cfg.feed.clone())?);

    // ── Paper ledgers, one per symbol ─────────────────────────────────────────
    let mut ledgers: Vec<(String, Box<dyn Ledger>)> = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        ledgers.push((symbol.clone(), Box::new(PaperLedger::new(0.0)?)));
    }

    let orchestrator = Orchestrator::new(
        feed,
        strategy,
        analyzer,
        ledgers,
        cfg.trading.clone(),
        history,
    )?;

    // ── Run until Ctrl-C ──────────────────────────────────────────────────────
    if let Err(e) = orchestrator.start().await {
        let summary = orchestrator.stop().await;
        println!("{summary}");
        return Err(e).context("failed to start");
    }

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");

    let summary = orchestrator.stop().await;
    println!("{summary}");
    Ok(())
}
