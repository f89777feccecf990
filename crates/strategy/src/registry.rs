use std::collections::HashMap;

use tracing::info;

use common::{Error, Result, Signal};

use crate::config::StrategyConfig;
use crate::indicators::{BollingerBands, MacdIndicator, RsiIndicator};
use crate::Strategy;

// ─── Strategy builders ────────────────────────────────────────────────────────

/// Build the configured strategy, rejecting unknown types.
pub fn build_strategy(cfg: &StrategyConfig) -> Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match cfg.strategy_type.as_str() {
        "indicator" => {
            let rsi_period = param_usize(&cfg.params, "rsi_period", 5);
            let fast = param_usize(&cfg.params, "macd_fast", 3);
            let slow = param_usize(&cfg.params, "macd_slow", 6);
            let signal = param_usize(&cfg.params, "macd_signal", 2);
            let bb_period = param_usize(&cfg.params, "bb_period", 5);
            let bb_std = param_f64(&cfg.params, "bb_std", 2.0);
            check(rsi_period >= 2 && bb_period >= 2, "periods must be >= 2")?;
            check(fast >= 1 && signal >= 1 && fast < slow, "MACD needs 1 <= fast < slow")?;
            Box::new(IndicatorStrategy::new(
                cfg.name.clone(),
                RsiIndicator::new(
                    rsi_period,
                    param_f64(&cfg.params, "overbought", 70.0),
                    param_f64(&cfg.params, "oversold", 30.0),
                ),
                MacdIndicator::new(fast, slow, signal),
                BollingerBands::new(bb_period, bb_std),
            ))
        }
        "momentum" => {
            let rsi_period = param_usize(&cfg.params, "rsi_period", 14);
            let short = param_usize(&cfg.params, "short_ma", 3);
            let long = param_usize(&cfg.params, "long_ma", 8);
            check(rsi_period >= 2, "rsi_period must be >= 2")?;
            check(short >= 1 && short < long, "moving averages need 1 <= short < long")?;
            Box::new(MomentumStrategy {
                name: cfg.name.clone(),
                rsi: RsiIndicator::new(
                    rsi_period,
                    param_f64(&cfg.params, "overbought", 65.0),
                    param_f64(&cfg.params, "oversold", 35.0),
                ),
                short_ma: short,
                long_ma: long,
                min_prices: param_usize(&cfg.params, "min_prices", 14),
            })
        }
        other => {
            return Err(Error::Config(format!("unknown strategy type '{other}'")));
        }
    };
    info!(name = %strategy.name(), kind = %cfg.strategy_type, "Built strategy");
    Ok(strategy)
}

fn check(ok: bool, msg: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid strategy params: {msg}")))
    }
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

// ─── Concrete strategy types ──────────────────────────────────────────────────

/// Confluence of RSI extremes, MACD side and a Bollinger band touch.
pub struct IndicatorStrategy {
    name: String,
    rsi: RsiIndicator,
    macd: MacdIndicator,
    bands: BollingerBands,
}

impl IndicatorStrategy {
    pub fn new(name: String, rsi: RsiIndicator, macd: MacdIndicator, bands: BollingerBands) -> Self {
        Self { name, rsi, macd, bands }
    }

    fn warmup(&self) -> usize {
        self.rsi.period.max(self.macd.warmup()).max(self.bands.period)
    }
}

impl Default for IndicatorStrategy {
    fn default() -> Self {
        Self::new(
            "RSI/MACD/Bollinger confluence".to_string(),
            RsiIndicator::new(5, 70.0, 30.0),
            MacdIndicator::new(3, 6, 2),
            BollingerBands::new(5, 2.0),
        )
    }
}

impl Strategy for IndicatorStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signals(&self, prices: &[f64]) -> Vec<Signal> {
        let rsi = self.rsi.series(prices);
        let macd = self.macd.series(prices);
        let bands = self.bands.series(prices);

        (0..prices.len())
            .map(|i| {
                if i < self.warmup() {
                    return Signal::Hold;
                }
                let (Some(r), Some(m), Some(s), Some(band)) =
                    (rsi[i], macd.macd[i], macd.signal[i], bands[i])
                else {
                    return Signal::Hold;
                };
                let price = prices[i];
                if r < self.rsi.oversold && m > s && price <= band.lower {
                    Signal::Buy
                } else if r > self.rsi.overbought && m < s && price >= band.upper {
                    Signal::Sell
                } else {
                    Signal::Hold
                }
            })
            .collect()
    }
}

/// RSI with a short/long moving-average trend filter.
pub struct MomentumStrategy {
    name: String,
    rsi: RsiIndicator,
    short_ma: usize,
    long_ma: usize,
    min_prices: usize,
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signals(&self, prices: &[f64]) -> Vec<Signal> {
        let rsi = self.rsi.series(prices);
        let mean = |window: &[f64]| window.iter().sum::<f64>() / window.len() as f64;

        (0..prices.len())
            .map(|i| {
                let seen = i + 1;
                if seen < self.min_prices.max(self.long_ma) {
                    return Signal::Hold;
                }
                let Some(r) = rsi[i] else {
                    return Signal::Hold;
                };
                let short = mean(&prices[seen - self.short_ma..seen]);
                let long = mean(&prices[seen - self.long_ma..seen]);

                if r < self.rsi.oversold || (short > long && r < self.rsi.overbought) {
                    Signal::Buy
                } else if r > self.rsi.overbought || (short < long && r > self.rsi.oversold) {
                    Signal::Sell
                } else {
                    Signal::Hold
                }
            })
            .collect()
    }
}
