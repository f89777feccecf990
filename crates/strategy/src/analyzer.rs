use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Candle, Error, Result};

use crate::indicators::{BollingerBands, MacdIndicator, RsiIndicator};

/// Score reported for symbols without enough history.
pub const NEUTRAL_SCORE: u8 = 50;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Number of (price, volume) points kept per symbol.
    pub lookback_window: usize,
    /// Below this many points a symbol scores neutral.
    pub min_data_points: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            lookback_window: 100,
            min_data_points: 10,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        let ok = self.lookback_window >= self.min_data_points
            && self.min_data_points >= 2
            && self.rsi_period >= 2
            && self.bb_period >= 2
            && self.macd_fast >= 1
            && self.macd_signal >= 1
            && self.macd_fast < self.macd_slow
            && self.rsi_oversold < self.rsi_overbought;
        if ok {
            Ok(())
        } else {
            Err(Error::Config(format!("invalid analyzer settings: {self:?}")))
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
}

impl Window {
    fn push(&mut self, price: f64, volume: f64, cap: usize) {
        self.prices.push_back(price);
        self.volumes.push_back(volume);
        while self.prices.len() > cap {
            self.prices.pop_front();
            self.volumes.pop_front();
        }
    }
}

/// Ranks monitored symbols by a 0-100 opportunity score built from RSI,
/// MACD, Bollinger position and volume spikes over a rolling window.
pub struct OpportunityAnalyzer {
    config: AnalyzerConfig,
    rsi: RsiIndicator,
    macd: MacdIndicator,
    bands: BollingerBands,
    /// First-seen order, used to break ranking ties.
    order: Vec<String>,
    windows: HashMap<String, Window>,
    scores: HashMap<String, u8>,
}

impl OpportunityAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rsi: RsiIndicator::new(config.rsi_period, config.rsi_overbought, config.rsi_oversold),
            macd: MacdIndicator::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bands: BollingerBands::new(config.bb_period, config.bb_std),
            config,
            order: Vec::new(),
            windows: HashMap::new(),
            scores: HashMap::new(),
        })
    }

    /// Register a symbol up front so it ranks (neutral) before any data arrives.
    pub fn track(&mut self, symbol: &str) {
        self.window_mut(symbol);
    }

    /// Append one observation to the symbol's rolling window.
    pub fn update(&mut self, symbol: &str, price: f64, volume: f64) -> Result<()> {
        if !(price.is_finite() && price > 0.0) || !(volume.is_finite() && volume >= 0.0) {
            return Err(Error::Validation(format!(
                "invalid observation for {symbol}: price={price}, volume={volume}"
            )));
        }
        let cap = self.config.lookback_window;
        self.window_mut(symbol).push(price, volume, cap);
        Ok(())
    }

    /// Seed a symbol's window from historical candles (oldest first).
    /// Candles with unusable values are skipped.
    pub fn load_history(&mut self, symbol: &str, candles: &[Candle]) {
        let mut loaded = 0usize;
        for candle in candles {
            if self.update(symbol, candle.close, candle.volume).is_ok() {
                loaded += 1;
            }
        }
        debug!(symbol, loaded, "Analyzer seeded from history");
    }

    pub fn data_points(&self, symbol: &str) -> usize {
        self.windows.get(symbol).map(|w| w.prices.len()).unwrap_or(0)
    }

    /// Recompute every tracked symbol's score.
    pub fn calculate_scores(&mut self) -> HashMap<String, u8> {
        let scores: HashMap<String, u8> = self
            .order
            .iter()
            .map(|symbol| {
                let score = self
                    .windows
                    .get(symbol)
                    .map(|w| self.score_window(w))
                    .unwrap_or(NEUTRAL_SCORE);
                (symbol.clone(), score)
            })
            .collect();
        self.scores = scores.clone();
        scores
    }

    /// Last computed scores, best first. Ties keep first-seen order.
    pub fn ranked(&self) -> Vec<(String, u8)> {
        let mut ranked: Vec<(String, u8)> = self
            .order
            .iter()
            .filter_map(|s| self.scores.get(s).map(|score| (s.clone(), *score)))
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub fn score(&self, symbol: &str) -> Option<u8> {
        self.scores.get(symbol).copied()
    }

    pub fn scores(&self) -> HashMap<String, u8> {
        self.scores.clone()
    }

    fn window_mut(&mut self, symbol: &str) -> &mut Window {
        if !self.windows.contains_key(symbol) {
            self.order.push(symbol.to_string());
        }
        self.windows.entry(symbol.to_string()).or_default()
    }

    fn score_window(&self, window: &Window) -> u8 {
        if window.prices.len() < self.config.min_data_points {
            return NEUTRAL_SCORE;
        }
        let prices: Vec<f64> = window.prices.iter().copied().collect();
        let volumes: Vec<f64> = window.volumes.iter().copied().collect();
        let Some(&price) = prices.last() else {
            return NEUTRAL_SCORE;
        };

        let mut score = NEUTRAL_SCORE as f64;

        if let Some(rsi) = self.rsi.compute(&prices) {
            if rsi < self.rsi.oversold {
                score += self.rsi.oversold - rsi;
            } else if rsi > self.rsi.overbought {
                score -= rsi - self.rsi.overbought;
            }
        }

        let macd = self.macd.series(&prices);
        if let Some((m, s)) = macd.latest() {
            let strength = ((m - s).abs() / price * 10_000.0).min(20.0);
            if m > s {
                score += strength;
                if rising_positive_histogram(&macd.histogram) {
                    score += 20.0;
                }
            } else if m < s {
                score -= strength;
            }
        }

        if let Some(band) = self.bands.compute(&prices) {
            if price < band.lower && band.lower > 0.0 {
                score += ((band.lower - price) / band.lower * 100.0).min(30.0);
            } else if price > band.upper && band.upper > 0.0 {
                score -= ((price - band.upper) / band.upper * 100.0).min(30.0);
            }
        }

        if volumes.len() > 5 {
            let earlier = &volumes[..volumes.len() - 5];
            let average = earlier.iter().sum::<f64>() / earlier.len() as f64;
            let current = volumes[volumes.len() - 1];
            if average > 0.0 && current > average * 1.5 {
                score += ((current / average - 1.0) * 10.0).min(10.0);
            }
        }

        if !score.is_finite() {
            return NEUTRAL_SCORE;
        }
        score.trunc().clamp(0.0, 100.0) as u8
    }
}

fn rising_positive_histogram(histogram: &[Option<f64>]) -> bool {
    let n = histogram.len();
    if n < 3 {
        return false;
    }
    match (histogram[n - 3], histogram[n - 2], histogram[n - 1]) {
        (Some(a), Some(b), Some(c)) => c > 0.0 && c > b && b > a,
        _ => false,
    }
}

/// Hysteresis decision: which symbol, if any, should become active.
///
/// With nothing active the best candidate is adopted. Otherwise a switch
/// happens only when the best candidate beats the active symbol's score by
/// strictly more than `margin`. An active symbol missing from `ranked` is
/// replaced by the best candidate.
pub fn select_switch(active: Option<&str>, ranked: &[(String, u8)], margin: u8) -> Option<String> {
    let (best, best_score) = ranked.first()?;
    let Some(active) = active else {
        return Some(best.clone());
    };
    if best == active {
        return None;
    }
    match ranked.iter().find(|(s, _)| s == active) {
        None => Some(best.clone()),
        Some((_, current)) if u16::from(*best_score) > u16::from(*current) + u16::from(margin) => {
            Some(best.clone())
        }
        Some(_) => None,
    }
}
