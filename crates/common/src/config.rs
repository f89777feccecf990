use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Kraken's accepted candle intervals, in minutes.
pub const SUPPORTED_INTERVALS: &[u32] = &[1, 5, 15, 30, 60, 240, 1440, 10080, 21600];

const DEFAULT_INTERVAL: u32 = 5;

/// Unsupported intervals fall back to 5 minutes.
pub fn normalize_interval(minutes: u32) -> u32 {
    if SUPPORTED_INTERVALS.contains(&minutes) {
        minutes
    } else {
        DEFAULT_INTERVAL
    }
}

/// Settings for the streaming client and the historical REST fetch.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub rest_url: String,
    /// Interval for the `ohlc` channel and history. `None` streams ticker only.
    pub ohlc_interval: Option<u32>,
    pub history_limit: usize,
    /// Bound on each symbol's candle series.
    pub max_candles: usize,
    pub max_reconnect_attempts: u32,
    /// Backoff wait is `backoff_base ^ attempt` seconds.
    pub backoff_base: f64,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
    pub ping_timeout: Duration,
    pub http_timeout: Duration,
    /// Pause after a transient read error.
    pub read_error_pause: Duration,
    /// How long `close()` waits for the read loop.
    pub close_grace: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.kraken.com".to_string(),
            rest_url: "https://api.kraken.com/0/public".to_string(),
            ohlc_interval: Some(DEFAULT_INTERVAL),
            history_limit: 200,
            max_candles: 500,
            max_reconnect_attempts: 5,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_millis(5_000),
            http_timeout: Duration::from_secs(10),
            read_error_pause: Duration::from_secs(1),
            close_grace: Duration::from_millis(500),
        }
    }
}

impl FeedConfig {
    /// Backoff wait before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.powi(exponent);
        if !secs.is_finite() || secs < 0.0 {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

/// Settings for the orchestrator loops and capital allocation.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub initial_balance: f64,
    pub analysis_interval: Duration,
    pub trading_interval: Duration,
    /// Minimum score advantage before switching away from the active symbol.
    pub hysteresis_margin: u8,
    /// Share of the available pool given to a newly active symbol.
    pub allocation_fraction: f64,
    /// Share of the active allocation spent on one buy.
    pub buy_fraction: f64,
    pub min_trade_volume: f64,
    /// Pause after a failed loop iteration.
    pub error_pause: Duration,
    pub shutdown_grace: Duration,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            analysis_interval: Duration::from_secs(300),
            trading_interval: Duration::from_secs(1),
            hysteresis_margin: 10,
            allocation_fraction: 0.8,
            buy_fraction: 0.95,
            min_trade_volume: 0.0001,
            error_pause: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// All configuration loaded from environment variables at startup.
/// Every variable is optional; malformed values are reported as
/// `Error::Config`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical pairs to monitor.
    pub symbols: Vec<String>,
    pub feed: FeedConfig,
    pub trading: TradingConfig,
    /// Optional TOML file with strategy and analyzer settings.
    pub strategy_config_path: Option<String>,
}

impl Config {
    /// Load configuration from the environment. Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let feed_defaults = FeedConfig::default();
        let trading_defaults = TradingConfig::default();

        let symbols: Vec<String> = optional_env("SYMBOLS")
            .unwrap_or_else(|| "BTC/USDT,ETH/USDT,SOL/USDT".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(Error::Config("SYMBOLS must list at least one pair".into()));
        }

        let interval: u32 = parse_env("OHLC_INTERVAL", DEFAULT_INTERVAL)?;

        let feed = FeedConfig {
            ws_url: optional_env("KRAKEN_WS_URL").unwrap_or(feed_defaults.ws_url),
            rest_url: optional_env("KRAKEN_REST_URL").unwrap_or(feed_defaults.rest_url),
            ohlc_interval: Some(normalize_interval(interval)),
            history_limit: parse_env("HISTORY_LIMIT", feed_defaults.history_limit)?,
            max_candles: parse_env("MAX_CANDLES", feed_defaults.max_candles)?,
            max_reconnect_attempts: parse_env(
                "MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            )?,
            backoff_base: parse_env("BACKOFF_BASE_SECS", feed_defaults.backoff_base)?,
            max_backoff: Duration::from_secs(parse_env(
                "MAX_BACKOFF_SECS",
                feed_defaults.max_backoff.as_secs(),
            )?),
            ping_timeout: Duration::from_millis(parse_env(
                "PING_TIMEOUT_MS",
                feed_defaults.ping_timeout.as_millis() as u64,
            )?),
            http_timeout: Duration::from_secs(parse_env(
                "HTTP_TIMEOUT_SECS",
                feed_defaults.http_timeout.as_secs(),
            )?),
            ..feed_defaults
        };

        let trading = TradingConfig {
            initial_balance: parse_env("INITIAL_BALANCE", trading_defaults.initial_balance)?,
            analysis_interval: Duration::from_secs(parse_env(
                "ANALYSIS_INTERVAL_SECS",
                trading_defaults.analysis_interval.as_secs(),
            )?),
            trading_interval: Duration::from_secs(parse_env(
                "TRADING_INTERVAL_SECS",
                trading_defaults.trading_interval.as_secs(),
            )?),
            hysteresis_margin: parse_env("HYSTERESIS_MARGIN", trading_defaults.hysteresis_margin)?,
            allocation_fraction: parse_env(
                "ALLOCATION_FRACTION",
                trading_defaults.allocation_fraction,
            )?,
            buy_fraction: parse_env("BUY_FRACTION", trading_defaults.buy_fraction)?,
            min_trade_volume: parse_env("MIN_TRADE_VOLUME", trading_defaults.min_trade_volume)?,
            shutdown_grace: Duration::from_secs(parse_env(
                "SHUTDOWN_GRACE_SECS",
                trading_defaults.shutdown_grace.as_secs(),
            )?),
            ..trading_defaults
        };

        let cfg = Config {
            symbols,
            feed,
            trading,
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Range checks that `from_env` cannot express through parsing alone.
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if !(t.initial_balance.is_finite() && t.initial_balance > 0.0) {
            return Err(Error::Config("INITIAL_BALANCE must be positive".into()));
        }
        if !(t.allocation_fraction > 0.0 && t.allocation_fraction <= 1.0) {
            return Err(Error::Config("ALLOCATION_FRACTION must be in (0, 1]".into()));
        }
        if !(t.buy_fraction > 0.0 && t.buy_fraction <= 1.0) {
            return Err(Error::Config("BUY_FRACTION must be in (0, 1]".into()));
        }
        if t.trading_interval.is_zero() || t.analysis_interval.is_zero() {
            return Err(Error::Config("loop intervals must be non-zero".into()));
        }
        if self.feed.max_reconnect_attempts == 0 {
            return Err(Error::Config("MAX_RECONNECT_ATTEMPTS must be at least 1".into()));
        }
        if !(self.feed.backoff_base.is_finite() && self.feed.backoff_base > 0.0) {
            return Err(Error::Config("BACKOFF_BASE_SECS must be positive".into()));
        }
        Ok(())
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}='{raw}' is invalid: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_interval_falls_back_to_five_minutes() {
        assert_eq!(normalize_interval(15), 15);
        assert_eq!(normalize_interval(7), 5);
        assert_eq!(normalize_interval(0), 5);
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let cfg = FeedConfig {
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(10),
            ..FeedConfig::default()
        };
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(2));
        assert_eq!(cfg.backoff_for(3), Duration::from_secs(8));
        assert_eq!(cfg.backoff_for(4), Duration::from_secs(10));
        assert_eq!(cfg.backoff_for(40), Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_out_of_range_fractions() {
        let mut cfg = Config {
            symbols: vec!["BTC/USDT".into()],
            feed: FeedConfig::default(),
            trading: TradingConfig::default(),
            strategy_config_path: None,
        };
        assert!(cfg.validate().is_ok());

        cfg.trading.allocation_fraction = 1.5;
        assert!(cfg.validate().is_err());

        cfg.trading.allocation_fraction = 0.7;
        cfg.trading.initial_balance = 0.0;
        assert!(cfg.validate().is_err());
    }
}
