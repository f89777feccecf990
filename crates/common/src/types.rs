use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest ticker state for one symbol. Overwritten on every ticker message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: f64,
    /// Rolling 24h volume.
    pub volume: f64,
    pub low: f64,
    pub high: f64,
    pub timestamp: DateTime<Utc>,
}

/// Payload handed to the registered price observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Canonical symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    pub data: PriceSnapshot,
}

/// One OHLCV bucket. `timestamp` is the bucket start in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Immutable record of an executed paper trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    /// `price * volume`: cost for buys, proceeds for sells.
    pub value: f64,
    /// Realized P&L against the weighted-average entry. `None` for buys.
    pub realized_pnl: Option<f64>,
    /// Cash balance of the ledger after the trade.
    pub balance_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// Strategy output for one price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Signal {
    Buy,
    Sell,
    #[default]
    Hold,
}

/// Streaming connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Connection state plus the consecutive failed-attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempts: u32,
}

/// Allocation state of a monitored symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SymbolState {
    /// Zero allocation.
    #[default]
    Idle,
    /// Holds the allocation; at most one symbol at a time.
    Active,
}

impl std::fmt::Display for SymbolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolState::Idle => write!(f, "idle"),
            SymbolState::Active => write!(f, "active"),
        }
    }
}

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
        }
    }
}
