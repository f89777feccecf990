pub mod cache;
pub mod kraken;
pub mod orchestrator;
pub mod portfolio;

pub use cache::{CandleSeries, MarketCache};
pub use kraken::{KrakenClient, KrakenRest};
pub use orchestrator::{HistorySettings, Orchestrator};
pub use portfolio::{Portfolio, SessionSummary, SwitchOutcome, SymbolSummary, TradeStats};
