pub mod config;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod symbol;
pub mod types;

pub use config::{Config, FeedConfig, TradingConfig};
pub use error::{Error, Result};
pub use feed::{HistoryBatch, MarketFeed, PriceObserver};
pub use ledger::Ledger;
pub use types::*;
