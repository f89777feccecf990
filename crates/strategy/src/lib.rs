pub mod analyzer;
pub mod config;
pub mod indicators;
pub mod registry;

pub use analyzer::{select_switch, AnalyzerConfig, OpportunityAnalyzer, NEUTRAL_SCORE};
pub use config::{StrategyConfig, StrategyFileConfig};
pub use registry::{build_strategy, IndicatorStrategy, MomentumStrategy};

use common::Signal;

/// All strategy implementations must satisfy this trait.
pub trait Strategy: Send + Sync {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    /// Evaluate a price series (oldest first).
    ///
    /// The output is aligned one-to-one with `prices`; the last element is
    /// the signal for the most recent price. Warmup positions are `Hold`.
    fn generate_signals(&self, prices: &[f64]) -> Vec<Signal>;

    /// Signal for the most recent price only.
    fn latest_signal(&self, prices: &[f64]) -> Signal {
        self.generate_signals(prices).last().copied().unwrap_or_default()
    }
}
