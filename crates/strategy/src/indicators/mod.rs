pub mod bollinger;
pub mod macd;
pub mod rsi;

pub use bollinger::{Band, BollingerBands};
pub use macd::{MacdIndicator, MacdSeries};
pub use rsi::RsiIndicator;
