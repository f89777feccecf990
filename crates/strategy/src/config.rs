use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{Error, Result};

use crate::analyzer::AnalyzerConfig;

/// Strategy and analyzer settings file (TOML). Both sections are optional.
///
/// Example `config/strategy.toml`:
/// ```toml
/// [strategy]
/// type = "momentum"
/// name = "RSI 14 / MA 3-8"
///
/// [strategy.params]
/// rsi_period = 14
///
/// [analyzer]
/// lookback_window = 100
/// min_data_points = 10
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier: "indicator" or "momentum".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Human-readable name shown in logs.
    pub name: String,
    /// Indicator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_type: "indicator".to_string(),
            name: "RSI/MACD/Bollinger confluence".to_string(),
            params: HashMap::new(),
        }
    }
}

impl StrategyFileConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            Error::Toml(msg) => Error::Toml(format!("{path}: {msg}")),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Toml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = StrategyFileConfig::parse("").unwrap();
        assert_eq!(cfg.strategy.strategy_type, "indicator");
        assert_eq!(cfg.analyzer.min_data_points, AnalyzerConfig::default().min_data_points);
    }

    #[test]
    fn parses_strategy_and_analyzer_sections() {
        let cfg = StrategyFileConfig::parse(
            r#"
            [strategy]
            type = "momentum"
            name = "mom"

            [strategy.params]
            rsi_period = 10

            [analyzer]
            lookback_window = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.strategy.strategy_type, "momentum");
        assert_eq!(cfg.strategy.params["rsi_period"].as_integer(), Some(10));
        assert_eq!(cfg.analyzer.lookback_window, 50);
        assert_eq!(cfg.analyzer.min_data_points, 10);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            StrategyFileConfig::parse("[strategy\ntype="),
            Err(Error::Toml(_))
        ));
    }
}
