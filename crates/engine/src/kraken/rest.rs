use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use common::symbol::to_rest_pair;
use common::{Candle, Error, HistoryBatch, Result};

use super::messages::parse_ohlc;

/// Public REST client for Kraken candle history.
pub struct KrakenRest {
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl KrakenRest {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }

    /// `GET {base}/OHLC?pair=XBTUSDT&interval=N`, keeping the newest `limit` candles.
    pub async fn fetch_ohlc(&self, symbol: &str, interval: u32, limit: usize) -> Result<Vec<Candle>> {
        let pair = to_rest_pair(symbol);
        let url = format!("{}/OHLC", self.base_url);
        let interval_param = interval.to_string();
        debug!(symbol, pair = %pair, interval, "Fetching OHLC history");

        let resp = self
            .http
            .get(&url)
            .query(&[("pair", pair.as_str()), ("interval", interval_param.as_str())])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }

        let value: Value = serde_json::from_str(&body)?;
        parse_ohlc_response(&value, interval, limit)
    }

    /// Fetch every symbol concurrently, each under its own timeout.
    ///
    /// Per-symbol failures land in `HistoryBatch::failures`; only a failure
    /// of every symbol is an error.
    pub async fn fetch_all(&self, symbols: &[String], interval: u32, limit: usize) -> Result<HistoryBatch> {
        let requests = symbols.iter().map(|symbol| async move {
            let outcome = match tokio::time::timeout(
                self.timeout,
                self.fetch_ohlc(symbol, interval, limit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Http(format!("timed out after {:?}", self.timeout))),
            };
            (symbol.clone(), outcome)
        });

        let mut batch = HistoryBatch::default();
        for (symbol, outcome) in join_all(requests).await {
            match outcome {
                Ok(candles) => {
                    info!(symbol = %symbol, count = candles.len(), "Loaded historical candles");
                    batch.candles.insert(symbol, candles);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Historical fetch failed");
                    batch.failures.insert(symbol, e.to_string());
                }
            }
        }

        if batch.candles.is_empty() && !symbols.is_empty() {
            let mut failures: Vec<(String, String)> = batch.failures.into_iter().collect();
            failures.sort();
            return Err(Error::HistoryUnavailable(failures));
        }
        Ok(batch)
    }
}

/// Decode `{"error":[..],"result":{"<PAIR>":[[..],..],"last":N}}`.
pub fn parse_ohlc_response(value: &Value, interval: u32, limit: usize) -> Result<Vec<Candle>> {
    let errors: Vec<&str> = value
        .get("error")
        .and_then(Value::as_array)
        .map(|errs| errs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !errors.is_empty() {
        return Err(Error::Exchange(errors.join("; ")));
    }

    let result = value
        .get("result")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Exchange("response without result".into()))?;

    // Kraken keys the rows by its own pair name (e.g. XXBTZUSD), so take the
    // first array that is not the `last` cursor.
    let rows = result
        .iter()
        .find(|(key, v)| key.as_str() != "last" && v.is_array())
        .and_then(|(_, v)| v.as_array())
        .ok_or_else(|| Error::Exchange("result has no candle rows".into()))?;

    let mut by_time: HashMap<i64, Candle> = HashMap::with_capacity(rows.len());
    for row in rows {
        let candle = parse_ohlc(row, interval)?;
        by_time.insert(candle.timestamp, candle);
    }
    let mut candles: Vec<Candle> = by_time.into_values().collect();
    candles.sort_by_key(|c| c.timestamp);
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    Ok(candles)
}
