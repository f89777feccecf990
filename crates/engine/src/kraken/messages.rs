use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use common::{Candle, Error, PriceSnapshot, Result};

// ─── Outbound frames ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubscribeFrame<'a> {
    event: &'static str,
    pair: &'a [String],
    subscription: Value,
}

/// `{"event":"subscribe","pair":[..],"subscription":{"name":"ticker"}}`
pub fn ticker_subscribe_frame(pairs: &[String]) -> Result<String> {
    Ok(serde_json::to_string(&SubscribeFrame {
        event: "subscribe",
        pair: pairs,
        subscription: json!({ "name": "ticker" }),
    })?)
}

/// `{"event":"subscribe","pair":[..],"subscription":{"name":"ohlc","interval":N}}`
pub fn ohlc_subscribe_frame(pairs: &[String], interval: u32) -> Result<String> {
    Ok(serde_json::to_string(&SubscribeFrame {
        event: "subscribe",
        pair: pairs,
        subscription: json!({ "name": "ohlc", "interval": interval }),
    })?)
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// A decoded push from the Kraken v1 public feed. Pairs are still in
/// exchange format (`XBT/USDT`).
#[derive(Debug, Clone, PartialEq)]
pub enum KrakenMessage {
    Ticker {
        pair: String,
        snapshot: PriceSnapshot,
    },
    Ohlc {
        pair: String,
        candle: Candle,
    },
    SubscriptionStatus {
        pair: Option<String>,
        channel: Option<String>,
        status: String,
        error_message: Option<String>,
    },
    /// heartbeat, systemStatus, pong and other bookkeeping events.
    Ignored,
}

/// Decode one text frame. `default_interval` is used for `ohlc` channel
/// names that do not carry the interval suffix.
pub fn parse_message(text: &str, default_interval: u32) -> Result<KrakenMessage> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid JSON: {e}")))?;

    match value {
        Value::Object(map) => {
            let event = map.get("event").and_then(Value::as_str).unwrap_or_default();
            match event {
                "subscriptionStatus" => Ok(KrakenMessage::SubscriptionStatus {
                    pair: str_field(&map, "pair"),
                    channel: map
                        .get("subscription")
                        .and_then(|s| s.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| str_field(&map, "channelName")),
                    status: str_field(&map, "status").unwrap_or_default(),
                    error_message: str_field(&map, "errorMessage"),
                }),
                "heartbeat" | "systemStatus" | "pong" => Ok(KrakenMessage::Ignored),
                "" => Err(Error::Protocol(format!("object without event: {text}"))),
                other => Err(Error::Protocol(format!("unexpected event '{other}'"))),
            }
        }
        Value::Array(items) => parse_channel_push(&items, default_interval),
        _ => Err(Error::Protocol(format!("unexpected payload: {text}"))),
    }
}

fn parse_channel_push(items: &[Value], default_interval: u32) -> Result<KrakenMessage> {
    if items.len() < 4 {
        return Err(Error::Protocol(format!(
            "channel push with {} elements",
            items.len()
        )));
    }
    let n = items.len();
    let channel = items[n - 2]
        .as_str()
        .ok_or_else(|| Error::Protocol("channel name is not a string".into()))?;
    let pair = items[n - 1]
        .as_str()
        .ok_or_else(|| Error::Protocol("pair is not a string".into()))?
        .to_string();

    if channel == "ticker" {
        let snapshot = parse_ticker(&items[1])?;
        return Ok(KrakenMessage::Ticker { pair, snapshot });
    }
    if let Some(suffix) = channel.strip_prefix("ohlc") {
        let interval = suffix
            .strip_prefix('-')
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(default_interval);
        let candle = parse_ohlc(&items[1], interval)?;
        return Ok(KrakenMessage::Ohlc { pair, candle });
    }
    Err(Error::Protocol(format!("unknown channel '{channel}'")))
}

fn parse_ticker(data: &Value) -> Result<PriceSnapshot> {
    let price = data
        .get("c")
        .and_then(|c| c.get(0))
        .and_then(number)
        .ok_or_else(|| Error::Protocol("ticker without last trade price".into()))?;

    // v, l, h are [today, last 24 hours]
    let rolling = |key: &str| {
        data.get(key)
            .and_then(|v| v.get(1).or_else(|| v.get(0)))
            .and_then(number)
            .unwrap_or(0.0)
    };

    Ok(PriceSnapshot {
        price,
        volume: rolling("v"),
        low: rolling("l"),
        high: rolling("h"),
        timestamp: Utc::now(),
    })
}

/// Accepts `[time, open, high, low, close, vwap, volume, count]` and the live
/// `[time, etime, open, high, low, close, vwap, volume, count]` form.
pub fn parse_ohlc(data: &Value, interval_minutes: u32) -> Result<Candle> {
    let fields = data
        .as_array()
        .ok_or_else(|| Error::Protocol("ohlc payload is not an array".into()))?;
    let at = |i: usize| {
        fields
            .get(i)
            .and_then(number)
            .ok_or_else(|| Error::Protocol(format!("ohlc field {i} missing or not numeric")))
    };

    let (timestamp, base) = match fields.len() {
        8 => (at(0)? as i64, 1),
        9 => {
            let end = at(1)? as i64;
            (end - i64::from(interval_minutes) * 60, 2)
        }
        n => return Err(Error::Protocol(format!("ohlc payload with {n} fields"))),
    };

    Ok(Candle {
        timestamp,
        open: at(base)?,
        high: at(base + 1)?,
        low: at(base + 2)?,
        close: at(base + 3)?,
        // skip vwap
        volume: at(base + 5)?,
    })
}

/// Kraken sends decimals as strings; tolerate plain numbers too.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

fn str_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}
