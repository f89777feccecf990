use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{Error, FeedConfig, MarketFeed};
use engine::KrakenClient;

#[derive(Clone)]
enum Reply {
    Ok(String),
    Status(u16, String),
    Stall,
}

/// Minimal HTTP/1.1 responder keyed on the `pair=` query parameter.
async fn serve(replies: HashMap<&'static str, Reply>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let replies = replies.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let pair = request
                    .split("pair=")
                    .nth(1)
                    .and_then(|rest| rest.split(['&', ' ']).next())
                    .unwrap_or_default()
                    .to_string();

                let (status, body) = match replies.get(pair.as_str()) {
                    Some(Reply::Ok(body)) => (200, body.clone()),
                    Some(Reply::Status(code, body)) => (*code, body.clone()),
                    Some(Reply::Stall) => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return;
                    }
                    None => (404, "not found".to_string()),
                };
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}/0/public")
}

fn ohlc_body(key: &str, closes: &[f64]) -> String {
    let rows: Vec<String> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                r#"[{}, "{c}", "{c}", "{c}", "{c}", "{c}", "1.5", 3]"#,
                1_700_000_000 + i as i64 * 300
            )
        })
        .collect();
    format!(
        r#"{{"error":[],"result":{{"{key}":[{}],"last":1700000000}}}}"#,
        rows.join(",")
    )
}

fn client(rest_url: String, http_timeout: Duration) -> KrakenClient {
    KrakenClient::new(FeedConfig {
        rest_url,
        http_timeout,
        ..FeedConfig::default()
    })
    .unwrap()
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn partial_failure_keeps_successful_symbols() {
    let url = serve(HashMap::from([
        ("XBTUSDT", Reply::Ok(ohlc_body("XBTUSDT", &[100.0, 101.0, 102.0]))),
        (
            "ETHUSDT",
            Reply::Ok(r#"{"error":["EQuery:Unknown asset pair"]}"#.to_string()),
        ),
        ("SOLUSDT", Reply::Status(500, "boom".to_string())),
    ]))
    .await;
    let client = client(url, Duration::from_secs(5));

    let batch = client
        .fetch_history(&symbols(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]), 5, 200)
        .await
        .unwrap();

    assert!(batch.is_partial());
    assert_eq!(batch.candles.len(), 1);
    assert_eq!(batch.candles["BTC/USDT"].len(), 3);
    assert!(batch.failures["ETH/USDT"].contains("Unknown asset pair"));
    assert!(batch.failures.contains_key("SOL/USDT"));

    // History seeds the candle store.
    let seeded = client.candles("BTC/USDT");
    assert_eq!(seeded.len(), 3);
    assert_eq!(seeded[2].close, 102.0);
}

#[tokio::test]
async fn total_failure_is_reported_distinctly() {
    let url = serve(HashMap::from([
        ("XBTUSDT", Reply::Status(503, "down".to_string())),
        ("ETHUSDT", Reply::Status(503, "down".to_string())),
    ]))
    .await;
    let client = client(url, Duration::from_secs(5));

    match client
        .fetch_history(&symbols(&["BTC/USDT", "ETH/USDT"]), 5, 200)
        .await
    {
        Err(Error::HistoryUnavailable(failures)) => {
            let names: Vec<&str> = failures.iter().map(|(s, _)| s.as_str()).collect();
            assert_eq!(names, vec!["BTC/USDT", "ETH/USDT"]);
        }
        other => panic!("expected total failure, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_symbol_does_not_block_the_others() {
    let url = serve(HashMap::from([
        ("XBTUSDT", Reply::Stall),
        ("ETHUSDT", Reply::Ok(ohlc_body("XETHZUSD", &[10.0, 11.0]))),
    ]))
    .await;
    let client = client(url, Duration::from_millis(300));

    let started = Instant::now();
    let batch = client
        .fetch_history(&symbols(&["BTC/USDT", "ETH/USDT"]), 5, 1)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(batch.candles["ETH/USDT"].len(), 1);
    assert_eq!(batch.candles["ETH/USDT"][0].close, 11.0);
    assert!(batch.failures.contains_key("BTC/USDT"));
}
