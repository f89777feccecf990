use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use common::symbol::{from_exchange, to_exchange};
use common::{
    Candle, ConnectionState, ConnectionStatus, Error, FeedConfig, HistoryBatch, MarketFeed,
    PriceObserver, PriceSnapshot, PriceUpdate, Result,
};

use super::messages::{ohlc_subscribe_frame, parse_message, ticker_subscribe_frame, KrakenMessage};
use super::rest::KrakenRest;
use crate::cache::MarketCache;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Kraken v1 public WebSocket client with a REST history fetcher.
///
/// One read loop per connection feeds the price/candle cache and the
/// registered observer. Reconnects are a bounded retry loop with a
/// cancellable exponential backoff; `close()` is terminal.
#[derive(Clone)]
pub struct KrakenClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: FeedConfig,
    cache: MarketCache,
    rest: KrakenRest,
    /// Exchange-format pairs (`XBT/USDT`).
    subscriptions: tokio::sync::Mutex<BTreeSet<String>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    /// Serializes connection establishment between callers and the read loop.
    connect_lock: tokio::sync::Mutex<()>,
    status: Mutex<ConnectionStatus>,
    /// Woken by the read loop on every incoming Pong.
    pongs: tokio::sync::Notify,
    observer: RwLock<Option<Arc<dyn PriceObserver>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl KrakenClient {
    pub fn new(config: FeedConfig) -> Result<Self> {
        Url::parse(&config.ws_url).map_err(|e| Error::Config(format!("KRAKEN_WS_URL: {e}")))?;
        let rest = KrakenRest::new(config.rest_url.clone(), config.http_timeout)?;
        Ok(Self {
            inner: Arc::new(Inner {
                cache: MarketCache::new(config.max_candles),
                rest,
                subscriptions: tokio::sync::Mutex::new(BTreeSet::new()),
                sink: tokio::sync::Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                status: Mutex::new(ConnectionStatus::default()),
                pongs: tokio::sync::Notify::new(),
                observer: RwLock::new(None),
                reader: Mutex::new(None),
                cancel: CancellationToken::new(),
                config,
            }),
        })
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.inner.status.lock()
    }

    /// Copy of the subscription registry, exchange format.
    pub async fn subscriptions(&self) -> BTreeSet<String> {
        self.inner.subscriptions.lock().await.clone()
    }

    pub fn price_snapshot(&self, symbol: &str) -> Option<PriceSnapshot> {
        self.inner.cache.price(symbol)
    }

    pub fn all_prices(&self) -> std::collections::HashMap<String, PriceSnapshot> {
        self.inner.cache.all_prices()
    }

    pub fn cache(&self) -> &MarketCache {
        &self.inner.cache
    }
}

impl Inner {
    fn interval(&self) -> u32 {
        self.config.ohlc_interval.unwrap_or(1)
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.lock().state = state;
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Connection("client is closed".into()));
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_alive().await {
            debug!("Kraken connection alive, reusing it");
            return Ok(());
        }

        let read = self.establish().await?;
        let handle = tokio::spawn(run_reader(Arc::clone(self), read));
        if let Some(old) = self.reader.lock().replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// Liveness probe: connected, read loop running, and the peer answers a
    /// ping within the probe timeout.
    async fn is_alive(&self) -> bool {
        if self.status.lock().state != ConnectionState::Connected {
            return false;
        }
        let reader_running = self
            .reader
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        if !reader_running {
            return false;
        }

        // Register for the pong before the ping goes out.
        let pong = self.pongs.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();

        let timeout = self.config.ping_timeout;
        let probe = async {
            {
                let mut sink = self.sink.lock().await;
                let sink = sink
                    .as_mut()
                    .ok_or_else(|| Error::Connection("not connected".into()))?;
                sink.send(Message::Ping(Vec::new()))
                    .await
                    .map_err(|e| Error::WebSocket(e.to_string()))?;
            }
            pong.as_mut().await;
            Ok::<(), Error>(())
        };

        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Liveness ping failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?timeout, "No pong within the liveness timeout");
                false
            }
        }
    }

    /// Bounded connect loop. On success the attempt counter is reset, every
    /// registered pair is resubscribed, and the read half is returned.
    async fn establish(&self) -> Result<WsRead> {
        let max_attempts = self.config.max_reconnect_attempts.max(1);
        *self.status.lock() = ConnectionStatus::default();

        loop {
            let attempt = {
                let mut status = self.status.lock();
                status.attempts += 1;
                status.attempts
            };
            info!(attempt, max_attempts, url = %self.config.ws_url, "Connecting to Kraken WebSocket");

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::Connection("client closed while connecting".into()));
                }
                res = tokio::time::timeout(self.config.connect_timeout, connect_async(self.config.ws_url.as_str())) => res,
            };

            match outcome {
                Ok(Ok((ws, _))) => {
                    let (sink, read) = ws.split();
                    *self.sink.lock().await = Some(sink);
                    *self.status.lock() = ConnectionStatus {
                        state: ConnectionState::Connected,
                        attempts: 0,
                    };
                    info!("Connected to Kraken WebSocket");
                    if let Err(e) = self.resubscribe().await {
                        warn!(error = %e, "Resubscription failed");
                    }
                    return Ok(read);
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "Kraken connection attempt failed"),
                Err(_) => warn!(attempt, timeout = ?self.config.connect_timeout, "Kraken connection attempt timed out"),
            }

            if attempt >= max_attempts {
                error!(attempts = attempt, "Giving up on Kraken connection");
                return Err(Error::Connection(format!(
                    "could not connect to {} after {attempt} attempts",
                    self.config.ws_url
                )));
            }

            let wait = self.config.backoff_for(attempt);
            info!(attempt, backoff = ?wait, "Retrying Kraken connection");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::Connection("client closed during backoff".into()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn resubscribe(&self) -> Result<()> {
        let pairs: Vec<String> = self.subscriptions.lock().await.iter().cloned().collect();
        if pairs.is_empty() {
            return Ok(());
        }
        info!(pairs = ?pairs, "Resubscribing");
        self.send_subscribe(&pairs).await
    }

    async fn subscribe(self: &Arc<Self>, symbols: &[String]) -> Result<()> {
        if self.pending_pairs(symbols).await.is_empty() {
            return Ok(());
        }
        if self.status.lock().state != ConnectionState::Connected {
            self.connect().await?;
        }

        let mut subscriptions = self.subscriptions.lock().await;
        let pairs: Vec<String> = dedup_pairs(symbols)
            .into_iter()
            .filter(|p| !subscriptions.contains(p))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }
        self.send_subscribe(&pairs).await?;
        info!(pairs = ?pairs, "Subscribed");
        subscriptions.extend(pairs);
        Ok(())
    }

    async fn pending_pairs(&self, symbols: &[String]) -> Vec<String> {
        let subscriptions = self.subscriptions.lock().await;
        dedup_pairs(symbols)
            .into_iter()
            .filter(|p| !subscriptions.contains(p))
            .collect()
    }

    async fn send_subscribe(&self, pairs: &[String]) -> Result<()> {
        self.send_text(ticker_subscribe_frame(pairs)?).await?;
        if let Some(interval) = self.config.ohlc_interval {
            self.send_text(ohlc_subscribe_frame(pairs, interval)?).await?;
        }
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".into()))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    fn handle_text(&self, text: &str) {
        match parse_message(text, self.interval()) {
            Ok(KrakenMessage::Ticker { pair, snapshot }) => {
                let symbol = from_exchange(&pair);
                self.cache.upsert_price(&symbol, snapshot);
                let observer = self.observer.read().clone();
                if let Some(observer) = observer {
                    observer.on_price_update(&PriceUpdate {
                        symbol,
                        data: snapshot,
                    });
                }
            }
            Ok(KrakenMessage::Ohlc { pair, candle }) => {
                let symbol = from_exchange(&pair);
                self.cache.upsert_candle(&symbol, candle);
                let observer = self.observer.read().clone();
                if let Some(observer) = observer {
                    observer.on_candle(&symbol, &candle);
                }
            }
            Ok(KrakenMessage::SubscriptionStatus {
                pair,
                channel,
                status,
                error_message,
            }) => {
                if status == "error" {
                    warn!(pair = ?pair, channel = ?channel, error = ?error_message, "Subscription error");
                } else {
                    info!(pair = ?pair, channel = ?channel, status = %status, "Subscription status");
                }
            }
            Ok(KrakenMessage::Ignored) => {}
            Err(e) => warn!(error = %e, "Dropped Kraken payload"),
        }
    }

    async fn close(&self) {
        self.cancel.cancel();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let grace = self.config.close_grace;
            let _ = tokio::time::timeout(grace, async {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
            })
            .await;
        }

        let handle = self.reader.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.config.close_grace, &mut handle)
                .await
                .is_err()
            {
                warn!("Read loop did not stop in time, aborting it");
                handle.abort();
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Kraken client closed");
    }
}

fn dedup_pairs(symbols: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    symbols
        .iter()
        .map(|s| to_exchange(s))
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Errors after which the socket is unusable and a reconnect is needed.
fn is_connection_lost(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(_)
    )
}

async fn run_reader(inner: Arc<Inner>, mut read: WsRead) {
    debug!("Kraken read loop started");
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            msg = read.next() => msg,
        };

        let lost = match next {
            Some(Ok(Message::Text(text))) => {
                inner.handle_text(&text);
                false
            }
            Some(Ok(Message::Pong(_))) => {
                inner.pongs.notify_waiters();
                false
            }
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "Kraken closed the connection");
                true
            }
            Some(Ok(_)) => false,
            None => {
                info!("Kraken stream ended");
                true
            }
            Some(Err(e)) if is_connection_lost(&e) => {
                warn!(error = %e, "Kraken connection lost");
                true
            }
            Some(Err(e)) => {
                warn!(error = %e, "Kraken read error");
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = tokio::time::sleep(inner.config.read_error_pause) => {}
                }
                false
            }
        };

        if lost {
            inner.set_state(ConnectionState::Disconnected);
            *inner.sink.lock().await = None;
            if inner.cancel.is_cancelled() {
                break;
            }
            // One bounded reconnect chain; give up on failure.
            let _guard = inner.connect_lock.lock().await;
            match inner.establish().await {
                Ok(new_read) => read = new_read,
                Err(e) => {
                    error!(error = %e, "Reconnect failed, read loop stopping");
                    break;
                }
            }
        }
    }
    debug!("Kraken read loop stopped");
}

#[async_trait]
impl MarketFeed for KrakenClient {
    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        self.inner.subscribe(symbols).await
    }

    async fn fetch_history(
        &self,
        symbols: &[String],
        interval_minutes: u32,
        limit: usize,
    ) -> Result<HistoryBatch> {
        let batch = self.inner.rest.fetch_all(symbols, interval_minutes, limit).await?;
        for (symbol, candles) in &batch.candles {
            self.inner.cache.upsert_candles(symbol, candles);
        }
        Ok(batch)
    }

    fn set_observer(&self, observer: Arc<dyn PriceObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.inner.cache.latest_price(symbol)
    }

    fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.inner.cache.candles(symbol)
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
