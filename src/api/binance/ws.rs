use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::SpikeWatchError;
use crate::sink::AlertSink;
use crate::types::{BarUpdate, Instrument, Timeframe};

const BINANCE_FUTURES_WS_URL: &str = "wss://fstream.binance.com";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for a monitoring session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Combined-stream endpoint base.
    pub base_url: String,
    /// Fixed wait between recovery attempts. No growth, no attempt ceiling.
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_WS_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Lifecycle of the one multiplexed connection a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamEnvelope {
    stream: String,
    data: KlineEvent,
}

#[derive(Debug, Serialize, Deserialize)]
struct KlineEvent {
    k: Kline,
}

#[derive(Debug, Serialize, Deserialize)]
struct Kline {
    s: String, // Symbol
    i: String, // Bar interval
    x: bool,   // Bar closed
    o: String, // Open price
    c: String, // Close/latest price
}

enum LoopExit {
    Cancelled,
    Disconnected,
}

/// Owns the single multiplexed kline subscription of one monitoring
/// session and drives its receive/reconnect loop.
pub struct StreamSession {
    config: StreamConfig,
    state: SessionState,
}

impl StreamSession {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until cancelled. The initial handshake failing is terminal for
    /// this session attempt and reported upward; once connected, every
    /// later failure degrades to a fixed-delay reconnect.
    pub async fn run<F>(
        &mut self,
        instruments: &[Instrument],
        timeframe: Timeframe,
        mut on_bar: F,
        sink: &AlertSink,
        cancel: &CancellationToken,
    ) -> Result<(), SpikeWatchError>
    where
        F: FnMut(BarUpdate),
    {
        let url = combined_stream_url(&self.config.base_url, instruments, timeframe);
        debug!("combined stream url: {}", url);

        let mut first_attempt = true;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.state = SessionState::Connecting;

            let ws_stream = tokio::select! {
                _ = cancel.cancelled() => break,
                connected = connect(&url) => match connected {
                    Ok(ws_stream) => ws_stream,
                    Err(err) if first_attempt => {
                        error!("handshake failed: {}", err);
                        sink.line(err.to_string());
                        self.state = SessionState::Stopped;
                        return Err(err);
                    }
                    Err(err) => {
                        warn!("reconnect attempt failed: {}", err);
                        sink.line(format!(
                            "Reconnect failed: {}; retrying in {:?}",
                            err, self.config.reconnect_delay
                        ));
                        self.state = SessionState::Reconnecting;
                        if !wait_before_retry(self.config.reconnect_delay, cancel).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            info!(
                "connected to Binance Futures stream ({} instruments, {})",
                instruments.len(),
                timeframe
            );
            if first_attempt {
                sink.line("Connected to Binance Futures kline stream");
            } else {
                sink.line("Reconnected to Binance Futures kline stream");
            }
            first_attempt = false;
            self.state = SessionState::Connected;

            match self.read_messages(ws_stream, &mut on_bar, sink, cancel).await {
                LoopExit::Cancelled => break,
                LoopExit::Disconnected => {
                    self.state = SessionState::Reconnecting;
                    if !wait_before_retry(self.config.reconnect_delay, cancel).await {
                        break;
                    }
                }
            }
        }

        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Sequential consumer of one live connection. Returns when the
    /// transport is gone or the session is cancelled; individual bad
    /// messages are reported and skipped, never fatal.
    async fn read_messages<F>(
        &self,
        mut ws_stream: WsStream,
        on_bar: &mut F,
        sink: &AlertSink,
        cancel: &CancellationToken,
    ) -> LoopExit
    where
        F: FnMut(BarUpdate),
    {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return LoopExit::Cancelled,
                message = ws_stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => match decode_bar(&text) {
                    Ok(bar) => on_bar(bar),
                    Err(err) => {
                        warn!("failed to parse message: {}", err);
                        sink.line(format!("Failed to parse message: {}", err));
                        // The connection itself is still good; hold off
                        // briefly before reading on.
                        if !wait_before_retry(self.config.reconnect_delay, cancel).await {
                            return LoopExit::Cancelled;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) => {
                    info!("server closed the connection");
                    sink.line(format!(
                        "Stream closed by server; reconnecting in {:?}",
                        self.config.reconnect_delay
                    ));
                    return LoopExit::Disconnected;
                }
                Some(Ok(_)) => {} // Pings/pongs are answered by tungstenite
                Some(Err(err)) => {
                    let err = SpikeWatchError::Stream(err);
                    error!("{}", err);
                    sink.line(format!(
                        "{}; reconnecting in {:?}",
                        err, self.config.reconnect_delay
                    ));
                    return LoopExit::Disconnected;
                }
                None => {
                    info!("stream ended");
                    sink.line(format!(
                        "Stream ended; reconnecting in {:?}",
                        self.config.reconnect_delay
                    ));
                    return LoopExit::Disconnected;
                }
            }
        }
    }
}

async fn connect(url: &str) -> Result<WsStream, SpikeWatchError> {
    // Combined-stream frames multiplex hundreds of instruments and can
    // exceed the default message cap.
    let config = WebSocketConfig {
        max_message_size: None,
        max_frame_size: None,
        ..Default::default()
    };

    match connect_async_with_config(url, Some(config), false).await {
        Ok((ws_stream, _)) => Ok(ws_stream),
        Err(err) => Err(SpikeWatchError::Handshake(err)),
    }
}

/// Returns false if cancelled before the delay elapsed.
async fn wait_before_retry(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn combined_stream_url(
    base_url: &str,
    instruments: &[Instrument],
    timeframe: Timeframe,
) -> String {
    let streams = instruments
        .iter()
        .map(|instrument| instrument.stream_name(timeframe))
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/stream?streams={}", base_url.trim_end_matches('/'), streams)
}

fn decode_bar(text: &str) -> Result<BarUpdate, SpikeWatchError> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;
    let kline = envelope.data.k;

    let open = parse_price(&kline.s, "open", &kline.o)?;
    let close = parse_price(&kline.s, "close", &kline.c)?;

    Ok(BarUpdate {
        symbol: kline.s,
        timeframe: kline.i,
        open,
        close,
        closed: kline.x,
    })
}

fn parse_price(symbol: &str, field: &'static str, value: &str) -> Result<f64, SpikeWatchError> {
    match value.parse::<f64>() {
        Ok(price) if price.is_finite() => Ok(price),
        _ => Err(SpikeWatchError::InvalidPrice {
            symbol: symbol.to_string(),
            field,
            value: value.to_string(),
        }),
    }
}
