//! End-to-end exercises of the monitoring engine against local stand-ins
//! for the exchange: a canned exchange-info HTTP endpoint and a scripted
//! WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use spikewatch::{AlertSink, InstrumentCatalog, Monitor, StreamConfig, Timeframe};

/// Serve every request with an exchange-info payload listing `symbols` as
/// active USDT perpetuals.
async fn spawn_catalog_server(symbols: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let descriptors: Vec<serde_json::Value> = symbols
        .iter()
        .map(|symbol| {
            serde_json::json!({
                "symbol": symbol,
                "quoteAsset": "USDT",
                "contractType": "PERPETUAL",
                "status": "TRADING",
            })
        })
        .collect();
    let body = serde_json::json!({ "symbols": descriptors }).to_string();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut request = Vec::new();
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if request.windows(4).any(|window| window == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn kline_frame(symbol: &str, open: &str, close: &str, closed: bool) -> Message {
    let frame = serde_json::json!({
        "stream": format!("{}@kline_1m", symbol.to_lowercase()),
        "data": {
            "e": "kline",
            "s": symbol,
            "k": {
                "s": symbol,
                "i": "1m",
                "o": open,
                "c": close,
                "x": closed,
            }
        }
    });
    Message::Text(frame.to_string())
}

async fn next_line(lines: &mut UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), lines.recv())
        .await
        .expect("timed out waiting for a status line")
        .expect("alert sink closed unexpectedly")
}

#[tokio::test]
async fn alerts_flow_and_survive_a_reconnect() {
    let catalog_url = spawn_catalog_server(vec!["BTCUSDT"]).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        // First connection: a spike, a malformed frame, a quiet bar, then a
        // server-side close.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(kline_frame("BTCUSDT", "100.0", "106.0", true))
            .await
            .unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(kline_frame("BTCUSDT", "100.0", "104.0", true))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        // Second connection, reached after the client's backoff.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(kline_frame("BTCUSDT", "100.0", "110.0", true))
            .await
            .unwrap();
        while ws.next().await.is_some() {}
    });

    let (sink, mut lines) = AlertSink::channel();
    let mut monitor = Monitor::with_endpoints(
        InstrumentCatalog::new(catalog_url),
        StreamConfig::new(ws_url).with_reconnect_delay(Duration::from_millis(50)),
        sink,
    );
    monitor.start(5.0, Timeframe::M1).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let line = next_line(&mut lines).await;
        seen.push(line.clone());
        if line.contains("10.00%") {
            break;
        }
    }

    assert!(seen.iter().any(|l| l.contains("Starting monitor")));
    assert!(seen.iter().any(|l| l.contains("Tracking 1 USDT perpetual")));
    assert!(seen.iter().any(|l| l.contains("Connected to Binance Futures")));
    assert!(seen.iter().any(|l| l.contains("ALERT BTCUSDT | 1m: 6.00% | O: 100, C: 106")));
    assert!(seen.iter().any(|l| l.contains("Failed to parse message")));
    assert!(seen.iter().any(|l| l.contains("Reconnected to Binance Futures")));
    // The 4% bar sits under the threshold and must never alert.
    assert!(!seen.iter().any(|l| l.contains("4.00%")));

    monitor.stop().await;
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn stop_interrupts_the_reconnect_backoff() {
    let catalog_url = spawn_catalog_server(vec!["BTCUSDT"]).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let (sink, mut lines) = AlertSink::channel();
    let mut monitor = Monitor::with_endpoints(
        InstrumentCatalog::new(catalog_url),
        StreamConfig::new(ws_url).with_reconnect_delay(Duration::from_secs(60)),
        sink,
    );
    monitor.start(5.0, Timeframe::M1).await.unwrap();

    // Wait until the session has entered its backoff wait.
    loop {
        let line = next_line(&mut lines).await;
        if line.contains("reconnecting in") {
            break;
        }
    }

    tokio::time::timeout(Duration::from_secs(2), monitor.stop())
        .await
        .expect("stop must not wait out the 60s backoff");
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn a_second_start_fully_replaces_the_first_session() {
    // A catalog endpoint that accepts connections but never answers keeps
    // the first session parked inside its fetch until it is cancelled.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let (sink, mut lines) = AlertSink::channel();
    let mut monitor = Monitor::with_endpoints(
        InstrumentCatalog::new(format!("http://{}", addr)),
        StreamConfig::default(),
        sink,
    );

    monitor.start(5.0, Timeframe::M1).await.unwrap();
    assert!(monitor.is_running());

    tokio::time::timeout(Duration::from_secs(2), monitor.start(5.0, Timeframe::M1))
        .await
        .expect("restart must tear the first session down promptly")
        .unwrap();
    assert!(monitor.is_running());

    let mut restarted = false;
    for _ in 0..8 {
        let line = next_line(&mut lines).await;
        if line.contains("Restarting monitoring") {
            restarted = true;
            break;
        }
    }
    assert!(restarted);

    tokio::time::timeout(Duration::from_secs(2), monitor.stop())
        .await
        .expect("stop must cancel the parked catalog fetch promptly");
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn a_failed_catalog_fetch_reports_and_starts_no_session() {
    // Nothing is listening on this port once the listener is dropped.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (sink, mut lines) = AlertSink::channel();
    let mut monitor = Monitor::with_endpoints(
        InstrumentCatalog::new(format!("http://{}", addr)),
        StreamConfig::default(),
        sink,
    );
    monitor.start(5.0, Timeframe::M1).await.unwrap();

    let mut reported = false;
    for _ in 0..8 {
        let line = next_line(&mut lines).await;
        if line.contains("Monitoring not started") {
            reported = true;
            break;
        }
    }
    assert!(reported);

    monitor.stop().await;
    assert!(!monitor.is_running());
}
