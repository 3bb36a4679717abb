//! WebSocket client for the exchange delta feed
//!
//! Subscribes to exchange-state deltas for a set of markets and forwards
//! decoded events over an mpsc channel. Reconnects with a capped attempt
//! count and keeps the connection alive with periodic pings.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::stream::types::{MarketDelta, MarketEvent};

/// Hub method carrying per-market deltas
const UPDATE_EXCHANGE_STATE: &str = "updateExchangeState";
/// Hub method used to subscribe to a market
const SUBSCRIBE_METHOD: &str = "SubscribeToExchangeDeltas";
const HUB_NAME: &str = "c2";

/// Outgoing hub call
#[derive(Debug, Serialize)]
struct HubCall {
    #[serde(rename = "H")]
    hub: String,
    #[serde(rename = "M")]
    method: String,
    #[serde(rename = "A")]
    args: Vec<String>,
    #[serde(rename = "I")]
    id: u32,
}

impl HubCall {
    fn subscribe(market: &str, id: u32) -> Self {
        Self {
            hub: HUB_NAME.to_string(),
            method: SUBSCRIBE_METHOD.to_string(),
            args: vec![market.to_string()],
            id,
        }
    }
}

/// Incoming socket frame, possibly batching several hub messages
#[derive(Debug, Deserialize)]
struct SocketFrame {
    #[serde(rename = "M", default)]
    messages: Vec<HubMessage>,
}

#[derive(Debug, Deserialize)]
struct HubMessage {
    #[serde(rename = "M")]
    method: String,
    #[serde(rename = "A", default)]
    args: Vec<serde_json::Value>,
}

/// Market delta stream client
pub struct MarketStreamClient {
    config: StreamConfig,
    event_tx: mpsc::Sender<MarketEvent>,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

impl MarketStreamClient {
    pub fn new(config: StreamConfig, event_tx: mpsc::Sender<MarketEvent>) -> Self {
        let (shutdown, _) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            event_tx,
            shutdown,
        }
    }

    /// Start streaming deltas for the given markets in a background task.
    pub fn start(&self, markets: Vec<String>) {
        info!("Starting market stream for {} markets", markets.len());

        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut reconnect_attempts = 0u32;

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!("Market stream shutting down");
                    break;
                }

                match Self::connect_and_stream(&config, &event_tx, &markets).await {
                    Ok(_) => {
                        reconnect_attempts = 0;
                    }
                    Err(e) => {
                        error!("Market stream error: {}", e);
                        reconnect_attempts += 1;

                        if config.max_reconnect_attempts > 0
                            && reconnect_attempts >= config.max_reconnect_attempts
                        {
                            error!(
                                "Max reconnect attempts ({}) reached",
                                config.max_reconnect_attempts
                            );
                            let _ = event_tx
                                .send(MarketEvent::Error(
                                    "Max reconnect attempts reached".to_string(),
                                ))
                                .await;
                            break;
                        }
                    }
                }

                let _ = event_tx.send(MarketEvent::Disconnected).await;

                let delay = Duration::from_millis(config.reconnect_delay_ms);
                warn!("Reconnecting in {:?}...", delay);
                sleep(delay).await;
            }
        });
    }

    /// Stop the client
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    async fn connect_and_stream(
        config: &StreamConfig,
        event_tx: &mpsc::Sender<MarketEvent>,
        markets: &[String],
    ) -> Result<()> {
        let url = url::Url::parse(&config.ws_url)
            .map_err(|e| Error::Config(format!("Invalid WebSocket URL: {}", e)))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::StreamConnection(format!("WebSocket connect failed: {}", e)))?;

        info!("Connected to market stream");
        event_tx
            .send(MarketEvent::Connected)
            .await
            .map_err(|e| Error::Internal(format!("Failed to send event: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        for (i, market) in markets.iter().enumerate() {
            let call = HubCall::subscribe(market, i as u32);
            let json = serde_json::to_string(&call)?;
            write
                .send(Message::Text(json))
                .await
                .map_err(|e| Error::StreamConnection(format!("Failed to subscribe: {}", e)))?;
        }
        info!("Subscribed to exchange deltas for {} markets", markets.len());

        let ping_interval = Duration::from_secs(config.ping_interval_secs);
        let mut ping_timer = tokio::time::interval(ping_interval);

        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        error!("Failed to send ping: {}", e);
                        break;
                    }
                    debug!("Sent ping");
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = Self::handle_message(&text, event_tx).await {
                                warn!("Failed to handle frame: {}", e);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            break;
                        }
                        None => {
                            info!("WebSocket stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Decode one socket frame and forward any deltas it carries.
    async fn handle_message(text: &str, event_tx: &mpsc::Sender<MarketEvent>) -> Result<()> {
        let frame: SocketFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => {
                // Keepalive and handshake frames don't match; ignore them
                debug!("Ignoring frame: {}", &text[..text.len().min(100)]);
                return Ok(());
            }
        };

        for message in frame.messages {
            if message.method != UPDATE_EXCHANGE_STATE {
                continue;
            }
            for arg in message.args {
                match serde_json::from_value::<MarketDelta>(arg) {
                    Ok(mut delta) => {
                        delta.received_at = Utc::now();
                        debug!(
                            "Delta for {}: {} fills, {} buys",
                            delta.market_name,
                            delta.fills.len(),
                            delta.buys.len()
                        );
                        event_tx
                            .send(MarketEvent::Delta(delta))
                            .await
                            .map_err(|e| Error::Internal(e.to_string()))?;
                    }
                    Err(e) => warn!("Undecodable market delta: {}", e),
                }
            }
        }

        Ok(())
    }
}
