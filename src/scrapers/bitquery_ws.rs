//! Bitquery WebSocket DEXTrades subscription
//!
//! Based on the Bitquery streaming docs:
//! - Endpoint: wss://streaming.bitquery.io/graphql?token=<TOKEN>
//! - Subprotocol `graphql-ws` (legacy Apollo protocol):
//!   connection_init -> connection_ack, then start / data / ka / complete
//! - Trades arrive in batches per block, in no particular block-time order

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::protocol::WebSocketConfig, tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::audit::collector::{StreamBatch, TradeSubscription};
use crate::models::RecordSource;
use crate::scrapers::dex_trades::{parse_trades, DEX_TRADES_SUBSCRIPTION};

pub const BITQUERY_WS_URL: &str = "wss://streaming.bitquery.io/graphql";

const SUBPROTOCOL: &str = "graphql-ws";
const SUBSCRIPTION_ID: &str = "1";
const ACK_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client -> server frame of the graphql-ws protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GqlClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl GqlClientMessage {
    pub fn connection_init() -> Self {
        Self {
            msg_type: "connection_init".to_string(),
            id: None,
            payload: Some(Value::Object(Default::default())),
        }
    }

    pub fn start(id: &str, query: &str) -> Self {
        Self {
            msg_type: "start".to_string(),
            id: Some(id.to_string()),
            payload: Some(serde_json::json!({ "query": query })),
        }
    }

    pub fn stop(id: &str) -> Self {
        Self {
            msg_type: "stop".to_string(),
            id: Some(id.to_string()),
            payload: None,
        }
    }

    pub fn connection_terminate() -> Self {
        Self {
            msg_type: "connection_terminate".to_string(),
            id: None,
            payload: None,
        }
    }

    fn to_message(&self) -> Result<Message> {
        let text = serde_json::to_string(self).context("Failed to serialize graphql-ws frame")?;
        Ok(Message::Text(text))
    }
}

/// Server -> client frames we care about
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    ConnectionAck,
    KeepAlive,
    Data(Value),
    Error(String),
    Complete,
    Other(String),
}

pub fn decode_server_frame(text: &str) -> Result<ServerFrame> {
    let json: Value = serde_json::from_str(text).context("Invalid graphql-ws frame")?;
    let msg_type = json.get("type").and_then(Value::as_str).unwrap_or_default();

    Ok(match msg_type {
        "connection_ack" => ServerFrame::ConnectionAck,
        "ka" => ServerFrame::KeepAlive,
        "data" => ServerFrame::Data(json),
        "error" | "connection_error" => ServerFrame::Error(
            json.get("payload")
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        "complete" => ServerFrame::Complete,
        other => ServerFrame::Other(other.to_string()),
    })
}

/// Live DEXTrades subscription over a single WebSocket connection
pub struct BitqueryStream {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    frames_received: u64,
}

impl BitqueryStream {
    /// Connect, complete the graphql-ws handshake and start the subscription.
    pub async fn connect(base_url: &str, token: &str) -> Result<Self> {
        // (Do not log the token.)
        let ws_url = format!("{}?token={}", base_url, token);

        info!("🔌 Connecting to Bitquery stream at {}...", base_url);

        let mut request = ws_url
            .into_client_request()
            .context("Failed to build websocket request")?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            SUBPROTOCOL.parse().context("Invalid subprotocol header")?,
        );

        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024 * 1024),
            max_frame_size: Some(16 * 1024 * 1024),
            accept_unmasked_frames: false,
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .context("Failed to connect to Bitquery WebSocket")?;

        info!("✅ WebSocket connected (status: {})", response.status());

        let (mut write, mut read) = ws_stream.split();

        write
            .send(GqlClientMessage::connection_init().to_message()?)
            .await
            .context("Failed to send connection_init")?;

        timeout(ACK_TIMEOUT, wait_for_ack(&mut read))
            .await
            .context("Timed out waiting for connection_ack")??;

        write
            .send(GqlClientMessage::start(SUBSCRIPTION_ID, DEX_TRADES_SUBSCRIPTION).to_message()?)
            .await
            .context("Failed to send subscription")?;

        info!("🔥 Subscribed to Solana DEXTrades");

        Ok(Self {
            write,
            read,
            frames_received: 0,
        })
    }
}

/// Prefix of at most `max_chars` characters, for log lines.
fn preview(text: &str, max_chars: usize) -> &str {
    text.char_indices().nth(max_chars).map_or(text, |(i, _)| &text[..i])
}

async fn wait_for_ack(read: &mut SplitStream<WsStream>) -> Result<()> {
    while let Some(message) = read.next().await {
        match message.context("WebSocket read error during handshake")? {
            Message::Text(text) => match decode_server_frame(&text)? {
                ServerFrame::ConnectionAck => return Ok(()),
                ServerFrame::KeepAlive => continue,
                ServerFrame::Error(e) => bail!("Bitquery rejected connection: {}", e),
                other => debug!("Ignoring frame before ack: {:?}", other),
            },
            Message::Close(frame) => bail!("WebSocket closed during handshake: {:?}", frame),
            _ => {}
        }
    }
    bail!("WebSocket ended before connection_ack")
}

#[async_trait]
impl TradeSubscription for BitqueryStream {
    async fn next_batch(&mut self) -> Result<Option<StreamBatch>> {
        while let Some(message) = self.read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if tracing::enabled!(tracing::Level::DEBUG) {
                        debug!("Received frame: {}", preview(&text, 200));
                    }

                    match decode_server_frame(&text) {
                        Ok(ServerFrame::Data(frame)) => {
                            self.frames_received += 1;
                            if let Some(errors) = frame.get("payload").and_then(|p| p.get("errors")) {
                                warn!("Subscription payload carried errors: {}", errors);
                            }
                            return Ok(Some(parse_trades(&frame, RecordSource::Stream)));
                        }
                        Ok(ServerFrame::KeepAlive) | Ok(ServerFrame::ConnectionAck) => {}
                        Ok(ServerFrame::Error(e)) => bail!("Subscription error: {}", e),
                        Ok(ServerFrame::Complete) => {
                            info!("Subscription completed by server");
                            return Ok(None);
                        }
                        Ok(ServerFrame::Other(t)) => debug!("Control frame: {}", t),
                        Err(e) => warn!("Failed to decode frame: {} | Raw: {}", e, text),
                    }
                }
                Ok(Message::Ping(ping)) => {
                    debug!("Received ping, sending pong");
                    self.write
                        .send(Message::Pong(ping))
                        .await
                        .context("Failed to send pong")?;
                }
                Ok(Message::Close(frame)) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    return Ok(None);
                }
                Ok(Message::Binary(data)) => {
                    warn!("Received unexpected binary message: {} bytes", data.len());
                }
                Ok(_) => {}
                Err(e) => return Err(e).context("WebSocket read error"),
            }
        }

        Ok(None)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.write
            .send(GqlClientMessage::stop(SUBSCRIPTION_ID).to_message()?)
            .await
            .context("Failed to send stop")?;
        self.write
            .send(GqlClientMessage::connection_terminate().to_message()?)
            .await
            .context("Failed to send connection_terminate")?;
        if let Err(e) = self.write.close().await {
            debug!("WebSocket close after unsubscribe: {}", e);
        }
        info!("Stream closed ({} data frames)", self.frames_received);
        Ok(())
    }
}
