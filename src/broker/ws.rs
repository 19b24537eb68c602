//! Agent-side broker subscription over WebSocket.
//!
//! The connection carries the agent's bearer token; after a subscribe
//! frame for the agent's own channel, every text frame is a JSON
//! [`AgentMessage`]. Frames that fail to parse are logged and skipped so
//! one malformed publish cannot wedge the read loop.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

use super::{AgentMessage, MessageSource};

pub struct WsSubscription {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Connects and subscribes to `channel`. There is no application-level
/// connect timeout; the underlying socket timeouts apply.
pub async fn connect(url: &str, channel: &str, token: &str) -> Result<WsSubscription> {
    let mut request = url
        .into_client_request()
        .map_err(|err| Error::InvalidInput(format!("bad broker url: {err}")))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}")
            .parse()
            .map_err(|_| Error::InvalidInput("token is not header-safe".to_string()))?,
    );

    let (mut stream, _) = connect_async(request)
        .await
        .map_err(|err| Error::Transport(format!("broker connect failed: {err}")))?;

    let subscribe = serde_json::json!({ "subscribe": { "channel": channel } });
    stream
        .send(WsMessage::Text(subscribe.to_string()))
        .await
        .map_err(|err| Error::Transport(format!("broker subscribe failed: {err}")))?;

    tracing::info!(channel, "Subscribed to broker channel");
    Ok(WsSubscription { stream })
}

#[async_trait]
impl MessageSource for WsSubscription {
    async fn next(&mut self) -> Option<AgentMessage> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                    Ok(message) => return Some(message),
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping unparseable broker frame");
                    }
                },
                Ok(WsMessage::Ping(payload)) => {
                    if self.stream.send(WsMessage::Pong(payload)).await.is_err() {
                        return None;
                    }
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Broker read error, closing subscription");
                    return None;
                }
            }
        }
    }
}
