//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance. Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`], and [`ComfyUIConnection::into_messages`] to
//! read it as a stream of typed messages.

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::messages::{parse_message, ComfyUIMessage};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance's WebSocket endpoint.
pub struct ComfyUIClient {
    code_name: String,
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Code name of the server this connection belongs to.
    pub code_name: String,
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// * `code_name` - server code name, used for logging.
    /// * `ws_url`    - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(code_name: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            code_name: code_name.into(),
            ws_url: ws_url.into(),
        }
    }

    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// `client_id` is appended as a query parameter so that ComfyUI
    /// addresses the messages of prompts submitted under the same ID back
    /// to this connection.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(
            backend = %self.code_name,
            client_id = %client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            code_name: self.code_name.clone(),
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

impl ComfyUIConnection {
    /// Turn the connection into a stream of parsed messages.
    ///
    /// Binary frames (previews) and unrecognized message types are
    /// skipped. The stream ends on a close frame and yields one error
    /// before ending if the socket fails.
    pub fn into_messages(self) -> BoxStream<'static, Result<ComfyUIMessage, ComfyUIClientError>> {
        let code_name = self.code_name;
        futures::stream::unfold(Some(self.ws_stream), move |state| {
            let code_name = code_name.clone();
            async move {
                let mut ws = state?;
                loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => match parse_message(&text) {
                            Ok(message) => return Some((Ok(message), Some(ws))),
                            Err(e) => {
                                tracing::trace!(
                                    backend = %code_name,
                                    error = %e,
                                    "Skipping unrecognized ComfyUI message",
                                );
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(backend = %code_name, ?frame, "ComfyUI WebSocket closed");
                            return None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(backend = %code_name, error = %e, "WebSocket receive error");
                            return Some((Err(ComfyUIClientError::Protocol(e.to_string())), None));
                        }
                        None => return None,
                    }
                }
            }
        })
        .boxed()
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
