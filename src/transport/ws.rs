//! WebSocket connector
//!
//! Opens `{server_url}/ws/training/{session_id}` with a bearer token and
//! exchanges JSON text frames.

use super::client::TransportClient;
use super::traits::{Channel, ChannelError, ConnectError, Connector};
use crate::config::SessionConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport
pub type WsTransport = TransportClient<WsConnector>;

impl WsTransport {
    pub fn from_config(config: &SessionConfig) -> Self {
        TransportClient::new(WsConnector::new(&config.server_url), config)
    }
}

pub struct WsConnector {
    server_url: String,
}

impl WsConnector {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    pub fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/ws/training/{session_id}",
            self.server_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        session_id: &str,
        auth_token: &str,
    ) -> Result<Box<dyn Channel>, ConnectError> {
        let url = self.session_url(session_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Unreachable(format!("Invalid session URL {url}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {auth_token}")).map_err(|_| {
            ConnectError::Unauthorized("Token is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        tracing::debug!(url = %url, "Opening WebSocket");
        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => Ok(Box::new(WsChannel { stream })),
            Err(WsError::Http(response)) if matches!(response.status().as_u16(), 401 | 403) => {
                Err(ConnectError::Unauthorized(format!(
                    "Upgrade refused with HTTP {}",
                    response.status()
                )))
            }
            Err(e) => Err(ConnectError::Unreachable(e.to_string())),
        }
    }
}

struct WsChannel {
    stream: WsStream,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| ChannelError(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Server closed the WebSocket");
                    return None;
                }
                // Control and binary frames carry nothing for us
                Ok(_) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(ChannelError(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error closing WebSocket");
        }
    }
}
