use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::events::InvalidationEvent;

/// Events decoded from one live connection. The stream ending, or yielding
/// an error, means the connection is gone.
pub type EventStream = BoxStream<'static, Result<InvalidationEvent>>;

/// Opens one authenticated push connection.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, token: &str) -> Result<EventStream>;
}

/// WebSocket transport against `<push_url>/notifications`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: String,
}

impl WsTransport {
    pub fn new(push_url: &str) -> Self {
        Self {
            endpoint: format!("{}/notifications", push_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(&self, token: &str) -> Result<EventStream> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .with_context(|| format!("Invalid push endpoint {}", self.endpoint))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Session token is not a valid header value")?,
        );

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to {}", self.endpoint))?;
        debug!(endpoint = %self.endpoint, "Push socket open");

        let events = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => match InvalidationEvent::from_frame(&text) {
                    Ok(event) => event.map(Ok),
                    Err(err) => {
                        warn!(error = %err, "Dropping undecodable push frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(err) => Some(Err(anyhow::Error::new(err).context("Push socket error"))),
            }
        });
        Ok(events.boxed())
    }
}
