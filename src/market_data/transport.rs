// Upstream link. The connector only sees a stream of text frames, so tests
// can substitute a scripted transport for the real websocket.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::error::ConnectorError;

/// Text frames from the upstream, ending with an error or `None` when the link
/// is gone.
pub type FrameStream = BoxStream<'static, Result<String, ConnectorError>>;

#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Opens the link and sends `subscribe` frames before returning.
    async fn connect(&self, url: &str, subscribe: &[String]) -> Result<FrameStream, ConnectorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, url: &str, subscribe: &[String]) -> Result<FrameStream, ConnectorError> {
        let (mut ws, response) = connect_async(url)
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;
        info!(%url, status = %response.status(), "upstream connected");

        for frame in subscribe {
            ws.send(Message::Text(frame.clone())).await?;
        }

        let frames = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "upstream sent close");
                    Some(Err(ConnectorError::Closed))
                }
                // tungstenite answers pings on its own
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(frames.boxed())
    }
}
