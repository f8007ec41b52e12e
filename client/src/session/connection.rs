//! WebSocket session with the device

use anyhow::{anyhow, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use webtask_shared::protocol::ClientFrame;
use webtask_shared::Outbound;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open connection to one device
pub struct DeviceSession {
    url: String,
    sink: SplitSink<WsStream, Message>,
    frames: SplitStream<WsStream>,
}

impl DeviceSession {
    /// Connect, giving up after `connect_timeout`
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let (ws, _) = timeout(connect_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| anyhow!("Connection to {} timed out", url))??;
        let (sink, frames) = ws.split();

        Ok(Self {
            url: url.to_string(),
            sink,
            frames,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&mut self, frame: &ClientFrame<'_>) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        debug!("send {}", text);
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Next device frame, or `None` once the device closes the connection
    ///
    /// Frames that are not valid device JSON are logged and skipped.
    pub async fn recv(&mut self) -> Result<Option<Outbound>> {
        while let Some(message) = self.frames.next().await {
            match message? {
                Message::Text(text) => match serde_json::from_str::<Outbound>(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(e) => warn!("Unreadable frame from device ({}): {}", e, text),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) {
        let _ = self.sink.close().await;
    }
}
