use crate::error::ChatError;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outgoing half of an established link, carrying encoded JSON frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChatError> + Send>>;

/// Incoming half of an established link. The stream ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Establishes links to the chat backend
///
/// Implementations:
/// - `WsConnector`: WebSocket via tokio-tungstenite
/// - In-memory connectors for tests
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChatError>;
}

/// WebSocket connector
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChatError> {
        info!("Connecting to chat backend at {}", url);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChatError::Connection(format!("failed to connect to {}: {}", url, e)))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| ChatError::Connection(format!("failed to send frame: {}", e)))
            .with(|text: String| futures::future::ok::<_, ChatError>(Message::Text(text)));

        let stream = read.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bin)) => {
                    warn!("Ignoring unexpected binary frame ({} bytes)", bin.len());
                    None
                }
                Ok(Message::Close(reason)) => {
                    info!("Chat backend closed the connection: {:?}", reason);
                    None
                }
                Ok(other) => {
                    debug!("Ignoring control frame: {:?}", other);
                    None
                }
                Err(e) => Some(Err(ChatError::Connection(format!(
                    "failed to read frame: {}",
                    e
                )))),
            }
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
