use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{future, stream::BoxStream, Sink, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

/// Outbound half of a connection: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
/// Inbound half: text frames until the peer goes away. An error or the end
/// of the stream both mean the connection is lost.
pub type FrameStream = BoxStream<'static, Result<String>>;

pub struct TransportConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<TransportConnection>;
}

/// WebSocket transport backed by tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<TransportConnection> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (writer, reader) = ws_stream.split();

        let sink = writer
            .sink_map_err(anyhow::Error::from)
            .with(|text: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(text))));
        let stream = reader
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "sync: server sent close frame");
                        None
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(anyhow::Error::from(err))),
                })
            })
            .boxed();

        Ok(TransportConnection {
            sink: Box::pin(sink),
            stream,
        })
    }
}
