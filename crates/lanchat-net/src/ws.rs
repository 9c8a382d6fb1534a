//! WebSocket connector for the relay server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::link::{Connector, Link, LinkEvent, LINK_QUEUE_CAPACITY};

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, NetError> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "WebSocket connected");

        let (mut write, mut read) = stream.split();
        let (link, peer) = Link::pair(LINK_QUEUE_CAPACITY);
        let mut outbound = peer.outbound;
        let events = peer.events;

        // Writer: drain queued frames, then close once the link owner drops.
        tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
        });

        // Reader
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => LinkEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => LinkEvent::Frame(text),
                        Err(_) => {
                            debug!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        reason = frame
                            .map(|f| f.reason.into_owned())
                            .filter(|r| !r.is_empty());
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events.send(LinkEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events.send(LinkEvent::Closed(reason)).await;
        });

        Ok(link)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
