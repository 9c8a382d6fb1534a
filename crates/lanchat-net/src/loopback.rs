//! In-process connectors for tests and demos.
//!
//! [`LoopbackHub`] behaves like the beacon channel: every frame written by
//! any link is delivered to every live link, the writer included.
//! [`LoopbackRelay`] hands the far end of each accepted connection to the
//! caller as a [`RemoteEnd`], which then plays the relay server by hand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lanchat_shared::WireFrame;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::NetError;
use crate::link::{Connector, Link, LinkEvent, LINK_QUEUE_CAPACITY};

/// How long [`RemoteEnd`] waits for the next frame before giving up.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

const HUB_CAPACITY: usize = 1024;

struct HubInner {
    frames: broadcast::Sender<String>,
    sever: broadcast::Sender<()>,
    reachable: AtomicBool,
    live: AtomicUsize,
}

/// Shared in-memory broadcast segment.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(HUB_CAPACITY);
        let (sever, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(HubInner {
                frames,
                sever,
                reachable: AtomicBool::new(true),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// When false, new connections fail. Existing links are untouched.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop every live link as if the network went away.
    pub fn sever_all(&self) {
        let _ = self.inner.sever.send(());
    }

    pub fn live_links(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Inject a raw frame as if some other peer had sent it.
    pub fn inject(&self, text: impl Into<String>) {
        let _ = self.inner.frames.send(text.into());
    }
}

#[async_trait]
impl Connector for LoopbackHub {
    async fn connect(&self) -> Result<Link, NetError> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(NetError::Connect("loopback hub unreachable".into()));
        }

        let (link, peer) = Link::pair(LINK_QUEUE_CAPACITY);
        let mut outbound = peer.outbound;
        let events = peer.events;
        let mut frames = self.inner.frames.subscribe();
        let mut sever = self.inner.sever.subscribe();
        let inner = self.inner.clone();

        inner.live.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                // Outbound first so a parting frame is relayed before the
                // link notices its owner is gone.
                tokio::select! {
                    biased;
                    out = outbound.recv() => match out {
                        Some(text) => {
                            let _ = inner.frames.send(text);
                        }
                        None => break,
                    },
                    received = frames.recv() => match received {
                        Ok(text) => {
                            if events.send(LinkEvent::Frame(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Loopback link lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = sever.recv() => {
                        let _ = events.send(LinkEvent::Closed(Some("severed".into()))).await;
                        break;
                    }
                    _ = events.closed() => break,
                }
            }
            inner.live.fetch_sub(1, Ordering::SeqCst);
            debug!("Loopback link finished");
        });

        Ok(link)
    }

    fn describe(&self) -> String {
        "loopback-hub".into()
    }
}

struct RelayInner {
    accepted: mpsc::UnboundedSender<RemoteEnd>,
    reachable: AtomicBool,
    attempts: AtomicUsize,
}

/// Connector whose far end is driven by the caller.
#[derive(Clone)]
pub struct LoopbackRelay {
    inner: Arc<RelayInner>,
}

impl LoopbackRelay {
    /// Returns the connector and the stream of accepted remote ends, one
    /// per successful connect.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let relay = Self {
            inner: Arc::new(RelayInner {
                accepted,
                reachable: AtomicBool::new(true),
                attempts: AtomicUsize::new(0),
            }),
        };
        (relay, rx)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackRelay {
    async fn connect(&self) -> Result<Link, NetError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(NetError::Connect("loopback relay unreachable".into()));
        }

        let (link, peer) = Link::pair(LINK_QUEUE_CAPACITY);
        let remote = RemoteEnd {
            events: peer.events,
            outbound: peer.outbound,
        };
        self.inner
            .accepted
            .send(remote)
            .map_err(|_| NetError::Connect("loopback relay shut down".into()))?;
        Ok(link)
    }

    fn describe(&self) -> String {
        "loopback-relay".into()
    }
}

/// The server side of one loopback relay connection.
pub struct RemoteEnd {
    events: mpsc::Sender<LinkEvent>,
    outbound: mpsc::Receiver<String>,
}

impl RemoteEnd {
    /// Deliver a frame to the client.
    pub async fn push(&self, frame: &WireFrame) {
        match frame.encode() {
            Ok(text) => self.push_text(&text).await,
            Err(e) => warn!(error = %e, "Failed to encode loopback frame"),
        }
    }

    pub async fn push_text(&self, text: &str) {
        let _ = self.events.send(LinkEvent::Frame(text.to_string())).await;
    }

    /// Next raw frame written by the client, or `None` once the client has
    /// closed or nothing arrives in time.
    pub async fn next_text(&mut self) -> Option<String> {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next decodable frame written by the client.
    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        loop {
            let text = self.next_text().await?;
            match WireFrame::decode(&text) {
                Ok(frame) => return Some(frame),
                Err(e) => debug!(error = %e, "Skipping undecodable client frame"),
            }
        }
    }

    /// Skip client frames until one matches, returning it.
    pub async fn expect(&mut self, mut pred: impl FnMut(&WireFrame) -> bool) -> Option<WireFrame> {
        loop {
            let frame = self.next_frame().await?;
            if pred(&frame) {
                return Some(frame);
            }
        }
    }

    /// Frames already queued by the client, without waiting.
    pub fn drain(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            if let Ok(frame) = WireFrame::decode(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Hang up from the server side.
    pub async fn close(self, reason: Option<&str>) {
        let _ = self
            .events
            .send(LinkEvent::Closed(reason.map(str::to_string)))
            .await;
    }
}
