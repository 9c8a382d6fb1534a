//! Session event bus.
//!
//! Every state change the UI can observe goes out as one [`SessionEvent`]
//! on a broadcast channel. Handler-style registration spawns one listener
//! task per handler.

use lanchat_shared::ConnectionState;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::messages::{ChatMessage, UnreadCounts};
use crate::presence::PeerRecord;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Complete current peer set, never a delta.
    PresenceChanged(Vec<PeerRecord>),
    /// A new inbound message was stored.
    MessageReceived(ChatMessage),
    /// One of our messages was confirmed read, or an inbound one was read
    /// locally.
    MessageRead(ChatMessage),
    ConnectionStateChanged(ConnectionState),
    UnreadChanged(UnreadCounts),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("No session event listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` for every event `select` picks, until the bus goes away
    /// or the returned task is aborted.
    pub fn listen<T, S, H>(&self, select: S, handler: H) -> JoinHandle<()>
    where
        T: Send + 'static,
        S: Fn(SessionEvent) -> Option<T> + Send + 'static,
        H: Fn(T) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(payload) = select(event) {
                            handler(payload);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
