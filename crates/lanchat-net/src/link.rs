//! The byte-level channel every connector produces.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NetError;

/// Frames queued per direction before senders start dropping.
pub const LINK_QUEUE_CAPACITY: usize = 256;

/// Something that happened on the far side of a [`Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One text frame.
    Frame(String),
    /// A transport-level error; the link may still be usable.
    Error(String),
    /// The link is gone, with an optional reason from the remote side.
    Closed(Option<String>),
}

/// Client half of an established connection.
///
/// Dropping `outbound` asks the IO tasks to flush what is queued and shut
/// the underlying connection down.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// IO half of a [`Link`], owned by the connector's tasks.
#[derive(Debug)]
pub struct LinkPeer {
    pub events: mpsc::Sender<LinkEvent>,
    pub outbound: mpsc::Receiver<String>,
}

impl Link {
    pub fn pair(capacity: usize) -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (ev_tx, ev_rx) = mpsc::channel(capacity);
        (
            Link {
                outbound: out_tx,
                inbound: ev_rx,
            },
            LinkPeer {
                events: ev_tx,
                outbound: out_rx,
            },
        )
    }
}

/// Opens new connections of one kind.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link, NetError>;

    /// Human-readable target, for log lines.
    fn describe(&self) -> String;
}
