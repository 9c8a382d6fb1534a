//! LAN beacon connector: one UDP socket shared by every peer on the segment.
//!
//! Every frame sent is broadcast to `target`; every datagram received on
//! `bind` is surfaced, including our own echoes. Peers are expected to
//! filter by sender id.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::link::{Connector, Link, LinkEvent, LINK_QUEUE_CAPACITY};

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone)]
pub struct BeaconConnector {
    bind: SocketAddr,
    target: SocketAddr,
}

impl BeaconConnector {
    pub fn new(bind: SocketAddr, target: SocketAddr) -> Self {
        Self { bind, target }
    }
}

/// Bind a broadcast-capable socket that other beacon clients on this host
/// (and the next connection of this one) can bind as well.
fn bind_shared(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

#[async_trait]
impl Connector for BeaconConnector {
    async fn connect(&self) -> Result<Link, NetError> {
        let socket = Arc::new(bind_shared(self.bind)?);
        info!(bind = %self.bind, target = %self.target, "Beacon channel open");

        let (link, peer) = Link::pair(LINK_QUEUE_CAPACITY);
        let mut outbound = peer.outbound;
        let events = peer.events;

        let writer = socket.clone();
        let target = self.target;
        tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if text.len() > MAX_DATAGRAM {
                    warn!(size = text.len(), "Beacon frame too large, dropped");
                    continue;
                }
                if let Err(e) = writer.send_to(text.as_bytes(), target).await {
                    warn!(error = %e, "Beacon send failed");
                }
            }
            debug!("Beacon writer finished");
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, from)) => {
                            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                                debug!(%from, "Ignoring non-UTF-8 datagram");
                                continue;
                            };
                            if events.send(LinkEvent::Frame(text.to_string())).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = events.send(LinkEvent::Error(e.to_string())).await;
                        }
                    },
                    _ = events.closed() => return,
                }
            }
        });

        Ok(link)
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.target)
    }
}
