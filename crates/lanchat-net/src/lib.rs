//! Transport layer: one live connection at a time, behind a [`Connector`].
//!
//! Three connectors are provided: [`WsConnector`] for the relay,
//! [`BeaconConnector`] for the LAN broadcast channel, and the in-process
//! [`LoopbackHub`] / [`LoopbackRelay`] pair used by tests and demos. File
//! blobs travel out of band through a [`FileStore`].

pub mod beacon;
pub mod binding;
pub mod error;
pub mod files;
pub mod link;
pub mod loopback;
pub mod ws;

pub use beacon::BeaconConnector;
pub use binding::{TransportBinding, TransportEvent, TransportSignal};
pub use error::NetError;
pub use files::{FileStore, HttpFileStore, MemoryFileStore};
pub use link::{Connector, Link, LinkEvent, LinkPeer};
pub use loopback::{LoopbackHub, LoopbackRelay, RemoteEnd};
pub use ws::WsConnector;
