//! # lanchat-session
//!
//! Session layer of a local-network chat client: identity, presence,
//! reconnection, message protocol and read-receipt reconciliation.
//!
//! A [`Session`] owns exactly one transport connection (through a
//! [`lanchat_net::TransportBinding`]) and one presence table. Every state
//! change is published on an event bus as a [`SessionEvent`].

pub mod codec;
pub mod config;
pub mod events;
pub mod identity;
pub mod messages;
pub mod presence;
pub mod reconnect;
pub mod session;

mod error;

pub use config::{BackendKind, ReconnectConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use events::{EventBus, SessionEvent};
pub use identity::{IdentityStore, LocalIdentity};
pub use messages::{ChatMessage, FileAttachment, MessageKind, MessageLog, UnreadCounts};
pub use presence::{PeerRecord, PresenceBackend, PresenceTable};
pub use reconnect::ReconnectPolicy;
pub use session::Session;
