//! Types and wire format shared by every lanchat crate.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::WireFrame;
pub use types::{now_millis, ConnectionState, FileHandle, MessageId, PeerId, Timestamp};
