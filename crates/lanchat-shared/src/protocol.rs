use serde::{Deserialize, Serialize};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;
use crate::types::{FileHandle, MessageId, PeerId, Timestamp};

/// All frames exchanged over a transport, JSON-encoded and discriminated by
/// their `type` field.
///
/// The first group is the relay protocol; the second is the LAN beacon
/// protocol, where every frame reaches every peer on the shared channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireFrame {
    /// Sent once per successful relay connection
    Init(Hello),

    /// Display name change (client to relay)
    UpdateName(Hello),

    /// Full presence snapshot from the relay; replaces the prior table
    OnlineDevices(DeviceSnapshot),

    /// Chat or file-announce message
    Message(ChatFrame),

    /// Read confirmation for a directed message
    ReadReceipt(ReceiptFrame),

    /// Best-effort departure notice (client to relay)
    Disconnect(Announcement),

    /// Explicit presence re-query (client to relay)
    RefreshDevices(Announcement),

    /// Periodic presence announcement on the beacon channel
    Heartbeat(Beacon),

    /// Display name change on the beacon channel
    UserUpdate(Beacon),

    /// Departure notice on the beacon channel
    UserOffline(BeaconDeparture),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub id: PeerId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    pub id: PeerId,
    pub name: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub id: PeerId,
    pub name: String,
    #[serde(default)]
    pub last_seen: Timestamp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Text,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub id: MessageId,
    pub sender_id: PeerId,
    pub sender_name: String,
    #[serde(default)]
    pub content: String,
    pub timestamp: Timestamp,
    /// `None` means broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<FrameKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileHandle>,
}

/// Read confirmation.
///
/// Note the inversion: `sender_id` is the peer who *read* the message and
/// `receiver_id` is the peer who originally sent it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptFrame {
    pub message_id: MessageId,
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    pub user_id: PeerId,
    pub user_name: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BeaconDeparture {
    pub user_id: PeerId,
    pub timestamp: Timestamp,
}

impl WireFrame {
    /// Serialize to the JSON text carried by the transport.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and validate one inbound frame.
    ///
    /// Oversized input, unknown `type` values, missing required fields and
    /// empty identifiers are all rejected.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let frame: WireFrame = serde_json::from_str(text)?;
        frame.validate()?;
        Ok(frame)
    }

    /// Wire name of the frame type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireFrame::Init(_) => "init",
            WireFrame::UpdateName(_) => "update-name",
            WireFrame::OnlineDevices(_) => "online-devices",
            WireFrame::Message(_) => "message",
            WireFrame::ReadReceipt(_) => "read-receipt",
            WireFrame::Disconnect(_) => "disconnect",
            WireFrame::RefreshDevices(_) => "refresh-devices",
            WireFrame::Heartbeat(_) => "heartbeat",
            WireFrame::UserUpdate(_) => "user-update",
            WireFrame::UserOffline(_) => "user-offline",
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let empty = |s: &str, what: &str| {
            if s.trim().is_empty() {
                Err(ProtocolError::Invalid(format!("empty {what}")))
            } else {
                Ok(())
            }
        };

        match self {
            WireFrame::Init(h) | WireFrame::UpdateName(h) => empty(h.id.as_str(), "id"),
            WireFrame::Disconnect(a) | WireFrame::RefreshDevices(a) => empty(a.id.as_str(), "id"),
            WireFrame::OnlineDevices(snapshot) => snapshot
                .devices
                .iter()
                .try_for_each(|d| empty(d.id.as_str(), "device id")),
            WireFrame::Message(chat) => {
                empty(chat.id.as_str(), "message id")?;
                empty(chat.sender_id.as_str(), "sender id")?;
                if chat.message_type == Some(FrameKind::File) && chat.file_name.is_none() {
                    return Err(ProtocolError::Invalid("file message without name".into()));
                }
                Ok(())
            }
            WireFrame::ReadReceipt(r) => {
                empty(r.message_id.as_str(), "message id")?;
                empty(r.sender_id.as_str(), "sender id")?;
                empty(r.receiver_id.as_str(), "receiver id")
            }
            WireFrame::Heartbeat(b) | WireFrame::UserUpdate(b) => empty(b.user_id.as_str(), "user id"),
            WireFrame::UserOffline(d) => empty(d.user_id.as_str(), "user id"),
        }
    }
}
