//! Outgoing frame composition and inbound frame classification.

use lanchat_shared::protocol::{ChatFrame, DeviceEntry, FrameKind, ReceiptFrame, WireFrame};
use lanchat_shared::{FileHandle, MessageId, PeerId, Timestamp};

use crate::identity::LocalIdentity;

/// What an inbound frame means to this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Full relay device list.
    PresenceSnapshot(Vec<DeviceEntry>),
    /// A peer announcing it is alive.
    PresenceBeacon { id: PeerId, name: String },
    /// A peer changed its display name.
    PresenceRename { id: PeerId, name: String },
    /// A peer is leaving.
    PresenceDeparture(PeerId),
    Chat(ChatFrame),
    ReadReceipt(ReceiptFrame),
    /// Nothing to do, with the reason for the log.
    Ignored(&'static str),
}

pub fn compose_chat(
    me: &LocalIdentity,
    content: &str,
    receiver: Option<&PeerId>,
    now: Timestamp,
) -> ChatFrame {
    ChatFrame {
        id: MessageId::generate(),
        sender_id: me.id.clone(),
        sender_name: me.name.clone(),
        content: content.to_string(),
        timestamp: now,
        receiver_id: receiver.cloned(),
        message_type: Some(FrameKind::Text),
        file_name: None,
        file_size: None,
        file_id: None,
    }
}

pub fn compose_file(
    me: &LocalIdentity,
    file_name: &str,
    file_size: u64,
    handle: FileHandle,
    receiver: Option<&PeerId>,
    now: Timestamp,
) -> ChatFrame {
    ChatFrame {
        id: MessageId::generate(),
        sender_id: me.id.clone(),
        sender_name: me.name.clone(),
        content: String::new(),
        timestamp: now,
        receiver_id: receiver.cloned(),
        message_type: Some(FrameKind::File),
        file_name: Some(file_name.to_string()),
        file_size: Some(file_size),
        file_id: Some(handle),
    }
}

/// Receipt for `message_id`. `sender_id` is us, the reader; `receiver_id`
/// is the message's author.
pub fn compose_receipt(
    reader: &PeerId,
    message_id: &MessageId,
    author: &PeerId,
    now: Timestamp,
) -> ReceiptFrame {
    ReceiptFrame {
        message_id: message_id.clone(),
        sender_id: reader.clone(),
        receiver_id: author.clone(),
        timestamp: now,
    }
}

/// Decide what an inbound frame means for the session whose id is `me`.
///
/// Directed traffic for someone else is dropped here: on the beacon channel
/// every frame reaches every peer, and relays are not trusted to filter.
/// Self-originated chat passes through; deduplication handles the echo.
pub fn classify(frame: WireFrame, me: &PeerId) -> Inbound {
    match frame {
        WireFrame::OnlineDevices(snapshot) => Inbound::PresenceSnapshot(snapshot.devices),

        WireFrame::Heartbeat(beacon) => {
            if beacon.user_id == *me {
                return Inbound::Ignored("own heartbeat");
            }
            Inbound::PresenceBeacon {
                id: beacon.user_id,
                name: beacon.user_name,
            }
        }

        WireFrame::UserUpdate(beacon) => {
            if beacon.user_id == *me {
                return Inbound::Ignored("own rename");
            }
            Inbound::PresenceRename {
                id: beacon.user_id,
                name: beacon.user_name,
            }
        }
        WireFrame::UpdateName(hello) => {
            if hello.id == *me {
                return Inbound::Ignored("own rename");
            }
            Inbound::PresenceRename {
                id: hello.id,
                name: hello.name,
            }
        }

        WireFrame::UserOffline(departure) => {
            if departure.user_id == *me {
                return Inbound::Ignored("own departure");
            }
            Inbound::PresenceDeparture(departure.user_id)
        }
        WireFrame::Disconnect(announcement) => {
            if announcement.id == *me {
                return Inbound::Ignored("own departure");
            }
            Inbound::PresenceDeparture(announcement.id)
        }

        WireFrame::Message(chat) => match &chat.receiver_id {
            Some(receiver) if *receiver != *me && chat.sender_id != *me => {
                Inbound::Ignored("directed to another peer")
            }
            _ => Inbound::Chat(chat),
        },

        WireFrame::ReadReceipt(receipt) => {
            if receipt.receiver_id != *me {
                return Inbound::Ignored("receipt for another peer");
            }
            Inbound::ReadReceipt(receipt)
        }

        WireFrame::Init(_) | WireFrame::RefreshDevices(_) => {
            Inbound::Ignored("client-to-relay frame")
        }
    }
}
