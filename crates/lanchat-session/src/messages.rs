//! Session message log: deduplication, receipt correlation and unread
//! accounting.

use std::collections::{BTreeMap, HashSet};

use lanchat_shared::protocol::{ChatFrame, FrameKind, ReceiptFrame};
use lanchat_shared::{FileHandle, MessageId, PeerId, Timestamp};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttachment {
    pub name: String,
    pub size: u64,
    pub handle: Option<FileHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: PeerId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: Timestamp,
    pub kind: MessageKind,
    pub file: Option<FileAttachment>,
    /// `None` means broadcast
    pub receiver_id: Option<PeerId>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
}

impl From<ChatFrame> for ChatMessage {
    fn from(frame: ChatFrame) -> Self {
        let kind = match frame.message_type {
            Some(FrameKind::File) => MessageKind::File,
            _ => MessageKind::Text,
        };
        let file = match kind {
            MessageKind::File => Some(FileAttachment {
                name: frame.file_name.unwrap_or_default(),
                size: frame.file_size.unwrap_or(0),
                handle: frame.file_id,
            }),
            MessageKind::Text => None,
        };
        Self {
            id: frame.id,
            sender_id: frame.sender_id,
            sender_name: frame.sender_name,
            content: frame.content,
            timestamp: frame.timestamp,
            kind,
            file,
            receiver_id: frame.receiver_id,
            is_read: false,
            read_at: None,
        }
    }
}

impl ChatMessage {
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_none()
    }

    /// Whether this message belongs in `conversation` as seen by `me`.
    /// `None` is the broadcast room.
    pub fn visible_in(&self, me: &PeerId, conversation: Option<&PeerId>) -> bool {
        match (conversation, &self.receiver_id) {
            (None, None) => true,
            (Some(peer), Some(receiver)) => {
                (self.sender_id == *me && receiver == peer)
                    || (self.sender_id == *peer && receiver == me)
            }
            _ => false,
        }
    }
}

/// Outcome of offering an inbound chat frame to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    Inserted(ChatMessage),
    Duplicate,
    SelfEcho,
}

/// Unread inbound messages, derived from the full log on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnreadCounts {
    pub broadcast: usize,
    pub by_peer: BTreeMap<PeerId, usize>,
}

impl UnreadCounts {
    pub fn total(&self) -> usize {
        self.broadcast + self.by_peer.values().sum::<usize>()
    }

    pub fn for_peer(&self, peer: &PeerId) -> usize {
        self.by_peer.get(peer).copied().unwrap_or(0)
    }
}

/// Every message of the current session, in arrival order.
#[derive(Debug)]
pub struct MessageLog {
    me: PeerId,
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
}

impl MessageLog {
    pub fn new(me: PeerId) -> Self {
        Self {
            me,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Store a message we just sent.
    pub fn record_outgoing(&mut self, message: ChatMessage) {
        if self.seen.insert(message.id.clone()) {
            self.messages.push(message);
        }
    }

    pub fn ingest(&mut self, frame: ChatFrame) -> Ingest {
        if frame.sender_id == self.me {
            debug!(id = %frame.id, "Dropping echo of own message");
            return Ingest::SelfEcho;
        }
        if self.seen.contains(&frame.id) {
            debug!(id = %frame.id, "Dropping duplicate message");
            return Ingest::Duplicate;
        }

        let message = ChatMessage::from(frame);
        self.seen.insert(message.id.clone());
        self.messages.push(message.clone());
        Ingest::Inserted(message)
    }

    /// Mark one of our directed messages as read by its receiver.
    ///
    /// Returns the updated message, or `None` when nothing matched.
    pub fn apply_receipt(&mut self, receipt: &ReceiptFrame) -> Option<ChatMessage> {
        let me = &self.me;
        let message = self.messages.iter_mut().find(|m| {
            m.id == receipt.message_id
                && m.sender_id == *me
                && m.receiver_id.as_ref() == Some(&receipt.sender_id)
        })?;

        if message.is_read {
            return None;
        }
        message.is_read = true;
        message.read_at = Some(receipt.timestamp);
        Some(message.clone())
    }

    /// Mark every unread inbound message of `conversation` as read.
    ///
    /// Returns the messages that changed.
    pub fn mark_read(&mut self, conversation: Option<&PeerId>, now: Timestamp) -> Vec<ChatMessage> {
        let me = &self.me;
        self.messages
            .iter_mut()
            .filter(|m| m.sender_id != *me && !m.is_read && m.visible_in(me, conversation))
            .map(|m| {
                m.is_read = true;
                m.read_at = Some(now);
                m.clone()
            })
            .collect()
    }

    pub fn unread_counts(&self) -> UnreadCounts {
        let mut counts = UnreadCounts::default();
        for message in self
            .messages
            .iter()
            .filter(|m| m.sender_id != self.me && !m.is_read)
        {
            match &message.receiver_id {
                None => counts.broadcast += 1,
                Some(_) => *counts.by_peer.entry(message.sender_id.clone()).or_default() += 1,
            }
        }
        counts
    }

    pub fn conversation(&self, conversation: Option<&PeerId>) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.visible_in(&self.me, conversation))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == *id)
    }

    pub fn all(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compose_chat, compose_receipt};
    use crate::identity::LocalIdentity;

    fn identity(id: &str) -> LocalIdentity {
        LocalIdentity {
            id: PeerId::from(id),
            name: id.to_uppercase(),
        }
    }

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    #[test]
    fn test_duplicate_frame_is_stored_once() {
        let mut log = MessageLog::new(peer("b"));
        let frame = compose_chat(&identity("a"), "hi", None, 1);

        assert!(matches!(log.ingest(frame.clone()), Ingest::Inserted(_)));
        assert_eq!(log.ingest(frame), Ingest::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_self_echo_is_dropped() {
        let mut log = MessageLog::new(peer("a"));
        let frame = compose_chat(&identity("a"), "hi", None, 1);
        log.record_outgoing(ChatMessage::from(frame.clone()));

        assert_eq!(log.ingest(frame), Ingest::SelfEcho);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_receipt_marks_matching_outgoing_message() {
        let mut log = MessageLog::new(peer("a"));
        let frame = compose_chat(&identity("a"), "secret", Some(&peer("b")), 1);
        let id = frame.id.clone();
        log.record_outgoing(ChatMessage::from(frame));

        let from_c = compose_receipt(&peer("c"), &id, &peer("a"), 5);
        assert_eq!(log.apply_receipt(&from_c), None);
        assert!(!log.get(&id).unwrap().is_read);

        let from_b = compose_receipt(&peer("b"), &id, &peer("a"), 9);
        let updated = log.apply_receipt(&from_b).unwrap();
        assert!(updated.is_read);
        assert_eq!(updated.read_at, Some(9));

        // A second receipt changes nothing.
        assert_eq!(log.apply_receipt(&from_b), None);
        assert_eq!(log.get(&id).unwrap().read_at, Some(9));
    }

    #[test]
    fn test_receipt_for_unknown_message_is_noop() {
        let mut log = MessageLog::new(peer("a"));
        log.record_outgoing(ChatMessage::from(compose_chat(
            &identity("a"),
            "x",
            Some(&peer("b")),
            1,
        )));
        let before = log.all().to_vec();

        let receipt = compose_receipt(&peer("b"), &MessageId::from("nope"), &peer("a"), 2);
        assert_eq!(log.apply_receipt(&receipt), None);
        assert_eq!(log.all(), before.as_slice());
    }

    #[test]
    fn test_receipt_never_touches_inbound_messages() {
        let mut log = MessageLog::new(peer("a"));
        let frame = compose_chat(&identity("b"), "x", Some(&peer("a")), 1);
        let id = frame.id.clone();
        log.ingest(frame);

        let receipt = compose_receipt(&peer("b"), &id, &peer("a"), 2);
        assert_eq!(log.apply_receipt(&receipt), None);
    }

    #[test]
    fn test_unread_counts_and_mark_read() {
        let mut log = MessageLog::new(peer("me"));
        log.ingest(compose_chat(&identity("a"), "1", None, 1));
        log.ingest(compose_chat(&identity("a"), "2", Some(&peer("me")), 2));
        log.ingest(compose_chat(&identity("a"), "3", Some(&peer("me")), 3));
        log.ingest(compose_chat(&identity("b"), "4", Some(&peer("me")), 4));
        log.record_outgoing(ChatMessage::from(compose_chat(&identity("me"), "5", None, 5)));

        let counts = log.unread_counts();
        assert_eq!(counts.broadcast, 1);
        assert_eq!(counts.for_peer(&peer("a")), 2);
        assert_eq!(counts.for_peer(&peer("b")), 1);
        assert_eq!(counts.total(), 4);

        let read = log.mark_read(Some(&peer("a")), 10);
        assert_eq!(read.len(), 2);
        assert!(read.iter().all(|m| m.read_at == Some(10)));

        let counts = log.unread_counts();
        assert_eq!(counts.for_peer(&peer("a")), 0);
        assert_eq!(counts.total(), 2);

        assert!(log.mark_read(Some(&peer("a")), 11).is_empty());
    }

    #[test]
    fn test_conversation_visibility() {
        let mut log = MessageLog::new(peer("me"));
        log.ingest(compose_chat(&identity("a"), "room", None, 1));
        log.ingest(compose_chat(&identity("a"), "dm", Some(&peer("me")), 2));
        log.record_outgoing(ChatMessage::from(compose_chat(
            &identity("me"),
            "reply",
            Some(&peer("a")),
            3,
        )));
        log.record_outgoing(ChatMessage::from(compose_chat(
            &identity("me"),
            "other",
            Some(&peer("b")),
            4,
        )));

        let room: Vec<_> = log.conversation(None).into_iter().map(|m| m.content).collect();
        assert_eq!(room, vec!["room"]);

        let with_a: Vec<_> = log
            .conversation(Some(&peer("a")))
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(with_a, vec!["dm", "reply"]);
    }
}
