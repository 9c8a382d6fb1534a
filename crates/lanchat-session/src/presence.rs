//! Presence table and the two presence backends that feed it.

use std::collections::HashMap;
use std::time::Duration;

use lanchat_shared::protocol::{
    Announcement, Beacon, BeaconDeparture, DeviceEntry, Hello, WireFrame,
};
use lanchat_shared::{PeerId, Timestamp};
use serde::Serialize;
use tracing::debug;

use crate::config::{BackendKind, SessionConfig};
use crate::identity::LocalIdentity;

/// What the session knows about one remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub id: PeerId,
    pub name: String,
    pub last_seen: Timestamp,
}

impl PeerRecord {
    /// Derived: a peer is online while it has been heard from recently.
    pub fn is_online(&self, now: Timestamp, staleness_ms: i64) -> bool {
        now - self.last_seen <= staleness_ms
    }
}

/// Remote peers keyed by id. Never contains the local peer.
#[derive(Debug)]
pub struct PresenceTable {
    self_id: PeerId,
    staleness_ms: i64,
    peers: HashMap<PeerId, PeerRecord>,
}

impl PresenceTable {
    pub fn new(self_id: PeerId, staleness_ms: i64) -> Self {
        Self {
            self_id,
            staleness_ms,
            peers: HashMap::new(),
        }
    }

    /// Insert or refresh a peer. Returns `false` when the signal was about us.
    pub fn observe(&mut self, id: &PeerId, name: &str, seen_at: Timestamp) -> bool {
        if *id == self.self_id {
            return false;
        }
        match self.peers.get_mut(id) {
            Some(record) => {
                record.name = name.to_string();
                record.last_seen = record.last_seen.max(seen_at);
            }
            None => {
                debug!(peer = %id.short(), name, "Peer appeared");
                self.peers.insert(
                    id.clone(),
                    PeerRecord {
                        id: id.clone(),
                        name: name.to_string(),
                        last_seen: seen_at,
                    },
                );
            }
        }
        true
    }

    /// Apply a name change, but only for a peer already in the table.
    pub fn rename_existing(&mut self, id: &PeerId, name: &str, seen_at: Timestamp) -> bool {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.name = name.to_string();
                record.last_seen = record.last_seen.max(seen_at);
                true
            }
            None => false,
        }
    }

    /// Replace the whole table with a relay snapshot received at `received_at`.
    ///
    /// Peers present both before and after keep a non-decreasing `last_seen`.
    pub fn replace_snapshot(&mut self, devices: &[DeviceEntry], received_at: Timestamp) {
        let mut next = HashMap::with_capacity(devices.len());
        for device in devices {
            if device.id == self.self_id {
                continue;
            }
            let last_seen = self
                .peers
                .get(&device.id)
                .map(|prior| prior.last_seen.max(received_at))
                .unwrap_or(received_at);
            next.insert(
                device.id.clone(),
                PeerRecord {
                    id: device.id.clone(),
                    name: device.name.clone(),
                    last_seen,
                },
            );
        }
        self.peers = next;
    }

    pub fn depart(&mut self, id: &PeerId) -> bool {
        let removed = self.peers.remove(id).is_some();
        if removed {
            debug!(peer = %id.short(), "Peer departed");
        }
        removed
    }

    /// Drop every peer silent for longer than the staleness threshold.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|record| !record.is_online(now, self.staleness_ms))
            .map(|record| record.id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
            debug!(peer = %id.short(), "Peer timed out");
        }
        stale
    }

    /// Forget everyone. Returns whether anything was removed.
    pub fn clear(&mut self) -> bool {
        let had_peers = !self.peers.is_empty();
        self.peers.clear();
        had_peers
    }

    /// Full current set, ordered by id.
    pub fn peers(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<PeerRecord> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Peers considered online at `now`, ordered by id.
    pub fn online(&self, now: Timestamp) -> Vec<PeerRecord> {
        self.peers()
            .into_iter()
            .filter(|record| record.is_online(now, self.staleness_ms))
            .collect()
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// The frames each presence model sends for the session's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceBackend {
    /// Shared broadcast channel: periodic heartbeats, staleness is the only
    /// implicit offline signal.
    LocalBeacon,
    /// Central relay: announces itself once and gets snapshots back.
    Relay,
}

impl From<BackendKind> for PresenceBackend {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Relay => PresenceBackend::Relay,
            BackendKind::Beacon => PresenceBackend::LocalBeacon,
        }
    }
}

impl PresenceBackend {
    /// Sent right after every successful open.
    pub fn hello(&self, me: &LocalIdentity, now: Timestamp) -> WireFrame {
        match self {
            PresenceBackend::LocalBeacon => beacon(me, now),
            PresenceBackend::Relay => WireFrame::Init(Hello {
                id: me.id.clone(),
                name: me.name.clone(),
            }),
        }
    }

    pub fn rename(&self, me: &LocalIdentity, now: Timestamp) -> WireFrame {
        match self {
            PresenceBackend::LocalBeacon => WireFrame::UserUpdate(Beacon {
                user_id: me.id.clone(),
                user_name: me.name.clone(),
                timestamp: now,
            }),
            PresenceBackend::Relay => WireFrame::UpdateName(Hello {
                id: me.id.clone(),
                name: me.name.clone(),
            }),
        }
    }

    pub fn departure(&self, me: &LocalIdentity, now: Timestamp) -> WireFrame {
        match self {
            PresenceBackend::LocalBeacon => WireFrame::UserOffline(BeaconDeparture {
                user_id: me.id.clone(),
                timestamp: now,
            }),
            PresenceBackend::Relay => WireFrame::Disconnect(announcement(me, now)),
        }
    }

    /// Sent on every housekeeping tick and on explicit refresh.
    pub fn refresh(&self, me: &LocalIdentity, now: Timestamp) -> WireFrame {
        match self {
            PresenceBackend::LocalBeacon => beacon(me, now),
            PresenceBackend::Relay => WireFrame::RefreshDevices(announcement(me, now)),
        }
    }

    /// Housekeeping period for this backend.
    pub fn tick_interval(&self, config: &SessionConfig) -> Duration {
        match self {
            PresenceBackend::LocalBeacon => config.heartbeat_interval,
            PresenceBackend::Relay => config.device_refresh_interval,
        }
    }
}

fn beacon(me: &LocalIdentity, now: Timestamp) -> WireFrame {
    WireFrame::Heartbeat(Beacon {
        user_id: me.id.clone(),
        user_name: me.name.clone(),
        timestamp: now,
    })
}

fn announcement(me: &LocalIdentity, now: Timestamp) -> Announcement {
    Announcement {
        id: me.id.clone(),
        name: me.name.clone(),
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    fn entry(id: &str, name: &str) -> DeviceEntry {
        DeviceEntry {
            id: peer(id),
            name: name.into(),
            last_seen: 0,
        }
    }

    #[test]
    fn test_observe_ignores_self_and_dedups() {
        let mut table = PresenceTable::new(peer("me"), 10_000);
        assert!(!table.observe(&peer("me"), "Me", 1));
        assert!(table.observe(&peer("a"), "Alice", 1));
        assert!(table.observe(&peer("a"), "Alice2", 2));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&peer("a")).unwrap().name, "Alice2");
    }

    #[test]
    fn test_last_seen_never_decreases() {
        let mut table = PresenceTable::new(peer("me"), 10_000);
        table.observe(&peer("a"), "Alice", 500);
        table.observe(&peer("a"), "Alice", 100);
        assert_eq!(table.get(&peer("a")).unwrap().last_seen, 500);

        table.replace_snapshot(&[entry("a", "Alice")], 300);
        assert_eq!(table.get(&peer("a")).unwrap().last_seen, 500);
    }

    #[test]
    fn test_rename_only_applies_to_known_peers() {
        let mut table = PresenceTable::new(peer("me"), 10_000);
        assert!(!table.rename_existing(&peer("a"), "Alice", 1));
        assert!(table.is_empty());

        table.observe(&peer("a"), "Alice", 1);
        assert!(table.rename_existing(&peer("a"), "Alicia", 2));
        assert_eq!(table.get(&peer("a")).unwrap().name, "Alicia");
    }

    #[test]
    fn test_snapshot_replaces_table_and_skips_self() {
        let mut table = PresenceTable::new(peer("me"), 10_000);
        table.observe(&peer("old"), "Old", 1);

        table.replace_snapshot(&[entry("me", "Me"), entry("b", "Bob"), entry("c", "Carol")], 50);
        let ids: Vec<_> = table.peers().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![peer("b"), peer("c")]);
        assert_eq!(table.get(&peer("b")).unwrap().last_seen, 50);
    }

    #[test]
    fn test_sweep_removes_stale_peers() {
        let mut table = PresenceTable::new(peer("me"), 10_000);
        table.observe(&peer("a"), "Alice", 0);
        table.observe(&peer("b"), "Bob", 5_000);

        assert!(table.sweep(10_000).is_empty());
        assert_eq!(table.sweep(10_001), vec![peer("a")]);
        assert_eq!(table.online(10_001).len(), 1);
        assert!(table.online(15_001).is_empty());
    }

    #[test]
    fn test_depart_and_clear() {
        let mut table = PresenceTable::new(peer("me"), 10_000);
        table.observe(&peer("a"), "Alice", 0);
        assert!(table.depart(&peer("a")));
        assert!(!table.depart(&peer("a")));

        table.observe(&peer("b"), "Bob", 0);
        assert!(table.clear());
        assert!(!table.clear());
    }

    #[test]
    fn test_backend_frames() {
        let me = LocalIdentity {
            id: peer("me"),
            name: "Me".into(),
        };
        let relay = PresenceBackend::Relay;
        assert_eq!(relay.hello(&me, 1).kind(), "init");
        assert_eq!(relay.rename(&me, 1).kind(), "update-name");
        assert_eq!(relay.departure(&me, 1).kind(), "disconnect");
        assert_eq!(relay.refresh(&me, 1).kind(), "refresh-devices");

        let beacon = PresenceBackend::LocalBeacon;
        assert_eq!(beacon.hello(&me, 1).kind(), "heartbeat");
        assert_eq!(beacon.rename(&me, 1).kind(), "user-update");
        assert_eq!(beacon.departure(&me, 1).kind(), "user-offline");
        assert_eq!(beacon.refresh(&me, 1).kind(), "heartbeat");

        let config = SessionConfig::default();
        assert_eq!(beacon.tick_interval(&config), config.heartbeat_interval);
        assert_eq!(relay.tick_interval(&config), config.device_refresh_interval);
    }
}
