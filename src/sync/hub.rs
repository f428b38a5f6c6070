//! In-process stand-in for the synchronisation server.
//!
//! The hub owns the canonical copy of every document and presence channel.
//! Clients talk to it through direct calls; everything flowing back to a
//! client goes through that client's inbox and is applied asynchronously by
//! its pump task, so replicas lag the hub exactly like remote peers would.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::SyncError,
    sync::{
        ClientId, ConnectionId,
        awareness::{AwarenessEntry, RawEntries},
        clock::ServerClock,
        key::StoreKey,
        patch::{self, Write},
    },
};

pub type SharedHub = Arc<SyncHub>;

/// Messages fanned out from the hub to connected clients.
#[derive(Debug, Clone)]
pub enum HubMessage {
    /// Leaf writes committed to a document, stamped with its sequence number.
    Patch {
        key: StoreKey,
        seq: u64,
        writes: Arc<[Write]>,
    },
    /// The set of connections joined to a document changed.
    Members {
        key: StoreKey,
        members: BTreeMap<ConnectionId, ClientId>,
    },
    /// Full presence state of an awareness channel.
    Presence { name: String, entries: RawEntries },
}

type Inbox = mpsc::UnboundedSender<HubMessage>;

struct Member {
    client_id: ClientId,
    inbox: Inbox,
}

struct Room {
    value: Value,
    seq: u64,
    members: BTreeMap<ConnectionId, Member>,
}

impl Room {
    fn member_ids(&self) -> BTreeMap<ConnectionId, ClientId> {
        self.members
            .iter()
            .map(|(id, member)| (id.clone(), member.client_id.clone()))
            .collect()
    }

    fn broadcast(&self, message: HubMessage) {
        for member in self.members.values() {
            let _ = member.inbox.send(message.clone());
        }
    }

    fn broadcast_members(&self, key: &StoreKey) {
        self.broadcast(HubMessage::Members {
            key: key.clone(),
            members: self.member_ids(),
        });
    }
}

#[derive(Default)]
struct PresenceRoom {
    entries: RawEntries,
    watchers: BTreeMap<ConnectionId, Inbox>,
}

impl PresenceRoom {
    fn broadcast(&self, name: &str) {
        for inbox in self.watchers.values() {
            let _ = inbox.send(HubMessage::Presence {
                name: name.to_string(),
                entries: self.entries.clone(),
            });
        }
    }
}

struct Connection {
    client_id: ClientId,
    inbox: Inbox,
}

/// Canonical state shared by every connected client.
pub struct SyncHub {
    rooms: DashMap<StoreKey, Room>,
    presence: DashMap<String, PresenceRoom>,
    connections: DashMap<ConnectionId, Connection>,
    clock: ServerClock,
}

impl SyncHub {
    /// Hub driven by the system clock.
    pub fn new() -> SharedHub {
        Self::with_clock(ServerClock::system())
    }

    /// Hub driven by the provided clock.
    pub fn with_clock(clock: ServerClock) -> SharedHub {
        Arc::new(Self {
            rooms: DashMap::new(),
            presence: DashMap::new(),
            connections: DashMap::new(),
            clock,
        })
    }

    /// Authoritative server time in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Canonical value and sequence number of a document, if it exists.
    pub fn document(&self, key: &StoreKey) -> Option<(Value, u64)> {
        self.rooms
            .get(key)
            .map(|room| (room.value.clone(), room.seq))
    }

    /// Connection ids currently present on an awareness channel.
    pub fn presence_connection_ids(&self, name: &str) -> BTreeSet<ConnectionId> {
        self.presence
            .get(name)
            .map(|room| room.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn register(
        &self,
        client_id: &ClientId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<HubMessage>) {
        let connection_id = Uuid::new_v4().simple().to_string();
        let (inbox, receiver) = mpsc::unbounded_channel();
        self.connections.insert(
            connection_id.clone(),
            Connection {
                client_id: client_id.clone(),
                inbox,
            },
        );
        info!(%client_id, %connection_id, "connection opened");
        (connection_id, receiver)
    }

    fn connection(&self, connection_id: &ConnectionId) -> Result<(ClientId, Inbox), SyncError> {
        self.connections
            .get(connection_id)
            .map(|connection| (connection.client_id.clone(), connection.inbox.clone()))
            .ok_or(SyncError::Disconnected)
    }

    /// Join a document, creating it from `initial` when nobody referenced it before.
    pub(crate) fn join_store(
        &self,
        connection_id: &ConnectionId,
        key: &StoreKey,
        initial: Value,
    ) -> Result<(Value, u64), SyncError> {
        let (client_id, inbox) = self.connection(connection_id)?;
        let snapshot = {
            let mut room = self.rooms.entry(key.clone()).or_insert_with(|| {
                debug!(store = %key, "creating document from first joiner");
                Room {
                    value: initial,
                    seq: 0,
                    members: BTreeMap::new(),
                }
            });
            room.members
                .insert(connection_id.clone(), Member { client_id, inbox });
            room.broadcast_members(key);
            (room.value.clone(), room.seq)
        };

        // A disconnect racing this join may have swept the rooms already.
        if !self.connections.contains_key(connection_id) {
            self.leave_store(connection_id, key);
            return Err(SyncError::Disconnected);
        }

        debug!(store = %key, %connection_id, seq = snapshot.1, "joined store");
        Ok(snapshot)
    }

    pub(crate) fn leave_store(&self, connection_id: &ConnectionId, key: &StoreKey) {
        if let Some(mut room) = self.rooms.get_mut(key) {
            if room.members.remove(connection_id).is_some() {
                room.broadcast_members(key);
                debug!(store = %key, %connection_id, "left store");
            }
        }
    }

    /// Whether `connection_id` is currently joined to `key`.
    pub(crate) fn is_member(&self, connection_id: &ConnectionId, key: &StoreKey) -> bool {
        self.rooms
            .get(key)
            .is_some_and(|room| room.members.contains_key(connection_id))
    }

    /// Commit writes to the canonical document and relay them to every member,
    /// the author included, in sequence order.
    pub(crate) fn submit(
        &self,
        connection_id: &ConnectionId,
        key: &StoreKey,
        writes: Vec<Write>,
    ) -> Result<u64, SyncError> {
        let mut room = self
            .rooms
            .get_mut(key)
            .ok_or_else(|| SyncError::not_joined(key))?;
        if !room.members.contains_key(connection_id) {
            return Err(SyncError::not_joined(key));
        }

        patch::apply(&mut room.value, &writes);
        room.seq += 1;
        let seq = room.seq;
        room.broadcast(HubMessage::Patch {
            key: key.clone(),
            seq,
            writes: writes.into(),
        });
        Ok(seq)
    }

    pub(crate) fn join_presence(
        &self,
        connection_id: &ConnectionId,
        name: &str,
        data: Value,
    ) -> Result<RawEntries, SyncError> {
        let (client_id, inbox) = self.connection(connection_id)?;
        let last_ping = self.now();
        let entries = {
            let mut room = self.presence.entry(name.to_string()).or_default();
            room.entries.insert(
                connection_id.clone(),
                AwarenessEntry {
                    client_id,
                    data,
                    last_ping,
                },
            );
            room.watchers.insert(connection_id.clone(), inbox);
            room.broadcast(name);
            room.entries.clone()
        };

        if !self.connections.contains_key(connection_id) {
            self.leave_presence(connection_id, name);
            return Err(SyncError::Disconnected);
        }

        debug!(awareness = %name, %connection_id, "joined awareness");
        Ok(entries)
    }

    /// Overwrite the caller's presence data. Last write wins, no ordering promises.
    pub(crate) fn set_presence(
        &self,
        connection_id: &ConnectionId,
        name: &str,
        data: Value,
    ) -> Result<(), SyncError> {
        let last_ping = self.now();
        let mut room = self
            .presence
            .get_mut(name)
            .ok_or_else(|| SyncError::not_joined(name))?;
        let Some(entry) = room.entries.get_mut(connection_id) else {
            return Err(SyncError::not_joined(name));
        };
        entry.data = data;
        entry.last_ping = last_ping;
        room.broadcast(name);
        Ok(())
    }

    pub(crate) fn leave_presence(&self, connection_id: &ConnectionId, name: &str) {
        if let Some(mut room) = self.presence.get_mut(name) {
            room.watchers.remove(connection_id);
            if room.entries.remove(connection_id).is_some() {
                room.broadcast(name);
            }
        }
    }

    /// Drop a connection: it leaves every store and its presence entries vanish.
    pub(crate) fn disconnect(&self, connection_id: &ConnectionId) {
        if self.connections.remove(connection_id).is_none() {
            return;
        }

        for mut room in self.rooms.iter_mut() {
            if room.members.remove(connection_id).is_some() {
                let key = room.key().clone();
                room.broadcast_members(&key);
            }
        }

        for mut room in self.presence.iter_mut() {
            room.watchers.remove(connection_id);
            if room.entries.remove(connection_id).is_some() {
                let name = room.key().clone();
                room.broadcast(&name);
            }
        }

        info!(%connection_id, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key() -> StoreKey {
        StoreKey::new("game", 1)
    }

    #[test]
    fn first_joiner_seeds_the_document() {
        let hub = SyncHub::new();
        let (a, _rx_a) = hub.register(&"client-a".to_string());
        let (b, _rx_b) = hub.register(&"client-b".to_string());

        let (value, seq) = hub.join_store(&a, &key(), json!({"started": false})).unwrap();
        assert_eq!((value, seq), (json!({"started": false}), 0));

        let (value, _) = hub.join_store(&b, &key(), json!({"started": true})).unwrap();
        assert_eq!(value, json!({"started": false}));
    }

    #[test]
    fn submit_requires_membership() {
        let hub = SyncHub::new();
        let (a, _rx) = hub.register(&"client-a".to_string());
        let err = hub.submit(&a, &key(), vec![]).unwrap_err();
        assert!(matches!(err, SyncError::NotJoined { .. }));
    }

    #[tokio::test]
    async fn patches_reach_every_member_in_order() {
        let hub = SyncHub::new();
        let (a, mut rx_a) = hub.register(&"client-a".to_string());
        let (b, mut rx_b) = hub.register(&"client-b".to_string());
        hub.join_store(&a, &key(), json!({"n": 0})).unwrap();
        hub.join_store(&b, &key(), json!({"n": 0})).unwrap();

        for n in 1..=3 {
            hub.submit(
                &a,
                &key(),
                vec![Write::Set {
                    path: vec!["n".into()],
                    value: json!(n),
                }],
            )
            .unwrap();
        }

        for rx in [&mut rx_a, &mut rx_b] {
            let mut seqs = Vec::new();
            while let Ok(message) = rx.try_recv() {
                if let HubMessage::Patch { seq, .. } = message {
                    seqs.push(seq);
                }
            }
            assert_eq!(seqs, vec![1, 2, 3]);
        }
        assert_eq!(hub.document(&key()), Some((json!({"n": 3}), 3)));
    }

    #[test]
    fn disconnect_clears_presence_and_membership() {
        let hub = SyncHub::new();
        let (a, _rx_a) = hub.register(&"client-a".to_string());
        let (b, _rx_b) = hub.register(&"client-b".to_string());
        hub.join_presence(&a, "global", json!({})).unwrap();
        hub.join_presence(&b, "global", json!({})).unwrap();
        hub.join_store(&a, &key(), json!({})).unwrap();

        hub.disconnect(&a);

        assert_eq!(
            hub.presence_connection_ids("global"),
            BTreeSet::from([b.clone()])
        );
        assert!(matches!(
            hub.submit(&a, &key(), vec![]),
            Err(SyncError::NotJoined { .. })
        ));
        assert!(matches!(
            hub.join_store(&a, &key(), json!({})),
            Err(SyncError::Disconnected)
        ));
        assert_eq!(hub.connection_count(), 1);
    }
}
