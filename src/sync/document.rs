use std::{
    any::TypeId,
    collections::{BTreeMap, BTreeSet},
    fs,
    marker::PhantomData,
    path::PathBuf,
    sync::Arc,
};

use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::{
    error::SyncError,
    sync::{
        ClientId, ConnectionId, State,
        key::StoreKey,
        patch::{self, Write},
        transaction::DocumentRef,
    },
};

/// Where a document lives.
#[derive(Debug, Clone)]
pub(crate) enum Scope {
    /// Mirrored through the hub to every joined client.
    Synced,
    /// Device-local, optionally persisted to `path`.
    Local { path: Option<PathBuf> },
}

/// The local copy of a document.
#[derive(Debug, Clone)]
pub struct Replica {
    /// Current state tree.
    pub value: Value,
    /// Sequence number of the last hub patch folded into `value`.
    pub version: u64,
}

/// Connections currently joined to a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConnections {
    /// Live connection ids.
    pub connection_ids: BTreeSet<ConnectionId>,
    /// Stable client ids behind those connections.
    pub client_ids: BTreeSet<ClientId>,
}

impl From<&BTreeMap<ConnectionId, ClientId>> for StoreConnections {
    fn from(members: &BTreeMap<ConnectionId, ClientId>) -> Self {
        Self {
            connection_ids: members.keys().cloned().collect(),
            client_ids: members.values().cloned().collect(),
        }
    }
}

pub(crate) struct DocumentInner {
    pub(crate) key: StoreKey,
    pub(crate) scope: Scope,
    pub(crate) initial: Value,
    pub(crate) type_id: TypeId,
    replica: watch::Sender<Replica>,
    joined: watch::Sender<bool>,
    members: watch::Sender<BTreeMap<ConnectionId, ClientId>>,
}

impl DocumentInner {
    pub(crate) fn new(key: StoreKey, scope: Scope, initial: Value, type_id: TypeId) -> Self {
        let (replica, _) = watch::channel(Replica {
            value: initial.clone(),
            version: 0,
        });
        let (joined, _) = watch::channel(false);
        let (members, _) = watch::channel(BTreeMap::new());
        Self {
            key,
            scope,
            initial,
            type_id,
            replica,
            joined,
            members,
        }
    }

    pub(crate) fn is_local(&self) -> bool {
        matches!(self.scope, Scope::Local { .. })
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.is_local() || *self.joined.borrow()
    }

    pub(crate) fn value(&self) -> Value {
        self.replica.borrow().value.clone()
    }

    pub(crate) fn install_snapshot(&self, value: Value, seq: u64) {
        self.replica.send_replace(Replica {
            value,
            version: seq,
        });
        self.joined.send_replace(true);
    }

    pub(crate) fn mark_left(&self) {
        self.joined.send_replace(false);
        self.members.send_replace(BTreeMap::new());
    }

    /// Fold an optimistic local write into the replica.
    pub(crate) fn apply_local(&self, writes: &[Write]) {
        self.replica
            .send_modify(|replica| patch::apply(&mut replica.value, writes));
    }

    /// Fold a hub patch into the replica, skipping anything already seen.
    pub(crate) fn apply_remote(&self, seq: u64, writes: &[Write]) -> bool {
        self.replica.send_if_modified(|replica| {
            if seq <= replica.version {
                return false;
            }
            patch::apply(&mut replica.value, writes);
            replica.version = seq;
            true
        })
    }

    pub(crate) fn set_members(&self, members: BTreeMap<ConnectionId, ClientId>) {
        self.members.send_replace(members);
    }

    pub(crate) fn persist(&self) -> Result<(), SyncError> {
        let Scope::Local { path: Some(path) } = &self.scope else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.value())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::LocalPersistence {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(path, bytes).map_err(|source| SyncError::LocalPersistence {
            path: path.clone(),
            source,
        })
    }
}

/// Typed handle to a named document.
///
/// Handles are cheap to clone and all clones observe the same replica. State
/// only changes through [`SyncClient::transact`](crate::sync::SyncClient::transact)
/// or through patches relayed by the hub.
pub struct SharedDocument<T> {
    inner: Arc<DocumentInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SharedDocument<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: State> SharedDocument<T> {
    pub(crate) fn from_inner(inner: Arc<DocumentInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DocumentInner> {
        &self.inner
    }

    pub(crate) fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.inner.clone())
    }

    pub fn key(&self) -> &StoreKey {
        &self.inner.key
    }

    /// Whether this document never leaves the device.
    pub fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    /// Whether the replica reflects a joined document. Contents of a document
    /// that is not connected are only the caller's initial value.
    pub fn is_connected(&self) -> bool {
        self.inner.is_joined()
    }

    /// Typed snapshot of the replica.
    pub fn get(&self) -> Result<T, SyncError> {
        Ok(serde_json::from_value(self.inner.value())?)
    }

    /// Sequence number of the last hub patch applied locally.
    pub fn version(&self) -> u64 {
        self.inner.replica.borrow().version
    }

    /// Raw change feed of the replica.
    pub fn changes(&self) -> watch::Receiver<Replica> {
        self.inner.replica.subscribe()
    }

    /// Stream yielding once immediately and then after every change.
    pub fn stream(&self) -> BoxStream<'static, ()> {
        WatchStream::new(self.changes()).map(|_| ()).boxed()
    }

    /// Invoke `on_change` with the new state after every change until the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, mut on_change: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut changes = self.changes();
        let key = self.inner.key.clone();
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let value = changes.borrow_and_update().value.clone();
                match serde_json::from_value::<T>(value) {
                    Ok(state) => on_change(state),
                    Err(err) => warn!(store = %key, error = %err, "dropping undecodable change"),
                }
            }
        });
        Subscription { handle }
    }

    /// Connections currently joined to this store.
    pub fn connections(&self) -> StoreConnections {
        StoreConnections::from(&*self.inner.members.borrow())
    }

    /// Change feed of the joined connections.
    pub fn connection_changes(&self) -> watch::Receiver<BTreeMap<ConnectionId, ClientId>> {
        self.inner.members.subscribe()
    }
}

/// Detaches a change callback when dropped.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Stop receiving changes.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: i64,
    }

    fn counter_doc(scope: Scope) -> SharedDocument<Counter> {
        let inner = DocumentInner::new(
            StoreKey::new("counter", 1),
            scope,
            json!({"count": 0}),
            TypeId::of::<Counter>(),
        );
        SharedDocument::from_inner(Arc::new(inner))
    }

    #[test]
    fn synced_documents_start_disconnected_and_local_ones_do_not() {
        assert!(!counter_doc(Scope::Synced).is_connected());
        assert!(counter_doc(Scope::Local { path: None }).is_connected());
    }

    #[test]
    fn stale_remote_patches_are_ignored() {
        let doc = counter_doc(Scope::Synced);
        doc.inner().install_snapshot(json!({"count": 5}), 3);

        let write = Write::Set {
            path: vec!["count".into()],
            value: json!(1),
        };
        assert!(!doc.inner().apply_remote(2, std::slice::from_ref(&write)));
        assert_eq!(doc.get().unwrap().count, 5);

        assert!(doc.inner().apply_remote(4, &[write]));
        assert_eq!(doc.get().unwrap().count, 1);
        assert_eq!(doc.version(), 4);
    }

    #[tokio::test]
    async fn subscribers_see_changes_until_dropped() {
        let doc = counter_doc(Scope::Local { path: None });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let subscription = doc.subscribe(move |state: Counter| {
            let _ = tx.send(state.count);
        });

        doc.inner().apply_local(&[Write::Set {
            path: vec!["count".into()],
            value: json!(7),
        }]);
        assert_eq!(rx.recv().await, Some(7));

        subscription.unsubscribe();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn local_documents_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter__v1.json");
        let doc = counter_doc(Scope::Local {
            path: Some(path.clone()),
        });
        doc.inner().apply_local(&[Write::Set {
            path: vec!["count".into()],
            value: json!(3),
        }]);
        doc.inner().persist().unwrap();

        let stored: Counter = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(stored, Counter { count: 3 });
    }
}
