use std::{
    any::TypeId,
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
    sync::Arc,
};

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::{
    error::SyncError,
    sync::{ClientId, ConnectionId, State, document::Subscription},
};

/// Presence record for one live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessEntry<D> {
    /// Stable id of the client behind the connection.
    pub client_id: ClientId,
    /// Client-supplied ephemeral data.
    pub data: D,
    /// Server time of the last update from this connection.
    pub last_ping: u64,
}

pub(crate) type RawEntries = BTreeMap<ConnectionId, AwarenessEntry<Value>>;

pub(crate) struct AwarenessInner {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    local_data: watch::Sender<Value>,
    entries: watch::Sender<RawEntries>,
    joined: watch::Sender<bool>,
}

impl AwarenessInner {
    pub(crate) fn new(name: String, initial: Value, type_id: TypeId) -> Self {
        let (local_data, _) = watch::channel(initial);
        let (entries, _) = watch::channel(BTreeMap::new());
        let (joined, _) = watch::channel(false);
        Self {
            name,
            type_id,
            local_data,
            entries,
            joined,
        }
    }

    pub(crate) fn is_joined(&self) -> bool {
        *self.joined.borrow()
    }

    pub(crate) fn local_data(&self) -> Value {
        self.local_data.borrow().clone()
    }

    pub(crate) fn set_local_data(&self, data: Value) {
        self.local_data.send_replace(data);
    }

    pub(crate) fn install(&self, entries: RawEntries) {
        self.entries.send_replace(entries);
        self.joined.send_replace(true);
    }

    pub(crate) fn replace_entries(&self, entries: RawEntries) {
        self.entries.send_replace(entries);
    }

    pub(crate) fn mark_left(&self) {
        self.joined.send_replace(false);
        self.entries.send_replace(BTreeMap::new());
    }
}

/// Typed handle to a presence channel.
///
/// Entries exist exactly while their connection is live; the hub drops them
/// when a connection goes away. Data is best-effort and must never carry
/// anything authoritative.
pub struct AwarenessChannel<D> {
    inner: Arc<AwarenessInner>,
    _marker: PhantomData<fn() -> D>,
}

impl<D> Clone for AwarenessChannel<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<D: State> AwarenessChannel<D> {
    pub(crate) fn from_inner(inner: Arc<AwarenessInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<AwarenessInner> {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_joined()
    }

    /// Data this client publishes.
    pub fn local_data(&self) -> Result<D, SyncError> {
        Ok(serde_json::from_value(self.inner.local_data())?)
    }

    /// Typed view of every live entry.
    pub fn snapshot(&self) -> Result<BTreeMap<ConnectionId, AwarenessEntry<D>>, SyncError> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(connection_id, entry)| {
                let data = serde_json::from_value(entry.data.clone())?;
                Ok((
                    connection_id.clone(),
                    AwarenessEntry {
                        client_id: entry.client_id.clone(),
                        data,
                        last_ping: entry.last_ping,
                    },
                ))
            })
            .collect()
    }

    /// Live connection ids, sorted.
    pub fn connection_ids(&self) -> BTreeSet<ConnectionId> {
        self.inner.entries.borrow().keys().cloned().collect()
    }

    /// Client ids behind the live connections.
    pub fn client_ids(&self) -> BTreeSet<ClientId> {
        self.inner
            .entries
            .borrow()
            .values()
            .map(|entry| entry.client_id.clone())
            .collect()
    }

    /// Stream yielding once immediately and then whenever presence changes.
    pub fn stream(&self) -> BoxStream<'static, ()> {
        WatchStream::new(self.inner.entries.subscribe())
            .map(|_| ())
            .boxed()
    }

    /// Invoke `on_change` with the typed entries after every presence change.
    pub fn subscribe<F>(&self, mut on_change: F) -> Subscription
    where
        F: FnMut(BTreeMap<ConnectionId, AwarenessEntry<D>>) + Send + 'static,
    {
        let channel = self.clone();
        let mut changes = self.inner.entries.subscribe();
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let _ = changes.borrow_and_update();
                match channel.snapshot() {
                    Ok(entries) => on_change(entries),
                    Err(err) => {
                        warn!(awareness = %channel.name(), error = %err, "dropping undecodable presence")
                    }
                }
            }
        });
        Subscription::new(handle)
    }
}
