use std::{
    any::TypeId,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::{
    error::SyncError,
    sync::{
        ClientId, ConnectionId, State,
        awareness::{AwarenessChannel, AwarenessInner},
        clock::{ClientClock, TimeSource},
        document::{DocumentInner, Scope, SharedDocument},
        hub::{HubMessage, SharedHub, SyncHub},
        key::StoreKey,
        transaction::{Staged, StoreSet},
    },
};

/// Per-connection tuning.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Offset applied to this client's local clock, to simulate skewed devices.
    pub clock_skew_ms: i64,
    /// Directory where device-local stores are persisted.
    pub local_store_dir: Option<PathBuf>,
}

/// One client process connected to the hub.
///
/// Handles returned by [`store`](Self::store) and [`awareness`](Self::awareness)
/// are registered per client: asking twice for the same name yields handles to
/// the same replica.
#[derive(Clone)]
pub struct SyncClient {
    core: Arc<ClientCore>,
}

struct ClientCore {
    hub: SharedHub,
    client_id: ClientId,
    connection_id: ConnectionId,
    clock: ClientClock,
    documents: DashMap<StoreKey, Arc<DocumentInner>>,
    awareness: DashMap<String, Arc<AwarenessInner>>,
    gate: Mutex<()>,
    connected: AtomicBool,
    local_store_dir: Option<PathBuf>,
}

impl SyncHub {
    /// Open a new connection for `client_id`. Reusing a client id models a
    /// reconnect: same client, fresh connection id.
    pub fn connect(self: &Arc<Self>, client_id: impl Into<ClientId>) -> SyncClient {
        SyncClient::connect(self, client_id)
    }
}

impl SyncClient {
    pub fn connect(hub: &SharedHub, client_id: impl Into<ClientId>) -> Self {
        Self::connect_with(hub, client_id, ClientOptions::default())
    }

    pub fn connect_with(
        hub: &SharedHub,
        client_id: impl Into<ClientId>,
        options: ClientOptions,
    ) -> Self {
        let client_id = client_id.into();
        let (connection_id, inbox) = hub.register(&client_id);
        let core = Arc::new(ClientCore {
            hub: hub.clone(),
            clock: ClientClock::synced(hub.now(), options.clock_skew_ms),
            client_id,
            connection_id,
            documents: DashMap::new(),
            awareness: DashMap::new(),
            gate: Mutex::new(()),
            connected: AtomicBool::new(true),
            local_store_dir: options.local_store_dir,
        });
        tokio::spawn(pump(Arc::downgrade(&core), inbox));
        Self { core }
    }

    /// Identifier of this live connection.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.core.connection_id
    }

    /// Stable identifier of the logical client.
    pub fn client_id(&self) -> &ClientId {
        &self.core.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    /// Synchronised server time in milliseconds, never decreasing.
    pub fn server_timestamp(&self) -> u64 {
        self.core.clock.server_now()
    }

    /// Handle to a synced store, created with `initial` if this client never
    /// referenced it. With `auto_join` the store is joined in the background.
    pub fn store<T: State>(
        &self,
        name: &str,
        initial: T,
        auto_join: bool,
    ) -> Result<SharedDocument<T>, SyncError> {
        let key = StoreKey::parse(name)?;
        let initial = serde_json::to_value(&initial)?;
        let inner = self.register_document::<T>(key, Scope::Synced, initial)?;
        let document = SharedDocument::from_inner(inner);

        if auto_join && !document.is_connected() {
            let client = self.clone();
            let pending = document.clone();
            tokio::spawn(async move {
                if let Err(err) = client.join(&pending).await {
                    warn!(store = %pending.key(), error = %err, "auto-join failed");
                }
            });
        }
        Ok(document)
    }

    /// Handle to a device-local store. When a store directory is configured
    /// the last persisted value wins over `initial`.
    pub fn local_store<T: State>(
        &self,
        name: &str,
        initial: T,
    ) -> Result<SharedDocument<T>, SyncError> {
        let key = StoreKey::parse(name)?;
        let path = self
            .core
            .local_store_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.file_stem())));
        let initial = match path.as_ref().and_then(|path| load_persisted::<T>(&key, path)) {
            Some(stored) => stored,
            None => serde_json::to_value(&initial)?,
        };
        let inner = self.register_document::<T>(key, Scope::Local { path }, initial)?;
        Ok(SharedDocument::from_inner(inner))
    }

    /// Handle to a presence channel publishing `initial_data` once joined.
    pub fn awareness<D: State>(
        &self,
        name: &str,
        initial_data: D,
        auto_join: bool,
    ) -> Result<AwarenessChannel<D>, SyncError> {
        let initial = serde_json::to_value(&initial_data)?;
        let inner = {
            let entry = self.core.awareness.entry(name.to_string()).or_insert_with(|| {
                Arc::new(AwarenessInner::new(
                    name.to_string(),
                    initial,
                    TypeId::of::<D>(),
                ))
            });
            if entry.type_id != TypeId::of::<D>() {
                return Err(SyncError::TypeMismatch {
                    target: name.to_string(),
                });
            }
            entry.clone()
        };
        let channel = AwarenessChannel::from_inner(inner);

        if auto_join && !channel.is_connected() {
            let client = self.clone();
            let pending = channel.clone();
            tokio::spawn(async move {
                if let Err(err) = client.join_awareness(&pending).await {
                    warn!(awareness = %pending.name(), error = %err, "auto-join failed");
                }
            });
        }
        Ok(channel)
    }

    fn register_document<T: 'static>(
        &self,
        key: StoreKey,
        scope: Scope,
        initial: Value,
    ) -> Result<Arc<DocumentInner>, SyncError> {
        let local = matches!(scope, Scope::Local { .. });
        let entry = self
            .core
            .documents
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DocumentInner::new(key.clone(), scope, initial, TypeId::of::<T>())));
        if entry.type_id != TypeId::of::<T>() || entry.is_local() != local {
            return Err(SyncError::TypeMismatch {
                target: key.to_string(),
            });
        }
        Ok(entry.clone())
    }

    /// Join a synced store and install the canonical snapshot. Local stores
    /// are always joined.
    pub async fn join<T: State>(&self, document: &SharedDocument<T>) -> Result<(), SyncError> {
        if document.is_local() {
            return Ok(());
        }
        self.ensure_connected()?;
        let inner = document.inner();
        let (value, seq) =
            self.core
                .hub
                .join_store(&self.core.connection_id, &inner.key, inner.initial.clone())?;
        inner.install_snapshot(value, seq);
        debug!(store = %inner.key, seq, "store joined");
        Ok(())
    }

    /// Leave a synced store. The replica keeps its last value.
    pub async fn leave<T: State>(&self, document: &SharedDocument<T>) -> Result<(), SyncError> {
        if document.is_local() {
            return Ok(());
        }
        self.detach(document.inner());
        Ok(())
    }

    pub(crate) fn detach(&self, document: &DocumentInner) {
        self.core
            .hub
            .leave_store(&self.core.connection_id, &document.key);
        document.mark_left();
        debug!(store = %document.key, "store left");
    }

    /// Join a presence channel, publishing the channel's current local data.
    pub async fn join_awareness<D: State>(
        &self,
        channel: &AwarenessChannel<D>,
    ) -> Result<(), SyncError> {
        self.ensure_connected()?;
        let inner = channel.inner();
        let entries =
            self.core
                .hub
                .join_presence(&self.core.connection_id, &inner.name, inner.local_data())?;
        inner.install(entries);
        debug!(awareness = %inner.name, "awareness joined");
        Ok(())
    }

    pub async fn leave_awareness<D: State>(
        &self,
        channel: &AwarenessChannel<D>,
    ) -> Result<(), SyncError> {
        self.core
            .hub
            .leave_presence(&self.core.connection_id, channel.name());
        channel.inner().mark_left();
        Ok(())
    }

    /// Overwrite this client's presence data. Published immediately when the
    /// channel is joined, otherwise on the next join.
    pub fn set_awareness_data<D: State>(
        &self,
        channel: &AwarenessChannel<D>,
        data: &D,
    ) -> Result<(), SyncError> {
        let value = serde_json::to_value(data)?;
        let inner = channel.inner();
        inner.set_local_data(value.clone());
        if inner.is_joined() {
            self.core
                .hub
                .set_presence(&self.core.connection_id, &inner.name, value)?;
        }
        Ok(())
    }

    /// Run `mutator` against drafts of `stores` and commit the result.
    ///
    /// The local replicas are updated before this returns; the hub relays the
    /// writes to every other member afterwards. Transactions from this client
    /// are serialised and applied in issue order.
    pub async fn transact<S, F, R>(&self, stores: S, mutator: F) -> Result<R, SyncError>
    where
        S: StoreSet,
        F: FnOnce(&mut S::Drafts) -> R,
    {
        self.try_transact(stores, |drafts| Ok::<R, SyncError>(mutator(drafts)))
            .await
    }

    /// Like [`transact`](Self::transact) but commits nothing when the mutator
    /// returns an error.
    pub async fn try_transact<S, F, R, E>(&self, stores: S, mutator: F) -> Result<R, E>
    where
        S: StoreSet,
        F: FnOnce(&mut S::Drafts) -> Result<R, E>,
        E: From<SyncError>,
    {
        let _gate = self.core.gate.lock().await;
        self.ensure_connected()?;
        for document in stores.documents() {
            if !document.inner().is_joined() {
                return Err(SyncError::not_joined(document.key()).into());
            }
        }

        let (mut drafts, bases) = stores.checkout()?;
        let result = mutator(&mut drafts)?;
        let staged = stores.stage(&drafts, bases)?;
        self.commit(staged)?;
        Ok(result)
    }

    fn commit(&self, staged: Vec<Staged>) -> Result<(), SyncError> {
        let staged: Vec<Staged> = staged.into_iter().filter(|s| !s.is_empty()).collect();
        // Nothing is applied unless the hub still counts us in every synced store.
        for entry in &staged {
            let document = entry.document();
            let member = document.is_local()
                || self.core.hub.is_member(&self.core.connection_id, &document.key);
            if !member {
                return Err(SyncError::not_joined(&document.key));
            }
        }
        for entry in &staged {
            entry.document().apply_local(entry.writes());
        }

        for entry in staged {
            let document = entry.document().clone();
            if document.is_local() {
                document.persist()?;
            } else {
                self.core
                    .hub
                    .submit(&self.core.connection_id, &document.key, entry.into_writes())?;
            }
        }
        Ok(())
    }

    /// Close the connection. Every presence entry of this client disappears.
    pub fn disconnect(&self) {
        if !self.core.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.core.hub.disconnect(&self.core.connection_id);
        for document in self.core.documents.iter() {
            if !document.is_local() {
                document.mark_left();
            }
        }
        for channel in self.core.awareness.iter() {
            channel.mark_left();
        }
        info!(client_id = %self.core.client_id, connection_id = %self.core.connection_id, "client disconnected");
    }

    fn ensure_connected(&self) -> Result<(), SyncError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::Disconnected)
        }
    }
}

impl TimeSource for SyncClient {
    fn server_now(&self) -> u64 {
        self.server_timestamp()
    }
}

impl ClientCore {
    fn dispatch(&self, message: HubMessage) {
        match message {
            HubMessage::Patch { key, seq, writes } => {
                let document = self.documents.get(&key).map(|entry| entry.value().clone());
                if let Some(document) = document.filter(|document| document.is_joined()) {
                    document.apply_remote(seq, &writes);
                }
            }
            HubMessage::Members { key, members } => {
                let document = self.documents.get(&key).map(|entry| entry.value().clone());
                if let Some(document) = document.filter(|document| document.is_joined()) {
                    document.set_members(members);
                }
            }
            HubMessage::Presence { name, entries } => {
                let channel = self.awareness.get(&name).map(|entry| entry.value().clone());
                if let Some(channel) = channel.filter(|channel| channel.is_joined()) {
                    channel.replace_entries(entries);
                }
            }
        }
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        if *self.connected.get_mut() {
            self.hub.disconnect(&self.connection_id);
        }
    }
}

async fn pump(core: Weak<ClientCore>, mut inbox: mpsc::UnboundedReceiver<HubMessage>) {
    while let Some(message) = inbox.recv().await {
        let Some(core) = core.upgrade() else {
            break;
        };
        core.dispatch(message);
    }
}

fn load_persisted<T: State>(key: &StoreKey, path: &Path) -> Option<Value> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(store = %key, path = %path.display(), error = %err, "failed to read local store, using initial value");
            return None;
        }
    };
    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            warn!(store = %key, error = %err, "corrupt local store, using initial value");
            return None;
        }
    };
    if let Err(err) = serde_json::from_value::<T>(value.clone()) {
        warn!(store = %key, error = %err, "local store no longer matches its schema, using initial value");
        return None;
    }
    info!(store = %key, path = %path.display(), "restored local store");
    Some(value)
}
