use std::{ops::Deref, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    error::SyncError,
    sync::{SyncClient, State, document::SharedDocument, key::StoreKey},
};

/// Grace period before the last released lease actually leaves its store.
pub const DEFAULT_RELEASE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct LeaseCount {
    holders: usize,
    generation: u64,
}

/// Reference-counted membership of stores whose names are only known at
/// runtime, such as one store per lobby.
///
/// Every [`StoreLease`] keeps its store joined. When the last lease goes away
/// the store is left after a short grace period, unless someone acquires it
/// again meanwhile; views flipping between screens therefore do not churn
/// membership.
#[derive(Clone)]
pub struct DynamicStores {
    client: SyncClient,
    leases: Arc<DashMap<StoreKey, LeaseCount>>,
    grace: Duration,
}

impl DynamicStores {
    pub fn new(client: SyncClient) -> Self {
        Self::with_grace(client, DEFAULT_RELEASE_GRACE)
    }

    pub fn with_grace(client: SyncClient, grace: Duration) -> Self {
        Self {
            client,
            leases: Arc::new(DashMap::new()),
            grace,
        }
    }

    /// Take a lease on `name`, joining the store if it is not joined yet.
    pub async fn acquire<T: State>(
        &self,
        name: &str,
        initial: T,
    ) -> Result<StoreLease<T>, SyncError> {
        let document = self.client.store(name, initial, false)?;
        {
            let mut count = self.leases.entry(document.key().clone()).or_default();
            count.holders += 1;
            count.generation += 1;
        }

        if !document.is_connected() {
            if let Err(err) = self.client.join(&document).await {
                self.release(&document);
                return Err(err);
            }
        }

        Ok(StoreLease {
            document,
            owner: self.clone(),
        })
    }

    /// Number of live leases on `name`.
    pub fn holders(&self, name: &str) -> usize {
        StoreKey::parse(name)
            .ok()
            .and_then(|key| self.leases.get(&key).map(|count| count.holders))
            .unwrap_or_default()
    }

    fn release<T: State>(&self, document: &SharedDocument<T>) {
        let key = document.key().clone();
        let generation = {
            let Some(mut count) = self.leases.get_mut(&key) else {
                return;
            };
            count.holders = count.holders.saturating_sub(1);
            if count.holders > 0 {
                return;
            }
            count.generation
        };

        let owner = self.clone();
        let inner = document.inner().clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(owner.grace).await;
                    if owner.forget_if_idle(&key, generation) {
                        owner.client.detach(&inner);
                    } else {
                        debug!(store = %key, "store re-acquired during grace period");
                    }
                });
            }
            Err(_) => {
                if owner.forget_if_idle(&key, generation) {
                    owner.client.detach(&inner);
                }
            }
        }
    }

    fn forget_if_idle(&self, key: &StoreKey, generation: u64) -> bool {
        self.leases
            .remove_if(key, |_, count| {
                count.holders == 0 && count.generation == generation
            })
            .is_some()
    }
}

/// Keeps a dynamically named store joined while alive.
pub struct StoreLease<T: State> {
    document: SharedDocument<T>,
    owner: DynamicStores,
}

impl<T: State> StoreLease<T> {
    pub fn document(&self) -> &SharedDocument<T> {
        &self.document
    }
}

impl<T: State> Deref for StoreLease<T> {
    type Target = SharedDocument<T>;

    fn deref(&self) -> &Self::Target {
        &self.document
    }
}

impl<T: State> Drop for StoreLease<T> {
    fn drop(&mut self) {
        self.owner.release(&self.document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncHub;

    #[tokio::test(start_paused = true)]
    async fn last_release_leaves_after_the_grace_period() {
        let hub = SyncHub::new();
        let stores = DynamicStores::new(hub.connect("client-a"));

        let lease = stores.acquire("lobby/ABC-123", 0_u32).await.unwrap();
        let document = lease.document().clone();
        assert!(document.is_connected());

        drop(lease);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(document.is_connected());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!document.is_connected());
        assert_eq!(stores.holders("lobby/ABC-123"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reacquiring_within_the_grace_period_keeps_the_store() {
        let hub = SyncHub::new();
        let stores = DynamicStores::new(hub.connect("client-a"));

        let first = stores.acquire("lobby/ABC-123", 0_u32).await.unwrap();
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = stores.acquire("lobby/ABC-123", 0_u32).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(second.is_connected());
        assert_eq!(stores.holders("lobby/ABC-123"), 1);
    }
}
