//! Deterministic leader election over a presence source.
//!
//! Nobody holds a lock. Whenever the assigned controller is missing from the
//! live connections, any client may write the lexicographically smallest live
//! id. Every observer of the same presence snapshot computes the same winner,
//! so concurrent election writes agree and are harmless.

use std::collections::BTreeSet;

use futures::{StreamExt, stream::BoxStream};
use tracing::{debug, info};

use crate::{
    error::SyncError,
    sync::{AwarenessChannel, ConnectionId, SharedDocument, State, SyncClient},
};

/// Document field holding an elected connection id.
pub trait ControllerSlot: State {
    /// Currently assigned connection id, empty when nobody is.
    fn controller(&self) -> &str;
    /// Assign a new connection id.
    fn set_controller(&mut self, connection_id: ConnectionId);
}

/// Source of currently live connection ids.
pub trait PresenceSource: Send + Sync + 'static {
    /// Live connection ids.
    fn live_connections(&self) -> BTreeSet<ConnectionId>;
    /// Stream yielding whenever the live set may have changed.
    fn presence_changes(&self) -> BoxStream<'static, ()>;
}

impl<T: State> PresenceSource for SharedDocument<T> {
    fn live_connections(&self) -> BTreeSet<ConnectionId> {
        self.connections().connection_ids
    }

    fn presence_changes(&self) -> BoxStream<'static, ()> {
        tokio_stream::wrappers::WatchStream::new(self.connection_changes())
            .map(|_| ())
            .boxed()
    }
}

impl<D: State> PresenceSource for AwarenessChannel<D> {
    fn live_connections(&self) -> BTreeSet<ConnectionId> {
        self.connection_ids()
    }

    fn presence_changes(&self) -> BoxStream<'static, ()> {
        self.stream()
    }
}

/// How the local client relates to the current assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionRole {
    /// A live connection other than ours holds the slot.
    Unelected,
    /// The slot is empty or stale; an election is due.
    Candidate,
    /// We hold the slot.
    Controller,
}

/// Winner among `live`: the smallest id, or `""` when nobody is live.
pub fn elect<'a, I>(live: I) -> ConnectionId
where
    I: IntoIterator<Item = &'a ConnectionId>,
{
    live.into_iter().min().cloned().unwrap_or_default()
}

/// Whether `current` no longer points at a live connection.
pub fn needs_election(current: &str, live: &BTreeSet<ConnectionId>) -> bool {
    !live.contains(current)
}

pub fn role(current: &str, live: &BTreeSet<ConnectionId>, local: &str) -> ElectionRole {
    if !current.is_empty() && current == local {
        ElectionRole::Controller
    } else if needs_election(current, live) {
        ElectionRole::Candidate
    } else {
        ElectionRole::Unelected
    }
}

/// Keeps one slot document pointing at a live connection.
pub struct Election<S, P> {
    client: SyncClient,
    slot: SharedDocument<S>,
    presence: P,
    label: &'static str,
}

impl<S: ControllerSlot, P: PresenceSource> Election<S, P> {
    pub fn new(client: SyncClient, slot: SharedDocument<S>, presence: P, label: &'static str) -> Self {
        Self {
            client,
            slot,
            presence,
            label,
        }
    }

    pub fn slot(&self) -> &SharedDocument<S> {
        &self.slot
    }

    pub fn presence(&self) -> &P {
        &self.presence
    }

    /// Current assignment as seen by the local replica.
    pub fn current(&self) -> ConnectionId {
        self.slot
            .get()
            .map(|state| state.controller().to_string())
            .unwrap_or_default()
    }

    pub fn role(&self) -> ElectionRole {
        role(
            &self.current(),
            &self.presence.live_connections(),
            self.client.connection_id(),
        )
    }

    /// Whether the local connection holds the slot.
    pub fn is_controller(&self) -> bool {
        self.slot.is_connected() && self.role() == ElectionRole::Controller
    }

    /// Re-elect if the incumbent is gone. Returns the newly written winner.
    pub async fn check(&self) -> Result<Option<ConnectionId>, SyncError> {
        if !self.slot.is_connected() {
            return Ok(None);
        }

        let live = self.presence.live_connections();
        let winner = self
            .client
            .transact(&self.slot, |state| {
                if !needs_election(state.controller(), &live) {
                    return None;
                }
                let winner = elect(&live);
                if winner == state.controller() {
                    return None;
                }
                state.set_controller(winner.clone());
                Some(winner)
            })
            .await?;

        if let Some(winner) = &winner {
            info!(
                election = self.label,
                winner = %winner,
                live = live.len(),
                "elected new controller"
            );
        }
        Ok(winner)
    }

    /// Best-effort variant of [`check`](Self::check) for reactive loops.
    pub async fn check_quietly(&self) {
        if let Err(err) = self.check().await {
            debug!(election = self.label, error = %err, "election write skipped");
        }
    }

    /// Stream yielding whenever the slot or the presence set changes.
    pub fn triggers(&self) -> BoxStream<'static, ()> {
        futures::stream::select(self.slot.stream(), self.presence.presence_changes()).boxed()
    }
}
