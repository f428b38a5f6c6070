//! Shared documents, presence channels and the clock they are ordered by.
//!
//! [`SyncHub`] plays the server: it keeps the canonical copy of every store
//! and relays changes. Each process talks to it through a [`SyncClient`],
//! which owns typed replicas ([`SharedDocument`]) that only change through
//! [`SyncClient::transact`] or hub patches.

pub mod awareness;
pub mod client;
pub mod clock;
pub mod document;
pub mod dynamic;
pub mod hub;
pub mod key;
pub mod patch;
pub mod transaction;

pub use awareness::{AwarenessChannel, AwarenessEntry};
pub use client::{ClientOptions, SyncClient};
pub use clock::{ServerClock, ServerTimer, TimeSource};
pub use document::{Replica, SharedDocument, StoreConnections, Subscription};
pub use dynamic::{DynamicStores, StoreLease};
pub use hub::{HubMessage, SharedHub, SyncHub};
pub use key::StoreKey;
pub use transaction::{State, StoreSet};

/// Identifier of one live connection. Changes on every reconnect.
pub type ConnectionId = String;

/// Stable identifier of a logical client across reconnects.
pub type ClientId = String;
