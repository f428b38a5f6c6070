use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};

/// Millisecond wall clock anchored on a monotonic [`Instant`].
///
/// Built on `tokio::time::Instant` so paused-time tests can drive it.
#[derive(Debug, Clone)]
pub struct ServerClock {
    origin: Instant,
    epoch_ms: u64,
}

impl ServerClock {
    /// Clock reading the current system time at creation.
    pub fn system() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self::starting_at(epoch_ms)
    }

    /// Clock whose first reading is `epoch_ms`.
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            epoch_ms,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::system()
    }
}

/// Client-side view of the hub clock.
///
/// The local clock may be skewed arbitrarily; the offset captured when the
/// connection is established compensates for it. Readings never go backwards.
#[derive(Debug)]
pub(crate) struct ClientClock {
    local: ServerClock,
    offset_ms: i64,
    last: AtomicU64,
}

impl ClientClock {
    pub(crate) fn synced(server_now: u64, skew_ms: i64) -> Self {
        let local_epoch = ServerClock::system().epoch_ms.saturating_add_signed(skew_ms);
        let local = ServerClock::starting_at(local_epoch);
        let offset_ms = server_now as i64 - local.now_ms() as i64;
        Self {
            local,
            offset_ms,
            last: AtomicU64::new(server_now),
        }
    }

    pub(crate) fn server_now(&self) -> u64 {
        let reading = self.local.now_ms().saturating_add_signed(self.offset_ms);
        let previous = self.last.fetch_max(reading, Ordering::AcqRel);
        previous.max(reading)
    }
}

/// Anything able to report the synchronised server time.
pub trait TimeSource: Send + Sync + 'static {
    /// Current server time in milliseconds.
    fn server_now(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn server_now(&self) -> u64 {
        (**self).server_now()
    }
}

/// Polls a [`TimeSource`] at a fixed cadence and publishes each reading.
///
/// This is the heartbeat that drives countdowns and the controller's periodic
/// checks. Reading it is free and any number of tasks may subscribe.
pub struct ServerTimer {
    receiver: watch::Receiver<u64>,
    handle: JoinHandle<()>,
}

impl ServerTimer {
    /// Start polling `source` every `cadence`.
    pub fn spawn<S: TimeSource>(source: S, cadence: Duration) -> Self {
        let (sender, receiver) = watch::channel(source.server_now());
        let handle = tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if sender.send(source.server_now()).is_err() {
                    break;
                }
            }
        });
        Self { receiver, handle }
    }

    /// Latest published server time.
    pub fn now(&self) -> u64 {
        *self.receiver.borrow()
    }

    /// Receiver notified on every tick.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.receiver.clone()
    }
}

impl Drop for ServerTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
