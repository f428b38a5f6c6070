use std::sync::Arc;

use futures::{StreamExt, future::BoxFuture};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    services::election::{ControllerSlot, Election, PresenceSource},
    sync::ServerTimer,
};

/// Work that only the elected controller performs, once per heartbeat.
pub trait ControllerTask: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;
    /// Evaluate the task at server time `now`. Must be idempotent.
    fn tick(&self, now: u64) -> BoxFuture<'_, Result<(), ServiceError>>;
}

/// Running election loop. Dropping it stops the loop.
pub struct ControllerHandle {
    is_controller: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl ControllerHandle {
    /// Whether this client currently holds the slot.
    pub fn is_controller(&self) -> bool {
        *self.is_controller.borrow()
    }

    pub fn stop(self) {}
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start keeping `election` settled and running `tasks` on every heartbeat
/// of `timer` while this client is the controller.
pub fn spawn<S, P>(
    election: Election<S, P>,
    timer: ServerTimer,
    tasks: Vec<Arc<dyn ControllerTask>>,
) -> ControllerHandle
where
    S: ControllerSlot,
    P: PresenceSource,
{
    let (status, is_controller) = watch::channel(false);
    let handle = tokio::spawn(run(election, timer, tasks, status));
    ControllerHandle {
        is_controller,
        handle,
    }
}

/// Re-check the election on every slot or presence change and on every
/// heartbeat; failures are logged and retried on the next trigger.
async fn run<S, P>(
    election: Election<S, P>,
    timer: ServerTimer,
    tasks: Vec<Arc<dyn ControllerTask>>,
    status: watch::Sender<bool>,
) where
    S: ControllerSlot,
    P: PresenceSource,
{
    let mut triggers = election.triggers();
    let mut ticks = timer.subscribe();

    loop {
        tokio::select! {
            trigger = triggers.next() => {
                if trigger.is_none() {
                    break;
                }
                election.check_quietly().await;
            }
            changed = ticks.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *ticks.borrow_and_update();
                election.check_quietly().await;
                if election.is_controller() {
                    for task in &tasks {
                        if let Err(err) = task.tick(now).await {
                            warn!(task = task.name(), error = %err, "controller task failed");
                        }
                    }
                }
            }
        }

        let controller = election.is_controller();
        status.send_if_modified(|current| {
            if *current == controller {
                return false;
            }
            *current = controller;
            info!(controller, "controller role changed");
            true
        });
    }

    info!("controller loop stopped");
}
