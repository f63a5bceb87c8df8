//! Periodic subscription update scheduling
//!
//! The scheduler keeps one [`Slot`] per subscription that has both a url and a
//! cron expression. A single loop owns every slot: it sleeps until the nearest
//! deadline, hands that subscription to an [`UpdateDispatcher`] on its own task
//! and goes straight back to sleeping. Finished tasks report back over a
//! channel so the loop can re-arm their slots.
//!
//! ```text
//!            ┌──────────────── Scheduler loop ────────────────┐
//!            │  next_due() ─▶ sleep (≥1ms) ─▶ fire() ─▶ spawn │
//!            │       ▲                                   │    │
//!            │       └──── complete() ◀── completion ◀───┘    │
//!            └─────────────────────┬──────────────────────────┘
//!                                  │ shutdown
//!                                  ▼
//!                       drain in-flight updates
//! ```
//!
//! Deadlines are computed from wall-clock local time, so a schedule like
//! `0 3 * * *` fires at 03:00 in the host's time zone.

pub mod error;
pub mod expression;
pub mod slot;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::Subscription;
use crate::shutdown::ShutdownListener;

pub use error::{SchedulerError, SchedulerResult};
pub use slot::{FireDecision, Slot, SlotState};

/// Shortest sleep between two loop iterations
pub const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Runs one update cycle for a subscription picked by the scheduler
#[async_trait]
pub trait UpdateDispatcher: Send + Sync + 'static {
    /// Update `subscription`; returns whether the cycle succeeded.
    ///
    /// Failures are expected to be logged by the implementation. The
    /// scheduler only uses the result for its own bookkeeping.
    async fn update(&self, subscription: Subscription, shutdown: ShutdownListener) -> bool;
}

/// Sends the slot's completion when the dispatched task ends, even by panic
struct CompletionGuard {
    index: usize,
    succeeded: bool,
    tx: mpsc::UnboundedSender<(usize, bool)>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.tx.send((self.index, self.succeeded));
    }
}

/// Cron-driven scheduler over a fixed set of subscriptions
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    slots: Vec<Slot>,
}

impl Scheduler {
    /// Build slots for every periodic subscription; the others are ignored
    pub fn new(subscriptions: impl IntoIterator<Item = Subscription>) -> SchedulerResult<Self> {
        let slots = subscriptions
            .into_iter()
            .filter(Subscription::is_periodic)
            .map(Slot::new)
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok(Self { slots })
    }

    /// All slots in configuration order
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Whether no subscription is periodic
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot for a subscription name
    pub fn find(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.subscription().is_named(name))
    }

    /// Compute the first deadline of every idle slot
    pub fn arm_all(&mut self, now: DateTime<Local>) {
        for slot in &mut self.slots {
            slot.arm(now);
        }
    }

    /// Earliest armed deadline; ties go to the slot listed first
    pub fn next_due(&self) -> Option<(usize, DateTime<Local>)> {
        let mut nearest: Option<(usize, DateTime<Local>)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(due) = slot.next_due() else {
                continue;
            };
            if nearest.map_or(true, |(_, best)| due < best) {
                nearest = Some((index, due));
            }
        }
        nearest
    }

    /// Fire a slot whose deadline passed.
    ///
    /// Returns the subscription to update, or `None` when the previous cycle
    /// for that slot is still running.
    pub fn fire(
        &mut self,
        index: usize,
        now: DateTime<Local>,
    ) -> SchedulerResult<Option<Subscription>> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SchedulerError::UnknownSlot { index })?;

        match slot.fire(now) {
            FireDecision::Dispatch => Ok(Some(slot.subscription().clone())),
            FireDecision::InFlight => {
                warn!(
                    subscription = %slot.name(),
                    next_due = ?slot.next_due(),
                    "Previous update still running, skipping this tick"
                );
                Ok(None)
            }
        }
    }

    /// Record the end of a slot's update cycle
    pub fn complete(&mut self, index: usize, now: DateTime<Local>) -> SchedulerResult<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SchedulerError::UnknownSlot { index })?;
        slot.complete(now);
        Ok(())
    }

    fn mark_selected(&mut self, selected: Option<usize>) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if Some(index) == selected {
                slot.select();
            } else {
                slot.deselect();
            }
        }
    }

    /// Run until shutdown, then wait for in-flight updates to finish
    pub async fn run<D: UpdateDispatcher>(
        mut self,
        dispatcher: Arc<D>,
        mut shutdown: ShutdownListener,
    ) -> SchedulerResult<()> {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, bool)>();
        let mut tasks = JoinSet::new();

        self.arm_all(Local::now());
        info!(slots = self.slots.len(), "Scheduler started");

        loop {
            let next = self.next_due();
            self.mark_selected(next.map(|(index, _)| index));

            if let Some((index, due)) = next {
                debug!(
                    subscription = %self.slots[index].name(),
                    next_due = %due,
                    "Waiting for next deadline"
                );
            } else {
                debug!("No armed slot, waiting for completions or shutdown");
            }

            let deadline = async {
                match next {
                    Some((index, due)) => {
                        tokio::time::sleep(sleep_until(due, Local::now())).await;
                        index
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
                Some((index, succeeded)) = done_rx.recv() => {
                    self.complete(index, Local::now())?;
                    debug!(
                        subscription = %self.slots[index].name(),
                        succeeded,
                        next_due = ?self.slots[index].next_due(),
                        "Update cycle finished"
                    );
                }
                index = deadline => {
                    let Some(subscription) = self.fire(index, Local::now())? else {
                        continue;
                    };

                    info!(subscription = %subscription.name, "Dispatching scheduled update");
                    spawn_cycle(
                        &mut tasks,
                        Arc::clone(&dispatcher),
                        index,
                        subscription,
                        shutdown.clone(),
                        done_tx.clone(),
                    );
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Update task ended abnormally");
                    }
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight updates");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Update task ended abnormally");
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

/// Start one update cycle; the slot's completion is sent when the task ends
fn spawn_cycle<D: UpdateDispatcher>(
    tasks: &mut JoinSet<()>,
    dispatcher: Arc<D>,
    index: usize,
    subscription: Subscription,
    shutdown: ShutdownListener,
    done: mpsc::UnboundedSender<(usize, bool)>,
) {
    let guard = CompletionGuard {
        index,
        succeeded: false,
        tx: done,
    };
    tasks.spawn(async move {
        // bind the whole guard so it lives until the cycle ends
        let mut guard = guard;
        guard.succeeded = dispatcher.update(subscription, shutdown).await;
    });
}

/// Time to sleep from `now` until `due`, never less than [`MIN_SLEEP`]
pub fn sleep_until(due: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (due - now).to_std().unwrap_or(Duration::ZERO).max(MIN_SLEEP)
}
