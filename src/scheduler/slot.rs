//! Per-subscription scheduling state
//!
//! ```text
//!  Unscheduled ──arm──▶ Scheduled ──select──▶ Due ──fire──▶ Updating
//!       ▲                   ▲                                 │
//!       └──── exhausted ────┴──────────── complete ───────────┘
//! ```
//!
//! Only the scheduler loop mutates a slot, so no locking is needed.

use chrono::{DateTime, Local};
use std::fmt;

use super::error::SchedulerResult;
use super::expression::{self, CronSchedule};
use crate::models::Subscription;

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// No upcoming fire time
    Unscheduled,

    /// Waiting for `next_due`
    Scheduled,

    /// Selected as the nearest slot; the loop is sleeping toward it
    Due,

    /// An update cycle is in flight
    Updating,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unscheduled => "unscheduled",
            Self::Scheduled => "scheduled",
            Self::Due => "due",
            Self::Updating => "updating",
        };
        f.write_str(label)
    }
}

/// What the loop should do with a slot whose deadline was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// Start an update cycle
    Dispatch,

    /// Previous cycle still running; this tick is dropped
    InFlight,
}

/// Scheduling state for one subscription
#[derive(Debug, Clone)]
pub struct Slot {
    subscription: Subscription,
    schedule: CronSchedule,
    next_due: Option<DateTime<Local>>,
    state: SlotState,
    dispatched: u64,
}

impl Slot {
    /// Compile the subscription's cron expression into an unarmed slot
    pub fn new(subscription: Subscription) -> SchedulerResult<Self> {
        let schedule = expression::compile(&subscription.cron)?;
        Ok(Self {
            subscription,
            schedule,
            next_due: None,
            state: SlotState::Unscheduled,
            dispatched: 0,
        })
    }

    /// Subscription served by this slot
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Subscription name
    pub fn name(&self) -> &str {
        &self.subscription.name
    }

    /// Next fire time, if any
    pub fn next_due(&self) -> Option<DateTime<Local>> {
        self.next_due
    }

    /// Current state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Number of update cycles started from this slot
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Whether this slot takes part in nearest-deadline selection
    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Compute the first fire time after `now` if none is set
    pub fn arm(&mut self, now: DateTime<Local>) {
        if self.next_due.is_some() || self.state == SlotState::Updating {
            return;
        }
        self.next_due = self.upcoming(now);
        self.state = if self.next_due.is_some() {
            SlotState::Scheduled
        } else {
            SlotState::Unscheduled
        };
    }

    /// Mark the slot as the one the loop is waiting on
    pub fn select(&mut self) {
        if self.state == SlotState::Scheduled {
            self.state = SlotState::Due;
        }
    }

    /// Undo [`Slot::select`] when another slot became nearer
    pub fn deselect(&mut self) {
        if self.state == SlotState::Due {
            self.state = SlotState::Scheduled;
        }
    }

    /// Deadline reached: reschedule from `now` and decide whether to dispatch.
    ///
    /// A recomputed time that is not in the future is cleared rather than
    /// fired back to back; the slot is re-armed once the running cycle ends.
    pub fn fire(&mut self, now: DateTime<Local>) -> FireDecision {
        self.next_due = self.upcoming(now);

        if self.state == SlotState::Updating {
            return FireDecision::InFlight;
        }

        self.state = SlotState::Updating;
        self.dispatched += 1;
        FireDecision::Dispatch
    }

    /// Update cycle finished; return to `Scheduled`, re-arming from `now` if needed
    pub fn complete(&mut self, now: DateTime<Local>) {
        if self.state != SlotState::Updating {
            return;
        }

        self.state = SlotState::Unscheduled;
        match self.next_due {
            Some(due) if due > now => self.state = SlotState::Scheduled,
            _ => {
                self.next_due = None;
                self.arm(now);
            }
        }
    }

    fn upcoming(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        expression::next_after(&self.schedule, now).filter(|next| *next > now)
    }
}
