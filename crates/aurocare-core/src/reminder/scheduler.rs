//! Periodic reminder scheduler.
//!
//! One tick source scans the catalog. Each due definition joins a FIFO
//! queue (at most once), and the queue is drained while fewer than
//! `max_pending` reminders are pending or shown. A raised reminder runs
//! its own [`Countdown`]; left alone it expires on its own.
//!
//! ```text
//! Pending -> Shown -> Acknowledged | Dismissed | Expired
//!    |                    ^
//!    +--------------------+
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::catalog::{ReminderDefinition, ReminderKind};
use crate::clock::Clock;
use crate::error::ReminderError;
use crate::events::ReminderEvent;
use crate::timer::{CancelToken, Countdown, CountdownHandle};

pub type ReminderId = Uuid;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderConfig {
    pub tick_interval: Duration,
    /// Reminders allowed in `pending` or `shown` at once.
    pub max_pending: usize,
    /// Default time a reminder waits for an answer before expiring.
    pub countdown: Duration,
    /// Offset daily due times are evaluated in.
    pub utc_offset: FixedOffset,
    /// Closed reminders kept for lookups.
    pub history_limit: usize,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_pending: 4,
            countdown: Duration::from_secs(300),
            utc_offset: Utc.fix(),
            history_limit: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Shown,
    Acknowledged,
    Dismissed,
    Expired,
}

impl ReminderStatus {
    pub fn is_open(self) -> bool {
        matches!(self, ReminderStatus::Pending | ReminderStatus::Shown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    /// Key of the definition this was raised from.
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub title: String,
    pub message: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub last_shown_at: Option<DateTime<Utc>>,
    pub dedup_window_secs: u64,
    pub status: ReminderStatus,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    catalog: Vec<ReminderDefinition>,
    config: ReminderConfig,
    clock: Clock,
    runtime: Handle,
    events: broadcast::Sender<ReminderEvent>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Last show/acknowledge/dismiss per kind.
    last_shown: HashMap<ReminderKind, DateTime<Utc>>,
    /// Last time each definition went pending.
    last_raised: HashMap<String, DateTime<Utc>>,
    open: Vec<OpenReminder>,
    queue: VecDeque<String>,
    history: VecDeque<Reminder>,
}

struct OpenReminder {
    reminder: Reminder,
    countdown: CountdownHandle,
}

impl ReminderScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(catalog: Vec<ReminderDefinition>, config: ReminderConfig) -> Self {
        Self::with_clock(catalog, config, Clock::system())
    }

    pub fn with_clock(catalog: Vec<ReminderDefinition>, config: ReminderConfig, clock: Clock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                catalog,
                config,
                clock,
                runtime: Handle::current(),
                events,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &[ReminderDefinition] {
        &self.inner.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReminderEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn the tick loop. It stops at the next tick boundary after
    /// `cancel` fires.
    pub fn start(&self, cancel: CancelToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let interval = self.inner.config.tick_interval;
        self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut previous: Option<Instant> = None;
            tracing::info!(interval_ms = interval.as_millis() as u64, "reminder scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let now = Instant::now();
                if let Some(gap) = previous.map(|p| now - p).filter(|gap| *gap > interval * 2) {
                    tracing::warn!(
                        gap_ms = gap.as_millis() as u64,
                        "reminder tick delayed, scheduler starved"
                    );
                }
                previous = Some(now);
                scheduler.tick();
            }
            tracing::info!("reminder scheduler stopped");
        })
    }

    /// Scan the catalog once. Returns the reminders that went pending.
    pub fn tick(&self) -> Vec<Reminder> {
        let now = self.inner.clock.now();
        let mut state = self.state();
        let offset = self.inner.config.utc_offset;

        let mut newly_queued = Vec::new();
        for def in &self.inner.catalog {
            if state.is_open_or_queued(&def.key) {
                continue;
            }
            let last_shown = state.last_shown.get(&def.kind).copied();
            let last_raised = state.last_raised.get(&def.key).copied();
            if def.is_due(now, last_shown, last_raised, offset) {
                state.queue.push_back(def.key.clone());
                newly_queued.push(def);
            }
        }

        let mut raised = Vec::new();
        while state.open.len() < self.inner.config.max_pending {
            let Some(key) = state.queue.pop_front() else {
                break;
            };
            let Some(def) = self.inner.catalog.iter().find(|d| d.key == key) else {
                continue;
            };
            // Another reminder of the same kind may have been shown meanwhile.
            if def.in_dedup_window(now, state.last_shown.get(&def.kind).copied()) {
                tracing::debug!(key = %def.key, "queued reminder dropped inside dedup window");
                continue;
            }
            raised.push(self.raise(&mut state, def, now));
        }

        for def in newly_queued {
            if state.queue.contains(&def.key) {
                tracing::debug!(key = %def.key, "reminder cap reached, queued");
                self.publish(ReminderEvent::ReminderQueued {
                    key: def.key.clone(),
                    kind: def.kind,
                    at: now,
                });
            }
        }
        raised
    }

    /// Record that the reminder was displayed. `pending -> shown`.
    pub fn mark_shown(&self, id: ReminderId) -> Result<Reminder, ReminderError> {
        let now = self.inner.clock.now();
        let mut state = self.state();
        let Some(index) = state.open.iter().position(|o| o.reminder.id == id) else {
            return state.closed(id);
        };

        let kind = state.open[index].reminder.kind;
        let reminder = &mut state.open[index].reminder;
        if reminder.status == ReminderStatus::Pending {
            reminder.status = ReminderStatus::Shown;
            reminder.last_shown_at = Some(now);
            let snapshot = reminder.clone();
            state.last_shown.insert(kind, now);
            self.publish(ReminderEvent::ReminderShown {
                reminder_id: id,
                at: now,
            });
            return Ok(snapshot);
        }
        Ok(reminder.clone())
    }

    /// The user completed the reminder.
    pub fn acknowledge(&self, id: ReminderId) -> Result<Reminder, ReminderError> {
        self.close(id, ReminderStatus::Acknowledged)
    }

    /// The user waved the reminder away.
    pub fn dismiss(&self, id: ReminderId) -> Result<Reminder, ReminderError> {
        self.close(id, ReminderStatus::Dismissed)
    }

    pub fn get(&self, id: ReminderId) -> Option<Reminder> {
        let state = self.state();
        state
            .open
            .iter()
            .map(|o| &o.reminder)
            .chain(state.history.iter())
            .find(|r| r.id == id)
            .cloned()
    }

    /// Reminders currently pending or shown, oldest first.
    pub fn pending(&self) -> Vec<Reminder> {
        self.state().open.iter().map(|o| o.reminder.clone()).collect()
    }

    /// Definition keys waiting for a free slot, in promotion order.
    pub fn queued(&self) -> Vec<String> {
        self.state().queue.iter().cloned().collect()
    }

    /// Recently closed reminders, oldest first.
    pub fn history(&self) -> Vec<Reminder> {
        self.state().history.iter().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ReminderEvent) {
        let _ = self.inner.events.send(event);
    }

    fn raise(&self, state: &mut State, def: &ReminderDefinition, now: DateTime<Utc>) -> Reminder {
        let scheduled_at = def
            .due_at(now, self.inner.config.utc_offset)
            .filter(|due| *due <= now)
            .unwrap_or(now);
        let reminder = Reminder {
            id: Uuid::new_v4(),
            key: def.key.clone(),
            kind: def.kind,
            title: def.title.clone(),
            message: def.message.clone(),
            scheduled_at,
            last_shown_at: state.last_shown.get(&def.kind).copied(),
            dedup_window_secs: def.dedup_window_secs,
            status: ReminderStatus::Pending,
        };

        let countdown = def
            .countdown_secs
            .map(Duration::from_secs)
            .unwrap_or(self.inner.config.countdown);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = reminder.id;
        let handle = Countdown::start_on(&self.inner.runtime, countdown, |_| {}, move || {
            if let Some(inner) = weak.upgrade() {
                ReminderScheduler { inner }.expire(id);
            }
        });

        tracing::info!(key = %def.key, kind = %def.kind, reminder_id = %id, "reminder pending");
        state.last_raised.insert(def.key.clone(), now);
        state.open.push(OpenReminder {
            reminder: reminder.clone(),
            countdown: handle,
        });
        self.publish(ReminderEvent::ReminderPending {
            reminder: reminder.clone(),
        });
        reminder
    }

    fn close(&self, id: ReminderId, status: ReminderStatus) -> Result<Reminder, ReminderError> {
        let now = self.inner.clock.now();
        let mut state = self.state();
        let Some(index) = state.open.iter().position(|o| o.reminder.id == id) else {
            return state.closed(id);
        };

        let OpenReminder {
            mut reminder,
            countdown,
        } = state.open.remove(index);
        countdown.cancel();
        reminder.status = status;
        reminder.last_shown_at = Some(now);
        state.last_shown.insert(reminder.kind, now);

        let event = match status {
            ReminderStatus::Dismissed => ReminderEvent::ReminderDismissed {
                reminder_id: id,
                kind: reminder.kind,
                at: now,
            },
            _ => ReminderEvent::ReminderAcknowledged {
                reminder_id: id,
                kind: reminder.kind,
                at: now,
            },
        };
        tracing::info!(reminder_id = %id, ?status, "reminder closed");
        self.archive(&mut state, reminder.clone());
        self.publish(event);
        Ok(reminder)
    }

    fn expire(&self, id: ReminderId) {
        let now = self.inner.clock.now();
        let mut state = self.state();
        let Some(index) = state.open.iter().position(|o| o.reminder.id == id) else {
            return;
        };
        let mut reminder = state.open.remove(index).reminder;
        reminder.status = ReminderStatus::Expired;
        tracing::info!(reminder_id = %id, key = %reminder.key, "reminder expired unanswered");
        let kind = reminder.kind;
        self.archive(&mut state, reminder);
        self.publish(ReminderEvent::ReminderExpired {
            reminder_id: id,
            kind,
            at: now,
        });
    }

    fn archive(&self, state: &mut State, reminder: Reminder) {
        state.history.push_back(reminder);
        // The latest closed reminder is always kept so late answers stay idempotent.
        while state.history.len() > self.inner.config.history_limit.max(1) {
            state.history.pop_front();
        }
    }
}

impl State {
    fn is_open_or_queued(&self, key: &str) -> bool {
        self.open.iter().any(|o| o.reminder.key == key) || self.queue.iter().any(|k| k == key)
    }

    /// Closing an already-closed reminder changes nothing.
    fn closed(&self, id: ReminderId) -> Result<Reminder, ReminderError> {
        self.history
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ReminderError::NotFound(id.to_string()))
    }
}
