//! Alert lifecycle management.
//!
//! [`AlertStateMachine`] owns every alert of the session, addressed by id.
//! Each alert sits in its own [`AlertSlot`] behind a mutex, and every write
//! (operator action, countdown tick, dispatch outcome) goes through that
//! mutex, so a dispatch can never land on an alert that was already closed.
//!
//! Entry points are plain synchronous calls. Countdowns and escalations run
//! as tasks on the runtime captured at construction; progress reaches
//! observers as [`AlertEvent`]s on a broadcast channel.
//!
//! Lock order: the registry lock may be held while taking a slot lock,
//! never the other way round.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::model::{Alert, AlertContext, AlertId, AlertState, AlertType, Transition};
use crate::clock::Clock;
use crate::error::{AlertError, ValidationError};
use crate::escalation::{
    inform_cancelled, plan_tiers, Contact, EscalationAttempt, EscalationConfig,
    EscalationScheduler, EscalationSignals, EscalationStatus, EscalationTarget,
    NotificationGateway, Tier,
};
use crate::events::AlertEvent;
use crate::timer::{Countdown, CountdownHandle};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AlertStateMachine {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Arc<EscalationScheduler>,
    gateway: Arc<dyn NotificationGateway>,
    config: EscalationConfig,
    clock: Clock,
    runtime: Handle,
    events: broadcast::Sender<AlertEvent>,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    contacts: HashMap<String, Vec<Contact>>,
    alerts: HashMap<AlertId, Arc<AlertSlot>>,
    live_by_patient: HashMap<String, AlertId>,
}

impl AlertStateMachine {
    /// Create a state machine bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(gateway: Arc<dyn NotificationGateway>, config: EscalationConfig) -> Self {
        Self::with_clock(gateway, config, Clock::system())
    }

    /// Like [`new`](Self::new) with an explicit clock.
    pub fn with_clock(
        gateway: Arc<dyn NotificationGateway>,
        config: EscalationConfig,
        clock: Clock,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let scheduler = Arc::new(EscalationScheduler::new(Arc::clone(&gateway), config, clock));
        Self {
            inner: Arc::new(Inner {
                scheduler,
                gateway,
                config,
                clock,
                runtime: Handle::current(),
                events,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    // ── Contacts ─────────────────────────────────────────────────────

    /// Set the contacts used for this patient's future escalations.
    /// List order is registration order.
    pub fn register_contacts(&self, patient_id: &str, contacts: Vec<Contact>) {
        self.registry()
            .contacts
            .insert(patient_id.trim().to_string(), contacts);
    }

    /// Dispatch tiers an activation for this patient would use now.
    pub fn planned_tiers(&self, patient_id: &str) -> Vec<Tier> {
        let registry = self.registry();
        plan_tiers(
            registry
                .contacts
                .get(patient_id.trim())
                .map(Vec::as_slice)
                .unwrap_or_default(),
        )
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Snapshot of an alert, live or archived.
    pub fn get_state(&self, alert_id: AlertId) -> Option<Alert> {
        let slot = self.registry().alerts.get(&alert_id).cloned()?;
        let snapshot = slot.alert().clone();
        Some(snapshot)
    }

    /// State of the patient's live alert, `Idle` when there is none.
    pub fn patient_state(&self, patient_id: &str) -> AlertState {
        let registry = self.registry();
        registry
            .live_by_patient
            .get(patient_id.trim())
            .and_then(|id| registry.alerts.get(id))
            .map(|slot| slot.alert().state)
            .filter(|state| state.is_live())
            .unwrap_or(AlertState::Idle)
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        let registry = self.registry();
        let mut alerts: Vec<Alert> = registry
            .live_by_patient
            .values()
            .filter_map(|id| registry.alerts.get(id))
            .map(|slot| slot.alert().clone())
            .filter(|alert| alert.state.is_live())
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    /// Events for one alert. Events published before this call are not replayed.
    pub fn subscribe(&self, alert_id: AlertId) -> AlertSubscription {
        AlertSubscription {
            alert_id,
            rx: self.inner.events.subscribe(),
        }
    }

    /// Events for every alert.
    pub fn subscribe_all(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.events.subscribe()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Raise an alert for a patient.
    ///
    /// Returns the id of the patient's live alert unchanged if one exists.
    pub fn activate(
        &self,
        patient_id: &str,
        kind: AlertType,
        location: &str,
    ) -> Result<AlertId, AlertError> {
        ValidationError::require("patient_id", patient_id)?;
        ValidationError::require("location", location)?;

        let mut registry = self.registry();
        let patient_id = patient_id.trim();

        if let Some(existing) = registry
            .live_by_patient
            .get(patient_id)
            .and_then(|id| registry.alerts.get(id))
            .filter(|slot| slot.alert().state.is_live())
        {
            let id = existing.id;
            tracing::debug!(alert_id = %id, patient_id, "alert already live, activation ignored");
            return Ok(id);
        }

        let now = self.inner.clock.now();
        let countdown_secs = self.inner.config.response_countdown.as_secs();
        let mut alert = Alert::new(patient_id, kind, location, countdown_secs, now)?;
        let contacts = registry.contacts.get(patient_id).cloned().unwrap_or_default();
        let tiers = plan_tiers(&contacts);
        if tiers.is_empty() {
            alert.escalation = EscalationStatus::NoContacts;
        }

        let id = alert.id;
        let activated = AlertEvent::AlertActivated {
            alert_id: id,
            patient_id: alert.patient_id.clone(),
            kind: alert.kind,
            severity: alert.severity,
            location: alert.location.clone(),
            at: now,
        };
        let slot = Arc::new(AlertSlot {
            id,
            alert: Mutex::new(alert),
            contacts,
            signals: EscalationSignals::default(),
            countdown: Mutex::new(None),
            events: self.inner.events.clone(),
            clock: self.inner.clock,
        });
        registry.alerts.insert(id, Arc::clone(&slot));
        registry.live_by_patient.insert(patient_id.to_string(), id);
        drop(registry);

        tracing::info!(alert_id = %id, patient_id, %kind, "alert activated");
        slot.publish(activated);

        self.start_countdown(&slot);
        if tiers.is_empty() {
            tracing::warn!(alert_id = %id, "no contacts available for escalation");
            slot.publish(AlertEvent::EscalationChanged {
                alert_id: id,
                status: EscalationStatus::NoContacts,
                at: now,
            });
        } else {
            self.start_escalation(Arc::clone(&slot), tiers);
        }
        Ok(id)
    }

    /// `Active -> Responding`.
    ///
    /// Tiers already dispatched keep their acknowledgment windows. Once a
    /// contact has acknowledged, no later tier is dispatched.
    pub fn respond(&self, alert_id: AlertId) -> Result<Transition, AlertError> {
        let slot = self.slot(alert_id)?;
        let now = self.inner.clock.now();
        let mut alert = slot.alert();
        let transition = alert.respond(now);
        match transition {
            Transition::Applied { from, to } => {
                tracing::info!(alert_id = %alert_id, "operator responding");
                slot.publish(AlertEvent::StateChanged {
                    alert_id,
                    from,
                    to,
                    at: now,
                });
            }
            Transition::Unchanged { state } => {
                tracing::debug!(alert_id = %alert_id, ?state, "respond ignored");
            }
        }
        Ok(transition)
    }

    /// A contact confirms they received the alert.
    ///
    /// Returns `false` when it changed nothing: the alert is closed or the
    /// contact had already acknowledged.
    pub fn acknowledge(&self, alert_id: AlertId, contact_id: &str) -> Result<bool, AlertError> {
        let slot = self.slot(alert_id)?;
        let now = self.inner.clock.now();
        let mut alert = slot.alert();
        if !alert.state.is_live() {
            tracing::debug!(alert_id = %alert_id, contact_id, "acknowledgment on closed alert ignored");
            return Ok(false);
        }
        let fresh = alert.acknowledge(contact_id, now)?;
        if fresh {
            tracing::info!(alert_id = %alert_id, contact_id, "contact acknowledged");
            slot.publish(AlertEvent::ContactAcknowledged {
                alert_id,
                contact_id: contact_id.to_string(),
                at: now,
            });
            drop(alert);
            slot.signals.ack.notify_one();
        }
        Ok(fresh)
    }

    /// `{Active, Responding} -> Resolved`. No-op on a closed alert.
    pub fn resolve(&self, alert_id: AlertId) -> Result<Transition, AlertError> {
        self.close(alert_id, AlertState::Resolved)
    }

    /// Any live state `-> Cancelled`; contacts already reached are told.
    /// No-op on a closed alert.
    pub fn cancel(&self, alert_id: AlertId) -> Result<Transition, AlertError> {
        self.close(alert_id, AlertState::Cancelled)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, alert_id: AlertId) -> Result<Arc<AlertSlot>, AlertError> {
        self.registry()
            .alerts
            .get(&alert_id)
            .cloned()
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))
    }

    fn close(&self, alert_id: AlertId, to: AlertState) -> Result<Transition, AlertError> {
        let slot = self.slot(alert_id)?;
        let now = self.inner.clock.now();

        let (transition, reached) = {
            let mut alert = slot.alert();
            let escalation_was_final = alert.escalation.is_final();
            let transition = alert.close(to, now);
            if let Transition::Applied { from, to } = transition {
                slot.publish(AlertEvent::StateChanged {
                    alert_id,
                    from,
                    to,
                    at: now,
                });
                if !escalation_was_final {
                    slot.publish(AlertEvent::EscalationChanged {
                        alert_id,
                        status: EscalationStatus::Stopped,
                        at: now,
                    });
                }
            }
            (transition, alert.reached_contacts())
        };

        if !transition.applied() {
            tracing::debug!(alert_id = %alert_id, ?transition, "close ignored, alert already closed");
            return Ok(transition);
        }

        tracing::info!(alert_id = %alert_id, state = ?to, "alert closed");
        slot.signals.cancel.cancel();
        slot.stop_countdown();
        self.archive(&slot);

        if to == AlertState::Cancelled {
            self.inform_reached(&slot, &reached);
        }
        Ok(transition)
    }

    /// Drop a closed alert from the live set; it stays readable by id.
    fn archive(&self, slot: &AlertSlot) {
        let mut registry = self.registry();
        let patient_id = slot.alert().patient_id.clone();
        if registry.live_by_patient.get(&patient_id) == Some(&slot.id) {
            registry.live_by_patient.remove(&patient_id);
        }
    }

    fn inform_reached(&self, slot: &Arc<AlertSlot>, reached: &[String]) {
        let ctx = slot.context();
        for contact in slot.contacts.iter().filter(|c| reached.contains(&c.id)) {
            let gateway = Arc::clone(&self.inner.gateway);
            let target: Arc<dyn EscalationTarget> = Arc::clone(slot) as Arc<dyn EscalationTarget>;
            let contact = contact.clone();
            let ctx = ctx.clone();
            let timeout = self.inner.config.dispatch_timeout;
            self.inner.runtime.spawn(async move {
                inform_cancelled(gateway.as_ref(), target.as_ref(), &contact, &ctx, timeout).await;
            });
        }
    }

    fn start_countdown(&self, slot: &Arc<AlertSlot>) {
        let on_tick: Weak<AlertSlot> = Arc::downgrade(slot);
        let on_expire = Weak::clone(&on_tick);
        let handle = Countdown::start_on(
            &self.inner.runtime,
            self.inner.config.response_countdown,
            move |remaining| {
                if let Some(slot) = on_tick.upgrade() {
                    slot.countdown_tick(remaining);
                }
            },
            move || {
                if let Some(slot) = on_expire.upgrade() {
                    slot.countdown_expired();
                }
            },
        );
        *slot.countdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        // A close that ran before the handle was stored had nothing to stop.
        if slot.alert().state.is_terminal() {
            slot.stop_countdown();
        }
    }

    fn start_escalation(&self, slot: Arc<AlertSlot>, tiers: Vec<Tier>) {
        let scheduler = Arc::clone(&self.inner.scheduler);
        let signals = slot.signals.clone();
        let alert_id = slot.id;
        let target: Arc<dyn EscalationTarget> = slot;
        self.inner.runtime.spawn(async move {
            let status = scheduler.run(target, tiers, signals).await;
            tracing::debug!(alert_id = %alert_id, ?status, "escalation finished");
        });
    }
}

/// One alert and everything attached to it.
struct AlertSlot {
    id: AlertId,
    alert: Mutex<Alert>,
    /// Contacts registered when the alert was raised.
    contacts: Vec<Contact>,
    signals: EscalationSignals,
    countdown: Mutex<Option<CountdownHandle>>,
    events: broadcast::Sender<AlertEvent>,
    clock: Clock,
}

impl AlertSlot {
    fn alert(&self) -> MutexGuard<'_, Alert> {
        self.alert.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: AlertEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn stop_countdown(&self) {
        let handle = self
            .countdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    fn countdown_tick(&self, remaining: u64) {
        let mut alert = self.alert();
        if !alert.state.is_live() {
            return;
        }
        alert.countdown_remaining = remaining;
        self.publish(AlertEvent::CountdownTick {
            alert_id: self.id,
            remaining_secs: remaining,
            at: self.clock.now(),
        });
    }

    fn countdown_expired(&self) {
        let mut alert = self.alert();
        if !alert.state.is_live() {
            return;
        }
        alert.countdown_remaining = 0;
        if alert.state == AlertState::Active {
            tracing::warn!(alert_id = %self.id, "response countdown elapsed with no operator response");
            self.publish(AlertEvent::ResponseOverdue {
                alert_id: self.id,
                at: self.clock.now(),
            });
        }
    }
}

impl EscalationTarget for AlertSlot {
    fn context(&self) -> AlertContext {
        self.alert().context()
    }

    fn state(&self) -> AlertState {
        self.alert().state
    }

    fn acknowledged_by(&self) -> Option<String> {
        self.alert()
            .history
            .iter()
            .filter(|a| a.acknowledged_at.is_some())
            .min_by_key(|a| a.acknowledged_at)
            .map(|a| a.contact_id.clone())
    }

    fn record_attempt(&self, mut attempt: EscalationAttempt) -> bool {
        let mut alert = self.alert();
        attempt.recorded_at = self.clock.now();
        if !alert.record_attempt(attempt.clone()) {
            return false;
        }
        self.publish(AlertEvent::AttemptRecorded {
            alert_id: self.id,
            attempt,
        });
        true
    }

    fn set_status(&self, status: EscalationStatus) {
        let mut alert = self.alert();
        if alert.state.is_terminal() {
            return;
        }
        alert.escalation = status.clone();
        self.publish(AlertEvent::EscalationChanged {
            alert_id: self.id,
            status,
            at: self.clock.now(),
        });
    }

    fn tier_started(&self, tier: &Tier) {
        self.publish(AlertEvent::TierStarted {
            alert_id: self.id,
            tier: tier.priority,
            contact_ids: tier.contacts.iter().map(|c| c.id.clone()).collect(),
            at: self.clock.now(),
        });
    }

    fn cancellation_delivered(&self, contact_id: &str) {
        self.publish(AlertEvent::CancellationDelivered {
            alert_id: self.id,
            contact_id: contact_id.to_string(),
            at: self.clock.now(),
        });
    }
}

/// Stream of one alert's events.
pub struct AlertSubscription {
    alert_id: AlertId,
    rx: broadcast::Receiver<AlertEvent>,
}

impl AlertSubscription {
    pub fn alert_id(&self) -> AlertId {
        self.alert_id
    }

    /// Next event for this alert; `None` once the state machine is gone.
    pub async fn recv(&mut self) -> Option<AlertEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.alert_id() == self.alert_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(alert_id = %self.alert_id, skipped, "alert subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
