//! Tier-by-tier escalation.
//!
//! For each tier, in ascending priority:
//!
//! 1. stop if the alert went terminal or someone acknowledged;
//! 2. dispatch to every contact in the tier concurrently;
//! 3. wait up to `tier_timeout` for an acknowledgment, or only
//!    `failure_backoff` once every dispatch in the tier came back
//!    undelivered;
//! 4. advance.
//!
//! The loop never touches alert state directly. It talks to an
//! [`EscalationTarget`], which serializes every write under the alert's
//! own lock and refuses writes once the alert is terminal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep_until, Instant};

use super::attempt::{EscalationAttempt, EscalationStatus};
use super::contact::{Contact, Tier};
use super::gateway::{DispatchOutcome, NotificationGateway};
use crate::alert::{AlertContext, AlertState};
use crate::clock::Clock;
use crate::error::NotificationError;
use crate::timer::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    /// How long a tier may go unacknowledged before the next one is tried.
    pub tier_timeout: Duration,
    /// Upper bound on a single gateway call.
    pub dispatch_timeout: Duration,
    /// Wait before advancing when a whole tier failed to deliver.
    pub failure_backoff: Duration,
    /// Response countdown shown on a fresh alert.
    pub response_countdown: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            tier_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(10),
            failure_backoff: Duration::from_secs(2),
            response_countdown: Duration::from_secs(30),
        }
    }
}

/// The alert an escalation is working for.
pub trait EscalationTarget: Send + Sync + 'static {
    fn context(&self) -> AlertContext;

    fn state(&self) -> AlertState;

    /// Contact that acknowledged, if anyone has.
    fn acknowledged_by(&self) -> Option<String>;

    /// Append an attempt, stamping `recorded_at` under the alert lock.
    /// Returns `false` (and drops the attempt) once the alert is terminal.
    fn record_attempt(&self, attempt: EscalationAttempt) -> bool;

    fn set_status(&self, status: EscalationStatus);

    fn tier_started(&self, _tier: &Tier) {}

    fn cancellation_delivered(&self, _contact_id: &str) {}
}

/// Signals shared between the scheduler and the alert's owner.
#[derive(Debug, Clone, Default)]
pub struct EscalationSignals {
    pub cancel: CancelToken,
    pub ack: Arc<Notify>,
}

pub struct EscalationScheduler {
    gateway: Arc<dyn NotificationGateway>,
    config: EscalationConfig,
    clock: Clock,
}

impl EscalationScheduler {
    pub fn new(gateway: Arc<dyn NotificationGateway>, config: EscalationConfig, clock: Clock) -> Self {
        Self {
            gateway,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Walk `tiers` until acknowledged, stopped, or exhausted.
    pub async fn run(
        &self,
        target: Arc<dyn EscalationTarget>,
        tiers: Vec<Tier>,
        signals: EscalationSignals,
    ) -> EscalationStatus {
        let ctx = target.context();

        if tiers.is_empty() {
            tracing::warn!(alert_id = %ctx.alert_id, "no contacts available for escalation");
            target.set_status(EscalationStatus::NoContacts);
            return EscalationStatus::NoContacts;
        }

        for tier in &tiers {
            if let Some(status) = self.stop_reason(target.as_ref(), &signals) {
                return self.finish(target.as_ref(), status);
            }

            target.set_status(EscalationStatus::Dispatching {
                tier: tier.priority,
            });
            tracing::info!(
                alert_id = %ctx.alert_id,
                tier = tier.priority,
                contacts = tier.contacts.len(),
                "dispatching tier"
            );

            if let Some(status) = self.run_tier(&target, &ctx, tier, &signals).await {
                return self.finish(target.as_ref(), status);
            }
        }

        if let Some(status) = self.stop_reason(target.as_ref(), &signals) {
            return self.finish(target.as_ref(), status);
        }
        tracing::warn!(alert_id = %ctx.alert_id, "escalation exhausted: no contacts reachable");
        self.finish(target.as_ref(), EscalationStatus::Exhausted)
    }

    fn stop_reason(
        &self,
        target: &dyn EscalationTarget,
        signals: &EscalationSignals,
    ) -> Option<EscalationStatus> {
        if signals.cancel.is_cancelled() || target.state().is_terminal() {
            return Some(EscalationStatus::Stopped);
        }
        target
            .acknowledged_by()
            .map(|contact_id| EscalationStatus::Acknowledged { contact_id })
    }

    fn finish(&self, target: &dyn EscalationTarget, status: EscalationStatus) -> EscalationStatus {
        // Closing an alert already marks it stopped.
        if status != EscalationStatus::Stopped {
            target.set_status(status.clone());
        }
        status
    }

    /// Dispatch one tier and wait out its window. `Some` means stop escalating.
    async fn run_tier(
        &self,
        target: &Arc<dyn EscalationTarget>,
        ctx: &AlertContext,
        tier: &Tier,
        signals: &EscalationSignals,
    ) -> Option<EscalationStatus> {
        let deadline = Instant::now() + self.config.tier_timeout;
        let (tx, mut rx) = mpsc::unbounded_channel();

        target.tier_started(tier);
        for contact in &tier.contacts {
            if let Some(status) = self.stop_reason(target.as_ref(), signals) {
                return Some(status);
            }
            let dispatch = Dispatch {
                gateway: Arc::clone(&self.gateway),
                target: Arc::clone(target),
                contact: contact.clone(),
                ctx: ctx.clone(),
                tier: tier.priority,
                timeout: self.config.dispatch_timeout,
                cancel: signals.cancel.clone(),
                clock: self.clock,
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = dispatch.run().await;
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let mut outstanding = tier.contacts.len();
        let mut delivered = false;
        let mut wait_until = deadline;

        loop {
            tokio::select! {
                biased;
                _ = signals.cancel.cancelled() => return Some(EscalationStatus::Stopped),
                _ = signals.ack.notified() => {
                    if let Some(contact_id) = target.acknowledged_by() {
                        return Some(EscalationStatus::Acknowledged { contact_id });
                    }
                }
                Some(outcome) = rx.recv(), if outstanding > 0 => {
                    outstanding -= 1;
                    delivered |= outcome == Some(DispatchOutcome::Delivered);
                    if outstanding == 0 && !delivered {
                        tracing::debug!(
                            alert_id = %ctx.alert_id,
                            tier = tier.priority,
                            "no delivery in tier, backing off before advancing"
                        );
                        wait_until = deadline.min(Instant::now() + self.config.failure_backoff);
                    }
                }
                _ = sleep_until(wait_until) => return None,
            }
        }
    }
}

/// A single gateway call and the bookkeeping around it.
struct Dispatch {
    gateway: Arc<dyn NotificationGateway>,
    target: Arc<dyn EscalationTarget>,
    contact: Contact,
    ctx: AlertContext,
    tier: u32,
    timeout: Duration,
    cancel: CancelToken,
    clock: Clock,
}

impl Dispatch {
    /// `None` when nothing was recorded.
    async fn run(self) -> Option<DispatchOutcome> {
        if self.cancel.is_cancelled() || self.target.state().is_terminal() {
            return None;
        }

        let dispatched_at = self.clock.now();
        let call = tokio::time::timeout(self.timeout, self.gateway.dispatch(&self.contact, &self.ctx));
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = call => Some(r.unwrap_or_else(|_| Err(NotificationError::TimedOut {
                contact: self.contact.id.clone(),
                timeout_secs: self.timeout.as_secs(),
            }))),
        };

        let Some(result) = result else {
            // The call was dropped mid-flight; the contact may have heard.
            self.inform_if_cancelled().await;
            return None;
        };

        if let Err(err) = &result {
            tracing::warn!(alert_id = %self.ctx.alert_id, %err, "dispatch did not deliver");
        }
        let outcome = DispatchOutcome::from_result(&result);
        let attempt = EscalationAttempt {
            contact_id: self.contact.id.clone(),
            tier: self.tier,
            dispatched_at,
            recorded_at: dispatched_at,
            acknowledged_at: None,
            outcome,
        };

        if !self.target.record_attempt(attempt) {
            tracing::warn!(
                alert_id = %self.ctx.alert_id,
                contact = %self.contact.id,
                "alert closed before dispatch outcome arrived, discarding"
            );
            if outcome == DispatchOutcome::Delivered {
                self.inform_if_cancelled().await;
            }
            return None;
        }
        Some(outcome)
    }

    async fn inform_if_cancelled(&self) {
        if self.target.state() != AlertState::Cancelled {
            return;
        }
        inform_cancelled(
            self.gateway.as_ref(),
            self.target.as_ref(),
            &self.contact,
            &self.ctx,
            self.timeout,
        )
        .await;
    }
}

/// Tell one reached contact the alert was cancelled, bounded by `timeout`.
pub(crate) async fn inform_cancelled(
    gateway: &dyn NotificationGateway,
    target: &dyn EscalationTarget,
    contact: &Contact,
    ctx: &AlertContext,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, gateway.notify_cancelled(contact, ctx)).await {
        Ok(Ok(())) => target.cancellation_delivered(&contact.id),
        Ok(Err(err)) => {
            tracing::warn!(alert_id = %ctx.alert_id, %err, "cancellation notice not delivered")
        }
        Err(_) => tracing::warn!(
            alert_id = %ctx.alert_id,
            contact = %contact.id,
            "cancellation notice timed out"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertType};
    use crate::escalation::plan_tiers;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Alert wrapper without the state machine around it.
    struct FakeTarget {
        alert: Mutex<Alert>,
        statuses: Mutex<Vec<EscalationStatus>>,
        clock: Clock,
    }

    impl FakeTarget {
        fn new() -> Arc<Self> {
            let clock = Clock::system();
            let alert = Alert::new("eleanor", AlertType::Fall, "Living Room", 30, clock.now()).unwrap();
            Arc::new(Self {
                alert: Mutex::new(alert),
                statuses: Mutex::new(Vec::new()),
                clock,
            })
        }

        fn close(&self, to: AlertState) {
            self.alert.lock().unwrap().close(to, self.clock.now());
        }

        fn history(&self) -> Vec<EscalationAttempt> {
            self.alert.lock().unwrap().history.clone()
        }
    }

    impl EscalationTarget for FakeTarget {
        fn context(&self) -> AlertContext {
            self.alert.lock().unwrap().context()
        }
        fn state(&self) -> AlertState {
            self.alert.lock().unwrap().state
        }
        fn acknowledged_by(&self) -> Option<String> {
            let alert = self.alert.lock().unwrap();
            alert
                .history
                .iter()
                .find(|a| a.acknowledged_at.is_some())
                .map(|a| a.contact_id.clone())
        }
        fn record_attempt(&self, mut attempt: EscalationAttempt) -> bool {
            let mut alert = self.alert.lock().unwrap();
            attempt.recorded_at = self.clock.now();
            alert.record_attempt(attempt)
        }
        fn set_status(&self, status: EscalationStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    /// Gateway that records call instants and answers from a script.
    #[derive(Default)]
    struct ScriptedGateway {
        calls: Mutex<Vec<(String, Instant)>>,
        failing: Vec<String>,
        hanging: Vec<String>,
        cancelled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationGateway for ScriptedGateway {
        async fn dispatch(&self, contact: &Contact, _alert: &AlertContext) -> Result<(), NotificationError> {
            self.calls.lock().unwrap().push((contact.id.clone(), Instant::now()));
            if self.hanging.contains(&contact.id) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&contact.id) {
                return Err(NotificationError::DeliveryFailed {
                    contact: contact.id.clone(),
                    reason: "line busy".into(),
                });
            }
            Ok(())
        }

        async fn notify_cancelled(&self, contact: &Contact, _alert: &AlertContext) -> Result<(), NotificationError> {
            self.cancelled.lock().unwrap().push(contact.id.clone());
            Ok(())
        }
    }

    fn config(tier_secs: u64) -> EscalationConfig {
        EscalationConfig {
            tier_timeout: Duration::from_secs(tier_secs),
            dispatch_timeout: Duration::from_secs(2),
            failure_backoff: Duration::from_secs(1),
            response_countdown: Duration::from_secs(30),
        }
    }

    fn roster() -> Vec<Tier> {
        plan_tiers(&[
            Contact::new("p1", "Dr. Wilson", "+1 (555) 123-4567", 1),
            Contact::new("p2", "Michael", "+1 (555) 234-5678", 1),
            Contact::new("p3", "Emergency Services", "911", 2),
        ])
    }

    fn call_offsets(gateway: &ScriptedGateway, start: Instant) -> HashMap<String, u64> {
        gateway
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(id, at)| (id.clone(), (*at - start).as_secs()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn tiers_advance_on_timeout() {
        let gateway = Arc::new(ScriptedGateway::default());
        let scheduler = EscalationScheduler::new(gateway.clone(), config(5), Clock::system());
        let target = FakeTarget::new();
        let start = Instant::now();

        let status = scheduler
            .run(target.clone(), roster(), EscalationSignals::default())
            .await;

        assert_eq!(status, EscalationStatus::Exhausted);
        let offsets = call_offsets(&gateway, start);
        assert_eq!(offsets["p1"], 0);
        assert_eq!(offsets["p2"], 0);
        assert_eq!(offsets["p3"], 5);
        assert_eq!((Instant::now() - start).as_secs(), 10);

        let tiers: Vec<u32> = target.history().iter().map(|a| a.tier).collect();
        assert_eq!(tiers, vec![1, 1, 2]);
        assert_eq!(
            target.statuses.lock().unwrap().clone(),
            vec![
                EscalationStatus::Dispatching { tier: 1 },
                EscalationStatus::Dispatching { tier: 2 },
                EscalationStatus::Exhausted,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_roster_reports_no_contacts() {
        let gateway = Arc::new(ScriptedGateway::default());
        let scheduler = EscalationScheduler::new(gateway.clone(), config(5), Clock::system());
        let target = FakeTarget::new();
        let start = Instant::now();

        let status = scheduler
            .run(target.clone(), Vec::new(), EscalationSignals::default())
            .await;

        assert_eq!(status, EscalationStatus::NoContacts);
        assert_eq!(Instant::now(), start);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgment_stops_escalation() {
        let gateway = Arc::new(ScriptedGateway::default());
        let scheduler = Arc::new(EscalationScheduler::new(gateway.clone(), config(5), Clock::system()));
        let target = FakeTarget::new();
        let signals = EscalationSignals::default();

        let run = {
            let (scheduler, target, signals) = (scheduler.clone(), target.clone(), signals.clone());
            tokio::spawn(async move { scheduler.run(target, roster(), signals).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        target
            .alert
            .lock()
            .unwrap()
            .acknowledge("p2", Utc::now())
            .unwrap();
        signals.ack.notify_one();

        let status = run.await.unwrap();
        assert_eq!(
            status,
            EscalationStatus::Acknowledged {
                contact_id: "p2".into()
            }
        );
        assert!(!gateway.calls.lock().unwrap().iter().any(|(id, _)| id == "p3"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tier_backs_off_instead_of_full_timeout() {
        let gateway = Arc::new(ScriptedGateway {
            failing: vec!["p1".into(), "p2".into()],
            ..Default::default()
        });
        let scheduler = EscalationScheduler::new(gateway.clone(), config(30), Clock::system());
        let target = FakeTarget::new();
        let start = Instant::now();

        scheduler
            .run(target.clone(), roster(), EscalationSignals::default())
            .await;

        let offsets = call_offsets(&gateway, start);
        assert_eq!(offsets["p3"], 1);
        let outcomes: Vec<DispatchOutcome> = target.history().iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Failed, DispatchOutcome::Failed, DispatchOutcome::Delivered]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_gateway_times_out() {
        let gateway = Arc::new(ScriptedGateway {
            hanging: vec!["p3".into()],
            ..Default::default()
        });
        let scheduler = EscalationScheduler::new(gateway.clone(), config(5), Clock::system());
        let target = FakeTarget::new();

        let status = scheduler
            .run(target.clone(), roster(), EscalationSignals::default())
            .await;

        assert_eq!(status, EscalationStatus::Exhausted);
        let last = target.history().pop().unwrap();
        assert_eq!(last.contact_id, "p3");
        assert_eq!(last.outcome, DispatchOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drops_in_flight_dispatch_and_informs_contact() {
        let gateway = Arc::new(ScriptedGateway {
            hanging: vec!["p1".into()],
            ..Default::default()
        });
        let scheduler = Arc::new(EscalationScheduler::new(gateway.clone(), config(5), Clock::system()));
        let target = FakeTarget::new();
        let signals = EscalationSignals::default();

        let run = {
            let (scheduler, target, signals) = (scheduler.clone(), target.clone(), signals.clone());
            tokio::spawn(async move { scheduler.run(target, roster(), signals).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        target.close(AlertState::Cancelled);
        signals.cancel.cancel();

        assert_eq!(run.await.unwrap(), EscalationStatus::Stopped);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // p2 was recorded before the cancel; p1 was still in flight.
        let history = target.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].contact_id, "p2");
        assert_eq!(*gateway.cancelled.lock().unwrap(), vec!["p1".to_string()]);
        assert!(!gateway.calls.lock().unwrap().iter().any(|(id, _)| id == "p3"));
    }
}
