//! Notification delivery seam.
//!
//! Telephony and SMS live outside this crate. Every delivery channel
//! implements [`NotificationGateway`]; the escalation scheduler bounds each
//! call with its own dispatch timeout, so a gateway that hangs still yields
//! a `timeout` outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::contact::Contact;
use crate::alert::AlertContext;
use crate::error::NotificationError;

/// Result of one dispatch as recorded in an alert's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Delivered,
    Failed,
    Timeout,
}

impl DispatchOutcome {
    pub fn from_result(result: &Result<(), NotificationError>) -> Self {
        match result {
            Ok(()) => DispatchOutcome::Delivered,
            Err(NotificationError::DeliveryFailed { .. }) => DispatchOutcome::Failed,
            Err(NotificationError::TimedOut { .. }) => DispatchOutcome::Timeout,
        }
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver an alert to one contact.
    async fn dispatch(&self, contact: &Contact, alert: &AlertContext)
        -> Result<(), NotificationError>;

    /// Tell a contact that was already reached that the alert was cancelled.
    async fn notify_cancelled(
        &self,
        _contact: &Contact,
        _alert: &AlertContext,
    ) -> Result<(), NotificationError> {
        Ok(()) // default no-op
    }
}

/// Gateway that only writes to the log and always delivers.
///
/// Stands in for the telephony integration in the CLI.
#[derive(Debug, Clone, Default)]
pub struct LoggingGateway {
    latency: Duration,
}

impl LoggingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a channel that takes `latency` to confirm delivery.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl NotificationGateway for LoggingGateway {
    async fn dispatch(
        &self,
        contact: &Contact,
        alert: &AlertContext,
    ) -> Result<(), NotificationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        tracing::info!(
            alert_id = %alert.alert_id,
            contact = %contact.id,
            phone = %contact.phone,
            "{} for {} at {}: notifying {}",
            alert.title,
            alert.patient_id,
            alert.location,
            contact.name
        );
        Ok(())
    }

    async fn notify_cancelled(
        &self,
        contact: &Contact,
        alert: &AlertContext,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            alert_id = %alert.alert_id,
            contact = %contact.id,
            "alert cancelled: informing {}",
            contact.name
        );
        Ok(())
    }
}
