use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertId, AlertState, AlertType, Severity};
use crate::escalation::{EscalationAttempt, EscalationStatus};
use crate::reminder::{Reminder, ReminderId, ReminderKind};

/// Every alert state change produces an AlertEvent.
/// Observers subscribe per alert or to the whole stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlertEvent {
    AlertActivated {
        alert_id: AlertId,
        patient_id: String,
        kind: AlertType,
        severity: Severity,
        location: String,
        at: DateTime<Utc>,
    },
    StateChanged {
        alert_id: AlertId,
        from: AlertState,
        to: AlertState,
        at: DateTime<Utc>,
    },
    CountdownTick {
        alert_id: AlertId,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// Response countdown ran out while nobody had responded.
    ResponseOverdue {
        alert_id: AlertId,
        at: DateTime<Utc>,
    },
    TierStarted {
        alert_id: AlertId,
        tier: u32,
        contact_ids: Vec<String>,
        at: DateTime<Utc>,
    },
    AttemptRecorded {
        alert_id: AlertId,
        attempt: EscalationAttempt,
    },
    ContactAcknowledged {
        alert_id: AlertId,
        contact_id: String,
        at: DateTime<Utc>,
    },
    EscalationChanged {
        alert_id: AlertId,
        status: EscalationStatus,
        at: DateTime<Utc>,
    },
    /// A reached contact was told the alert was cancelled.
    CancellationDelivered {
        alert_id: AlertId,
        contact_id: String,
        at: DateTime<Utc>,
    },
}

impl AlertEvent {
    pub fn alert_id(&self) -> AlertId {
        match self {
            AlertEvent::AlertActivated { alert_id, .. }
            | AlertEvent::StateChanged { alert_id, .. }
            | AlertEvent::CountdownTick { alert_id, .. }
            | AlertEvent::ResponseOverdue { alert_id, .. }
            | AlertEvent::TierStarted { alert_id, .. }
            | AlertEvent::AttemptRecorded { alert_id, .. }
            | AlertEvent::ContactAcknowledged { alert_id, .. }
            | AlertEvent::EscalationChanged { alert_id, .. }
            | AlertEvent::CancellationDelivered { alert_id, .. } => *alert_id,
        }
    }
}

/// Reminder lifecycle notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReminderEvent {
    /// A reminder became pending and its countdown started.
    ReminderPending { reminder: Reminder },
    /// Eligible but the pending cap is full; it waits its turn.
    ReminderQueued {
        key: String,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
    ReminderShown {
        reminder_id: ReminderId,
        at: DateTime<Utc>,
    },
    ReminderAcknowledged {
        reminder_id: ReminderId,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
    ReminderDismissed {
        reminder_id: ReminderId,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
    ReminderExpired {
        reminder_id: ReminderId,
        kind: ReminderKind,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn alert_event_is_tagged() {
        let id = Uuid::new_v4();
        let event = AlertEvent::StateChanged {
            alert_id: id,
            from: AlertState::Active,
            to: AlertState::Responding,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["to"], "responding");
        assert_eq!(event.alert_id(), id);
    }
}
