use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gateway::DispatchOutcome;

/// One dispatch to one contact, recorded once its outcome is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationAttempt {
    pub contact_id: String,
    /// Priority value of the tier this dispatch belonged to.
    pub tier: u32,
    pub dispatched_at: DateTime<Utc>,
    /// When the outcome was written into the alert history.
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub outcome: DispatchOutcome,
}

/// Progress of an alert's escalation, reported as state rather than errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum EscalationStatus {
    /// Scheduler not started yet.
    Pending,
    /// Waiting on the tier with this priority.
    Dispatching { tier: u32 },
    /// A contact confirmed; no further tiers.
    Acknowledged { contact_id: String },
    /// Nobody available to notify.
    NoContacts,
    /// Every tier timed out without acknowledgment: no contacts reachable.
    Exhausted,
    /// The alert was resolved or cancelled while escalating.
    Stopped,
}

impl EscalationStatus {
    /// True once the scheduler will not dispatch again.
    pub fn is_final(&self) -> bool {
        !matches!(
            self,
            EscalationStatus::Pending | EscalationStatus::Dispatching { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tags_are_kebab_case() {
        let json = serde_json::to_value(EscalationStatus::NoContacts).unwrap();
        assert_eq!(json["status"], "no-contacts");

        let json = serde_json::to_value(EscalationStatus::Dispatching { tier: 2 }).unwrap();
        assert_eq!(json["status"], "dispatching");
        assert_eq!(json["tier"], 2);
    }

    #[test]
    fn final_statuses() {
        assert!(!EscalationStatus::Pending.is_final());
        assert!(!EscalationStatus::Dispatching { tier: 1 }.is_final());
        assert!(EscalationStatus::Exhausted.is_final());
        assert!(EscalationStatus::Stopped.is_final());
    }
}
