//! Alert records and their transition rules.
//!
//! ```text
//! Idle -> Active -> Responding -> Resolved
//!           |           |
//!           +-----------+-------> Cancelled
//! ```
//!
//! `Idle` is what a patient without a live alert reports; alerts themselves
//! are born `Active`. `Resolved` and `Cancelled` are terminal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, ValidationError};
use crate::escalation::{DispatchOutcome, EscalationAttempt, EscalationStatus};

pub type AlertId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Medical,
    Fall,
    Medication,
    Panic,
}

impl AlertType {
    pub fn title(self) -> &'static str {
        match self {
            AlertType::Medical => "Medical Emergency Detected",
            AlertType::Fall => "Fall Detection Alert",
            AlertType::Medication => "Medication Alert",
            AlertType::Panic => "Panic Button Activated",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AlertType::Medical => "Abnormal vital signs detected",
            AlertType::Fall => "Sudden impact detected, no movement for 30 seconds",
            AlertType::Medication => "Critical medication missed",
            AlertType::Panic => "Manual emergency alert triggered",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            AlertType::Medical | AlertType::Fall => Severity::Critical,
            AlertType::Panic => Severity::High,
            AlertType::Medication => Severity::Medium,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::Medical => "medical",
            AlertType::Fall => "fall",
            AlertType::Medication => "medication",
            AlertType::Panic => "panic",
        };
        f.write_str(s)
    }
}

impl FromStr for AlertType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "medical" => Ok(AlertType::Medical),
            "fall" => Ok(AlertType::Fall),
            "medication" => Ok(AlertType::Medication),
            "panic" => Ok(AlertType::Panic),
            other => Err(ValidationError::InvalidValue {
                field: "type".into(),
                message: format!("unknown alert type '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Idle,
    Active,
    Responding,
    Resolved,
    Cancelled,
}

impl AlertState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertState::Resolved | AlertState::Cancelled)
    }

    pub fn is_live(self) -> bool {
        matches!(self, AlertState::Active | AlertState::Responding)
    }
}

/// What an operator action did to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Transition {
    Applied { from: AlertState, to: AlertState },
    /// The action did not apply in the current state; nothing changed.
    Unchanged { state: AlertState },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// The slice of an alert a notification carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertContext {
    pub alert_id: AlertId,
    pub patient_id: String,
    pub kind: AlertType,
    pub severity: Severity,
    pub location: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub severity: Severity,
    pub patient_id: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub state: AlertState,
    /// Whole seconds left in the response countdown.
    pub countdown_remaining: u64,
    pub escalation: EscalationStatus,
    /// Attempts in the order their outcomes were recorded.
    pub history: Vec<EscalationAttempt>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        patient_id: &str,
        kind: AlertType,
        location: &str,
        countdown_secs: u64,
        at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        ValidationError::require("patient_id", patient_id)?;
        ValidationError::require("location", location)?;
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.default_severity(),
            patient_id: patient_id.trim().to_string(),
            location: location.trim().to_string(),
            created_at: at,
            state: AlertState::Active,
            countdown_remaining: countdown_secs,
            escalation: EscalationStatus::Pending,
            history: Vec::new(),
            responded_at: None,
            closed_at: None,
        })
    }

    pub fn context(&self) -> AlertContext {
        AlertContext {
            alert_id: self.id,
            patient_id: self.patient_id.clone(),
            kind: self.kind,
            severity: self.severity,
            location: self.location.clone(),
            title: self.kind.title().to_string(),
            created_at: self.created_at,
        }
    }

    /// `Active -> Responding`.
    pub fn respond(&mut self, at: DateTime<Utc>) -> Transition {
        match self.state {
            AlertState::Active => {
                self.state = AlertState::Responding;
                self.responded_at = Some(at);
                Transition::Applied {
                    from: AlertState::Active,
                    to: AlertState::Responding,
                }
            }
            state => Transition::Unchanged { state },
        }
    }

    /// Move a live alert to a terminal state.
    pub fn close(&mut self, to: AlertState, at: DateTime<Utc>) -> Transition {
        debug_assert!(to.is_terminal());
        if !self.state.is_live() {
            return Transition::Unchanged { state: self.state };
        }
        let from = self.state;
        self.state = to;
        self.closed_at = Some(at);
        if !self.escalation.is_final() {
            self.escalation = EscalationStatus::Stopped;
        }
        Transition::Applied { from, to }
    }

    /// Record an attempt unless the alert is already terminal.
    ///
    /// History stays ordered by tier: a slow outcome from an earlier tier
    /// lands after that tier's other attempts, not after later tiers.
    pub fn record_attempt(&mut self, attempt: EscalationAttempt) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let at = self.history.partition_point(|a| a.tier <= attempt.tier);
        self.history.insert(at, attempt);
        true
    }

    /// Mark the contact's latest delivered attempt acknowledged.
    ///
    /// Returns `Ok(false)` when it was already acknowledged.
    pub fn acknowledge(&mut self, contact_id: &str, at: DateTime<Utc>) -> Result<bool, AlertError> {
        let attempt = self
            .history
            .iter_mut()
            .rev()
            .find(|a| a.contact_id == contact_id && a.outcome == DispatchOutcome::Delivered)
            .ok_or_else(|| AlertError::NotDispatched {
                alert_id: self.id.to_string(),
                contact_id: contact_id.to_string(),
            })?;
        if attempt.acknowledged_at.is_some() {
            return Ok(false);
        }
        attempt.acknowledged_at = Some(at);
        Ok(true)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.history.iter().any(|a| a.acknowledged_at.is_some())
    }

    /// Contacts whose dispatch was delivered, in first-delivery order.
    pub fn reached_contacts(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for attempt in &self.history {
            if attempt.outcome == DispatchOutcome::Delivered && !seen.contains(&attempt.contact_id) {
                seen.push(attempt.contact_id.clone());
            }
        }
        seen
    }
}
