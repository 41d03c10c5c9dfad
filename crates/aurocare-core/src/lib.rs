//! # AuroCare Core Library
//!
//! Emergency-alert escalation and reminder scheduling for an elder-care
//! monitoring dashboard. The dashboard (or the bundled CLI) calls the entry
//! points and renders the events; everything with timing or ordering rules
//! lives here.
//!
//! ## Architecture
//!
//! - **Alerts**: one state machine per alert, addressed by id, with at most
//!   one live alert per patient
//! - **Escalation**: contacts are notified tier by tier, in ascending
//!   priority, until someone acknowledges or the tiers run out
//! - **Reminders**: a single tick source raises deduplicated, capped
//!   reminders from a catalog
//! - **Timers**: cancellable countdowns shared by both subsystems
//! - **Storage**: TOML configuration
//!
//! ## Key Components
//!
//! - [`AlertStateMachine`]: alert lifecycle and escalation driver
//! - [`EscalationScheduler`]: tier-by-tier dispatch loop
//! - [`NotificationGateway`]: trait for delivering notifications to contacts
//! - [`ReminderScheduler`]: periodic reminder scheduler
//! - [`Countdown`]: single-shot cancellable countdown
//! - [`Config`]: configuration management

pub mod alert;
pub mod clock;
pub mod error;
pub mod escalation;
pub mod events;
pub mod reminder;
pub mod storage;
pub mod timer;

pub use alert::{Alert, AlertId, AlertState, AlertStateMachine, AlertType, Severity, Transition};
pub use clock::Clock;
pub use error::{AlertError, ConfigError, CoreError, NotificationError, ReminderError, ValidationError};
pub use escalation::{
    Contact, DispatchOutcome, EscalationConfig, EscalationScheduler, EscalationStatus,
    LoggingGateway, NotificationGateway,
};
pub use events::{AlertEvent, ReminderEvent};
pub use reminder::{Reminder, ReminderConfig, ReminderDefinition, ReminderScheduler, ReminderStatus};
pub use storage::Config;
pub use timer::{CancelToken, Countdown, CountdownHandle};
