mod catalog;
mod scheduler;

pub use catalog::{
    default_catalog, ReminderDefinition, ReminderKind, ReminderSchedule, MAX_INTERVAL_SECS,
};
pub use scheduler::{Reminder, ReminderConfig, ReminderId, ReminderScheduler, ReminderStatus};
