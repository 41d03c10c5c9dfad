mod attempt;
mod contact;
mod gateway;
mod scheduler;

pub use attempt::{EscalationAttempt, EscalationStatus};
pub use contact::{plan_tiers, Contact, Tier};
pub use gateway::{DispatchOutcome, LoggingGateway, NotificationGateway};
pub use scheduler::{
    EscalationConfig, EscalationScheduler, EscalationSignals, EscalationTarget,
};
pub(crate) use scheduler::inform_cancelled;
