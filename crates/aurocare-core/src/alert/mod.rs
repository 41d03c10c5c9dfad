mod machine;
mod model;

pub use machine::{AlertStateMachine, AlertSubscription};
pub use model::{Alert, AlertContext, AlertId, AlertState, AlertType, Severity, Transition};
