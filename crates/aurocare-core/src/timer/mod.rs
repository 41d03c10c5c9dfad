mod cancel;
mod countdown;

pub use cancel::CancelToken;
pub use countdown::{Countdown, CountdownHandle, CountdownPhase, TICK};
