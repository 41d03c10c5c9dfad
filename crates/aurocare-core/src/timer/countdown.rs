//! Single-shot cancellable countdown.
//!
//! ## State Transitions
//!
//! ```text
//! Running -> Expired     (deadline reached, on_expire runs once)
//! Running -> Cancelled   (cancel() before the deadline)
//! ```
//!
//! The phase lives behind a mutex shared by the handle and the timer task.
//! Whoever moves it out of `Running` first wins, so once
//! [`CountdownHandle::cancel`] has returned `true` the expiry callback can
//! no longer run.
//!
//! ## Usage
//!
//! ```ignore
//! let handle = Countdown::start(
//!     Duration::from_secs(30),
//!     |remaining| println!("{remaining}s left"),
//!     || println!("expired"),
//! );
//! handle.cancel();
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::time::{sleep_until, Instant};

use super::cancel::CancelToken;

/// Interval between `on_tick` calls.
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountdownPhase {
    Running,
    Expired,
    Cancelled,
}

/// Entry point for spawning countdowns. Timers share no state.
pub struct Countdown;

impl Countdown {
    /// Start a countdown on the current tokio runtime.
    ///
    /// `on_tick` receives the whole seconds still remaining after every
    /// elapsed [`TICK`] while time remains; `on_expire` runs once at the
    /// deadline unless the handle was cancelled first.
    pub fn start<T, E>(duration: Duration, on_tick: T, on_expire: E) -> CountdownHandle
    where
        T: FnMut(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        Self::start_on(&Handle::current(), duration, on_tick, on_expire)
    }

    /// Start a countdown on an explicit runtime handle.
    pub fn start_on<T, E>(
        runtime: &Handle,
        duration: Duration,
        mut on_tick: T,
        on_expire: E,
    ) -> CountdownHandle
    where
        T: FnMut(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let phase = Arc::new(Mutex::new(CountdownPhase::Running));
        let token = CancelToken::new();
        let started = Instant::now();
        let deadline = started + duration;

        let task_phase = Arc::clone(&phase);
        let task_token = token.clone();
        runtime.spawn(async move {
            let mut next_tick = started + TICK;
            while next_tick < deadline {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = sleep_until(next_tick) => {}
                }
                if task_token.is_cancelled() {
                    return;
                }
                on_tick(whole_secs(deadline - next_tick));
                next_tick += TICK;
            }

            tokio::select! {
                _ = task_token.cancelled() => return,
                _ = sleep_until(deadline) => {}
            }

            let fire = {
                let mut phase = task_phase.lock().unwrap_or_else(PoisonError::into_inner);
                if *phase == CountdownPhase::Running {
                    *phase = CountdownPhase::Expired;
                    true
                } else {
                    false
                }
            };
            if fire {
                on_expire();
            }
        });

        CountdownHandle {
            phase,
            token,
            deadline,
        }
    }
}

/// Handle to a running countdown. Dropping it leaves the timer running.
#[derive(Debug)]
pub struct CountdownHandle {
    phase: Arc<Mutex<CountdownPhase>>,
    token: CancelToken,
    deadline: Instant,
}

impl CountdownHandle {
    /// Stop the countdown.
    ///
    /// Returns `true` when this call prevented the expiry; `false` when the
    /// countdown had already expired or been cancelled.
    pub fn cancel(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != CountdownPhase::Running {
            return false;
        }
        *phase = CountdownPhase::Cancelled;
        drop(phase);
        self.token.cancel();
        true
    }

    pub fn phase(&self) -> CountdownPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

fn whole_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl FnMut(u64) + Send + 'static) {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        (ticks, move |remaining| sink.lock().unwrap().push(remaining))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_then_expires() {
        let (ticks, on_tick) = recorder();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);

        let handle = Countdown::start(Duration::from_secs(3), on_tick, move || {
            flag.store(true, Ordering::SeqCst)
        });

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![2, 1]);
        assert!(expired.load(Ordering::SeqCst));
        assert_eq!(handle.phase(), CountdownPhase::Expired);
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_deadline_suppresses_expiry() {
        let (ticks, on_tick) = recorder();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);

        let handle = Countdown::start(Duration::from_secs(5), on_tick, move || {
            flag.store(true, Ordering::SeqCst)
        });

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(handle.cancel());
        assert_eq!(handle.phase(), CountdownPhase::Cancelled);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!expired.load(Ordering::SeqCst));
        assert_eq!(*ticks.lock().unwrap(), vec![4, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_are_independent() {
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let (f, s) = (Arc::clone(&first), Arc::clone(&second));

        let a = Countdown::start(Duration::from_secs(2), |_| {}, move || f.store(true, Ordering::SeqCst));
        let _b = Countdown::start(Duration::from_secs(2), |_| {}, move || s.store(true, Ordering::SeqCst));
        a.cancel();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_duration_rounds_remaining_up() {
        let (ticks, on_tick) = recorder();
        let _handle = Countdown::start(Duration::from_millis(2_500), on_tick, || {});
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![2, 1]);
    }
}
