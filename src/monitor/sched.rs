//! Periodic polling with an injectable clock and cooperative cancellation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::error::MonitorError;

/// Time source for the poller. Production uses [`SystemClock`]; tests feed
/// fixed timestamps.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Cooperative cancellation flag, checked between work units.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// The owner canceled; not a failure.
    Canceled,
    /// A tick panicked; monitoring is latched off.
    Halted,
}

/// Runs a tick closure at a fixed interval.
///
/// A tick returning `Err` is logged and the loop continues; a panicking
/// tick stops the loop for good and latches the halted flag the owner can
/// observe.
pub struct Poller<F> {
    tick: F,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    halted: Arc<AtomicBool>,
}

impl<F> Poller<F>
where
    F: FnMut(u64) -> Result<(), MonitorError>,
{
    pub fn new(clock: Arc<dyn Clock>, tick: F) -> Self {
        Self {
            tick,
            clock,
            cancel: CancelToken::new(),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn halted_flag(&self) -> Arc<AtomicBool> {
        self.halted.clone()
    }

    /// One tick. Returns `None` while the loop should keep going.
    pub fn run_once(&mut self) -> Option<PollExit> {
        if self.cancel.is_canceled() {
            return Some(PollExit::Canceled);
        }
        let now = self.clock.now_ns();
        match catch_unwind(AssertUnwindSafe(|| (self.tick)(now))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!("poll tick failed: {e}");
                None
            }
            Err(_) => {
                self.halted.store(true, Ordering::SeqCst);
                error!("poll tick panicked; monitoring halted");
                Some(PollExit::Halted)
            }
        }
    }

    pub fn run(mut self, interval: Duration) -> PollExit {
        loop {
            if let Some(exit) = self.run_once() {
                return exit;
            }
            std::thread::sleep(interval);
        }
    }
}

impl<F> Poller<F>
where
    F: FnMut(u64) -> Result<(), MonitorError> + Send + 'static,
{
    pub fn spawn(self, interval: Duration) -> std::io::Result<JoinHandle<PollExit>> {
        std::thread::Builder::new()
            .name("jvmmon-poll".to_string())
            .spawn(move || self.run(interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FixedClock(u64);
    impl Clock for FixedClock {
        fn now_ns(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn run_once_passes_clock_time_to_tick() {
        let seen = Rc::new(Cell::new(0));
        let seen2 = seen.clone();
        let mut p = Poller::new(Arc::new(FixedClock(42)), move |now| {
            seen2.set(now);
            Ok(())
        });
        assert_eq!(p.run_once(), None);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn tick_error_does_not_stop_the_loop() {
        let mut p = Poller::new(Arc::new(FixedClock(0)), |_| Err(MonitorError::Halted));
        assert_eq!(p.run_once(), None);
        assert_eq!(p.run_once(), None);
    }

    #[test]
    fn tick_panic_halts_and_latches() {
        let mut p = Poller::new(Arc::new(FixedClock(0)), |_| -> Result<(), MonitorError> {
            panic!("boom")
        });
        let halted = p.halted_flag();
        assert_eq!(p.run_once(), Some(PollExit::Halted));
        assert!(halted.load(Ordering::SeqCst));
    }

    #[test]
    fn cancellation_is_a_distinct_outcome() {
        let mut p = Poller::new(Arc::new(FixedClock(0)), |_| Ok(()));
        let token = p.cancel_token();
        assert_eq!(p.run_once(), None);
        token.cancel();
        assert_eq!(p.run_once(), Some(PollExit::Canceled));
        assert!(!p.halted_flag().load(Ordering::SeqCst));
    }
}
