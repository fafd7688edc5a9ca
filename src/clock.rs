#[cfg(test)] use mockall::automock;
use std::time::Instant;

/// Source of 'current time' for the transport. It is injected rather than read directly to
///  allow deterministic tests of timeouts and simulated latency.
///
/// NB: Implementations must be monotonic
#[cfg_attr(test, automock)]
pub trait Clock: Send + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
