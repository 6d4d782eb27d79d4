//! Send throttling: a mandatory quiet period after a burst of sends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// Rate limiter gating the act of transmitting.
///
/// After `max_commands` calls to [`wait_until_ok_to_send`](Self::wait_until_ok_to_send)
/// return without blocking, the next call sleeps for the full `quiet_period`
/// before a fresh burst is granted. This is independent of, and composes
/// with, the command queue's admission throttle: a dispatch unit clears
/// both gates before transmission.
pub struct SendThrottle {
    enabled: AtomicBool,
    max_commands: u32,
    quiet_period: Duration,
    /// Sends granted in the current burst. Waiters serialize on this lock,
    /// so a quiet period holds back every worker at once.
    burst: Mutex<u32>,
}

impl SendThrottle {
    /// Create an active throttle allowing `max_commands` sends per burst.
    pub fn new(max_commands: u32, quiet_period: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(max_commands > 0),
            max_commands,
            quiet_period,
            burst: Mutex::new(0),
        }
    }

    /// Create a throttle that never blocks.
    pub fn disabled() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            max_commands: 0,
            quiet_period: Duration::ZERO,
            burst: Mutex::new(0),
        }
    }

    /// Whether send throttling is currently in effect.
    pub fn is_send_throttling_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn off send throttling; subsequent calls return immediately.
    pub fn disable_send_throttling(&self) {
        self.enabled.store(false, Ordering::Release);
        debug!("Send throttling disabled");
    }

    /// Block until this caller is allowed to transmit.
    pub async fn wait_until_ok_to_send(&self) {
        if !self.is_send_throttling_enabled() {
            return;
        }
        let mut sent = self.burst.lock().await;
        if !self.is_send_throttling_enabled() {
            return;
        }

        if *sent >= self.max_commands {
            debug!(
                burst = self.max_commands,
                quiet_period_ms = self.quiet_period.as_millis() as u64,
                "Send burst exhausted, entering quiet period"
            );
            sleep(self.quiet_period).await;
            *sent = 0;
        }
        *sent += 1;
    }
}
