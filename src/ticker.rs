//! Periodic ticker.
//!
//! A timer context raises [`TickSignal`]; the loop takes it once per
//! iteration and lets [`Ticker`] decide what the tick does in the current
//! connection state. The timer side never touches the command queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::ble::connection::ConnectionState;
use crate::ble::stack::StatusIndicator;

/// Tick flag shared between the timer context and the loop.
#[derive(Debug, Default)]
pub struct TickSignal {
    raised: AtomicU64,
    pending: AtomicBool,
    notify: Notify,
}

impl TickSignal {
    /// Create a signal with no pending tick.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a tick. Called from the timer context.
    pub fn raise(&self) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Consume the pending tick, if any.
    ///
    /// Ticks raised since the last call collapse into one.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Number of ticks raised so far.
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }

    /// Wait until a tick is raised.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Raise `signal` every `period` from a background task.
pub fn spawn_ticker(signal: Arc<TickSignal>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            signal.raise();
        }
    })
}

/// What a tick asks the loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Blink the scan indicator.
    ToggleIndicator,
    /// Submit one automatic PRU Dynamic Parameter read.
    RequestDynamicRead,
    /// Nothing this cycle.
    Idle,
}

/// Tick bookkeeping owned by the loop.
#[derive(Debug, Clone, Default)]
pub struct Ticker {
    count: u64,
}

impl Ticker {
    /// Create a ticker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ticks handled.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Handle one tick.
    ///
    /// A dynamic read is only requested when the gate is clear; a tick
    /// arriving while a response is outstanding is dropped, not deferred.
    pub fn on_tick(
        &mut self,
        state: ConnectionState,
        polling: bool,
        gate_held: bool,
    ) -> TickAction {
        self.count = self.count.wrapping_add(1);

        let action = match state {
            ConnectionState::Scanning => TickAction::ToggleIndicator,
            ConnectionState::Connected if polling && !gate_held => TickAction::RequestDynamicRead,
            _ => TickAction::Idle,
        };
        trace!("Tick {} in {}: {:?}", self.count, state, action);
        action
    }
}

/// [`StatusIndicator`] that logs instead of driving an LED.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set(&mut self, on: bool) {
        trace!("LED {}", if on { "on" } else { "off" });
    }
}
