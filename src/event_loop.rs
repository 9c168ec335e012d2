//! Host dispatch loop.
//!
//! Waits on three sources (terminal keys, stack events and the tick signal)
//! and feeds whichever is ready into the [`Central`], then runs one
//! [`Central::step`]. Operator input is checked first on every iteration.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ble::event::StackEvent;
use crate::ble::stack::{BleStack, PowerControl, StatusIndicator};
use crate::central::Central;
use crate::console::KeyParser;
use crate::error::{Error, Result};
use crate::ticker::TickSignal;

/// Dispatch loop around a [`Central`].
pub struct EventLoop<S, P, L> {
    central: Central<S, P, L>,
    events: mpsc::UnboundedReceiver<StackEvent>,
    keys: mpsc::UnboundedReceiver<char>,
    tick: Arc<TickSignal>,
    parser: KeyParser,
}

impl<S, P, L> EventLoop<S, P, L>
where
    S: BleStack,
    P: PowerControl,
    L: StatusIndicator,
{
    /// Create a loop.
    pub fn new(
        central: Central<S, P, L>,
        events: mpsc::UnboundedReceiver<StackEvent>,
        keys: mpsc::UnboundedReceiver<char>,
        tick: Arc<TickSignal>,
    ) -> Self {
        Self {
            central,
            events,
            keys,
            tick,
            parser: KeyParser::new(),
        }
    }

    /// Get the central.
    pub fn central(&self) -> &Central<S, P, L> {
        &self.central
    }

    /// Consume the loop and return the central.
    pub fn into_central(self) -> Central<S, P, L> {
        self.central
    }

    /// Feed one terminal character.
    pub fn handle_key(&mut self, key: char) {
        match self.parser.feed(key) {
            Some(Ok(command)) => {
                if let Err(e) = self.central.handle_command(command) {
                    warn!("{}", e);
                }
            }
            Some(Err(e)) => warn!("{}", e),
            None => {}
        }
    }

    /// Run until the key channel closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the stack event channel closes.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if self.central.is_hibernating() {
                tokio::select! {
                    key = self.keys.recv() => match key {
                        Some(_) => {
                            if let Err(e) = self.central.wake() {
                                warn!("Wake failed: {}", e);
                            }
                        }
                        None => return Ok(()),
                    },
                    event = self.events.recv() => match event {
                        Some(event) => self.central.handle_event(event),
                        None => return Err(Error::ChannelClosed("stack events")),
                    },
                }
                continue;
            }

            tokio::select! {
                biased;
                key = self.keys.recv() => match key {
                    Some(key) => self.handle_key(key),
                    None => {
                        info!("Terminal closed");
                        return Ok(());
                    }
                },
                event = self.events.recv() => match event {
                    Some(event) => self.central.handle_event(event),
                    None => return Err(Error::ChannelClosed("stack events")),
                },
                _ = self.tick.notified() => {}
            }

            let tick = self.tick.take();
            self.central.step(tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connection::ConnectionState;
    use crate::ble::stack::{
        LinkState, MockBleStack, MockPowerControl, MockStatusIndicator, RadioActivity,
        RadioSleepMode,
    };
    use crate::config::PtuConfig;
    use std::time::Duration;

    fn event_loop(
        stack: MockBleStack,
        power: MockPowerControl,
    ) -> (
        EventLoop<MockBleStack, MockPowerControl, MockStatusIndicator>,
        mpsc::UnboundedSender<StackEvent>,
        mpsc::UnboundedSender<char>,
        Arc<TickSignal>,
    ) {
        let mut indicator = MockStatusIndicator::new();
        indicator.expect_set().return_const(());
        let central = Central::new(PtuConfig::default(), stack, power, indicator);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (key_tx, key_rx) = mpsc::unbounded_channel();
        let tick = Arc::new(TickSignal::new());
        (
            EventLoop::new(central, event_rx, key_rx, tick.clone()),
            event_tx,
            key_tx,
            tick,
        )
    }

    fn awake_power() -> MockPowerControl {
        let mut power = MockPowerControl::new();
        power
            .expect_request_radio_deep_sleep()
            .return_const(RadioSleepMode::Active);
        power
            .expect_radio_activity()
            .return_const(RadioActivity::EventClose);
        power
    }

    #[tokio::test]
    async fn test_stack_ready_and_ticks() {
        let mut stack = MockBleStack::new();
        stack.expect_start_scan().times(1).returning(|| Ok(()));
        stack.expect_link_state().return_const(LinkState::Scanning);

        let (mut event_loop, event_tx, _key_tx, tick) = event_loop(stack, awake_power());
        event_tx.send(StackEvent::StackReady).unwrap();
        tick.raise();

        let result = tokio::time::timeout(Duration::from_millis(100), event_loop.run()).await;
        assert!(result.is_err());

        assert_eq!(event_loop.central().state(), ConnectionState::Scanning);
        assert_eq!(event_loop.central().tick_count(), 1);
    }

    #[tokio::test]
    async fn test_keys_closed_ends_loop() {
        let (mut event_loop, _event_tx, key_tx, _tick) =
            event_loop(MockBleStack::new(), MockPowerControl::new());
        drop(key_tx);

        assert!(event_loop.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_events_closed_is_error() {
        let (mut event_loop, event_tx, _key_tx, _tick) =
            event_loop(MockBleStack::new(), MockPowerControl::new());
        drop(event_tx);

        assert!(matches!(
            event_loop.run().await,
            Err(Error::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_key_wakes_from_hibernate() {
        let mut stack = MockBleStack::new();
        stack.expect_start_scan().times(2).returning(|| Ok(()));
        stack.expect_link_state().return_const(LinkState::Disconnected);

        let mut power = MockPowerControl::new();
        power.expect_hibernate().times(1).return_const(());

        let (mut event_loop, event_tx, key_tx, _tick) = event_loop(stack, power);
        event_tx.send(StackEvent::StackReady).unwrap();
        event_tx.send(StackEvent::ScanStopped).unwrap();

        let _ = tokio::time::timeout(Duration::from_millis(50), event_loop.run()).await;
        assert!(event_loop.central().is_hibernating());

        key_tx.send('x').unwrap();
        drop(key_tx);
        let _ = tokio::time::timeout(Duration::from_millis(50), event_loop.run()).await;
        assert!(!event_loop.central().is_hibernating());
        assert_eq!(event_loop.central().state(), ConnectionState::Scanning);
    }
}
