//! The PTU central.
//!
//! [`Central`] is the single owner of the peer registry, the connection
//! session and the flow controller. Everything that changes them goes
//! through it: stack events (see [`crate::dispatcher`]), operator commands
//! and ticks. Calls into the stack never block; their completions come back
//! as events.

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::ble::characteristics::{AttributeTarget, CccdChange, WptCharacteristic, WriteMode};
use crate::ble::connection::{ConnectionSession, ConnectionState};
use crate::ble::stack::{BleStack, PowerControl, StatusIndicator};
use crate::command::{FlowController, GattIntent, Opcode, Origin, PendingCommand};
use crate::config::PtuConfig;
use crate::console::{OperatorCommand, HELP_TEXT};
use crate::error::{Error, Result};
use crate::power::{PowerPolicy, SleepDepth};
use crate::registry::DeviceRegistry;
use crate::ticker::{TickAction, Ticker};
use crate::utils::hex_bytes;

/// BLE central context of the PTU.
pub struct Central<S, P, L> {
    pub(crate) config: PtuConfig,
    pub(crate) stack: S,
    pub(crate) power: P,
    pub(crate) indicator: L,
    pub(crate) registry: DeviceRegistry,
    pub(crate) session: ConnectionSession,
    pub(crate) flow: FlowController,
    pub(crate) ticker: Ticker,
    pub(crate) power_policy: PowerPolicy,
    /// Continuous PRU Dynamic Parameter read enabled by the operator.
    pub(crate) polling: bool,
    /// Hibernate entered, waiting for [`Central::wake`].
    pub(crate) hibernating: bool,
    pub(crate) indicator_on: bool,
}

impl<S, P, L> Central<S, P, L>
where
    S: BleStack,
    P: PowerControl,
    L: StatusIndicator,
{
    /// Create a central in the `Idle` state.
    ///
    /// Nothing happens until the stack reports `StackReady`.
    pub fn new(config: PtuConfig, stack: S, power: P, indicator: L) -> Self {
        let registry = DeviceRegistry::new(config.registry_capacity);
        Self {
            config,
            stack,
            power,
            indicator,
            registry,
            session: ConnectionSession::new(),
            flow: FlowController::new(),
            ticker: Ticker::new(),
            power_policy: PowerPolicy::new(),
            polling: false,
            hibernating: false,
            indicator_on: false,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PtuConfig {
        &self.config
    }

    /// Get the peer registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Get the connection session.
    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    /// Get the flow controller.
    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    /// Check if continuous dynamic read is enabled.
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Check if the central is hibernating.
    pub fn is_hibernating(&self) -> bool {
        self.hibernating
    }

    /// Number of ticks handled.
    pub fn tick_count(&self) -> u64 {
        self.ticker.count()
    }

    /// Check if the status indicator is lit.
    pub fn indicator_on(&self) -> bool {
        self.indicator_on
    }

    /// Get the BLE stack.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Get the BLE stack for modification.
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// Get the power control.
    pub fn power(&self) -> &P {
        &self.power
    }

    /// Get the status indicator.
    pub fn indicator(&self) -> &L {
        &self.indicator
    }

    /// Handle one operator command.
    ///
    /// Attribute-protocol commands are parked in the operator slot and
    /// issued as soon as the link is free. Errors leave the state as it was.
    pub fn handle_command(&mut self, command: OperatorCommand) -> Result<()> {
        debug!("Operator command: {:?}", command);

        let result = match command {
            OperatorCommand::Help => {
                info!("\n{}", HELP_TEXT);
                Ok(())
            }
            OperatorCommand::SelectPeer(digit) => self.select_peer(digit as usize),
            OperatorCommand::Connect => self.connect(),
            OperatorCommand::CancelConnect => self.cancel_connect(),
            OperatorCommand::Disconnect => self.disconnect(),
            OperatorCommand::StartDiscovery => {
                self.polling = false;
                if let Some(dropped) = self.flow.clear_auto() {
                    debug!("Discarding auto intent '{}'", dropped);
                }
                self.submit_operator(GattIntent::Discover)
            }
            OperatorCommand::EnableAlertNotifications
            | OperatorCommand::EnableAlertIndications
            | OperatorCommand::DisableAlert
            | OperatorCommand::ReadStaticParameters
            | OperatorCommand::ReadDynamicParameters
            | OperatorCommand::EnableCharging
            | OperatorCommand::DisableCharging => match command.gatt_intent() {
                Some(intent) => self.submit_operator(intent),
                None => Ok(()),
            },
            OperatorCommand::StartDynamicPolling => {
                self.polling = true;
                info!("Continuous {} read enabled", WptCharacteristic::PruDynamic);
                Ok(())
            }
            OperatorCommand::StopDynamicPolling => {
                self.polling = false;
                info!("Continuous {} read disabled", WptCharacteristic::PruDynamic);
                Ok(())
            }
        };

        self.pump();
        result
    }

    /// Run one loop iteration after events and commands were handled.
    ///
    /// Handles the tick if one was taken, issues whatever the link is free
    /// for, then applies the power policy.
    pub fn step(&mut self, tick: bool) -> SleepDepth {
        if tick {
            self.on_tick();
        }
        self.pump();

        if self.hibernating {
            return SleepDepth::Hibernate;
        }

        let idle = self.session.hibernate_requested && self.session.state == ConnectionState::Idle;
        let depth = self
            .power_policy
            .evaluate(&mut self.power, self.stack.link_state(), idle);

        if depth == SleepDepth::Hibernate {
            self.session.hibernate_requested = false;
            self.hibernating = true;
            self.set_indicator(false);
        }
        depth
    }

    /// Leave hibernation and scan again.
    pub fn wake(&mut self) -> Result<()> {
        if !self.hibernating {
            return Ok(());
        }
        info!("Wake up");
        // Events handled while hibernating may already have moved the session
        if self.session.state == ConnectionState::Idle {
            self.start_scanning()?;
        }
        self.hibernating = false;
        Ok(())
    }

    /// Issue parked intents while the link is free.
    pub fn pump(&mut self) {
        while let Some((intent, origin)) = self.flow.next_ready() {
            if !self.session.state.is_connected() {
                debug!("Dropping {} intent '{}': not connected", origin, intent);
                continue;
            }
            if let Err(e) = self.issue(intent, origin) {
                warn!("Failed to {}: {}", intent, e);
            }
        }
    }

    fn select_peer(&mut self, index: usize) -> Result<()> {
        let index = self.registry.validate_selection(index)?;
        self.session.selected_peer = Some(index);
        if let Some(peer) = self.registry.get(index) {
            info!("Selected peer #{}: {}", index, peer.address());
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        if self.session.state != ConnectionState::Scanning {
            return Err(self.invalid_state("connect"));
        }
        let index = self.session.selected_peer.ok_or(Error::NoPeerSelected)?;
        let address = *self
            .registry
            .get(index)
            .ok_or(Error::InvalidPeerIndex {
                index,
                count: self.registry.count(),
            })?
            .address();

        self.stack.stop_scan()?;
        self.session.connect_intent = true;
        self.session.rescan_on_stop = false;
        info!("Stopping scan to connect to peer #{} ({})", index, address);
        self.transition(ConnectionState::Connecting);
        Ok(())
    }

    fn cancel_connect(&mut self) -> Result<()> {
        if self.session.state != ConnectionState::Connecting {
            return Err(self.invalid_state("cancel connect"));
        }

        if self.session.connect_issued {
            self.stack.cancel_connect()?;
            self.session.clear_link();
            info!("Connection request cancelled");
            self.rescan();
            Ok(())
        } else {
            // Scan stop still in flight
            self.session.connect_intent = false;
            self.session.rescan_on_stop = true;
            info!("Connection request cancelled");
            self.transition(ConnectionState::Scanning);
            Ok(())
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        if !self.session.state.is_connected() {
            return Err(Error::NotConnected);
        }
        self.stack.disconnect()?;
        info!("Disconnecting");
        Ok(())
    }

    fn submit_operator(&mut self, intent: GattIntent) -> Result<()> {
        if !self.session.state.is_connected() {
            return Err(Error::NotConnected);
        }
        self.flow.submit(intent, Origin::Operator)?;
        if self.flow.is_awaiting_response() {
            info!("'{}' deferred until the outstanding response arrives", intent);
        }
        Ok(())
    }

    /// Resolve an intent against the session and hand it to the stack.
    ///
    /// Shadows are committed only once the stack accepted the request. The
    /// gate closes for every request that expects a response.
    fn issue(&mut self, intent: GattIntent, origin: Origin) -> Result<()> {
        let handles = self.session.handles;

        let pending = match intent {
            GattIntent::Discover => {
                self.stack.discover_services()?;
                info!("Discovering services");
                Some(PendingCommand::new(Opcode::DiscoverServices, None, origin))
            }
            GattIntent::Read(characteristic) => {
                let target = AttributeTarget::value(characteristic, &handles);
                self.stack.read_characteristic(target)?;
                debug!("Reading {}", target);
                Some(PendingCommand::new(
                    Opcode::ReadCharacteristic,
                    Some(target),
                    origin,
                ))
            }
            GattIntent::AlertCccd(change) => {
                let target = AttributeTarget::alert_cccd(&handles);
                let mut cccd = self.session.alert_cccd;
                let value = change.apply(&mut cccd).to_bytes();
                self.stack.set_descriptor(target, &value)?;
                self.session.alert_cccd = cccd;
                info!("{} CCCD <- {}", target, hex_bytes(&value));

                let opcode = match change {
                    CccdChange::EnableIndications => Opcode::SetIndicateDescriptor,
                    CccdChange::EnableNotifications | CccdChange::Disable => {
                        Opcode::SetNotifyDescriptor
                    }
                };
                Some(
                    PendingCommand::new(opcode, Some(target), origin)
                        .with_payload(Bytes::copy_from_slice(&value)),
                )
            }
            GattIntent::Charge(change) => {
                let index = self.session.active_peer.ok_or(Error::NotConnected)?;
                let peer = self.registry.get_mut(index).ok_or(Error::NotConnected)?;

                let mut control = *peer.control();
                control.apply(change);
                let payload = control.to_bytes();
                let target = AttributeTarget::value(WptCharacteristic::PruControl, &handles);
                let mode = self.config.control_write_mode;

                self.stack.write_characteristic(target, &payload, mode)?;
                *peer.control_mut() = control;
                info!("{} <- {}", target, hex_bytes(&payload));

                match mode {
                    WriteMode::WithResponse => Some(
                        PendingCommand::new(Opcode::WriteCharacteristic, Some(target), origin)
                            .with_payload(payload),
                    ),
                    WriteMode::WithoutResponse => None,
                }
            }
        };

        if let Some(pending) = pending {
            self.flow.begin(pending);
        }
        Ok(())
    }

    fn on_tick(&mut self) {
        let state = self.session.state;
        let gate_held = self.flow.is_awaiting_response();

        match self.ticker.on_tick(state, self.polling, gate_held) {
            TickAction::ToggleIndicator => self.set_indicator(!self.indicator_on),
            TickAction::RequestDynamicRead => {
                let read = GattIntent::Read(WptCharacteristic::PruDynamic);
                if let Err(e) = self.flow.submit(read, Origin::Auto) {
                    warn!("Failed to queue {}: {}", read, e);
                }
            }
            TickAction::Idle => self.set_indicator(state.is_connected()),
        }
    }

    /// Scan again after a link or a connect attempt ended.
    ///
    /// If the stack refuses, the session powers down to `Idle` with
    /// hibernate requested so the next wake retries.
    pub(crate) fn rescan(&mut self) {
        if self.start_scanning().is_err() {
            self.transition(ConnectionState::Idle);
            self.session.hibernate_requested = true;
        }
    }

    /// Start scanning and enter `Scanning`.
    pub(crate) fn start_scanning(&mut self) -> Result<()> {
        self.session.hibernate_requested = false;
        self.session.rescan_on_stop = false;
        match self.stack.start_scan() {
            Ok(()) => {
                self.transition(ConnectionState::Scanning);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start scanning: {}", e);
                Err(e)
            }
        }
    }

    pub(crate) fn transition(&mut self, to: ConnectionState) {
        let from = self.session.state;
        if from != to {
            info!("State: {} -> {}", from, to);
        }
        self.session.state = to;

        match to {
            ConnectionState::Connected => self.set_indicator(true),
            // Blinks on ticks
            ConnectionState::Scanning => {}
            _ => self.set_indicator(false),
        }
    }

    pub(crate) fn set_indicator(&mut self, on: bool) {
        if self.indicator_on != on {
            self.indicator.set(on);
            self.indicator_on = on;
        }
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.session.state.to_string(),
        }
    }
}
