//! Collaborator interfaces consumed by the core.
//!
//! The BLE stack, the power-management unit and the status LED are not
//! implemented here; the core drives them through these traits. Every call
//! is fire-and-forget: an `Err` means the request was refused synchronously,
//! completions arrive later as [`StackEvent`](crate::ble::StackEvent)s.

use crate::ble::advertising::PeerAddress;
use crate::ble::characteristics::{AttributeTarget, WriteMode};
use crate::error::Result;

/// Link-layer state as classified by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Stack still initialising.
    #[default]
    Initializing,
    /// No scan, no link.
    Disconnected,
    /// Scanning.
    Scanning,
    /// Connection request outstanding.
    Connecting,
    /// Link established.
    Connected,
}

impl LinkState {
    /// Check if the radio has scheduled events to service.
    pub fn has_radio_activity(&self) -> bool {
        matches!(self, Self::Scanning | Self::Connected)
    }
}

/// Requests the core issues to the BLE stack.
#[cfg_attr(test, mockall::automock)]
pub trait BleStack {
    /// Start the fast scan.
    fn start_scan(&mut self) -> Result<()>;

    /// Stop scanning. Completion is reported as `ScanStopped`.
    fn stop_scan(&mut self) -> Result<()>;

    /// Connect to a peer.
    fn connect(&mut self, address: &PeerAddress) -> Result<()>;

    /// Disconnect the active link.
    fn disconnect(&mut self) -> Result<()>;

    /// Cancel an outstanding connection request.
    fn cancel_connect(&mut self) -> Result<()>;

    /// Run full GATT service and characteristic discovery.
    fn discover_services(&mut self) -> Result<()>;

    /// Read a characteristic value.
    fn read_characteristic(&mut self, target: AttributeTarget) -> Result<()>;

    /// Write a characteristic value.
    fn write_characteristic(
        &mut self,
        target: AttributeTarget,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Write a characteristic descriptor (CCCD).
    fn set_descriptor(&mut self, target: AttributeTarget, value: &[u8]) -> Result<()>;

    /// Current link-layer state, read-only.
    fn link_state(&self) -> LinkState;
}

/// Sleep mode the radio subsystem actually entered when asked for deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioSleepMode {
    /// Radio stayed active.
    Active,
    /// Radio entered light sleep.
    Sleep,
    /// Radio entered deep sleep.
    DeepSleep,
}

/// Instantaneous activity of the radio subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioActivity {
    /// Radio event in progress.
    EventActive,
    /// Radio event closing; Tx/Rx still finishing.
    EventClose,
    /// External crystal on, waiting for the next event.
    EcoOn,
    /// Radio in deep sleep.
    DeepSleep,
}

/// Low-power controls of the platform.
#[cfg_attr(test, mockall::automock)]
pub trait PowerControl {
    /// Ask the radio to deep-sleep between events and report what it entered.
    fn request_radio_deep_sleep(&mut self) -> RadioSleepMode;

    /// Current radio subsystem activity.
    fn radio_activity(&self) -> RadioActivity;

    /// Put the CPU to sleep until the next interrupt.
    fn cpu_sleep(&mut self);

    /// Enter the indefinite low-power halt, left only by an external wake.
    fn hibernate(&mut self);
}

/// The scanning / connection indicator LED.
#[cfg_attr(test, mockall::automock)]
pub trait StatusIndicator {
    /// Turn the indicator on or off.
    fn set(&mut self, on: bool);
}
