// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # wpt-ptu-ble
//!
//! BLE central control logic for a Wireless Power Transmitter Unit (PTU)
//! operating A4WP Power Receiver Units (PRUs).
//!
//! The core turns BLE stack events into a session lifecycle: it discovers
//! and deduplicates PRUs, connects to the one the operator selects, finds
//! the Wireless Power Transfer service (or derives its handles from the
//! advertised service handle), and then serializes reads, writes and
//! subscriptions so that only one request is ever waiting for a response.
//!
//! ## Features
//!
//! - **PRU Discovery**: Deduplicated, fixed-capacity registry of advertisers
//! - **Fast Path**: Skip GATT discovery when the PRU advertises its service handle
//! - **Flow Control**: One outstanding request, operator input ahead of automatic reads
//! - **Charge Control**: Enable / disable charging through PRU Control
//! - **Alert Subscriptions**: Notifications or indications on PRU Alert
//! - **Dynamic Polling**: Ticker-driven PRU Dynamic Parameter reads
//! - **Power Policy**: CPU sleep per iteration, hibernate when the scan finds nothing to do
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wpt_ptu_ble::{
//!     spawn_ticker, BtleplugStack, Central, EventLoop, HostPower, LogIndicator, PtuConfig,
//!     Result, TickSignal,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = PtuConfig::default();
//!     let (stack, events) = BtleplugStack::new(&config).await?;
//!
//!     let tick = Arc::new(TickSignal::new());
//!     spawn_ticker(tick.clone(), config.tick_interval);
//!
//!     // Feed terminal characters into this channel
//!     let (_key_tx, keys) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let central = Central::new(config, stack, HostPower, LogIndicator);
//!     let mut event_loop = EventLoop::new(central, events, keys, tick);
//!     event_loop.run().await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod central;
pub mod command;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod power;
pub mod registry;
pub mod ticker;
pub mod utils;

// Re-exports for convenience
pub use central::Central;
pub use config::{PtuConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_WINDOW, DEFAULT_TICK_INTERVAL};
pub use error::{Error, Result};
pub use event_loop::EventLoop;
pub use registry::{DeviceRegistry, PeerDevice, Upsert, MAX_PEERS};
pub use utils::{format_advertisement, hex_bytes};

// Re-export commonly used types from submodules
pub use ble::{
    AdvertisementReport, AttributeHandles, BleStack, BtleplugStack, ConnectionState, LinkState,
    PeerAddress, PowerControl, StackEvent, StatusIndicator, WptCharacteristic, WriteMode,
};
pub use command::{FlowController, GattIntent, Opcode, Origin, PendingCommand};
pub use console::{KeyParser, OperatorCommand, HELP_TEXT};
pub use power::{HostPower, PowerPolicy, SleepDepth};
pub use ticker::{spawn_ticker, LogIndicator, TickAction, TickSignal, Ticker};
