//! BLE link-level types.
//!
//! Advertisement parsing, WPT service attributes, the connection session
//! data, inbound stack events and the collaborator traits the core drives.

pub mod advertising;
pub mod btleplug_stack;
pub mod characteristics;
pub mod connection;
pub mod event;
pub mod stack;
pub mod uuids;

pub use advertising::{AddressType, AdvertisementReport, PeerAddress, WptServiceData};
pub use btleplug_stack::BtleplugStack;
pub use characteristics::{
    AttributeHandles, AttributeTarget, CccdChange, CccdState, ChargeChange, ControlFlags,
    PruControl, WptCharacteristic, WriteMode,
};
pub use connection::{ConnectionParams, ConnectionSession, ConnectionState};
pub use event::{AttributeRef, GenericErrorKind, StackEvent};
pub use stack::{
    BleStack, LinkState, PowerControl, RadioActivity, RadioSleepMode, StatusIndicator,
};
pub use uuids::*;
