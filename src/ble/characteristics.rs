//! GATT characteristic identifiers and local attribute state.
//!
//! Covers the characteristics of the Wireless Power Transfer Service,
//! the handle cache filled by discovery (or derived from the advertised
//! service handle), the CCCD shadow and the PRU Control payload.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::uuids::*;

/// Characteristics of the Wireless Power Transfer Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WptCharacteristic {
    /// PRU Control (write charge enables).
    PruControl,
    /// PTU Static Parameter.
    PtuStatic,
    /// PRU Alert (notify / indicate).
    PruAlert,
    /// PRU Static Parameter.
    PruStatic,
    /// PRU Dynamic Parameter.
    PruDynamic,
}

impl WptCharacteristic {
    /// All characteristics in attribute-table order.
    pub const ALL: [WptCharacteristic; 5] = [
        Self::PruControl,
        Self::PtuStatic,
        Self::PruAlert,
        Self::PruStatic,
        Self::PruDynamic,
    ];

    /// Get the characteristic UUID.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::PruControl => PRU_CONTROL_UUID,
            Self::PtuStatic => PTU_STATIC_PARAMETER_UUID,
            Self::PruAlert => PRU_ALERT_UUID,
            Self::PruStatic => PRU_STATIC_PARAMETER_UUID,
            Self::PruDynamic => PRU_DYNAMIC_PARAMETER_UUID,
        }
    }

    /// Look up a characteristic by UUID.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }

    /// Offset of the value handle from the service handle in the
    /// fixed WPT attribute layout.
    fn value_offset(&self) -> u16 {
        match self {
            Self::PruControl => 2,
            Self::PtuStatic => 4,
            Self::PruAlert => 6,
            Self::PruStatic => 9,
            Self::PruDynamic => 11,
        }
    }

    /// Get the characteristic name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PruControl => "PRU Control",
            Self::PtuStatic => "PTU Static Parameter",
            Self::PruAlert => "PRU Alert",
            Self::PruStatic => "PRU Static Parameter",
            Self::PruDynamic => "PRU Dynamic Parameter",
        }
    }
}

impl std::fmt::Display for WptCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Offset of the PRU Alert CCCD from the service handle.
const ALERT_CCCD_OFFSET: u16 = 7;

/// Cached attribute handles of the WPT service on the connected PRU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeHandles {
    /// WPT primary service handle.
    pub service: Option<u16>,
    /// Value handles indexed like [`WptCharacteristic::ALL`].
    pub values: [Option<u16>; 5],
    /// PRU Alert CCCD handle.
    pub alert_cccd: Option<u16>,
}

impl AttributeHandles {
    /// Derive every handle from the advertised service handle.
    ///
    /// PRUs lay the WPT service out in a fixed order, so the handles follow
    /// from the service handle without running discovery.
    pub fn from_service_handle(service: u16) -> Self {
        let mut values = [None; 5];
        for (slot, characteristic) in values.iter_mut().zip(WptCharacteristic::ALL) {
            *slot = service.checked_add(characteristic.value_offset());
        }

        Self {
            service: Some(service),
            values,
            alert_cccd: service.checked_add(ALERT_CCCD_OFFSET),
        }
    }

    /// Get the value handle of a characteristic.
    pub fn value(&self, characteristic: WptCharacteristic) -> Option<u16> {
        self.values[characteristic as usize]
    }

    /// Map a value handle back to its characteristic.
    pub fn characteristic_for(&self, handle: u16) -> Option<WptCharacteristic> {
        WptCharacteristic::ALL
            .into_iter()
            .find(|c| self.value(*c) == Some(handle))
    }

    /// Check if discovery (or the fast path) has produced any handle.
    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.values.iter().all(Option::is_none)
    }
}

impl std::fmt::Display for AttributeHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.service {
            Some(service) => write!(f, "WPTS {:#06x}:", service)?,
            None => write!(f, "WPTS ?:")?,
        }
        for characteristic in WptCharacteristic::ALL {
            match self.value(characteristic) {
                Some(handle) => write!(f, " {}={:#06x}", characteristic, handle)?,
                None => write!(f, " {}=?", characteristic)?,
            }
        }
        if let Some(cccd) = self.alert_cccd {
            write!(f, " CCCD={:#06x}", cccd)?;
        }
        Ok(())
    }
}

/// A characteristic (and its cached handle, when known) that an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeTarget {
    /// The characteristic.
    pub characteristic: WptCharacteristic,
    /// Value handle, or CCCD handle for descriptor writes.
    pub handle: Option<u16>,
}

impl AttributeTarget {
    /// Target the value of a characteristic.
    pub fn value(characteristic: WptCharacteristic, handles: &AttributeHandles) -> Self {
        Self {
            characteristic,
            handle: handles.value(characteristic),
        }
    }

    /// Target the PRU Alert CCCD.
    pub fn alert_cccd(handles: &AttributeHandles) -> Self {
        Self {
            characteristic: WptCharacteristic::PruAlert,
            handle: handles.alert_cccd,
        }
    }
}

impl std::fmt::Display for AttributeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.handle {
            Some(handle) => write!(f, "{} ({:#06x})", self.characteristic, handle),
            None => write!(f, "{}", self.characteristic),
        }
    }
}

/// Whether a characteristic write expects a write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write request, acknowledged by a write response.
    WithResponse,
    /// Write command, no acknowledgement.
    WithoutResponse,
}

/// Local shadow of a Client Characteristic Configuration Descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CccdState(pub u16);

impl CccdState {
    /// Notifications enabled bit.
    pub const NOTIFICATION: u16 = 0x0001;
    /// Indications enabled bit.
    pub const INDICATION: u16 = 0x0002;

    /// Check if notifications are enabled.
    pub fn notifications(&self) -> bool {
        self.0 & Self::NOTIFICATION != 0
    }

    /// Check if indications are enabled.
    pub fn indications(&self) -> bool {
        self.0 & Self::INDICATION != 0
    }

    /// Descriptor value as written over the air.
    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// Requested change to the PRU Alert CCCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccdChange {
    /// Set the notification bit.
    EnableNotifications,
    /// Set the indication bit.
    EnableIndications,
    /// Clear both bits.
    Disable,
}

impl CccdChange {
    /// Apply the change to the shadow and return the new value.
    pub fn apply(&self, state: &mut CccdState) -> CccdState {
        match self {
            Self::EnableNotifications => state.0 |= CccdState::NOTIFICATION,
            Self::EnableIndications => state.0 |= CccdState::INDICATION,
            Self::Disable => state.0 = 0,
        }
        *state
    }
}

/// Enables bitmask of the PRU Control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlFlags(pub u8);

impl ControlFlags {
    /// Enable PRU charge indicator.
    pub const ENABLE_CHARGE_INDICATOR: u8 = 0x40;

    /// Check if the charge indicator bit is set.
    pub fn charge_enabled(&self) -> bool {
        self.0 & Self::ENABLE_CHARGE_INDICATOR != 0
    }
}

/// Requested change to the charge enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeChange {
    /// Enable charging.
    Enable,
    /// Disable charging.
    Disable,
}

/// PRU Control characteristic value.
///
/// Wire layout:
/// - Byte 0: Enables
/// - Byte 1: Permission
/// - Byte 2: Time set
/// - Bytes 3-4: Reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PruControl {
    /// Enables bitmask.
    pub enables: ControlFlags,
    /// Permission byte.
    pub permission: u8,
    /// Time set byte.
    pub time_set: u8,
}

impl PruControl {
    /// Size of the characteristic value in bytes.
    pub const SIZE: usize = 5;

    /// Apply a charge change to the enables.
    ///
    /// Enabling replaces the enables with the charge indicator bit alone;
    /// disabling clears only that bit.
    pub fn apply(&mut self, change: ChargeChange) {
        match change {
            ChargeChange::Enable => self.enables = ControlFlags(ControlFlags::ENABLE_CHARGE_INDICATOR),
            ChargeChange::Disable => self.enables.0 &= !ControlFlags::ENABLE_CHARGE_INDICATOR,
        }
    }

    /// Encode the value for writing.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.enables.0, self.permission, self.time_set, 0, 0])
    }
}
