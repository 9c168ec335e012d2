//! Advertising data parsing.
//!
//! Parses the AD structures of PRU advertisements and extracts the
//! Wireless Power Transfer service data, which carries the fast-path
//! GATT service handle.

use crate::ble::uuids::WPT_SERVICE_UUID16;
use crate::error::{Error, Result};

/// AD type: Service Data - 16-bit UUID.
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// Size of a BD address in bytes.
pub const BD_ADDR_SIZE: usize = 6;

/// Link-layer address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AddressType {
    /// Public device address.
    #[default]
    Public = 0,
    /// Random device address.
    Random = 1,
}

impl std::fmt::Display for AddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// A peer's link-layer identity: BD address plus address type.
///
/// The address bytes are stored little-endian, as they arrive over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerAddress {
    /// Address bytes, least significant first.
    pub bytes: [u8; BD_ADDR_SIZE],
    /// Public or random.
    pub address_type: AddressType,
}

impl PeerAddress {
    /// Create a new address.
    pub fn new(bytes: [u8; BD_ADDR_SIZE], address_type: AddressType) -> Self {
        Self {
            bytes,
            address_type,
        }
    }

    /// Create from most-significant-first bytes, the order addresses are usually written in.
    pub fn from_be_bytes(mut bytes: [u8; BD_ADDR_SIZE], address_type: AddressType) -> Self {
        bytes.reverse();
        Self::new(bytes, address_type)
    }

    /// Address bytes, most significant first.
    pub fn to_be_bytes(&self) -> [u8; BD_ADDR_SIZE] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let be = self.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            be[0], be[1], be[2], be[3], be[4], be[5]
        )
    }
}

/// Wireless Power Transfer service data from a PRU advertisement.
///
/// Layout after the 16-bit service UUID:
/// - Bytes 0-1: GATT primary service handle (little-endian)
/// - Byte 2: PRU RSSI parameters
/// - Byte 3: ADV flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WptServiceData {
    /// Handle of the WPT primary service on the PRU, zero if not advertised.
    pub service_handle: u16,
    /// PRU RSSI parameters byte.
    pub rssi_parameters: u8,
    /// ADV flags byte.
    pub adv_flags: u8,
}

impl WptServiceData {
    /// Size of the service data payload, excluding the UUID.
    pub const SIZE: usize = 4;

    /// Parse the service data payload that follows the UUID.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::InvalidData {
                context: format!(
                    "WPT service data too short: {} bytes (need {})",
                    data.len(),
                    Self::SIZE
                ),
            });
        }

        Ok(Self {
            service_handle: u16::from_le_bytes([data[0], data[1]]),
            rssi_parameters: data[2],
            adv_flags: data[3],
        })
    }

    /// The fast-path service handle, if the PRU advertised a usable one.
    pub fn fast_path_handle(&self) -> Option<u16> {
        (self.service_handle != 0).then_some(self.service_handle)
    }

    /// Encode as a complete AD structure (length, type, UUID, payload).
    pub fn to_ad_structure(&self) -> Vec<u8> {
        let uuid = WPT_SERVICE_UUID16.to_le_bytes();
        let handle = self.service_handle.to_le_bytes();
        vec![
            (1 + 2 + Self::SIZE) as u8,
            AD_TYPE_SERVICE_DATA_16,
            uuid[0],
            uuid[1],
            handle[0],
            handle[1],
            self.rssi_parameters,
            self.adv_flags,
        ]
    }
}

/// One advertisement report delivered by the stack while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvertisementReport {
    /// Advertising PDU type as reported by the stack.
    pub event_type: u8,
    /// Advertiser address.
    pub address: PeerAddress,
    /// Received signal strength in dBm.
    pub rssi: i8,
    /// Raw AD structures.
    pub data: Vec<u8>,
}

impl AdvertisementReport {
    /// Extract the WPT service data, if this is a PRU advertisement.
    pub fn wpt_service_data(&self) -> Option<WptServiceData> {
        find_wpt_service_data(&self.data)
    }
}

/// Iterate over the `(ad_type, payload)` pairs of raw advertising data.
///
/// Iteration stops at the first zero-length or truncated structure.
pub fn ad_structures(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> + '_ {
    let mut i = 0;
    std::iter::from_fn(move || {
        if i >= data.len() {
            return None;
        }
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            return None;
        }
        let ad_type = data[i + 1];
        let payload = &data[i + 2..i + 1 + len];
        i += len + 1;
        Some((ad_type, payload))
    })
}

/// Find the Wireless Power Transfer service data in raw advertising data.
pub fn find_wpt_service_data(data: &[u8]) -> Option<WptServiceData> {
    let uuid_le = WPT_SERVICE_UUID16.to_le_bytes();

    ad_structures(data)
        .filter(|(ad_type, _)| *ad_type == AD_TYPE_SERVICE_DATA_16)
        .filter(|(_, payload)| payload.len() >= 2 && payload[..2] == uuid_le)
        .find_map(|(_, payload)| WptServiceData::parse(&payload[2..]).ok())
}
