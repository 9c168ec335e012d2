//! Registry of discovered PRUs.
//!
//! A bounded, append-only table of peers seen while scanning. Peers are
//! deduplicated by address and keep their slot for the life of the process,
//! across any number of reconnects. Once the table is full, new addresses
//! are dropped rather than evicting anyone.

use tracing::{debug, warn};

use crate::ble::advertising::{PeerAddress, WptServiceData};
use crate::ble::characteristics::PruControl;
use crate::error::{Error, Result};

/// Default number of peers the registry holds.
///
/// Matches the single digit the operator types to select a peer.
pub const MAX_PEERS: usize = 10;

/// A PRU seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerDevice {
    address: PeerAddress,
    service_data: Option<WptServiceData>,
    control: PruControl,
    last_rssi: i8,
    report_count: u32,
}

impl PeerDevice {
    fn new(address: PeerAddress, service_data: Option<WptServiceData>, rssi: i8) -> Self {
        Self {
            address,
            service_data,
            control: PruControl::default(),
            last_rssi: rssi,
            report_count: 1,
        }
    }

    /// Get the peer address.
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Get the WPT service data from the first advertisement.
    pub fn service_data(&self) -> Option<&WptServiceData> {
        self.service_data.as_ref()
    }

    /// Get the fast-path service handle, if one was advertised.
    pub fn advertised_service_handle(&self) -> Option<u16> {
        self.service_data.and_then(|s| s.fast_path_handle())
    }

    /// Get the last-written PRU Control value.
    pub fn control(&self) -> &PruControl {
        &self.control
    }

    /// Get the PRU Control shadow for modification.
    pub fn control_mut(&mut self) -> &mut PruControl {
        &mut self.control
    }

    /// Get the RSSI of the most recent advertisement.
    pub fn last_rssi(&self) -> i8 {
        self.last_rssi
    }

    /// Get the number of advertisements received from this peer.
    pub fn report_count(&self) -> u32 {
        self.report_count
    }
}

/// Outcome of [`DeviceRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new peer was stored at this index.
    Inserted(usize),
    /// The address was already known at this index.
    Existing(usize),
    /// The address is new but the registry is full.
    Dropped,
}

impl Upsert {
    /// Registry index of the peer, unless it was dropped.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Inserted(i) | Self::Existing(i) => Some(*i),
            Self::Dropped => None,
        }
    }

    /// Check if a new slot was allocated.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Fixed-capacity, deduplicated table of discovered peers.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    peers: Vec<PeerDevice>,
    capacity: usize,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(MAX_PEERS)
    }
}

impl DeviceRegistry {
    /// Create an empty registry holding at most `capacity` peers.
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an advertisement from `address`.
    ///
    /// Known addresses keep their slot; only the RSSI and report count are
    /// refreshed. New addresses are appended while there is room.
    pub fn upsert(
        &mut self,
        address: PeerAddress,
        service_data: Option<WptServiceData>,
        rssi: i8,
    ) -> Upsert {
        if let Some(index) = self.find(&address) {
            let peer = &mut self.peers[index];
            peer.last_rssi = rssi;
            peer.report_count = peer.report_count.saturating_add(1);
            return Upsert::Existing(index);
        }

        if self.is_full() {
            warn!(
                "Peer registry full ({} entries), ignoring {}",
                self.capacity, address
            );
            return Upsert::Dropped;
        }

        let index = self.peers.len();
        self.peers.push(PeerDevice::new(address, service_data, rssi));
        debug!("Registered peer #{}: {}", index, address);
        Upsert::Inserted(index)
    }

    /// Find the index of an address.
    pub fn find(&self, address: &PeerAddress) -> Option<usize> {
        self.peers.iter().position(|p| p.address == *address)
    }

    /// Get a peer by index.
    pub fn get(&self, index: usize) -> Option<&PeerDevice> {
        self.peers.get(index)
    }

    /// Get a peer by index for modification.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PeerDevice> {
        self.peers.get_mut(index)
    }

    /// Number of peers stored.
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// Maximum number of peers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if no more peers can be added.
    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.capacity
    }

    /// Iterate over the stored peers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerDevice> {
        self.peers.iter()
    }

    /// Check that an operator-typed index refers to a stored peer.
    pub fn validate_selection(&self, index: usize) -> Result<usize> {
        if index < self.count() {
            Ok(index)
        } else {
            Err(Error::InvalidPeerIndex {
                index,
                count: self.count(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::AddressType;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn addr(last: u8) -> PeerAddress {
        PeerAddress::new([last, 0x00, 0x50, 0xA0, 0x00, 0x00], AddressType::Public)
    }

    #[test]
    fn test_duplicate_address_keeps_slot() {
        let mut registry = DeviceRegistry::new(4);

        assert_eq!(registry.upsert(addr(1), None, -60), Upsert::Inserted(0));
        assert_eq!(registry.upsert(addr(2), None, -61), Upsert::Inserted(1));
        assert_eq!(registry.upsert(addr(1), None, -40), Upsert::Existing(0));

        assert_eq!(registry.count(), 2);
        let peer = registry.get(0).unwrap();
        assert_eq!(peer.last_rssi(), -40);
        assert_eq!(peer.report_count(), 2);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let mut registry = DeviceRegistry::new(2);
        registry.upsert(addr(1), None, -60);
        registry.upsert(addr(2), None, -60);

        let outcome = registry.upsert(addr(3), None, -60);
        assert_eq!(outcome, Upsert::Dropped);
        assert_eq!(outcome.index(), None);
        assert!(!outcome.is_new());
        assert_eq!(registry.count(), 2);
        assert!(registry.find(&addr(3)).is_none());

        // Known peers are still refreshed when full
        assert_eq!(registry.upsert(addr(2), None, -50), Upsert::Existing(1));
    }

    #[test]
    fn test_fast_path_handle() {
        let mut registry = DeviceRegistry::default();
        let service = WptServiceData {
            service_handle: 0x0010,
            ..Default::default()
        };
        registry.upsert(addr(1), Some(service), -60);
        registry.upsert(addr(2), None, -60);

        assert_eq!(registry.get(0).unwrap().advertised_service_handle(), Some(0x0010));
        assert_eq!(registry.get(1).unwrap().advertised_service_handle(), None);
    }

    #[test]
    fn test_validate_selection() {
        let mut registry = DeviceRegistry::default();
        registry.upsert(addr(1), None, -60);

        assert_eq!(registry.validate_selection(0).unwrap(), 0);
        assert!(matches!(
            registry.validate_selection(1),
            Err(Error::InvalidPeerIndex { index: 1, count: 1 })
        ));
    }

    proptest! {
        #[test]
        fn prop_registry_never_duplicates(
            capacity in 1usize..12,
            seen in proptest::collection::vec(0u8..24, 0..64),
        ) {
            let mut registry = DeviceRegistry::new(capacity);
            for last in &seen {
                registry.upsert(addr(*last), None, -70);
            }

            prop_assert!(registry.count() <= capacity);
            let addresses: Vec<_> = registry.iter().map(|p| *p.address()).collect();
            for (i, a) in addresses.iter().enumerate() {
                prop_assert!(!addresses[i + 1..].contains(a));
            }

            let mut unique = seen.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(registry.count(), unique.len().min(capacity));
        }
    }
}
