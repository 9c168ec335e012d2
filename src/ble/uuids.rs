//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants of the A4WP Wireless Power Transfer Service.

use uuid::Uuid;

/// 16-bit UUID of the Wireless Power Transfer Service, as carried in PRU advertisements.
pub const WPT_SERVICE_UUID16: u16 = 0xFFFE;

/// Full 128-bit form of the Wireless Power Transfer Service UUID.
pub const WPT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fffe_0000_1000_8000_00805f9b34fb);

/// PRU Control characteristic UUID (Read, Write).
pub const PRU_CONTROL_UUID: Uuid = Uuid::from_u128(0x6455_e670_a146_11e2_9e96_0800200c9a67);
/// PTU Static Parameter characteristic UUID (Read, Write).
pub const PTU_STATIC_PARAMETER_UUID: Uuid =
    Uuid::from_u128(0x6455_e671_a146_11e2_9e96_0800200c9a67);
/// PRU Alert characteristic UUID (Read, Notify, Indicate).
pub const PRU_ALERT_UUID: Uuid = Uuid::from_u128(0x6455_e672_a146_11e2_9e96_0800200c9a67);
/// PRU Static Parameter characteristic UUID (Read).
pub const PRU_STATIC_PARAMETER_UUID: Uuid =
    Uuid::from_u128(0x6455_e673_a146_11e2_9e96_0800200c9a67);
/// PRU Dynamic Parameter characteristic UUID (Read).
pub const PRU_DYNAMIC_PARAMETER_UUID: Uuid =
    Uuid::from_u128(0x6455_e674_a146_11e2_9e96_0800200c9a67);

/// Client Characteristic Configuration Descriptor UUID.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Lower 96 bits of the Bluetooth Base UUID.
const BLUETOOTH_BASE_LOW: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG UUID to its 128-bit form.
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BLUETOOTH_BASE_LOW)
}

/// Shorten a 128-bit UUID built on the Bluetooth Base UUID back to 16 bits.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let low = value & ((1u128 << 96) - 1);
    let high = value >> 96;
    if low == BLUETOOTH_BASE_LOW && high <= u16::MAX as u128 {
        Some(high as u16)
    } else {
        None
    }
}

/// Check if a service UUID is the Wireless Power Transfer Service.
pub fn is_wpt_service(uuid: &Uuid) -> bool {
    *uuid == WPT_SERVICE_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        let wpt = WPT_SERVICE_UUID.to_string();
        assert!(wpt.starts_with("0000fffe"));

        let control = PRU_CONTROL_UUID.to_string();
        assert!(control.starts_with("6455e670"));
    }

    #[test]
    fn test_short_uuid_roundtrip() {
        assert_eq!(uuid_from_u16(WPT_SERVICE_UUID16), WPT_SERVICE_UUID);
        assert_eq!(short_uuid(&WPT_SERVICE_UUID), Some(0xFFFE));
        assert_eq!(short_uuid(&CCCD_UUID), Some(0x2902));
        assert_eq!(short_uuid(&PRU_ALERT_UUID), None);
    }

    #[test]
    fn test_is_wpt_service() {
        assert!(is_wpt_service(&WPT_SERVICE_UUID));
        assert!(!is_wpt_service(&PRU_CONTROL_UUID));
    }
}
