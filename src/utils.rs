//! Utility functions for the wpt-ptu-ble crate.

use crate::ble::advertising::AdvertisementReport;

/// Format bytes as space-separated upper-case hex.
///
/// # Example
///
/// ```
/// use wpt_ptu_ble::hex_bytes;
///
/// assert_eq!(hex_bytes(&[0x40, 0x00, 0x0a]), "40 00 0A");
/// ```
pub fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format the diagnostic line printed for an advertisement report.
///
/// `index` is the registry slot of the advertiser, if it has one.
pub fn format_advertisement(report: &AdvertisementReport, index: Option<usize>) -> String {
    let slot = match index {
        Some(i) => format!("[{}]", i),
        None => "[-]".to_string(),
    };
    let mut line = format!(
        "{} {} ({}) rssi {} dBm, evt {:#04x}",
        slot, report.address, report.address.address_type, report.rssi, report.event_type
    );
    if let Some(service) = report.wpt_service_data() {
        line.push_str(&format!(", WPTS handle {:#06x}", service.service_handle));
    }
    if !report.data.is_empty() {
        line.push_str(&format!(", data: {}", hex_bytes(&report.data)));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::{AddressType, PeerAddress, WptServiceData};

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[]), "");
        assert_eq!(hex_bytes(&[0xFF]), "FF");
        assert_eq!(hex_bytes(&[0x01, 0xab]), "01 AB");
    }

    #[test]
    fn test_format_advertisement() {
        let service = WptServiceData {
            service_handle: 0x0010,
            ..Default::default()
        };
        let report = AdvertisementReport {
            event_type: 0,
            address: PeerAddress::new([1, 2, 3, 4, 5, 6], AddressType::Public),
            rssi: -55,
            data: service.to_ad_structure(),
        };

        let line = format_advertisement(&report, Some(2));
        assert!(line.starts_with("[2] 06:05:04:03:02:01"));
        assert!(line.contains("rssi -55 dBm"));
        assert!(line.contains("WPTS handle 0x0010"));

        let line = format_advertisement(&report, None);
        assert!(line.starts_with("[-]"));
    }
}
