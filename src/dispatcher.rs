//! Stack event dispatch.
//!
//! Each [`StackEvent`] is handled to completion before the next one. An
//! event updates the registry, drives a session transition, queues an
//! automatic operation, or only produces a diagnostic line.

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::ble::advertising::AdvertisementReport;
use crate::ble::characteristics::{AttributeHandles, WptCharacteristic};
use crate::ble::connection::{ConnectionParams, ConnectionState};
use crate::ble::event::{AttributeRef, GenericErrorKind, StackEvent};
use crate::ble::stack::{BleStack, PowerControl, StatusIndicator};
use crate::central::Central;
use crate::command::{GattIntent, Origin};
use crate::utils::{format_advertisement, hex_bytes};

impl<S, P, L> Central<S, P, L>
where
    S: BleStack,
    P: PowerControl,
    L: StatusIndicator,
{
    /// Handle one event from the stack.
    pub fn handle_event(&mut self, event: StackEvent) {
        trace!("Event: {}", event.name());

        match event {
            StackEvent::StackReady => self.on_stack_ready(),
            StackEvent::ScanStarted => info!("Scanning started"),
            StackEvent::ScanResult(report) => self.on_scan_result(report),
            StackEvent::ScanStopped => self.on_scan_stopped(),
            StackEvent::LinkEstablished { params } => self.on_link_established(params),
            StackEvent::LinkLost { reason } => self.on_link_lost(reason),
            StackEvent::ConnectionParamsUpdated(params) => {
                info!("Connection parameters updated: {}", params);
                self.session.params = Some(params);
            }
            StackEvent::DiscoveryComplete(handles) => self.on_discovery_complete(handles),
            StackEvent::ReadResponse { attribute, value } => {
                self.release_gate();
                self.report_value("Read", attribute, &value);
            }
            StackEvent::WriteResponse { attribute } => {
                self.release_gate();
                info!("Write to {} confirmed", self.resolve(attribute));
            }
            StackEvent::Notification { attribute, value } => {
                self.release_gate();
                self.report_value("Notification", attribute, &value);
            }
            StackEvent::Indication { attribute, value } => {
                self.release_gate();
                self.report_value("Indication", attribute, &value);
            }
            StackEvent::ErrorResponse {
                opcode,
                handle,
                error_code,
            } => {
                self.release_gate();
                warn!(
                    "ATT error {:#04x} on handle {:#06x} (opcode {:#04x})",
                    error_code, handle, opcode
                );
            }
            StackEvent::GenericError { kind, code } => {
                error!("Stack error: {} ({:#x})", kind, code);
                if kind == GenericErrorKind::Timeout {
                    self.release_gate();
                }
            }
            StackEvent::Unrecognized { code } => {
                debug!("Ignoring unrecognized stack event {:#x}", code);
            }
        }

        self.pump();
    }

    fn on_stack_ready(&mut self) {
        info!("BLE stack ready");
        if self.session.state != ConnectionState::Idle {
            debug!("Already {}, not starting scan", self.session.state);
            return;
        }
        self.rescan();
    }

    fn on_scan_result(&mut self, report: AdvertisementReport) {
        let service_data = report.wpt_service_data();
        if self.config.wpt_only && service_data.is_none() {
            trace!("{}", format_advertisement(&report, None));
            return;
        }

        let outcome = self
            .registry
            .upsert(report.address, service_data, report.rssi);
        if outcome.is_new() {
            info!("New PRU: {}", format_advertisement(&report, outcome.index()));
        } else {
            debug!("{}", format_advertisement(&report, outcome.index()));
        }
    }

    fn on_scan_stopped(&mut self) {
        info!("Scanning stopped");

        if self.session.connect_intent && self.session.state == ConnectionState::Connecting {
            self.issue_connect();
        } else if self.session.rescan_on_stop {
            self.rescan();
        } else if self.session.state == ConnectionState::Scanning {
            info!("Scan window elapsed without a connection request");
            self.session.hibernate_requested = true;
            self.transition(ConnectionState::Idle);
        }
    }

    fn issue_connect(&mut self) {
        let Some(index) = self.session.selected_peer else {
            warn!("Connect intent without a selected peer");
            self.abandon_connect();
            return;
        };
        let Some(address) = self.registry.get(index).map(|peer| *peer.address()) else {
            warn!("Selected peer #{} is gone", index);
            self.abandon_connect();
            return;
        };

        match self.stack.connect(&address) {
            Ok(()) => {
                info!("Connecting to peer #{} ({})", index, address);
                self.session.connect_issued = true;
                self.session.active_peer = Some(index);
            }
            Err(e) => {
                warn!("Connect request to {} failed: {}", address, e);
                self.abandon_connect();
            }
        }
    }

    fn abandon_connect(&mut self) {
        self.session.clear_link();
        self.rescan();
    }

    fn on_link_established(&mut self, params: Option<ConnectionParams>) {
        if self.session.state != ConnectionState::Connecting || !self.session.connect_issued {
            warn!("Unexpected link while {}, disconnecting", self.session.state);
            if let Err(e) = self.stack.disconnect() {
                warn!("Disconnect failed: {}", e);
            }
            return;
        }

        self.session.connect_intent = false;
        self.session.connect_issued = false;
        self.session.params = params;
        if self.session.active_peer.is_none() {
            self.session.active_peer = self.session.selected_peer;
        }
        self.transition(ConnectionState::Connected);

        match params {
            Some(params) => info!("Connected: {}", params),
            None => info!("Connected"),
        }

        let service_handle = self
            .session
            .active_peer
            .and_then(|index| self.registry.get(index))
            .and_then(|peer| peer.advertised_service_handle());

        let intent = match service_handle {
            Some(handle) => {
                self.session.handles = AttributeHandles::from_service_handle(handle);
                info!("Skipping discovery, {}", self.session.handles);
                GattIntent::Read(WptCharacteristic::PruStatic)
            }
            None => GattIntent::Discover,
        };
        self.submit_auto(intent);
    }

    fn on_link_lost(&mut self, reason: u8) {
        info!("Link lost (reason {:#04x})", reason);
        self.transition(ConnectionState::Disconnected);
        self.flow.reset();
        self.session.clear_link();
        self.rescan();
    }

    fn on_discovery_complete(&mut self, handles: AttributeHandles) {
        self.release_gate();
        info!("Discovery complete, {}", handles);
        self.session.handles = handles;

        if self.session.state.is_connected() {
            self.submit_auto(GattIntent::Read(WptCharacteristic::PruStatic));
        }
    }

    fn submit_auto(&mut self, intent: GattIntent) {
        if let Err(e) = self.flow.submit(intent, Origin::Auto) {
            warn!("Failed to queue {}: {}", intent, e);
        }
    }

    fn release_gate(&mut self) {
        if let Some(done) = self.flow.complete() {
            debug!("Completed {}", done);
        }
    }

    fn resolve(&self, mut attribute: AttributeRef) -> AttributeRef {
        if attribute.characteristic.is_none() {
            attribute.characteristic = attribute
                .handle
                .and_then(|handle| self.session.handles.characteristic_for(handle));
        }
        attribute
    }

    fn report_value(&self, kind: &str, attribute: AttributeRef, value: &Bytes) {
        info!("{} {}: {}", kind, self.resolve(attribute), hex_bytes(value));
    }
}

#[cfg(test)]
mod tests {
    use crate::ble::advertising::{AddressType, PeerAddress, WptServiceData};
    use crate::ble::stack::{MockBleStack, MockPowerControl, MockStatusIndicator};
    use crate::command::Opcode;
    use crate::config::PtuConfig;
    use crate::console::OperatorCommand;
    use crate::error::Error;

    use super::*;
    use pretty_assertions::assert_eq;

    type TestCentral = Central<MockBleStack, MockPowerControl, MockStatusIndicator>;

    fn central(stack: MockBleStack) -> TestCentral {
        let mut indicator = MockStatusIndicator::new();
        indicator.expect_set().return_const(());
        Central::new(PtuConfig::default(), stack, MockPowerControl::new(), indicator)
    }

    fn addr(last: u8) -> PeerAddress {
        PeerAddress::new([last, 0x00, 0x00, 0xE0, 0x5A, 0x00], AddressType::Random)
    }

    fn advert(last: u8, service_handle: u16) -> StackEvent {
        let service = WptServiceData {
            service_handle,
            ..Default::default()
        };
        StackEvent::ScanResult(AdvertisementReport {
            event_type: 0,
            address: addr(last),
            rssi: -60,
            data: service.to_ad_structure(),
        })
    }

    #[test]
    fn test_stack_ready_starts_scan() {
        let mut stack = MockBleStack::new();
        stack.expect_start_scan().times(1).returning(|| Ok(()));

        let mut central = central(stack);
        central.handle_event(StackEvent::StackReady);
        assert_eq!(central.state(), ConnectionState::Scanning);
    }

    #[test]
    fn test_scan_result_only_updates_registry() {
        let mut central = central(MockBleStack::new());
        central.session.state = ConnectionState::Connected;

        central.handle_event(advert(1, 0));
        central.handle_event(advert(2, 0));
        central.handle_event(advert(1, 0));

        assert_eq!(central.registry().count(), 2);
        assert_eq!(central.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_non_wpt_advert_filtered() {
        let mut central = central(MockBleStack::new());
        central.handle_event(StackEvent::ScanResult(AdvertisementReport {
            event_type: 0,
            address: addr(1),
            rssi: -60,
            data: vec![0x02, 0x01, 0x06],
        }));
        assert_eq!(central.registry().count(), 0);

        central.config.wpt_only = false;
        central.handle_event(StackEvent::ScanResult(AdvertisementReport {
            event_type: 0,
            address: addr(1),
            rssi: -60,
            data: vec![0x02, 0x01, 0x06],
        }));
        assert_eq!(central.registry().count(), 1);
    }

    #[test]
    fn test_scan_window_elapsed_requests_hibernate() {
        let mut central = central(MockBleStack::new());
        central.session.state = ConnectionState::Scanning;

        central.handle_event(StackEvent::ScanStopped);
        assert_eq!(central.state(), ConnectionState::Idle);
        assert!(central.session.hibernate_requested);
    }

    #[test]
    fn test_connect_rejected_rescans() {
        let mut stack = MockBleStack::new();
        stack
            .expect_connect()
            .times(1)
            .returning(|_| {
                Err(Error::Rejected {
                    operation: "connect",
                    reason: "unknown peer".to_string(),
                })
            });
        stack.expect_start_scan().times(1).returning(|| Ok(()));

        let mut central = central(stack);
        central.handle_event(advert(0, 0));
        central.session.selected_peer = Some(0);
        central.session.connect_intent = true;
        central.session.state = ConnectionState::Connecting;

        central.handle_event(StackEvent::ScanStopped);
        assert_eq!(central.state(), ConnectionState::Scanning);
        assert!(!central.session().has_connect_intent());
    }

    #[test]
    fn test_cancelled_connect_rescans_on_stop() {
        let mut stack = MockBleStack::new();
        stack.expect_connect().never();
        stack.expect_start_scan().times(1).returning(|| Ok(()));

        let mut central = central(stack);
        central.session.rescan_on_stop = true;
        central.session.state = ConnectionState::Scanning;

        central.handle_event(StackEvent::ScanStopped);
        assert_eq!(central.state(), ConnectionState::Scanning);
        assert!(!central.session.rescan_on_stop);
        assert!(!central.session.hibernate_requested);
    }

    #[test]
    fn test_link_lost_resets_gate() {
        let mut stack = MockBleStack::new();
        stack.expect_start_scan().times(1).returning(|| Ok(()));
        stack.expect_read_characteristic().returning(|_| Ok(()));

        let mut central = central(stack);
        central.handle_event(advert(0, 0x0010));
        central.session.selected_peer = Some(0);
        central.session.state = ConnectionState::Connecting;
        central.session.connect_issued = true;
        central.handle_event(StackEvent::LinkEstablished { params: None });
        assert!(central.flow().is_awaiting_response());

        central.handle_event(StackEvent::LinkLost { reason: 0x08 });
        assert_eq!(central.state(), ConnectionState::Scanning);
        assert!(!central.flow().is_awaiting_response());
        assert!(central.session().handles().is_empty());
        assert_eq!(central.session().selected_peer(), Some(0));
    }

    #[test]
    fn test_link_lost_with_refused_rescan_powers_down() {
        let mut stack = MockBleStack::new();
        stack.expect_start_scan().times(1).returning(|| {
            Err(Error::Rejected {
                operation: "start_scan",
                reason: "busy".to_string(),
            })
        });

        let mut central = central(stack);
        central.session.state = ConnectionState::Connected;
        central.session.active_peer = Some(0);

        central.handle_event(StackEvent::LinkLost { reason: 0x08 });
        assert_eq!(central.state(), ConnectionState::Idle);
        assert!(central.session.hibernate_requested);
        assert_eq!(central.session().active_peer(), None);
    }

    #[test]
    fn test_connect_and_rescan_refused_powers_down() {
        let mut stack = MockBleStack::new();
        stack.expect_connect().times(1).returning(|_| {
            Err(Error::Rejected {
                operation: "connect",
                reason: "busy".to_string(),
            })
        });
        stack.expect_start_scan().times(1).returning(|| {
            Err(Error::Rejected {
                operation: "start_scan",
                reason: "busy".to_string(),
            })
        });

        let mut central = central(stack);
        central.handle_event(advert(0, 0));
        central.session.selected_peer = Some(0);
        central.session.connect_intent = true;
        central.session.state = ConnectionState::Connecting;

        central.handle_event(StackEvent::ScanStopped);
        assert_eq!(central.state(), ConnectionState::Idle);
        assert!(!central.session().has_connect_intent());
        assert!(central.session.hibernate_requested);
    }

    #[test]
    fn test_unexpected_link_is_dropped() {
        let mut stack = MockBleStack::new();
        stack.expect_disconnect().times(1).returning(|| Ok(()));
        stack.expect_discover_services().never();
        stack.expect_read_characteristic().never();

        let mut central = central(stack);
        central.handle_event(advert(0, 0x0010));
        central.session.selected_peer = Some(0);
        central.session.state = ConnectionState::Scanning;

        central.handle_event(StackEvent::LinkEstablished { params: None });
        assert_eq!(central.state(), ConnectionState::Scanning);
        assert_eq!(central.session().active_peer(), None);
        assert!(!central.flow().is_awaiting_response());
    }

    #[test]
    fn test_discovery_complete_queues_static_read() {
        let mut stack = MockBleStack::new();
        stack.expect_discover_services().times(1).returning(|| Ok(()));
        stack
            .expect_read_characteristic()
            .withf(|t| t.characteristic == WptCharacteristic::PruStatic && t.handle == Some(0x0029))
            .times(1)
            .returning(|_| Ok(()));

        let mut central = central(stack);
        central.handle_event(advert(0, 0));
        central.session.selected_peer = Some(0);
        central.session.state = ConnectionState::Connecting;
        central.session.connect_issued = true;

        central.handle_event(StackEvent::LinkEstablished { params: None });
        assert_eq!(
            central.flow().pending().unwrap().opcode,
            Opcode::DiscoverServices
        );

        let handles = AttributeHandles::from_service_handle(0x0020);
        central.handle_event(StackEvent::DiscoveryComplete(handles));
        assert_eq!(central.session().handles(), &handles);
        let pending = central.flow().pending().unwrap();
        assert_eq!(pending.opcode, Opcode::ReadCharacteristic);
        assert!(pending.auto_generated);
    }

    #[test]
    fn test_error_response_clears_gate_keeps_link() {
        let mut stack = MockBleStack::new();
        stack.expect_read_characteristic().returning(|_| Ok(()));

        let mut central = central(stack);
        central.handle_event(advert(0, 0x0010));
        central.session.active_peer = Some(0);
        central.session.state = ConnectionState::Connected;
        central.handle_command(OperatorCommand::ReadDynamicParameters).unwrap();
        assert!(central.flow().is_awaiting_response());

        central.handle_event(StackEvent::ErrorResponse {
            opcode: 0x0A,
            handle: 0x001b,
            error_code: 0x02,
        });
        assert!(!central.flow().is_awaiting_response());
        assert_eq!(central.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_generic_errors() {
        let mut stack = MockBleStack::new();
        stack.expect_read_characteristic().returning(|_| Ok(()));

        let mut central = central(stack);
        central.session.state = ConnectionState::Connected;
        central.handle_command(OperatorCommand::ReadStaticParameters).unwrap();

        central.handle_event(StackEvent::GenericError {
            kind: GenericErrorKind::Hci,
            code: 0x0c,
        });
        assert!(central.flow().is_awaiting_response());

        central.handle_event(StackEvent::GenericError {
            kind: GenericErrorKind::Timeout,
            code: 0,
        });
        assert!(!central.flow().is_awaiting_response());
    }

    #[test]
    fn test_unrecognized_event_ignored() {
        let mut central = central(MockBleStack::new());
        central.session.state = ConnectionState::Scanning;
        central.handle_event(StackEvent::Unrecognized { code: 0xdead });
        assert_eq!(central.state(), ConnectionState::Scanning);
    }

    #[test]
    fn test_params_update() {
        let mut central = central(MockBleStack::new());
        let params = ConnectionParams {
            interval: 80,
            latency: 0,
            supervision_timeout: 400,
        };
        central.handle_event(StackEvent::ConnectionParamsUpdated(params));
        assert_eq!(central.session().params(), Some(params));
    }
}
