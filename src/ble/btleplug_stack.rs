//! [`BleStack`] on top of btleplug.
//!
//! Requests are queued to a worker task that owns the adapter and performs
//! them one at a time; outcomes come back as [`StackEvent`]s on the receiver
//! returned by [`BtleplugStack::new`]. The host stack resolves characteristics
//! by UUID, so handles reported by the core are informational here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    AddressType as BtAddressType, BDAddr, Central as _, CentralEvent, Characteristic,
    Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::{
    AddressType, AdvertisementReport, PeerAddress, AD_TYPE_SERVICE_DATA_16,
};
use crate::ble::characteristics::{AttributeHandles, AttributeTarget, WptCharacteristic, WriteMode};
use crate::ble::event::{AttributeRef, GenericErrorKind, StackEvent};
use crate::ble::stack::{BleStack, LinkState};
use crate::ble::uuids::{is_wpt_service, short_uuid};
use crate::config::PtuConfig;
use crate::error::{Error, Result};

/// ATT opcodes reported in error responses.
const ATT_READ_BY_GROUP_TYPE_REQUEST: u8 = 0x10;
const ATT_READ_REQUEST: u8 = 0x0A;
const ATT_WRITE_REQUEST: u8 = 0x12;

/// ATT "Unlikely Error", used when the host stack gives no code.
const ATT_UNLIKELY_ERROR: u8 = 0x0E;

/// HCI reasons reported with `LinkLost`.
const HCI_CONNECTION_TIMEOUT: u8 = 0x08;
const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;
const HCI_CONNECTION_FAILED: u8 = 0x3E;

/// Requests handed to the worker.
#[derive(Debug)]
enum Request {
    StartScan,
    StopScan,
    Connect(PeerAddress),
    Disconnect,
    CancelConnect,
    DiscoverServices,
    Read(AttributeTarget),
    Write {
        target: AttributeTarget,
        value: Bytes,
        mode: WriteMode,
    },
    SetDescriptor {
        target: AttributeTarget,
        value: Bytes,
    },
}

/// Host BLE stack driving the first Bluetooth adapter.
pub struct BtleplugStack {
    requests: mpsc::UnboundedSender<Request>,
    link: Arc<RwLock<LinkState>>,
    worker: JoinHandle<()>,
}

impl BtleplugStack {
    /// Open the first adapter and start the worker.
    ///
    /// The worker reports `StackReady` once it listens for adapter events.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: &PtuConfig) -> Result<(Self, mpsc::UnboundedReceiver<StackEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let link = Arc::new(RwLock::new(LinkState::Initializing));

        let worker = Worker {
            adapter,
            requests: request_rx,
            events: event_tx,
            link: link.clone(),
            scan_window: config.scan_window,
            connect_timeout: config.connect_timeout,
            scan_deadline: None,
            known: HashMap::new(),
            peripheral: None,
            notifier: None,
            indicate: Arc::new(AtomicBool::new(false)),
        };

        let stack = Self {
            requests: request_tx,
            link,
            worker: tokio::spawn(worker.run()),
        };
        Ok((stack, event_rx))
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::ChannelClosed("stack requests"))
    }

    fn require_link(&self, operation: &'static str) -> Result<()> {
        match self.link_state() {
            LinkState::Connected => Ok(()),
            state => Err(Error::Rejected {
                operation,
                reason: format!("link is {:?}", state),
            }),
        }
    }
}

impl BleStack for BtleplugStack {
    fn start_scan(&mut self) -> Result<()> {
        self.send(Request::StartScan)
    }

    fn stop_scan(&mut self) -> Result<()> {
        self.send(Request::StopScan)
    }

    fn connect(&mut self, address: &PeerAddress) -> Result<()> {
        if self.link_state() == LinkState::Connected {
            return Err(Error::Rejected {
                operation: "connect",
                reason: "already connected".to_string(),
            });
        }
        self.send(Request::Connect(*address))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.require_link("disconnect")?;
        self.send(Request::Disconnect)
    }

    fn cancel_connect(&mut self) -> Result<()> {
        self.send(Request::CancelConnect)
    }

    fn discover_services(&mut self) -> Result<()> {
        self.require_link("discover services")?;
        self.send(Request::DiscoverServices)
    }

    fn read_characteristic(&mut self, target: AttributeTarget) -> Result<()> {
        self.require_link("read")?;
        self.send(Request::Read(target))
    }

    fn write_characteristic(
        &mut self,
        target: AttributeTarget,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.require_link("write")?;
        self.send(Request::Write {
            target,
            value: Bytes::copy_from_slice(value),
            mode,
        })
    }

    fn set_descriptor(&mut self, target: AttributeTarget, value: &[u8]) -> Result<()> {
        self.require_link("write descriptor")?;
        self.send(Request::SetDescriptor {
            target,
            value: Bytes::copy_from_slice(value),
        })
    }

    fn link_state(&self) -> LinkState {
        *self.link.read()
    }
}

impl Drop for BtleplugStack {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Task owning the adapter and the connected peripheral.
struct Worker {
    adapter: Adapter,
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<StackEvent>,
    link: Arc<RwLock<LinkState>>,
    scan_window: Option<Duration>,
    connect_timeout: Duration,
    scan_deadline: Option<Instant>,
    /// Advertisers seen while scanning.
    known: HashMap<PeerAddress, PeripheralId>,
    peripheral: Option<Peripheral>,
    /// Forwards notifications of the connected peripheral.
    notifier: Option<JoinHandle<()>>,
    /// Alert CCCD was last written with the indication bit.
    indicate: Arc<AtomicBool>,
}

impl Worker {
    async fn run(mut self) {
        let mut central_events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to get adapter events: {}", e);
                self.emit(StackEvent::GenericError {
                    kind: GenericErrorKind::Hardware,
                    code: 0,
                });
                return;
            }
        };

        self.set_link(LinkState::Disconnected);
        self.emit(StackEvent::StackReady);

        loop {
            let deadline = self.scan_deadline;
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                Some(event) = central_events.next() => self.handle_central_event(event).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!("Scan window elapsed");
                    self.stop_scan().await;
                }
            }
        }

        self.drop_link();
        debug!("BLE worker ended");
    }

    fn emit(&self, event: StackEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    fn set_link(&self, state: LinkState) {
        *self.link.write() = state;
    }

    async fn handle_request(&mut self, request: Request) {
        trace!("Request: {:?}", request);

        match request {
            Request::StartScan => self.start_scan().await,
            Request::StopScan => self.stop_scan().await,
            Request::Connect(address) => self.connect(address).await,
            Request::Disconnect => self.disconnect().await,
            Request::CancelConnect => debug!("No connection request to cancel"),
            Request::DiscoverServices => self.discover().await,
            Request::Read(target) => self.read(target).await,
            Request::Write {
                target,
                value,
                mode,
            } => self.write(target, &value, mode).await,
            Request::SetDescriptor { target, value } => self.set_descriptor(target, &value).await,
        }
    }

    async fn start_scan(&mut self) {
        match self.adapter.start_scan(ScanFilter::default()).await {
            Ok(()) => {
                self.set_link(LinkState::Scanning);
                self.scan_deadline = self.scan_window.map(|window| Instant::now() + window);
                self.emit(StackEvent::ScanStarted);
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.emit(StackEvent::GenericError {
                    kind: GenericErrorKind::Hci,
                    code: 0,
                });
            }
        }
    }

    async fn stop_scan(&mut self) {
        self.scan_deadline = None;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        if self.peripheral.is_none() {
            self.set_link(LinkState::Disconnected);
        }
        self.emit(StackEvent::ScanStopped);
    }

    async fn connect(&mut self, address: PeerAddress) {
        let peripheral = match self.known.get(&address) {
            Some(id) => self.adapter.peripheral(id).await.ok(),
            None => None,
        };
        let Some(peripheral) = peripheral else {
            warn!("Peripheral not found: {}", address);
            self.emit(StackEvent::LinkLost {
                reason: HCI_CONNECTION_FAILED,
            });
            return;
        };

        self.set_link(LinkState::Connecting);
        let outcome = {
            let connect = tokio::time::timeout(self.connect_timeout, peripheral.connect());
            tokio::pin!(connect);

            loop {
                tokio::select! {
                    outcome = &mut connect => break Some(outcome),
                    request = self.requests.recv() => match request {
                        Some(Request::CancelConnect) => break None,
                        Some(other) => debug!("Dropping {:?} while connecting", other),
                        None => break None,
                    },
                }
            }
        };

        match outcome {
            Some(Ok(Ok(()))) => {
                info!("Connected to {}", address);
                self.notifier = Some(spawn_notifier(
                    peripheral.clone(),
                    self.events.clone(),
                    self.indicate.clone(),
                ));
                self.peripheral = Some(peripheral);
                self.set_link(LinkState::Connected);
                self.emit(StackEvent::LinkEstablished { params: None });
            }
            Some(Ok(Err(e))) => {
                warn!("Connection to {} failed: {}", address, e);
                self.set_link(LinkState::Disconnected);
                self.emit(StackEvent::LinkLost {
                    reason: HCI_CONNECTION_FAILED,
                });
            }
            Some(Err(_)) => {
                warn!("Connection to {} timed out", address);
                log_disconnect(peripheral.disconnect().await, "after timeout");
                self.set_link(LinkState::Disconnected);
                self.emit(StackEvent::LinkLost {
                    reason: HCI_CONNECTION_FAILED,
                });
            }
            None => {
                info!("Connection to {} cancelled", address);
                log_disconnect(peripheral.disconnect().await, "after cancel");
                self.set_link(LinkState::Disconnected);
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(peripheral) = self.drop_link() {
            log_disconnect(peripheral.disconnect().await, "request");
            self.emit(StackEvent::LinkLost {
                reason: HCI_LOCAL_HOST_TERMINATED,
            });
        }
    }

    /// Forget the connected peripheral and stop forwarding its notifications.
    fn drop_link(&mut self) -> Option<Peripheral> {
        if let Some(notifier) = self.notifier.take() {
            notifier.abort();
        }
        self.indicate.store(false, Ordering::Relaxed);
        self.set_link(LinkState::Disconnected);
        self.peripheral.take()
    }

    async fn discover(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            return;
        };

        match peripheral.discover_services().await {
            Ok(()) => {
                let found: Vec<_> = peripheral
                    .characteristics()
                    .iter()
                    .filter_map(|c| WptCharacteristic::from_uuid(&c.uuid))
                    .collect();
                if !peripheral.services().iter().any(|s| is_wpt_service(&s.uuid)) {
                    warn!("WPT service not found on {}", peripheral.address());
                }
                debug!("Discovered {} WPT characteristics", found.len());
                self.emit(StackEvent::DiscoveryComplete(AttributeHandles::default()));
            }
            Err(e) => {
                warn!("Service discovery failed: {}", e);
                self.emit(StackEvent::ErrorResponse {
                    opcode: ATT_READ_BY_GROUP_TYPE_REQUEST,
                    handle: 0x0001,
                    error_code: ATT_UNLIKELY_ERROR,
                });
            }
        }
    }

    /// Find a characteristic on the connected peripheral, discovering
    /// services first if the fast path skipped discovery.
    async fn characteristic(&self, target: AttributeTarget) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral.clone().ok_or(Error::NotConnected)?;
        if peripheral.characteristics().is_empty() {
            debug!("No characteristics cached, discovering services");
            peripheral.discover_services().await?;
        }

        let uuid = target.characteristic.uuid();
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })?;
        Ok((peripheral, characteristic))
    }

    async fn read(&mut self, target: AttributeTarget) {
        let result = match self.characteristic(target).await {
            Ok((peripheral, characteristic)) => peripheral
                .read(&characteristic)
                .await
                .map_err(Error::Bluetooth),
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => self.emit(StackEvent::ReadResponse {
                attribute: attribute_ref(target),
                value: Bytes::from(value),
            }),
            Err(e) => self.fail(ATT_READ_REQUEST, target, e),
        }
    }

    async fn write(&mut self, target: AttributeTarget, value: &[u8], mode: WriteMode) {
        let result = match self.characteristic(target).await {
            Ok((peripheral, characteristic)) => peripheral
                .write(&characteristic, value, write_type(mode))
                .await
                .map_err(Error::Bluetooth),
            Err(e) => Err(e),
        };

        match (result, mode) {
            (Ok(()), WriteMode::WithResponse) => self.emit(StackEvent::WriteResponse {
                attribute: attribute_ref(target),
            }),
            (Ok(()), WriteMode::WithoutResponse) => {}
            (Err(e), _) => self.fail(ATT_WRITE_REQUEST, target, e),
        }
    }

    /// CCCD writes map to subscribe / unsubscribe; the platform picks the
    /// notify or indicate bit from the characteristic properties.
    async fn set_descriptor(&mut self, target: AttributeTarget, value: &[u8]) {
        let enable = value.iter().any(|b| *b != 0);
        self.indicate
            .store(value.first().is_some_and(|b| b & 0x02 != 0), Ordering::Relaxed);

        let result = match self.characteristic(target).await {
            Ok((peripheral, characteristic)) if enable => peripheral
                .subscribe(&characteristic)
                .await
                .map_err(Error::Bluetooth),
            Ok((peripheral, characteristic)) => peripheral
                .unsubscribe(&characteristic)
                .await
                .map_err(Error::Bluetooth),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => self.emit(StackEvent::WriteResponse {
                attribute: attribute_ref(target),
            }),
            Err(e) => self.fail(ATT_WRITE_REQUEST, target, e),
        }
    }

    fn fail(&self, opcode: u8, target: AttributeTarget, error: Error) {
        warn!("ATT {:#04x} on {} failed: {}", opcode, target, error);
        self.emit(StackEvent::ErrorResponse {
            opcode,
            handle: target.handle.unwrap_or_default(),
            error_code: ATT_UNLIKELY_ERROR,
        });
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServiceDataAdvertisement { id, .. } => {
                let scanning = *self.link.read() == LinkState::Scanning;
                if scanning {
                    self.report(id).await;
                }
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                let ours = self.peripheral.as_ref().is_some_and(|p| p.id() == id);
                if ours {
                    self.drop_link();
                    self.emit(StackEvent::LinkLost {
                        reason: HCI_CONNECTION_TIMEOUT,
                    });
                } else {
                    debug!("Device disconnected: {:?}", id);
                }
            }
            _ => {}
        }
    }

    /// Turn the cached properties of an advertiser into a scan result.
    async fn report(&mut self, id: PeripheralId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let address = peer_address(properties.address, properties.address_type);
        self.known.insert(address, id);

        self.emit(StackEvent::ScanResult(AdvertisementReport {
            event_type: 0,
            address,
            rssi: clamp_rssi(properties.rssi),
            data: service_data_structures(&properties.service_data),
        }));
    }
}

/// Forward value notifications of `peripheral` as stack events.
fn spawn_notifier(
    peripheral: Peripheral,
    events: mpsc::UnboundedSender<StackEvent>,
    indicate: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to get notification stream: {}", e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            let attribute = AttributeRef {
                handle: None,
                characteristic: WptCharacteristic::from_uuid(&notification.uuid),
            };
            let value = Bytes::from(notification.value);
            let event = if indicate.load(Ordering::Relaxed) {
                StackEvent::Indication { attribute, value }
            } else {
                StackEvent::Notification { attribute, value }
            };
            if events.send(event).is_err() {
                break;
            }
        }
        debug!("Notification stream ended");
    })
}

/// Log a failed peripheral disconnect; returns whether it succeeded.
fn log_disconnect(result: btleplug::Result<()>, context: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Disconnect {} failed: {}", context, e);
            false
        }
    }
}

fn attribute_ref(target: AttributeTarget) -> AttributeRef {
    AttributeRef {
        handle: target.handle,
        characteristic: Some(target.characteristic),
    }
}

fn write_type(mode: WriteMode) -> WriteType {
    match mode {
        WriteMode::WithResponse => WriteType::WithResponse,
        WriteMode::WithoutResponse => WriteType::WithoutResponse,
    }
}

/// Convert a btleplug address; `BDAddr` is most significant byte first.
fn peer_address(address: BDAddr, address_type: Option<BtAddressType>) -> PeerAddress {
    let address_type = match address_type {
        Some(BtAddressType::Random) => AddressType::Random,
        _ => AddressType::Public,
    };
    PeerAddress::from_be_bytes(address.into_inner(), address_type)
}

fn clamp_rssi(rssi: Option<i16>) -> i8 {
    rssi.map(|r| r.clamp(i8::MIN as i16, i8::MAX as i16) as i8)
        .unwrap_or(i8::MIN)
}

/// Re-encode 16-bit service data as raw AD structures.
///
/// btleplug hands out parsed advertisements, the core parses raw ones.
fn service_data_structures(service_data: &HashMap<Uuid, Vec<u8>>) -> Vec<u8> {
    let mut data = Vec::new();
    for (uuid, payload) in service_data {
        let Some(short) = short_uuid(uuid) else {
            continue;
        };
        // Length byte covers type, UUID and payload
        let Ok(len) = u8::try_from(1 + 2 + payload.len()) else {
            continue;
        };
        data.push(len);
        data.push(AD_TYPE_SERVICE_DATA_16);
        data.extend_from_slice(&short.to_le_bytes());
        data.extend_from_slice(payload);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::find_wpt_service_data;
    use crate::ble::uuids::{uuid_from_u16, WPT_SERVICE_UUID};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_peer_address_conversion() {
        let bd = BDAddr::from([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
        let address = peer_address(bd, Some(BtAddressType::Random));

        assert_eq!(address.to_string(), "00:1a:7d:da:71:13");
        assert_eq!(address.bytes[0], 0x13);
        assert_eq!(address.address_type, AddressType::Random);
        assert_eq!(peer_address(bd, None).address_type, AddressType::Public);
    }

    #[test]
    fn test_clamp_rssi() {
        assert_eq!(clamp_rssi(Some(-60)), -60);
        assert_eq!(clamp_rssi(Some(-300)), i8::MIN);
        assert_eq!(clamp_rssi(None), i8::MIN);
    }

    #[test]
    fn test_service_data_structures() {
        let mut service_data = HashMap::new();
        service_data.insert(WPT_SERVICE_UUID, vec![0x10, 0x00, 0x00, 0x00]);
        service_data.insert(Uuid::from_u128(0x1234), vec![0x01]);

        let data = service_data_structures(&service_data);
        let service = find_wpt_service_data(&data).unwrap();
        assert_eq!(service.fast_path_handle(), Some(0x0010));
    }

    #[test]
    fn test_service_data_skips_long_uuids() {
        let mut service_data = HashMap::new();
        service_data.insert(uuid_from_u16(0x180F), vec![0x64]);
        service_data.insert(Uuid::from_u128(0x1234), vec![0x01]);

        assert_eq!(
            service_data_structures(&service_data),
            vec![0x04, AD_TYPE_SERVICE_DATA_16, 0x0F, 0x18, 0x64]
        );
    }

    #[test]
    fn test_log_disconnect() {
        assert!(log_disconnect(Ok(()), "request"));
        assert!(!log_disconnect(
            Err(btleplug::Error::NotConnected),
            "after timeout"
        ));
    }

    #[test]
    fn test_write_type() {
        assert!(matches!(
            write_type(WriteMode::WithResponse),
            WriteType::WithResponse
        ));
        assert!(matches!(
            write_type(WriteMode::WithoutResponse),
            WriteType::WithoutResponse
        ));
    }
}
