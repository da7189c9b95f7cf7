//! btleplug-backed transport driver.
//!
//! The session core is synchronous; btleplug is async. This module bridges
//! the two: a background thread runs a tokio pump that owns the adapter,
//! processes requests from a channel one at a time, and feeds completions
//! back as [`BleNotice`]s. The foreground command loop is the single
//! consumer, which gives the core the serialized event delivery it expects.
//!
//! Requests are handled strictly in order, so write acknowledgements come
//! back in write-issue order.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

use bbconsole::{Error, Handle, Peripheral, PeripheralId, ServiceMap, Transport, TransportEvent};

/// Settle delay before reporting a dropped link, so completions already in
/// flight drain first.
const DISCONNECT_SETTLE: Duration = Duration::from_secs(1);

/// Notices delivered to the foreground command loop.
#[derive(Debug)]
pub(crate) enum BleNotice {
    /// Scan sighting (advertisement or RSSI update).
    Sighting(Peripheral),
    /// Transport completion for the session controller.
    Transport(TransportEvent),
}

enum BleRequest {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    Discover(PeripheralId),
    Read(PeripheralId, Handle),
    Write(PeripheralId, Handle, Vec<u8>),
    Subscribe(PeripheralId, Handle),
    Disconnect(PeripheralId),
}

/// Sync handle over the background BLE pump.
///
/// Implements [`Transport`] by enqueueing requests; every completion comes
/// back through the notice channel returned by [`spawn`].
pub(crate) struct BleTransport {
    requests: UnboundedSender<BleRequest>,
}

impl BleTransport {
    /// Start an unfiltered scan. Sightings arrive as [`BleNotice::Sighting`].
    pub(crate) fn start_scan(&self) -> bbconsole::Result<()> {
        self.send(BleRequest::StartScan)
    }

    /// Stop the scan.
    pub(crate) fn stop_scan(&self) -> bbconsole::Result<()> {
        self.send(BleRequest::StopScan)
    }

    fn send(&self, request: BleRequest) -> bbconsole::Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::Transport("BLE worker stopped".to_string()))
    }
}

impl Transport for BleTransport {
    fn connect(&mut self, id: &PeripheralId) -> bbconsole::Result<()> {
        self.send(BleRequest::Connect(id.clone()))
    }

    fn discover_services(&mut self, id: &PeripheralId) -> bbconsole::Result<()> {
        self.send(BleRequest::Discover(id.clone()))
    }

    fn read_characteristic(&mut self, id: &PeripheralId, handle: Handle) -> bbconsole::Result<()> {
        self.send(BleRequest::Read(id.clone(), handle))
    }

    fn write_characteristic(
        &mut self,
        id: &PeripheralId,
        handle: Handle,
        data: &[u8],
    ) -> bbconsole::Result<()> {
        self.send(BleRequest::Write(id.clone(), handle, data.to_vec()))
    }

    fn subscribe(&mut self, id: &PeripheralId, handle: Handle) -> bbconsole::Result<()> {
        self.send(BleRequest::Subscribe(id.clone(), handle))
    }

    fn disconnect(&mut self, id: &PeripheralId) -> bbconsole::Result<()> {
        self.send(BleRequest::Disconnect(id.clone()))
    }
}

/// Spawn the BLE worker thread.
///
/// Blocks until the adapter is up so startup failures (no adapter, no
/// Bluetooth permission) surface here instead of as silent dead channels.
pub(crate) fn spawn() -> Result<(BleTransport, mpsc::Receiver<BleNotice>)> {
    let (req_tx, req_rx) = unbounded_channel();
    let (notice_tx, notice_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();

    thread::Builder::new()
        .name("ble-pump".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow::Error::new(e).context("tokio runtime")));
                    return;
                },
            };
            runtime.block_on(async move {
                let adapter = match open_adapter().await {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    },
                };
                let mut events = match adapter.events().await {
                    Ok(events) => events,
                    Err(e) => {
                        let _ = ready_tx
                            .send(Err(anyhow::Error::new(e).context("adapter event stream")));
                        return;
                    },
                };
                let _ = ready_tx.send(Ok(()));

                let mut pump = Pump {
                    adapter,
                    notices: notice_tx,
                    peripherals: HashMap::new(),
                    characteristics: HashMap::new(),
                    notifying: HashSet::new(),
                };
                let mut requests: UnboundedReceiver<BleRequest> = req_rx;
                loop {
                    tokio::select! {
                        request = requests.recv() => match request {
                            Some(request) => pump.handle_request(request).await,
                            None => break,
                        },
                        Some(event) = events.next() => pump.handle_central(event).await,
                    }
                }
                debug!("BLE pump shutting down");
            });
        })
        .context("failed to spawn BLE worker thread")?;

    ready_rx
        .recv()
        .context("BLE worker exited during startup")??;
    Ok((BleTransport { requests: req_tx }, notice_rx))
}

async fn open_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.context("BLE manager init failed")?;
    let adapters = manager
        .adapters()
        .await
        .context("failed to list BLE adapters")?;
    adapters
        .into_iter()
        .next()
        .context("no BLE adapter found")
}

struct Pump {
    adapter: Adapter,
    notices: mpsc::Sender<BleNotice>,
    peripherals: HashMap<PeripheralId, PlatformPeripheral>,
    /// Handles assigned during discovery, index = `Handle.0`.
    characteristics: HashMap<PeripheralId, Vec<Characteristic>>,
    /// Peripherals with a running notification-forwarding task.
    notifying: HashSet<PeripheralId>,
}

impl Pump {
    fn emit(&self, event: TransportEvent) {
        let _ = self.notices.send(BleNotice::Transport(event));
    }

    fn peripheral(&self, id: &PeripheralId) -> Option<PlatformPeripheral> {
        self.peripherals.get(id).cloned()
    }

    fn characteristic(&self, id: &PeripheralId, handle: Handle) -> Option<Characteristic> {
        self.characteristics
            .get(id)
            .and_then(|chars| chars.get(usize::from(handle.0)))
            .cloned()
    }

    async fn handle_request(&mut self, request: BleRequest) {
        match request {
            BleRequest::StartScan => {
                if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
                    warn!("failed to start scan: {e}");
                }
            },
            BleRequest::StopScan => {
                if let Err(e) = self.adapter.stop_scan().await {
                    debug!("failed to stop scan: {e}");
                }
            },
            BleRequest::Connect(id) => {
                let success = match self.peripheral(&id) {
                    Some(peripheral) => match peripheral.connect().await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("connect to {id} failed: {e}");
                            false
                        },
                    },
                    None => {
                        warn!("connect requested for unknown peripheral {id}");
                        false
                    },
                };
                self.emit(TransportEvent::ConnectResult { id, success });
            },
            BleRequest::Discover(id) => {
                let services = self.discover(&id).await;
                self.emit(TransportEvent::ServicesDiscovered { id, services });
            },
            BleRequest::Read(id, handle) => {
                let value = match (self.peripheral(&id), self.characteristic(&id, handle)) {
                    (Some(peripheral), Some(characteristic)) => {
                        match peripheral.read(&characteristic).await {
                            Ok(value) => Some(value),
                            Err(e) => {
                                debug!("read on {id} failed: {e}");
                                None
                            },
                        }
                    },
                    _ => None,
                };
                self.emit(TransportEvent::CharacteristicRead { id, handle, value });
            },
            BleRequest::Write(id, handle, data) => {
                match (self.peripheral(&id), self.characteristic(&id, handle)) {
                    (Some(peripheral), Some(characteristic)) => {
                        match peripheral
                            .write(&characteristic, &data, WriteType::WithResponse)
                            .await
                        {
                            Ok(()) => self.emit(TransportEvent::WriteAcknowledged { id, handle }),
                            // No ack; the link is likely going down and the
                            // disconnect event will surface it.
                            Err(e) => warn!("write to {id} failed: {e}"),
                        }
                    },
                    _ => warn!("write requested for unknown target {id}"),
                }
            },
            BleRequest::Subscribe(id, handle) => {
                self.subscribe(id, handle).await;
            },
            BleRequest::Disconnect(id) => {
                if let Some(peripheral) = self.peripheral(&id) {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!("disconnect from {id} failed: {e}");
                    }
                }
            },
        }
    }

    async fn discover(&mut self, id: &PeripheralId) -> ServiceMap {
        let Some(peripheral) = self.peripheral(id) else {
            warn!("discovery requested for unknown peripheral {id}");
            return ServiceMap::new();
        };
        if let Err(e) = peripheral.discover_services().await {
            warn!("service discovery on {id} failed: {e}");
            return ServiceMap::new();
        }

        let mut chars: Vec<Characteristic> = peripheral.characteristics().into_iter().collect();
        chars.sort_by(|a, b| (a.service_uuid, a.uuid).cmp(&(b.service_uuid, b.uuid)));

        let mut services = ServiceMap::new();
        for (index, characteristic) in chars.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)] // GATT tables are small
            let handle = Handle(index as u16);
            services
                .entry(characteristic.service_uuid)
                .or_default()
                .insert(characteristic.uuid, handle);
        }
        self.characteristics.insert(id.clone(), chars);
        services
    }

    async fn subscribe(&mut self, id: PeripheralId, handle: Handle) {
        let (Some(peripheral), Some(characteristic)) =
            (self.peripheral(&id), self.characteristic(&id, handle))
        else {
            warn!("subscribe requested for unknown target {id}");
            return;
        };

        if let Err(e) = peripheral.subscribe(&characteristic).await {
            warn!("subscribe on {id} failed: {e}");
            return;
        }

        // One forwarding task per peripheral; the notifications stream is
        // multiplexed across all subscribed characteristics.
        if !self.notifying.insert(id.clone()) {
            return;
        }
        let uuid_to_handle: HashMap<Uuid, Handle> = self
            .characteristics
            .get(&id)
            .map(|chars| {
                chars
                    .iter()
                    .enumerate()
                    .map(|(index, c)| {
                        #[allow(clippy::cast_possible_truncation)]
                        let handle = Handle(index as u16);
                        (c.uuid, handle)
                    })
                    .collect()
            })
            .unwrap_or_default();

        match peripheral.notifications().await {
            Ok(mut stream) => {
                let notices = self.notices.clone();
                tokio::spawn(async move {
                    while let Some(notification) = stream.next().await {
                        let Some(&handle) = uuid_to_handle.get(&notification.uuid) else {
                            continue;
                        };
                        let event = TransportEvent::Notification {
                            id: id.clone(),
                            handle,
                            data: notification.value,
                        };
                        if notices.send(BleNotice::Transport(event)).is_err() {
                            break;
                        }
                    }
                });
            },
            Err(e) => {
                warn!("notification stream on {id} failed: {e}");
                self.notifying.remove(&id);
            },
        }
    }

    async fn handle_central(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(platform_id) | CentralEvent::DeviceUpdated(platform_id) => {
                let Ok(peripheral) = self.adapter.peripheral(&platform_id).await else {
                    return;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    return;
                };
                // Nameless advertisers are useless to the operator listing.
                let Some(name) = properties.local_name else {
                    return;
                };
                let id = PeripheralId::new(platform_id.to_string());
                self.peripherals.insert(id.clone(), peripheral);
                let _ = self.notices.send(BleNotice::Sighting(Peripheral {
                    id,
                    name,
                    rssi: properties.rssi.unwrap_or(i16::MIN),
                }));
            },
            CentralEvent::DeviceDisconnected(platform_id) => {
                let id = PeripheralId::new(platform_id.to_string());
                self.characteristics.remove(&id);
                self.notifying.remove(&id);
                let notices = self.notices.clone();
                // Let completions already queued behind this event drain
                // before the controller sees the disconnect.
                tokio::spawn(async move {
                    tokio::time::sleep(DISCONNECT_SETTLE).await;
                    let _ = notices.send(BleNotice::Transport(TransportEvent::Disconnected { id }));
                });
            },
            _ => {},
        }
    }
}
