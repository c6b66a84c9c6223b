//! [`GattBackend`] on top of the `bluest` crate.
//!
//! bluest streams borrow the adapter or characteristic they come from, so each
//! one is driven by a task that owns clones of those handles and forwards into
//! an unbounded channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bluest::error::ErrorKind;
use bluest::{Adapter, AdvertisingDevice, ConnectionEvent, Device};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::core::bluetooth::backend::{AdvertisementStream, GattBackend, NotificationStream};
use crate::core::bluetooth::constants::UUID_CCCD;
use crate::core::bluetooth::error::GattFailure;
use crate::core::bluetooth::types::{
    Advertisement, CharacteristicInfo, GattProfile, ScanFilter, ServiceInfo,
};
use crate::utils::extract_mac_address;

pub struct BluestBackend {
    adapter: Adapter,
    /// Map of device addresses to devices seen while scanning
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestBackend {
    /// Opens the default adapter and waits for it to become available.
    pub async fn new() -> Result<Self, GattFailure> {
        let adapter = Adapter::default()
            .await
            .ok_or(GattFailure::AdapterUnavailable)?;
        adapter.wait_available().await.map_err(map_error)?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn device(&self, address: &str) -> Result<Device, GattFailure> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| GattFailure::UnknownDevice(address.to_string()))
    }
}

fn map_error(e: bluest::Error) -> GattFailure {
    match e.kind() {
        ErrorKind::AdapterUnavailable => GattFailure::AdapterUnavailable,
        ErrorKind::NotAuthorized => GattFailure::PermissionDenied(e.to_string()),
        _ => GattFailure::Status(e.to_string()),
    }
}

/// Platform ids embed the MAC on most systems; fall back to the raw id.
fn address_of(device: &Device) -> String {
    let id = device.id().to_string();
    extract_mac_address(&id).unwrap_or(id)
}

fn remember(devices: &Mutex<HashMap<String, Device>>, device: Device) -> String {
    let address = address_of(&device);
    devices
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(address.clone(), device);
    address
}

fn advertisement_of(devices: &Mutex<HashMap<String, Device>>, found: AdvertisingDevice) -> Advertisement {
    let name = found
        .adv_data
        .local_name
        .clone()
        .or_else(|| found.device.name().ok());
    Advertisement {
        name,
        address: remember(devices, found.device),
        rssi: found.rssi,
        services: found.adv_data.services,
        connected: false,
    }
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[async_trait::async_trait]
impl GattBackend for BluestBackend {
    async fn scan(&self, filter: &ScanFilter) -> Result<AdvertisementStream, GattFailure> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Devices the OS already holds a link to never advertise.
        match self.adapter.connected_devices().await {
            Ok(connected) => {
                for device in connected {
                    let name = device.name().ok();
                    let address = remember(&self.devices, device);
                    debug!("Already connected: {} ({:?})", address, name);
                    let _ = tx.send(Advertisement {
                        name,
                        address,
                        rssi: None,
                        services: Vec::new(),
                        connected: true,
                    });
                }
            }
            Err(e) => debug!("Could not list connected devices: {}", e),
        }

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let services = filter.services.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(scan_stream) => {
                    let _ = ready_tx.send(Ok(()));
                    scan_stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(map_error(e)));
                    return;
                }
            };
            info!("Starting bluetooth scan");
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    found = scan_stream.next() => match found {
                        Some(found) => {
                            if tx.send(advertisement_of(&devices, found)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("Bluetooth scan task finished.");
        });

        ready_rx
            .await
            .map_err(|_| GattFailure::Status("scan task ended before starting".into()))??;
        Ok(receiver_stream(rx))
    }

    async fn connect(&self, address: &str) -> Result<(), GattFailure> {
        let device = self.device(address)?;
        if device.is_connected().await {
            info!("Device {} already connected.", address);
            return Ok(());
        }
        info!("Initiating connection to {}...", address);
        self.adapter
            .connect_device(&device)
            .await
            .map_err(map_error)
    }

    async fn discover_services(&self, address: &str) -> Result<GattProfile, GattFailure> {
        let device = self.device(address)?;
        let mut profile = GattProfile::default();

        for service in device.discover_services().await.map_err(map_error)? {
            let mut characteristics = Vec::new();
            for characteristic in service.characteristics().await.map_err(map_error)? {
                let mut descriptors: Vec<Uuid> = characteristic
                    .descriptors()
                    .await
                    .map_err(map_error)?
                    .iter()
                    .map(|d| d.uuid())
                    .collect();
                // Some platforms manage the CCCD themselves and never list it.
                let properties = characteristic.properties().await.map_err(map_error)?;
                if (properties.notify || properties.indicate) && !descriptors.contains(&UUID_CCCD) {
                    descriptors.push(UUID_CCCD);
                }
                characteristics.push(CharacteristicInfo {
                    uuid: characteristic.uuid(),
                    descriptors,
                });
            }
            profile.services.push(ServiceInfo {
                uuid: service.uuid(),
                characteristics,
            });
        }
        Ok(profile)
    }

    async fn subscribe(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, GattFailure> {
        let device = self.device(address)?;
        let found_service = device
            .services()
            .await
            .map_err(map_error)?
            .into_iter()
            .find(|s| s.uuid() == service)
            .ok_or_else(|| GattFailure::Status(format!("service {} not found", service)))?;
        let notify_char = found_service
            .characteristics()
            .await
            .map_err(map_error)?
            .into_iter()
            .find(|c| c.uuid() == characteristic)
            .ok_or_else(|| {
                GattFailure::Status(format!("characteristic {} not found", characteristic))
            })?;

        info!("Subscribing to notifications...");
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut notification_stream = match notify_char.notify().await {
                Ok(notification_stream) => {
                    let _ = ready_tx.send(Ok(()));
                    notification_stream
                }
                Err(e) => {
                    error!("Failed to subscribe to notifications: {}", e);
                    let _ = ready_tx.send(Err(map_error(e)));
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    item = notification_stream.next() => match item {
                        Some(item) => {
                            if tx.send(item.map_err(map_error)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("Notification stream ended");
        });

        ready_rx
            .await
            .map_err(|_| GattFailure::Status("notification task ended before starting".into()))??;
        Ok(receiver_stream(rx))
    }

    async fn wait_for_link_down(&self, address: &str) -> Option<GattFailure> {
        let device = match self.device(address) {
            Ok(device) => device,
            Err(failure) => return Some(failure),
        };
        let mut events = match self.adapter.device_connection_events(&device).await {
            Ok(events) => events,
            Err(e) => return Some(map_error(e)),
        };
        while let Some(event) = events.next().await {
            if matches!(event, ConnectionEvent::Disconnected) {
                return None;
            }
        }
        None
    }

    async fn disconnect(&self, address: &str) -> Result<(), GattFailure> {
        let Ok(device) = self.device(address) else {
            return Ok(());
        };
        if device.is_connected().await {
            info!("Disconnecting from device {}", address);
            self.adapter
                .disconnect_device(&device)
                .await
                .map_err(map_error)?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", address);
        }
        Ok(())
    }
}
