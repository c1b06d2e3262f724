// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ transport built on `bluer`.
//!
//! Each request spawns a task that reports back on the event channel. Per
//! session there is a connection watcher, a notification forwarder and a
//! writer draining an ordered queue.

use anyhow::{anyhow, bail, Context, Result};
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{DeviceRef, SessionHandle, Transport, TransportEvent};
use crate::config::BluetoothConfig;

const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct Link {
    device: Device,
    characteristic: Option<Characteristic>,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct BluerTransport {
    adapter: Adapter,
    powered: Arc<AtomicBool>,
    power_watch: JoinHandle<()>,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    resolve_timeout: Duration,
    events: mpsc::Sender<TransportEvent>,
    discovery: Option<JoinHandle<()>>,
    links: Arc<Mutex<HashMap<SessionHandle, Link>>>,
    next_handle: u64,
}

impl BluerTransport {
    /// Open the default adapter and power it on.
    pub async fn new(config: &BluetoothConfig, events: mpsc::Sender<TransportEvent>) -> Result<Self> {
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            if let Err(e) = adapter.set_powered(true).await {
                warn!("Could not power on adapter: {}", e);
            }
        }
        let powered = Arc::new(AtomicBool::new(adapter.is_powered().await.unwrap_or(false)));
        let power_watch = watch_power(&adapter, powered.clone()).await?;

        Ok(Self {
            adapter,
            powered,
            power_watch,
            service_uuid: config.service_uuid,
            characteristic_uuid: config.characteristic_uuid,
            resolve_timeout: Duration::from_secs(config.services_resolve_timeout_secs),
            events,
            discovery: None,
            links: Arc::new(Mutex::new(HashMap::new())),
            next_handle: 1,
        })
    }

    fn device_of(&self, handle: SessionHandle) -> Result<Device> {
        self.links
            .lock()
            .get(&handle)
            .map(|link| link.device.clone())
            .ok_or_else(|| anyhow!("unknown {}", handle))
    }

    fn track(&self, handle: SessionHandle, task: JoinHandle<()>) {
        match self.links.lock().get_mut(&handle) {
            Some(link) => link.tasks.push(task),
            None => task.abort(),
        }
    }
}

impl Transport for BluerTransport {
    fn has_permission(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    fn start_discovery(&mut self, name_filter: Option<&str>) -> Result<()> {
        if let Some(task) = self.discovery.take() {
            task.abort();
        }

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let filter = name_filter.map(str::to_lowercase);

        self.discovery = Some(tokio::spawn(async move {
            let stream = match adapter.discover_devices().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = events.send(TransportEvent::ScanFailed(e.to_string())).await;
                    return;
                }
            };
            let mut stream = Box::pin(stream);

            while let Some(event) = stream.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let device = match describe(&adapter, address).await {
                    Ok(device) => device,
                    Err(e) => {
                        debug!("Skipping {}: {:#}", address, e);
                        continue;
                    }
                };
                if let Some(filter) = &filter {
                    if !device.name.to_lowercase().contains(filter) {
                        continue;
                    }
                }
                if events.send(TransportEvent::DeviceDiscovered(device)).await.is_err() {
                    return;
                }
            }

            let _ = events
                .send(TransportEvent::ScanFailed("discovery stream ended".to_string()))
                .await;
        }));

        debug!("Discovery started");
        Ok(())
    }

    fn stop_discovery(&mut self) -> Result<()> {
        // Dropping the stream ends the BlueZ discovery session.
        if let Some(task) = self.discovery.take() {
            task.abort();
        }
        Ok(())
    }

    fn open_session(&mut self, device: &DeviceRef) -> Result<SessionHandle> {
        let address: Address = device
            .address
            .parse()
            .map_err(|_| anyhow!("invalid address {}", device.address))?;
        let bt_device = self.adapter.device(address)?;

        let handle = SessionHandle(self.next_handle);
        self.next_handle += 1;

        let events = self.events.clone();
        let watched = bt_device.clone();
        let watcher = tokio::spawn(async move {
            let changes = match watched.events().await {
                Ok(changes) => changes,
                Err(e) => {
                    warn!("Cannot watch {}: {}", handle, e);
                    let _ = events.send(TransportEvent::Disconnected(handle)).await;
                    return;
                }
            };
            let mut changes = Box::pin(changes);

            if let Err(e) = watched.connect().await {
                warn!("Connect failed for {}: {}", handle, e);
                let _ = events.send(TransportEvent::Disconnected(handle)).await;
                return;
            }
            if events.send(TransportEvent::Connected(handle)).await.is_err() {
                return;
            }

            while let Some(change) = changes.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = change {
                    info!("{} link dropped", handle);
                    let _ = events.send(TransportEvent::Disconnected(handle)).await;
                    return;
                }
            }
        });

        self.links.lock().insert(
            handle,
            Link {
                device: bt_device,
                characteristic: None,
                writer: None,
                tasks: vec![watcher],
            },
        );
        info!("Opened {} to {}", handle, device.address);
        Ok(handle)
    }

    fn close_session(&mut self, handle: SessionHandle) {
        let Some(link) = self.links.lock().remove(&handle) else {
            return;
        };
        for task in link.tasks {
            task.abort();
        }

        let device = link.device;
        tokio::spawn(async move {
            if let Err(e) = device.disconnect().await {
                debug!("Disconnect of {} failed: {}", handle, e);
            }
        });
        info!("Closed {}", handle);
    }

    fn discover_services(&mut self, handle: SessionHandle) -> Result<()> {
        let device = self.device_of(handle)?;
        let events = self.events.clone();
        let links = self.links.clone();
        let service_uuid = self.service_uuid;
        let characteristic_uuid = self.characteristic_uuid;
        let timeout = self.resolve_timeout;

        let task = tokio::spawn(async move {
            let found =
                find_characteristic(&device, service_uuid, characteristic_uuid, timeout).await;
            let characteristic = match found {
                Ok(characteristic) => characteristic,
                Err(e) => {
                    let _ = events
                        .send(TransportEvent::ServicesFailed(handle, format!("{:#}", e)))
                        .await;
                    return;
                }
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let writer = tokio::spawn(run_writer(
                handle,
                characteristic.clone(),
                rx,
                events.clone(),
            ));

            let stored = {
                let mut links = links.lock();
                match links.get_mut(&handle) {
                    Some(link) => {
                        link.characteristic = Some(characteristic);
                        link.writer = Some(tx);
                        link.tasks.push(writer);
                        true
                    }
                    None => {
                        writer.abort();
                        false
                    }
                }
            };
            if !stored {
                return;
            }

            let _ = events.send(TransportEvent::ServicesReady(handle)).await;
        });

        self.track(handle, task);
        Ok(())
    }

    fn enable_notifications(&mut self, handle: SessionHandle, characteristic: Uuid) -> Result<()> {
        if characteristic != self.characteristic_uuid {
            bail!("characteristic {} was not resolved", characteristic);
        }
        let resolved = self
            .links
            .lock()
            .get(&handle)
            .and_then(|link| link.characteristic.clone())
            .ok_or_else(|| anyhow!("services of {} not resolved", handle))?;
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let stream = match resolved.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    let reason = format!("enabling notifications: {}", e);
                    let _ = events.send(TransportEvent::ServicesFailed(handle, reason)).await;
                    return;
                }
            };
            let mut stream = Box::pin(stream);

            while let Some(value) = stream.next().await {
                debug!("{} notification: {} bytes", handle, value.len());
                if events
                    .send(TransportEvent::Notification(handle, value))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            debug!("Notification stream of {} ended", handle);
        });

        self.track(handle, task);
        Ok(())
    }

    fn write(&mut self, handle: SessionHandle, data: Vec<u8>) -> Result<()> {
        let links = self.links.lock();
        let writer = links
            .get(&handle)
            .and_then(|link| link.writer.as_ref())
            .ok_or_else(|| anyhow!("{} is not ready for writes", handle))?;
        writer
            .send(data)
            .map_err(|_| anyhow!("writer of {} has stopped", handle))
    }
}

impl Drop for BluerTransport {
    fn drop(&mut self) {
        self.power_watch.abort();
        if let Some(task) = self.discovery.take() {
            task.abort();
        }
    }
}

/// Keep `powered` in step with the adapter's `Powered` property.
async fn watch_power(adapter: &Adapter, powered: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    let changes = adapter
        .events()
        .await
        .context("watching adapter properties")?;

    Ok(tokio::spawn(async move {
        let mut changes = Box::pin(changes);
        while let Some(event) = changes.next().await {
            if let Some(on) = power_change(&event) {
                info!("Bluetooth adapter powered {}", if on { "on" } else { "off" });
                powered.store(on, Ordering::Release);
            }
        }
        debug!("Adapter event stream ended");
    }))
}

fn power_change(event: &AdapterEvent) -> Option<bool> {
    match event {
        AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) => Some(*on),
        _ => None,
    }
}

async fn describe(adapter: &Adapter, address: Address) -> Result<DeviceRef> {
    let device = adapter.device(address)?;
    let name = device.name().await?.unwrap_or_default();
    let rssi = device.rssi().await?;

    let mut found = DeviceRef::new(address.to_string(), name);
    found.rssi = rssi;
    Ok(found)
}

async fn find_characteristic(
    device: &Device,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    timeout: Duration,
) -> Result<Characteristic> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !device
        .is_services_resolved()
        .await
        .context("checking GATT services")?
    {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for GATT services");
        }
        tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
    }

    for service in device.services().await? {
        if service.uuid().await? != service_uuid {
            continue;
        }
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == characteristic_uuid {
                return Ok(characteristic);
            }
        }
        bail!("characteristic {} not found", characteristic_uuid);
    }
    bail!("service {} not found", service_uuid)
}

async fn run_writer(
    handle: SessionHandle,
    characteristic: Characteristic,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(data) = queue.recv().await {
        let event = match characteristic.write(&data).await {
            Ok(()) => TransportEvent::WriteAck(handle),
            Err(e) => TransportEvent::WriteFailed(handle, e.to_string()),
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_changes_are_tracked() {
        let off = AdapterEvent::PropertyChanged(AdapterProperty::Powered(false));
        let on = AdapterEvent::PropertyChanged(AdapterProperty::Powered(true));
        assert_eq!(power_change(&off), Some(false));
        assert_eq!(power_change(&on), Some(true));

        let discoverable = AdapterEvent::PropertyChanged(AdapterProperty::Discoverable(true));
        assert_eq!(power_change(&discoverable), None);
        assert_eq!(power_change(&AdapterEvent::DeviceAdded(Address::any())), None);
    }
}
