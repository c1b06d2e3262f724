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

//! Radio transport interface.
//!
//! Every call is fire-and-forget: it returns once the request is queued and
//! the outcome comes back later as a [`TransportEvent`]. An `Err` return
//! means the request could not even be issued.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub address: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl DeviceRef {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            rssi: None,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Name for log lines, falling back to the address.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

/// Identifies one open transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Events delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Advertisement seen while discovering.
    DeviceDiscovered(DeviceRef),
    /// Discovery stopped on its own.
    ScanFailed(String),
    /// Link layer connected; services not resolved yet.
    Connected(SessionHandle),
    /// Data service and characteristic found.
    ServicesReady(SessionHandle),
    /// Service or characteristic missing.
    ServicesFailed(SessionHandle, String),
    /// Link dropped or the connect attempt failed.
    Disconnected(SessionHandle),
    /// One notification fragment.
    Notification(SessionHandle, Vec<u8>),
    WriteAck(SessionHandle),
    WriteFailed(SessionHandle, String),
}

impl TransportEvent {
    /// Session the event belongs to, if any.
    pub fn session(&self) -> Option<SessionHandle> {
        match self {
            Self::DeviceDiscovered(_) | Self::ScanFailed(_) => None,
            Self::Connected(h)
            | Self::ServicesReady(h)
            | Self::ServicesFailed(h, _)
            | Self::Disconnected(h)
            | Self::Notification(h, _)
            | Self::WriteAck(h)
            | Self::WriteFailed(h, _) => Some(*h),
        }
    }
}

/// Operations the controller needs from a BLE stack.
pub trait Transport: Send {
    /// Whether the process may scan and connect.
    fn has_permission(&self) -> bool;

    /// Start discovery. `name_filter` of `None` reports every advertisement.
    fn start_discovery(&mut self, name_filter: Option<&str>) -> Result<()>;

    fn stop_discovery(&mut self) -> Result<()>;

    /// Begin connecting to `device`.
    fn open_session(&mut self, device: &DeviceRef) -> Result<SessionHandle>;

    fn close_session(&mut self, handle: SessionHandle);

    fn discover_services(&mut self, handle: SessionHandle) -> Result<()>;

    fn enable_notifications(&mut self, handle: SessionHandle, characteristic: Uuid) -> Result<()>;

    /// Queue one write. Writes on a session are delivered in call order.
    fn write(&mut self, handle: SessionHandle, data: Vec<u8>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_label() {
        assert_eq!(DeviceRef::new("AA:BB", "").label(), "AA:BB");
        assert_eq!(
            DeviceRef::new("AA:BB", "disk_raid_power_1").label(),
            "disk_raid_power_1"
        );
    }

    #[test]
    fn test_event_session() {
        let h = SessionHandle(3);
        assert_eq!(TransportEvent::WriteAck(h).session(), Some(h));
        assert_eq!(TransportEvent::ScanFailed("x".into()).session(), None);
        assert_eq!(h.to_string(), "session#3");
    }
}
