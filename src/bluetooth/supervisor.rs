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

//! Scan / connect / auto-reconnect state machine.
//!
//! The supervisor never touches the radio. Each input mutates its state and
//! returns the [`Effect`]s the session has to carry out, so the whole
//! lifecycle can be exercised without a transport.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::transport::{DeviceRef, SessionHandle};
use crate::error::ControlError;

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
        }
    }
}

/// Discovery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Work the session performs on behalf of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartDiscovery,
    StopDiscovery,
    OpenSession(DeviceRef),
    CloseSession(SessionHandle),
    DiscoverServices(SessionHandle),
    EnableNotifications(SessionHandle),
    /// Start scanning again to find the last known device.
    Rescan,
    /// The current session is gone; per-session state must be dropped.
    SessionEnded,
    Log(String),
}

pub struct ConnectionSupervisor {
    name_marker: String,
    auto_reconnect_allowed: bool,
    connection: ConnectionState,
    scan: ScanState,
    devices: Vec<DeviceRef>,
    selected: Option<DeviceRef>,
    last_known: Option<DeviceRef>,
    auto_reconnect: bool,
    session: Option<SessionHandle>,
}

impl ConnectionSupervisor {
    /// `name_marker` is matched case-insensitively against advertised names.
    pub fn new(name_marker: &str, auto_reconnect_allowed: bool) -> Self {
        Self {
            name_marker: name_marker.to_lowercase(),
            auto_reconnect_allowed,
            connection: ConnectionState::Disconnected,
            scan: ScanState::Idle,
            devices: Vec::new(),
            selected: None,
            last_known: None,
            auto_reconnect: false,
            session: None,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn scan(&self) -> ScanState {
        self.scan
    }

    pub fn devices(&self) -> &[DeviceRef] {
        &self.devices
    }

    pub fn selected(&self) -> Option<&DeviceRef> {
        self.selected.as_ref()
    }

    pub fn last_known(&self) -> Option<&DeviceRef> {
        self.last_known.as_ref()
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session
    }

    /// Whether a dropped link will trigger a rescan.
    pub fn auto_reconnect_armed(&self) -> bool {
        self.auto_reconnect_allowed && self.auto_reconnect
    }

    pub fn start_scan(&mut self, permitted: bool) -> Result<Vec<Effect>, ControlError> {
        if !permitted {
            return Err(ControlError::MissingPermission);
        }
        if self.scan == ScanState::Scanning {
            return Err(ControlError::AlreadyScanning);
        }

        self.scan = ScanState::Scanning;
        self.devices.clear();
        Ok(vec![
            Effect::Log("Scanning for devices...".to_string()),
            Effect::StartDiscovery,
        ])
    }

    pub fn stop_scan(&mut self) -> Result<Vec<Effect>, ControlError> {
        if self.scan != ScanState::Scanning {
            return Err(ControlError::NotScanning);
        }

        self.scan = ScanState::Idle;
        Ok(vec![
            Effect::StopDiscovery,
            Effect::Log("Scan stopped".to_string()),
        ])
    }

    pub fn on_scan_failed(&mut self, reason: &str) -> Vec<Effect> {
        self.scan = ScanState::Idle;
        vec![Effect::Log(format!("Scan failed: {}", reason))]
    }

    /// Handle one advertisement.
    pub fn on_discovered(&mut self, device: DeviceRef) -> Vec<Effect> {
        if self.scan != ScanState::Scanning {
            debug!("Ignoring advertisement from {} while idle", device.address);
            return vec![];
        }
        if !device.name.to_lowercase().contains(&self.name_marker) {
            return vec![];
        }

        let mut effects = Vec::new();

        match self.devices.iter().position(|d| d.address == device.address) {
            Some(index) => {
                let known = &mut self.devices[index];
                known.rssi = device.rssi.or(known.rssi);
                if !device.name.is_empty() {
                    known.name.clone_from(&device.name);
                }
            }
            None => {
                effects.push(Effect::Log(format!(
                    "Found device: {} - {}",
                    device.label(),
                    device.address
                )));
                self.devices.push(device.clone());
            }
        }

        let is_last_known = self
            .last_known
            .as_ref()
            .is_some_and(|last| last.address == device.address);

        if is_last_known
            && self.auto_reconnect_armed()
            && self.connection == ConnectionState::Disconnected
        {
            effects.push(Effect::Log(format!(
                "Last connected device seen, reconnecting: {}",
                device.address
            )));
            match self.connect(device) {
                Ok(more) => effects.extend(more),
                Err(e) => effects.push(Effect::Log(e.to_string())),
            }
        }

        effects
    }

    pub fn connect(&mut self, device: DeviceRef) -> Result<Vec<Effect>, ControlError> {
        if self.connection != ConnectionState::Disconnected {
            let current = self
                .selected
                .as_ref()
                .map(|d| d.address.clone())
                .unwrap_or_default();
            return Err(ControlError::AlreadyConnected(current));
        }

        let mut effects = Vec::new();
        if self.scan == ScanState::Scanning {
            self.scan = ScanState::Idle;
            effects.push(Effect::StopDiscovery);
        }

        self.connection = ConnectionState::Connecting;
        self.last_known = Some(device.clone());
        self.selected = Some(device.clone());
        self.auto_reconnect = true;

        effects.push(Effect::Log(format!("Connecting to {}", device.label())));
        effects.push(Effect::OpenSession(device));
        Ok(effects)
    }

    /// Connect to a device from the current scan results.
    pub fn connect_address(&mut self, address: &str) -> Result<Vec<Effect>, ControlError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address))
            .cloned()
            .ok_or_else(|| ControlError::UnknownDevice(address.to_string()))?;
        self.connect(device)
    }

    /// Connect to the last known device without scanning.
    pub fn reconnect(&mut self) -> Result<Vec<Effect>, ControlError> {
        let device = self
            .last_known
            .clone()
            .ok_or(ControlError::NoLastKnownDevice)?;
        self.connect(device)
    }

    pub fn session_opened(&mut self, handle: SessionHandle) {
        debug!("Transport opened {}", handle);
        self.session = Some(handle);
    }

    /// The transport could not even start connecting.
    pub fn open_failed(&mut self, reason: &str) -> Vec<Effect> {
        self.connection = ConnectionState::Disconnected;
        self.session = None;
        vec![Effect::Log(format!("Connection failed: {}", reason))]
    }

    pub fn on_connected(&mut self, handle: SessionHandle) -> Vec<Effect> {
        if !self.is_current(handle) || self.connection != ConnectionState::Connecting {
            return vec![];
        }
        vec![
            Effect::Log("Connected, discovering services".to_string()),
            Effect::DiscoverServices(handle),
        ]
    }

    pub fn on_services_ready(&mut self, handle: SessionHandle) -> Vec<Effect> {
        if !self.is_current(handle) || self.connection != ConnectionState::Connecting {
            return vec![];
        }
        vec![
            Effect::Log("Services discovered".to_string()),
            Effect::EnableNotifications(handle),
        ]
    }

    /// Notifications are on; the link is usable.
    pub fn notifications_enabled(&mut self, handle: SessionHandle) -> Vec<Effect> {
        if !self.is_current(handle) || self.connection != ConnectionState::Connecting {
            return vec![];
        }
        self.connection = ConnectionState::Connected;
        vec![Effect::Log("Notifications enabled".to_string())]
    }

    pub fn on_services_failed(&mut self, handle: SessionHandle, reason: &str) -> Vec<Effect> {
        if !self.is_current(handle) {
            return vec![];
        }
        vec![Effect::Log(format!("Service discovery failed: {}", reason))]
    }

    pub fn on_link_lost(&mut self, handle: SessionHandle) -> Vec<Effect> {
        if !self.is_current(handle) || self.connection == ConnectionState::Disconnected {
            debug!("Ignoring disconnect for stale {}", handle);
            return vec![];
        }

        self.connection = ConnectionState::Disconnected;
        self.session = None;

        // The transport still holds the dead session until it is closed.
        let mut effects = vec![
            Effect::Log("Connection lost".to_string()),
            Effect::CloseSession(handle),
            Effect::SessionEnded,
        ];
        if self.auto_reconnect_armed() {
            effects.push(Effect::Rescan);
        }
        effects
    }

    /// A connection attempt never reached the ready state.
    pub fn connect_timed_out(&mut self) -> Vec<Effect> {
        if self.connection != ConnectionState::Connecting {
            return vec![];
        }

        let mut effects = vec![Effect::Log("Connection attempt timed out".to_string())];
        match self.session {
            Some(handle) => effects.extend(self.on_link_lost(handle)),
            None => {
                self.connection = ConnectionState::Disconnected;
                if self.auto_reconnect_armed() {
                    effects.push(Effect::Rescan);
                }
            }
        }
        effects
    }

    /// User-initiated disconnect. Suppresses auto-reconnect but keeps the
    /// last known device.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        self.auto_reconnect = false;

        let mut effects = Vec::new();
        if let Some(handle) = self.session.take() {
            effects.push(Effect::CloseSession(handle));
            effects.push(Effect::SessionEnded);
        }
        self.connection = ConnectionState::Disconnected;
        self.selected = None;
        effects.push(Effect::Log("Disconnected".to_string()));
        effects
    }

    fn is_current(&self, handle: SessionHandle) -> bool {
        self.session == Some(handle)
    }
}
