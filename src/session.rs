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

//! Owned controller context.
//!
//! A [`Session`] ties the supervisor, the reassembler and the OTA engine to
//! one transport. It runs the supervisor's effects, dispatches inbound
//! messages and keeps the timers the controller loop sleeps on. Nothing in
//! here blocks or awaits; time is passed in by the caller.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bluetooth::{
    encode_command, encode_read_data, encode_set_param, encode_wifi, route, ConnectionState,
    ConnectionSupervisor, Effect, FragmentReassembler, Message, OtaState, OtaStep,
    OtaTransferEngine, Route, Transport, TransportEvent,
};
use crate::config::Config;
use crate::error::ControlError;
use crate::state::{EventLog, Snapshot};

pub struct Session<T: Transport> {
    transport: T,
    characteristic: Uuid,
    connect_timeout: Option<Duration>,
    supervisor: ConnectionSupervisor,
    reassembler: FragmentReassembler,
    ota: OtaTransferEngine,
    log: EventLog,
    wifi_status: String,
    device_data: String,
    connect_deadline: Option<Instant>,
    ota_wake: Option<Instant>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            characteristic: config.bluetooth.characteristic_uuid,
            connect_timeout: config.bluetooth.connect_timeout(),
            supervisor: ConnectionSupervisor::new(
                &config.bluetooth.name_marker,
                config.bluetooth.auto_reconnect,
            ),
            reassembler: FragmentReassembler::new(),
            ota: OtaTransferEngine::new(config.ota.settings()),
            log: EventLog::new(config.log.max_entries),
            wifi_status: String::new(),
            device_data: String::new(),
            connect_deadline: None,
            ota_wake: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn reassembler(&self) -> &FragmentReassembler {
        &self.reassembler
    }

    pub fn ota(&self) -> &OtaTransferEngine {
        &self.ota
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn wifi_status(&self) -> &str {
        &self.wifi_status
    }

    pub fn device_data(&self) -> &str {
        &self.device_data
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection_state: self.supervisor.connection(),
            scan_state: self.supervisor.scan(),
            devices: self.supervisor.devices().to_vec(),
            selected_device: self.supervisor.selected().cloned(),
            last_known_device: self.supervisor.last_known().cloned(),
            wifi_status: self.wifi_status.clone(),
            device_data: self.device_data.clone(),
            ota_state: self.ota.state(),
            ota_progress: self.ota.progress(),
            ota_bytes_sent: self.ota.bytes_sent(),
            ota_total_bytes: self.ota.total_bytes(),
            ota_failure: self.ota.failure().map(str::to_string),
            log: self.log.to_vec(),
        }
    }

    /// Earliest instant at which [`Session::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.connect_deadline, self.ota_wake) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ---- user operations ----

    pub fn start_scan(&mut self, now: Instant) -> Result<(), ControlError> {
        let permitted = self.transport.has_permission();
        match self.supervisor.start_scan(permitted) {
            Ok(effects) => {
                self.apply(effects, now);
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    pub fn stop_scan(&mut self, now: Instant) -> Result<(), ControlError> {
        match self.supervisor.stop_scan() {
            Ok(effects) => {
                self.apply(effects, now);
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    /// Connect to a device from the scan results.
    pub fn connect(&mut self, address: &str, now: Instant) -> Result<(), ControlError> {
        match self.supervisor.connect_address(address) {
            Ok(effects) => {
                self.apply(effects, now);
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    /// Connect to the last known device without scanning.
    pub fn reconnect(&mut self, now: Instant) -> Result<(), ControlError> {
        match self.supervisor.reconnect() {
            Ok(effects) => {
                self.apply(effects, now);
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    pub fn disconnect(&mut self, now: Instant) {
        let effects = self.supervisor.disconnect();
        self.apply(effects, now);
    }

    pub fn send_wifi_config(&mut self, ssid: &str, password: &str) -> Result<(), ControlError> {
        let result = encode_wifi(ssid, password).and_then(|payload| self.send(payload.into_bytes()));
        match result {
            Ok(()) => {
                self.note(format!("Sent WiFi config: {}", ssid));
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    pub fn send_control_command(&mut self, name: &str) -> Result<(), ControlError> {
        let payload = encode_command(name);
        self.send_text(payload)
    }

    pub fn set_parameter(&mut self, value: i32) -> Result<(), ControlError> {
        let payload = encode_set_param(value);
        self.send_text(payload)
    }

    pub fn read_device_data(&mut self) -> Result<(), ControlError> {
        self.send_text(encode_read_data().to_string())
    }

    /// Begin a firmware update streaming `total_bytes` from `source`.
    pub fn start_ota(
        &mut self,
        source: Box<dyn Read + Send>,
        total_bytes: u64,
        now: Instant,
    ) -> Result<(), ControlError> {
        if self.supervisor.connection() != ConnectionState::Connected {
            return self.reject(ControlError::NotConnected);
        }
        let frame = match self.ota.start(source, total_bytes) {
            Ok(frame) => frame,
            Err(e) => return self.reject(e),
        };

        self.note(format!("Starting OTA update: {} bytes", total_bytes));
        if let Err(e) = self.send(frame) {
            self.fail_ota(e.to_string());
            return Err(e);
        }
        self.ota_wake = Some(now + self.ota.settings().ready_timeout);
        Ok(())
    }

    pub fn start_ota_blob(&mut self, image: Vec<u8>, now: Instant) -> Result<(), ControlError> {
        let total = image.len() as u64;
        self.start_ota(Box::new(Cursor::new(image)), total, now)
    }

    /// Stream a firmware image from disk.
    pub fn start_ota_file(&mut self, path: &Path, now: Instant) -> Result<(), ControlError> {
        let opened = File::open(path).and_then(|file| {
            let len = file.metadata()?.len();
            Ok((file, len))
        });
        match opened {
            Ok((file, len)) => self.start_ota(Box::new(file), len, now),
            Err(e) => self.reject(ControlError::Transport(format!(
                "cannot open {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn cancel_ota(&mut self) -> Result<(), ControlError> {
        match self.ota.cancel() {
            Ok(()) => {
                self.ota_wake = None;
                self.note("OTA update cancelled");
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    // ---- transport side ----

    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::DeviceDiscovered(device) => {
                let effects = self.supervisor.on_discovered(device);
                self.apply(effects, now);
            }
            TransportEvent::ScanFailed(reason) => {
                let effects = self.supervisor.on_scan_failed(&reason);
                self.apply(effects, now);
            }
            TransportEvent::Connected(handle) => {
                let effects = self.supervisor.on_connected(handle);
                self.apply(effects, now);
            }
            TransportEvent::ServicesReady(handle) => {
                let effects = self.supervisor.on_services_ready(handle);
                self.apply(effects, now);
            }
            TransportEvent::ServicesFailed(handle, reason) => {
                let effects = self.supervisor.on_services_failed(handle, &reason);
                self.apply(effects, now);
            }
            TransportEvent::Disconnected(handle) => {
                let effects = self.supervisor.on_link_lost(handle);
                self.apply(effects, now);
            }
            TransportEvent::Notification(handle, fragment) => {
                if self.supervisor.session() != Some(handle) {
                    debug!("Dropping notification from stale {}", handle);
                } else if let Some(body) = self.reassembler.feed(&fragment) {
                    self.dispatch(body, now);
                }
            }
            TransportEvent::WriteAck(handle) => {
                debug!("Write acknowledged on {}", handle);
            }
            TransportEvent::WriteFailed(handle, reason) => {
                if self.supervisor.session() != Some(handle) {
                    debug!("Ignoring write failure from stale {}", handle);
                } else {
                    self.note(format!("Write failed: {}", reason));
                    if self.ota.is_active() {
                        self.fail_ota(format!("write failed: {}", reason));
                    }
                }
            }
        }
        self.sync_timers();
    }

    /// Fire whatever timers are due at `now`.
    pub fn poll(&mut self, now: Instant) {
        if self.connect_deadline.is_some_and(|deadline| now >= deadline) {
            self.connect_deadline = None;
            let effects = self.supervisor.connect_timed_out();
            self.apply(effects, now);
        }
        if self.ota_wake.is_some_and(|wake| now >= wake) {
            self.ota_step(now);
        }
        self.sync_timers();
    }

    fn ota_step(&mut self, now: Instant) {
        self.ota_wake = None;

        let waiting = self.ota.state() == OtaState::Preparing;
        if self.ota.begin_transfer() && waiting {
            self.note("No ready signal from device, transferring anyway");
        }

        match self.ota.next_step() {
            OtaStep::Data(frame) => match self.send(frame) {
                Ok(()) => self.ota_wake = Some(now + self.ota.settings().pace_delay),
                Err(e) => self.fail_ota(e.to_string()),
            },
            OtaStep::End(frame) => match self.send(frame) {
                Ok(()) => self.note("Firmware sent, waiting for device"),
                Err(e) => self.fail_ota(e.to_string()),
            },
            OtaStep::Failed(reason) => {
                self.note(format!("OTA update failed: {}", reason));
            }
            OtaStep::Idle => {}
        }
    }

    fn dispatch(&mut self, body: String, now: Instant) {
        self.note(format!("Received: {}", body));

        match route(Message::classify(body)) {
            Route::StatusText(text) => self.wifi_status = text,
            Route::DeviceData(text) => self.device_data = text,
            Route::Ota(response) => {
                let line = self.ota.handle_response(&response);
                self.note(line);
                match self.ota.state() {
                    OtaState::Ready => self.ota_wake = Some(now),
                    OtaState::Completed | OtaState::Failed => self.ota_wake = None,
                    _ => {}
                }
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>, now: Instant) {
        for effect in effects {
            match effect {
                Effect::StartDiscovery => {
                    if let Err(e) = self.transport.start_discovery(None) {
                        let more = self.supervisor.on_scan_failed(&format!("{:#}", e));
                        self.apply(more, now);
                    }
                }
                Effect::StopDiscovery => {
                    if let Err(e) = self.transport.stop_discovery() {
                        self.note(format!("Failed to stop scan: {:#}", e));
                    }
                }
                Effect::OpenSession(device) => {
                    self.reassembler.reset();
                    match self.transport.open_session(&device) {
                        Ok(handle) => {
                            self.supervisor.session_opened(handle);
                            self.connect_deadline = self.connect_timeout.map(|t| now + t);
                        }
                        Err(e) => {
                            let more = self.supervisor.open_failed(&format!("{:#}", e));
                            self.apply(more, now);
                        }
                    }
                }
                Effect::CloseSession(handle) => self.transport.close_session(handle),
                Effect::DiscoverServices(handle) => {
                    if let Err(e) = self.transport.discover_services(handle) {
                        self.note(format!("Service discovery failed: {:#}", e));
                    }
                }
                Effect::EnableNotifications(handle) => {
                    match self.transport.enable_notifications(handle, self.characteristic) {
                        Ok(()) => {
                            let more = self.supervisor.notifications_enabled(handle);
                            self.apply(more, now);
                        }
                        Err(e) => self.note(format!("Enabling notifications failed: {:#}", e)),
                    }
                }
                Effect::Rescan => {
                    if let Err(e) = self.start_scan(now) {
                        debug!("Rescan refused: {}", e);
                    }
                }
                Effect::SessionEnded => {
                    self.reassembler.reset();
                    if self.ota.is_active() {
                        self.fail_ota("link lost");
                    }
                }
                Effect::Log(text) => self.note(text),
            }
        }
        self.sync_timers();
    }

    fn send_text(&mut self, payload: String) -> Result<(), ControlError> {
        match self.send(payload.clone().into_bytes()) {
            Ok(()) => {
                self.note(format!("Sent: {}", payload));
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    fn send(&mut self, frame: Vec<u8>) -> Result<(), ControlError> {
        let handle = match self.supervisor.session() {
            Some(handle) if self.supervisor.connection() == ConnectionState::Connected => handle,
            _ => return Err(ControlError::NotConnected),
        };
        self.transport
            .write(handle, frame)
            .map_err(|e| ControlError::Transport(format!("{:#}", e)))
    }

    fn fail_ota(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.ota.fail(reason.clone());
        self.ota_wake = None;
        self.note(format!("OTA update failed: {}", reason));
    }

    fn reject<R>(&mut self, error: ControlError) -> Result<R, ControlError> {
        warn!("Rejected: {}", error);
        self.log.push(error.to_string());
        Err(error)
    }

    fn note(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.log.push(text);
    }

    fn sync_timers(&mut self) {
        if self.supervisor.connection() != ConnectionState::Connecting {
            self.connect_deadline = None;
        }
        if !self.ota.is_active() {
            self.ota_wake = None;
        }
    }
}
