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

//! Controller state visible to the outside.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::bluetooth::{ConnectionState, DeviceRef, OtaState, ScanState};

/// One human-readable line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.text)
    }
}

/// Bounded log; the oldest entries fall off the front.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl EventLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: Local::now(),
            text: text.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Read-only view of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub connection_state: ConnectionState,
    pub scan_state: ScanState,
    pub devices: Vec<DeviceRef>,
    pub selected_device: Option<DeviceRef>,
    pub last_known_device: Option<DeviceRef>,
    /// Last `WIFI:` or `STATUS:` report.
    pub wifi_status: String,
    /// Last untagged message.
    pub device_data: String,
    pub ota_state: OtaState,
    pub ota_progress: u8,
    pub ota_bytes_sent: u64,
    pub ota_total_bytes: u64,
    pub ota_failure: Option<String>,
    pub log: Vec<LogEntry>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            scan_state: ScanState::Idle,
            devices: Vec::new(),
            selected_device: None,
            last_known_device: None,
            wifi_status: String::new(),
            device_data: String::new(),
            ota_state: OtaState::Idle,
            ota_progress: 0,
            ota_bytes_sent: 0,
            ota_total_bytes: 0,
            ota_failure: None,
            log: Vec::new(),
        }
    }
}

/// Shared application state.
#[derive(Debug, Default)]
pub struct AppState {
    snapshot: RwLock<Snapshot>,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, snapshot: Snapshot) {
        *self.snapshot.write() = snapshot;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.snapshot.read().connection_state
    }

    pub fn ota(&self) -> (OtaState, u8) {
        let snapshot = self.snapshot.read();
        (snapshot.ota_state, snapshot.ota_progress)
    }
}
