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

//! Configuration module.
//!
//! Handles loading and saving controller settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::ble_constants::{self, config};
use crate::bluetooth::OtaSettings;

/// Controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Firmware update settings.
    pub ota: OtaConfig,

    /// Event log settings.
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Substring a board's advertised name must contain (case-insensitive).
    pub name_marker: String,

    /// GATT service carrying the data characteristic.
    pub service_uuid: Uuid,

    /// Write/notify characteristic.
    pub characteristic_uuid: Uuid,

    /// Rescan for the last device after the link drops.
    pub auto_reconnect: bool,

    /// Give up on a connection that is not ready after this many seconds.
    /// 0 waits forever.
    pub connect_timeout_secs: u64,

    /// How long to wait for BlueZ to resolve GATT services.
    pub services_resolve_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            name_marker: ble_constants::DEVICE_NAME_MARKER.to_string(),
            service_uuid: ble_constants::SERVICE_UUID,
            characteristic_uuid: ble_constants::DATA_CHARACTERISTIC_UUID,
            auto_reconnect: true,
            connect_timeout_secs: 20,
            services_resolve_timeout_secs: 30,
        }
    }
}

impl BluetoothConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Firmware bytes per `OTA:DATA` write.
    pub chunk_size: u32,

    /// Delay between writes in milliseconds.
    pub pace_delay_ms: u64,

    /// Maximum wait for `OTA:READY` in milliseconds.
    pub ready_timeout_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size: config::OTA_CHUNK_SIZE,
            pace_delay_ms: config::OTA_PACE_DELAY_MS,
            ready_timeout_ms: config::OTA_READY_TIMEOUT_MS,
        }
    }
}

impl OtaConfig {
    pub fn settings(&self) -> OtaSettings {
        OtaSettings {
            chunk_size: self.chunk_size.max(1),
            pace_delay: Duration::from_millis(self.pace_delay_ms),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Entries kept in the rolling event log.
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("raidpower")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}
