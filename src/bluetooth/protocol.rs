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

//! Text protocol spoken over the data characteristic.

use super::ble_constants::prefix;
use crate::error::ControlError;

/// Tag of an inbound message, taken from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    Wifi,
    Status,
    Ota,
    Other,
}

impl MessageTag {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wifi => "WIFI",
            Self::Status => "STATUS",
            Self::Ota => "OTA",
            Self::Other => "OTHER",
        }
    }
}

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tag: MessageTag,
    pub body: String,
}

impl Message {
    /// Tag a reassembled body by its prefix.
    pub fn classify(body: impl Into<String>) -> Self {
        let body = body.into();
        let tag = if body.starts_with(prefix::WIFI) {
            MessageTag::Wifi
        } else if body.starts_with(prefix::STATUS) {
            MessageTag::Status
        } else if body.starts_with(prefix::OTA) {
            MessageTag::Ota
        } else {
            MessageTag::Other
        };
        Self { tag, body }
    }
}

/// Responses the board sends while an update is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaResponse {
    /// Board has prepared its update partition.
    Ready,
    /// Image verified and applied.
    Success,
    /// Update failed; carries the full response text.
    Fail(String),
    Unrecognized(String),
}

impl OtaResponse {
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim_end();
        match trimmed {
            "OTA:READY" => Self::Ready,
            "OTA:SUCCESS" => Self::Success,
            _ if trimmed.starts_with("OTA:FAIL") => Self::Fail(trimmed.to_string()),
            _ => Self::Unrecognized(body.to_string()),
        }
    }
}

/// Well-known control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Restart,
    GetStatus,
}

impl ControlCommand {
    /// Parse from the short names the controller accepts.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restart" => Some(Self::Restart),
            "status" => Some(Self::GetStatus),
            _ => None,
        }
    }

    /// Convert to wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "RESTART",
            Self::GetStatus => "GET_STATUS",
        }
    }
}

/// `WIFI:<ssid>;<password>`
pub fn encode_wifi(ssid: &str, password: &str) -> Result<String, ControlError> {
    if ssid.trim().is_empty() || password.trim().is_empty() {
        return Err(ControlError::EmptyWifiCredentials);
    }
    Ok(format!("{}{};{}", prefix::WIFI, ssid, password))
}

/// `CMD:RESTART`, `CMD:GET_STATUS`, or `CMD:<name>` verbatim.
pub fn encode_command(name: &str) -> String {
    match ControlCommand::parse(name) {
        Some(command) => format!("{}{}", prefix::COMMAND, command.as_str()),
        None => format!("{}{}", prefix::COMMAND, name),
    }
}

pub fn encode_set_param(value: i32) -> String {
    format!("{}{}", prefix::SET_PARAM, value)
}

pub fn encode_read_data() -> &'static str {
    "READ_DATA"
}

pub fn encode_ota_start(total_bytes: u64) -> String {
    format!("{}{}", prefix::OTA_START, total_bytes)
}

/// `OTA:DATA` followed by the raw firmware bytes.
pub fn encode_ota_data(chunk: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(prefix::OTA_DATA.len() + chunk.len());
    frame.extend_from_slice(prefix::OTA_DATA.as_bytes());
    frame.extend_from_slice(chunk);
    frame
}

pub fn encode_ota_end() -> &'static str {
    "OTA:END"
}
