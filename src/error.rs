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

//! Errors reported back to whoever drives the controller.

use thiserror::Error;

/// Rejection of a user-initiated operation.
///
/// None of these change controller state; they are also written to the
/// rolling event log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("SSID and password must not be empty")]
    EmptyWifiCredentials,

    #[error("missing Bluetooth permission")]
    MissingPermission,

    #[error("already scanning")]
    AlreadyScanning,

    #[error("not scanning")]
    NotScanning,

    #[error("not connected to a device")]
    NotConnected,

    #[error("a connection to {0} is already active")]
    AlreadyConnected(String),

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("no previously connected device")]
    NoLastKnownDevice,

    #[error("an OTA transfer is already running")]
    OtaBusy,

    #[error("no OTA transfer is running")]
    OtaNotRunning,

    #[error("firmware image is empty")]
    EmptyFirmware,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("controller is not running")]
    ControllerStopped,
}
