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

//! BLE service and characteristic UUIDs for disk_raid_power boards.

use uuid::Uuid;

/// Control GATT service UUID exposed by the board.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Data characteristic UUID.
/// Properties: Write, Notify
pub const DATA_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Substring every board puts in its advertised name.
pub const DEVICE_NAME_MARKER: &str = "disk_raid_power";

/// Wire prefixes used by the text protocol.
pub mod prefix {
    pub const LENGTH: &str = "LEN:";
    pub const WIFI: &str = "WIFI:";
    pub const STATUS: &str = "STATUS:";
    pub const OTA: &str = "OTA:";
    pub const COMMAND: &str = "CMD:";
    pub const SET_PARAM: &str = "SET_PARAM:";
    pub const OTA_START: &str = "OTA:START:";
    pub const OTA_DATA: &str = "OTA:DATA";
}

/// BLE configuration constants.
pub mod config {
    /// Default MTU (minimum for all BLE devices).
    pub const DEFAULT_MTU: usize = 23;

    /// ATT protocol overhead (3 bytes).
    pub const ATT_OVERHEAD: usize = 3;

    /// Firmware payload bytes carried by one `OTA:DATA` write.
    pub const OTA_CHUNK_SIZE: u32 = 512;

    /// Pause between two `OTA:DATA` writes.
    pub const OTA_PACE_DELAY_MS: u64 = 20;

    /// How long to wait for `OTA:READY` before streaming anyway.
    pub const OTA_READY_TIMEOUT_MS: u64 = 1000;

    /// Calculate effective notification payload size for a given MTU.
    pub fn effective_payload_size(mtu: usize) -> usize {
        mtu.saturating_sub(ATT_OVERHEAD).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "4fafc201-1fb5-459e-8fcc-c5c9c331914b"
        );
        assert_eq!(
            DATA_CHARACTERISTIC_UUID.to_string(),
            "beb5483e-36e1-4688-b7f5-ea07361b26a8"
        );
    }

    #[test]
    fn test_effective_payload() {
        assert_eq!(config::effective_payload_size(23), 20);
        assert_eq!(config::effective_payload_size(512), 509);
        // Degenerate MTUs still make progress.
        assert_eq!(config::effective_payload_size(2), 1);
    }
}
