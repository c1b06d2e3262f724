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

//! Bluetooth communication module.
//!
//! BLE central side of the board link: framing, routing, the connection
//! lifecycle and firmware updates, plus the BlueZ transport.

pub mod ble_constants;
mod bluez;
mod ota;
mod protocol;
mod reassembler;
mod router;
mod supervisor;
mod transport;

pub use bluez::BluerTransport;
pub use ota::{OtaSettings, OtaState, OtaStep, OtaTransferEngine};
pub use protocol::{
    encode_command, encode_ota_data, encode_ota_end, encode_ota_start, encode_read_data,
    encode_set_param, encode_wifi, ControlCommand, Message, MessageTag, OtaResponse,
};
pub use reassembler::{frame_message, FragmentReassembler};
pub use router::{route, Route};
pub use supervisor::{ConnectionState, ConnectionSupervisor, Effect, ScanState};
pub use transport::{DeviceRef, SessionHandle, Transport, TransportEvent};
