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

//! Dispatch of complete inbound messages.

use tracing::debug;

use super::protocol::{Message, MessageTag, OtaResponse};

/// Where a message ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// WiFi or status report; replaces the visible status text.
    StatusText(String),
    /// Anything untagged; replaces the generic device data slot.
    DeviceData(String),
    /// Handed to the OTA engine, never shown as device data.
    Ota(OtaResponse),
}

/// Route a reassembled body.
pub fn route(message: Message) -> Route {
    debug!("Routing {} message ({} bytes)", message.tag.as_str(), message.body.len());

    match message.tag {
        MessageTag::Wifi | MessageTag::Status => Route::StatusText(message.body),
        MessageTag::Ota => Route::Ota(OtaResponse::parse(&message.body)),
        MessageTag::Other => Route::DeviceData(message.body),
    }
}
