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

//! Reassembly of `LEN:`-prefixed notification fragments into messages.
//!
//! The board announces every message with a header fragment `LEN:<n>` and
//! then streams `n` bytes of body over as many notifications as the MTU
//! requires. A header fragment never carries body bytes.

use tracing::{debug, warn};

use super::ble_constants::{config, prefix};

/// Handles reassembly of notification fragments into complete messages.
pub struct FragmentReassembler {
    buffer: Vec<u8>,
    expected_length: Option<u32>,
    resyncs: u64,
}

impl FragmentReassembler {
    /// Create a new fragment reassembler.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            expected_length: None,
            resyncs: 0,
        }
    }

    /// Process an incoming notification fragment.
    ///
    /// Returns `Some(body)` when a full message is reassembled,
    /// otherwise returns `None`.
    pub fn feed(&mut self, fragment: &[u8]) -> Option<String> {
        let Some(expected) = self.expected_length else {
            self.read_header(fragment);
            return None;
        };

        self.buffer.extend_from_slice(fragment);

        if self.buffer.len() < expected as usize {
            debug!(
                "Reassembly in progress: {}/{} bytes",
                self.buffer.len(),
                expected
            );
            return None;
        }

        if self.buffer.len() > expected as usize {
            warn!(
                "Message overran declared length: expected {}, got {}",
                expected,
                self.buffer.len()
            );
        }

        let body = std::mem::take(&mut self.buffer);
        self.expected_length = None;
        debug!("Message reassembly complete: {} bytes", body.len());
        Some(String::from_utf8_lossy(&body).into_owned())
    }

    fn read_header(&mut self, fragment: &[u8]) {
        let text = String::from_utf8_lossy(fragment);
        let text = text.trim_end_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

        let Some(length) = text.strip_prefix(prefix::LENGTH) else {
            warn!("Dropping fragment received without a length header: {:?}", text);
            return;
        };

        match length.trim().parse::<u32>() {
            Ok(0) => {
                warn!("Zero-length header, resynchronizing");
                self.reset();
                self.resyncs += 1;
            }
            Ok(expected) => {
                self.buffer.clear();
                self.expected_length = Some(expected);
                debug!("Started message reassembly, expecting {} bytes", expected);
            }
            Err(e) => {
                warn!("Invalid length header {:?}: {}, resynchronizing", text, e);
                self.reset();
                self.resyncs += 1;
            }
        }
    }

    /// Reset the reassembler state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_length = None;
    }

    /// Check if reassembly is in progress.
    pub fn is_in_progress(&self) -> bool {
        self.expected_length.is_some()
    }

    /// Declared length of the message being reassembled.
    pub fn expected_length(&self) -> Option<u32> {
        self.expected_length
    }

    /// Get current buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of times a bad header forced a reset.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame a message the way the board sends it: a `LEN:` header followed by
/// body chunks that each fit in one notification.
pub fn frame_message(data: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return vec![];
    }

    let payload = config::effective_payload_size(mtu);
    let mut fragments = Vec::with_capacity(1 + data.len().div_ceil(payload));
    fragments.push(format!("{}{}", prefix::LENGTH, data.len()).into_bytes());
    fragments.extend(data.chunks(payload).map(<[u8]>::to_vec));
    fragments
}
