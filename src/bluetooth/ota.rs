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

//! Firmware update transfer.
//!
//! The engine owns the job and produces one frame per step; the session
//! decides when a step happens (settle wait, pacing) and writes the frames.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ble_constants::config;
use super::protocol::{encode_ota_data, encode_ota_end, encode_ota_start, OtaResponse};
use crate::error::ControlError;

/// Update state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtaState {
    Idle,
    Preparing,
    /// Board answered `OTA:READY`.
    Ready,
    Transferring,
    Completed,
    Failed,
}

/// Transfer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaSettings {
    pub chunk_size: u32,
    pub pace_delay: Duration,
    pub ready_timeout: Duration,
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            chunk_size: config::OTA_CHUNK_SIZE,
            pace_delay: Duration::from_millis(config::OTA_PACE_DELAY_MS),
            ready_timeout: Duration::from_millis(config::OTA_READY_TIMEOUT_MS),
        }
    }
}

struct OtaJob {
    source: Box<dyn Read + Send>,
    total_bytes: u64,
    bytes_sent: u64,
    chunk_size: u32,
}

/// Result of advancing a running transfer by one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaStep {
    /// `OTA:DATA` frame; progress already accounts for it.
    Data(Vec<u8>),
    /// `OTA:END` frame; the engine is now `Completed`.
    End(Vec<u8>),
    /// Reading the image failed; the engine is now `Failed`.
    Failed(String),
    /// Nothing is being transferred.
    Idle,
}

pub struct OtaTransferEngine {
    settings: OtaSettings,
    state: OtaState,
    job: Option<OtaJob>,
    progress: u8,
    bytes_sent: u64,
    total_bytes: u64,
    failure: Option<String>,
}

impl OtaTransferEngine {
    pub fn new(settings: OtaSettings) -> Self {
        Self {
            settings,
            state: OtaState::Idle,
            job: None,
            progress: 0,
            bytes_sent: 0,
            total_bytes: 0,
            failure: None,
        }
    }

    pub fn settings(&self) -> &OtaSettings {
        &self.settings
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    /// Percentage of the image written, kept after the job ends.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Reason of the last failure.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Whether a job exists (Preparing, Ready or Transferring).
    pub fn is_active(&self) -> bool {
        self.job.is_some()
    }

    /// Create a job and return the `OTA:START` frame.
    pub fn start(
        &mut self,
        source: Box<dyn Read + Send>,
        total_bytes: u64,
    ) -> Result<Vec<u8>, ControlError> {
        if self.is_active() {
            return Err(ControlError::OtaBusy);
        }
        if total_bytes == 0 {
            return Err(ControlError::EmptyFirmware);
        }

        self.job = Some(OtaJob {
            source,
            total_bytes,
            bytes_sent: 0,
            chunk_size: self.settings.chunk_size.max(1),
        });
        self.state = OtaState::Preparing;
        self.progress = 0;
        self.bytes_sent = 0;
        self.total_bytes = total_bytes;
        self.failure = None;

        info!("OTA job created: {} bytes", total_bytes);
        Ok(encode_ota_start(total_bytes).into_bytes())
    }

    /// Leave the preparing phase, whether or not the board said ready.
    pub fn begin_transfer(&mut self) -> bool {
        if matches!(self.state, OtaState::Preparing | OtaState::Ready) {
            self.state = OtaState::Transferring;
            true
        } else {
            false
        }
    }

    /// Produce the next frame of a transfer.
    pub fn next_step(&mut self) -> OtaStep {
        if self.state != OtaState::Transferring {
            return OtaStep::Idle;
        }
        let Some(job) = self.job.as_mut() else {
            return OtaStep::Idle;
        };

        let remaining = job.total_bytes - job.bytes_sent;
        if remaining == 0 {
            self.state = OtaState::Completed;
            self.job = None;
            info!("OTA image sent: {} bytes", self.bytes_sent);
            return OtaStep::End(encode_ota_end().as_bytes().to_vec());
        }

        let want = remaining.min(u64::from(job.chunk_size));
        let mut chunk = Vec::with_capacity(want as usize);
        let read = job.source.by_ref().take(want).read_to_end(&mut chunk);

        let reason = match read {
            Ok(n) if n as u64 == want => None,
            Ok(n) => Some(format!(
                "firmware image ended after {} of {} bytes",
                job.bytes_sent + n as u64,
                job.total_bytes
            )),
            Err(e) => Some(format!("reading firmware image: {}", e)),
        };
        if let Some(reason) = reason {
            self.fail(reason.clone());
            return OtaStep::Failed(reason);
        }

        job.bytes_sent += want;
        self.bytes_sent = job.bytes_sent;
        self.progress = (job.bytes_sent * 100 / job.total_bytes) as u8;
        debug!(
            "OTA chunk: {}/{} bytes ({}%)",
            job.bytes_sent, job.total_bytes, self.progress
        );

        OtaStep::Data(encode_ota_data(&chunk))
    }

    /// Apply a board response and describe what happened.
    pub fn handle_response(&mut self, response: &OtaResponse) -> String {
        match response {
            OtaResponse::Ready if self.state == OtaState::Preparing => {
                self.state = OtaState::Ready;
                "Device ready, starting transfer".to_string()
            }
            OtaResponse::Ready => {
                debug!("OTA:READY in state {:?}", self.state);
                format!("Ignoring OTA ready while {:?}", self.state)
            }
            OtaResponse::Success => {
                self.state = OtaState::Completed;
                self.job = None;
                "OTA update succeeded".to_string()
            }
            OtaResponse::Fail(detail) => {
                self.fail(detail.clone());
                format!("OTA update failed: {}", detail)
            }
            OtaResponse::Unrecognized(body) => {
                warn!("Unrecognized OTA response: {}", body);
                format!("Unrecognized OTA response: {}", body)
            }
        }
    }

    /// Abort the running job, keeping progress for display.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("OTA failed: {}", reason);
        self.state = OtaState::Failed;
        self.job = None;
        self.failure = Some(reason);
    }

    pub fn cancel(&mut self) -> Result<(), ControlError> {
        if !self.is_active() {
            return Err(ControlError::OtaNotRunning);
        }
        self.fail("cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn engine(chunk_size: u32) -> OtaTransferEngine {
        OtaTransferEngine::new(OtaSettings {
            chunk_size,
            ..OtaSettings::default()
        })
    }

    fn image(len: usize) -> Box<dyn Read + Send> {
        Box::new(Cursor::new((0..len).map(|i| i as u8).collect::<Vec<_>>()))
    }

    /// Run a started job to completion, returning data frames and progress.
    fn drain(engine: &mut OtaTransferEngine) -> (Vec<Vec<u8>>, Vec<u8>) {
        assert!(engine.begin_transfer());
        let mut frames = Vec::new();
        let mut progress = Vec::new();
        loop {
            match engine.next_step() {
                OtaStep::Data(frame) => {
                    frames.push(frame);
                    progress.push(engine.progress());
                }
                OtaStep::End(frame) => {
                    assert_eq!(frame, b"OTA:END".to_vec());
                    break;
                }
                other => panic!("unexpected step {:?}", other),
            }
        }
        (frames, progress)
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "flash read error"))
        }
    }

    #[test]
    fn test_start_frame_and_state() {
        let mut ota = engine(512);

        let frame = ota.start(image(1000), 1000).unwrap();
        assert_eq!(frame, b"OTA:START:1000".to_vec());
        assert_eq!(ota.state(), OtaState::Preparing);
        assert!(ota.is_active());
    }

    #[test]
    fn test_start_rejected_while_running() {
        let mut ota = engine(512);
        ota.start(image(10), 10).unwrap();

        assert_eq!(ota.start(image(10), 10), Err(ControlError::OtaBusy));
    }

    #[test]
    fn test_empty_image_rejected() {
        let mut ota = engine(512);

        assert_eq!(ota.start(image(0), 0), Err(ControlError::EmptyFirmware));
        assert_eq!(ota.state(), OtaState::Idle);
    }

    #[test]
    fn test_chunk_count_and_progress() {
        for (total, chunk) in [(1usize, 1u32), (1000, 512), (1024, 512), (1025, 512), (7, 3), (100, 1000)] {
            let mut ota = engine(chunk);
            ota.start(image(total), total as u64).unwrap();

            let (frames, progress) = drain(&mut ota);

            let expected = (total as u64).div_ceil(u64::from(chunk)) as usize;
            assert_eq!(frames.len(), expected, "total={} chunk={}", total, chunk);
            assert!(progress.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(progress.last(), Some(&100));
            assert_eq!(ota.state(), OtaState::Completed);
            assert!(!ota.is_active());
        }
    }

    #[test]
    fn test_data_frames_carry_raw_bytes() {
        let mut ota = engine(4);
        ota.start(image(6), 6).unwrap();

        let (frames, progress) = drain(&mut ota);
        assert_eq!(frames[0], b"OTA:DATA\x00\x01\x02\x03".to_vec());
        assert_eq!(frames[1], b"OTA:DATA\x04\x05".to_vec());
        assert_eq!(progress, vec![66, 100]);
    }

    #[test]
    fn test_short_image_fails() {
        let mut ota = engine(4);
        ota.start(image(5), 10).unwrap();
        ota.begin_transfer();

        assert!(matches!(ota.next_step(), OtaStep::Data(_)));
        assert!(matches!(ota.next_step(), OtaStep::Failed(_)));
        assert_eq!(ota.state(), OtaState::Failed);
        assert_eq!(ota.progress(), 40);
        assert!(ota.failure().unwrap().contains("5 of 10"));
        assert!(!ota.is_active());
    }

    #[test]
    fn test_read_error_fails() {
        let mut ota = engine(512);
        ota.start(Box::new(BrokenReader), 100).unwrap();
        ota.begin_transfer();

        match ota.next_step() {
            OtaStep::Failed(reason) => assert!(reason.contains("flash read error")),
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(ota.next_step(), OtaStep::Idle);
    }

    #[test]
    fn test_no_frames_before_transfer() {
        let mut ota = engine(512);
        assert_eq!(ota.next_step(), OtaStep::Idle);

        ota.start(image(10), 10).unwrap();
        assert_eq!(ota.next_step(), OtaStep::Idle);
    }

    #[test]
    fn test_ready_only_while_preparing() {
        let mut ota = engine(512);
        ota.handle_response(&OtaResponse::Ready);
        assert_eq!(ota.state(), OtaState::Idle);

        ota.start(image(10), 10).unwrap();
        ota.handle_response(&OtaResponse::Ready);
        assert_eq!(ota.state(), OtaState::Ready);
        assert!(ota.begin_transfer());
        assert_eq!(ota.state(), OtaState::Transferring);

        ota.handle_response(&OtaResponse::Ready);
        assert_eq!(ota.state(), OtaState::Transferring);
    }

    #[test]
    fn test_device_failure_keeps_detail() {
        let mut ota = engine(512);
        ota.start(image(10), 10).unwrap();

        let line = ota.handle_response(&OtaResponse::Fail("OTA:FAIL:bad image".to_string()));
        assert!(line.contains("bad image"));
        assert_eq!(ota.state(), OtaState::Failed);
        assert_eq!(ota.failure(), Some("OTA:FAIL:bad image"));
        assert!(!ota.is_active());
    }

    #[test]
    fn test_device_success_completes() {
        let mut ota = engine(512);
        ota.start(image(10), 10).unwrap();
        ota.begin_transfer();

        ota.handle_response(&OtaResponse::Success);
        assert_eq!(ota.state(), OtaState::Completed);
        assert!(!ota.is_active());
    }

    #[test]
    fn test_cancel() {
        let mut ota = engine(4);
        assert_eq!(ota.cancel(), Err(ControlError::OtaNotRunning));

        ota.start(image(8), 8).unwrap();
        ota.begin_transfer();
        ota.next_step();
        ota.cancel().unwrap();

        assert_eq!(ota.state(), OtaState::Failed);
        assert_eq!(ota.failure(), Some("cancelled"));
        assert_eq!(ota.progress(), 50);
        assert_eq!(ota.next_step(), OtaStep::Idle);
    }

    #[test]
    fn test_restart_after_terminal_state() {
        let mut ota = engine(512);
        ota.start(image(10), 10).unwrap();
        ota.fail("link lost");

        ota.start(image(20), 20).unwrap();
        assert_eq!(ota.state(), OtaState::Preparing);
        assert_eq!(ota.progress(), 0);
        assert_eq!(ota.failure(), None);
    }
}
