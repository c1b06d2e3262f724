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

//! Event processing and command dispatch.
//!
//! The [`Controller`] owns the [`Session`] and is the only task that touches
//! it. Callers talk to it through a cloneable [`ControllerHandle`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::bluetooth::{Transport, TransportEvent};
use crate::error::ControlError;
use crate::session::Session;
use crate::state::{AppState, Snapshot};

/// User operations accepted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect(String),
    Reconnect,
    Disconnect,
    SendWifiConfig { ssid: String, password: String },
    SendControlCommand(String),
    SetParameter(i32),
    ReadDeviceData,
    StartOta(Vec<u8>),
    StartOtaFile(PathBuf),
    CancelOta,
    ClearLog,
    Shutdown,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), ControlError>>,
}

/// Cloneable front door to a running [`Controller`].
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Request>,
    state: Arc<AppState>,
}

impl ControllerHandle {
    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Send `command` and wait until the controller has applied it.
    pub async fn execute(&self, command: Command) -> Result<(), ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| ControlError::ControllerStopped)?;
        response.await.map_err(|_| ControlError::ControllerStopped)?
    }

    pub async fn start_scan(&self) -> Result<(), ControlError> {
        self.execute(Command::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), ControlError> {
        self.execute(Command::StopScan).await
    }

    pub async fn connect(&self, address: impl Into<String>) -> Result<(), ControlError> {
        self.execute(Command::Connect(address.into())).await
    }

    pub async fn reconnect(&self) -> Result<(), ControlError> {
        self.execute(Command::Reconnect).await
    }

    pub async fn disconnect(&self) -> Result<(), ControlError> {
        self.execute(Command::Disconnect).await
    }

    pub async fn send_wifi_config(
        &self,
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), ControlError> {
        self.execute(Command::SendWifiConfig {
            ssid: ssid.into(),
            password: password.into(),
        })
        .await
    }

    pub async fn send_control_command(&self, name: impl Into<String>) -> Result<(), ControlError> {
        self.execute(Command::SendControlCommand(name.into())).await
    }

    pub async fn set_parameter(&self, value: i32) -> Result<(), ControlError> {
        self.execute(Command::SetParameter(value)).await
    }

    pub async fn read_device_data(&self) -> Result<(), ControlError> {
        self.execute(Command::ReadDeviceData).await
    }

    pub async fn start_ota(&self, image: Vec<u8>) -> Result<(), ControlError> {
        self.execute(Command::StartOta(image)).await
    }

    pub async fn start_ota_file(&self, path: impl Into<PathBuf>) -> Result<(), ControlError> {
        self.execute(Command::StartOtaFile(path.into())).await
    }

    pub async fn cancel_ota(&self) -> Result<(), ControlError> {
        self.execute(Command::CancelOta).await
    }

    pub async fn clear_log(&self) -> Result<(), ControlError> {
        self.execute(Command::ClearLog).await
    }

    /// Disconnect and stop the controller task.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        self.execute(Command::Shutdown).await
    }
}

/// Single-task owner of the session.
pub struct Controller<T: Transport> {
    session: Session<T>,
    state: Arc<AppState>,
    commands: mpsc::Receiver<Request>,
    events: mpsc::Receiver<TransportEvent>,
}

impl<T: Transport> Controller<T> {
    /// `events` is the receiving end of the channel the transport reports on.
    pub fn new(
        session: Session<T>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (Self, ControllerHandle) {
        let (tx, rx) = mpsc::channel(32);
        let state = AppState::new();
        state.publish(session.snapshot());

        let handle = ControllerHandle {
            commands: tx,
            state: state.clone(),
        };
        let controller = Self {
            session,
            state,
            commands: rx,
            events,
        };
        (controller, handle)
    }

    /// Run until shutdown or until every handle is dropped. Returns the
    /// session so its final state can be inspected.
    pub async fn run(mut self) -> Session<T> {
        info!("Controller started");

        loop {
            let deadline = self.session.next_deadline();

            tokio::select! {
                request = self.commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        debug!("All controller handles dropped");
                        break;
                    };
                    if matches!(command, Command::Shutdown) {
                        self.session.disconnect(now());
                        self.publish();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    let result = self.execute(command);
                    self.publish();
                    let _ = reply.send(result);
                }
                Some(event) = self.events.recv() => {
                    self.session.handle_event(event, now());
                    self.publish();
                }
                _ = wait_until(deadline) => {
                    self.session.poll(now());
                    self.publish();
                }
            }
        }

        info!("Controller stopped");
        self.session
    }

    fn execute(&mut self, command: Command) -> Result<(), ControlError> {
        let session = &mut self.session;
        match command {
            Command::StartScan => session.start_scan(now()),
            Command::StopScan => session.stop_scan(now()),
            Command::Connect(address) => session.connect(&address, now()),
            Command::Reconnect => session.reconnect(now()),
            Command::Disconnect => {
                session.disconnect(now());
                Ok(())
            }
            Command::SendWifiConfig { ssid, password } => session.send_wifi_config(&ssid, &password),
            Command::SendControlCommand(name) => session.send_control_command(&name),
            Command::SetParameter(value) => session.set_parameter(value),
            Command::ReadDeviceData => session.read_device_data(),
            Command::StartOta(image) => session.start_ota_blob(image, now()),
            Command::StartOtaFile(path) => session.start_ota_file(&path, now()),
            Command::CancelOta => session.cancel_ota(),
            Command::ClearLog => {
                session.clear_log();
                Ok(())
            }
            Command::Shutdown => Ok(()),
        }
    }

    fn publish(&self) {
        self.state.publish(self.session.snapshot());
    }
}

/// Current time on the tokio clock, so paused test time drives the session.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
