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

//! Line-oriented console commands.

use anyhow::{anyhow, bail, Result};
use std::fmt::Write;
use std::path::PathBuf;

use crate::events::Command;
use crate::state::Snapshot;

pub const HELP: &str = "\
Commands:
  scan                    start scanning for boards
  stop                    stop scanning
  devices                 list discovered boards
  connect <address>       connect to a discovered board
  reconnect               connect to the last board again
  disconnect              disconnect and stop auto-reconnect
  wifi <ssid> <password>  send WiFi credentials
  cmd <name>              send a control command (restart, status, ...)
  param <int>             set the board parameter
  read                    request device data
  ota <path>              upload a firmware image
  cancel                  cancel the running upload
  status [--json]         show controller state
  log                     show the event log
  clear                   clear the event log
  help                    show this help
  quit                    exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Forwarded to the controller.
    Control(Command),
    Devices,
    Status { json: bool },
    Log,
    Help,
    Quit,
}

/// Parse a console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "scan" => ConsoleCommand::Control(Command::StartScan),
        "stop" => ConsoleCommand::Control(Command::StopScan),
        "devices" => ConsoleCommand::Devices,
        "connect" => {
            if rest.is_empty() {
                bail!("usage: connect <address>");
            }
            ConsoleCommand::Control(Command::Connect(rest.to_string()))
        }
        "reconnect" => ConsoleCommand::Control(Command::Reconnect),
        "disconnect" => ConsoleCommand::Control(Command::Disconnect),
        "wifi" => {
            // Blank credentials are passed on so the controller can reject them.
            let (ssid, password) = match rest.split_once(char::is_whitespace) {
                Some((ssid, password)) => (ssid, password.trim()),
                None => (rest, ""),
            };
            ConsoleCommand::Control(Command::SendWifiConfig {
                ssid: ssid.to_string(),
                password: password.to_string(),
            })
        }
        "cmd" => {
            if rest.is_empty() {
                bail!("usage: cmd <name>");
            }
            ConsoleCommand::Control(Command::SendControlCommand(rest.to_string()))
        }
        "param" => {
            let value = rest
                .parse::<i32>()
                .map_err(|_| anyhow!("usage: param <int>"))?;
            ConsoleCommand::Control(Command::SetParameter(value))
        }
        "read" => ConsoleCommand::Control(Command::ReadDeviceData),
        "ota" => {
            if rest.is_empty() {
                bail!("usage: ota <path>");
            }
            ConsoleCommand::Control(Command::StartOtaFile(PathBuf::from(rest)))
        }
        "cancel" => ConsoleCommand::Control(Command::CancelOta),
        "status" => match rest {
            "" => ConsoleCommand::Status { json: false },
            "--json" => ConsoleCommand::Status { json: true },
            other => bail!("unknown status option: {}", other),
        },
        "log" => ConsoleCommand::Log,
        "clear" => ConsoleCommand::Control(Command::ClearLog),
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command: {} (try 'help')", other),
    };

    Ok(Some(command))
}

/// Human-readable summary of a snapshot.
pub fn render_status(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Connection: {}", snapshot.connection_state.as_str());
    let _ = writeln!(out, "Scanning:   {:?}", snapshot.scan_state);
    if let Some(device) = &snapshot.selected_device {
        let _ = writeln!(out, "Device:     {} ({})", device.label(), device.address);
    }
    if let Some(device) = &snapshot.last_known_device {
        let _ = writeln!(out, "Last known: {}", device.address);
    }
    if !snapshot.wifi_status.is_empty() {
        let _ = writeln!(out, "WiFi:       {}", snapshot.wifi_status);
    }
    if !snapshot.device_data.is_empty() {
        let _ = writeln!(out, "Data:       {}", snapshot.device_data);
    }
    let _ = write!(
        out,
        "OTA:        {:?} {}% ({}/{} bytes)",
        snapshot.ota_state, snapshot.ota_progress, snapshot.ota_bytes_sent, snapshot.ota_total_bytes
    );
    if let Some(reason) = &snapshot.ota_failure {
        let _ = write!(out, " - {}", reason);
    }
    out
}

pub fn render_devices(snapshot: &Snapshot) -> String {
    if snapshot.devices.is_empty() {
        return "No devices found".to_string();
    }
    snapshot
        .devices
        .iter()
        .map(|device| match device.rssi {
            Some(rssi) => format!("{}  {}  {} dBm", device.address, device.label(), rssi),
            None => format!("{}  {}", device.address, device.label()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{ConnectionState, DeviceRef, OtaState};

    fn parse(line: &str) -> ConsoleCommand {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("scan"), ConsoleCommand::Control(Command::StartScan));
        assert_eq!(parse("  STOP "), ConsoleCommand::Control(Command::StopScan));
        assert_eq!(parse("devices"), ConsoleCommand::Devices);
        assert_eq!(parse("status"), ConsoleCommand::Status { json: false });
        assert_eq!(parse("status --json"), ConsoleCommand::Status { json: true });
        assert_eq!(parse("quit"), ConsoleCommand::Quit);
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_arguments() {
        assert_eq!(
            parse("connect AA:BB:CC:DD:EE:FF"),
            ConsoleCommand::Control(Command::Connect("AA:BB:CC:DD:EE:FF".to_string()))
        );
        assert_eq!(
            parse("param -42"),
            ConsoleCommand::Control(Command::SetParameter(-42))
        );
        assert_eq!(
            parse("ota /tmp/firmware.bin"),
            ConsoleCommand::Control(Command::StartOtaFile(PathBuf::from("/tmp/firmware.bin")))
        );
        assert_eq!(
            parse("cmd restart"),
            ConsoleCommand::Control(Command::SendControlCommand("restart".to_string()))
        );
    }

    #[test]
    fn test_wifi_password_keeps_spaces() {
        assert_eq!(
            parse("wifi home my secret"),
            ConsoleCommand::Control(Command::SendWifiConfig {
                ssid: "home".to_string(),
                password: "my secret".to_string(),
            })
        );
        assert_eq!(
            parse("wifi home"),
            ConsoleCommand::Control(Command::SendWifiConfig {
                ssid: "home".to_string(),
                password: String::new(),
            })
        );
    }

    #[test]
    fn test_bad_input() {
        assert!(parse_line("connect").is_err());
        assert!(parse_line("param twelve").is_err());
        assert!(parse_line("status --yaml").is_err());
        assert!(parse_line("fly").is_err());
    }

    #[test]
    fn test_render() {
        let snapshot = Snapshot {
            connection_state: ConnectionState::Connected,
            devices: vec![
                DeviceRef::new("AA:BB", "disk_raid_power").with_rssi(-60),
                DeviceRef::new("CC:DD", ""),
            ],
            wifi_status: "WIFI:CONNECTED".to_string(),
            ota_state: OtaState::Failed,
            ota_progress: 40,
            ota_failure: Some("link lost".to_string()),
            ..Snapshot::default()
        };

        let status = render_status(&snapshot);
        assert!(status.contains("Connection: Connected"));
        assert!(status.contains("WiFi:       WIFI:CONNECTED"));
        assert!(status.ends_with("Failed 40% (0/0 bytes) - link lost"));

        let devices = render_devices(&snapshot);
        assert_eq!(devices, "AA:BB  disk_raid_power  -60 dBm\nCC:DD  CC:DD");
        assert_eq!(render_devices(&Snapshot::default()), "No devices found");
    }
}
