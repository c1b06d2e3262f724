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

//! RAID power board controller console.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raidpower_controller::bluetooth::{BluerTransport, TransportEvent};
use raidpower_controller::config::Config;
use raidpower_controller::console::{self, ConsoleCommand};
use raidpower_controller::events::{Controller, ControllerHandle};
use raidpower_controller::session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("raidpower_controller=info".parse()?),
        )
        .init();

    info!(
        "Starting RAID power controller v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Bluetooth transport reports on this channel
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
    let transport = BluerTransport::new(&config.bluetooth, event_tx).await?;

    let session = Session::new(transport, &config);
    let (controller, handle) = Controller::new(session, event_rx);
    let controller_task = tokio::spawn(controller.run());

    println!("Ready. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match console::parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => run_command(&handle, command).await,
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!("Controller shutdown: {}", e);
    }
    controller_task.await?;

    info!("Shutdown complete");
    Ok(())
}

async fn run_command(handle: &ControllerHandle, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Control(command) => {
            if let Err(e) = handle.execute(command).await {
                println!("Error: {}", e);
            }
        }
        ConsoleCommand::Devices => println!("{}", console::render_devices(&handle.snapshot())),
        ConsoleCommand::Status { json: false } => {
            println!("{}", console::render_status(&handle.snapshot()))
        }
        ConsoleCommand::Status { json: true } => {
            match serde_json::to_string_pretty(&handle.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(e) => println!("Error: {}", e),
            }
        }
        ConsoleCommand::Log => {
            for entry in handle.snapshot().log {
                println!("{}", entry);
            }
        }
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => {}
    }
}
