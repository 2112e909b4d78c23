//! Bridge monitor
//!
//! Opens the bridge, moves the servo, beeps, and prints the IR distance
//! average once a second. Useful for checking wiring and firmware.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --baud RATE       Baud rate (default: 9600)
//!   --config FILE     Load settings from a JSON config file
//!   --demo            Use the simulated board instead of a serial port
//!   --list            List serial ports and exit
//!   --seconds N       How long to monitor (default: 10)

use anyhow::{Context, Result};
use hwbridge_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = BridgeConfig::for_port("/dev/ttyACM0");
    let mut demo = false;
    let mut seconds = 10u64;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(port) = args.get(i) {
                    config.port_name = port.clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if let Some(baud) = args.get(i) {
                    config.baud_rate = baud.parse().context("invalid baud rate")?;
                }
            }
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a path")?;
                config = BridgeConfig::load(path)?;
            }
            "--seconds" | "-s" => {
                i += 1;
                if let Some(n) = args.get(i) {
                    seconds = n.parse().context("invalid duration")?;
                }
            }
            "--demo" => demo = true,
            "--list" | "-l" => {
                for port in list_ports() {
                    println!("{}", port);
                }
                return Ok(());
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let bridge = if demo {
        Bridge::start(config, SimulatedDevice::new())?
    } else {
        Bridge::open_serial(config)?
    };
    let device = Device::new(Arc::new(bridge), Arc::new(CapabilityRegistry::all_enabled()));

    let servo = device.set_servo(90).await?;
    println!("{} (response: {:?}, warning: {:?})", servo.message, servo.response, servo.warning);
    let beep = device.beep(200).await?;
    println!("{} (response: {:?}, warning: {:?})", beep.message, beep.response, beep.warning);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for _ in 0..seconds {
        ticker.tick().await;
        println!(
            "[{:?}] IR distance: {}",
            device.bridge().link_state(),
            device.ir_distance()?
        );
    }

    device.bridge().shutdown().await;
    Ok(())
}
