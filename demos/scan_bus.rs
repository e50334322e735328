//! Example: Connect to a Foxtron gateway, print its firmware version and
//! list every light and input device on the DALI line.
//!
//! Usage: cargo run --example scan_bus -- <gateway-ip> [port]

use foxtron_dali::{ConnectionState, DaliDriver, GatewayConfig};
use tokio::time::{timeout, Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "192.168.0.100".to_string());
    let port = args.next().map(|p| p.parse()).transpose()?.unwrap_or(23);

    let config = GatewayConfig::builder().host(host).port(port).build();
    let driver = DaliDriver::new(config)?;

    println!("Connecting to gateway...");
    driver.connect().await;
    let mut state = driver.subscribe_state();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Open),
    )
    .await??;

    match driver.query_firmware_version().await? {
        Some(version) => println!("Firmware version: {}", version),
        None => println!("Firmware version: (no answer)"),
    }

    let lights = driver.scan_for_devices().await?;
    println!("\n--- Control gear ({}) ---", lights.len());
    for address in &lights {
        let level = driver.query_actual_level(*address).await?;
        match level {
            Some(level) => println!("  Light {:2}: level {}", address, level),
            None => println!("  Light {:2}: level unknown", address),
        }
    }

    let inputs = driver.scan_for_input_devices().await?;
    println!("\n--- Input devices ({}) ---", inputs.len());
    for address in &inputs {
        println!("  Input device {:2}", address);
    }

    driver.disconnect().await;
    Ok(())
}
