//! Example: Print every DALI event seen on the bus and report buttons that
//! are not yet known.
//!
//! Usage: cargo run --example button_events -- <gateway-ip> [known addresses...]

use foxtron_dali::{DaliDriver, DaliEvent, GatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "192.168.0.100".to_string());
    let known = args.map(|a| a.parse::<u8>()).collect::<Result<Vec<_>, _>>()?;

    let config = GatewayConfig::builder().host(host).known_buttons(known).build();
    let driver = DaliDriver::new(config)?;
    driver.connect().await;

    println!("Listening for events (Ctrl-C to stop)...");
    loop {
        tokio::select! {
            event = driver.get_event() => {
                let Some(event) = event else { break };
                println!("{}", event);
                if let DaliEvent::InputNotification { .. } = event {
                    let new = driver.get_newly_discovered_buttons();
                    if !new.is_empty() {
                        println!("  newly discovered buttons: {:?}", new);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    driver.disconnect().await;
    Ok(())
}
