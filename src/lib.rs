// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver
//
//! # foxtron-dali
//!
//! Async driver for Foxtron DALI2net gateways, which bridge a DALI lighting
//! bus to TCP using an ASCII-hex framed protocol.
//!
//! The driver keeps a self-healing session to the gateway (keep-alive,
//! reconnect with exponential backoff), correlates DALI queries with their
//! answers, and decodes everything seen on the bus into [`DaliEvent`]s,
//! including DALI-2 button notifications.
//!
//! ## Quick Start
//!
//! ```no_run
//! use foxtron_dali::{DaliDriver, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::builder()
//!         .host("192.168.0.100")
//!         .port(23)
//!         .build();
//!
//!     let driver = DaliDriver::new(config)?;
//!     driver.connect().await;
//!
//!     driver.broadcast_on().await?;
//!     let level = driver.query_actual_level(5).await?;
//!     println!("Light 5 level: {:?}", level);
//!
//!     while let Some(event) = driver.get_event().await {
//!         println!("Event: {}", event);
//!     }
//!
//!     driver.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod event;
pub mod frame;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use constants::{GatewayEventCode, InputEventCode, MessageType};
pub use driver::DaliDriver;
pub use error::{DaliError, FrameError, Result};
pub use event::{AddressType, DaliEvent};
pub use protocol::{Message, Request, SendFlags};
pub use transport::ConnectionState;
