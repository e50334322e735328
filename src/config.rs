// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use std::time::Duration;

use crate::constants::DEFAULT_PORT;

/// Configuration for connecting to a Foxtron gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway IP address or host name
    pub host: String,
    /// Gateway TCP port (23 for the first DALI line, 24 for the second)
    pub port: u16,
    /// Interval between keep-alive config queries (default: 20s)
    pub keep_alive_interval: Duration,
    /// First reconnect delay; doubled after every failure (default: 1s)
    pub initial_reconnect_delay: Duration,
    /// Upper bound of the reconnect delay (default: 60s)
    pub max_reconnect_delay: Duration,
    /// Default timeout of a DALI query (default: 500ms)
    pub query_timeout: Duration,
    /// Default timeout of a gateway config query (default: 5s)
    pub config_query_timeout: Duration,
    /// Pause between queries while scanning the bus (default: 100ms)
    pub scan_delay: Duration,
    /// Pause between loading DTR0 and SET FADE TIME (default: 100ms)
    pub fade_settle_delay: Duration,
    /// Longest a frame write may block before the session is failed (default: 5s)
    pub write_timeout: Duration,
    /// Socket read size in bytes (default: 1024)
    pub read_chunk_size: usize,
    /// Input device short addresses already adopted by the application
    pub known_buttons: Vec<u8>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.100".to_string(),
            port: DEFAULT_PORT,
            keep_alive_interval: Duration::from_secs(20),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            query_timeout: Duration::from_millis(500),
            config_query_timeout: Duration::from_secs(5),
            scan_delay: Duration::from_millis(100),
            fade_settle_delay: Duration::from_millis(100),
            write_timeout: Duration::from_secs(5),
            read_chunk_size: 1024,
            known_buttons: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// `host:port` string for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for GatewayConfig.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    pub fn initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.initial_reconnect_delay = delay;
        self
    }

    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay = delay;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    pub fn config_query_timeout(mut self, timeout: Duration) -> Self {
        self.config.config_query_timeout = timeout;
        self
    }

    pub fn scan_delay(mut self, delay: Duration) -> Self {
        self.config.scan_delay = delay;
        self
    }

    pub fn fade_settle_delay(mut self, delay: Duration) -> Self {
        self.config.fade_settle_delay = delay;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    pub fn known_buttons(mut self, buttons: impl IntoIterator<Item = u8>) -> Self {
        self.config.known_buttons = buttons.into_iter().collect();
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}
