// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::constants::{
    arc_address, command_address, fade_time_seconds, message_type_name, opcode,
    CONFIG_ITEM_FIRMWARE_VERSION, DALI_BROADCAST, DALI_SPECIAL_DTR0, MAX_ARC_LEVEL, MAX_FADE_CODE,
    MAX_SHORT_ADDRESS,
};
use crate::decoder::{
    decode_config_response, decode_dali_frame, decode_gateway_event, decode_unsolicited_answer,
};
use crate::error::{DaliError, Result};
use crate::event::{event_channel, DaliEvent, EventReceiver, EventSender};
use crate::frame::parse_frame_content;
use crate::protocol::{Message, Request, SendFlags};
use crate::transport::{lock, Connection, ConnectionState, PendingQueries, SessionHandler};

/// Input devices seen on the bus, split into those the application already
/// knows about and those it has not adopted yet. The two sets are disjoint.
#[derive(Debug, Default)]
struct ButtonRegistry {
    known: BTreeSet<u8>,
    newly_discovered: BTreeSet<u8>,
}

impl ButtonRegistry {
    fn observe(&mut self, address: u8) {
        if !self.known.contains(&address) && self.newly_discovered.insert(address) {
            info!("New button discovered at address {}. Adding to discovery cache.", address);
        }
    }

    fn adopt(&mut self, address: u8) {
        self.known.insert(address);
        self.newly_discovered.remove(&address);
    }
}

/// Routes inbound frames: resolves pending queries, tracks buttons and
/// queues events.
struct Dispatcher {
    dali_queries: PendingQueries<[u8; 2], u8>,
    config_queries: PendingQueries<u8, u16>,
    buttons: Mutex<ButtonRegistry>,
    event_tx: EventSender,
}

impl Dispatcher {
    fn new(known_buttons: &[u8], event_tx: EventSender) -> Self {
        Self {
            dali_queries: PendingQueries::new(),
            config_queries: PendingQueries::new(),
            buttons: Mutex::new(ButtonRegistry {
                known: known_buttons.iter().copied().collect(),
                newly_discovered: BTreeSet::new(),
            }),
            event_tx,
        }
    }

    fn handle_frame(&self, content: &[u8]) {
        let payload = match parse_frame_content(content) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Dropping frame {}: {}", String::from_utf8_lossy(content), e);
                return;
            }
        };

        debug!(
            "Parsing message type 0x{:02X} ({}) with payload {}",
            payload[0],
            message_type_name(payload[0]),
            hex::encode_upper(&payload)
        );

        match Message::parse(&payload) {
            Ok(message) => {
                if let Some(event) = self.handle_message(message) {
                    self.publish(event);
                }
            }
            Err(e) => warn!("Dropping message: {}", e),
        }
    }

    fn handle_message(&self, message: Message) -> Option<DaliEvent> {
        match message {
            Message::DaliEvent { bits, frame, .. } => Some(decode_dali_frame(bits, &frame)),
            Message::SpecialGatewayEvent { code } => Some(decode_gateway_event(code)),
            Message::ConfigResponse { item, value } => {
                self.config_queries.resolve(&item, Some(value));
                Some(decode_config_response(item, value))
            }
            Message::DaliResponse { command, answer } => self.handle_dali_response(&command, &answer),
            Message::Confirmation => {
                debug!("Received confirmation for a sent command");
                None
            }
            Message::Unknown { msg_type } => {
                warn!("No handler for message type 0x{:02X}", msg_type);
                None
            }
        }
    }

    fn handle_dali_response(&self, command: &[u8], answer: &[u8]) -> Option<DaliEvent> {
        let value = answer.first().copied();

        // The gateway omits the echoed command when a single query is in flight
        if let Some(key) = self.dali_queries.resolve_sole(value) {
            debug!("Resolved sole pending query {} with {:?}", hex::encode_upper(key), value);
            return None;
        }

        if let Ok(key) = <[u8; 2]>::try_from(command)
            && self.dali_queries.resolve(&key, value)
        {
            debug!("Resolved pending query {} with {:?}", hex::encode_upper(key), value);
            return None;
        }

        match decode_unsolicited_answer(answer) {
            Some(event) => {
                debug!("Received unsolicited DALI query response: {}", hex::encode_upper(answer));
                Some(event)
            }
            None => {
                debug!("Received unsolicited DALI response with no answer data");
                None
            }
        }
    }

    fn publish(&self, event: DaliEvent) {
        if let DaliEvent::InputNotification {
            address: Some(address),
            ..
        } = event
        {
            lock(&self.buttons).observe(address);
        }

        debug!("Queueing event: {}", event);
        // Receiver lives as long as the driver
        let _ = self.event_tx.send(event);
    }

    fn abort_all(&self) {
        self.dali_queries.abort_all();
        self.config_queries.abort_all();
    }
}

impl SessionHandler for Dispatcher {
    fn on_frame(&self, content: &[u8]) {
        self.handle_frame(content);
    }

    fn on_connection_lost(&self) {
        self.abort_all();
    }
}

/// High-level async driver for one DALI line of a Foxtron gateway.
///
/// # Example
///
/// ```no_run
/// use foxtron_dali::{DaliDriver, GatewayConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = GatewayConfig::builder().host("192.168.0.100").port(23).build();
///     let driver = DaliDriver::new(config)?;
///     driver.connect().await;
///
///     if let Some(version) = driver.query_firmware_version().await? {
///         println!("Gateway firmware {}", version);
///     }
///     for address in driver.scan_for_devices().await? {
///         println!("Light at short address {}", address);
///     }
///
///     while let Some(event) = driver.get_event().await {
///         println!("{}", event);
///     }
///     Ok(())
/// }
/// ```
pub struct DaliDriver {
    config: GatewayConfig,
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
    events: tokio::sync::Mutex<EventReceiver>,
}

impl DaliDriver {
    /// Create a driver. Nothing is sent until `connect()`.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let (event_tx, event_rx) = event_channel();
        let dispatcher = Arc::new(Dispatcher::new(&config.known_buttons, event_tx));
        let connection = Connection::new(&config, dispatcher.clone())?;

        Ok(Self {
            config,
            connection,
            dispatcher,
            events: tokio::sync::Mutex::new(event_rx),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open the session. Failures are retried in the background.
    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    /// Close the session, stop reconnecting and abort every pending query.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.dispatcher.abort_all();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    async fn send_request(&self, request: &Request) -> Result<()> {
        let frame = request.to_frame()?;
        self.connection.send_frame(&frame).await
    }

    /// Send a 16-bit DALI command. No answer is expected.
    ///
    /// With `send_twice` the gateway repeats the frame, as DALI requires for
    /// configuration commands.
    pub async fn send_command(&self, address_byte: u8, opcode_byte: u8, send_twice: bool) -> Result<()> {
        self.send_request(&Request::dali_command(address_byte, opcode_byte, send_twice))
            .await?;
        debug!(
            "Sent DALI command: Address=0x{:02X}, Opcode=0x{:02X}",
            address_byte, opcode_byte
        );
        Ok(())
    }

    /// Send a DALI query and wait for the backward frame, using the
    /// configured query timeout.
    ///
    /// `Ok(None)` means no device answered. Fails with `AlreadyInProgress`
    /// if the same query is outstanding, without sending anything.
    pub async fn send_query(&self, address_byte: u8, opcode_byte: u8) -> Result<Option<u8>> {
        self.send_query_with_timeout(address_byte, opcode_byte, self.config.query_timeout)
            .await
    }

    pub async fn send_query_with_timeout(
        &self,
        address_byte: u8,
        opcode_byte: u8,
        timeout: Duration,
    ) -> Result<Option<u8>> {
        let key = [address_byte, opcode_byte];
        let registry = &self.dispatcher.dali_queries;
        let query = registry.register(key).inspect_err(|_| {
            warn!("Query for {} already in progress", hex::encode_upper(key));
        })?;

        if let Err(e) = self
            .send_request(&Request::dali_command(address_byte, opcode_byte, false))
            .await
        {
            registry.cancel(&query);
            return Err(e);
        }
        debug!(
            "Sent DALI query: Address=0x{:02X}, Opcode=0x{:02X}",
            address_byte, opcode_byte
        );

        match registry.wait(query, timeout).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                debug!("No response for query {}: {}", hex::encode_upper(key), e);
                Ok(None)
            }
        }
    }

    /// Read a gateway configuration item, using the configured timeout.
    ///
    /// A query already outstanding for the same item is shared, not repeated.
    pub async fn query_config_item(&self, item_number: u8) -> Result<Option<u16>> {
        self.query_config_item_with_timeout(item_number, self.config.config_query_timeout)
            .await
    }

    pub async fn query_config_item_with_timeout(
        &self,
        item_number: u8,
        timeout: Duration,
    ) -> Result<Option<u16>> {
        let registry = &self.dispatcher.config_queries;
        let (query, joined) = registry.register_or_join(item_number);

        if joined {
            debug!("Query for item {} already in progress, waiting for it", item_number);
        } else if let Err(e) = self
            .send_request(&Request::QueryConfigItem { item: item_number })
            .await
        {
            registry.cancel(&query);
            return Err(e);
        }

        match registry.wait(query, timeout).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Failed to get config response for item {}: {}", item_number, e);
                Ok(None)
            }
        }
    }

    /// Gateway firmware version as `"major.minor"`.
    pub async fn query_firmware_version(&self) -> Result<Option<String>> {
        let raw = self.query_config_item(CONFIG_ITEM_FIRMWARE_VERSION).await?;
        Ok(raw.map(|v| format!("{}.{}", v >> 8, v & 0xFF)))
    }

    /// All lights to maximum level.
    pub async fn broadcast_on(&self) -> Result<()> {
        debug!("Broadcasting RECALL MAX LEVEL to all devices");
        self.send_command(DALI_BROADCAST, opcode::RECALL_MAX_LEVEL, false).await
    }

    /// All lights off.
    pub async fn broadcast_off(&self) -> Result<()> {
        debug!("Broadcasting OFF to all devices");
        self.send_command(DALI_BROADCAST, opcode::OFF, false).await
    }

    /// Set the fade time of every device on the bus (code 0-15).
    pub async fn set_fade_time(&self, fade_code: u8) -> Result<()> {
        if fade_code > MAX_FADE_CODE {
            return Err(DaliError::InvalidFadeCode { code: fade_code });
        }
        debug!(
            "Setting fade time to code {} (~{}s)",
            fade_code,
            fade_time_seconds(fade_code).unwrap_or_default()
        );

        self.send_request(&Request::SendDaliCommand {
            frame: vec![DALI_SPECIAL_DTR0, fade_code],
            flags: SendFlags::empty(),
        })
        .await?;
        sleep(self.config.fade_settle_delay).await;
        self.send_command(DALI_BROADCAST, opcode::SET_FADE_TIME, true).await
    }

    /// Direct arc power control of one light.
    pub async fn set_device_level(&self, short_address: u8, level: u8) -> Result<()> {
        validate_short_address(short_address)?;
        if level > MAX_ARC_LEVEL {
            return Err(DaliError::InvalidLevel { level });
        }
        self.send_command(arc_address(short_address), level, false).await
    }

    pub async fn query_actual_level(&self, short_address: u8) -> Result<Option<u8>> {
        validate_short_address(short_address)?;
        self.send_query(command_address(short_address), opcode::QUERY_ACTUAL_LEVEL)
            .await
    }

    /// Query one address during a scan. A concurrent identical query counts
    /// as no answer.
    async fn probe(&self, short_address: u8, opcode_byte: u8) -> Result<Option<u8>> {
        match self.send_query(command_address(short_address), opcode_byte).await {
            Err(DaliError::AlreadyInProgress { .. }) => Ok(None),
            other => other,
        }
    }

    /// Short addresses of all control gear (lights) on the bus, ascending.
    pub async fn scan_for_devices(&self) -> Result<Vec<u8>> {
        info!("Starting DALI bus scan for control gear");
        let mut found = Vec::new();

        for address in 0..=MAX_SHORT_ADDRESS {
            if self.probe(address, opcode::QUERY_CONTROL_GEAR_PRESENT).await?.is_some() {
                debug!("Found control gear at short address {}", address);
                found.push(address);
            }
            sleep(self.config.scan_delay).await;
        }

        info!("Scan complete, found {} control gear", found.len());
        Ok(found)
    }

    /// Short addresses of input devices (buttons, sensors), ascending.
    ///
    /// Addresses answering as control gear are skipped. Responders not yet
    /// known are added to the newly discovered set.
    pub async fn scan_for_input_devices(&self) -> Result<Vec<u8>> {
        info!("Starting DALI bus scan for input devices");
        let mut found = Vec::new();

        for address in 0..=MAX_SHORT_ADDRESS {
            let gear = self.probe(address, opcode::QUERY_CONTROL_GEAR_PRESENT).await?;
            if gear.is_none()
                && let Some(device_type) = self.probe(address, opcode::QUERY_DEVICE_TYPE).await?
            {
                debug!(
                    "Found input device at short address {} (device type 0x{:02X})",
                    address, device_type
                );
                found.push(address);
                lock(&self.dispatcher.buttons).observe(address);
            }
            sleep(self.config.scan_delay).await;
        }

        info!("Scan complete, found {} input devices", found.len());
        Ok(found)
    }

    /// Next decoded event, in arrival order. Waits until one is available.
    ///
    /// Returns `None` only once the driver is being torn down.
    pub async fn get_event(&self) -> Option<DaliEvent> {
        self.events.lock().await.recv().await
    }

    /// Input device addresses seen on the bus but not yet adopted, ascending.
    pub fn get_newly_discovered_buttons(&self) -> Vec<u8> {
        lock(&self.dispatcher.buttons).newly_discovered.iter().copied().collect()
    }

    pub fn clear_newly_discovered_buttons(&self) {
        lock(&self.dispatcher.buttons).newly_discovered.clear();
    }

    /// Mark `address` as known; it is no longer reported as newly discovered.
    pub fn add_known_button(&self, address: u8) {
        lock(&self.dispatcher.buttons).adopt(address);
    }

    pub fn known_buttons(&self) -> Vec<u8> {
        lock(&self.dispatcher.buttons).known.iter().copied().collect()
    }
}

fn validate_short_address(short_address: u8) -> Result<()> {
    if short_address > MAX_SHORT_ADDRESS {
        return Err(DaliError::InvalidShortAddress {
            address: short_address,
        });
    }
    Ok(())
}
