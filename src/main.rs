// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use foxtron_dali::constants::MAX_SHORT_ADDRESS;
use foxtron_dali::{ConnectionState, DaliDriver, DaliEvent, GatewayConfig};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "dali2mqtt")]
#[command(about = "Bridge between a Foxtron DALI gateway and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    gateway: GatewayToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct GatewayToml {
    host: String,
    /// 23 for the first DALI line, 24 for the second
    #[serde(default = "default_gateway_port")]
    port: u16,
    #[serde(default = "default_keep_alive")]
    keep_alive_secs: u64,
    #[serde(default = "default_max_reconnect_delay")]
    max_reconnect_delay_secs: u64,
    #[serde(default = "default_query_timeout")]
    query_timeout_ms: u64,
    #[serde(default = "default_config_query_timeout")]
    config_query_timeout_ms: u64,
    #[serde(default = "default_scan_delay")]
    scan_delay_ms: u64,
    #[serde(default)]
    known_buttons: Vec<u8>,
}

fn default_gateway_port() -> u16 {
    23
}
fn default_keep_alive() -> u64 {
    20
}
fn default_max_reconnect_delay() -> u64 {
    60
}
fn default_query_timeout() -> u64 {
    500
}
fn default_config_query_timeout() -> u64 {
    5000
}
fn default_scan_delay() -> u64 {
    100
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
}

fn default_client_id() -> String {
    "dali-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "dali/cmd".to_string()
}
fn default_publish_topic() -> String {
    "dali".to_string()
}

fn build_gateway_config(toml: &GatewayToml) -> Result<GatewayConfig> {
    if let Some(bad) = toml.known_buttons.iter().find(|&&a| a > MAX_SHORT_ADDRESS) {
        bail!("Invalid known button address: {bad} (max: {MAX_SHORT_ADDRESS})");
    }
    Ok(GatewayConfig::builder()
        .host(&toml.host)
        .port(toml.port)
        .keep_alive_interval(Duration::from_secs(toml.keep_alive_secs))
        .max_reconnect_delay(Duration::from_secs(toml.max_reconnect_delay_secs))
        .query_timeout(Duration::from_millis(toml.query_timeout_ms))
        .config_query_timeout(Duration::from_millis(toml.config_query_timeout_ms))
        .scan_delay(Duration::from_millis(toml.scan_delay_ms))
        .known_buttons(toml.known_buttons.iter().copied())
        .build())
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share a flat {now, op, ...} structure

#[derive(Serialize, Default, Debug, PartialEq)]
struct MqttDaliEvent {
    now: u64,
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none", rename = "addressType")]
    address_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opcode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "eventCode")]
    event_code: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "eventStr")]
    event_str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<String>,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Simple event with just {now, op}
#[derive(Serialize)]
struct MqttSimpleEvent {
    now: u64,
    op: String,
}

// Inbound command (subscribed)
#[derive(Deserialize, Debug)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    #[allow(dead_code)]
    op_id: Option<String>,
    #[serde(default)]
    address: Option<u8>,
    #[serde(default)]
    level: Option<u8>,
    #[serde(default)]
    fade: Option<u8>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_simple_event(client: &AsyncClient, topic: &str, op: &str) {
    let msg = MqttSimpleEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
    };
    publish_json(client, topic, &msg, false).await;
}

// ---------------------------------------------------------------------------
// DALI event → MQTT
// ---------------------------------------------------------------------------

fn event_message(event: &DaliEvent, now: u64) -> MqttDaliEvent {
    match event {
        DaliEvent::Command {
            address_byte,
            opcode_byte,
        } => MqttDaliEvent {
            now,
            op: "DALI_COMMAND",
            address: Some(*address_byte),
            opcode: Some(*opcode_byte),
            ..Default::default()
        },
        DaliEvent::InputNotification {
            address_type,
            address,
            instance_number,
            event_code,
        } => MqttDaliEvent {
            now,
            op: "INPUT_EVENT",
            address_type: Some(address_type.as_str()),
            address: *address,
            instance: Some(*instance_number),
            event_code: Some(event_code.as_u8()),
            event_str: Some(event_code.name().to_string()),
            ..Default::default()
        },
        DaliEvent::SpecialGateway {
            event_code,
            description,
        } => MqttDaliEvent {
            now,
            op: "GATEWAY_EVENT",
            event_code: Some(*event_code),
            event_str: Some((*description).to_string()),
            ..Default::default()
        },
        DaliEvent::ConfigResponse { item_number, value } => MqttDaliEvent {
            now,
            op: "CONFIG_RESPONSE",
            item: Some(*item_number),
            value: Some(*value),
            ..Default::default()
        },
        DaliEvent::QueryResponse { address, value } => MqttDaliEvent {
            now,
            op: "QUERY_RESPONSE",
            address: *address,
            value: Some(u16::from(*value)),
            ..Default::default()
        },
        DaliEvent::Generic { raw, description } => MqttDaliEvent {
            now,
            op: "DALI_FRAME",
            event_str: Some(description.clone()),
            raw: Some(hex::encode_upper(raw)),
            ..Default::default()
        },
    }
}

async fn handle_dali_event(event: DaliEvent, client: &AsyncClient, topic: &str) {
    match &event {
        DaliEvent::InputNotification { .. } | DaliEvent::SpecialGateway { .. } => info!("{event}"),
        _ => debug!("{event}"),
    }
    publish_json(client, topic, &event_message(&event, now_epoch_ms()), false).await;
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

fn require<T>(value: Option<T>, op: &str, field: &str) -> Result<T> {
    value.with_context(|| format!("{op}: missing {field}"))
}

/// Run one command against the driver. `Ok` carries the CMD_ACK data.
async fn run_command(cmd: &MqttCommand, driver: &DaliDriver) -> Result<Option<serde_json::Value>> {
    let op = cmd.op.as_str();
    match op {
        "PING" => Ok(None),

        "BROADCAST_ON" => {
            driver.broadcast_on().await?;
            Ok(None)
        }

        "BROADCAST_OFF" => {
            driver.broadcast_off().await?;
            Ok(None)
        }

        "SET_LEVEL" => {
            let address = require(cmd.address, op, "address")?;
            let level = require(cmd.level, op, "level")?;
            driver.set_device_level(address, level).await?;
            Ok(None)
        }

        "QUERY_LEVEL" => {
            let address = require(cmd.address, op, "address")?;
            let level = driver.query_actual_level(address).await?;
            Ok(Some(json!({ "address": address, "level": level })))
        }

        "SET_FADE_TIME" => {
            let fade = require(cmd.fade, op, "fade")?;
            driver.set_fade_time(fade).await?;
            Ok(None)
        }

        "SCAN" => {
            let devices = driver.scan_for_devices().await?;
            Ok(Some(json!({ "devices": devices })))
        }

        "SCAN_INPUTS" => {
            let devices = driver.scan_for_input_devices().await?;
            Ok(Some(json!({ "devices": devices })))
        }

        "FIRMWARE" => {
            let version = driver.query_firmware_version().await?;
            Ok(Some(json!({ "version": version })))
        }

        "DISCOVERED_BUTTONS" => Ok(Some(json!({
            "buttons": driver.get_newly_discovered_buttons(),
            "known": driver.known_buttons(),
        }))),

        "ADOPT_BUTTON" => {
            let address = require(cmd.address, op, "address")?;
            if address > MAX_SHORT_ADDRESS {
                bail!("{op}: invalid address {address}");
            }
            driver.add_known_button(address);
            info!("Button {address} adopted; add it to gateway.known_buttons to keep it across restarts");
            Ok(None)
        }

        other => bail!("Unknown command: {other}"),
    }
}

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    driver: &DaliDriver,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    match run_command(&cmd, driver).await {
        Ok(data) => {
            info!("{}: success", cmd.op);
            publish_cmd_ack(client, topic, true, src_json, data).await;
        }
        Err(e) => {
            warn!("{} failed: {e:#}", cmd.op);
            publish_cmd_ack(client, topic, false, src_json, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=foxtron_dali=debug).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let mut gateway_config = build_gateway_config(&config.gateway)?;
    let mut mqtt_client_id = config.mqtt.client_id;
    let mut publish_topic = config.mqtt.publish_topic;
    let mut subscribe_topic = config.mqtt.subscribe_topic;
    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        // Gateway session; reconnects by itself from here on
        let driver = Arc::new(
            DaliDriver::new(gateway_config.clone()).context("Failed to create DALI driver")?,
        );
        driver.connect().await;

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&mqtt_client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        client
            .subscribe(&subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to MQTT topic")?;
        info!("MQTT: subscribed to {subscribe_topic}");

        // Task 1: DALI event listener
        let driver_events = Arc::clone(&driver);
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let event_handle = tokio::spawn(async move {
            while let Some(event) = driver_events.get_event().await {
                handle_dali_event(event, &client_events, &topic_events).await;
            }
            info!("Event queue closed");
        });

        // Task 2: gateway connection state
        let mut state_rx = driver.subscribe_state();
        let client_state = client.clone();
        let topic_state = publish_topic.clone();
        let state_handle = tokio::spawn(async move {
            let mut was_open = false;
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                let is_open = state == ConnectionState::Open;
                if is_open != was_open {
                    let op = if is_open { "GATEWAY_CONNECTED" } else { "GATEWAY_DISCONNECTED" };
                    info!("Gateway {}", state.as_str());
                    publish_simple_event(&client_state, &topic_state, op).await;
                    was_open = is_open;
                }
            }
        });

        // Task 3: MQTT event loop (receives messages, dispatches commands)
        let driver_cmds = Arc::clone(&driver);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let sub_topic = subscribe_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    info!("MQTT command received: {payload}");
                                    // Scans take tens of seconds; keep polling meanwhile
                                    let driver = Arc::clone(&driver_cmds);
                                    let client = client_cmds.clone();
                                    let topic = topic_cmds.clone();
                                    tokio::spawn(async move {
                                        handle_command(&payload, cmd, &client, &topic, &driver).await;
                                    });
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        event_handle.abort();
        state_handle.abort();
        mqtt_handle.abort();
        driver.disconnect().await;
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match build_gateway_config(&new_config.gateway) {
                Ok(new_gateway_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                    Ok((new_host, new_port)) => {
                        gateway_config = new_gateway_config;
                        mqtt_host = new_host;
                        mqtt_port = new_port;
                        mqtt_client_id = new_config.mqtt.client_id;
                        publish_topic = new_config.mqtt.publish_topic;
                        subscribe_topic = new_config.mqtt.subscribe_topic;
                        info!("Config reloaded successfully");
                    }
                    Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
                },
                Err(e) => warn!("Invalid gateway config in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
