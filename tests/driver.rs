// Integration tests: the full driver against an in-process fake gateway.
//
// The fake gateway is a plain TcpListener; each test drives the gateway side
// by hand, reading the frames the driver sends and writing answers back.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};

use foxtron_dali::frame::{build_frame, parse_frame_content};
use foxtron_dali::transport::connection::extract_frames;
use foxtron_dali::{
    AddressType, ConnectionState, DaliDriver, DaliError, DaliEvent, GatewayConfig, InputEventCode,
};

const WAIT: Duration = Duration::from_secs(5);

/// Gateway end of one TCP session.
struct Peer {
    stream: TcpStream,
    buffer: Vec<u8>,
    frames: VecDeque<Vec<u8>>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("driver did not connect")
            .unwrap();
        Self {
            stream,
            buffer: Vec::new(),
            frames: VecDeque::new(),
        }
    }

    /// Next payload sent by the driver, checksum verified and removed.
    async fn recv(&mut self) -> Vec<u8> {
        loop {
            if let Some(content) = self.frames.pop_front() {
                return parse_frame_content(&content).expect("driver sent a bad frame");
            }
            let mut chunk = [0u8; 256];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "driver closed the connection");
            self.buffer.extend_from_slice(&chunk[..n]);
            self.frames.extend(extract_frames(&mut self.buffer));
        }
    }

    async fn recv_within(&mut self, limit: Duration) -> Option<Vec<u8>> {
        timeout(limit, self.recv()).await.ok()
    }

    async fn send(&mut self, payload: &[u8]) {
        self.send_raw(&build_frame(payload)).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }
}

async fn gateway() -> (TcpListener, GatewayConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, test_config(port))
}

fn test_config(port: u16) -> GatewayConfig {
    GatewayConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .keep_alive_interval(Duration::from_secs(60))
        .initial_reconnect_delay(Duration::from_millis(50))
        .max_reconnect_delay(Duration::from_millis(200))
        .query_timeout(Duration::from_millis(300))
        .config_query_timeout(Duration::from_millis(500))
        .scan_delay(Duration::from_millis(1))
        .fade_settle_delay(Duration::from_millis(10))
        .build()
}

/// Connect `driver` and return the gateway side of the session.
async fn connect(driver: &DaliDriver, listener: &TcpListener) -> Peer {
    driver.connect().await;
    let peer = Peer::accept(listener).await;
    wait_state(driver, ConnectionState::Open).await;
    peer
}

async fn wait_state(driver: &DaliDriver, want: ConnectionState) {
    let mut state = driver.subscribe_state();
    timeout(WAIT, state.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("state never became {}", want.as_str()))
        .unwrap();
}

async fn next_event(driver: &DaliDriver) -> DaliEvent {
    timeout(WAIT, driver.get_event())
        .await
        .expect("no event")
        .expect("event queue closed")
}

#[tokio::test]
async fn test_commands_on_the_wire() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;
    assert!(driver.is_connected());

    driver.broadcast_on().await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0xFF, 0x05, 0x00]);

    driver.broadcast_off().await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0xFF, 0x00, 0x00]);

    // Direct arc power: address byte is short address * 2
    driver.set_device_level(3, 128).await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0x06, 0x80, 0x00]);

    driver.send_command(0x0B, 0x2C, true).await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0x0B, 0x2C, 0x01]);
}

#[tokio::test]
async fn test_fade_time_sequence() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    driver.set_fade_time(4).await.unwrap();
    // DTR0 = 4, then broadcast SET FADE TIME sent twice
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0xA3, 0x04, 0x00]);
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0xFF, 0x2E, 0x01]);
}

#[tokio::test]
async fn test_rejected_parameters_send_nothing() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    assert!(matches!(
        driver.set_device_level(64, 0).await,
        Err(DaliError::InvalidShortAddress { .. })
    ));
    assert!(matches!(
        driver.set_device_level(0, 255).await,
        Err(DaliError::InvalidLevel { .. })
    ));
    assert!(matches!(
        driver.set_fade_time(16).await,
        Err(DaliError::InvalidFadeCode { .. })
    ));
    assert_eq!(peer.recv_within(Duration::from_millis(100)).await, None);

    driver.set_device_level(63, 254).await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0x7E, 0xFE, 0x00]);
    driver.set_device_level(0, 0).await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0x00, 0x00, 0x00]);
}

#[tokio::test]
async fn test_query_answered() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (level, _) = tokio::join!(driver.query_actual_level(5), async {
        // Query address byte is short address * 2 + 1
        assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0x0B, 0xA0, 0x00]);
        peer.send(&[0x0D, 0x10, 0x08, 0x0B, 0xA0, 0xFE]).await;
    });
    assert_eq!(level.unwrap(), Some(0xFE));
}

#[tokio::test]
async fn test_query_answered_without_echo() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (answer, _) = tokio::join!(driver.send_query(0x03, 0x90), async {
        peer.recv().await;
        peer.send(&[0x0D, 0x00, 0x08, 0xFF]).await;
    });
    assert_eq!(answer.unwrap(), Some(0xFF));
}

#[tokio::test]
async fn test_query_timeout_is_no_answer() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (answer, _) = tokio::join!(driver.send_query(0x01, 0x90), peer.recv());
    assert_eq!(answer.unwrap(), None);

    // The timed-out entry is gone, so the same query can be sent again
    let (answer, payload) = tokio::join!(driver.send_query(0x01, 0x90), peer.recv());
    assert_eq!(answer.unwrap(), None);
    assert_eq!(payload, vec![0x0B, 0x00, 0x10, 0x01, 0x90, 0x00]);
}

#[tokio::test]
async fn test_duplicate_query_not_sent() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (first, second, _) = tokio::join!(
        driver.send_query_with_timeout(0x01, 0x90, Duration::from_secs(2)),
        async {
            sleep(Duration::from_millis(50)).await;
            driver.send_query(0x01, 0x90).await
        },
        async {
            peer.recv().await;
            // Only one frame goes out
            assert_eq!(peer.recv_within(Duration::from_millis(200)).await, None);
            peer.send(&[0x0D, 0x10, 0x08, 0x01, 0x90, 0xFF]).await;
        }
    );

    assert_eq!(first.unwrap(), Some(0xFF));
    assert!(matches!(second, Err(DaliError::AlreadyInProgress { .. })));
}

#[tokio::test]
async fn test_concurrent_queries_matched_by_echo() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (a, b, _) = tokio::join!(
        driver.send_query_with_timeout(0x01, 0xA0, Duration::from_secs(2)),
        driver.send_query_with_timeout(0x03, 0xA0, Duration::from_secs(2)),
        async {
            peer.recv().await;
            peer.recv().await;
            // Answer in reverse order
            peer.send(&[0x0D, 0x10, 0x08, 0x03, 0xA0, 0x33]).await;
            peer.send(&[0x0D, 0x10, 0x08, 0x01, 0xA0, 0x11]).await;
        }
    );

    assert_eq!(a.unwrap(), Some(0x11));
    assert_eq!(b.unwrap(), Some(0x33));
}

#[tokio::test]
async fn test_firmware_version() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (version, _) = tokio::join!(driver.query_firmware_version(), async {
        assert_eq!(peer.recv().await, vec![0x06, 0x02]);
        peer.send(&[0x07, 0x02, 0x04, 0x06]).await;
    });
    assert_eq!(version.unwrap().as_deref(), Some("4.6"));

    // The config response is also delivered as an event
    assert_eq!(
        next_event(&driver).await,
        DaliEvent::ConfigResponse {
            item_number: 2,
            value: 0x0406
        }
    );
}

#[tokio::test]
async fn test_config_query_shared() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (a, b, _) = tokio::join!(
        driver.query_config_item(7),
        async {
            sleep(Duration::from_millis(50)).await;
            driver.query_config_item(7).await
        },
        async {
            assert_eq!(peer.recv().await, vec![0x06, 0x07]);
            sleep(Duration::from_millis(100)).await;
            peer.send(&[0x07, 0x07, 0x00, 0x2A]).await;
            // The second caller did not send its own query
            assert_eq!(peer.recv_within(Duration::from_millis(100)).await, None);
        }
    );

    assert_eq!(a.unwrap(), Some(42));
    assert_eq!(b.unwrap(), Some(42));
}

#[tokio::test]
async fn test_events_and_button_discovery() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    peer.send(&[0x04, 0x18, 0x0A, 0x04, 0x00]).await;
    peer.send(&[0x05, 0x01]).await;
    peer.send(&[0x0E, 0x00]).await;
    peer.send(&[0x04, 0x10, 0xFF, 0x05]).await;

    assert_eq!(
        next_event(&driver).await,
        DaliEvent::InputNotification {
            address_type: AddressType::Short,
            address: Some(5),
            instance_number: 4,
            event_code: InputEventCode::ButtonPressed,
        }
    );
    assert!(matches!(
        next_event(&driver).await,
        DaliEvent::SpecialGateway { event_code: 1, .. }
    ));
    // The confirmation produced no event
    assert_eq!(
        next_event(&driver).await,
        DaliEvent::Command {
            address_byte: 0xFF,
            opcode_byte: 0x05
        }
    );

    assert_eq!(driver.get_newly_discovered_buttons(), vec![5]);
    driver.add_known_button(5);
    assert!(driver.get_newly_discovered_buttons().is_empty());
    assert_eq!(driver.known_buttons(), vec![5]);
}

#[tokio::test]
async fn test_split_and_corrupt_input() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let first = build_frame(&[0x04, 0x10, 0x01, 0x02]);
    let second = build_frame(&[0x05, 0x00]);
    let mut bad = build_frame(&[0x05, 0x03]);
    let last = bad.len() - 2;
    bad[last] = b'0';

    // Tail of a lost frame, a bad checksum, then two good frames split mid-way
    let mut bytes = b"3E8\x17".to_vec();
    bytes.extend_from_slice(&bad);
    bytes.extend_from_slice(&first);
    bytes.extend_from_slice(&second[..4]);
    peer.send_raw(&bytes).await;
    sleep(Duration::from_millis(20)).await;
    peer.send_raw(&second[4..]).await;

    assert_eq!(
        next_event(&driver).await,
        DaliEvent::Command {
            address_byte: 0x01,
            opcode_byte: 0x02
        }
    );
    assert!(matches!(
        next_event(&driver).await,
        DaliEvent::SpecialGateway { event_code: 0, .. }
    ));
    assert!(driver.is_connected());
}

#[tokio::test]
async fn test_disconnect_aborts_queries() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let started = Instant::now();
    let (answer, _) = tokio::join!(
        driver.send_query_with_timeout(0x0B, 0xA0, Duration::from_secs(10)),
        async {
            peer.recv().await;
            driver.disconnect().await;
        }
    );

    assert_eq!(answer.unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!driver.is_connected());
    assert!(matches!(driver.broadcast_on().await, Err(DaliError::NotConnected)));

    // No reconnect after an explicit disconnect
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());
}

#[tokio::test]
async fn test_reconnect_after_peer_close() {
    let (listener, config) = gateway().await;
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let started = Instant::now();
    let (answer, _) = tokio::join!(
        driver.send_query_with_timeout(0x0B, 0xA0, Duration::from_secs(10)),
        async {
            peer.recv().await;
            drop(peer);
        }
    );
    // Aborted by the connection loss, not timed out
    assert_eq!(answer.unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(5));

    let mut peer = Peer::accept(&listener).await;
    wait_state(&driver, ConnectionState::Open).await;

    driver.broadcast_off().await.unwrap();
    assert_eq!(peer.recv().await, vec![0x0B, 0x00, 0x10, 0xFF, 0x00, 0x00]);
    driver.disconnect().await;
}

#[tokio::test]
async fn test_connect_failure_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let driver = DaliDriver::new(test_config(port)).unwrap();
    driver.connect().await;
    assert!(!driver.is_connected());

    // Gateway comes up later; the driver finds it on its own
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let _peer = Peer::accept(&listener).await;
    wait_state(&driver, ConnectionState::Open).await;
    driver.disconnect().await;
}

#[tokio::test]
async fn test_keep_alive() {
    let (listener, _) = gateway().await;
    let port = listener.local_addr().unwrap().port();
    let config = GatewayConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .keep_alive_interval(Duration::from_millis(100))
        .build();
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    assert_eq!(peer.recv().await, vec![0x06, 0x02]);
    assert_eq!(peer.recv().await, vec![0x06, 0x02]);
    driver.disconnect().await;
}

#[tokio::test]
async fn test_scan_for_devices() {
    let (listener, config) = gateway().await;
    let config = GatewayConfig {
        query_timeout: Duration::from_millis(50),
        ..config
    };
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    let (found, _) = tokio::join!(driver.scan_for_devices(), async {
        for address in 0u8..64 {
            let payload = peer.recv().await;
            assert_eq!(payload, vec![0x0B, 0x00, 0x10, address * 2 + 1, 0x90, 0x00]);
            if address == 2 || address == 40 {
                peer.send(&[0x0D, 0x10, 0x08, address * 2 + 1, 0x90, 0xFF]).await;
            }
        }
    });
    assert_eq!(found.unwrap(), vec![2, 40]);
}

#[tokio::test]
async fn test_scan_for_input_devices() {
    let (listener, config) = gateway().await;
    let config = GatewayConfig {
        query_timeout: Duration::from_millis(30),
        known_buttons: vec![9],
        ..config
    };
    let driver = DaliDriver::new(config).unwrap();
    let mut peer = connect(&driver, &listener).await;

    // Light at 2, input devices at 7 and 9
    let (found, queried) = tokio::join!(driver.scan_for_input_devices(), async {
        let mut queried = Vec::new();
        // 64 presence queries plus a device type query for each non-gear address
        for _ in 0..64 + 63 {
            let payload = peer.recv().await;
            let (address_byte, op) = (payload[3], payload[4]);
            let address = address_byte >> 1;
            queried.push((address, op));
            let answer = match (address, op) {
                (2, 0x90) => Some(0xFF),
                (7 | 9, 0x99) => Some(0x01),
                _ => None,
            };
            if let Some(value) = answer {
                peer.send(&[0x0D, 0x10, 0x08, address_byte, op, value]).await;
            }
        }
        queried
    });

    assert_eq!(found.unwrap(), vec![7, 9]);
    assert!(queried.contains(&(2, 0x90)));
    assert!(!queried.contains(&(2, 0x99)));
    assert!(queried.contains(&(7, 0x99)));
    assert_eq!(peer.recv_within(Duration::from_millis(100)).await, None);

    // 9 was already known
    assert_eq!(driver.get_newly_discovered_buttons(), vec![7]);
    assert_eq!(driver.known_buttons(), vec![9]);
}
