// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::constants::{CONFIG_ITEM_FIRMWARE_VERSION, ETB, SOH};
use crate::error::{DaliError, Result};
use crate::protocol::Request;
use crate::transport::lock;

/// Bytes held while waiting for an ETB before the buffer is considered junk.
const MAX_BUFFERED_BYTES: usize = 4096;

/// Lifecycle of the TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

/// Receives what the connection reads off the wire.
///
/// Both callbacks run on connection tasks and must not block.
pub trait SessionHandler: Send + Sync + 'static {
    /// Content of one SOH…ETB frame, delimiters removed. Frames are
    /// delivered one at a time, in wire order.
    fn on_frame(&self, content: &[u8]);

    /// The session failed and has been torn down.
    fn on_connection_lost(&self);
}

/// Exponential reconnect delay: doubles after each failed attempt up to
/// `max`, back to `initial` after a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

struct SessionTasks {
    id: u64,
    reader: JoinHandle<()>,
    keep_alive: JoinHandle<()>,
}

struct Inner {
    address: String,
    keep_alive_interval: Duration,
    write_timeout: Duration,
    read_chunk_size: usize,
    keep_alive_frame: Vec<u8>,
    state: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    session: Mutex<Option<SessionTasks>>,
    next_session: AtomicU64,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect, disconnect and failure recovery
    lifecycle: tokio::sync::Mutex<()>,
    backoff: Mutex<Backoff>,
    auto_reconnect: AtomicBool,
    handler: Arc<dyn SessionHandler>,
}

/// A self-healing TCP session to the gateway.
///
/// After `connect()` the connection keeps itself open: any read, write or
/// keep-alive failure tears the session down, notifies the handler, and
/// retries with exponential backoff until `disconnect()` is called.
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(config: &GatewayConfig, handler: Arc<dyn SessionHandler>) -> Result<Self> {
        let keep_alive_frame = Request::QueryConfigItem {
            item: CONFIG_ITEM_FIRMWARE_VERSION,
        }
        .to_frame()?;
        let (state, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                address: config.address(),
                keep_alive_interval: config.keep_alive_interval,
                write_timeout: config.write_timeout,
                read_chunk_size: config.read_chunk_size.max(1),
                keep_alive_frame,
                state,
                writer: tokio::sync::Mutex::new(None),
                session: Mutex::new(None),
                next_session: AtomicU64::new(0),
                reconnect: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                backoff: Mutex::new(Backoff::new(
                    config.initial_reconnect_delay,
                    config.max_reconnect_delay,
                )),
                auto_reconnect: AtomicBool::new(false),
                handler,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Open the session. A no-op when already open.
    ///
    /// Connection errors are not returned; they start the reconnect cycle.
    pub async fn connect(&self) {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;
        if inner.current_state() == ConnectionState::Open {
            return;
        }

        inner.auto_reconnect.store(true, Ordering::SeqCst);
        inner.cancel_reconnect();

        if let Err(e) = inner.open_session().await {
            error!("Failed to connect to {}: {}", inner.address, e);
            inner.schedule_reconnect();
        }
    }

    /// Close the session and stop reconnecting.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.auto_reconnect.store(false, Ordering::SeqCst);
        inner.cancel_reconnect();

        let _guard = inner.lifecycle.lock().await;
        if inner.current_state() == ConnectionState::Idle && inner.current_session().is_none() {
            return;
        }
        info!("Disconnecting from gateway");
        inner.close_session().await;
    }

    /// Write a complete frame to the gateway.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        self.inner.send_frame(frame).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        self.inner.cancel_reconnect();
        if let Some(tasks) = lock(&self.inner.session).take() {
            tasks.reader.abort();
            tasks.keep_alive.abort();
        }
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn current_session(&self) -> Option<u64> {
        lock(&self.session).as_ref().map(|t| t.id)
    }

    fn cancel_reconnect(&self) {
        if let Some(handle) = lock(&self.reconnect).take() {
            handle.abort();
        }
    }

    async fn open_session(self: &Arc<Self>) -> Result<()> {
        self.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to Foxtron gateway at {}", self.address);

        let stream = match TcpStream::connect(&self.address).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state.send_replace(ConnectionState::Idle);
                return Err(DaliError::Io(e));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        // No await between here and the state change
        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.backoff).reset();
        let reader = tokio::spawn(Arc::clone(self).read_loop(reader, id));
        let keep_alive = tokio::spawn(Arc::clone(self).keep_alive_loop(id));
        *lock(&self.session) = Some(SessionTasks {
            id,
            reader,
            keep_alive,
        });
        self.state.send_replace(ConnectionState::Open);

        info!("Connection established");
        Ok(())
    }

    async fn close_session(&self) {
        let tasks = lock(&self.session).take();
        if let Some(tasks) = tasks {
            tasks.reader.abort();
            tasks.keep_alive.abort();
            // Cancellation is the expected outcome
            let _ = tasks.reader.await;
            let _ = tasks.keep_alive.await;
        }

        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(e) = writer.shutdown().await
        {
            debug!("Ignoring error while closing socket: {}", e);
        }

        self.state.send_replace(ConnectionState::Idle);
    }

    async fn send_frame(self: &Arc<Self>, frame: &[u8]) -> Result<()> {
        if self.current_state() != ConnectionState::Open {
            return Err(DaliError::NotConnected);
        }

        let result = {
            let mut writer = self.writer.lock().await;
            let Some(w) = writer.as_mut() else {
                return Err(DaliError::NotConnected);
            };
            debug!("Sending frame: {}", String::from_utf8_lossy(frame).trim_matches(|c| c == '\x01' || c == '\x17'));
            let write = async {
                w.write_all(frame).await?;
                w.flush().await
            };
            // A gateway that stops reading must not block the writer forever
            match timeout(self.write_timeout, write).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write to gateway timed out")),
            }
        };

        if let Err(e) = result {
            error!("Write to gateway failed: {}", e);
            if let Some(id) = self.current_session() {
                self.trigger_failure(id);
            }
            return Err(DaliError::Io(e));
        }
        Ok(())
    }

    /// Start failure recovery for session `id` without waiting for it.
    fn trigger_failure(self: &Arc<Self>, id: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.recover(id).await });
    }

    async fn recover(self: Arc<Self>, id: u64) {
        let _guard = self.lifecycle.lock().await;
        // Already handled, or the session was replaced meanwhile
        if self.current_state() != ConnectionState::Open || self.current_session() != Some(id) {
            return;
        }

        warn!("Connection to gateway lost");
        self.state.send_replace(ConnectionState::Closing);
        self.close_session().await;
        self.handler.on_connection_lost();

        if self.auto_reconnect.load(Ordering::SeqCst) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let handle = tokio::spawn(Arc::clone(self).reconnect_loop());
        // Any previous handle has finished or is the caller itself
        *lock(&self.reconnect) = Some(handle);
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            let delay = lock(&self.backoff).next_delay();
            info!("Will attempt to reconnect in {:?}", delay);
            sleep(delay).await;

            let _guard = self.lifecycle.lock().await;
            if !self.auto_reconnect.load(Ordering::SeqCst)
                || self.current_state() == ConnectionState::Open
            {
                return;
            }
            match self.open_session().await {
                Ok(()) => return,
                Err(e) => warn!("Reconnect to {} failed: {}", self.address, e),
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, id: u64) {
        let mut chunk = vec![0u8; self.read_chunk_size];
        let mut buffer = Vec::new();

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    warn!("Connection closed by gateway");
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    for content in extract_frames(&mut buffer) {
                        self.handler.on_frame(&content);
                    }
                }
                Err(e) => {
                    error!("Read loop error: {}", e);
                    break;
                }
            }
        }

        debug!("Read loop terminated");
        self.trigger_failure(id);
    }

    async fn keep_alive_loop(self: Arc<Self>, id: u64) {
        loop {
            sleep(self.keep_alive_interval).await;
            debug!("Sending keep-alive frame");
            if let Err(e) = self.send_frame(&self.keep_alive_frame).await {
                error!("Keep-alive failed: {}", e);
                self.trigger_failure(id);
                break;
            }
        }
    }
}

/// Remove every complete SOH…ETB frame from `buffer` and return their
/// contents. Incomplete trailing data stays in the buffer.
///
/// Bytes that cannot belong to a frame (anything before the last SOH
/// preceding an ETB, or an ETB with no SOH before it) are discarded.
pub fn extract_frames(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();

    while let Some(etb) = buffer.iter().position(|&b| b == ETB) {
        match buffer[..etb].iter().rposition(|&b| b == SOH) {
            Some(soh) => {
                if soh > 0 {
                    warn!("Discarding corrupted buffer part: {}", hex::encode_upper(&buffer[..soh]));
                }
                frames.push(buffer[soh + 1..etb].to_vec());
            }
            None => {
                warn!("Discarding corrupted buffer part: {}", hex::encode_upper(&buffer[..=etb]));
            }
        }
        buffer.drain(..=etb);
    }

    if buffer.len() > MAX_BUFFERED_BYTES {
        let start = buffer.iter().rposition(|&b| b == SOH).unwrap_or(buffer.len());
        warn!("Discarding {} buffered bytes without frame end", start);
        buffer.drain(..start);
        if buffer.len() > MAX_BUFFERED_BYTES {
            buffer.clear();
        }
    }

    frames
}
