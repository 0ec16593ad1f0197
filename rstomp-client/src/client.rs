//! Event-driven TCP transport.
//!
//! One [`TcpClient`] owns one logical connection. Received bytes, connect
//! and disconnect transitions, and transport faults are delivered as
//! [`TcpEvent`]s over a channel consumed by a single owner (usually the
//! session layer). Mid-stream I/O faults are never returned as errors:
//! they become a `Disconnected` event, and the owner recovers with
//! [`TcpClient::reconnect`].

use crate::backoff::ReconnectPolicy;
use crate::error::ClientError;
use crate::stream::TransportStream;
use crate::tls::{create_tls_connector, create_unverified_tls_connector};
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Capacity of the transport event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// TLS configuration for client connections.
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Verify the server certificate. Turning this off accepts any peer
    /// (development only).
    pub verify_peer: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the webpki system roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the configured host).
    pub server_name: Option<String>,
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify_peer: true,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            server_name: None,
        }
    }
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn without_peer_verification(mut self) -> Self {
        self.verify_peer = false;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// OS-level TCP keepalive parameters.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Interval between probes.
    pub interval: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            time: Duration::from_secs(60),
            interval: Duration::from_secs(10),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// TCP keepalive, when enabled.
    pub keepalive: Option<KeepaliveConfig>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            keepalive: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tls: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Events emitted by the transport, consumed via [`TcpClient::events`].
#[derive(Debug)]
pub enum TcpEvent {
    /// The connection (and TLS handshake, if any) completed.
    Connected,
    /// The connection was lost or closed.
    Disconnected,
    /// Bytes arrived from the peer.
    Data(Bytes),
    /// A write completed.
    Sent(usize),
    /// A transport fault. Always followed by `Disconnected` when the
    /// fault killed an established connection.
    Error(ClientError),
}

struct Shared {
    config: ClientConfig,
    state: StdMutex<ClientState>,
    writer: Mutex<Option<WriteHalf<TransportStream>>>,
    events: mpsc::Sender<TcpEvent>,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

/// An event-driven socket client. Not designed for concurrent use by
/// multiple callers: one logical connection, one owning session.
pub struct TcpClient {
    shared: Arc<Shared>,
    events_rx: StdMutex<Option<mpsc::Receiver<TcpEvent>>>,
}

impl TcpClient {
    pub fn new(config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                config,
                state: StdMutex::new(ClientState::Idle),
                writer: Mutex::new(None),
                events: events_tx,
                shutdown: shutdown_tx,
                stopping: AtomicBool::new(false),
                read_task: StdMutex::new(None),
            }),
            events_rx: StdMutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Single consumer; returns None after the
    /// first call.
    pub fn events(&self) -> Option<mpsc::Receiver<TcpEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Subscribes to the shared cancellation signal raised by
    /// [`TcpClient::shutdown`].
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shared.shutdown.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Opens the connection: timeout-bounded TCP connect, socket options,
    /// optional TLS handshake, then spawns the read loop and emits
    /// `Connected`. Ordinary connect failures come back as `Err`; the
    /// session layer forwards them to its error observer.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(ClientError::Stopped);
        }
        self.shared.set_state(ClientState::Connecting);
        match self.shared.clone().establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.set_state(ClientState::Disconnected);
                tracing::debug!(addr = %self.shared.config.addr(), "connect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Writes bytes to the peer. Silently no-ops when not connected or
    /// after shutdown; a write fault is translated into a `Disconnected`
    /// event rather than an error.
    pub async fn send(&self, bytes: &[u8]) {
        if self.shared.stopping.load(Ordering::SeqCst) || !self.is_connected() {
            return;
        }
        let mut guard = self.shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };
        match writer.write_all(bytes).await {
            Ok(()) => {
                drop(guard);
                let _ = self.shared.events.send(TcpEvent::Sent(bytes.len())).await;
            }
            Err(e) => {
                drop(guard);
                tracing::debug!(addr = %self.shared.config.addr(), "write failed: {}", e);
                self.shared.transport_lost(Some(e)).await;
            }
        }
    }

    /// Retries [`TcpClient::connect`] on the fixed backoff schedule until
    /// it succeeds or the cancellation signal fires. Past the end of the
    /// schedule the last delay repeats.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let mut policy = ReconnectPolicy::new();
        let mut shutdown = self.shared.shutdown.subscribe();
        loop {
            if self.shared.stopping.load(Ordering::SeqCst) {
                return Err(ClientError::Stopped);
            }
            let delay = policy.next_delay();
            tracing::info!(
                host = %self.shared.config.host,
                attempt = policy.attempts(),
                "reconnecting in {}s",
                delay.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return Err(ClientError::Stopped),
            }
            match self.connect().await {
                Ok(()) => {
                    tracing::info!(host = %self.shared.config.host, "reconnected");
                    return Ok(());
                }
                Err(ClientError::Stopped) => return Err(ClientError::Stopped),
                Err(e) => {
                    tracing::warn!(host = %self.shared.config.host, "reconnect attempt failed: {}", e);
                }
            }
        }
    }

    /// Closes the stream and socket and clears the connected flag.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let was_connected = self.shared.transition_disconnected();
        let task = self.shared.read_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
        }
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if was_connected {
            let _ = self.shared.events.send(TcpEvent::Disconnected).await;
        }
    }

    /// Raises the shared cancellation signal and closes the connection.
    /// After this the client no longer connects or sends.
    pub async fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        let _ = self.shared.shutdown.send(());
        self.disconnect().await;
    }
}

impl Shared {
    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap() = state;
    }

    /// Marks the connection lost. Returns true when this call performed
    /// the transition, so `Disconnected` is emitted exactly once.
    fn transition_disconnected(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            ClientState::Connected | ClientState::Connecting => {
                *state = ClientState::Disconnected;
                true
            }
            _ => false,
        }
    }

    async fn establish(self: Arc<Self>) -> Result<(), ClientError> {
        let addr = self.config.addr();
        tracing::debug!(%addr, "connecting");

        let tcp = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Io)?;

        tcp.set_nodelay(true).ok();
        if let Some(ref keepalive) = self.config.keepalive {
            let params = TcpKeepalive::new()
                .with_time(keepalive.time)
                .with_interval(keepalive.interval);
            SockRef::from(&tcp)
                .set_tcp_keepalive(&params)
                .map_err(ClientError::Io)?;
        }

        let stream = match self.config.tls {
            Some(ref tls) if tls.enabled => {
                let (connector, server_name) = if tls.verify_peer {
                    create_tls_connector(tls, &self.config.host)?
                } else {
                    tracing::warn!("TLS peer verification disabled");
                    create_unverified_tls_connector(tls, &self.config.host)?
                };
                tracing::debug!(%addr, "performing TLS handshake");
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                TransportStream::Tls { stream: tls_stream }
            }
            _ => TransportStream::Plain { stream: tcp },
        };

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        self.set_state(ClientState::Connected);
        let _ = self.events.send(TcpEvent::Connected).await;
        self.clone().spawn_read_loop(read_half);

        tracing::debug!(%addr, "connected");
        Ok(())
    }

    /// One read loop per connection. The loop re-arms itself, keeping a
    /// single outstanding read at a time so `Data` events preserve wire
    /// order.
    fn spawn_read_loop(self: Arc<Self>, mut reader: ReadHalf<TransportStream>) {
        let shared = self.clone();
        let handle = tokio::spawn(async move {
            let mut shutdown = shared.shutdown.subscribe();
            let mut buf = vec![0u8; shared.config.read_buffer_size];
            loop {
                tokio::select! {
                    result = reader.read(&mut buf) => match result {
                        Ok(0) => {
                            tracing::debug!("connection closed by peer");
                            shared.transport_lost(None).await;
                            return;
                        }
                        Ok(n) => {
                            let data = Bytes::copy_from_slice(&buf[..n]);
                            if shared.events.send(TcpEvent::Data(data)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::debug!("read failed: {}", e);
                            shared.transport_lost(Some(e)).await;
                            return;
                        }
                    },
                    _ = shutdown.recv() => return,
                }
            }
        });
        let stale = self.read_task.lock().unwrap().replace(handle);
        if let Some(stale) = stale {
            stale.abort();
        }
    }

    async fn transport_lost(&self, error: Option<std::io::Error>) {
        if let Some(e) = error {
            let _ = self.events.send(TcpEvent::Error(ClientError::Io(e))).await;
        }
        if self.transition_disconnected() {
            let _ = self.events.send(TcpEvent::Disconnected).await;
        }
    }
}
