//! TCP server implementation.
//!
//! The accept loop admits connections while the registry is below the
//! configured ceiling, blocking otherwise until the reaper frees
//! capacity. Each accepted connection gets a registry entry and a
//! self-re-arming read task; received bytes go to the registered
//! [`ConnectionHandler`] keyed by connection id. Dead connections are
//! flagged by their read task and reclaimed by the periodic reaper, never
//! removed from the read path itself.

use crate::conn::{ConnectionInfo, Registry};
use crate::error::ServerError;
use crate::stream::ServerStream;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio_rustls::TlsAcceptor;

/// Interval between reaper sweeps.
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Default read buffer size per connection (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections (0 = unthrottled).
    pub max_connections: usize,
    /// Evict connections idle longer than this (zero = never).
    pub client_timeout: Duration,
    /// Interval between reaper sweeps.
    pub reap_interval: Duration,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("client_timeout", &self.client_timeout)
            .field("reap_interval", &self.reap_interval)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", rstomp_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            max_connections: 1000,
            client_timeout: Duration::from_secs(300),
            reap_interval: REAP_INTERVAL,
            tls_acceptor: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sets the TLS acceptor.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    /// Returns whether TLS is enabled.
    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }
}

/// Per-connection events, keyed by connection id. Callbacks run on the
/// connection's read task (or the caller of [`Server::send`]); keep them
/// short or hand work off.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A connection was accepted and registered.
    fn on_connected(&self, id: u64, remote_addr: SocketAddr) {
        let _ = (id, remote_addr);
    }

    /// Bytes arrived from a connection.
    fn on_data(&self, id: u64, data: Bytes);

    /// A write to a connection completed.
    fn on_sent(&self, id: u64, bytes: usize) {
        let _ = (id, bytes);
    }

    /// The connection was removed from the table (reaped or drained at
    /// shutdown).
    fn on_disconnected(&self, id: u64) {
        let _ = id;
    }

    /// A fault on one connection. Not fatal to the server.
    fn on_error(&self, id: u64, error: &ServerError) {
        tracing::warn!("connection {} error: {}", id, error);
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

/// TCP server driving many concurrent client connections.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn ConnectionHandler>,
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    capacity: Arc<Notify>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            registry: Arc::new(Registry::new()),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            capacity: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    /// Runs the server until [`Server::shutdown`] is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        self.running.store(true, Ordering::SeqCst);

        let tls_mode = if self.config.tls_enabled() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!(
            "listening on {} ({})",
            listener.local_addr()?,
            tls_mode
        );

        let idle_timeout = if self.config.client_timeout.is_zero() {
            None
        } else {
            Some(self.config.client_timeout)
        };
        let reaper = tokio::spawn(Self::reaper_loop(
            self.registry.clone(),
            self.handler.clone(),
            self.capacity.clone(),
            self.shutdown.subscribe(),
            self.config.reap_interval,
            idle_timeout,
        ));

        let mut shutdown_rx = self.shutdown.subscribe();

        'accept: loop {
            // admission throttle: hold the accept until the reaper frees
            // capacity
            while self.config.max_connections > 0
                && self.registry.len() >= self.config.max_connections
            {
                tokio::select! {
                    _ = self.capacity.notified() => {}
                    _ = shutdown_rx.recv() => break 'accept,
                }
            }

            tokio::select! {
                result = listener.accept() => match result {
                    Ok((tcp_stream, addr)) => self.spawn_connection(tcp_stream, addr),
                    Err(e) => tracing::error!("accept error: {}", e),
                },
                _ = shutdown_rx.recv() => break 'accept,
            }
        }

        tracing::info!("server shutting down");
        drop(listener);
        let _ = reaper.await;

        for entry in self.registry.drain() {
            let _ = entry.writer.lock().await.shutdown().await;
            self.handler.on_disconnected(entry.id);
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopped");
        Ok(())
    }

    /// Writes bytes to one connection. A write fault flags the connection
    /// for the reaper and surfaces as `Err`.
    pub async fn send(&self, id: u64, bytes: &[u8]) -> Result<(), ServerError> {
        let entry = self
            .registry
            .get(id)
            .ok_or(ServerError::UnknownConnection(id))?;

        let mut writer = entry.writer.lock().await;
        match writer.write_all(bytes).await {
            Ok(()) => {
                drop(writer);
                entry.touch();
                self.stats.bytes_out.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                self.handler.on_sent(id, bytes.len());
                Ok(())
            }
            Err(e) => {
                drop(writer);
                entry.mark_disconnected();
                Err(ServerError::Io(e))
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound address, once [`Server::run`] has started listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of tracked connections (including dead ones awaiting reap).
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of every tracked connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.infos()
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    fn spawn_connection(&self, tcp_stream: TcpStream, addr: SocketAddr) {
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);

        let tls_acceptor = self.config.tls_acceptor.clone();
        let handler = self.handler.clone();
        let registry = self.registry.clone();
        let stats = self.stats.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let stream =
                match Self::maybe_tls_accept(tcp_stream, tls_acceptor.as_deref(), addr).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("[{}] TLS handshake failed: {}", addr, e);
                        return;
                    }
                };
            let tls_note = if stream.is_tls() { " (TLS)" } else { "" };

            let (mut reader, writer) = tokio::io::split(stream);
            let entry = registry.insert(addr, writer);
            tracing::info!("[{}] client {} connected{}", addr, entry.id, tls_note);
            handler.on_connected(entry.id, addr);

            // self-re-arming read loop; one outstanding read at a time
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    result = reader.read(&mut buf) => match result {
                        Ok(0) => {
                            tracing::debug!("[{}] connection closed by client", addr);
                            // left for the reaper, not removed here
                            entry.mark_disconnected();
                            return;
                        }
                        Ok(n) => {
                            entry.touch();
                            stats.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                            handler.on_data(entry.id, Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(e) => {
                            tracing::debug!("[{}] read error: {}", addr, e);
                            entry.mark_disconnected();
                            handler.on_error(entry.id, &ServerError::Io(e));
                            return;
                        }
                    },
                    _ = shutdown_rx.recv() => return,
                }
            }
        });
    }

    /// Optionally performs the TLS handshake on the accepted stream.
    async fn maybe_tls_accept(
        tcp_stream: TcpStream,
        acceptor: Option<&TlsAcceptor>,
        addr: SocketAddr,
    ) -> Result<ServerStream, ServerError> {
        match acceptor {
            Some(acceptor) => {
                tracing::debug!("[{}] performing TLS handshake", addr);
                let tls_stream = acceptor
                    .accept(tcp_stream)
                    .await
                    .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
                Ok(ServerStream::Tls { stream: tls_stream })
            }
            None => Ok(ServerStream::Plain { stream: tcp_stream }),
        }
    }

    /// Periodic sweep removing dead and idle connections, then releasing
    /// the throttle gate.
    async fn reaper_loop(
        registry: Arc<Registry>,
        handler: Arc<dyn ConnectionHandler>,
        capacity: Arc<Notify>,
        mut shutdown: broadcast::Receiver<()>,
        interval: Duration,
        idle_timeout: Option<Duration>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => return,
            }

            let evicted = registry.sweep(idle_timeout);
            if evicted.is_empty() {
                continue;
            }
            for entry in evicted {
                tracing::info!(
                    "[{}] client {} reaped (idle {}s)",
                    entry.remote_addr,
                    entry.id,
                    entry.idle().as_secs()
                );
                let _ = entry.writer.lock().await.shutdown().await;
                handler.on_disconnected(entry.id);
            }
            capacity.notify_one();
        }
    }
}
