//! rstomp - STOMP server binary
//!
//! Accepts STOMP-speaking clients, parses their frames and logs them.
//! Broker semantics (routing, queues, delivery) are out of scope; this
//! binary demonstrates the transport, registry and reaper layers driving
//! the protocol parser.

use bytes::Bytes;
use rstomp_protocol::{Parser, ProtocolVersion};
use rstomp_server::{tls, Config, ConnectionHandler, MessageTemplates, Server, ServerConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Parses every connection's byte stream and logs complete frames.
struct FrameLogger {
    version: ProtocolVersion,
    messages: MessageTemplates,
    parsers: Mutex<HashMap<u64, Parser>>,
}

impl FrameLogger {
    fn new(version: ProtocolVersion, messages: MessageTemplates) -> Self {
        Self {
            version,
            messages,
            parsers: Mutex::new(HashMap::new()),
        }
    }
}

impl ConnectionHandler for FrameLogger {
    fn on_connected(&self, id: u64, remote_addr: SocketAddr) {
        self.parsers
            .lock()
            .unwrap()
            .insert(id, Parser::new(self.version));
        tracing::info!(
            "{}",
            self.messages
                .render("client_connected", &[&id, &remote_addr])
        );
    }

    fn on_data(&self, id: u64, data: Bytes) {
        let mut parsers = self.parsers.lock().unwrap();
        let Some(parser) = parsers.get_mut(&id) else {
            return;
        };
        parser.extend(&data);

        let mut poisoned = false;
        loop {
            match parser.next_frame() {
                Ok(Some(frame)) => {
                    if frame.is_heartbeat() {
                        tracing::debug!("[conn {}] heartbeat", id);
                    } else {
                        tracing::info!("[conn {}] frame:\n{}", id, frame.to_display_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("[conn {}] unparseable stream: {}", id, e);
                    poisoned = true;
                    break;
                }
            }
        }
        if poisoned {
            parsers.remove(&id);
        }
    }

    fn on_disconnected(&self, id: u64) {
        self.parsers.lock().unwrap().remove(&id);
        tracing::info!("{}", self.messages.render("client_disconnected", &[&id]));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // load configuration (from file if RSTOMP_CONFIG is set, then env
    // overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("RSTOMP_CONFIG") {
                tracing::info!("loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("RSTOMP_CONFIG").is_ok() {
                tracing::error!("failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("using default configuration");
            Config::default()
        }
    };

    tracing::info!("starting rstomp server");
    tracing::info!("  bind address: {}", config.network.bind_addr);
    tracing::info!("  protocol level: {}", config.network.protocol_version());
    tracing::info!("  max connections: {}", config.network.max_connections);

    if let Err(e) = config.tls.validate() {
        tracing::error!("TLS configuration error: {}", e);
        return Err(e.into());
    }

    let tls_acceptor = if config.tls.enabled {
        let acceptor = tls::create_tls_acceptor(&config.tls)?;
        tracing::info!("  TLS: enabled");
        if config.tls.require_client_cert {
            tracing::info!("  mTLS: enabled (client certificate required)");
        }
        Some(acceptor)
    } else {
        tracing::info!("  TLS: disabled");
        None
    };

    let mut server_config = ServerConfig::new(config.network.bind_addr)
        .with_max_connections(config.network.max_connections)
        .with_client_timeout(config.network.client_timeout());
    if let Some(acceptor) = tls_acceptor {
        server_config = server_config.with_tls(acceptor);
    }

    let handler = Arc::new(FrameLogger::new(
        config.network.protocol_version(),
        config.messages.clone(),
    ));
    let server = Arc::new(Server::new(server_config, handler));

    // shutdown on ctrl-c
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal, stopping server");
        shutdown_server.shutdown();
    });

    server.run().await?;
    Ok(())
}
