//! # rstomp-client
//!
//! STOMP client library.
//!
//! This crate provides:
//! - An event-driven async TCP transport with connect timeout, TCP
//!   keepalive and optional TLS
//! - Automatic reconnection on a fixed backoff schedule
//! - A STOMP session layer: handshake on connect, ordered frame dispatch
//!   to observer callbacks, graceful disconnect

pub mod backoff;
pub mod client;
pub mod error;
pub mod session;
pub mod stream;
pub mod tls;

pub use backoff::ReconnectPolicy;
pub use client::{ClientConfig, ClientState, KeepaliveConfig, TcpClient, TcpEvent, TlsClientConfig};
pub use error::ClientError;
pub use session::{SessionConfig, StompObserver, StompSession};
