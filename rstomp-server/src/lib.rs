//! # rstomp-server
//!
//! TCP server layer for STOMP-speaking applications.
//!
//! This crate provides:
//! - An accept loop with admission throttling against a connection ceiling
//! - Per-connection async reads delivered to a [`ConnectionHandler`]
//! - A single-lock connection registry with monotonic connection ids
//! - A periodic reaper evicting idle and dead connections
//! - Optional TLS termination and YAML/env configuration

pub mod config;
pub mod conn;
pub mod error;
pub mod server;
pub mod stream;
pub mod tls;

pub use config::{Config, ConfigError, MessageTemplates, NetworkConfig, TlsConfig};
pub use conn::ConnectionInfo;
pub use error::ServerError;
pub use server::{ConnectionHandler, Server, ServerConfig, ServerStats, REAP_INTERVAL};
