//! # rstomp-protocol
//!
//! STOMP wire protocol implementation (versions 1.0, 1.1 and 1.2).
//!
//! This crate provides:
//! - Text framing per the STOMP grammar, with version-dependent line
//!   terminators and header escaping
//! - An incremental, resumable parser for byte streams
//! - A version-aware frame builder enforcing per-level required headers
//! - Protocol error types

pub mod builder;
pub mod error;
pub mod frame;
pub mod parser;
pub mod version;

pub use builder::StompBuilder;
pub use error::ProtocolError;
pub use frame::Frame;
pub use parser::Parser;
pub use version::ProtocolVersion;

/// Default port for STOMP brokers.
pub const DEFAULT_PORT: u16 = 61613;

/// Maximum number of bytes the parser will accumulate for a single frame
/// (16 MiB). A stream that exceeds this without completing a frame is
/// rejected instead of growing the buffer without bound.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
