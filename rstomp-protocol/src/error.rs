//! Protocol error types.

use crate::version::ProtocolVersion;
use thiserror::Error;

/// Errors raised while building or parsing STOMP frames.
///
/// Builder errors (the violation variants) mean a caller omitted a header
/// the negotiated protocol level mandates; they are local programming or
/// configuration errors and are never retried. Parser errors mean the
/// stream can no longer be framed reliably and the connection should be
/// dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{command} requires the '{header}' header at STOMP {version}")]
    MissingHeader {
        command: &'static str,
        header: &'static str,
        version: ProtocolVersion,
    },

    #[error("{command} is not available at STOMP {version}")]
    UnsupportedCommand {
        command: &'static str,
        version: ProtocolVersion,
    },

    #[error("UNSUBSCRIBE requires a destination or a subscription id")]
    MissingDestinationOrId,

    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid content-length header: {0:?}")]
    InvalidContentLength(String),

    #[error("unsupported protocol version: {0:?}")]
    UnsupportedVersion(String),
}

impl ProtocolError {
    /// Returns whether this error is a protocol violation: a frame was
    /// requested that the negotiated level cannot express.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingHeader { .. }
                | ProtocolError::UnsupportedCommand { .. }
                | ProtocolError::MissingDestinationOrId
        )
    }
}
