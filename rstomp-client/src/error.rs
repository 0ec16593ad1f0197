//! Client error types.

use thiserror::Error;

/// Client errors.
///
/// Transport faults seen mid-stream (reset, broken pipe, EOF) are not
/// surfaced through this type: the transport converts them into
/// disconnect events so callers recover uniformly via
/// [`TcpClient::reconnect`](crate::client::TcpClient::reconnect). These
/// variants cover connect-time failures and misuse.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rstomp_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect timeout")]
    Timeout,

    #[error("client stopped")]
    Stopped,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether reconnecting could clear this error. Protocol
    /// violations and TLS misconfiguration never retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::TlsHandshake(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Stopped.is_retryable());
        assert!(!ClientError::TlsConfig("x".into()).is_retryable());

        let violation = rstomp_protocol::ProtocolError::MissingDestinationOrId;
        assert!(!ClientError::Protocol(violation).is_retryable());
    }
}
