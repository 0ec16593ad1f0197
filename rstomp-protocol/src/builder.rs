//! Version-aware STOMP frame construction.
//!
//! [`StompBuilder`] produces protocol-correct frames for every client
//! command, enforcing the headers each protocol level mandates. Options
//! follow the builder-struct convention: `Default` plus `with_*` methods.
//! A missing mandatory field surfaces as a [`ProtocolError`] at the call
//! site, never as a malformed frame on the wire.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::version::ProtocolVersion;
use bytes::Bytes;

/// Frame factory bound to one negotiated protocol level.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompBuilder {
    version: ProtocolVersion,
}

/// Options for the connection handshake frame.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub login: String,
    pub passcode: String,
    pub virtual_host: String,
    /// `cx,cy` heartbeat spec; empty means `0,0` (no heartbeats).
    pub heartbeat: String,
    /// Comma-separated versions for `accept-version`; empty means the
    /// builder's own version.
    pub accept_versions: String,
}

impl ConnectOptions {
    pub fn with_credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = login.into();
        self.passcode = passcode.into();
        self
    }

    pub fn with_virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = host.into();
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: impl Into<String>) -> Self {
        self.heartbeat = heartbeat.into();
        self
    }

    pub fn with_accept_versions(mut self, versions: impl Into<String>) -> Self {
        self.accept_versions = versions.into();
        self
    }
}

/// Options for SUBSCRIBE.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub destination: String,
    /// Subscription id; mandatory from 1.1.
    pub id: String,
    /// Ack mode (`auto`, `client`, `client-individual`); empty leaves the
    /// broker default.
    pub ack: String,
    pub receipt: String,
    /// Broker prefetch hint (`activemq.prefetchSize`).
    pub prefetch: Option<u32>,
    /// Durable subscription name (`activemq.subscriptionName`).
    pub durable: Option<String>,
}

impl SubscribeOptions {
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_ack(mut self, ack: impl Into<String>) -> Self {
        self.ack = ack.into();
        self
    }

    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = receipt.into();
        self
    }

    pub fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn with_durable(mut self, name: impl Into<String>) -> Self {
        self.durable = Some(name.into());
        self
    }
}

/// Options for UNSUBSCRIBE.
#[derive(Debug, Clone, Default)]
pub struct UnsubscribeOptions {
    pub destination: String,
    pub id: String,
    pub receipt: String,
    pub durable: Option<String>,
}

impl UnsubscribeOptions {
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = receipt.into();
        self
    }

    pub fn with_durable(mut self, name: impl Into<String>) -> Self {
        self.durable = Some(name.into());
        self
    }
}

/// Options for ACK and NACK.
#[derive(Debug, Clone, Default)]
pub struct AckOptions {
    /// The message being acknowledged; written as `message-id` below 1.2
    /// and `id` from 1.2.
    pub message_id: String,
    /// Owning subscription; mandatory from 1.1.
    pub subscription: String,
    pub transaction: String,
    pub receipt: String,
}

impl AckOptions {
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = subscription.into();
        self
    }

    pub fn with_transaction(mut self, transaction: impl Into<String>) -> Self {
        self.transaction = transaction.into();
        self
    }

    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = receipt.into();
        self
    }
}

/// Options for SEND.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub destination: String,
    pub body: Bytes,
    pub receipt: String,
    pub transaction: String,
    /// `content-type` value; only written from 1.1.
    pub mime_type: String,
    /// Broker persistence hint (`persistent: true`).
    pub persistent: bool,
    /// Overrides the computed `content-length`.
    pub content_length: Option<usize>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            destination: String::new(),
            body: Bytes::new(),
            receipt: String::new(),
            transaction: String::new(),
            mime_type: "text/plain".to_string(),
            persistent: false,
            content_length: None,
        }
    }
}

impl SendOptions {
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = receipt.into();
        self
    }

    pub fn with_transaction(mut self, transaction: impl Into<String>) -> Self {
        self.transaction = transaction.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_content_length(mut self, length: usize) -> Self {
        self.content_length = Some(length);
        self
    }
}

impl StompBuilder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Builds the handshake frame: `CONNECT` through 1.1, `STOMP` from 1.2.
    /// From 1.1 the `host`, `accept-version` and `heart-beat` headers are
    /// included as well.
    pub fn connect(&self, opts: &ConnectOptions) -> Result<Frame, ProtocolError> {
        let command = if self.version > ProtocolVersion::V1_1 {
            "STOMP"
        } else {
            "CONNECT"
        };
        let mut frame = Frame::new(command, self.version);
        frame.push_header("login", &*opts.login);
        frame.push_header("passcode", &*opts.passcode);
        if self.version > ProtocolVersion::V1_0 {
            frame.push_header("host", &*opts.virtual_host);
            let accept = if opts.accept_versions.is_empty() {
                self.version.as_str()
            } else {
                &opts.accept_versions
            };
            frame.push_header("accept-version", accept);
            let heartbeat = if opts.heartbeat.is_empty() {
                "0,0"
            } else {
                &opts.heartbeat
            };
            frame.push_header("heart-beat", heartbeat);
        }
        Ok(frame)
    }

    pub fn subscribe(&self, opts: &SubscribeOptions) -> Result<Frame, ProtocolError> {
        if opts.destination.is_empty() {
            return Err(self.missing("SUBSCRIBE", "destination"));
        }
        if self.version > ProtocolVersion::V1_0 && opts.id.is_empty() {
            return Err(self.missing("SUBSCRIBE", "id"));
        }

        let mut frame = Frame::new("SUBSCRIBE", self.version);
        frame.push_header("destination", &*opts.destination);
        if !opts.id.is_empty() {
            frame.push_header("id", &*opts.id);
        }
        if !opts.ack.is_empty() {
            frame.push_header("ack", &*opts.ack);
        }
        if !opts.receipt.is_empty() {
            frame.push_header("receipt", &*opts.receipt);
        }
        if let Some(prefetch) = opts.prefetch {
            frame.push_header("activemq.prefetchSize", prefetch.to_string());
        }
        if let Some(ref name) = opts.durable {
            frame.push_header("activemq.subscriptionName", &**name);
        }
        Ok(frame)
    }

    pub fn unsubscribe(&self, opts: &UnsubscribeOptions) -> Result<Frame, ProtocolError> {
        if opts.destination.is_empty() && opts.id.is_empty() {
            return Err(ProtocolError::MissingDestinationOrId);
        }
        if self.version > ProtocolVersion::V1_0 && opts.id.is_empty() {
            return Err(self.missing("UNSUBSCRIBE", "id"));
        }

        let mut frame = Frame::new("UNSUBSCRIBE", self.version);
        if !opts.destination.is_empty() {
            frame.push_header("destination", &*opts.destination);
        }
        if !opts.id.is_empty() {
            frame.push_header("id", &*opts.id);
        }
        if !opts.receipt.is_empty() {
            frame.push_header("receipt", &*opts.receipt);
        }
        if let Some(ref name) = opts.durable {
            frame.push_header("activemq.subscriptionName", &**name);
        }
        Ok(frame)
    }

    pub fn ack(&self, opts: &AckOptions) -> Result<Frame, ProtocolError> {
        self.acknowledge("ACK", opts)
    }

    /// NACK joined the protocol at 1.1; requesting one at 1.0 is a
    /// violation.
    pub fn nack(&self, opts: &AckOptions) -> Result<Frame, ProtocolError> {
        if self.version < ProtocolVersion::V1_1 {
            return Err(ProtocolError::UnsupportedCommand {
                command: "NACK",
                version: self.version,
            });
        }
        self.acknowledge("NACK", opts)
    }

    fn acknowledge(&self, command: &'static str, opts: &AckOptions) -> Result<Frame, ProtocolError> {
        if self.version > ProtocolVersion::V1_0 && opts.subscription.is_empty() {
            return Err(self.missing(command, "subscription"));
        }

        let mut frame = Frame::new(command, self.version);
        // 1.2 renamed the message reference header
        let reference = if self.version > ProtocolVersion::V1_1 {
            "id"
        } else {
            "message-id"
        };
        frame.push_header(reference, &*opts.message_id);
        if !opts.subscription.is_empty() {
            frame.push_header("subscription", &*opts.subscription);
        }
        if !opts.transaction.is_empty() {
            frame.push_header("transaction", &*opts.transaction);
        }
        if !opts.receipt.is_empty() {
            frame.push_header("receipt", &*opts.receipt);
        }
        Ok(frame)
    }

    /// Builds a SEND frame. `content-length` is always written (body size
    /// unless overridden); `content-type` only from 1.1.
    pub fn send(&self, opts: &SendOptions) -> Result<Frame, ProtocolError> {
        if opts.destination.is_empty() {
            return Err(self.missing("SEND", "destination"));
        }

        let mut frame = Frame::new("SEND", self.version);
        frame.push_header("destination", &*opts.destination);
        if !opts.receipt.is_empty() {
            frame.push_header("receipt", &*opts.receipt);
        }
        if !opts.transaction.is_empty() {
            frame.push_header("transaction", &*opts.transaction);
        }
        if opts.persistent {
            frame.push_header("persistent", "true");
        }
        if self.version > ProtocolVersion::V1_0 && !opts.mime_type.is_empty() {
            frame.push_header("content-type", &*opts.mime_type);
        }
        let length = opts.content_length.unwrap_or(opts.body.len());
        frame.push_header("content-length", length.to_string());
        frame.set_body(opts.body.clone());
        Ok(frame)
    }

    pub fn begin(&self, transaction: &str, receipt: &str) -> Result<Frame, ProtocolError> {
        self.transactional("BEGIN", transaction, receipt)
    }

    pub fn commit(&self, transaction: &str, receipt: &str) -> Result<Frame, ProtocolError> {
        self.transactional("COMMIT", transaction, receipt)
    }

    pub fn abort(&self, transaction: &str, receipt: &str) -> Result<Frame, ProtocolError> {
        self.transactional("ABORT", transaction, receipt)
    }

    fn transactional(
        &self,
        command: &'static str,
        transaction: &str,
        receipt: &str,
    ) -> Result<Frame, ProtocolError> {
        if transaction.is_empty() {
            return Err(self.missing(command, "transaction"));
        }
        let mut frame = Frame::new(command, self.version);
        frame.push_header("transaction", transaction);
        if !receipt.is_empty() {
            frame.push_header("receipt", receipt);
        }
        Ok(frame)
    }

    /// Builds a DISCONNECT frame. The receipt header is honored only from
    /// 1.1; at 1.0 it is dropped.
    pub fn disconnect(&self, receipt: &str) -> Result<Frame, ProtocolError> {
        let mut frame = Frame::new("DISCONNECT", self.version);
        if self.version > ProtocolVersion::V1_0 && !receipt.is_empty() {
            frame.push_header("receipt", receipt);
        }
        Ok(frame)
    }

    fn missing(&self, command: &'static str, header: &'static str) -> ProtocolError {
        ProtocolError::MissingHeader {
            command,
            header,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn v(version: ProtocolVersion) -> StompBuilder {
        StompBuilder::new(version)
    }

    #[test]
    fn test_connect_v10_exact_bytes() {
        let frame = v(ProtocolVersion::V1_0)
            .connect(&ConnectOptions::default().with_credentials("guest", "guest"))
            .unwrap();
        assert_eq!(
            &frame.to_bytes()[..],
            b"CONNECT\nlogin: guest\npasscode: guest\n\n\0"
        );
    }

    #[test]
    fn test_connect_v11_adds_handshake_headers() {
        let frame = v(ProtocolVersion::V1_1)
            .connect(
                &ConnectOptions::default()
                    .with_credentials("guest", "guest")
                    .with_virtual_host("/")
                    .with_heartbeat("10000,10000"),
            )
            .unwrap();
        assert_eq!(frame.command(), "CONNECT");
        assert_eq!(frame.header("host"), Some("/"));
        assert_eq!(frame.header("accept-version"), Some("1.1"));
        assert_eq!(frame.header("heart-beat"), Some("10000,10000"));
    }

    #[test]
    fn test_connect_v12_uses_stomp_command() {
        let frame = v(ProtocolVersion::V1_2)
            .connect(&ConnectOptions::default())
            .unwrap();
        assert_eq!(frame.command(), "STOMP");
        assert_eq!(frame.header("heart-beat"), Some("0,0"));
    }

    #[test]
    fn test_subscribe_id_gating() {
        let opts = SubscribeOptions::default().with_destination("q");

        // 1.0: id optional
        assert!(v(ProtocolVersion::V1_0).subscribe(&opts).is_ok());

        // 1.1: id mandatory
        let err = v(ProtocolVersion::V1_1).subscribe(&opts).unwrap_err();
        assert!(err.is_violation());

        let frame = v(ProtocolVersion::V1_1)
            .subscribe(&opts.clone().with_id("s1"))
            .unwrap();
        assert_eq!(frame.header("id"), Some("s1"));
    }

    #[test]
    fn test_subscribe_requires_destination() {
        let err = v(ProtocolVersion::V1_0)
            .subscribe(&SubscribeOptions::default())
            .unwrap_err();
        assert!(err.is_violation());
    }

    #[test]
    fn test_subscribe_broker_hints() {
        let frame = v(ProtocolVersion::V1_1)
            .subscribe(
                &SubscribeOptions::default()
                    .with_destination("q")
                    .with_id("s1")
                    .with_ack("client")
                    .with_prefetch(10)
                    .with_durable("my-sub"),
            )
            .unwrap();
        assert_eq!(frame.header("ack"), Some("client"));
        assert_eq!(frame.header("activemq.prefetchSize"), Some("10"));
        assert_eq!(frame.header("activemq.subscriptionName"), Some("my-sub"));
    }

    #[test]
    fn test_unsubscribe_gating() {
        // both empty: always an error
        let err = v(ProtocolVersion::V1_0)
            .unsubscribe(&UnsubscribeOptions::default())
            .unwrap_err();
        assert_eq!(err, ProtocolError::MissingDestinationOrId);

        // 1.0: destination alone is enough
        let opts = UnsubscribeOptions::default().with_destination("q");
        assert!(v(ProtocolVersion::V1_0).unsubscribe(&opts).is_ok());

        // 1.1: id required even with a destination
        let err = v(ProtocolVersion::V1_1).unsubscribe(&opts).unwrap_err();
        assert!(err.is_violation());
        assert!(v(ProtocolVersion::V1_1)
            .unsubscribe(&opts.with_id("s1"))
            .is_ok());
    }

    #[test]
    fn test_ack_subscription_gating() {
        let opts = AckOptions::default().with_message_id("1");

        assert!(v(ProtocolVersion::V1_0).ack(&opts).is_ok());

        let err = v(ProtocolVersion::V1_1).ack(&opts).unwrap_err();
        assert!(err.is_violation());

        assert!(v(ProtocolVersion::V1_1)
            .ack(&opts.with_subscription("s1"))
            .is_ok());
    }

    #[test]
    fn test_ack_message_reference_header() {
        let opts = AckOptions::default()
            .with_message_id("m-7")
            .with_subscription("s1");

        let frame = v(ProtocolVersion::V1_1).ack(&opts).unwrap();
        assert_eq!(frame.header("message-id"), Some("m-7"));
        assert_eq!(frame.header("id"), None);

        let frame = v(ProtocolVersion::V1_2).ack(&opts).unwrap();
        assert_eq!(frame.header("id"), Some("m-7"));
        assert_eq!(frame.header("message-id"), None);
    }

    #[test]
    fn test_nack_not_in_v10() {
        let opts = AckOptions::default()
            .with_message_id("1")
            .with_subscription("s1");

        let err = v(ProtocolVersion::V1_0).nack(&opts).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnsupportedCommand {
                command: "NACK",
                version: ProtocolVersion::V1_0,
            }
        );

        assert!(v(ProtocolVersion::V1_1).nack(&opts).is_ok());
    }

    #[test]
    fn test_send_v10_exact_bytes() {
        let frame = v(ProtocolVersion::V1_0)
            .send(
                &SendOptions::default()
                    .with_destination("/queue/a")
                    .with_body(&b"hi"[..]),
            )
            .unwrap();
        assert_eq!(
            &frame.to_bytes()[..],
            b"SEND\ndestination: /queue/a\ncontent-length: 2\n\nhi\0"
        );
    }

    #[test]
    fn test_send_content_type_only_above_v10() {
        let opts = SendOptions::default().with_destination("q");

        let frame = v(ProtocolVersion::V1_0).send(&opts).unwrap();
        assert_eq!(frame.header("content-type"), None);

        let frame = v(ProtocolVersion::V1_1).send(&opts).unwrap();
        assert_eq!(frame.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_send_content_length_override() {
        let frame = v(ProtocolVersion::V1_1)
            .send(
                &SendOptions::default()
                    .with_destination("q")
                    .with_body(&b"abc"[..])
                    .with_content_length(99),
            )
            .unwrap();
        assert_eq!(frame.header("content-length"), Some("99"));
    }

    #[test]
    fn test_send_persistent_hint() {
        let frame = v(ProtocolVersion::V1_1)
            .send(&SendOptions::default().with_destination("q").with_persistent())
            .unwrap();
        assert_eq!(frame.header("persistent"), Some("true"));
    }

    #[test]
    fn test_transaction_frames() {
        let builder = v(ProtocolVersion::V1_1);

        let frame = builder.begin("t1", "").unwrap();
        assert_eq!(frame.command(), "BEGIN");
        assert_eq!(frame.header("transaction"), Some("t1"));
        assert_eq!(frame.header("receipt"), None);

        let frame = builder.commit("t1", "r1").unwrap();
        assert_eq!(frame.command(), "COMMIT");
        assert_eq!(frame.header("receipt"), Some("r1"));

        let frame = builder.abort("t1", "").unwrap();
        assert_eq!(frame.command(), "ABORT");

        assert!(builder.begin("", "").unwrap_err().is_violation());
    }

    #[test]
    fn test_disconnect_receipt_gating() {
        let frame = v(ProtocolVersion::V1_0).disconnect("r1").unwrap();
        assert_eq!(frame.header("receipt"), None);

        let frame = v(ProtocolVersion::V1_1).disconnect("r1").unwrap();
        assert_eq!(frame.header("receipt"), Some("r1"));
    }

    #[test]
    fn test_builder_parser_roundtrip_all_levels() {
        for version in [
            ProtocolVersion::V1_0,
            ProtocolVersion::V1_1,
            ProtocolVersion::V1_2,
        ] {
            let builder = v(version);
            let frame = builder
                .send(
                    &SendOptions::default()
                        .with_destination("/queue/orders")
                        .with_body(&b"payload"[..])
                        .with_receipt("r-1"),
                )
                .unwrap();

            let mut parser = Parser::new(version);
            parser.extend(&frame.to_bytes());
            let parsed = parser.next_frame().unwrap().unwrap();

            assert_eq!(parsed.command(), frame.command());
            assert_eq!(parsed.body(), frame.body());
            for (key, value) in frame.headers() {
                assert_eq!(parsed.header(key), Some(value.as_str()), "level {version}");
            }
        }
    }

    #[test]
    fn test_builder_parser_roundtrip_v12_special_chars() {
        // escaping makes colons and newlines in values survive 1.2 wire
        let frame = v(ProtocolVersion::V1_2)
            .send(
                &SendOptions::default()
                    .with_destination("/queue/colon:and\nnewline")
                    .with_body(&b"payload"[..]),
            )
            .unwrap();

        let mut parser = Parser::new(ProtocolVersion::V1_2);
        parser.extend(&frame.to_bytes());
        let parsed = parser.next_frame().unwrap().unwrap();
        assert_eq!(parsed.header("destination"), Some("/queue/colon:and\nnewline"));
    }
}
