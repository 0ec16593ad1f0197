//! STOMP session layer.
//!
//! [`StompSession`] composes the TCP transport, the frame builder and the
//! parser into a STOMP client. On connect it sends the handshake frame,
//! then runs two workers: an io loop feeding received bytes through the
//! parser, and a single dispatch loop routing complete frames to the
//! registered [`StompObserver`]. Frames are dispatched in exactly the
//! order the parser produced them.
//!
//! A transport drop outside a user-initiated stop triggers the fixed
//! backoff reconnect, and the handshake is re-sent on success.

use crate::client::{ClientConfig, TcpClient, TcpEvent};
use crate::error::ClientError;
use rstomp_protocol::builder::{
    AckOptions, ConnectOptions, SendOptions, StompBuilder, SubscribeOptions, UnsubscribeOptions,
};
use rstomp_protocol::{Frame, Parser, ProtocolVersion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of the parsed-frame queue between io and dispatch workers.
const FRAME_QUEUE_CAPACITY: usize = 1024;

/// Session configuration: transport settings plus STOMP handshake fields.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transport configuration.
    pub client: ClientConfig,
    pub login: String,
    pub passcode: String,
    /// `host` header value for the handshake (1.1+).
    pub virtual_host: String,
    /// `cx,cy` heartbeat spec for the handshake (1.1+).
    pub heartbeat: String,
    /// Negotiated protocol level; fixes framing and builder gating.
    pub version: ProtocolVersion,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            client: ClientConfig::new(host, port),
            login: String::new(),
            passcode: String::new(),
            virtual_host: String::new(),
            heartbeat: String::new(),
            version: ProtocolVersion::default(),
        }
    }

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

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::default()
            .with_credentials(self.login.as_str(), self.passcode.as_str())
            .with_virtual_host(self.virtual_host.as_str())
            .with_heartbeat(self.heartbeat.as_str())
    }
}

/// Protocol-level observer. Register one at session construction; all
/// methods default to no-ops except [`StompObserver::on_transport_error`],
/// which logs.
///
/// Callbacks run on the session's dispatch worker, one frame at a time,
/// in parse order. Keep them short or hand work off.
pub trait StompObserver: Send + Sync + 'static {
    /// CONNECTED frame: the broker accepted the handshake.
    fn on_connected(&self, frame: &Frame) {
        let _ = frame;
    }

    /// MESSAGE frame from a subscription.
    fn on_message(&self, frame: &Frame) {
        let _ = frame;
    }

    /// RECEIPT frame answering a receipt-tagged command.
    fn on_receipt(&self, frame: &Frame) {
        let _ = frame;
    }

    /// ERROR frame from the broker.
    fn on_error(&self, frame: &Frame) {
        let _ = frame;
    }

    /// Anything else, including heartbeat/NOOP frames.
    fn on_other(&self, frame: &Frame) {
        let _ = frame;
    }

    /// The transport dropped (a reconnect follows unless stopping).
    fn on_disconnected(&self) {}

    /// A transport or framing fault that was absorbed by the session.
    fn on_transport_error(&self, error: &ClientError) {
        tracing::error!("transport error: {}", error);
    }
}

/// A STOMP client session over one [`TcpClient`].
pub struct StompSession {
    config: SessionConfig,
    client: Arc<TcpClient>,
    builder: StompBuilder,
    observer: Arc<dyn StompObserver>,
    stopping: Arc<AtomicBool>,
    io_task: StdMutex<Option<JoinHandle<()>>>,
    dispatch_task: StdMutex<Option<JoinHandle<()>>>,
}

impl StompSession {
    pub fn new(config: SessionConfig, observer: Arc<dyn StompObserver>) -> Self {
        let client = Arc::new(TcpClient::new(config.client.clone()));
        let builder = StompBuilder::new(config.version);
        Self {
            config,
            client,
            builder,
            observer,
            stopping: Arc::new(AtomicBool::new(false)),
            io_task: StdMutex::new(None),
            dispatch_task: StdMutex::new(None),
        }
    }

    pub fn builder(&self) -> &StompBuilder {
        &self.builder
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Connects the transport, sends the CONNECT/STOMP handshake frame and
    /// starts the io and dispatch workers.
    pub async fn connect(&self) -> Result<(), ClientError> {
        match self.client.connect().await {
            Ok(()) => {}
            Err(e) => {
                self.observer.on_transport_error(&e);
                return Err(e);
            }
        }

        let handshake = self.builder.connect(&self.config.connect_options())?;
        self.client.send(&handshake.to_bytes()).await;

        if let Some(events) = self.client.events() {
            self.spawn_workers(events);
        }
        Ok(())
    }

    /// Sends a prebuilt frame.
    pub async fn send_frame(&self, frame: &Frame) {
        self.client.send(&frame.to_bytes()).await;
    }

    /// Sends a bare heartbeat (line terminator only).
    pub async fn send_heartbeat(&self) {
        self.client
            .send(Frame::heartbeat(self.config.version).to_bytes().as_ref())
            .await;
    }

    pub async fn subscribe(&self, opts: &SubscribeOptions) -> Result<(), ClientError> {
        let frame = self.builder.subscribe(opts)?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn unsubscribe(&self, opts: &UnsubscribeOptions) -> Result<(), ClientError> {
        let frame = self.builder.unsubscribe(opts)?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn ack(&self, opts: &AckOptions) -> Result<(), ClientError> {
        let frame = self.builder.ack(opts)?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn nack(&self, opts: &AckOptions) -> Result<(), ClientError> {
        let frame = self.builder.nack(opts)?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn send_message(&self, opts: &SendOptions) -> Result<(), ClientError> {
        let frame = self.builder.send(opts)?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn begin(&self, transaction: &str) -> Result<(), ClientError> {
        let frame = self.builder.begin(transaction, "")?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn commit(&self, transaction: &str) -> Result<(), ClientError> {
        let frame = self.builder.commit(transaction, "")?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    pub async fn abort(&self, transaction: &str) -> Result<(), ClientError> {
        let frame = self.builder.abort(transaction, "")?;
        self.client.send(&frame.to_bytes()).await;
        Ok(())
    }

    /// Graceful stop: DISCONNECT frame (receipt attached from 1.1), close
    /// the transport, join both workers. Further transport drops no longer
    /// trigger reconnects.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        if self.client.is_connected() {
            let receipt = if self.config.version > ProtocolVersion::V1_0 {
                Uuid::new_v4().to_string()
            } else {
                String::new()
            };
            if let Ok(frame) = self.builder.disconnect(&receipt) {
                self.client.send(&frame.to_bytes()).await;
            }
        }

        self.client.shutdown().await;

        let io = self.io_task.lock().unwrap().take();
        if let Some(io) = io {
            let _ = io.await;
        }
        let dispatch = self.dispatch_task.lock().unwrap().take();
        if let Some(dispatch) = dispatch {
            let _ = dispatch.await;
        }
    }

    fn spawn_workers(&self, events: mpsc::Receiver<TcpEvent>) {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);

        let io = tokio::spawn(Self::io_loop(
            self.client.clone(),
            self.observer.clone(),
            self.stopping.clone(),
            self.builder,
            self.config.clone(),
            events,
            frame_tx,
        ));
        *self.io_task.lock().unwrap() = Some(io);

        let dispatch = tokio::spawn(Self::dispatch_loop(frame_rx, self.observer.clone()));
        *self.dispatch_task.lock().unwrap() = Some(dispatch);
    }

    /// Feeds transport events through the parser, queues complete frames,
    /// and drives the reconnect cycle on transport drops.
    async fn io_loop(
        client: Arc<TcpClient>,
        observer: Arc<dyn StompObserver>,
        stopping: Arc<AtomicBool>,
        builder: StompBuilder,
        config: SessionConfig,
        mut events: mpsc::Receiver<TcpEvent>,
        frames: mpsc::Sender<Frame>,
    ) {
        let mut shutdown = client.subscribe_shutdown();
        let mut parser = Parser::new(builder.version());

        loop {
            let event = tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => event,
                    None => return,
                },
                _ = shutdown.recv() => return,
            };

            match event {
                TcpEvent::Data(data) => {
                    parser.extend(&data);
                    loop {
                        match parser.next_frame() {
                            Ok(Some(frame)) => {
                                if frames.send(frame).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                // stream can no longer be framed; drop the
                                // connection and let the reconnect cycle
                                // start over with a fresh parser
                                tracing::error!("unparseable stream: {}", e);
                                observer.on_transport_error(&ClientError::Protocol(e));
                                client.disconnect().await;
                                break;
                            }
                        }
                    }
                }
                TcpEvent::Disconnected => {
                    observer.on_disconnected();
                    if stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    parser = Parser::new(builder.version());
                    match client.reconnect().await {
                        Ok(()) => match builder.connect(&config.connect_options()) {
                            Ok(frame) => client.send(&frame.to_bytes()).await,
                            Err(e) => observer.on_transport_error(&ClientError::Protocol(e)),
                        },
                        Err(_) => return,
                    }
                }
                TcpEvent::Error(e) => observer.on_transport_error(&e),
                TcpEvent::Connected | TcpEvent::Sent(_) => {}
            }
        }
    }

    /// Single consumer draining the frame queue: routing is by command,
    /// and order is exactly parse order.
    async fn dispatch_loop(mut frames: mpsc::Receiver<Frame>, observer: Arc<dyn StompObserver>) {
        while let Some(frame) = frames.recv().await {
            match frame.command() {
                "CONNECTED" => observer.on_connected(&frame),
                "MESSAGE" => observer.on_message(&frame),
                "RECEIPT" => observer.on_receipt(&frame),
                "ERROR" => observer.on_error(&frame),
                _ => observer.on_other(&frame),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn snapshot(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn record(&self, what: impl Into<String>) {
            self.seen.lock().unwrap().push(what.into());
        }
    }

    impl StompObserver for Recorder {
        fn on_connected(&self, _: &Frame) {
            self.record("connected");
        }
        fn on_message(&self, frame: &Frame) {
            self.record(format!(
                "message:{}",
                frame.header("message-id").unwrap_or("")
            ));
        }
        fn on_receipt(&self, _: &Frame) {
            self.record("receipt");
        }
        fn on_error(&self, _: &Frame) {
            self.record("error");
        }
        fn on_other(&self, _: &Frame) {
            self.record("other");
        }
    }

    /// Reads one frame's bytes, up to and including the NUL terminator.
    /// Byte-at-a-time so coalesced frames are not over-read.
    async fn read_frame(socket: &mut TcpStream) -> Vec<u8> {
        let mut collected = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = socket.read(&mut byte).await.unwrap();
            assert!(n > 0, "peer closed while reading frame");
            collected.push(byte[0]);
            if byte[0] == 0 {
                return collected;
            }
        }
    }

    async fn wait_for(recorder: &Arc<Recorder>, count: usize) {
        for _ in 0..250 {
            if recorder.snapshot().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {} events, saw {:?}",
            count,
            recorder.snapshot()
        );
    }

    #[tokio::test]
    async fn test_handshake_and_ordered_dispatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let handshake = read_frame(&mut socket).await;
            assert!(handshake.starts_with(b"CONNECT\n"));
            assert!(String::from_utf8_lossy(&handshake).contains("login: guest"));

            // one write carrying several frames plus a trailing heartbeat
            socket
                .write_all(
                    b"CONNECTED\nversion: 1.1\n\n\0\
                      MESSAGE\nmessage-id: m1\nsubscription: s1\n\nfirst\0\
                      MESSAGE\nmessage-id: m2\nsubscription: s1\n\nsecond\0\
                      RECEIPT\nreceipt-id: r1\n\n\0\
                      ERROR\nmessage: boom\n\n\0\n",
                )
                .await
                .unwrap();

            // hold the socket open until the client stops
            let disconnect = read_frame(&mut socket).await;
            disconnect
        });

        let recorder = Arc::new(Recorder::default());
        let config = SessionConfig::new("127.0.0.1", addr.port())
            .with_credentials("guest", "guest")
            .with_version(ProtocolVersion::V1_1);
        let session = StompSession::new(config, recorder.clone());

        session.connect().await.unwrap();
        wait_for(&recorder, 6).await;

        assert_eq!(
            recorder.snapshot(),
            vec!["connected", "message:m1", "message:m2", "receipt", "error", "other"]
        );

        session.stop().await;
        let disconnect = broker.await.unwrap();
        let text = String::from_utf8_lossy(&disconnect);
        assert!(text.starts_with("DISCONNECT\n"));
        // 1.1 stop attaches a receipt
        assert!(text.contains("receipt: "));
    }

    #[tokio::test]
    async fn test_subscribe_goes_over_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _handshake = read_frame(&mut socket).await;
            read_frame(&mut socket).await
        });

        let config = SessionConfig::new("127.0.0.1", addr.port())
            .with_version(ProtocolVersion::V1_1);
        let session = StompSession::new(config, Arc::new(Recorder::default()));
        session.connect().await.unwrap();

        session
            .subscribe(
                &SubscribeOptions::default()
                    .with_destination("/queue/a")
                    .with_id("s1"),
            )
            .await
            .unwrap();

        let wire = broker.await.unwrap();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("SUBSCRIBE\n"));
        assert!(text.contains("destination: /queue/a"));
        assert!(text.contains("id: s1"));

        session.stop().await;
    }

    #[tokio::test]
    async fn test_version_gating_surfaces_at_call_site() {
        let config = SessionConfig::new("127.0.0.1", 1).with_version(ProtocolVersion::V1_0);
        let session = StompSession::new(config, Arc::new(Recorder::default()));

        // NACK does not exist at 1.0; fails before touching the socket
        let err = session
            .nack(&AckOptions::default().with_message_id("1"))
            .await
            .unwrap_err();
        match err {
            ClientError::Protocol(e) => assert!(e.is_violation()),
            other => panic!("expected protocol violation, got {}", other),
        }
    }
}
