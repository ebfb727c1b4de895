//! Session client and runtime loop.
//!
//! The [`ClientBuilder`] configures the session and the callee. The
//! [`Client`] manages the lifecycle:
//! 1. RawSocket handshake
//! 2. HELLO / WELCOME
//! 3. Read frames and dispatch messages to the [`Callee`]
//! 4. Report connection loss to the [`ConnectionMonitor`]
//!
//! # Example
//!
//! ```ignore
//! use wamp_callee::handler::SyncOperation;
//! use wamp_callee::protocol::RegisterOptions;
//! use wamp_callee::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("realm1")
//!         .connect_tcp("127.0.0.1:8080")
//!         .await?;
//!
//!     let add = SyncOperation::new("com.example.add", |args| {
//!         Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
//!     });
//!     let _registration = client.register(add, RegisterOptions::default())?.await?;
//!
//!     client.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::callee::{
    encode_message, Callee, CalleeConfig, MessageProxy, PendingResponse, Registration,
};
use crate::codec::Serializer;
use crate::error::{CalleeError, CloseInfo, Result, PROTOCOL_VIOLATION};
use crate::handler::RpcOperation;
use crate::protocol::{
    Dict, Frame, FrameBuffer, FrameType, Handshake, RegisterOptions, SessionId, WampMessage,
    HANDSHAKE_SIZE, MAX_LENGTH_EXPONENT,
};
use crate::session::ConnectionMonitor;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Read buffer size for the transport.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Close reason sent when answering a router GOODBYE.
pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";

/// Close reason sent by [`Client::close`].
pub const CLOSE_NORMAL: &str = "wamp.close.normal";

/// Builder for configuring and starting a session.
pub struct ClientBuilder {
    realm: String,
    serializer: Serializer,
    length_exponent: u8,
    writer_config: WriterConfig,
    callee_config: CalleeConfig,
}

impl ClientBuilder {
    /// Create a builder for joining `realm`.
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            serializer: Serializer::default(),
            length_exponent: MAX_LENGTH_EXPONENT,
            writer_config: WriterConfig::default(),
            callee_config: CalleeConfig::default(),
        }
    }

    /// Set the serializer requested in the handshake.
    ///
    /// Default: MessagePack
    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Set the max incoming message size as an exponent: 2^(9+exp) bytes.
    ///
    /// Default: 15 (16 MiB)
    pub fn max_length_exponent(mut self, exponent: u8) -> Self {
        self.length_exponent = exponent.min(MAX_LENGTH_EXPONENT);
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Validate procedure URIs with the strict or loose grammar.
    ///
    /// Default: strict
    pub fn strict_uris(mut self, strict: bool) -> Self {
        self.callee_config.strict_uris = strict;
        self
    }

    /// Answer invocations for unknown registrations with an ERROR.
    ///
    /// Default: drop them
    pub fn reply_to_unknown_invocations(mut self, reply: bool) -> Self {
        self.callee_config.reply_to_unknown_invocations = reply;
        self
    }

    /// Connect over TCP and start the session.
    pub async fn connect_tcp<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.start(stream).await
    }

    /// Start the session over an established byte stream.
    ///
    /// This will:
    /// 1. Exchange RawSocket handshakes
    /// 2. Spawn the writer task
    /// 3. Send HELLO and wait for WELCOME
    /// 4. Spawn the read loop
    pub async fn start<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Client::start(self, stream).await
    }
}

/// A joined session serving registrations.
pub struct Client {
    callee: Arc<Callee>,
    monitor: Arc<ConnectionMonitor>,
    writer: WriterHandle,
    session_id: SessionId,
    serializer: Serializer,
    max_message_size: usize,
    closing: Arc<AtomicBool>,
    shutdown_rx: oneshot::Receiver<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(realm: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(realm)
    }

    async fn start<S>(config: ClientBuilder, mut stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        // 1. Handshake
        let requested = Handshake::new(config.length_exponent, config.serializer.id());
        stream.write_all(&requested.encode()).await?;
        stream.flush().await?;

        let mut reply = [0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut reply).await?;
        let accepted = Handshake::decode_reply(&reply)?;
        if accepted.serializer != requested.serializer {
            return Err(CalleeError::Handshake(format!(
                "Router chose serializer {} instead of {}",
                accepted.serializer, requested.serializer
            )));
        }
        let max_message_size = accepted.max_message_size() as usize;

        // 2. Split stream, spawn writer task
        let (mut reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer_config);

        // 3. HELLO / WELCOME
        let hello = WampMessage::Hello {
            realm: config.realm.clone(),
            details: hello_details(),
        };
        let payload = encode_message(config.serializer, &hello, max_message_size)?;
        writer.send(OutboundFrame::message(payload)).await?;

        let mut frame_buffer = FrameBuffer::with_max_payload(requested.max_message_size());
        let (session_id, backlog) =
            wait_for_welcome(&mut reader, &mut frame_buffer, &writer, config.serializer).await?;
        tracing::debug!(session_id, realm = %config.realm, "Session established");

        // 4. Callee bound to this session
        let monitor = ConnectionMonitor::new();
        let proxy = Arc::new(MessageProxy::new(
            writer.clone(),
            config.serializer,
            max_message_size,
        ));
        let callee = Callee::with_config(proxy, monitor.clone(), config.callee_config);
        monitor.set_connected();

        // 5. Spawn read loop
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));
        let session = Session {
            callee: callee.clone(),
            writer: writer.clone(),
            serializer: config.serializer,
            max_message_size,
            closing: closing.clone(),
        };
        let loop_monitor = monitor.clone();

        tokio::spawn(async move {
            match session.run(reader, frame_buffer, backlog).await {
                Ok(info) => loop_monitor.connection_broken(info),
                Err(e) => {
                    tracing::error!("Read loop error: {}", e);
                    loop_monitor.connection_error(e.to_string());
                }
            }
            let _ = shutdown_tx.send(());
        });

        Ok(Client {
            callee,
            monitor,
            writer,
            session_id,
            serializer: config.serializer,
            max_message_size,
            closing,
            shutdown_rx,
            _writer_task: writer_task,
        })
    }

    /// Router-assigned session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The callee serving this session.
    pub fn callee(&self) -> &Arc<Callee> {
        &self.callee
    }

    /// Whether the session is still established.
    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Register `operation`; see [`Callee::register`].
    pub fn register<O: RpcOperation>(
        &self,
        operation: O,
        options: RegisterOptions,
    ) -> Result<PendingResponse<Registration>> {
        self.callee.register(operation, options)
    }

    /// Send GOODBYE. The session ends when the router answers; that answer
    /// is not replied to.
    pub async fn close(&self, reason: &str) -> Result<()> {
        let goodbye = WampMessage::Goodbye {
            details: Dict::new(),
            reason: reason.to_owned(),
        };
        let payload = encode_message(self.serializer, &goodbye, self.max_message_size)?;
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.writer.send(OutboundFrame::message(payload)).await {
            self.closing.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Get the current backpressure status.
    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }

    /// Get the current pending frame count.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// Wait until the session ends.
    ///
    /// This consumes the client and blocks until the read loop exits.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let _ = self.shutdown_rx.await;
        Ok(())
    }
}

/// HELLO details announcing the callee role.
fn hello_details() -> Dict {
    let details = json!({
        "roles": {
            "callee": {
                "features": {
                    "call_canceling": true,
                    "progressive_call_results": true,
                    "caller_identification": true,
                    "pattern_based_registration": true,
                    "shared_registration": true,
                }
            }
        }
    });
    match details {
        Value::Object(map) => map,
        _ => Dict::new(),
    }
}

/// Read until WELCOME. Frames that arrived after it are returned for the
/// read loop.
async fn wait_for_welcome<R>(
    reader: &mut R,
    frame_buffer: &mut FrameBuffer,
    writer: &WriterHandle,
    serializer: Serializer,
) -> Result<(SessionId, Vec<Frame>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(CalleeError::Handshake(
                "Connection closed before WELCOME".into(),
            ));
        }

        let mut frames = frame_buffer.push(&buf[..n])?.into_iter();
        while let Some(frame) = frames.next() {
            match frame.frame_type() {
                FrameType::Ping => answer_ping(writer, &frame)?,
                FrameType::Pong => {}
                FrameType::Regular => match decode(serializer, &frame)? {
                    WampMessage::Welcome { session, .. } => {
                        return Ok((session, frames.collect()));
                    }
                    WampMessage::Abort { reason, .. } => {
                        return Err(CalleeError::Handshake(format!(
                            "Session aborted: {}",
                            reason
                        )));
                    }
                    other => {
                        return Err(CalleeError::Handshake(format!(
                            "Expected WELCOME, got message type {}",
                            other.code()
                        )));
                    }
                },
            }
        }
    }
}

fn decode(serializer: Serializer, frame: &Frame) -> Result<WampMessage> {
    WampMessage::from_value(serializer.decode(frame.payload())?)
}

fn answer_ping(writer: &WriterHandle, frame: &Frame) -> Result<()> {
    tracing::trace!(len = frame.payload().len(), "PING");
    writer.try_send(OutboundFrame::new(FrameType::Pong, frame.payload.clone()))
}

/// State owned by the read loop.
struct Session {
    callee: Arc<Callee>,
    writer: WriterHandle,
    serializer: Serializer,
    max_message_size: usize,
    /// Set once we have sent our own GOODBYE.
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Main read loop. Returns the close info when the session ends
    /// normally; errors are transport or protocol failures.
    async fn run<R>(
        &self,
        mut reader: R,
        mut frame_buffer: FrameBuffer,
        backlog: Vec<Frame>,
    ) -> Result<CloseInfo>
    where
        R: AsyncRead + Unpin,
    {
        for frame in backlog {
            if let Some(info) = self.dispatch_frame(&frame)? {
                return Ok(info);
            }
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(CloseInfo::new("wamp.close.transport_closed"));
            }

            for frame in frame_buffer.push(&buf[..n])? {
                if let Some(info) = self.dispatch_frame(&frame)? {
                    return Ok(info);
                }
            }
        }
    }

    /// Handle one frame. Returns close info when it ends the session.
    fn dispatch_frame(&self, frame: &Frame) -> Result<Option<CloseInfo>> {
        match frame.frame_type() {
            FrameType::Ping => {
                answer_ping(&self.writer, frame)?;
                return Ok(None);
            }
            FrameType::Pong => return Ok(None),
            FrameType::Regular => {}
        }

        let message = match decode(self.serializer, frame) {
            Ok(message) => message,
            Err(e) => {
                self.abort(PROTOCOL_VIOLATION, &e.to_string());
                return Err(e);
            }
        };
        let code = message.code();
        match message {
            WampMessage::Goodbye { details, reason } if self.closing.load(Ordering::SeqCst) => {
                tracing::debug!(reason = %reason, "Router acknowledged GOODBYE");
                Ok(Some(CloseInfo { reason, details }))
            }
            WampMessage::Goodbye { details, reason } => {
                tracing::debug!(reason = %reason, "Router said GOODBYE");
                let reply = WampMessage::Goodbye {
                    details: Dict::new(),
                    reason: GOODBYE_AND_OUT.to_owned(),
                };
                let payload = encode_message(self.serializer, &reply, self.max_message_size)?;
                if let Err(e) = self.writer.try_send(OutboundFrame::message(payload)) {
                    tracing::warn!("Failed to answer GOODBYE: {}", e);
                }
                Ok(Some(CloseInfo { reason, details }))
            }
            WampMessage::Abort { details, reason } => {
                tracing::warn!(reason = %reason, "Session aborted by router");
                Ok(Some(CloseInfo { reason, details }))
            }
            WampMessage::Unsupported { code } => {
                tracing::debug!(code, "Ignoring unsupported message");
                Ok(None)
            }
            message => {
                if !self.callee.handle_message(message) {
                    tracing::warn!(code, "Unexpected message");
                }
                Ok(None)
            }
        }
    }

    /// Tell the router why we are leaving. Best effort; the session ends
    /// either way.
    fn abort(&self, reason: &str, message: &str) {
        let mut details = Dict::new();
        details.insert("message".to_owned(), Value::String(message.to_owned()));
        let abort = WampMessage::Abort {
            details,
            reason: reason.to_owned(),
        };
        let sent = encode_message(self.serializer, &abort, self.max_message_size)
            .and_then(|payload| self.writer.try_send(OutboundFrame::message(payload)));
        if let Err(e) = sent {
            tracing::warn!("Failed to send ABORT: {}", e);
        }
    }
}
