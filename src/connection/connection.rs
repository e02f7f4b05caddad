// src/connection/connection.rs

//! A single multiplexed channel to one host: one transport, one negotiated
//! protocol version, a stream-id table routing responses to their waiting
//! callers, plus heartbeat and orderly shutdown.

use crate::config::SslContext;
use crate::connection::auth::AuthProvider;
use crate::connection::stream::AnyStream;
use crate::connection::stream_ids::StreamIdSet;
use crate::core::errors::{DbError, ZirconError};
use crate::core::protocol::frame::{Frame, FrameCodec, FrameFlags, ProtocolVersion};
use crate::core::protocol::request::{QueryParameters, Request};
use crate::core::protocol::response::{CqlResult, Response, ResponseExtras, ServerEvent};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

/// Capacity of the per-connection outbound frame queue.
const WRITE_QUEUE_CAPACITY: usize = 1024;
/// Capacity of the server-event fanout channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Options a [`Connection`] needs at open time, extracted from the client
/// configuration by the pool or the control connection.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
    /// OPTIONS probe is sent after this much send-side silence; `None`
    /// disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    pub ssl: Option<Arc<SslContext>>,
    /// Cap on concurrent stream ids, further bounded by what the protocol
    /// version supports.
    pub max_streams: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Some(Duration::from_secs(30)),
            auth_provider: None,
            ssl: None,
            max_streams: 2048,
        }
    }
}

type ResponseSender = oneshot::Sender<Result<(Response, ResponseExtras), ZirconError>>;

/// Stream-id table plus the callbacks bound to the ids.
///
/// Invariant: an id is allocated if and only if a callback entry exists for
/// it, so cancellation (which removes the entry) always frees the slot.
struct PendingTable {
    ids: StreamIdSet,
    callbacks: HashMap<i16, ResponseSender>,
}

struct ConnectionInner {
    addr: SocketAddr,
    version: ProtocolVersion,
    pending: Mutex<PendingTable>,
    write_tx: mpsc::Sender<Frame>,
    event_tx: broadcast::Sender<ServerEvent>,
    closed: AtomicBool,
    /// Instant of the last outbound frame, as millis since `started`.
    last_write_ms: AtomicU64,
    started: Instant,
}

impl ConnectionInner {
    fn mark_closed(&self, reason: &ZirconError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Connection to {} closed: {}", self.addr, reason);
        let mut pending = self.pending.lock();
        let drained: Vec<_> = pending.callbacks.drain().collect();
        for (id, sender) in drained {
            pending.ids.release(id);
            let _ = sender.send(Err(reason.clone()));
        }
    }

    fn touch_write_clock(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_write_ms.store(elapsed, Ordering::Relaxed);
    }

    fn millis_since_last_write(&self) -> u64 {
        let now = self.started.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_write_ms.load(Ordering::Relaxed))
    }
}

/// Releases the stream slot if the caller gave up before a response was
/// routed (future dropped on timeout or cancellation).
struct SlotGuard {
    inner: Arc<ConnectionInner>,
    stream: i16,
    armed: bool,
}

impl SlotGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut pending = self.inner.pending.lock();
        if pending.callbacks.remove(&self.stream).is_some() {
            pending.ids.release(self.stream);
            trace!(
                "Released stream {} on {} after cancellation",
                self.stream, self.inner.addr
            );
        }
    }
}

/// A live connection to one host. Cheap to clone; all clones share the
/// transport and the stream-id table.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    /// Serializes `USE` so concurrent borrows observe one agreed keyspace.
    keyspace: Arc<tokio::sync::Mutex<Option<String>>>,
}

impl Connection {
    /// Opens a transport, negotiates STARTUP (and authentication when the
    /// server demands it) at exactly `version`, and spawns the IO tasks.
    pub async fn open(
        addr: SocketAddr,
        version: ProtocolVersion,
        options: &ConnectionOptions,
    ) -> Result<Connection, ZirconError> {
        let tcp = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ZirconError::ConnectTimeout(options.connect_timeout))??;
        tcp.set_nodelay(true)?;

        let stream = match &options.ssl {
            None => AnyStream::Tcp(tcp),
            Some(ssl) => {
                let server_name = ssl.server_name(addr.ip());
                let tls = ssl.connector().connect(server_name, tcp).await?;
                AnyStream::Tls(Box::new(tls))
            }
        };

        let framed = Framed::new(stream, FrameCodec::new(version));
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let capacity = options.max_streams.min(version.max_streams()).max(1);
        let inner = Arc::new(ConnectionInner {
            addr,
            version,
            pending: Mutex::new(PendingTable {
                ids: StreamIdSet::new(capacity),
                callbacks: HashMap::new(),
            }),
            write_tx,
            event_tx,
            closed: AtomicBool::new(false),
            last_write_ms: AtomicU64::new(0),
            started: Instant::now(),
        });

        let (sink, source) = framed.split();
        tokio::spawn(write_loop(inner.clone(), sink, write_rx));
        tokio::spawn(read_loop(inner.clone(), source));

        let connection = Connection {
            inner,
            keyspace: Arc::new(tokio::sync::Mutex::new(None)),
        };
        connection.startup(options).await?;

        if let Some(interval) = options.heartbeat_interval {
            tokio::spawn(heartbeat_loop(connection.clone(), interval));
        }
        Ok(connection)
    }

    /// Runs version negotiation: starts at `max_version` and walks down one
    /// version per server-side protocol rejection until the floor.
    pub async fn negotiate(
        addr: SocketAddr,
        max_version: ProtocolVersion,
        options: &ConnectionOptions,
    ) -> Result<Connection, ZirconError> {
        let mut version = max_version;
        loop {
            match Connection::open(addr, version, options).await {
                Ok(connection) => return Ok(connection),
                Err(
                    ZirconError::Db {
                        error: DbError::ProtocolError,
                        message,
                    }
                    | ZirconError::Protocol(message),
                ) => match version.downgrade() {
                    Some(lower) => {
                        debug!(
                            "Host {} rejected protocol {} ({}); retrying with {}",
                            addr, version, message, lower
                        );
                        version = lower;
                    }
                    None => {
                        return Err(ZirconError::Protocol(format!(
                            "Host {addr} rejected every supported protocol version: {message}"
                        )));
                    }
                },
                Err(other) => return Err(other),
            }
        }
    }

    /// STARTUP followed by the authentication exchange when requested.
    async fn startup(&self, options: &ConnectionOptions) -> Result<(), ZirconError> {
        let mut startup_options = HashMap::with_capacity(1);
        startup_options.insert("CQL_VERSION".to_owned(), "3.0.0".to_owned());
        let (response, _) = self
            .send(&Request::Startup {
                options: startup_options,
            })
            .await?;

        match response {
            Response::Ready => Ok(()),
            Response::Authenticate { authenticator } => {
                self.authenticate(options, &authenticator).await
            }
            Response::Error { error, message } => Err(ZirconError::Db { error, message }),
            other => Err(ZirconError::Protocol(format!(
                "Unexpected response to STARTUP: {other:?}"
            ))),
        }
    }

    async fn authenticate(
        &self,
        options: &ConnectionOptions,
        authenticator_class: &str,
    ) -> Result<(), ZirconError> {
        let provider = options.auth_provider.as_ref().ok_or_else(|| {
            ZirconError::Authentication(format!(
                "Host {} requires authentication ({authenticator_class}) but no auth provider is configured",
                self.inner.addr
            ))
        })?;

        // Protocol v1 predates SASL: a single CREDENTIALS round.
        if self.inner.version == ProtocolVersion::V1 {
            let credentials = provider.v1_credentials().ok_or_else(|| {
                ZirconError::Authentication(
                    "Configured auth provider cannot produce v1 credentials".into(),
                )
            })?;
            return match self.send(&Request::Credentials { credentials }).await? {
                (Response::Ready, _) => Ok(()),
                (Response::Error { error, message }, _) => {
                    Err(auth_error(error, message))
                }
                (other, _) => Err(ZirconError::Protocol(format!(
                    "Unexpected response to CREDENTIALS: {other:?}"
                ))),
            };
        }

        let mut authenticator = provider.new_authenticator(authenticator_class)?;
        let mut token = authenticator.initial_response().await?;
        loop {
            let (response, _) = self.send(&Request::AuthResponse { token }).await?;
            match response {
                Response::AuthSuccess { token: final_token } => {
                    authenticator.on_success(final_token).await?;
                    return Ok(());
                }
                Response::AuthChallenge { token: challenge } => {
                    token = authenticator.evaluate_challenge(challenge).await?;
                }
                Response::Ready => return Ok(()),
                Response::Error { error, message } => {
                    return Err(auth_error(error, message));
                }
                other => {
                    return Err(ZirconError::Protocol(format!(
                        "Unexpected response during authentication: {other:?}"
                    )));
                }
            }
        }
    }

    /// Sends one request and awaits its response. Never blocks on stream-id
    /// exhaustion: a full table fails fast with `ConnectionBusy`.
    pub async fn send(
        &self,
        request: &Request,
    ) -> Result<(Response, ResponseExtras), ZirconError> {
        self.send_with_flags(request, FrameFlags::empty()).await
    }

    /// `send` with request-level extras: the TRACING flag and a custom
    /// payload map prepended to the body (protocol v4+).
    pub async fn send_request(
        &self,
        request: &Request,
        tracing: bool,
        custom_payload: Option<&std::collections::HashMap<String, bytes::Bytes>>,
    ) -> Result<(Response, ResponseExtras), ZirconError> {
        let mut flags = FrameFlags::empty();
        if tracing {
            flags |= FrameFlags::TRACING;
        }
        let payload = custom_payload.filter(|p| !p.is_empty());
        if payload.is_some() {
            if !self.inner.version.supports_custom_payload() {
                return Err(ZirconError::InvalidQuery(format!(
                    "Custom payloads require protocol v4+, connection negotiated {}",
                    self.inner.version
                )));
            }
            flags |= FrameFlags::CUSTOM_PAYLOAD;
        }
        self.send_with_payload(request, flags, payload).await
    }

    pub async fn send_with_flags(
        &self,
        request: &Request,
        flags: FrameFlags,
    ) -> Result<(Response, ResponseExtras), ZirconError> {
        self.send_with_payload(request, flags, None).await
    }

    async fn send_with_payload(
        &self,
        request: &Request,
        flags: FrameFlags,
        custom_payload: Option<&std::collections::HashMap<String, bytes::Bytes>>,
    ) -> Result<(Response, ResponseExtras), ZirconError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ZirconError::ConnectionClosed);
        }
        let body = match custom_payload {
            None => request.encode_body(self.inner.version)?,
            Some(payload) => {
                let mut framed = bytes::BytesMut::new();
                crate::core::protocol::wire::write_bytes_map(&mut framed, payload)?;
                framed.extend_from_slice(&request.encode_body(self.inner.version)?);
                framed.freeze()
            }
        };

        let (stream, rx) = {
            let mut pending = self.inner.pending.lock();
            let stream = pending.ids.allocate().ok_or(ZirconError::ConnectionBusy)?;
            let (tx, rx) = oneshot::channel();
            pending.callbacks.insert(stream, tx);
            (stream, rx)
        };
        let guard = SlotGuard {
            inner: self.inner.clone(),
            stream,
            armed: true,
        };

        let frame = Frame::request(self.inner.version, flags, stream, request.opcode(), body);
        self.inner.touch_write_clock();
        if self.inner.write_tx.send(frame).await.is_err() {
            // Guard drop releases the slot.
            return Err(ZirconError::ConnectionClosed);
        }

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(ZirconError::ConnectionClosed),
        };
        guard.disarm();
        result
    }

    /// Subscribes to server push events and asks the host to deliver them.
    pub async fn register_events(
        &self,
        event_types: &[&str],
    ) -> Result<broadcast::Receiver<ServerEvent>, ZirconError> {
        let receiver = self.inner.event_tx.subscribe();
        let (response, _) = self
            .send(&Request::Register {
                events: event_types.iter().map(|s| (*s).to_owned()).collect(),
            })
            .await?;
        match response {
            Response::Ready => Ok(receiver),
            Response::Error { error, message } => Err(ZirconError::Db { error, message }),
            other => Err(ZirconError::Protocol(format!(
                "Unexpected response to REGISTER: {other:?}"
            ))),
        }
    }

    /// Binds this connection to a keyspace with `USE`. Idempotent, and
    /// serialized against concurrent callers: whoever runs last leaves the
    /// agreed keyspace in place before any of their sends proceed.
    pub async fn set_keyspace(&self, keyspace: &str) -> Result<(), ZirconError> {
        if !is_valid_keyspace_name(keyspace) {
            return Err(ZirconError::InvalidKeyspaceName(keyspace.to_owned()));
        }
        let mut current = self.keyspace.lock().await;
        if current.as_deref() == Some(keyspace) {
            return Ok(());
        }
        let (response, _) = self
            .send(&Request::Query {
                query: format!("USE \"{keyspace}\""),
                params: QueryParameters::default(),
            })
            .await?;
        match response {
            Response::Result(result) => match *result {
                CqlResult::SetKeyspace(applied) => {
                    *current = Some(applied);
                    Ok(())
                }
                other => Err(ZirconError::Protocol(format!(
                    "Unexpected result for USE: {other:?}"
                ))),
            },
            Response::Error { error, message } => Err(ZirconError::Db { error, message }),
            other => Err(ZirconError::Protocol(format!(
                "Unexpected response to USE: {other:?}"
            ))),
        }
    }

    pub fn current_keyspace(&self) -> Option<String> {
        self.keyspace.try_lock().ok().and_then(|ks| ks.clone())
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Load metric for least-loaded pool selection.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().ids.allocated()
    }

    pub fn close(&self) {
        self.inner.mark_closed(&ZirconError::ConnectionClosed);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr)
            .field("version", &self.inner.version)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn auth_error(error: DbError, message: String) -> ZirconError {
    if error == DbError::AuthenticationError {
        ZirconError::Authentication(message)
    } else {
        ZirconError::Db { error, message }
    }
}

/// A keyspace identifier as allowed by the grammar (possibly case-sensitive,
/// hence the quoting in `set_keyspace`). Rejecting anything else keeps `USE`
/// injection-proof.
pub fn is_valid_keyspace_name(keyspace: &str) -> bool {
    !keyspace.is_empty()
        && keyspace.len() <= 48
        && keyspace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn write_loop(
    inner: Arc<ConnectionInner>,
    mut sink: futures::stream::SplitSink<Framed<AnyStream, FrameCodec>, Frame>,
    mut write_rx: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = write_rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            inner.mark_closed(&e);
            return;
        }
    }
    // Channel closed: the connection was dropped or explicitly closed.
    let _ = sink.close().await;
}

async fn read_loop(
    inner: Arc<ConnectionInner>,
    mut source: futures::stream::SplitStream<Framed<AnyStream, FrameCodec>>,
) {
    loop {
        match source.next().await {
            Some(Ok(frame)) => {
                let stream = frame.stream;
                let decoded = Response::decode(&frame);
                if stream < 0 {
                    // Server push (EVENT frames ride stream -1).
                    match decoded {
                        Ok((Response::Event(event), _)) => {
                            let _ = inner.event_tx.send(event);
                        }
                        Ok((other, _)) => {
                            warn!(
                                "Ignoring non-event response on stream {} from {}: {:?}",
                                stream, inner.addr, other
                            );
                        }
                        Err(e) => {
                            inner.mark_closed(&e);
                            return;
                        }
                    }
                    continue;
                }

                let sender = {
                    let mut pending = inner.pending.lock();
                    let sender = pending.callbacks.remove(&stream);
                    if sender.is_some() {
                        pending.ids.release(stream);
                    }
                    sender
                };
                match sender {
                    Some(sender) => {
                        let _ = sender.send(decoded);
                    }
                    None => {
                        trace!(
                            "Dropping response for released stream {} from {}",
                            stream, inner.addr
                        );
                    }
                }
            }
            Some(Err(e)) => {
                // Malformed frame or transport failure: fatal to the connection.
                inner.mark_closed(&e);
                return;
            }
            None => {
                inner.mark_closed(&ZirconError::ConnectionClosed);
                return;
            }
        }
    }
}

/// Sends OPTIONS after `interval` of send-side silence; an unanswered probe
/// within the same interval closes the connection as dead.
async fn heartbeat_loop(connection: Connection, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if connection.is_closed() {
            return;
        }
        if connection.inner.millis_since_last_write() < interval.as_millis() as u64 {
            continue;
        }
        trace!("Sending heartbeat to {}", connection.addr());
        match tokio::time::timeout(interval, connection.send(&Request::Options)).await {
            Ok(Ok(_)) => {}
            Ok(Err(ZirconError::ConnectionClosed)) => return,
            Ok(Err(e)) => {
                warn!("Heartbeat to {} failed: {}", connection.addr(), e);
                connection
                    .inner
                    .mark_closed(&ZirconError::Protocol("Heartbeat failure".into()));
                return;
            }
            Err(_) => {
                warn!("Heartbeat to {} timed out; closing connection", connection.addr());
                connection
                    .inner
                    .mark_closed(&ZirconError::Protocol("Heartbeat timed out".into()));
                return;
            }
        }
    }
}
