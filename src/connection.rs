//! Per-client connection session.
//!
//! Each accepted socket gets two tasks: the reader (which also runs the
//! command handlers) and the writer, which multiplexes the bounded write
//! queue with the heartbeat deadline and cancellation. All socket writes
//! are serialized through the writer mutex, so at most one task touches
//! the write half at any time.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ember_proto::command as cmd;
use ember_proto::limits::MAX_MSG_LENGTH;
use ember_proto::{parse, LineBuffer, Pooled, MESSAGES};
use futures_util::{FutureExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::server::Server;
use crate::shared_map::SharedMap;
use crate::user::User;
use crate::usermode::{umode, Permission};

/// Write queue depth; a full queue blocks `Conn::write` callers.
pub(crate) const WRITE_QUEUE_LENGTH: usize = 10;
/// Idle read deadline.
pub(crate) const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(120);
/// Per-write socket deadline.
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Heartbeat interval; a missed pong on the next tick is fatal.
pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(30);

const PING_TOKEN_LEN: usize = 10;

// The scanner bounds memory; protocol-level length rejection happens in
// parse() so an overlong line costs the message, not the connection.
const SCANNER_MAX_LINE: usize = 64 * 1024;

type SocketReader = Box<dyn AsyncRead + Send + Unpin>;
type SocketWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection lifecycle states. Declared as flag values; treated as a
/// plain enum with Closed terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    New = 1,
    Handshake = 2,
    Connected = 4,
    Closed = 8,
}

impl ConnState {
    fn from_raw(raw: u8) -> ConnState {
        match raw {
            1 => ConnState::New,
            2 => ConnState::Handshake,
            4 => ConnState::Connected,
            _ => ConnState::Closed,
        }
    }
}

#[derive(Default)]
struct PingState {
    last_sent: String,
    last_recv: String,
}

#[derive(Default)]
struct CapState {
    requested: bool,
    negotiated: bool,
}

/// The server side of one IRC connection.
pub struct Conn {
    server: Server,
    user: Arc<User>,
    channels: SharedMap<String, Arc<Channel>>,

    remote: StdMutex<String>,

    write_tx: mpsc::Sender<Pooled<LineBuffer>>,
    write_rx: StdMutex<Option<mpsc::Receiver<Pooled<LineBuffer>>>>,
    writer: Mutex<Option<SocketWriter>>,

    // Low 8 bits: state enum. High bits: unix seconds of last transition.
    state: AtomicU64,
    registered: AtomicBool,
    shutting_down: AtomicBool,
    timeout_forced: AtomicBool,

    cancel: CancellationToken,
    cancel_cause: StdMutex<Option<String>>,

    ping: StdMutex<PingState>,
    heartbeat_deadline: StdMutex<Instant>,
    caps: StdMutex<CapState>,

    // Held for multi-step identity changes (nick rename across registries).
    identity_lock: StdMutex<()>,
}

impl Conn {
    /// Build a connection bound to `server`. The socket arrives later via
    /// [`Conn::serve`].
    pub fn new(server: &Server) -> Arc<Conn> {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_LENGTH);
        let conn = Arc::new(Conn {
            server: server.clone(),
            user: User::new(),
            channels: SharedMap::new(),
            remote: StdMutex::new(String::new()),
            write_tx,
            write_rx: StdMutex::new(Some(write_rx)),
            writer: Mutex::new(None),
            state: AtomicU64::new(ConnState::New as u64),
            registered: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            timeout_forced: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            cancel_cause: StdMutex::new(None),
            ping: StdMutex::new(PingState::default()),
            heartbeat_deadline: StdMutex::new(Instant::now() + PING_INTERVAL),
            caps: StdMutex::new(CapState::default()),
            identity_lock: StdMutex::new(()),
        });
        conn.user.attach_conn(Arc::downgrade(&conn));
        conn
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    /// Channels this user has joined, keyed by display name.
    pub fn channels(&self) -> &SharedMap<String, Arc<Channel>> {
        &self.channels
    }

    /// Remote address string, `ip:port`.
    pub fn remote_addr(&self) -> String {
        self.remote.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remote host without the port.
    pub fn remote_host(&self) -> String {
        let addr = self.remote_addr();
        match addr.rsplit_once(':') {
            Some((host, _)) => host.to_owned(),
            None => addr,
        }
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_raw((self.state.load(Ordering::Acquire) & 0xff) as u8)
    }

    /// Unix seconds of the last state transition; zero before the first.
    pub fn state_timestamp(&self) -> u64 {
        self.state.load(Ordering::Acquire) >> 8
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnState::Closed
    }

    /// Past the handshake phase with a known transition time; eligible for
    /// a graceful shutdown request.
    pub(crate) fn is_quiescent(&self) -> bool {
        !matches!(self.state(), ConnState::New | ConnState::Handshake)
            && self.state_timestamp() != 0
    }

    pub(crate) fn transition(&self, next: ConnState) {
        if self.is_closed() {
            return;
        }
        let word = (unix_now() << 8) | next as u64;
        self.state.store(word, Ordering::Release);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The recorded cancellation cause, if any.
    pub fn cancel_cause(&self) -> Option<String> {
        self.cancel_cause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn cancel_with_cause(&self, cause: &str) {
        {
            let mut slot = self.cancel_cause.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(cause.to_owned());
            }
        }
        self.cancel.cancel();
    }

    pub(crate) fn cap_requested(&self) -> bool {
        self.caps.lock().unwrap_or_else(|e| e.into_inner()).requested
    }

    pub(crate) fn set_cap_requested(&self) {
        self.caps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .requested = true;
    }

    pub(crate) fn cap_negotiated(&self) -> bool {
        self.caps.lock().unwrap_or_else(|e| e.into_inner()).negotiated
    }

    pub(crate) fn set_cap_negotiated(&self) {
        self.caps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .negotiated = true;
    }

    /// Guard for multi-step identity mutations. No awaits may happen while
    /// it is held.
    pub(crate) fn identity_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.identity_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flip to registered and publish the user in both user registries.
    pub(crate) fn register_user(&self) {
        let _guard = self.identity_guard();
        self.registered.store(true, Ordering::Release);
        self.server
            .users()
            .insert(self.user.name().to_lowercase(), Arc::clone(&self.user));
        self.server
            .nicks()
            .insert(self.user.nick().to_lowercase(), Arc::clone(&self.user));
        self.user.add_mode(umode::REGISTERED);
        self.user.set_permission(Permission::User);
    }

    /// Record the trailing token of a client PONG.
    pub(crate) fn record_pong(&self, token: &str) {
        let mut ping = self.ping.lock().unwrap_or_else(|e| e.into_inner());
        ping.last_recv.clear();
        ping.last_recv.push_str(token);
    }

    /// Push the heartbeat deadline out; called on every parsed message.
    pub(crate) fn reset_heartbeat(&self) {
        *self
            .heartbeat_deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now() + PING_INTERVAL;
    }

    fn heartbeat_deadline(&self) -> Instant {
        *self
            .heartbeat_deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a rendered line for the writer task.
    ///
    /// Oversized buffers and writes to a session that is not Connected are
    /// dropped with a log. A full queue blocks the caller: intentional
    /// backpressure for misbehaving chat churn.
    pub async fn write(&self, buffer: Pooled<LineBuffer>) {
        if buffer.len() > MAX_MSG_LENGTH {
            error!(
                addr = %self.remote_addr(),
                len = buffer.len(),
                "dropping outbound message: too long"
            );
            return;
        }

        if self.state() != ConnState::Connected {
            error!(
                addr = %self.remote_addr(),
                state = ?self.state(),
                "dropping outbound message: session not connected"
            );
            return;
        }

        let _ = self.write_tx.send(buffer).await;
    }

    /// Run the session on `stream` until it closes. Spawned by the accept
    /// loop; panics below this point are caught, logged, and converted to
    /// a cancellation plus quit.
    pub async fn serve(self: Arc<Conn>, stream: TcpStream, tls: Option<TlsAcceptor>) {
        let conn = Arc::clone(&self);
        let outcome = std::panic::AssertUnwindSafe(self.serve_inner(stream, tls))
            .catch_unwind()
            .await;

        if let Err(payload) = outcome {
            let cause = panic_message(payload.as_ref());
            error!(
                addr = %conn.remote_addr(),
                cause = %cause,
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "panic serving connection"
            );
            conn.cancel_with_cause(&format!("panic: {cause}"));
            conn.do_quit("Socket Error.").await;
        }

        conn.cleanup().await;
    }

    async fn serve_inner(self: Arc<Conn>, stream: TcpStream, tls: Option<TlsAcceptor>) {
        // Publishing the peer address may block briefly on some platforms;
        // only then can the connection be tracked by address.
        let addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        *self.remote.lock().unwrap_or_else(|e| e.into_inner()) = addr.clone();
        self.server.conns().insert(addr, Arc::clone(&self));

        debug!(addr = %self.remote_addr(), "accepted connection");

        let (read_half, write_half): (SocketReader, SocketWriter) = match tls {
            Some(acceptor) => {
                self.transition(ConnState::Handshake);
                match tokio::time::timeout(KEEPALIVE_TIMEOUT, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => {
                        let (read_half, write_half) = tokio::io::split(tls_stream);
                        (Box::new(read_half), Box::new(write_half))
                    }
                    Ok(Err(err)) => {
                        error!(addr = %self.remote_addr(), error = %err, "TLS handshake error");
                        self.transition(ConnState::Closed);
                        return;
                    }
                    Err(_) => {
                        error!(addr = %self.remote_addr(), "TLS handshake timed out");
                        self.transition(ConnState::Closed);
                        return;
                    }
                }
            }
            None => {
                let (read_half, write_half) = stream.into_split();
                (Box::new(read_half), Box::new(write_half))
            }
        };

        self.transition(ConnState::Connected);

        *self.writer.lock().await = Some(write_half);

        let write_rx = self
            .write_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("write queue receiver taken once");

        let writer_conn = Arc::clone(&self);
        let writer_task = tokio::spawn(async move {
            let conn = Arc::clone(&writer_conn);
            let outcome = std::panic::AssertUnwindSafe(writer_conn.write_loop(write_rx))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                let cause = panic_message(payload.as_ref());
                error!(
                    addr = %conn.remote_addr(),
                    cause = %cause,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "panic in write loop"
                );
                conn.cancel_with_cause(&format!("panic: {cause}"));
                conn.do_quit("Socket Error.").await;
            }
        });

        self.clone().read_loop(read_half).await;
        debug!(addr = %self.remote_addr(), "read loop exited");

        let _ = writer_task.await;
    }

    async fn read_loop(self: Arc<Conn>, read_half: SocketReader) {
        let mut lines = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(SCANNER_MAX_LINE),
        );

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.transition(ConnState::Closed);
                    return;
                }
                next = tokio::time::timeout(KEEPALIVE_TIMEOUT, lines.next()) => next,
            };

            match next {
                // Read deadline fired.
                Err(_) => {
                    let forced = self.timeout_forced.load(Ordering::Acquire);
                    let winding_down =
                        self.shutting_down.load(Ordering::Acquire) || self.is_closed();
                    if !forced || !winding_down {
                        info!(addr = %self.remote_addr(), "connection timed out");
                        self.do_quit("Connection timeout.").await;
                    }
                    self.transition(ConnState::Closed);
                    return;
                }
                Ok(None) => {
                    debug!(addr = %self.remote_addr(), "connection closed by peer");
                    self.cancel_with_cause("connection closed by peer");
                    self.transition(ConnState::Closed);
                    return;
                }
                Ok(Some(Err(err))) => {
                    error!(addr = %self.remote_addr(), error = %err, "read error");
                    self.cancel_with_cause(&err.to_string());
                    self.transition(ConnState::Closed);
                    return;
                }
                Ok(Some(Ok(line))) => {
                    debug!(addr = %self.remote_addr(), line = %line, "recv");
                    let msg = match parse(&line) {
                        Ok(msg) => msg,
                        Err(err) => {
                            warn!(
                                addr = %self.remote_addr(),
                                error = %err,
                                "error parsing message"
                            );
                            continue;
                        }
                    };

                    self.reset_heartbeat();
                    let router = self.server.router();
                    router.dispatch(Arc::clone(&self), msg).await;
                }
            }
        }
    }

    async fn write_loop(self: Arc<Conn>, mut write_rx: mpsc::Receiver<Pooled<LineBuffer>>) {
        loop {
            let deadline = self.heartbeat_deadline();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(addr = %self.remote_addr(), "cancel received in write loop");
                    self.transition(ConnState::Closed);
                    self.force_timeout();
                    return;
                }
                received = write_rx.recv() => match received {
                    Some(buffer) => self.transmit(buffer).await,
                    None => return,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    // The reader may have pushed the deadline out while we
                    // slept; only a still-expired deadline is a real tick.
                    if Instant::now() >= self.heartbeat_deadline() {
                        self.do_heartbeat().await;
                    }
                }
            }
        }
    }

    async fn transmit(&self, buffer: Pooled<LineBuffer>) {
        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else { return };
            tokio::time::timeout(WRITE_TIMEOUT, async {
                writer.write_all(&buffer).await?;
                writer.flush().await
            })
            .await
        };

        match result {
            Ok(Ok(())) => {
                debug!(
                    addr = %self.remote_addr(),
                    line = %self.trimmed(&buffer),
                    "send"
                );
            }
            Ok(Err(err)) => {
                error!(addr = %self.remote_addr(), error = %err, "error writing to socket");
                self.transition(ConnState::Closed);
                self.do_quit("Socket Error.").await;
            }
            Err(_) => {
                error!(addr = %self.remote_addr(), "write timed out");
                self.transition(ConnState::Closed);
                self.do_quit("Socket Error.").await;
            }
        }
    }

    fn trimmed<'b>(&self, buffer: &'b Pooled<LineBuffer>) -> std::borrow::Cow<'b, str> {
        match buffer.as_text() {
            std::borrow::Cow::Borrowed(s) => std::borrow::Cow::Borrowed(s.trim_end()),
            std::borrow::Cow::Owned(s) => std::borrow::Cow::Owned(s.trim_end().to_owned()),
        }
    }

    /// Best-effort direct write bypassing the queue; used for the final
    /// ERROR line during quit. Serialized by the same writer mutex.
    async fn write_direct(&self, buffer: Pooled<LineBuffer>) {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else { return };
        let _ = tokio::time::timeout(WRITE_TIMEOUT, async {
            writer.write_all(&buffer).await?;
            writer.flush().await
        })
        .await;
    }

    fn next_heartbeat_token(&self) -> Option<String> {
        let mut ping = self.ping.lock().unwrap_or_else(|e| e.into_inner());
        if ping.last_recv != ping.last_sent {
            debug!(
                addr = %self.remote_addr(),
                sent = %ping.last_sent,
                recv = %ping.last_recv,
                "ping timeout"
            );
            return None;
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PING_TOKEN_LEN)
            .map(char::from)
            .collect();
        ping.last_sent.clear();
        ping.last_sent.push_str(&token);
        Some(token)
    }

    async fn do_heartbeat(&self) {
        let Some(token) = self.next_heartbeat_token() else {
            self.cancel_with_cause("heartbeat timeout");
            self.do_quit("Connection timeout.").await;
            return;
        };

        self.reset_heartbeat();

        let mut msg = MESSAGES.acquire();
        msg.command.push_str(cmd::PING);
        msg.trailing.push_str(&token);

        // The writer must never block on its own queue; a PING that cannot
        // be queued is dropped and the next tick retries.
        if self.write_tx.try_send(msg.render_buffer()).is_err() {
            debug!(addr = %self.remote_addr(), "write queue full, skipping PING");
        }
    }

    /// Orderly close: final ERROR line, QUIT broadcast to joined channels,
    /// cancellation with the reason as cause.
    pub async fn do_quit(&self, reason: &str) {
        let reason = if reason.is_empty() {
            "Client issued QUIT command."
        } else {
            reason
        };
        self.terminate(reason, &format!("Quit: {reason}")).await;
    }

    /// Operator-initiated close; same shape as quit with kill phrasing.
    pub async fn do_kill(&self, reason: &str, source: &str) {
        let phrase = format!("Killed: {source} [{reason}]");
        self.terminate(&phrase, &phrase).await;
    }

    /// Server-initiated orderly close during graceful shutdown.
    pub async fn shutdown(&self) {
        self.do_quit("Server shutting down.").await;
    }

    async fn terminate(&self, broadcast_reason: &str, wire_phrase: &str) {
        if !self.is_closed() && !self.shutting_down.swap(true, Ordering::AcqRel) {
            let mut msg = MESSAGES.acquire();
            msg.command.push_str(cmd::ERROR);
            msg.trailing = format!("Closing link: {} [{}]", self.remote_host(), wire_phrase);
            self.write_direct(msg.render_buffer()).await;
        }

        if self.is_registered() && !self.channels.is_empty() {
            let mut msg = MESSAGES.acquire();
            msg.source = self.user.hostmask();
            msg.command.push_str(cmd::QUIT);
            msg.trailing.push_str(broadcast_reason);

            let nick = self.user.nick();
            let mut errors = Vec::new();
            for channel in self.channels.values() {
                if let Err(err) = channel.remove_member(&nick) {
                    errors.push(err.to_string());
                }
                channel.send(&msg, "").await;
            }
            self.channels.clear();

            if !errors.is_empty() {
                warn!(
                    addr = %self.remote_addr(),
                    errors = %errors.join("; "),
                    "errors removing user from channels"
                );
            }
        }

        self.cancel_with_cause(broadcast_reason);
    }

    /// Mark the read deadline as deliberately forced so the reader skips
    /// the timeout quit during shutdown.
    fn force_timeout(&self) {
        self.timeout_forced.store(true, Ordering::Release);
    }

    async fn cleanup(&self) {
        self.server
            .users()
            .remove(&self.user.name().to_lowercase());
        self.server
            .nicks()
            .remove(&self.user.nick().to_lowercase());
        self.server.conns().remove(&self.remote_addr());

        // Dropping the write half closes the socket; the read half died
        // with the reader.
        self.writer.lock().await.take();
    }

    #[cfg(test)]
    pub(crate) fn mark_registered_for_tests(&self) {
        self.registered.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn take_write_rx(&self) -> mpsc::Receiver<Pooled<LineBuffer>> {
        self.write_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("write queue receiver present")
    }

    #[cfg(test)]
    pub(crate) fn last_ping_sent(&self) -> String {
        self.ping
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_sent
            .clone()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_proto::BUFFERS;

    fn new_conn() -> Arc<Conn> {
        let server = Server::new(Vec::new()).expect("server options");
        Conn::new(&server)
    }

    #[test]
    fn state_word_packs_enum_and_timestamp() {
        let conn = new_conn();
        assert_eq!(conn.state(), ConnState::New);
        assert_eq!(conn.state_timestamp(), 0);

        conn.transition(ConnState::Connected);
        assert_eq!(conn.state(), ConnState::Connected);
        assert!(conn.state_timestamp() > 0);
    }

    #[test]
    fn closed_is_terminal() {
        let conn = new_conn();
        conn.transition(ConnState::Closed);
        conn.transition(ConnState::Connected);
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[test]
    fn quiescence_requires_leaving_handshake() {
        let conn = new_conn();
        assert!(!conn.is_quiescent());

        conn.transition(ConnState::Handshake);
        assert!(!conn.is_quiescent());

        conn.transition(ConnState::Connected);
        assert!(conn.is_quiescent());

        let closed = new_conn();
        closed.transition(ConnState::Closed);
        assert!(closed.is_quiescent());
    }

    #[tokio::test]
    async fn heartbeat_sends_ping_then_times_out_without_pong() {
        let conn = new_conn();
        let mut rx = conn.take_write_rx();

        conn.do_heartbeat().await;
        let token = conn.last_ping_sent();
        assert_eq!(token.len(), PING_TOKEN_LEN);

        let line = rx.recv().await.expect("queued PING");
        assert_eq!(line.as_text(), format!("PING :{token}\r\n"));

        // No PONG recorded: the next tick is fatal.
        conn.do_heartbeat().await;
        assert!(conn.is_cancelled());
        assert_eq!(conn.cancel_cause().as_deref(), Some("heartbeat timeout"));
    }

    #[tokio::test]
    async fn matching_pong_keeps_the_session_alive() {
        let conn = new_conn();
        let mut rx = conn.take_write_rx();

        conn.do_heartbeat().await;
        let token = conn.last_ping_sent();
        conn.record_pong(&token);

        conn.do_heartbeat().await;
        assert!(!conn.is_cancelled());
        assert_ne!(conn.last_ping_sent(), token);

        // Both PINGs made it to the queue.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn write_drops_oversized_buffers() {
        let conn = new_conn();
        let mut rx = conn.take_write_rx();
        conn.transition(ConnState::Connected);

        let mut big = BUFFERS.acquire();
        for _ in 0..(MAX_MSG_LENGTH + 1) {
            big.push_byte(b'x');
        }
        conn.write(big).await;

        let mut ok = BUFFERS.acquire();
        ok.push_str("PING :ok\r\n");
        conn.write(ok).await;

        let first = rx.recv().await.expect("one message queued");
        assert_eq!(first.as_text(), "PING :ok\r\n");
    }

    #[tokio::test]
    async fn write_requires_connected_state() {
        let conn = new_conn();
        let _rx = conn.take_write_rx();

        let mut buf = BUFFERS.acquire();
        buf.push_str("PING :dropped\r\n");
        conn.write(buf).await;

        // Queue stayed empty: capacity is fully available.
        assert_eq!(conn.write_tx.capacity(), WRITE_QUEUE_LENGTH);
    }

    #[tokio::test]
    async fn eleventh_write_blocks_until_a_slot_frees() {
        let conn = new_conn();
        let mut rx = conn.take_write_rx();
        conn.transition(ConnState::Connected);

        for n in 0..WRITE_QUEUE_LENGTH {
            let mut buf = BUFFERS.acquire();
            buf.push_str(&format!("NOTICE * :{n}\r\n"));
            conn.write(buf).await;
        }

        let blocked = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let mut buf = BUFFERS.acquire();
                buf.push_str("NOTICE * :blocked\r\n");
                conn.write(buf).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        // Draining one slot unblocks the pending writer.
        assert!(rx.recv().await.is_some());
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("write unblocked")
            .expect("write task");
    }
}
