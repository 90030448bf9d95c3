//! Server state: configuration options, listeners, registries, shutdown.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, RwLock};
use std::time::Duration;

use ember_proto::limits::{
    MAX_AWAY_LENGTH, MAX_CHAN_LENGTH, MAX_JOINED_CHANS, MAX_KICK_LENGTH, MAX_LIST_ITEMS,
    MAX_MODE_CHANGE, MAX_MSG_PARAMS, MAX_NICK_LENGTH, MAX_TOPIC_LENGTH,
};
use ember_proto::pool::MESSAGE_POOL_MAX;
use ember_proto::MESSAGES;
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_rustls::rustls::ServerConfig as TlsConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::connection::Conn;
use crate::handlers;
use crate::router::Router;
use crate::shared_map::SharedMap;
use crate::user::User;

const DEFAULT_ADDRESS: &str = "localhost:6697";

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

const SHUTDOWN_POLL_INITIAL: Duration = Duration::from_millis(1);
const SHUTDOWN_POLL_MAX: Duration = Duration::from_millis(500);

/// Server-level errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Returned by the accept loops once shutdown begins.
    #[error("irc: server closed")]
    Closed,

    /// Graceful shutdown gave up with connections still live.
    #[error("shutdown cancelled with {0} connections still active")]
    ShutdownCancelled(usize),

    /// Joined errors from applying the constructor options.
    #[error("invalid server options: {0}")]
    Options(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Nickname validation failures, mapped to numerics by the NICK handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NickError {
    #[error("no nickname given")]
    Empty,
    #[error("nickname is too long")]
    TooLong,
    #[error("nickname is malformed")]
    Malformed,
    #[error("nickname is in use")]
    InUse,
}

/// Pending configuration mutated by [`ServerOption`] functions.
#[derive(Default)]
pub struct Settings {
    hostname: String,
    network: String,
    address: String,
    motd: String,
    welcome: String,
    tls: Option<TlsAcceptor>,
    graceful: Option<(CancellationToken, Duration)>,
}

/// A configuration option: sets a field or reports why it cannot.
pub type ServerOption = Box<dyn FnOnce(&mut Settings) -> Result<(), String> + Send>;

/// Server host label used as the source of replies.
pub fn with_hostname(hostname: impl Into<String>) -> ServerOption {
    let hostname = hostname.into();
    Box::new(move |s| {
        if hostname.is_empty() {
            return Err("hostname must not be empty".to_owned());
        }
        s.hostname = hostname;
        Ok(())
    })
}

/// Network name advertised through ISUPPORT.
pub fn with_network(network: impl Into<String>) -> ServerOption {
    let network = network.into();
    Box::new(move |s| {
        if network.is_empty() {
            return Err("network must not be empty".to_owned());
        }
        s.network = network;
        Ok(())
    })
}

/// TCP listen address; defaults to `localhost:6697`.
pub fn with_address(address: impl Into<String>) -> ServerOption {
    let address = address.into();
    Box::new(move |s| {
        if address.is_empty() {
            return Err("address must not be empty".to_owned());
        }
        s.address = address;
        Ok(())
    })
}

/// Message of the day sent after registration.
pub fn with_motd(motd: impl Into<String>) -> ServerOption {
    let motd = motd.into();
    Box::new(move |s| {
        s.motd = motd;
        Ok(())
    })
}

/// Welcome text carried by the 001 reply.
pub fn with_welcome(welcome: impl Into<String>) -> ServerOption {
    let welcome = welcome.into();
    Box::new(move |s| {
        s.welcome = welcome;
        Ok(())
    })
}

/// Load a certificate chain and key for the TLS listener.
pub fn with_tls(cert_path: impl Into<String>, key_path: impl Into<String>) -> ServerOption {
    let cert_path = cert_path.into();
    let key_path = key_path.into();
    Box::new(move |s| {
        let acceptor = load_tls(&cert_path, &key_path)
            .map_err(|e| format!("loading TLS keypair: {e}"))?;
        s.tls = Some(acceptor);
        Ok(())
    })
}

/// Install a watcher that, once `source` fires, runs a graceful shutdown
/// bounded by `timeout` and then forcibly closes whatever remains.
pub fn with_graceful_shutdown(source: CancellationToken, timeout: Duration) -> ServerOption {
    Box::new(move |s| {
        s.graceful = Some((source, timeout));
        Ok(())
    })
}

fn load_tls(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, String> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path).map_err(|e| e.to_string())?,
    ))
    .collect::<Result<_, _>>()
    .map_err(|e| e.to_string())?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key_path).map_err(|e| e.to_string())?,
    ))
    .map_err(|e| e.to_string())?
    .ok_or_else(|| "no private key found".to_owned())?;

    let config = TlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| e.to_string())?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

struct Inner {
    hostname: RwLock<String>,
    listen_addr: RwLock<String>,
    motd: RwLock<String>,
    welcome: RwLock<String>,

    support: SharedMap<String, String>,

    users: SharedMap<String, Arc<User>>,
    nicks: SharedMap<String, Arc<User>>,
    conns: SharedMap<String, Arc<Conn>>,
    channels: SharedMap<String, Arc<Channel>>,

    tls: Option<TlsAcceptor>,
    graceful: StdMutex<Option<(CancellationToken, Duration)>>,

    router: OnceLock<Arc<Router>>,

    listeners: StdMutex<HashMap<String, CancellationToken>>,
    active_listeners: AtomicUsize,
    listeners_idle: Notify,
    in_shutdown: AtomicBool,
}

/// An IRC server instance. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    /// Apply `options` and build the server. Option errors are joined; the
    /// constructor never partially succeeds.
    pub fn new(options: Vec<ServerOption>) -> Result<Server, ServerError> {
        let mut settings = Settings::default();
        let mut errors = Vec::new();
        for option in options {
            if let Err(err) = option(&mut settings) {
                errors.push(err);
            }
        }
        if !errors.is_empty() {
            return Err(ServerError::Options(errors.join("; ")));
        }

        let address = if settings.address.is_empty() {
            DEFAULT_ADDRESS.to_owned()
        } else {
            settings.address
        };

        let server = Server {
            inner: Arc::new(Inner {
                hostname: RwLock::new(settings.hostname),
                listen_addr: RwLock::new(address),
                motd: RwLock::new(settings.motd),
                welcome: RwLock::new(settings.welcome),
                support: SharedMap::new(),
                users: SharedMap::new(),
                nicks: SharedMap::new(),
                conns: SharedMap::new(),
                channels: SharedMap::new(),
                tls: settings.tls,
                graceful: StdMutex::new(settings.graceful),
                router: OnceLock::new(),
                listeners: StdMutex::new(HashMap::new()),
                active_listeners: AtomicUsize::new(0),
                listeners_idle: Notify::new(),
                in_shutdown: AtomicBool::new(false),
            }),
        };

        server.set_isupport(&settings.network);
        Ok(server)
    }

    pub fn users(&self) -> &SharedMap<String, Arc<User>> {
        &self.inner.users
    }

    pub fn nicks(&self) -> &SharedMap<String, Arc<User>> {
        &self.inner.nicks
    }

    pub fn conns(&self) -> &SharedMap<String, Arc<Conn>> {
        &self.inner.conns
    }

    pub fn channels(&self) -> &SharedMap<String, Arc<Channel>> {
        &self.inner.channels
    }

    /// Configured hostname, falling back to the listen address.
    pub fn hostname(&self) -> String {
        let hostname = self
            .inner
            .hostname
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if hostname.is_empty() {
            drop(hostname);
            self.address()
        } else {
            hostname.clone()
        }
    }

    pub fn set_hostname(&self, hostname: &str) {
        *self
            .inner
            .hostname
            .write()
            .unwrap_or_else(|e| e.into_inner()) = hostname.to_owned();
    }

    pub fn address(&self) -> String {
        self.inner
            .listen_addr
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn motd(&self) -> String {
        let motd = self.inner.motd.read().unwrap_or_else(|e| e.into_inner());
        if motd.is_empty() {
            "Server has no MOTD message set.".to_owned()
        } else {
            motd.clone()
        }
    }

    pub fn welcome(&self) -> String {
        let welcome = self.inner.welcome.read().unwrap_or_else(|e| e.into_inner());
        if welcome.is_empty() {
            "Server has no welcome message set.".to_owned()
        } else {
            welcome.clone()
        }
    }

    /// Network name from ISUPPORT, falling back to the hostname.
    pub fn network(&self) -> String {
        self.inner
            .support
            .get("network")
            .unwrap_or_else(|| self.hostname())
    }

    pub fn set_network(&self, network: &str) {
        self.inner
            .support
            .insert("network".to_owned(), network.to_owned());
    }

    fn set_isupport(&self, network: &str) {
        let support = &self.inner.support;
        support.insert("chanmodes".into(), "bhoOv,p,LMT,AacEeFHIimNnPqRrstV".into());
        support.insert("prefix".into(), "(Oohv)~@%+".into());
        support.insert("maxpara".into(), MAX_MSG_PARAMS.to_string());
        support.insert("modes".into(), MAX_MODE_CHANGE.to_string());
        support.insert("chanlimit".into(), format!("#!:{MAX_JOINED_CHANS}"));
        support.insert("nicklen".into(), MAX_NICK_LENGTH.to_string());
        support.insert("maxlist".into(), format!("bhov:{MAX_LIST_ITEMS},O:1"));
        support.insert("casemapping".into(), "ascii".into());
        support.insert("topiclen".into(), MAX_TOPIC_LENGTH.to_string());
        support.insert("kicklen".into(), MAX_KICK_LENGTH.to_string());
        support.insert("chanlen".into(), MAX_CHAN_LENGTH.to_string());
        support.insert("awaylen".into(), MAX_AWAY_LENGTH.to_string());
        if !network.is_empty() {
            support.insert("network".into(), network.to_owned());
        }
    }

    /// `KEY=VALUE` ISUPPORT tokens, uppercase keys, sorted for stable
    /// output.
    pub fn isupport_tokens(&self) -> Vec<String> {
        let mut keys = self.inner.support.keys();
        keys.sort();

        keys.into_iter()
            .filter_map(|key| {
                let value = self.inner.support.get(&key)?;
                if value.is_empty() {
                    Some(key.to_uppercase())
                } else {
                    Some(format!("{}={value}", key.to_uppercase()))
                }
            })
            .collect()
    }

    /// The TLS acceptor installed by [`with_tls`], if any.
    pub fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        self.inner.tls.clone()
    }

    /// Validate a requested nickname against format rules and the nick
    /// registry.
    pub fn validate_nick(&self, nick: &str) -> Result<(), NickError> {
        if nick.is_empty() {
            return Err(NickError::Empty);
        }
        if nick.len() > MAX_NICK_LENGTH {
            return Err(NickError::TooLong);
        }
        if nick.starts_with('#') || nick.starts_with(':') || nick.contains(' ') {
            return Err(NickError::Malformed);
        }
        if self.inner.nicks.contains(&nick.to_lowercase()) {
            return Err(NickError::InUse);
        }
        Ok(())
    }

    /// First-use initialization: handlers, pool warmup, the graceful
    /// shutdown watcher.
    fn warmup(&self) {
        self.inner.router.get_or_init(|| {
            info!("registering message handlers");
            let router = handlers::build_router();

            info!("warming up message pool");
            MESSAGES.warmup(MESSAGE_POOL_MAX);

            if let Some((source, timeout)) = self
                .inner
                .graceful
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                spawn_graceful_watcher(self.clone(), source, timeout);
            }

            Arc::new(router)
        });
    }

    pub(crate) fn router(&self) -> Arc<Router> {
        self.warmup();
        Arc::clone(self.inner.router.get().expect("router initialized"))
    }

    /// Bind the configured address and serve plain TCP connections.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        self.warmup();
        let listener = TcpListener::bind(self.address()).await?;
        self.serve(listener, None).await
    }

    /// Bind the configured address and serve TLS connections using the
    /// acceptor installed by [`with_tls`].
    pub async fn listen_and_serve_tls(&self) -> Result<(), ServerError> {
        self.warmup();
        let Some(acceptor) = self.inner.tls.clone() else {
            return Err(ServerError::Options(
                "no TLS configuration installed".to_owned(),
            ));
        };
        let listener = TcpListener::bind(self.address()).await?;
        self.serve(listener, Some(acceptor)).await
    }

    /// Accept connections on `listener` until it fails fatally or the
    /// server shuts down.
    pub async fn serve(
        &self,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    ) -> Result<(), ServerError> {
        self.warmup();

        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let cancel = self.register_listener(&local)?;

        info!(addr = %local, tls = tls.is_some(), "listening");
        let result = self.accept_loop(&listener, tls, &cancel).await;
        self.deregister_listener(&local);
        result
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        tls: Option<TlsAcceptor>,
        cancel: &CancellationToken,
    ) -> Result<(), ServerError> {
        let mut delay = Duration::ZERO;

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => return Err(ServerError::Closed),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    delay = Duration::ZERO;
                    let conn = Conn::new(self);
                    tokio::spawn(conn.serve(stream, tls.clone()));
                }
                Err(err) if is_temporary(&err) => {
                    delay = if delay.is_zero() {
                        ACCEPT_BACKOFF_INITIAL
                    } else {
                        (delay * 2).min(ACCEPT_BACKOFF_MAX)
                    };
                    warn!(
                        error = %err,
                        retry_ms = delay.as_millis() as u64,
                        "error accepting connection"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn register_listener(&self, addr: &str) -> Result<CancellationToken, ServerError> {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.inner.in_shutdown.load(Ordering::Acquire) {
            return Err(ServerError::Closed);
        }
        let token = CancellationToken::new();
        listeners.insert(addr.to_owned(), token.clone());
        self.inner.active_listeners.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    fn deregister_listener(&self, addr: &str) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(addr);
        self.inner.active_listeners.fetch_sub(1, Ordering::SeqCst);
        self.inner.listeners_idle.notify_waiters();
    }

    async fn close_listeners(&self) {
        self.inner.in_shutdown.store(true, Ordering::Release);

        let tokens: Vec<CancellationToken> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for token in tokens {
            token.cancel();
        }

        loop {
            let idle = self.inner.listeners_idle.notified();
            if self.inner.active_listeners.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }
    }

    /// Graceful shutdown: stop listeners, then drain connections by asking
    /// quiescent ones to shut down, polling at an adaptive, jittered
    /// interval. Errors out when `ctx` fires first.
    pub async fn shutdown(&self, ctx: CancellationToken) -> Result<(), ServerError> {
        info!("shutting down: closing listeners");
        self.close_listeners().await;

        let mut interval = SHUTDOWN_POLL_INITIAL;
        loop {
            for conn in self.inner.conns.values() {
                if conn.is_quiescent() {
                    conn.shutdown().await;
                    self.inner.conns.remove(&conn.remote_addr());
                }
            }

            if self.inner.conns.is_empty() {
                info!("shutdown complete");
                return Ok(());
            }

            let jitter = interval.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(ServerError::ShutdownCancelled(self.inner.conns.len()));
                }
                _ = tokio::time::sleep(interval + jitter) => {}
            }
            interval = (interval * 2).min(SHUTDOWN_POLL_MAX);
        }
    }

    /// Immediate shutdown: stop listeners and cancel every remaining
    /// connection.
    pub async fn close(&self) {
        info!("forcibly closing server");
        self.close_listeners().await;
        for conn in self.inner.conns.values() {
            conn.cancel_with_cause("server forcibly closed");
        }
    }
}

fn spawn_graceful_watcher(server: Server, source: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        source.cancelled().await;
        info!(timeout_secs = timeout.as_secs(), "graceful shutdown requested");

        let deadline = CancellationToken::new();
        {
            let deadline = deadline.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            });
        }

        if let Err(err) = server.shutdown(deadline).await {
            warn!(error = %err, "graceful shutdown incomplete, closing");
            server.close().await;
        }
    });
}

/// Accept errors worth retrying with backoff rather than giving up on the
/// listener.
fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(err.raw_os_error(), Some(libc_emfile) if libc_emfile == 23 || libc_emfile == 24)
}
