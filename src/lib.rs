//! emberd - a small multi-client IRC daemon.
//!
//! The server core: per-connection session engine (reader/writer tasks,
//! bounded write queue, heartbeat), command router with middleware chains,
//! shared session registries, and the graceful-shutdown protocol. Wire
//! parsing and rendering live in the `ember-proto` crate.

mod channel;
mod connection;
mod handlers;
mod replies;
mod router;
mod server;
mod shared_map;
mod user;
mod usermode;
mod util;

pub mod config;

pub use channel::Channel;
pub use connection::{Conn, ConnState};
pub use router::{MessageContext, MessageHandler, Router, RouterGroup};
pub use server::{
    with_address, with_graceful_shutdown, with_hostname, with_motd, with_network, with_tls,
    with_welcome, NickError, Server, ServerError, ServerOption,
};
pub use shared_map::SharedMap;
pub use user::User;
pub use usermode::{mode_requirements, umode, ModeReq, Permission};
