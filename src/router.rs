//! Command routing with middleware chains.
//!
//! Commands map to an immutable ordered chain of handlers. Middleware
//! registered through [`Router::apply`] applies to every subsequently
//! registered command; [`Router::group`] scopes extra middleware to a set
//! of commands. Handlers communicate termination only through the
//! [`MessageContext`] flags; they never return values.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ember_proto::{Message, Pooled};
use tracing::{debug, warn};

use crate::connection::Conn;

/// Transient context handed down a handler chain for one message.
pub struct MessageContext {
    /// The connection the message arrived on.
    pub conn: Arc<Conn>,
    /// The parsed message; recycled when the context drops.
    pub msg: Pooled<Message>,
    handler: &'static str,
    handled: bool,
    abort: bool,
    err: Option<anyhow::Error>,
}

impl MessageContext {
    /// Name of the handler currently executing, for diagnostics.
    pub fn handler_name(&self) -> &'static str {
        self.handler
    }

    /// Mark the message fully handled; the chain stops normally.
    pub fn set_handled(&mut self) {
        self.handled = true;
    }

    /// Stop the chain and have the router log the error.
    pub fn abort_with_error(&mut self, err: impl Into<anyhow::Error>) {
        self.abort = true;
        self.err = Some(err.into());
    }
}

/// A single step in a command's handler chain.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process the message, signalling through the context flags.
    async fn handle(&self, ctx: &mut MessageContext);

    /// Diagnostic name; defaults to the implementing type.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

type Chain = Arc<[Arc<dyn MessageHandler>]>;

/// Maps command tokens to handler chains.
#[derive(Default)]
pub struct Router {
    chains: HashMap<String, Chain>,
    pre: Vec<Arc<dyn MessageHandler>>,
    allow_unregistered: HashSet<&'static str>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Append middleware to the root pre-chain. Applies to every command
    /// registered afterwards.
    pub fn apply(&mut self, middleware: Vec<Arc<dyn MessageHandler>>) {
        self.pre.extend(middleware);
    }

    /// Create a child group whose pre-chain is the root pre-chain followed
    /// by `middleware`.
    pub fn group(&mut self, middleware: Vec<Arc<dyn MessageHandler>>) -> RouterGroup<'_> {
        let mut pre = self.pre.clone();
        pre.extend(middleware);
        RouterGroup { router: self, pre }
    }

    /// Register `command` with the root pre-chain followed by `handlers`.
    ///
    /// Panics on an empty command, an empty handler list, or a command
    /// registered twice: all are programming errors in server wiring.
    pub fn handle(&mut self, command: &str, handlers: Vec<Arc<dyn MessageHandler>>) {
        if handlers.is_empty() {
            panic!("there must be at least one handler");
        }
        let chain: Vec<Arc<dyn MessageHandler>> =
            self.pre.iter().cloned().chain(handlers).collect();
        self.add(command, chain);
    }

    /// Commands permitted before registration completes.
    pub fn allow_unregistered(&mut self, commands: &[&'static str]) {
        self.allow_unregistered.extend(commands);
    }

    fn add(&mut self, command: &str, chain: Vec<Arc<dyn MessageHandler>>) {
        if command.is_empty() {
            panic!("command must not be an empty string");
        }
        if chain.is_empty() {
            panic!("there must be at least one handler");
        }
        if self.chains.contains_key(command) {
            panic!("handler(s) already registered for command: {command}");
        }
        self.chains.insert(command.to_owned(), chain.into());
    }

    /// Route a parsed message to its handler chain.
    ///
    /// Unknown commands get numeric 421; commands outside the allow-set on
    /// an unregistered connection get numeric 451. The message recycles
    /// when the dispatch context drops.
    pub async fn dispatch(&self, conn: Arc<Conn>, msg: Pooled<Message>) {
        let Some(chain) = self.chains.get(&msg.command) else {
            warn!(command = %msg.command, "command not implemented");
            conn.reply_not_implemented(&msg.command).await;
            return;
        };

        if !conn.is_registered() && !self.allow_unregistered.contains(msg.command.as_str()) {
            conn.reply_not_registered().await;
            return;
        }

        let command = msg.command.clone();
        let mut ctx = MessageContext {
            conn,
            msg,
            handler: "",
            handled: false,
            abort: false,
            err: None,
        };

        for handler in chain.iter() {
            ctx.handler = handler.name();
            handler.handle(&mut ctx).await;

            if ctx.handled {
                return;
            }
            if let Some(err) = ctx.err.take() {
                warn!(
                    command = %command,
                    handler = ctx.handler,
                    error = %err,
                    "error handling command"
                );
            }
            if ctx.abort && chain.len() > 1 {
                debug!(command = %command, handler = ctx.handler, "handler chain aborted");
                return;
            }
        }
    }
}

/// A registration scope sharing a common middleware pre-chain.
pub struct RouterGroup<'r> {
    router: &'r mut Router,
    pre: Vec<Arc<dyn MessageHandler>>,
}

impl RouterGroup<'_> {
    /// Register `command` with this group's pre-chain followed by
    /// `handlers`. Same panics as [`Router::handle`].
    pub fn handle(&mut self, command: &str, handlers: Vec<Arc<dyn MessageHandler>>) {
        if handlers.is_empty() {
            panic!("there must be at least one handler");
        }
        let chain: Vec<Arc<dyn MessageHandler>> =
            self.pre.iter().cloned().chain(handlers).collect();
        self.router.add(command, chain);
    }

    /// Nest a further group, extending this group's pre-chain.
    pub fn group(&mut self, middleware: Vec<Arc<dyn MessageHandler>>) -> RouterGroup<'_> {
        let mut pre = self.pre.clone();
        pre.extend(middleware);
        RouterGroup {
            router: self.router,
            pre,
        }
    }
}
