//! Built-in command handlers and router wiring.

mod channel;
mod connection;
mod messaging;

pub use channel::{JoinHandler, PartHandler, TopicHandler};
pub use connection::{
    CapHandler, NickHandler, PingHandler, PongHandler, QuitHandler, UserHandler,
};
pub use messaging::{NoticeHandler, PrivmsgHandler, UserhostHandler};

use std::sync::Arc;

use async_trait::async_trait;
use ember_proto::command as cmd;
use tracing::trace;

use crate::router::{MessageContext, MessageHandler, Router};

/// Commands a connection may issue before registration completes. PASS is
/// allowed through the gate even though no handler exists for it yet; it
/// falls out as an unknown command.
const ALLOWED_DURING_REGISTRATION: &[&str] = &[
    cmd::PING,
    cmd::PONG,
    cmd::CAP,
    cmd::PASS,
    cmd::NICK,
    cmd::USER,
    cmd::QUIT,
];

/// Root middleware: command-level tracing.
pub struct CommandTrace;

#[async_trait]
impl MessageHandler for CommandTrace {
    async fn handle(&self, ctx: &mut MessageContext) {
        trace!(
            addr = %ctx.conn.remote_addr(),
            command = %ctx.msg.command,
            params = ctx.msg.params.len(),
            "dispatching"
        );
    }

    fn name(&self) -> &'static str {
        "CommandTrace"
    }
}

/// Group middleware: reply 461 and finish when a command arrives with too
/// few parameters.
pub struct MinParams(pub usize);

#[async_trait]
impl MessageHandler for MinParams {
    async fn handle(&self, ctx: &mut MessageContext) {
        if ctx.msg.params.len() < self.0 {
            let command = ctx.msg.command.clone();
            ctx.conn.reply_need_more_params(&command).await;
            ctx.set_handled();
        }
    }

    fn name(&self) -> &'static str {
        "MinParams"
    }
}

/// Wire up the built-in command set.
pub(crate) fn build_router() -> Router {
    let mut router = Router::new();
    router.allow_unregistered(ALLOWED_DURING_REGISTRATION);
    router.apply(vec![Arc::new(CommandTrace)]);

    router.handle(cmd::QUIT, vec![Arc::new(QuitHandler)]);
    router.handle(cmd::NICK, vec![Arc::new(NickHandler)]);
    router.handle(cmd::USER, vec![Arc::new(UserHandler)]);
    router.handle(cmd::PING, vec![Arc::new(PingHandler)]);
    router.handle(cmd::PONG, vec![Arc::new(PongHandler)]);
    router.handle(cmd::CAP, vec![Arc::new(CapHandler)]);

    // Everything here takes at least a target parameter.
    let mut targeted = router.group(vec![Arc::new(MinParams(1))]);
    targeted.handle(cmd::JOIN, vec![Arc::new(JoinHandler)]);
    targeted.handle(cmd::PART, vec![Arc::new(PartHandler)]);
    targeted.handle(cmd::TOPIC, vec![Arc::new(TopicHandler)]);
    targeted.handle(cmd::PRIVMSG, vec![Arc::new(PrivmsgHandler)]);
    targeted.handle(cmd::NOTICE, vec![Arc::new(NoticeHandler)]);
    targeted.handle(cmd::USERHOST, vec![Arc::new(UserhostHandler)]);

    router
}

pub(crate) fn enough_params(params: &[String], expected: usize) -> bool {
    params.len() >= expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let _router = build_router();
    }

    #[test]
    fn registration_allowlist_matches_the_gate_set() {
        for command in [
            cmd::PING,
            cmd::PONG,
            cmd::CAP,
            cmd::PASS,
            cmd::NICK,
            cmd::USER,
            cmd::QUIT,
        ] {
            assert!(ALLOWED_DURING_REGISTRATION.contains(&command));
        }
        assert_eq!(ALLOWED_DURING_REGISTRATION.len(), 7);
    }

    #[test]
    fn enough_params_boundary() {
        let params = vec!["a".to_string(), "b".to_string()];
        assert!(enough_params(&params, 2));
        assert!(!enough_params(&params, 3));
    }
}
