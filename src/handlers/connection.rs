//! Registration, liveness, and teardown commands.

use std::sync::Arc;

use async_trait::async_trait;
use ember_proto::command as cmd;
use ember_proto::MESSAGES;
use tracing::warn;

use crate::handlers::enough_params;
use crate::replies::{NICK_ALREADY_SET, NICK_IN_USE, USER_ALREADY_SET, USER_IN_USE};
use crate::router::{MessageContext, MessageHandler};
use crate::server::NickError;

/// NICK: pick or change nickname.
///
/// Before registration the nick is simply recorded; afterwards a change
/// renames the nick registry entry and every channel membership under the
/// connection's identity lock, then announces the change.
pub struct NickHandler;

#[async_trait]
impl MessageHandler for NickHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);

        let Some(requested) = ctx.msg.params.first().cloned() else {
            conn.reply_no_nickname_given().await;
            return;
        };

        let current = conn.user().nick();
        if current == requested {
            conn.reply_nickname_in_use(&requested, NICK_ALREADY_SET)
                .await;
            return;
        }

        match conn.server().validate_nick(&requested) {
            Err(NickError::Empty) => {
                conn.reply_no_nickname_given().await;
                return;
            }
            Err(NickError::TooLong) | Err(NickError::Malformed) => {
                conn.reply_erroneous_nickname(&requested).await;
                return;
            }
            Err(NickError::InUse) => {
                conn.reply_nickname_in_use(&requested, NICK_IN_USE).await;
                return;
            }
            Ok(()) => {}
        }

        if !conn.is_registered() {
            conn.user().set_nick(&requested);
            return;
        }

        // Announce with the old identity as source.
        let mut announce = MESSAGES.acquire();
        announce.source = conn.user().hostmask();
        announce.command.push_str(cmd::NICK);
        announce.trailing.push_str(&requested);

        let rename_errors = {
            let _guard = conn.identity_guard();
            conn.server()
                .nicks()
                .rename(current.to_lowercase().as_str(), requested.to_lowercase());
            conn.user().set_nick(&requested);

            let mut errors = Vec::new();
            for channel in conn.channels().values() {
                if let Err(err) = channel.rename_member(&current, &requested) {
                    errors.push(err.to_string());
                }
            }
            errors
        };

        if !rename_errors.is_empty() {
            warn!(
                addr = %conn.remote_addr(),
                errors = %rename_errors.join("; "),
                "errors renaming channel memberships"
            );
        }

        conn.write(announce.render_buffer()).await;
        for channel in conn.channels().values() {
            channel.send(&announce, &requested).await;
        }
    }

    fn name(&self) -> &'static str {
        "NickHandler"
    }
}

/// USER: complete registration with login-name and realname.
pub struct UserHandler;

#[async_trait]
impl MessageHandler for UserHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);

        if !enough_params(&ctx.msg.params, 3) {
            conn.reply_need_more_params(cmd::USER).await;
            return;
        }

        if conn.user().nick().is_empty() {
            conn.reply_no_nickname_given().await;
            return;
        }

        if !conn.user().name().is_empty() {
            conn.reply_already_registered(USER_ALREADY_SET).await;
            return;
        }

        let login = ctx.msg.params[0].clone();
        if conn.server().users().contains(&login.to_lowercase()) {
            conn.reply_already_registered(USER_IN_USE).await;
            return;
        }

        conn.user().set_name(&login);
        conn.user().set_realname(&ctx.msg.trailing);
        conn.user().set_host(&conn.remote_host());
        conn.register_user();

        // With CAP negotiation open, the welcome burst waits for CAP END.
        if !conn.cap_requested() || conn.cap_negotiated() {
            conn.reply_welcome().await;
            conn.reply_isupport().await;
        }
    }

    fn name(&self) -> &'static str {
        "UserHandler"
    }
}

/// CAP: IRCv3 capability negotiation skeleton.
///
/// LS/LIST/REQ are accepted and ignored (no capabilities are advertised
/// yet); END closes negotiation and releases a deferred welcome burst.
pub struct CapHandler;

#[async_trait]
impl MessageHandler for CapHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);

        let Some(sub) = ctx.msg.params.first() else {
            conn.reply_invalid_cap_command(cmd::CAP).await;
            return;
        };
        let sub = sub.to_ascii_uppercase();

        conn.set_cap_requested();

        match sub.as_str() {
            "LS" | "LIST" => {}
            "REQ" => {
                if !enough_params(&ctx.msg.params, 2) && ctx.msg.trailing.is_empty() {
                    conn.reply_need_more_params(cmd::CAP).await;
                }
            }
            "END" => {
                conn.set_cap_negotiated();
                if conn.is_registered() {
                    conn.reply_welcome().await;
                    conn.reply_isupport().await;
                }
            }
            _ => {
                conn.reply_invalid_cap_command(&sub).await;
            }
        }
    }

    fn name(&self) -> &'static str {
        "CapHandler"
    }
}

/// PING: echo the token back as PONG.
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);

        let mut reply = conn.new_reply();
        reply.command.push_str(cmd::PONG);
        reply.params.extend(ctx.msg.params.iter().cloned());
        reply.trailing.push_str(&ctx.msg.trailing);
        conn.write(reply.render_buffer()).await;
    }

    fn name(&self) -> &'static str {
        "PingHandler"
    }
}

/// PONG: record the echoed heartbeat token.
pub struct PongHandler;

#[async_trait]
impl MessageHandler for PongHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);

        if ctx.msg.trailing.is_empty() {
            conn.reply_need_more_params(cmd::PONG).await;
            return;
        }

        conn.record_pong(&ctx.msg.trailing);
    }

    fn name(&self) -> &'static str {
        "PongHandler"
    }
}

/// QUIT: orderly client-initiated close.
pub struct QuitHandler;

#[async_trait]
impl MessageHandler for QuitHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);
        let reason = ctx.msg.trailing.clone();
        conn.do_quit(&reason).await;
    }

    fn name(&self) -> &'static str {
        "QuitHandler"
    }
}
