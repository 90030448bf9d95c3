//! Chat relay commands.

use std::sync::Arc;

use async_trait::async_trait;

use crate::router::{MessageContext, MessageHandler};

/// Shared body of PRIVMSG and NOTICE.
///
/// Reuses the inbound message: strips surplus parameters, stamps the
/// sender hostmask as source, and relays to the target user or channel.
async fn chat_message(ctx: &mut MessageContext) {
    let conn = Arc::clone(&ctx.conn);

    if ctx.msg.trailing.is_empty() {
        let command = ctx.msg.command.clone();
        conn.reply_need_more_params(&command).await;
        return;
    }

    let target = ctx.msg.params[0].clone();
    let key = target.to_lowercase();

    let target_user = conn.server().nicks().get(&key);
    let target_channel = conn.server().channels().get(&key);

    if target_user.is_none() && target_channel.is_none() {
        conn.reply_no_such_nick(&target).await;
        return;
    }

    ctx.msg.params.truncate(1);
    ctx.msg.source = conn.user().hostmask();

    if let Some(user) = target_user {
        if let Some(target_conn) = user.conn() {
            target_conn.write(ctx.msg.render_buffer()).await;
        }
    } else if let Some(channel) = target_channel {
        channel.send(&ctx.msg, &conn.user().nick()).await;
    }
}

/// PRIVMSG: relay chat to a user or channel.
pub struct PrivmsgHandler;

#[async_trait]
impl MessageHandler for PrivmsgHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        chat_message(ctx).await;
    }

    fn name(&self) -> &'static str {
        "PrivmsgHandler"
    }
}

/// NOTICE: relay like PRIVMSG; semantics differ only client-side.
pub struct NoticeHandler;

#[async_trait]
impl MessageHandler for NoticeHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        chat_message(ctx).await;
    }

    fn name(&self) -> &'static str {
        "NoticeHandler"
    }
}

/// USERHOST: report hostmasks for up to five nicks.
pub struct UserhostHandler;

#[async_trait]
impl MessageHandler for UserhostHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);

        let mut hosts = Vec::new();
        for nick in ctx.msg.params.iter().take(5) {
            let Some(user) = conn.server().nicks().get(&nick.to_lowercase()) else {
                conn.reply_no_such_nick(nick).await;
                return;
            };
            hosts.push(format!("{nick}=+{}", user.hostmask()));
        }

        conn.reply_userhost(&hosts).await;
    }

    fn name(&self) -> &'static str {
        "UserhostHandler"
    }
}
