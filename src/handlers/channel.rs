//! Channel membership commands.

use std::sync::Arc;

use async_trait::async_trait;
use ember_proto::command as cmd;
use ember_proto::limits::{MAX_CHAN_LENGTH, MAX_JOINED_CHANS, MAX_TOPIC_LENGTH};
use ember_proto::MESSAGES;

use crate::channel::Channel;
use crate::router::{MessageContext, MessageHandler};

fn valid_channel_name(name: &str) -> bool {
    (name.starts_with('#') || name.starts_with('!'))
        && name.len() <= MAX_CHAN_LENGTH
        && !name.contains(' ')
}

/// JOIN: enter a channel, creating it on first use.
pub struct JoinHandler;

#[async_trait]
impl MessageHandler for JoinHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);
        let target = ctx.msg.params[0].clone();

        if !valid_channel_name(&target) {
            conn.reply_bad_chan_mask(&target).await;
            return;
        }

        if conn.channels().len() >= MAX_JOINED_CHANS {
            conn.reply_too_many_channels(&target).await;
            return;
        }

        let key = target.to_lowercase();
        let channel = match conn.server().channels().get(&key) {
            Some(channel) => channel,
            None => {
                let channel = Channel::new(&target, conn.user());
                conn.server().channels().insert(key, Arc::clone(&channel));
                channel
            }
        };

        let mut announce = MESSAGES.acquire();
        announce.source = conn.user().hostmask();
        announce.command.push_str(cmd::JOIN);
        announce.params.push(channel.name());

        channel.join(conn.user(), &announce).await;
        conn.channels().insert(channel.name(), Arc::clone(&channel));
        conn.reply_channel_names(&channel).await;
    }

    fn name(&self) -> &'static str {
        "JoinHandler"
    }
}

/// PART: leave a channel, announcing to its members first.
pub struct PartHandler;

#[async_trait]
impl MessageHandler for PartHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);
        let target = ctx.msg.params[0].clone();

        let Some(channel) = conn.server().channels().get(&target.to_lowercase()) else {
            conn.reply_no_such_channel(&target).await;
            return;
        };

        if !channel.members.contains(&conn.user().nick()) {
            conn.reply_not_on_channel(&target).await;
            return;
        }

        let mut announce = MESSAGES.acquire();
        announce.source = conn.user().hostmask();
        announce.command.push_str(cmd::PART);
        announce.params.push(channel.name());
        announce.trailing.push_str(&ctx.msg.trailing);

        channel.part(conn.user(), &announce).await;
        conn.channels().remove(&channel.name());
    }

    fn name(&self) -> &'static str {
        "PartHandler"
    }
}

/// TOPIC: query or set a channel topic.
pub struct TopicHandler;

#[async_trait]
impl MessageHandler for TopicHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        let conn = Arc::clone(&ctx.conn);
        let target = ctx.msg.params[0].clone();

        let Some(channel) = conn.server().channels().get(&target.to_lowercase()) else {
            conn.reply_no_such_channel(&target).await;
            return;
        };

        if ctx.msg.trailing.is_empty() {
            if channel.topic().is_empty() {
                conn.reply_no_topic(&channel).await;
            } else {
                conn.reply_channel_topic(&channel).await;
            }
            return;
        }

        if !channel.members.contains(&conn.user().nick()) {
            conn.reply_not_on_channel(&target).await;
            return;
        }

        let topic = clamp(&ctx.msg.trailing, MAX_TOPIC_LENGTH);
        channel.set_topic(topic);

        let mut announce = MESSAGES.acquire();
        announce.source = conn.user().hostmask();
        announce.command.push_str(cmd::TOPIC);
        announce.params.push(channel.name());
        announce.trailing.push_str(topic);
        channel.send(&announce, "").await;
    }

    fn name(&self) -> &'static str {
        "TopicHandler"
    }
}

/// Truncate to at most `max` bytes on a char boundary.
fn clamp(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_rules() {
        assert!(valid_channel_name("#room"));
        assert!(valid_channel_name("!room"));
        assert!(!valid_channel_name("room"));
        assert!(!valid_channel_name("#room with space"));
        assert!(!valid_channel_name(&format!("#{}", "x".repeat(MAX_CHAN_LENGTH))));
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        assert_eq!(clamp("short", 400), "short");
        assert_eq!(clamp("abcdef", 3), "abc");
        // Multi-byte char straddling the cut is dropped whole.
        assert_eq!(clamp("ab\u{00e9}cd", 3), "ab");
    }
}
