//! The IRC message value type and its renderer.
//!
//! See RFC 1459 section 2.3.1:
//!
//! ```text
//! <message>  = ['@' <tags> <SPACE>] [':' <prefix> <SPACE>] <command> <params> <crlf>
//! <command>  = <letter> { <letter> } | <number> <number> <number>
//! <params>   = <SPACE> [ ':' <trailing> | <middle> <params> ]
//! <middle>   = non-empty, no SPACE/NUL/CR/LF, first octet not ':'
//! <trailing> = possibly empty, no NUL/CR/LF
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::buffer::LineBuffer;
use crate::limits::MAX_MSG_PARAMS;
use crate::pool::{Pooled, Scrub, BUFFERS};

/// IRCv3 tag mapping. Ordered so renders are deterministic.
pub type TagMap = BTreeMap<String, String>;

/// One parsed or constructed IRC message.
///
/// Either `command` or `code` identifies the message; when both are set the
/// numeric wins at render time. Numeric replies render zero-padded to three
/// digits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags.
    pub tags: TagMap,
    /// Message source (server name or user hostmask); empty for none.
    pub source: String,
    /// Uppercase command token.
    pub command: String,
    /// Numeric reply code; zero for none.
    pub code: u16,
    /// Middle parameters, at most fifteen render.
    pub params: Vec<String>,
    /// Trailing segment; may contain spaces.
    pub trailing: String,
}

impl Message {
    /// Render into a pooled buffer, CRLF terminated. Rendering never fails.
    pub fn render_buffer(&self) -> Pooled<LineBuffer> {
        let mut buf = BUFFERS.acquire();
        self.render_into(&mut buf);
        buf
    }

    /// Render into an existing buffer without clearing it first.
    pub fn render_into(&self, buf: &mut LineBuffer) {
        if !self.tags.is_empty() {
            buf.push_byte(b'@');
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    buf.push_byte(b';');
                }
                buf.push_str(key);
                if !value.is_empty() {
                    buf.push_byte(b'=');
                    crate::tags::escape_value_into(buf, value);
                }
            }
            buf.push_byte(b' ');
        }

        if !self.source.is_empty() {
            buf.push_byte(b':');
            buf.push_str(&self.source);
            buf.push_byte(b' ');
        }

        if self.code > 0 {
            push_code(buf, self.code);
        } else {
            buf.push_str(&self.command);
        }

        for param in self.params.iter().take(MAX_MSG_PARAMS) {
            buf.push_byte(b' ');
            buf.push_str(param);
        }

        if !self.trailing.is_empty() {
            buf.push_slice(b" :");
            buf.push_str(&self.trailing);
        }

        buf.push_slice(b"\r\n");
    }

    /// Render to an owned string.
    pub fn render(&self) -> String {
        let mut buf = LineBuffer::default();
        self.render_into(&mut buf);
        buf.as_text().into_owned()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Scrub for Message {
    fn scrub(&mut self) {
        self.tags.clear();
        self.source.clear();
        self.command.clear();
        self.code = 0;
        self.params.clear();
        self.trailing.clear();
    }
}

/// Zero-padded three-digit numeric, avoiding a format! allocation.
fn push_code(buf: &mut LineBuffer, code: u16) {
    buf.push_byte(b'0' + (code / 100 % 10) as u8);
    buf.push_byte(b'0' + (code / 10 % 10) as u8);
    buf.push_byte(b'0' + (code % 10) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::PRIVMSG;
    use crate::numeric::RPL_WELCOME;

    #[test]
    fn renders_numeric_reply() {
        let msg = Message {
            source: "irc.someserver.net".into(),
            code: RPL_WELCOME,
            params: vec!["nick1!someuser@irc.somehost.org".into()],
            trailing: "Welcome to the server".into(),
            ..Message::default()
        };
        assert_eq!(
            msg.render(),
            ":irc.someserver.net 001 nick1!someuser@irc.somehost.org :Welcome to the server\r\n"
        );
    }

    #[test]
    fn renders_command_message() {
        let msg = Message {
            source: "nick1!someuser@irc.somehost.org".into(),
            command: PRIVMSG.into(),
            params: vec!["#somechannel".into()],
            trailing: "I am the client".into(),
            ..Message::default()
        };
        assert_eq!(
            msg.render(),
            ":nick1!someuser@irc.somehost.org PRIVMSG #somechannel :I am the client\r\n"
        );
    }

    #[test]
    fn numeric_wins_over_command() {
        let msg = Message {
            source: "irc.someserver.net".into(),
            command: "NOTICE".into(),
            code: RPL_WELCOME,
            params: vec!["nick".into()],
            trailing: "hello".into(),
            ..Message::default()
        };
        assert!(msg.render().starts_with(":irc.someserver.net 001 nick"));
    }

    #[test]
    fn display_matches_render() {
        let msg = Message {
            command: "PING".into(),
            trailing: "token".into(),
            ..Message::default()
        };
        assert_eq!(msg.to_string(), msg.render());
        assert_eq!(msg.to_string(), "PING :token\r\n");
    }

    #[test]
    fn renders_tags_with_escaped_values() {
        let mut msg = Message {
            command: "PRIVMSG".into(),
            params: vec!["#chan".into()],
            trailing: "hi".into(),
            ..Message::default()
        };
        msg.tags.insert("note".into(), "a b;c".into());
        msg.tags.insert("msgid".into(), "xyz".into());
        assert_eq!(
            msg.render(),
            "@msgid=xyz;note=a\\sb\\:c PRIVMSG #chan :hi\r\n"
        );
    }

    #[test]
    fn clamps_params_to_fifteen() {
        let msg = Message {
            command: "FOO".into(),
            params: (1..=16).map(|n| n.to_string()).collect(),
            ..Message::default()
        };
        let line = msg.render();
        assert!(line.contains(" 15"));
        assert!(!line.contains(" 16"));
    }
}
