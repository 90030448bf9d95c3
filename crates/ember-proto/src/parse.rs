//! Wire line parsing.

use crate::error::ParseError;
use crate::limits::{MAX_MSG_LENGTH, MAX_MSG_PARAMS, MAX_TAGS_LENGTH};
use crate::message::Message;
use crate::pool::{Pooled, MESSAGES};

/// Parse one physical line (terminator already stripped by the scanner)
/// into a pooled [`Message`].
///
/// Lines that are too short, too long, all whitespace, source-prefixed, or
/// carry more than fifteen middle parameters are rejected. The acquired
/// message recycles through its guard on every error path.
pub fn parse(line: &str) -> Result<Pooled<Message>, ParseError> {
    if line.len() < 4 {
        return Err(ParseError::TooShort);
    }

    if line.len() > MAX_TAGS_LENGTH + MAX_MSG_LENGTH {
        return Err(ParseError::TooLong);
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Whitespace);
    }

    if trimmed.starts_with(':') {
        return Err(ParseError::Prefixed);
    }

    let mut msg = MESSAGES.acquire();

    let mut rest = trimmed;
    if let Some(tagged) = rest.strip_prefix('@') {
        let (segment, remainder) = tagged.split_once(' ').unwrap_or((tagged, ""));
        crate::tags::parse_segment(segment, &mut msg.tags);
        rest = remainder.trim_start();
        if rest.is_empty() {
            return Err(ParseError::Whitespace);
        }
        if rest.starts_with(':') {
            return Err(ParseError::Prefixed);
        }
    }

    if rest.len() > MAX_MSG_LENGTH {
        return Err(ParseError::TooLong);
    }

    let (head, trailing) = match rest.split_once(':') {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };

    let mut fields = head.split_ascii_whitespace();
    let command = fields.next().ok_or(ParseError::Whitespace)?;
    msg.command = command.to_ascii_uppercase();

    for param in fields {
        if msg.params.len() == MAX_MSG_PARAMS {
            return Err(ParseError::TooManyParams);
        }
        msg.params.push(param.to_owned());
    }

    if let Some(trailing) = trailing {
        msg.trailing.push_str(trailing);
    }

    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_valid_message() {
        let msg = parse("PRIVMSG nick1!someuser@irc.somehost.org :I am the client").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["nick1!someuser@irc.somehost.org"]);
        assert_eq!(msg.trailing, "I am the client");
    }

    #[test]
    fn uppercases_the_command() {
        let msg = parse("privmsg #chan :hi").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn rejects_too_short() {
        assert_eq!(parse(""), Err(ParseError::TooShort));
        assert_eq!(parse("a"), Err(ParseError::TooShort));
        assert_eq!(parse("abc"), Err(ParseError::TooShort));
    }

    #[test]
    fn rejects_too_long() {
        let line = "a".repeat(MAX_TAGS_LENGTH + MAX_MSG_LENGTH + 1);
        assert_eq!(parse(&line), Err(ParseError::TooLong));
    }

    #[test]
    fn body_length_boundary() {
        // Exactly MAX_MSG_LENGTH is accepted, one more byte is not.
        let head = "PING :";
        let at_limit = format!("{head}{}", "x".repeat(MAX_MSG_LENGTH - head.len()));
        assert!(parse(&at_limit).is_ok());

        let over = format!("{head}{}", "x".repeat(MAX_MSG_LENGTH - head.len() + 1));
        assert_eq!(parse(&over), Err(ParseError::TooLong));
    }

    #[test]
    fn tag_budget_is_separate_from_body_budget() {
        // A tag segment around MAX_TAGS_LENGTH still leaves a full message
        // budget for the body.
        let tags = format!("@k={}", "v".repeat(MAX_TAGS_LENGTH - 3));
        let line = format!("{tags} PRIVMSG #chan :hello");
        let msg = parse(&line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");

        let body = format!("PING :{}", "x".repeat(MAX_MSG_LENGTH));
        let line = format!("{tags} {body}");
        assert_eq!(parse(&line), Err(ParseError::TooLong));
    }

    #[test]
    fn rejects_all_whitespace() {
        assert_eq!(parse("     "), Err(ParseError::Whitespace));
    }

    #[test]
    fn rejects_client_prefixed() {
        assert_eq!(
            parse(":prefix PRIVMSG nick :I am the client"),
            Err(ParseError::Prefixed)
        );
        assert_eq!(
            parse("@time=now :prefix PRIVMSG nick :hi"),
            Err(ParseError::Prefixed)
        );
    }

    #[test]
    fn rejects_too_many_params() {
        assert_eq!(
            parse("PRIVMSG 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 :I am the client"),
            Err(ParseError::TooManyParams)
        );
    }

    #[test]
    fn accepts_fifteen_params() {
        let msg = parse("PRIVMSG 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15").unwrap();
        assert_eq!(msg.params.len(), 15);
    }

    #[test]
    fn splits_tags_from_the_body() {
        let msg = parse("@time=12AM;msgid=abc PRIVMSG #chan :hello there").unwrap();
        assert_eq!(msg.tags.get("time").map(String::as_str), Some("12AM"));
        assert_eq!(msg.tags.get("msgid").map(String::as_str), Some("abc"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.trailing, "hello there");
    }

    #[test]
    fn round_trips_through_render() {
        let msg = parse("PRIVMSG #chan other :hello there").unwrap();
        let rendered = msg.render();
        let reparsed = parse(rendered.trim_end()).unwrap();
        assert_eq!(reparsed.command, msg.command);
        assert_eq!(reparsed.params, msg.params);
        assert_eq!(reparsed.trailing, msg.trailing);
    }
}
