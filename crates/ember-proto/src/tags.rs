//! IRCv3 message-tag handling.

use crate::buffer::LineBuffer;
use crate::message::TagMap;

/// Append a tag value to `buf` with the IRCv3 escapes applied:
/// `;` → `\:`, space → `\s`, `\` → `\\`, CR → `\r`, LF → `\n`.
pub fn escape_value_into(buf: &mut LineBuffer, value: &str) {
    for b in value.bytes() {
        match b {
            b';' => buf.push_slice(b"\\:"),
            b' ' => buf.push_slice(b"\\s"),
            b'\\' => buf.push_slice(b"\\\\"),
            b'\r' => buf.push_slice(b"\\r"),
            b'\n' => buf.push_slice(b"\\n"),
            other => buf.push_byte(other),
        }
    }
}

/// Split a raw tag segment (without the leading `@`) into the tag map.
///
/// Values are stored exactly as received: escape sequences are not decoded
/// on ingest, so clients that send escaped values will see the raw escapes
/// reflected back.
pub fn parse_segment(segment: &str, tags: &mut TagMap) {
    for token in segment.split(';') {
        if token.is_empty() {
            continue;
        }
        let (key, value) = token.split_once('=').unwrap_or((token, ""));
        tags.insert(key.to_owned(), value.to_owned());
    }
}
