//! Protocol-level error types.

use thiserror::Error;

/// Errors produced while parsing a single wire line.
///
/// Parse errors are not fatal to a connection: the server logs them and
/// keeps reading. No reply is sent for a malformed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Fewer than four bytes on the line.
    #[error("did not receive enough data from the client")]
    TooShort,

    /// Line exceeds the tag and message length budgets.
    #[error("received data from the client is too long")]
    TooLong,

    /// Nothing left after trimming surrounding whitespace.
    #[error("line is all whitespace")]
    Whitespace,

    /// Clients must not send source-prefixed messages.
    #[error("source-prefixed message from client")]
    Prefixed,

    /// More than the allowed number of middle parameters.
    #[error("too many parameters")]
    TooManyParams,
}
