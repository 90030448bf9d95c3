//! # ember-proto
//!
//! Wire-protocol support for the emberd IRC daemon.
//!
//! This crate owns everything that touches raw protocol text:
//!
//! - The [`Message`] value type with IRCv3 tag support
//! - Line parsing ([`parse`]) and rendering ([`Message::render_buffer`])
//! - The numeric reply and command token catalogs
//! - Protocol size limits
//! - The bounded, scrub-on-release object pools shared by the server
//!
//! Parsing is strict about what clients may send (no source prefixes, at
//! most 15 middle parameters); rendering never fails.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod buffer;
pub mod command;
pub mod error;
pub mod limits;
pub mod message;
pub mod numeric;
pub mod parse;
pub mod pool;
pub mod tags;

pub use self::buffer::LineBuffer;
pub use self::error::ParseError;
pub use self::message::{Message, TagMap};
pub use self::parse::parse;
pub use self::pool::{Pool, Pooled, Scrub, BUFFERS, MESSAGES};
