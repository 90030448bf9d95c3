//! Protocol size limits.
//!
//! These bound every inbound line and the state derived from it. The
//! message and tag limits follow RFC 2812 and the IRCv3 message-tags
//! specification; the rest are local policy advertised through ISUPPORT.

/// Maximum length of the message body, tags excluded.
pub const MAX_MSG_LENGTH: usize = 512;
/// Maximum number of middle parameters per message.
pub const MAX_MSG_PARAMS: usize = 15;
/// Maximum length of the leading tag segment.
pub const MAX_TAGS_LENGTH: usize = 4096;

/// Maximum channel name length.
pub const MAX_CHAN_LENGTH: usize = 16;
/// Maximum kick reason length.
pub const MAX_KICK_LENGTH: usize = 400;
/// Maximum topic length.
pub const MAX_TOPIC_LENGTH: usize = 400;
/// Maximum entries per channel access list.
pub const MAX_LIST_ITEMS: usize = 256;
/// Maximum mode changes accepted in a single MODE command.
pub const MAX_MODE_CHANGE: usize = 6;

/// Maximum nickname length.
pub const MAX_NICK_LENGTH: usize = 16;
/// Maximum login-name length.
pub const MAX_USER_LENGTH: usize = 16;
/// Maximum vanity host length.
pub const MAX_VHOST_LENGTH: usize = 64;
/// Maximum channels a single user may join.
pub const MAX_JOINED_CHANS: usize = 32;
/// Maximum away message length.
pub const MAX_AWAY_LENGTH: usize = 100;
