//! IRC channel state and membership.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use ember_proto::{Message, BUFFERS};
use thiserror::Error;

use crate::shared_map::SharedMap;
use crate::user::User;

/// Channel membership errors, aggregated by callers that touch many
/// channels at once (quit, nick rename).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("{nick} is not a member of {channel}")]
    NotMember { nick: String, channel: String },
}

/// An IRC channel.
///
/// Role subsets (`ops`, `half_ops`, `voiced`) only ever hold nicks that are
/// also present in `members`. The persisted access lists map host patterns
/// to the name of the setter.
#[derive(Debug, Default)]
pub struct Channel {
    name: RwLock<String>,
    topic: RwLock<String>,
    modes: AtomicU64,

    owner: RwLock<Weak<User>>,
    saved_owner: RwLock<String>,

    // Active state
    pub members: SharedMap<String, Arc<User>>,
    pub ops: SharedMap<String, Arc<User>>,
    pub half_ops: SharedMap<String, Arc<User>>,
    pub voiced: SharedMap<String, Arc<User>>,

    // Persisted lists: host pattern -> setter name
    pub op_list: SharedMap<String, String>,
    pub half_op_list: SharedMap<String, String>,
    pub voice_list: SharedMap<String, String>,
    pub ban_list: SharedMap<String, String>,
    pub invite_list: SharedMap<String, String>,
}

impl Channel {
    /// Create a channel owned by `creator`. The name keeps its case as
    /// first seen; registry keys are lowercased by the server.
    pub fn new(name: &str, creator: &Arc<User>) -> Arc<Channel> {
        let channel = Channel::default();
        *channel.name.write().unwrap_or_else(|e| e.into_inner()) = name.to_owned();
        *channel.owner.write().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(creator);
        *channel
            .saved_owner
            .write()
            .unwrap_or_else(|e| e.into_inner()) = creator.name();
        Arc::new(channel)
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn topic(&self) -> String {
        self.topic.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_topic(&self, new: &str) {
        *self.topic.write().unwrap_or_else(|e| e.into_inner()) = new.to_owned();
    }

    pub fn modes(&self) -> u64 {
        self.modes.load(Ordering::Acquire)
    }

    pub fn add_mode(&self, mode: u64) {
        self.modes.fetch_or(mode, Ordering::AcqRel);
    }

    pub fn del_mode(&self, mode: u64) {
        self.modes.fetch_and(!mode, Ordering::AcqRel);
    }

    /// The owning user, while still connected.
    pub fn owner(&self) -> Option<Arc<User>> {
        self.owner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
    }

    pub fn set_owner(&self, new: &Arc<User>) {
        *self.owner.write().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(new);
        *self.saved_owner.write().unwrap_or_else(|e| e.into_inner()) = new.name();
    }

    /// The persisted owner login-name.
    pub fn saved_owner(&self) -> String {
        self.saved_owner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Render `msg` once and queue it to every member except `exclude`.
    pub async fn send(&self, msg: &Message, exclude: &str) {
        let rendered = msg.render_buffer();

        // Snapshot before awaiting; holding the member lock across queue
        // backpressure would stall unrelated joins.
        for user in self.members.values() {
            if user.nick() == exclude {
                continue;
            }
            let Some(conn) = user.conn() else { continue };
            let mut copy = BUFFERS.acquire();
            copy.push_slice(&rendered);
            conn.write(copy).await;
        }
    }

    /// Add `user` to the channel and announce `msg` to all members,
    /// including the new one.
    pub async fn join(&self, user: &Arc<User>, msg: &Message) {
        self.members.insert(user.nick(), Arc::clone(user));
        self.send(msg, "").await;
    }

    /// Announce `msg` to all members, then remove `user`.
    pub async fn part(&self, user: &Arc<User>, msg: &Message) {
        self.send(msg, "").await;
        let _ = self.remove_member(&user.nick());
    }

    /// Drop a nick from the member and role maps.
    pub fn remove_member(&self, nick: &str) -> Result<(), ChannelError> {
        let existed = self.members.remove(nick);
        self.ops.remove(nick);
        self.half_ops.remove(nick);
        self.voiced.remove(nick);

        if existed {
            Ok(())
        } else {
            Err(ChannelError::NotMember {
                nick: nick.to_owned(),
                channel: self.name(),
            })
        }
    }

    /// Move a member to a new nick across the member and role maps.
    ///
    /// Best effort: the role maps are renamed independently, so a failure
    /// part-way leaves them to be reconciled from `members` later. Callers
    /// log the returned error.
    pub fn rename_member(&self, old: &str, new: &str) -> Result<(), ChannelError> {
        if !self.members.rename(old, new.to_owned()) {
            return Err(ChannelError::NotMember {
                nick: old.to_owned(),
                channel: self.name(),
            });
        }
        self.ops.rename(old, new.to_owned());
        self.half_ops.rename(old, new.to_owned());
        self.voiced.rename(old, new.to_owned());
        Ok(())
    }

    /// Current member nicks with their highest role prefix: `~` owner,
    /// `@` op, `%` half-op, `+` voiced.
    pub fn nick_list(&self) -> Vec<String> {
        let owner_nick = self.owner().map(|owner| owner.nick());

        self.members
            .values()
            .iter()
            .map(|user| {
                let nick = user.nick();
                let prefix = if owner_nick.as_deref() == Some(nick.as_str()) {
                    "~"
                } else if self.ops.contains(&nick) {
                    "@"
                } else if self.half_ops.contains(&nick) {
                    "%"
                } else if self.voiced.contains(&nick) {
                    "+"
                } else {
                    ""
                };
                format!("{prefix}{nick}")
            })
            .collect()
    }
}
