//! Per-connection user state.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use crate::connection::Conn;
use crate::usermode::Permission;

#[derive(Debug, Default)]
struct Identity {
    nick: String,
    name: String,
    real: String,
    host: String,
    vanity_host: String,
    vanity_enabled: bool,
}

/// All of the state in the context of a connected user.
///
/// Identity fields sit behind a reader-writer lock; permission and mode are
/// atomics. The connection back-reference is a lookup relation, not
/// ownership: the connection owns the user, never the other way around.
#[derive(Debug, Default)]
pub struct User {
    identity: RwLock<Identity>,
    perm: AtomicU8,
    mode: AtomicU64,
    conn: OnceLock<Weak<Conn>>,
}

impl User {
    pub fn new() -> Arc<User> {
        Arc::new(User {
            perm: AtomicU8::new(Permission::None as u8),
            ..User::default()
        })
    }

    /// Attach the owning connection. Called once during connection setup.
    pub(crate) fn attach_conn(&self, conn: Weak<Conn>) {
        let _ = self.conn.set(conn);
    }

    /// The owning connection, when it is still alive.
    pub fn conn(&self) -> Option<Arc<Conn>> {
        self.conn.get()?.upgrade()
    }

    /// Full IRC hostmask, `<nick>!<name>@<host>`, preferring the vanity
    /// host when one is set and enabled.
    pub fn hostmask(&self) -> String {
        let id = self.read();
        let host = if id.vanity_enabled && !id.vanity_host.is_empty() {
            &id.vanity_host
        } else {
            &id.host
        };
        format!("{}!{}@{}", id.nick, id.name, host)
    }

    /// Full IRC hostmask ignoring the vanity host.
    pub fn real_hostmask(&self) -> String {
        let id = self.read();
        format!("{}!{}@{}", id.nick, id.name, id.host)
    }

    pub fn nick(&self) -> String {
        self.read().nick.clone()
    }

    pub fn set_nick(&self, new: &str) {
        self.write().nick = new.to_owned();
    }

    /// The login-name given by USER.
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn set_name(&self, new: &str) {
        self.write().name = new.to_owned();
    }

    pub fn realname(&self) -> String {
        self.read().real.clone()
    }

    pub fn set_realname(&self, new: &str) {
        self.write().real = new.to_owned();
    }

    pub fn host(&self) -> String {
        self.read().host.clone()
    }

    pub fn set_host(&self, new: &str) {
        self.write().host = new.to_owned();
    }

    pub fn vanity_host(&self) -> String {
        self.read().vanity_host.clone()
    }

    pub fn set_vanity_host(&self, new: &str) {
        self.write().vanity_host = new.to_owned();
    }

    pub fn vanity_enabled(&self) -> bool {
        self.read().vanity_enabled
    }

    pub fn set_vanity_enabled(&self, enabled: bool) {
        self.write().vanity_enabled = enabled;
    }

    pub fn permission(&self) -> Permission {
        Permission::from_raw(self.perm.load(Ordering::Acquire))
    }

    pub fn set_permission(&self, perm: Permission) {
        self.perm.store(perm as u8, Ordering::Release);
    }

    /// Whether this user outranks the given permission level.
    pub fn higher_perms(&self, target: Permission) -> bool {
        self.permission() > target
    }

    pub fn mode(&self) -> u64 {
        self.mode.load(Ordering::Acquire)
    }

    pub fn add_mode(&self, umode: u64) {
        self.mode.fetch_or(umode, Ordering::AcqRel);
    }

    pub fn del_mode(&self, umode: u64) {
        self.mode.fetch_and(!umode, Ordering::AcqRel);
    }

    pub fn mode_is_set(&self, umode: u64) -> bool {
        self.mode.load(Ordering::Acquire) & umode == umode
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Identity> {
        self.identity.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Identity> {
        self.identity.write().unwrap_or_else(|e| e.into_inner())
    }
}
