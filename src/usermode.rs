//! User mode bitmasks and permission levels.
//!
//! Static tables consumed by the MODE/OPER command family; the core only
//! stamps [`umode::REGISTERED`] and [`Permission::User`] at registration.

/// Server-wide user permission levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Permission {
    /// Banned from the server.
    Ban = 0,
    /// Connected but unregistered.
    None = 1,
    /// Ordinary registered user.
    User = 2,
    /// Help operator.
    HelpOp = 3,
    /// Network operator.
    NetOp = 4,
    /// Server administrator.
    Admin = 5,
    /// The server itself.
    Server = 6,
}

impl Permission {
    /// Decode a stored permission level; out-of-range values collapse to
    /// `None`.
    pub fn from_raw(raw: u8) -> Permission {
        match raw {
            0 => Permission::Ban,
            2 => Permission::User,
            3 => Permission::HelpOp,
            4 => Permission::NetOp,
            5 => Permission::Admin,
            6 => Permission::Server,
            _ => Permission::None,
        }
    }
}

/// User mode flags.
pub mod umode {
    #![allow(missing_docs)]

    pub const AWAY: u64 = 1;
    pub const ADMIN: u64 = 1 << 1;
    pub const BOT: u64 = 1 << 2;
    pub const BANNED: u64 = 1 << 3;
    pub const CENSORED: u64 = 1 << 4;
    pub const CONN_INFO: u64 = 1 << 5;
    pub const DEAF: u64 = 1 << 6;
    pub const DEBUG: u64 = 1 << 7;
    pub const FLOOD_INFO: u64 = 1 << 8;
    pub const FLOOD_IMMUNE: u64 = 1 << 9;
    pub const GODMODE: u64 = 1 << 10;
    pub const HIDDEN_HOST: u64 = 1 << 11;
    pub const HIDDEN: u64 = 1 << 12;
    pub const INVISIBLE: u64 = 1 << 13;
    pub const IMMUNE: u64 = 1 << 14;
    pub const KEYMASTER: u64 = 1 << 15;
    pub const MUTED: u64 = 1 << 16;
    pub const HELPOP: u64 = 1 << 17;
    pub const NETOP: u64 = 1 << 18;
    pub const PROTECTED: u64 = 1 << 19;
    pub const REGISTERED: u64 = 1 << 20;
    pub const SECURED: u64 = 1 << 21;
    pub const THROTTLED: u64 = 1 << 22;
    pub const GLOBAL_VOICE: u64 = 1 << 23;
    pub const WHOIS_INFO: u64 = 1 << 24;
    pub const WATCH: u64 = 1 << 25;
}

/// Permission levels required to set a mode: the setter's level and the
/// minimum level of the target it may be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeReq {
    /// Level required of the user applying the mode.
    pub setter: Permission,
    /// Lowest target level the mode may be applied to.
    pub target: Permission,
}

/// Setter/target requirements for each user mode.
pub fn mode_requirements(mode: u64) -> Option<ModeReq> {
    use Permission::*;

    let req = match mode {
        umode::AWAY => ModeReq { setter: User, target: User },
        umode::ADMIN => ModeReq { setter: Server, target: User },
        umode::BOT => ModeReq { setter: NetOp, target: User },
        umode::BANNED => ModeReq { setter: NetOp, target: None },
        umode::CENSORED => ModeReq { setter: HelpOp, target: User },
        umode::CONN_INFO => ModeReq { setter: Admin, target: NetOp },
        umode::DEAF => ModeReq { setter: NetOp, target: User },
        umode::DEBUG => ModeReq { setter: Admin, target: NetOp },
        umode::FLOOD_INFO => ModeReq { setter: NetOp, target: HelpOp },
        umode::FLOOD_IMMUNE => ModeReq { setter: NetOp, target: User },
        umode::GODMODE => ModeReq { setter: Server, target: Admin },
        umode::HIDDEN_HOST => ModeReq { setter: HelpOp, target: User },
        umode::HIDDEN => ModeReq { setter: NetOp, target: User },
        umode::INVISIBLE => ModeReq { setter: User, target: User },
        umode::IMMUNE => ModeReq { setter: Admin, target: NetOp },
        umode::KEYMASTER => ModeReq { setter: Admin, target: HelpOp },
        umode::MUTED => ModeReq { setter: HelpOp, target: User },
        umode::HELPOP => ModeReq { setter: NetOp, target: User },
        umode::NETOP => ModeReq { setter: Admin, target: User },
        umode::PROTECTED => ModeReq { setter: Admin, target: User },
        umode::REGISTERED => ModeReq { setter: Server, target: User },
        umode::SECURED => ModeReq { setter: Server, target: User },
        umode::THROTTLED => ModeReq { setter: NetOp, target: User },
        umode::GLOBAL_VOICE => ModeReq { setter: HelpOp, target: User },
        umode::WHOIS_INFO => ModeReq { setter: NetOp, target: User },
        umode::WATCH => ModeReq { setter: Admin, target: NetOp },
        _ => return Option::None,
    };

    Some(req)
}
