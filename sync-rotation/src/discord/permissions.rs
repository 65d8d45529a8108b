//! Effective permission computation, following the order documented by Discord:
//! guild owner, `@everyone` role, member roles, administrator bypass, then the
//! channel overwrites for `@everyone`, the member's roles and the member itself.

use crate::discord::api::{Channel, Guild, Member, OverwriteKind, deserialize_u64_string};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const ALL: Permissions = Permissions(u64::MAX);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);

    pub const fn from_bits(bits: u64) -> Self {
        Permissions(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Apply an allow/deny pair, deny first.
    fn overwrite(self, allow: Permissions, deny: Permissions) -> Permissions {
        (self & !deny) | allow
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Permissions) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permissions {
    type Output = Permissions;

    fn bitand(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 & rhs.0)
    }
}

impl Not for Permissions {
    type Output = Permissions;

    fn not(self) -> Permissions {
        Permissions(!self.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:#x})", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_u64_string(deserializer).map(Permissions)
    }
}

/// Server-wide permissions of a member, before channel overwrites.
pub(crate) fn base_permissions(guild: &Guild, member: &Member) -> Permissions {
    if guild.owner_id == member.user.id {
        return Permissions::ALL;
    }

    let mut permissions = guild
        .role(guild.id.everyone_role())
        .map(|r| r.permissions)
        .unwrap_or_default();
    for role in member.roles.iter().filter_map(|id| guild.role(*id)) {
        permissions |= role.permissions;
    }

    if permissions.contains(Permissions::ADMINISTRATOR) {
        Permissions::ALL
    } else {
        permissions
    }
}

/// Permissions of a member in a specific channel of `guild`.
pub(crate) fn channel_permissions(
    guild: &Guild,
    member: &Member,
    channel: &Channel,
) -> Permissions {
    let base = base_permissions(guild, member);
    if base == Permissions::ALL {
        return base;
    }

    let overwrites = &channel.permission_overwrites;
    let mut permissions = base;

    let everyone = guild.id.everyone_role().0;
    if let Some(o) = overwrites
        .iter()
        .find(|o| o.kind == OverwriteKind::Role && o.id == everyone)
    {
        permissions = permissions.overwrite(o.allow, o.deny);
    }

    let mut allow = Permissions::NONE;
    let mut deny = Permissions::NONE;
    for o in overwrites
        .iter()
        .filter(|o| o.kind == OverwriteKind::Role && member.roles.iter().any(|r| r.0 == o.id))
    {
        allow |= o.allow;
        deny |= o.deny;
    }
    permissions = permissions.overwrite(allow, deny);

    if let Some(o) = overwrites
        .iter()
        .find(|o| o.kind == OverwriteKind::Member && o.id == member.user.id.0)
    {
        permissions = permissions.overwrite(o.allow, o.deny);
    }

    // Without view access every other permission is implicitly denied.
    if !permissions.contains(Permissions::VIEW_CHANNEL) {
        return Permissions::NONE;
    }
    permissions
}
