//! Role ladder and permission checks.
//!
//! Roles form a total order by rank; restricting effects (ban, mute, kick,
//! freeze) only ever flow strictly downhill. The permission table is explicit
//! per role rather than inherited, so a middle role can deliberately lack a
//! permission its neighbors hold; the top rank holds everything regardless.

use serde::{Deserialize, Serialize};

use crate::sanction::SanctionLength;

/// Widest span a sub-admin role may sanction for.
const SUB_ADMIN_MAX_SANCTION_MS: u64 = 7 * 24 * 60 * 60 * 1000; // one week

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Guide,
    Moderator,
    Admin,
    Owner,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::User,
        Role::Guide,
        Role::Moderator,
        Role::Admin,
        Role::Owner,
    ];

    pub fn rank(self) -> u8 {
        match self {
            Role::User => 1,
            Role::Guide => 2,
            Role::Moderator => 3,
            Role::Admin => 4,
            Role::Owner => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        let t = s.trim();
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Kick,
    Ban,
    Mute,
    Freeze,
    Teleport,
    Summon,
    Announce,
    RoomAlert,
    Invisible,
    LockRoom,
    ClearRoom,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Kick => "kick",
            Permission::Ban => "ban",
            Permission::Mute => "mute",
            Permission::Freeze => "freeze",
            Permission::Teleport => "teleport",
            Permission::Summon => "summon",
            Permission::Announce => "announce",
            Permission::RoomAlert => "room_alert",
            Permission::Invisible => "invisible",
            Permission::LockRoom => "lock_room",
            Permission::ClearRoom => "clear_room",
        }
    }
}

/// Explicit per-role permission sets. Owner is intentionally absent: the top
/// rank passes every check without consulting the table.
fn permission_set(role: Role) -> &'static [Permission] {
    match role {
        Role::User => &[],
        Role::Guide => &[Permission::RoomAlert],
        Role::Moderator => &[
            Permission::Kick,
            Permission::Ban,
            Permission::Mute,
            Permission::Freeze,
            Permission::Teleport,
            Permission::Summon,
            Permission::RoomAlert,
        ],
        Role::Admin => &[
            Permission::Kick,
            Permission::Ban,
            Permission::Mute,
            Permission::Freeze,
            Permission::Teleport,
            Permission::Summon,
            Permission::Announce,
            Permission::RoomAlert,
            Permission::Invisible,
            Permission::LockRoom,
            Permission::ClearRoom,
        ],
        Role::Owner => &[],
    }
}

pub fn has_permission(role: Role, perm: Permission) -> bool {
    if role == Role::Owner {
        return true;
    }
    permission_set(role).contains(&perm)
}

/// Restricting effects require strictly greater rank; peers never sanction
/// peers.
pub fn can_act_on(actor: Role, target: Role) -> bool {
    actor.rank() > target.rank()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationNotAllowed;

impl std::fmt::Display for DurationNotAllowed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("duration exceeds what this role may issue")
    }
}

impl std::error::Error for DurationNotAllowed {}

/// Roles below admin may not issue unbounded sanctions and are capped at one
/// week.
pub fn validate_duration(role: Role, length: SanctionLength) -> Result<(), DurationNotAllowed> {
    if role.rank() >= Role::Admin.rank() {
        return Ok(());
    }
    match length {
        SanctionLength::Permanent => Err(DurationNotAllowed),
        SanctionLength::Millis(ms) if ms > SUB_ADMIN_MAX_SANCTION_MS => Err(DurationNotAllowed),
        SanctionLength::Millis(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanction::parse_duration;

    #[test]
    fn rank_comparator_is_strict() {
        for a in Role::ALL {
            for b in Role::ALL {
                if a.rank() <= b.rank() {
                    assert!(!can_act_on(a, b), "{a:?} should not act on {b:?}");
                } else {
                    assert!(can_act_on(a, b), "{a:?} should act on {b:?}");
                }
            }
        }
    }

    #[test]
    fn peers_cannot_sanction_peers() {
        assert!(!can_act_on(Role::Moderator, Role::Moderator));
        assert!(!can_act_on(Role::Moderator, Role::Admin));
        assert!(can_act_on(Role::Admin, Role::Moderator));
    }

    #[test]
    fn owner_holds_every_permission_implicitly() {
        for p in [
            Permission::Kick,
            Permission::Ban,
            Permission::Announce,
            Permission::LockRoom,
            Permission::Invisible,
        ] {
            assert!(has_permission(Role::Owner, p));
        }
    }

    #[test]
    fn permission_table_spot_checks() {
        assert!(!has_permission(Role::User, Permission::Kick));
        assert!(has_permission(Role::Guide, Permission::RoomAlert));
        assert!(!has_permission(Role::Guide, Permission::Kick));
        assert!(has_permission(Role::Moderator, Permission::Kick));
        assert!(!has_permission(Role::Moderator, Permission::Announce));
        assert!(!has_permission(Role::Moderator, Permission::ClearRoom));
        assert!(has_permission(Role::Admin, Permission::Announce));
        assert!(has_permission(Role::Admin, Permission::ClearRoom));
    }

    #[test]
    fn duration_caps_bind_sub_admin_roles() {
        let five_days = parse_duration("5d").unwrap();
        let permanent = parse_duration("permanent").unwrap();
        let two_weeks = parse_duration("2w").unwrap();

        assert!(validate_duration(Role::Admin, five_days).is_ok());
        assert!(validate_duration(Role::Admin, permanent).is_ok());
        assert!(validate_duration(Role::Owner, permanent).is_ok());

        assert!(validate_duration(Role::Moderator, five_days).is_ok());
        assert_eq!(
            validate_duration(Role::Moderator, permanent),
            Err(DurationNotAllowed)
        );
        assert_eq!(
            validate_duration(Role::Moderator, two_weeks),
            Err(DurationNotAllowed)
        );
    }

    #[test]
    fn role_parse_round_trips() {
        for r in Role::ALL {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
        assert_eq!(Role::parse("  Admin "), Some(Role::Admin));
        assert_eq!(Role::parse("sysop"), None);
    }
}
