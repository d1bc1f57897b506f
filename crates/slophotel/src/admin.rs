//! Admin command dispatcher.
//!
//! Every privileged verb runs the same pipeline: resolve the actor's role,
//! check the permission, resolve the target, check rank for restricting
//! effects, apply, audit, reply. [`authorize`] is that pipeline; the match in
//! [`dispatch`] only supplies the permission name, the resolution strategy,
//! and the effect.

use chrono::Utc;
use std::time::Duration;
use tracing::info;

use hotelproto::ErrorCode;
use hotelproto::event::{ClientEvent, ServerEvent};
use hotelproto::types::Position;

use crate::Gateway;
use crate::audit::AuditRecord;
use crate::roles::{self, Permission, Role};
use crate::sanction::{self, SanctionKind, SanctionState};
use crate::world::{ConnFlag, RoomSetup, World, WorldError};

/// How long a kicked connection gets to render the notice before the socket
/// is closed under it.
const KICK_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminError {
    pub code: ErrorCode,
    pub message: String,
}

impl AdminError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn internal(e: anyhow::Error) -> Self {
        Self::new(ErrorCode::Internal, format!("record store unavailable: {e}"))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ActorInfo {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub room_id: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub(crate) struct TargetInfo {
    pub id: String,
    pub name: String,
    pub room_id: Option<String>,
    pub position: Position,
}

/// Steps 1–4 of the pipeline. `restricts` adds the strict rank comparison;
/// commands without a live target pass `target_name: None`.
pub(crate) fn authorize(
    world: &World,
    actor_id: &str,
    permission: Permission,
    target_name: Option<&str>,
    restricts: bool,
) -> Result<(ActorInfo, Option<TargetInfo>), AdminError> {
    let actor = world.get(actor_id).ok_or_else(|| {
        AdminError::new(ErrorCode::PermissionDenied, "you are not connected")
    })?;
    let actor_info = ActorInfo {
        id: actor.user_id.clone(),
        name: actor.name.clone(),
        role: actor.role,
        room_id: actor.room_id.clone(),
        position: actor.position,
    };

    if !roles::has_permission(actor_info.role, permission) {
        return Err(AdminError::new(
            ErrorCode::PermissionDenied,
            format!("your role lacks the {} permission", permission.as_str()),
        ));
    }

    let target = match target_name {
        None => None,
        Some(name) => {
            let t = world.resolve_name(name).ok_or_else(|| {
                AdminError::new(
                    ErrorCode::TargetNotFound,
                    format!("no connected user named {name:?}"),
                )
            })?;
            if restricts && !roles::can_act_on(actor_info.role, t.role) {
                return Err(AdminError::new(
                    ErrorCode::InsufficientRank,
                    format!("{} is not below your rank", t.name),
                ));
            }
            Some(TargetInfo {
                id: t.user_id.clone(),
                name: t.name.clone(),
                room_id: t.room_id.clone(),
                position: t.position,
            })
        }
    };

    Ok((actor_info, target))
}

/// Parse and role-cap a sanction duration, producing the record to store.
pub(crate) fn prepare_sanction(
    actor_role: Role,
    duration: &str,
    reason: String,
    now: chrono::DateTime<Utc>,
) -> Result<SanctionState, AdminError> {
    let length = sanction::parse_duration(duration).map_err(|e| {
        AdminError::new(ErrorCode::InvalidDuration, format!("{duration:?}: {e}"))
    })?;
    roles::validate_duration(actor_role, length).map_err(|_| {
        AdminError::new(
            ErrorCode::DurationNotAllowed,
            "your role may not issue a sanction that long",
        )
    })?;
    Ok(SanctionState::new(length, reason, now))
}

/// Clear-room victim selection: strictly below the actor's rank, and staff
/// (moderator and up) are spared — clearing a room ejects the audience, it
/// does not purge fellow staff.
pub(crate) fn clear_room_victims(world: &World, room_id: &str, actor: &ActorInfo) -> Vec<String> {
    let Some(room) = world.room(room_id) else {
        return Vec::new();
    };
    room.member_ids()
        .into_iter()
        .filter(|id| {
            if id == &actor.id {
                return false;
            }
            let Some(c) = world.get(id) else {
                return false;
            };
            c.role.rank() < actor.role.rank() && c.role.rank() < Role::Moderator.rank()
        })
        .collect()
}

fn schedule_close(world: &World, user_id: &str) {
    if let Some(c) = world.get(user_id) {
        let shutdown = c.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(KICK_GRACE).await;
            let _ = shutdown.send(true);
        });
    }
}

fn world_err(e: WorldError) -> AdminError {
    match e {
        WorldError::NotInRoom => AdminError::new(ErrorCode::NotInRoom, "not in a room"),
        WorldError::InvalidPosition => {
            AdminError::new(ErrorCode::InvalidPosition, "position is out of bounds")
        }
        WorldError::TargetNotFound => {
            AdminError::new(ErrorCode::TargetNotFound, "no such target")
        }
        WorldError::RoomLocked => {
            AdminError::new(ErrorCode::PermissionDenied, "room is locked")
        }
        WorldError::Frozen => AdminError::new(ErrorCode::PermissionDenied, "frozen"),
    }
}

async fn audit(
    gw: &Gateway,
    actor_id: &str,
    target_id: Option<String>,
    action: &str,
    reason: &str,
    detail: String,
) {
    gw.audit
        .append(&AuditRecord {
            at: Utc::now(),
            actor_id: actor_id.to_string(),
            target_id,
            action: action.to_string(),
            reason: reason.to_string(),
            detail,
        })
        .await;
}

/// Run one privileged command to completion: checks, effect, audit record,
/// success message. Errors carry a stable code and a human-readable reason.
pub async fn dispatch(gw: &Gateway, actor_id: &str, ev: ClientEvent) -> Result<String, AdminError> {
    match ev {
        ClientEvent::AdminKick { target, reason } => {
            let reason = reason.unwrap_or_else(|| "kicked by staff".to_string());
            let (actor, t) = {
                let world = gw.world.lock().await;
                let (actor, t) =
                    authorize(&world, actor_id, Permission::Kick, Some(&target), true)?;
                let t = t.expect("kick resolves a target");
                world.send_to(
                    &t.id,
                    ServerEvent::Kicked {
                        reason: reason.clone(),
                        by: actor.name.clone(),
                    },
                );
                schedule_close(&world, &t.id);
                (actor, t)
            };
            info!(actor = %actor.name, target = %t.name, "kick");
            audit(gw, actor_id, Some(t.id), "kick", &reason, String::new()).await;
            Ok(format!("kicked {}", t.name))
        }

        ClientEvent::AdminTeleport { target } => {
            let t = {
                let mut world = gw.world.lock().await;
                let (_, t) =
                    authorize(&world, actor_id, Permission::Teleport, Some(&target), false)?;
                let t = t.expect("teleport resolves a target");
                let room_id = t.room_id.clone().ok_or_else(|| {
                    AdminError::new(ErrorCode::NotInRoom, format!("{} is not in a room", t.name))
                })?;
                world
                    .join_room(actor_id, &room_id, RoomSetup::default(), Some(t.position))
                    .map_err(world_err)?;
                t
            };
            audit(
                gw,
                actor_id,
                Some(t.id.clone()),
                "teleport",
                "",
                format!("to {}", t.name),
            )
            .await;
            Ok(format!("teleported to {}", t.name))
        }

        ClientEvent::AdminSummon { target } => {
            let t = {
                let mut world = gw.world.lock().await;
                let (actor, t) =
                    authorize(&world, actor_id, Permission::Summon, Some(&target), true)?;
                let t = t.expect("summon resolves a target");
                let room_id = actor
                    .room_id
                    .clone()
                    .ok_or_else(|| AdminError::new(ErrorCode::NotInRoom, "you are not in a room"))?;
                world
                    .join_room(&t.id, &room_id, RoomSetup::default(), Some(actor.position))
                    .map_err(world_err)?;
                t
            };
            audit(
                gw,
                actor_id,
                Some(t.id.clone()),
                "summon",
                "",
                String::new(),
            )
            .await;
            Ok(format!("summoned {}", t.name))
        }

        ClientEvent::AdminFreeze { target } => {
            let t = {
                let mut world = gw.world.lock().await;
                let (_, t) =
                    authorize(&world, actor_id, Permission::Freeze, Some(&target), true)?;
                let t = t.expect("freeze resolves a target");
                if let Some(c) = world.get_mut(&t.id) {
                    c.status.insert(ConnFlag::Frozen);
                }
                world.send_to(&t.id, ServerEvent::Frozen {});
                t
            };
            audit(gw, actor_id, Some(t.id.clone()), "freeze", "", String::new()).await;
            Ok(format!("froze {}", t.name))
        }

        ClientEvent::AdminUnfreeze { target } => {
            let t = {
                let mut world = gw.world.lock().await;
                let (_, t) =
                    authorize(&world, actor_id, Permission::Freeze, Some(&target), true)?;
                let t = t.expect("unfreeze resolves a target");
                if let Some(c) = world.get_mut(&t.id) {
                    c.status.remove(ConnFlag::Frozen);
                }
                world.send_to(&t.id, ServerEvent::Unfrozen {});
                t
            };
            audit(
                gw,
                actor_id,
                Some(t.id.clone()),
                "unfreeze",
                "",
                String::new(),
            )
            .await;
            Ok(format!("unfroze {}", t.name))
        }

        ClientEvent::AdminAnnounce { message } => {
            {
                let world = gw.world.lock().await;
                let (actor, _) = authorize(&world, actor_id, Permission::Announce, None, false)?;
                world.broadcast_all(&ServerEvent::GlobalAnnouncement {
                    message: message.clone(),
                    by: actor.name,
                });
            }
            audit(gw, actor_id, None, "announce", "", message).await;
            Ok("announcement sent".to_string())
        }

        ClientEvent::AdminRoomAlert { message } => {
            let room_id = {
                let world = gw.world.lock().await;
                let (actor, _) = authorize(&world, actor_id, Permission::RoomAlert, None, false)?;
                let room_id = actor
                    .room_id
                    .clone()
                    .ok_or_else(|| AdminError::new(ErrorCode::NotInRoom, "you are not in a room"))?;
                world.broadcast_room(
                    &room_id,
                    None,
                    &ServerEvent::RoomAlert {
                        message: message.clone(),
                        by: actor.name,
                    },
                );
                room_id
            };
            audit(gw, actor_id, None, "room_alert", "", format!("room {room_id}: {message}")).await;
            Ok("alert sent".to_string())
        }

        ClientEvent::AdminSetInvisible { on } => {
            {
                let mut world = gw.world.lock().await;
                let (_, _) = authorize(&world, actor_id, Permission::Invisible, None, false)?;
                if let Some(c) = world.get_mut(actor_id) {
                    if on {
                        c.status.insert(ConnFlag::Invisible);
                    } else {
                        c.status.remove(ConnFlag::Invisible);
                    }
                }
            }
            audit(gw, actor_id, None, "set_invisible", "", on.to_string()).await;
            Ok(format!("invisible {}", if on { "on" } else { "off" }))
        }

        ClientEvent::AdminLockRoom { on } => {
            let room_id = {
                let mut world = gw.world.lock().await;
                let (actor, _) = authorize(&world, actor_id, Permission::LockRoom, None, false)?;
                let room_id = actor
                    .room_id
                    .clone()
                    .ok_or_else(|| AdminError::new(ErrorCode::NotInRoom, "you are not in a room"))?;
                match world.room_mut(&room_id) {
                    Some(room) => room.locked = on,
                    None => {
                        return Err(AdminError::new(ErrorCode::NotInRoom, "room is gone"));
                    }
                }
                room_id
            };
            audit(gw, actor_id, None, "lock_room", "", format!("{room_id}={on}")).await;
            Ok(format!(
                "room {room_id} {}",
                if on { "locked" } else { "unlocked" }
            ))
        }

        ClientEvent::AdminClearRoom {} => {
            let (room_id, kicked) = {
                let world = gw.world.lock().await;
                let (actor, _) = authorize(&world, actor_id, Permission::ClearRoom, None, false)?;
                let room_id = actor
                    .room_id
                    .clone()
                    .ok_or_else(|| AdminError::new(ErrorCode::NotInRoom, "you are not in a room"))?;
                let victims = clear_room_victims(&world, &room_id, &actor);
                for id in &victims {
                    world.send_to(
                        id,
                        ServerEvent::Kicked {
                            reason: "room cleared".to_string(),
                            by: actor.name.clone(),
                        },
                    );
                    schedule_close(&world, id);
                }
                (room_id, victims.len())
            };
            audit(
                gw,
                actor_id,
                None,
                "clear_room",
                "",
                format!("room {room_id}: kicked {kicked}"),
            )
            .await;
            Ok(format!("cleared room {room_id}: kicked {kicked}"))
        }

        ClientEvent::AdminBan {
            target,
            duration,
            reason,
        } => {
            let reason = reason.unwrap_or_default();
            let (actor, t) = {
                let world = gw.world.lock().await;
                let (actor, t) = authorize(&world, actor_id, Permission::Ban, Some(&target), true)?;
                (actor, t.expect("ban resolves a target"))
            };
            let state = prepare_sanction(actor.role, &duration, reason.clone(), Utc::now())?;

            gw.records
                .put_sanction(&t.id, SanctionKind::Ban, &state)
                .await
                .map_err(AdminError::internal)?;

            {
                let mut world = gw.world.lock().await;
                if let Some(c) = world.get_mut(&t.id) {
                    c.sanctions.ban = state.clone();
                }
                world.send_to(
                    &t.id,
                    ServerEvent::Kicked {
                        reason: format!("banned: {reason}"),
                        by: actor.name.clone(),
                    },
                );
                schedule_close(&world, &t.id);
            }
            info!(actor = %actor.name, target = %t.name, duration = %duration, "ban");
            audit(gw, actor_id, Some(t.id), "ban", &reason, duration.clone()).await;
            Ok(format!("banned {} for {duration}", t.name))
        }

        ClientEvent::AdminMute {
            target,
            duration,
            reason,
        } => {
            let reason = reason.unwrap_or_default();
            let (actor, t) = {
                let world = gw.world.lock().await;
                let (actor, t) =
                    authorize(&world, actor_id, Permission::Mute, Some(&target), true)?;
                (actor, t.expect("mute resolves a target"))
            };
            let state = prepare_sanction(actor.role, &duration, reason.clone(), Utc::now())?;

            gw.records
                .put_sanction(&t.id, SanctionKind::Mute, &state)
                .await
                .map_err(AdminError::internal)?;

            {
                let mut world = gw.world.lock().await;
                if let Some(c) = world.get_mut(&t.id) {
                    c.sanctions.mute = state;
                }
            }
            info!(actor = %actor.name, target = %t.name, duration = %duration, "mute");
            audit(gw, actor_id, Some(t.id), "mute", &reason, duration.clone()).await;
            Ok(format!("muted {} for {duration}", t.name))
        }

        ClientEvent::AdminUnban { target } => {
            lift_sanction(gw, actor_id, &target, SanctionKind::Ban).await
        }
        ClientEvent::AdminUnmute { target } => {
            lift_sanction(gw, actor_id, &target, SanctionKind::Mute).await
        }

        other => Err(AdminError::new(
            ErrorCode::PermissionDenied,
            format!("not an admin op: {other:?}"),
        )),
    }
}

/// Unban/unmute resolve through the record store so sanctions on offline
/// identities can be lifted; a connected display name is mapped to its id
/// first as a convenience.
async fn lift_sanction(
    gw: &Gateway,
    actor_id: &str,
    target: &str,
    kind: SanctionKind,
) -> Result<String, AdminError> {
    let permission = match kind {
        SanctionKind::Ban => Permission::Ban,
        SanctionKind::Mute => Permission::Mute,
    };
    let (actor, target_id) = {
        let world = gw.world.lock().await;
        let (actor, _) = authorize(&world, actor_id, permission, None, false)?;
        let target_id = world
            .resolve_name(target)
            .map(|c| c.user_id.clone())
            .unwrap_or_else(|| target.trim().to_string());
        (actor, target_id)
    };

    let rec = gw
        .records
        .fetch_identity(&target_id)
        .await
        .map_err(AdminError::internal)?
        .ok_or_else(|| {
            AdminError::new(
                ErrorCode::TargetNotFound,
                format!("no identity {target_id:?}"),
            )
        })?;
    if !roles::can_act_on(actor.role, rec.role) {
        return Err(AdminError::new(
            ErrorCode::InsufficientRank,
            format!("{} is not below your rank", rec.name),
        ));
    }

    gw.records
        .clear_sanction(&rec.id, kind)
        .await
        .map_err(AdminError::internal)?;

    {
        let mut world = gw.world.lock().await;
        if let Some(c) = world.get_mut(&rec.id) {
            *c.sanctions.get_mut(kind) = SanctionState::default();
        }
    }
    let action = match kind {
        SanctionKind::Ban => "unban",
        SanctionKind::Mute => "unmute",
    };
    audit(gw, actor_id, Some(rec.id.clone()), action, "", String::new()).await;
    Ok(format!("{action} {} done", rec.name))
}
