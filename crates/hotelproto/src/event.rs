//! Client/server event envelopes.
//!
//! One JSON object per frame, discriminated by `op`. Admin ops keep their
//! `admin:` prefix so a proxy can rate-limit or strip the privileged surface
//! without understanding each verb.

use serde::{Deserialize, Serialize};

use crate::ErrorCode;
use crate::types::{Appearance, ChatMode, Direction, FurnitureSnapshot, MemberSnapshot, Position};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room: String,
    },
    Move {
        x: i32,
        y: i32,
    },
    ChatMessage {
        text: String,
        #[serde(default)]
        mode: ChatMode,
        /// Target display name; required for whispers, ignored otherwise.
        #[serde(default)]
        to: Option<String>,
    },
    PlaceFurniture {
        kind: String,
        x: i32,
        y: i32,
        #[serde(default)]
        rotation: u8,
    },
    RemoveFurniture {
        id: u64,
    },
    RotateFurniture {
        id: u64,
        rotation: u8,
    },

    #[serde(rename = "admin:kick")]
    AdminKick {
        target: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "admin:teleport")]
    AdminTeleport { target: String },
    #[serde(rename = "admin:summon")]
    AdminSummon { target: String },
    #[serde(rename = "admin:freeze")]
    AdminFreeze { target: String },
    #[serde(rename = "admin:unfreeze")]
    AdminUnfreeze { target: String },
    #[serde(rename = "admin:announce")]
    AdminAnnounce { message: String },
    #[serde(rename = "admin:room_alert")]
    AdminRoomAlert { message: String },
    #[serde(rename = "admin:set_invisible")]
    AdminSetInvisible { on: bool },
    #[serde(rename = "admin:lock_room")]
    AdminLockRoom { on: bool },
    #[serde(rename = "admin:clear_room")]
    AdminClearRoom {},
    #[serde(rename = "admin:ban")]
    AdminBan {
        target: String,
        duration: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "admin:mute")]
    AdminMute {
        target: String,
        duration: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "admin:unban")]
    AdminUnban { target: String },
    #[serde(rename = "admin:unmute")]
    AdminUnmute { target: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined {
        room: String,
        members: Vec<MemberSnapshot>,
        furniture: Vec<FurnitureSnapshot>,
    },
    PlayerJoined {
        user_id: String,
        name: String,
        position: Position,
        direction: Direction,
        appearance: Appearance,
    },
    PlayerLeft {
        user_id: String,
    },
    PlayerMoved {
        user_id: String,
        position: Position,
        direction: Direction,
    },
    /// Normal/shout chat carries the speaker's position so receivers can
    /// apply their own distance fade; the gateway never filters by distance.
    ChatMessage {
        from_id: String,
        from_name: String,
        mode: ChatMode,
        text: String,
        position: Position,
    },
    FurniturePlaced {
        by: String,
        item: FurnitureSnapshot,
    },
    FurnitureRemoved {
        id: u64,
    },
    FurnitureRotated {
        id: u64,
        rotation: u8,
    },
    Kicked {
        reason: String,
        by: String,
    },
    Frozen {},
    Unfrozen {},
    GlobalAnnouncement {
        message: String,
        by: String,
    },
    RoomAlert {
        message: String,
        by: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    #[serde(rename = "admin:success")]
    AdminSuccess { message: String },
    #[serde(rename = "admin:error")]
    AdminError { code: ErrorCode, message: String },
}
