//! Shared mutable state: the connection registry, room presence maps, and
//! event fan-out.
//!
//! One `World` instance lives behind an async mutex in the gateway; handlers
//! receive a reference, never a global. Sends are fire-and-forget `try_send`
//! onto each connection's bounded event channel — a full channel drops the
//! event for that receiver rather than blocking the handler.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use hotelproto::event::ServerEvent;
use hotelproto::types::{
    Appearance, ChatMode, ConnId, Direction, FurnitureSnapshot, MemberSnapshot, Position,
};

use crate::roles::{self, Permission, Role};
use crate::sanction::SanctionSnapshot;

pub const DEFAULT_ROOM_WIDTH: i32 = 24;
pub const DEFAULT_ROOM_HEIGHT: i32 = 16;

/// Per-connection status flags. Mute is not here: it is sanction state with
/// an expiry, held in the cached snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnFlag {
    Frozen,
    Invisible,
}

impl ConnFlag {
    fn bit(self) -> u8 {
        match self {
            ConnFlag::Frozen => 0b01,
            ConnFlag::Invisible => 0b10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSet(u8);

impl StatusSet {
    pub fn insert(&mut self, f: ConnFlag) {
        self.0 |= f.bit();
    }

    pub fn remove(&mut self, f: ConnFlag) {
        self.0 &= !f.bit();
    }

    pub fn contains(self, f: ConnFlag) -> bool {
        self.0 & f.bit() != 0
    }
}

/// One live connection, bound to exactly one identity.
#[derive(Debug)]
pub struct Connection {
    pub conn: ConnId,
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub appearance: Appearance,
    pub sanctions: SanctionSnapshot,
    pub status: StatusSet,
    pub room_id: Option<String>,
    /// Default until the first move; mirrors the in-room PlayerState.
    pub position: Position,
    pub tx: mpsc::Sender<ServerEvent>,
    /// Flipping this to true tells the socket task to close.
    pub shutdown: watch::Sender<bool>,
}

/// An identity's replicated state within one room.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub position: Position,
    pub direction: Direction,
    pub appearance: Appearance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomBounds {
    pub width: i32,
    pub height: i32,
}

impl RoomBounds {
    pub fn contains(self, p: Position) -> bool {
        p.x >= 0 && p.y >= 0 && p.x < self.width && p.y < self.height
    }
}

/// Bounds and spawn for a room about to be materialized, typically from the
/// record store; defaults cover rooms the store has never heard of.
#[derive(Debug, Clone, Copy)]
pub struct RoomSetup {
    pub bounds: RoomBounds,
    pub spawn: Position,
}

impl Default for RoomSetup {
    fn default() -> Self {
        Self {
            bounds: RoomBounds {
                width: DEFAULT_ROOM_WIDTH,
                height: DEFAULT_ROOM_HEIGHT,
            },
            spawn: Position::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Furniture {
    kind: String,
    position: Position,
    rotation: u8,
}

/// Membership is created on first join and discarded when the last member
/// leaves; durable room records live in the record store.
#[derive(Debug)]
pub struct Room {
    pub bounds: RoomBounds,
    pub spawn: Position,
    pub locked: bool,
    members: HashMap<String, PlayerState>,
    furniture: HashMap<u64, Furniture>,
    next_item_id: u64,
}

impl Room {
    fn new(setup: RoomSetup) -> Self {
        Self {
            bounds: setup.bounds,
            spawn: setup.spawn,
            locked: false,
            members: HashMap::new(),
            furniture: HashMap::new(),
            next_item_id: 1,
        }
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn member(&self, user_id: &str) -> Option<&PlayerState> {
        self.members.get(user_id)
    }

    fn furniture_snapshot(&self) -> Vec<FurnitureSnapshot> {
        let mut v = self
            .furniture
            .iter()
            .map(|(id, f)| FurnitureSnapshot {
                id: *id,
                kind: f.kind.clone(),
                position: f.position,
                rotation: f.rotation,
            })
            .collect::<Vec<_>>();
        v.sort_by_key(|f| f.id);
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldError {
    NotInRoom,
    InvalidPosition,
    TargetNotFound,
    RoomLocked,
    Frozen,
}

#[derive(Debug, Default)]
pub struct World {
    connections: HashMap<String, Connection>,
    rooms: HashMap<String, Room>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- registry ----

    /// Register a connection, superseding any prior entry for the same
    /// identity. The prior channel is not closed here; its socket task keeps
    /// running until the peer goes away, but its teardown can no longer
    /// touch the registry. Any prior room presence is left first so the old
    /// room sees exactly one departure.
    pub fn register(&mut self, conn: Connection) -> Option<ConnId> {
        let user_id = conn.user_id.clone();
        let superseded = self.connections.get(&user_id).map(|c| c.conn);
        if superseded.is_some() {
            self.leave_current_room(&user_id);
        }
        self.connections.insert(user_id, conn);
        superseded
    }

    /// Tear down the connection identified by (identity, conn id). A no-op
    /// when the registry holds a successor, so a superseded socket's exit
    /// cannot evict the live connection; the leave transition therefore runs
    /// exactly once per registered connection.
    pub fn unregister(&mut self, user_id: &str, conn: ConnId) -> bool {
        match self.connections.get(user_id) {
            Some(c) if c.conn == conn => {}
            _ => return false,
        }
        self.leave_current_room(user_id);
        self.connections.remove(user_id);
        true
    }

    pub fn get(&self, user_id: &str) -> Option<&Connection> {
        self.connections.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut Connection> {
        self.connections.get_mut(user_id)
    }

    /// Resolve a display name to a live connection, case-insensitively.
    pub fn resolve_name(&self, name: &str) -> Option<&Connection> {
        let t = name.trim();
        if t.is_empty() {
            return None;
        }
        self.connections
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(t))
    }

    pub fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    // ---- presence transitions ----

    /// Enter a room, leaving the current one first. The leave must complete
    /// (state removed, old room notified) before the join so the identity is
    /// never present in two rooms at once.
    pub fn join_room(
        &mut self,
        user_id: &str,
        room_id: &str,
        setup: RoomSetup,
        at: Option<Position>,
    ) -> Result<(), WorldError> {
        let (role, name, appearance, invisible) = match self.connections.get(user_id) {
            Some(c) => (
                c.role,
                c.name.clone(),
                c.appearance.clone(),
                c.status.contains(ConnFlag::Invisible),
            ),
            None => return Err(WorldError::NotInRoom),
        };

        if let Some(room) = self.rooms.get(room_id) {
            if room.locked && !roles::has_permission(role, Permission::LockRoom) {
                return Err(WorldError::RoomLocked);
            }
        }

        self.leave_current_room(user_id);

        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(setup));
        let mut spot = at.unwrap_or(room.spawn);
        if !room.bounds.contains(spot) {
            spot = room.spawn;
        }
        room.members.insert(
            user_id.to_string(),
            PlayerState {
                position: spot,
                direction: Direction::default(),
                appearance: appearance.clone(),
            },
        );
        let furniture = room.furniture_snapshot();

        let members = self.member_snapshots(room_id);
        if let Some(c) = self.connections.get_mut(user_id) {
            c.room_id = Some(room_id.to_string());
            c.position = spot;
        }

        self.send_to(
            user_id,
            ServerEvent::RoomJoined {
                room: room_id.to_string(),
                members,
                furniture,
            },
        );
        if !invisible {
            self.broadcast_room(
                room_id,
                Some(user_id),
                &ServerEvent::PlayerJoined {
                    user_id: user_id.to_string(),
                    name,
                    position: spot,
                    direction: Direction::default(),
                    appearance,
                },
            );
        }
        Ok(())
    }

    /// Leave whatever room the identity is in; the remaining members are
    /// notified and an emptied room is discarded. No-op when not in a room.
    pub fn leave_current_room(&mut self, user_id: &str) {
        let Some(room_id) = self
            .connections
            .get(user_id)
            .and_then(|c| c.room_id.clone())
        else {
            return;
        };

        let invisible = self
            .connections
            .get(user_id)
            .map(|c| c.status.contains(ConnFlag::Invisible))
            .unwrap_or(false);

        let emptied = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.members.remove(user_id);
                room.members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms.remove(&room_id);
        }
        if let Some(c) = self.connections.get_mut(user_id) {
            c.room_id = None;
        }

        if !invisible {
            self.broadcast_room(
                &room_id,
                None,
                &ServerEvent::PlayerLeft {
                    user_id: user_id.to_string(),
                },
            );
        }
    }

    /// Move within the current room. Only the identity's own state is
    /// touched; the new position fans out to everyone else in the room.
    pub fn move_to(&mut self, user_id: &str, to: Position) -> Result<(), WorldError> {
        let conn = self.connections.get(user_id).ok_or(WorldError::NotInRoom)?;
        if conn.status.contains(ConnFlag::Frozen) {
            return Err(WorldError::Frozen);
        }
        let room_id = conn.room_id.clone().ok_or(WorldError::NotInRoom)?;

        let room = self.rooms.get_mut(&room_id).ok_or(WorldError::NotInRoom)?;
        if !room.bounds.contains(to) {
            return Err(WorldError::InvalidPosition);
        }
        let member = room.members.get_mut(user_id).ok_or(WorldError::NotInRoom)?;
        let direction = Direction::from_step(member.position, to).unwrap_or(member.direction);
        member.position = to;
        member.direction = direction;

        if let Some(c) = self.connections.get_mut(user_id) {
            c.position = to;
        }

        self.broadcast_room(
            &room_id,
            Some(user_id),
            &ServerEvent::PlayerMoved {
                user_id: user_id.to_string(),
                position: to,
                direction,
            },
        );
        Ok(())
    }

    /// Route a chat line. Shout and normal go to the whole room (normal
    /// carries the speaker's position for receiver-side distance fading);
    /// whispers go to the sender and the exact named target only.
    pub fn chat(
        &self,
        user_id: &str,
        text: String,
        mode: ChatMode,
        whisper_to: Option<&str>,
    ) -> Result<(), WorldError> {
        let conn = self.connections.get(user_id).ok_or(WorldError::NotInRoom)?;
        let room_id = conn.room_id.as_deref().ok_or(WorldError::NotInRoom)?;
        let room = self.rooms.get(room_id).ok_or(WorldError::NotInRoom)?;
        let position = room
            .member(user_id)
            .map(|m| m.position)
            .unwrap_or(conn.position);

        let ev = ServerEvent::ChatMessage {
            from_id: user_id.to_string(),
            from_name: conn.name.clone(),
            mode,
            text,
            position,
        };

        match mode {
            ChatMode::Whisper => {
                let target_name = whisper_to.ok_or(WorldError::TargetNotFound)?;
                let target_id = room
                    .members
                    .keys()
                    .find(|id| {
                        self.connections
                            .get(*id)
                            .is_some_and(|c| c.name.eq_ignore_ascii_case(target_name.trim()))
                    })
                    .cloned()
                    .ok_or(WorldError::TargetNotFound)?;
                self.send_to(&target_id, ev.clone());
                if target_id != user_id {
                    self.send_to(user_id, ev);
                }
                Ok(())
            }
            ChatMode::Normal | ChatMode::Shout => {
                self.broadcast_room(room_id, None, &ev);
                Ok(())
            }
        }
    }

    // ---- furniture ----

    pub fn place_furniture(
        &mut self,
        user_id: &str,
        kind: String,
        position: Position,
        rotation: u8,
    ) -> Result<u64, WorldError> {
        let room_id = self.current_room_id(user_id)?;
        let room = self.rooms.get_mut(&room_id).ok_or(WorldError::NotInRoom)?;
        if !room.bounds.contains(position) {
            return Err(WorldError::InvalidPosition);
        }
        let id = room.next_item_id;
        room.next_item_id += 1;
        room.furniture.insert(
            id,
            Furniture {
                kind: kind.clone(),
                position,
                rotation,
            },
        );

        self.broadcast_room(
            &room_id,
            None,
            &ServerEvent::FurniturePlaced {
                by: user_id.to_string(),
                item: FurnitureSnapshot {
                    id,
                    kind,
                    position,
                    rotation,
                },
            },
        );
        Ok(id)
    }

    pub fn remove_furniture(&mut self, user_id: &str, id: u64) -> Result<(), WorldError> {
        let room_id = self.current_room_id(user_id)?;
        let room = self.rooms.get_mut(&room_id).ok_or(WorldError::NotInRoom)?;
        if room.furniture.remove(&id).is_none() {
            return Err(WorldError::TargetNotFound);
        }
        self.broadcast_room(&room_id, None, &ServerEvent::FurnitureRemoved { id });
        Ok(())
    }

    pub fn rotate_furniture(
        &mut self,
        user_id: &str,
        id: u64,
        rotation: u8,
    ) -> Result<(), WorldError> {
        let room_id = self.current_room_id(user_id)?;
        let room = self.rooms.get_mut(&room_id).ok_or(WorldError::NotInRoom)?;
        let item = room.furniture.get_mut(&id).ok_or(WorldError::TargetNotFound)?;
        item.rotation = rotation;
        self.broadcast_room(&room_id, None, &ServerEvent::FurnitureRotated { id, rotation });
        Ok(())
    }

    // ---- fan-out ----

    pub fn send_to(&self, user_id: &str, ev: ServerEvent) {
        if let Some(c) = self.connections.get(user_id) {
            if c.tx.try_send(ev).is_err() {
                warn!(user = %c.name, "event channel full, dropping event");
            }
        }
    }

    pub fn broadcast_room(&self, room_id: &str, except: Option<&str>, ev: &ServerEvent) {
        let Some(room) = self.rooms.get(room_id) else {
            debug!(room = %room_id, "broadcast to unknown room dropped");
            return;
        };
        for id in room.members.keys() {
            if except == Some(id.as_str()) {
                continue;
            }
            self.send_to(id, ev.clone());
        }
    }

    pub fn broadcast_all(&self, ev: &ServerEvent) {
        for c in self.connections.values() {
            if c.tx.try_send(ev.clone()).is_err() {
                warn!(user = %c.name, "event channel full, dropping event");
            }
        }
    }

    // ---- helpers ----

    fn current_room_id(&self, user_id: &str) -> Result<String, WorldError> {
        self.connections
            .get(user_id)
            .and_then(|c| c.room_id.clone())
            .ok_or(WorldError::NotInRoom)
    }

    fn member_snapshots(&self, room_id: &str) -> Vec<MemberSnapshot> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut out = room
            .members
            .iter()
            .filter_map(|(id, st)| {
                let name = self.connections.get(id)?.name.clone();
                Some(MemberSnapshot {
                    user_id: id.clone(),
                    name,
                    position: st.position,
                    direction: st.direction,
                    appearance: st.appearance.clone(),
                })
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotelproto::types::ConnId;

    fn test_conn(
        n: u128,
        name: &str,
        role: Role,
    ) -> (Connection, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown, _) = watch::channel(false);
        let conn = Connection {
            conn: ConnId(n),
            user_id: name.to_ascii_lowercase(),
            name: name.to_string(),
            role,
            appearance: Appearance::default(),
            sanctions: SanctionSnapshot::default(),
            status: StatusSet::default(),
            room_id: None,
            position: Position::default(),
            tx,
            shutdown,
        };
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn small_room() -> RoomSetup {
        RoomSetup {
            bounds: RoomBounds {
                width: 20,
                height: 15,
            },
            spawn: Position::new(1, 1),
        }
    }

    #[test]
    fn switching_rooms_emits_one_left_then_one_joined() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        let (b, mut rx_b) = test_conn(2, "Bob", Role::User);
        let (c, mut rx_c) = test_conn(3, "Cleo", Role::User);
        w.register(a);
        w.register(b);
        w.register(c);

        w.join_room("alice", "r1", small_room(), None).unwrap();
        w.join_room("bob", "r1", small_room(), None).unwrap();
        w.join_room("cleo", "r2", small_room(), None).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        // Bob switches r1 -> r2.
        w.join_room("bob", "r2", small_room(), None).unwrap();

        let to_a = drain(&mut rx_a);
        assert_eq!(to_a.len(), 1);
        assert!(
            matches!(&to_a[0], ServerEvent::PlayerLeft { user_id } if user_id == "bob"),
            "got {to_a:?}"
        );

        let to_c = drain(&mut rx_c);
        assert_eq!(to_c.len(), 1);
        assert!(
            matches!(&to_c[0], ServerEvent::PlayerJoined { user_id, .. } if user_id == "bob"),
            "got {to_c:?}"
        );

        let to_b = drain(&mut rx_b);
        assert!(
            matches!(&to_b[0], ServerEvent::RoomJoined { room, .. } if room == "r2"),
            "got {to_b:?}"
        );
        assert_eq!(w.get("bob").unwrap().room_id.as_deref(), Some("r2"));
    }

    #[test]
    fn whisper_reaches_only_sender_and_target() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        let (b, mut rx_b) = test_conn(2, "Bob", Role::User);
        let (c, mut rx_c) = test_conn(3, "Cleo", Role::User);
        w.register(a);
        w.register(b);
        w.register(c);
        for id in ["alice", "bob", "cleo"] {
            w.join_room(id, "r1", small_room(), None).unwrap();
        }
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        w.chat("alice", "psst".to_string(), ChatMode::Whisper, Some("BOB"))
            .unwrap();

        assert_eq!(drain(&mut rx_a).len(), 1);
        let to_b = drain(&mut rx_b);
        assert_eq!(to_b.len(), 1);
        assert!(
            matches!(&to_b[0], ServerEvent::ChatMessage { text, mode, .. }
                if text == "psst" && *mode == ChatMode::Whisper)
        );
        assert!(drain(&mut rx_c).is_empty(), "third party saw a whisper");
    }

    #[test]
    fn whisper_to_unknown_target_sends_nothing() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        w.register(a);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        drain(&mut rx_a);

        let err = w
            .chat("alice", "hi".to_string(), ChatMode::Whisper, Some("nobody"))
            .unwrap_err();
        assert_eq!(err, WorldError::TargetNotFound);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn shout_reaches_every_member() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        let (b, mut rx_b) = test_conn(2, "Bob", Role::User);
        w.register(a);
        w.register(b);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        w.join_room("bob", "r1", small_room(), None).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        w.chat("alice", "hey!".to_string(), ChatMode::Shout, None)
            .unwrap();
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn out_of_bounds_move_is_rejected_without_broadcast() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        let (b, mut rx_b) = test_conn(2, "Bob", Role::User);
        w.register(a);
        w.register(b);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        w.join_room("bob", "r1", small_room(), None).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let err = w.move_to("alice", Position::new(25, 10)).unwrap_err();
        assert_eq!(err, WorldError::InvalidPosition);
        assert!(drain(&mut rx_b).is_empty());
        let st = w.room("r1").unwrap().member("alice").unwrap().clone();
        assert_eq!(st.position, Position::new(1, 1));
    }

    #[test]
    fn move_broadcasts_to_others_not_origin() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        let (b, mut rx_b) = test_conn(2, "Bob", Role::User);
        w.register(a);
        w.register(b);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        w.join_room("bob", "r1", small_room(), None).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        w.move_to("alice", Position::new(2, 1)).unwrap();

        assert!(drain(&mut rx_a).is_empty(), "origin echoed its own move");
        let to_b = drain(&mut rx_b);
        assert_eq!(to_b.len(), 1);
        assert!(matches!(
            &to_b[0],
            ServerEvent::PlayerMoved {
                user_id,
                position,
                direction: Direction::East,
            } if user_id == "alice" && *position == Position::new(2, 1)
        ));
    }

    #[test]
    fn frozen_connection_cannot_move() {
        let mut w = World::new();
        let (a, _rx_a) = test_conn(1, "Alice", Role::User);
        w.register(a);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        w.get_mut("alice").unwrap().status.insert(ConnFlag::Frozen);

        let err = w.move_to("alice", Position::new(2, 2)).unwrap_err();
        assert_eq!(err, WorldError::Frozen);
    }

    #[test]
    fn move_while_not_in_room_is_rejected() {
        let mut w = World::new();
        let (a, _rx_a) = test_conn(1, "Alice", Role::User);
        w.register(a);
        assert_eq!(
            w.move_to("alice", Position::new(1, 1)).unwrap_err(),
            WorldError::NotInRoom
        );
    }

    #[test]
    fn register_supersedes_and_guards_teardown() {
        let mut w = World::new();
        let (a1, _rx1) = test_conn(1, "Alice", Role::User);
        w.register(a1);
        w.join_room("alice", "r1", small_room(), None).unwrap();

        let (a2, _rx2) = test_conn(2, "Alice", Role::User);
        let superseded = w.register(a2);
        assert_eq!(superseded, Some(ConnId(1)));
        // Supersede left the old presence; no ghost in r1.
        assert!(w.room("r1").is_none());

        // The superseded socket's teardown must not evict the successor.
        assert!(!w.unregister("alice", ConnId(1)));
        assert!(w.get("alice").is_some());

        assert!(w.unregister("alice", ConnId(2)));
        assert!(w.get("alice").is_none());
        // Teardown is exactly-once.
        assert!(!w.unregister("alice", ConnId(2)));
    }

    #[test]
    fn invisible_joins_and_leaves_are_silent_but_snapshotted() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::Admin);
        let (b, mut rx_b) = test_conn(2, "Bob", Role::User);
        w.register(a);
        w.register(b);
        w.get_mut("alice")
            .unwrap()
            .status
            .insert(ConnFlag::Invisible);

        w.join_room("bob", "r1", small_room(), None).unwrap();
        drain(&mut rx_b);

        w.join_room("alice", "r1", small_room(), None).unwrap();
        assert!(drain(&mut rx_b).is_empty(), "invisible join was announced");

        // The snapshot still contains the invisible member.
        w.join_room("bob", "r1", small_room(), None).unwrap();
        let evs = drain(&mut rx_b);
        let snapshot = evs
            .iter()
            .find_map(|e| match e {
                ServerEvent::RoomJoined { members, .. } => Some(members),
                _ => None,
            })
            .expect("room_joined");
        assert!(snapshot.iter().any(|m| m.user_id == "alice"));

        drain(&mut rx_a);
        w.leave_current_room("alice");
        assert!(drain(&mut rx_b).is_empty(), "invisible leave was announced");
    }

    #[test]
    fn emptied_room_is_discarded() {
        let mut w = World::new();
        let (a, _rx) = test_conn(1, "Alice", Role::User);
        w.register(a);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        assert!(w.room("r1").is_some());
        w.leave_current_room("alice");
        assert!(w.room("r1").is_none());
    }

    #[test]
    fn locked_room_refuses_unprivileged_joins() {
        let mut w = World::new();
        let (a, _rx_a) = test_conn(1, "Alice", Role::Admin);
        let (b, _rx_b) = test_conn(2, "Bob", Role::User);
        w.register(a);
        w.register(b);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        w.room_mut("r1").unwrap().locked = true;

        assert_eq!(
            w.join_room("bob", "r1", small_room(), None).unwrap_err(),
            WorldError::RoomLocked
        );
        // Staff with the lock_room permission still get in.
        let (c, _rx_c) = test_conn(3, "Cleo", Role::Owner);
        w.register(c);
        assert!(w.join_room("cleo", "r1", small_room(), None).is_ok());
    }

    #[test]
    fn furniture_lifecycle_broadcasts_and_validates() {
        let mut w = World::new();
        let (a, mut rx_a) = test_conn(1, "Alice", Role::User);
        w.register(a);
        w.join_room("alice", "r1", small_room(), None).unwrap();
        drain(&mut rx_a);

        let id = w
            .place_furniture("alice", "plant".to_string(), Position::new(3, 3), 0)
            .unwrap();
        assert_eq!(
            w.place_furniture("alice", "plant".to_string(), Position::new(99, 3), 0)
                .unwrap_err(),
            WorldError::InvalidPosition
        );

        w.rotate_furniture("alice", id, 2).unwrap();
        assert_eq!(
            w.rotate_furniture("alice", 999, 2).unwrap_err(),
            WorldError::TargetNotFound
        );
        w.remove_furniture("alice", id).unwrap();
        assert_eq!(
            w.remove_furniture("alice", id).unwrap_err(),
            WorldError::TargetNotFound
        );

        let evs = drain(&mut rx_a);
        assert_eq!(evs.len(), 3);
        assert!(matches!(evs[0], ServerEvent::FurniturePlaced { .. }));
        assert!(matches!(evs[1], ServerEvent::FurnitureRotated { rotation: 2, .. }));
        assert!(matches!(evs[2], ServerEvent::FurnitureRemoved { .. }));
    }
}
