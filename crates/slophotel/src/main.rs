use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{Level, debug, info, warn};

use hotelproto::ErrorCode;
use hotelproto::event::{ClientEvent, ServerEvent};
use hotelproto::types::{ChatMode, ConnId, Position};

mod admin;
mod audit;
mod auth;
mod facts;
mod records;
mod roles;
mod sanction;
mod world;

use crate::facts::FactKind;
use crate::records::RoomRecord;
use crate::sanction::{SanctionCheck, SanctionKind, SanctionSnapshot};
use crate::world::{RoomBounds, RoomSetup, StatusSet, World, WorldError};

/// Outbound events buffered per connection before we start dropping.
const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    records_url: String,
    token_secret: String,
    facts_url: Option<String>,
    audit: audit::AuditConfig,
    sweep_interval_s: u64,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "slophotel\n\n\
USAGE:\n  slophotel [--bind HOST:PORT] [--records-url URL] [--token-secret SECRET]\n\
            [--facts-url URL] [--audit-dir DIR] [--sweep-interval-s SECS]\n\n\
ENV:\n  HOTEL_BIND              default 127.0.0.1:4200\n\
  HOTEL_RECORDS_URL       default http://127.0.0.1:4600\n\
  HOTEL_TOKEN_SECRET      required\n\
  HOTEL_FACTS_URL         optional; unset disables fact emission\n\
  HOTEL_AUDIT_DIR         default locks/audit\n\
  HOTEL_AUDIT_ENABLED     default 1\n\
  HOTEL_AUDIT_FLUSH_S     default 10\n\
  HOTEL_SWEEP_INTERVAL_S  default 60\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("HOTEL_BIND")
        .unwrap_or_else(|_| "127.0.0.1:4200".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut records_url =
        std::env::var("HOTEL_RECORDS_URL").unwrap_or_else(|_| "http://127.0.0.1:4600".to_string());
    let mut token_secret = std::env::var("HOTEL_TOKEN_SECRET").ok();
    let mut facts_url = std::env::var("HOTEL_FACTS_URL").ok().filter(|s| !s.is_empty());
    let mut audit_dir = PathBuf::from(
        std::env::var("HOTEL_AUDIT_DIR").unwrap_or_else(|_| "locks/audit".to_string()),
    );
    let audit_enabled = std::env::var("HOTEL_AUDIT_ENABLED")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let audit_flush_s = std::env::var("HOTEL_AUDIT_FLUSH_S")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let mut sweep_interval_s: u64 = std::env::var("HOTEL_SWEEP_INTERVAL_S")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--records-url" => {
                records_url = it.next().unwrap_or_else(|| usage_and_exit());
            }
            "--token-secret" => {
                token_secret = Some(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            "--facts-url" => {
                facts_url = Some(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            "--audit-dir" => {
                audit_dir = PathBuf::from(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            "--sweep-interval-s" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                sweep_interval_s = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    let Some(token_secret) = token_secret.filter(|s| !s.is_empty()) else {
        eprintln!("missing HOTEL_TOKEN_SECRET (or --token-secret)");
        std::process::exit(2);
    };

    Config {
        bind,
        records_url,
        token_secret,
        facts_url,
        audit: audit::AuditConfig {
            enabled: audit_enabled,
            spool_dir: audit_dir,
            flush_interval_s: audit_flush_s,
        },
        sweep_interval_s,
    }
}

/// Everything a handler needs, behind one Arc. The world mutex is the only
/// lock; collaborator clients are internally cheap to clone.
pub struct Gateway {
    pub world: tokio::sync::Mutex<World>,
    pub records: records::RecordStore,
    pub audit: audit::AuditLog,
    pub facts: facts::FactSink,
    pub verifier: auth::TokenVerifier,
}

fn new_conn_id() -> ConnId {
    let mut b = [0u8; 16];
    getrandom::getrandom(&mut b).expect("getrandom");
    ConnId::from_be_bytes(b)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slophotel=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let listener = TcpListener::bind(cfg.bind).await?;
    info!(bind = %cfg.bind, "slophotel listening");

    let gw = Arc::new(Gateway {
        world: tokio::sync::Mutex::new(World::new()),
        records: records::RecordStore::new(&cfg.records_url),
        audit: audit::AuditLog::new(cfg.audit.clone()),
        facts: facts::FactSink::new(cfg.facts_url.clone()),
        verifier: auth::TokenVerifier::new(&cfg.token_secret),
    });

    tokio::spawn(sanction_sweep_task(
        gw.clone(),
        Duration::from_secs(cfg.sweep_interval_s.max(5)),
    ));

    loop {
        let (stream, peer) = listener.accept().await?;
        let gw = gw.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(gw, stream, peer).await {
                warn!(peer = %peer, err = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_conn(gw: Arc<Gateway>, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
    // The bearer credential is checked inside the upgrade: a missing or bad
    // token refuses the handshake with 401, never an in-band error event.
    let mut claims: Option<auth::Claims> = None;
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match auth::bearer_token(req).and_then(|t| gw.verifier.verify(&t).ok()) {
            Some(c) => {
                claims = Some(c);
                Ok(resp)
            }
            None => {
                let mut r = ErrorResponse::new(Some("authentication failed".to_string()));
                *r.status_mut() = StatusCode::UNAUTHORIZED;
                Err(r)
            }
        }
    })
    .await?;
    let claims = claims.context("handshake accepted without claims")?;
    let user_id = claims.sub;

    // Load the identity before touching any gateway state.
    let Some(rec) = gw.records.fetch_identity(&user_id).await? else {
        info!(peer = %peer, user = %user_id, "unknown identity, refusing");
        let _ = ws.close(None).await;
        return Ok(());
    };

    // Ban gate. Observing a lapsed ban clears it in the store right here.
    let now = Utc::now();
    let mut ban = rec.ban.clone();
    match sanction::check(&mut ban, now) {
        SanctionCheck::Active => {
            info!(peer = %peer, user = %rec.name, "banned identity refused");
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "banned".into(),
                }))
                .await;
            return Ok(());
        }
        SanctionCheck::Lapsed => {
            if let Err(e) = gw.records.clear_sanction(&user_id, SanctionKind::Ban).await {
                warn!(user = %rec.name, err = %e, "lazy ban clear failed");
            }
        }
        SanctionCheck::Inactive => {}
    }
    let mut mute = rec.mute.clone();
    if sanction::check(&mut mute, now) == SanctionCheck::Lapsed {
        if let Err(e) = gw.records.clear_sanction(&user_id, SanctionKind::Mute).await {
            warn!(user = %rec.name, err = %e, "lazy mute clear failed");
        }
    }

    let conn_id = new_conn_id();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    {
        let mut w = gw.world.lock().await;
        let superseded = w.register(world::Connection {
            conn: conn_id,
            user_id: user_id.clone(),
            name: rec.name.clone(),
            role: rec.role,
            appearance: rec.appearance.clone(),
            sanctions: SanctionSnapshot { ban, mute },
            status: StatusSet::default(),
            room_id: None,
            position: Position::default(),
            tx,
            shutdown: shutdown_tx,
        });
        if let Some(old) = superseded {
            info!(user = %rec.name, old = %old, new = %conn_id, "superseded prior connection");
        }
    }
    info!(peer = %peer, user = %rec.name, conn = %conn_id, "connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                ev = rx.recv() => {
                    let Some(ev) = ev else { break };
                    let s = match serde_json::to_string(&ev) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(err = %e, "event serialization failed");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(s)).await.is_err() {
                        break;
                    }
                }
                res = shutdown_rx.changed() => {
                    match res {
                        Ok(()) if *shutdown_rx.borrow() => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        }
                        Ok(()) => {}
                        // Registry entry gone (superseded): stop writing but
                        // leave the socket alone.
                        Err(_) => break,
                    }
                }
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(user = %rec.name, err = %e, "read error");
                break;
            }
        };
        match msg {
            Message::Text(s) => {
                let ev: ClientEvent = match serde_json::from_str(&s) {
                    Ok(ev) => ev,
                    Err(e) => {
                        // Cheap for the client to retry; log and drop.
                        debug!(user = %rec.name, err = %e, "malformed frame dropped");
                        continue;
                    }
                };
                dispatch_event(&gw, &user_id, conn_id, ev).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
    }

    // Teardown runs exactly once per registered connection: a superseded
    // socket's exit is a registry no-op and must not disturb its successor.
    {
        let mut w = gw.world.lock().await;
        if w.unregister(&user_id, conn_id) {
            info!(user = %rec.name, conn = %conn_id, "disconnected");
        }
    }
    let _ = writer.await;
    Ok(())
}

fn world_error_parts(e: WorldError) -> (ErrorCode, &'static str) {
    match e {
        WorldError::NotInRoom => (ErrorCode::NotInRoom, "you are not in a room"),
        WorldError::InvalidPosition => (ErrorCode::InvalidPosition, "position is out of bounds"),
        WorldError::TargetNotFound => (ErrorCode::TargetNotFound, "no such target"),
        WorldError::RoomLocked => (ErrorCode::PermissionDenied, "room is locked"),
        WorldError::Frozen => (ErrorCode::PermissionDenied, "you are frozen"),
    }
}

async fn send_event(gw: &Gateway, user_id: &str, ev: ServerEvent) {
    let w = gw.world.lock().await;
    w.send_to(user_id, ev);
}

async fn send_world_error(gw: &Gateway, user_id: &str, e: WorldError) {
    let (code, message) = world_error_parts(e);
    send_event(
        gw,
        user_id,
        ServerEvent::Error {
            code,
            message: message.to_string(),
        },
    )
    .await;
}

fn room_setup_from(rec: &RoomRecord) -> RoomSetup {
    let bounds = RoomBounds {
        width: rec.width.max(1),
        height: rec.height.max(1),
    };
    let spawn = rec
        .spawn
        .filter(|p| bounds.contains(*p))
        .unwrap_or_default();
    RoomSetup { bounds, spawn }
}

async fn dispatch_event(gw: &Gateway, user_id: &str, conn: ConnId, ev: ClientEvent) {
    // Input from a superseded socket acts on nothing: the identity's
    // registry entry belongs to a newer connection.
    {
        let w = gw.world.lock().await;
        match w.get(user_id) {
            Some(c) if c.conn == conn => {}
            _ => {
                debug!(user = %user_id, conn = %conn, "input from superseded connection dropped");
                return;
            }
        }
    }

    match ev {
        ClientEvent::JoinRoom { room } => {
            let setup = match gw.records.fetch_room(&room).await {
                Ok(Some(rec)) => room_setup_from(&rec),
                Ok(None) => RoomSetup::default(),
                Err(e) => {
                    warn!(room = %room, err = %e, "room record fetch failed, using defaults");
                    RoomSetup::default()
                }
            };
            let res = gw.world.lock().await.join_room(user_id, &room, setup, None);
            match res {
                Ok(()) => gw.facts.emit(user_id, FactKind::RoomJoined, 1),
                Err(e) => send_world_error(gw, user_id, e).await,
            }
        }

        ClientEvent::Move { x, y } => {
            let res = gw.world.lock().await.move_to(user_id, Position::new(x, y));
            match res {
                Ok(()) => gw.facts.emit(user_id, FactKind::Moved, 1),
                // Out-of-bounds, frozen, and roomless moves are dropped
                // silently; the client just retries.
                Err(e) => debug!(user = %user_id, err = ?e, "move dropped"),
            }
        }

        ClientEvent::ChatMessage { text, mode, to } => {
            // Mute goes through the sanction engine; observing a lapsed
            // record clears it in the store.
            let verdict = {
                let mut w = gw.world.lock().await;
                w.get_mut(user_id)
                    .map(|c| sanction::check(&mut c.sanctions.mute, Utc::now()))
            };
            match verdict {
                Some(SanctionCheck::Active) => {
                    send_event(
                        gw,
                        user_id,
                        ServerEvent::Error {
                            code: ErrorCode::Muted,
                            message: "you are muted".to_string(),
                        },
                    )
                    .await;
                    return;
                }
                Some(SanctionCheck::Lapsed) => {
                    if let Err(e) = gw.records.clear_sanction(user_id, SanctionKind::Mute).await {
                        warn!(user = %user_id, err = %e, "lazy mute clear failed");
                    }
                }
                _ => {}
            }

            let res = gw.world.lock().await.chat(user_id, text, mode, to.as_deref());
            match res {
                Ok(()) => {
                    let kind = match mode {
                        ChatMode::Normal => FactKind::ChatSent,
                        ChatMode::Shout => FactKind::ShoutSent,
                        ChatMode::Whisper => FactKind::WhisperSent,
                    };
                    gw.facts.emit(user_id, kind, 1);
                }
                Err(e) => send_world_error(gw, user_id, e).await,
            }
        }

        ClientEvent::PlaceFurniture {
            kind,
            x,
            y,
            rotation,
        } => {
            let res = gw
                .world
                .lock()
                .await
                .place_furniture(user_id, kind, Position::new(x, y), rotation);
            match res {
                Ok(_) => gw.facts.emit(user_id, FactKind::FurniturePlaced, 1),
                Err(e) => send_world_error(gw, user_id, e).await,
            }
        }

        ClientEvent::RemoveFurniture { id } => {
            let res = gw.world.lock().await.remove_furniture(user_id, id);
            match res {
                Ok(()) => gw.facts.emit(user_id, FactKind::FurnitureRemoved, 1),
                Err(e) => send_world_error(gw, user_id, e).await,
            }
        }

        ClientEvent::RotateFurniture { id, rotation } => {
            let res = gw.world.lock().await.rotate_furniture(user_id, id, rotation);
            match res {
                Ok(()) => gw.facts.emit(user_id, FactKind::FurnitureRotated, 1),
                Err(e) => send_world_error(gw, user_id, e).await,
            }
        }

        // Everything else is a privileged verb; the dispatcher owns the
        // permission pipeline and replies admin:success / admin:error.
        admin_ev => match admin::dispatch(gw, user_id, admin_ev).await {
            Ok(message) => send_event(gw, user_id, ServerEvent::AdminSuccess { message }).await,
            Err(e) => {
                send_event(
                    gw,
                    user_id,
                    ServerEvent::AdminError {
                        code: e.code,
                        message: e.message,
                    },
                )
                .await
            }
        },
    }
}

/// Periodic re-check of every sanction snapshot, bounding how stale a lapsed
/// ban or mute can get when nobody happens to observe it. Clearing twice is
/// harmless, so racing a handler's own lazy clear is fine.
async fn sanction_sweep_task(gw: Arc<Gateway>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let now = Utc::now();

        let mut to_clear: Vec<(String, SanctionKind)> = Vec::new();
        {
            let mut w = gw.world.lock().await;
            for c in w.connections_mut() {
                if sanction::check(&mut c.sanctions.ban, now) == SanctionCheck::Lapsed {
                    to_clear.push((c.user_id.clone(), SanctionKind::Ban));
                }
                if sanction::check(&mut c.sanctions.mute, now) == SanctionCheck::Lapsed {
                    to_clear.push((c.user_id.clone(), SanctionKind::Mute));
                }
            }
        }

        // The stored list covers identities that are offline right now.
        match gw.records.list_active_sanctions().await {
            Ok(list) => {
                for s in list {
                    let mut st = s.state;
                    if sanction::check(&mut st, now) == SanctionCheck::Lapsed {
                        to_clear.push((s.user_id, s.kind));
                    }
                }
            }
            Err(e) => warn!(err = %e, "sanction list fetch failed"),
        }

        let mut seen = HashSet::new();
        to_clear.retain(|(u, k)| seen.insert((u.clone(), k.as_str())));

        for (user, kind) in to_clear {
            match gw.records.clear_sanction(&user, kind).await {
                Ok(()) => info!(user = %user, kind = %kind.as_str(), "expired sanction cleared"),
                Err(e) => warn!(user = %user, kind = %kind.as_str(), err = %e, "sweep clear failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_setup_clamps_degenerate_records() {
        let rec = RoomRecord {
            width: 0,
            height: -3,
            spawn: None,
        };
        let setup = room_setup_from(&rec);
        assert_eq!((setup.bounds.width, setup.bounds.height), (1, 1));
        assert_eq!(setup.spawn, Position::default());
    }

    #[test]
    fn room_setup_rejects_out_of_bounds_spawn() {
        let rec = RoomRecord {
            width: 20,
            height: 15,
            spawn: Some(Position::new(30, 2)),
        };
        let setup = room_setup_from(&rec);
        assert_eq!(setup.spawn, Position::default());

        let rec = RoomRecord {
            spawn: Some(Position::new(4, 2)),
            ..rec
        };
        assert_eq!(room_setup_from(&rec).spawn, Position::new(4, 2));
    }

    #[test]
    fn world_errors_map_to_wire_codes() {
        assert_eq!(
            world_error_parts(WorldError::InvalidPosition).0,
            ErrorCode::InvalidPosition
        );
        assert_eq!(
            world_error_parts(WorldError::RoomLocked).0,
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            world_error_parts(WorldError::NotInRoom).0,
            ErrorCode::NotInRoom
        );
    }
}
