//! `hotelproto`: the wire protocol shared by slophotel services.
//!
//! Everything on the wire is JSON: one object per WebSocket text frame, with
//! an `op` discriminator naming the event. Clients send [`event::ClientEvent`],
//! the gateway sends [`event::ServerEvent`]. Rejections that must be surfaced
//! to the actor carry a stable [`ErrorCode`] alongside a human-readable
//! message; the code is the machine contract, the message is not.

pub mod event;
pub mod types;

use serde::{Deserialize, Serialize};

/// Stable error codes for surfaced rejections.
///
/// These are part of the wire contract; clients switch on the code and show
/// the message. Codes never carry dynamic data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailed,
    Banned,
    Muted,
    InvalidDuration,
    DurationNotAllowed,
    PermissionDenied,
    InsufficientRank,
    TargetNotFound,
    NotInRoom,
    InvalidPosition,
    /// A collaborator call failed; the command had no effect.
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::Banned => "banned",
            ErrorCode::Muted => "muted",
            ErrorCode::InvalidDuration => "invalid_duration",
            ErrorCode::DurationNotAllowed => "duration_not_allowed",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InsufficientRank => "insufficient_rank",
            ErrorCode::TargetNotFound => "target_not_found",
            ErrorCode::NotInRoom => "not_in_room",
            ErrorCode::InvalidPosition => "invalid_position",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
