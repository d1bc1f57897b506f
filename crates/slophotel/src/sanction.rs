//! Sanction engine: duration grammar and expiry decisions.
//!
//! This module is the single authority on whether a ban or mute is currently
//! in force. Every other component calls [`check`] instead of reading
//! `active` off a record directly, so the lazy-expiry rule lives in exactly
//! one place: a record that says `active` but whose expiry has passed is
//! reported lapsed, and the caller persists the clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MS_PER_MINUTE: u64 = 60 * 1000;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionKind {
    Ban,
    Mute,
}

impl SanctionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SanctionKind::Ban => "ban",
            SanctionKind::Mute => "mute",
        }
    }
}

/// Parsed sanction span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionLength {
    Permanent,
    Millis(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDuration;

impl std::fmt::Display for InvalidDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid duration (want \"permanent\" or <n>m|h|d|w)")
    }
}

impl std::error::Error for InvalidDuration {}

/// Parse a duration expression: the literal `permanent`, or a positive
/// integer followed by one of `m` (minutes), `h` (hours), `d` (days),
/// `w` (weeks). Anything else is invalid, including zero.
pub fn parse_duration(text: &str) -> Result<SanctionLength, InvalidDuration> {
    let t = text.trim();
    if t.eq_ignore_ascii_case("permanent") {
        return Ok(SanctionLength::Permanent);
    }
    if t.len() < 2 {
        return Err(InvalidDuration);
    }

    let (num, unit) = t.split_at(t.len() - 1);
    let per_unit = match unit {
        "m" => MS_PER_MINUTE,
        "h" => MS_PER_HOUR,
        "d" => MS_PER_DAY,
        "w" => MS_PER_WEEK,
        _ => return Err(InvalidDuration),
    };

    // Reject signs and whitespace outright; u64 parse handles the rest.
    if !num.chars().all(|c| c.is_ascii_digit()) {
        return Err(InvalidDuration);
    }
    let n: u64 = num.parse().map_err(|_| InvalidDuration)?;
    if n == 0 {
        return Err(InvalidDuration);
    }
    n.checked_mul(per_unit)
        .map(SanctionLength::Millis)
        .ok_or(InvalidDuration)
}

/// Stored sanction record, one per kind per identity.
///
/// `expires_at: None` with `active: true` means the sanction never lapses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionState {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
}

impl SanctionState {
    pub fn new(length: SanctionLength, reason: String, now: DateTime<Utc>) -> Self {
        let expires_at = match length {
            SanctionLength::Permanent => None,
            SanctionLength::Millis(ms) => Some(now + chrono::Duration::milliseconds(ms as i64)),
        };
        Self {
            active: true,
            expires_at,
            reason,
        }
    }
}

/// Outcome of observing a sanction at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionCheck {
    /// In force.
    Active,
    /// Not in force and the record agrees.
    Inactive,
    /// The record still says active but the expiry has passed. The caller
    /// must clear the backing record; [`check`] has already cleared the
    /// in-memory copy.
    Lapsed,
}

/// Is the sanction in force right now? Clears the in-memory record when it
/// has lapsed; clearing an already-cleared record is a no-op, so repeated
/// observation is safe.
pub fn check(s: &mut SanctionState, now: DateTime<Utc>) -> SanctionCheck {
    if !s.active {
        return SanctionCheck::Inactive;
    }
    if is_active(s, now) {
        return SanctionCheck::Active;
    }
    s.active = false;
    s.reason.clear();
    SanctionCheck::Lapsed
}

/// Read-only variant of [`check`] for call sites that cannot persist a clear
/// (pure queries). Prefer [`check`].
pub fn is_active(s: &SanctionState, now: DateTime<Utc>) -> bool {
    s.active && s.expires_at.map_or(true, |exp| exp > now)
}

/// Cached ban/mute pair held per live connection.
#[derive(Debug, Clone, Default)]
pub struct SanctionSnapshot {
    pub ban: SanctionState,
    pub mute: SanctionState,
}

impl SanctionSnapshot {
    pub fn get_mut(&mut self, kind: SanctionKind) -> &mut SanctionState {
        match kind {
            SanctionKind::Ban => &mut self.ban,
            SanctionKind::Mute => &mut self.mute,
        }
    }
}
