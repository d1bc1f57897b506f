//! REST client for the external record store.
//!
//! The store owns accounts, rooms, and sanctions; the gateway only ever does
//! simple reads and sanction writes. Every method surfaces transport and
//! non-2xx failures as errors for the caller to handle; nothing here retries.

use serde::Deserialize;

use hotelproto::types::{Appearance, Position};

use crate::roles::Role;
use crate::sanction::{SanctionKind, SanctionState};

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub ban: SanctionState,
    #[serde(default)]
    pub mute: SanctionState,
    #[serde(default)]
    pub appearance: Appearance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomRecord {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub spawn: Option<Position>,
}

/// One active sanction as listed by the store, for the background sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredSanction {
    pub user_id: String,
    pub kind: SanctionKind,
    pub state: SanctionState,
}

#[derive(Clone)]
pub struct RecordStore {
    http: reqwest::Client,
    base: String,
}

impl RecordStore {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_identity(&self, id: &str) -> anyhow::Result<Option<IdentityRecord>> {
        let url = format!("{}/identities/{}", self.base, id);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "record store returned {} for {url}",
                resp.status()
            ));
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn fetch_room(&self, id: &str) -> anyhow::Result<Option<RoomRecord>> {
        let url = format!("{}/rooms/{}", self.base, id);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "record store returned {} for {url}",
                resp.status()
            ));
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn put_sanction(
        &self,
        user_id: &str,
        kind: SanctionKind,
        state: &SanctionState,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/identities/{}/sanctions/{}",
            self.base,
            user_id,
            kind.as_str()
        );
        let resp = self.http.put(&url).json(state).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "record store returned {} for {url}",
                resp.status()
            ));
        }
        Ok(())
    }

    /// Lift a sanction. Idempotent: a 404 means it was already clear.
    pub async fn clear_sanction(&self, user_id: &str, kind: SanctionKind) -> anyhow::Result<()> {
        let url = format!(
            "{}/identities/{}/sanctions/{}",
            self.base,
            user_id,
            kind.as_str()
        );
        let resp = self.http.delete(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        Err(anyhow::anyhow!(
            "record store returned {} for {url}",
            resp.status()
        ))
    }

    pub async fn list_active_sanctions(&self) -> anyhow::Result<Vec<StoredSanction>> {
        let url = format!("{}/sanctions?active=true", self.base);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "record store returned {} for {url}",
                resp.status()
            ));
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_record_defaults_missing_sanctions() {
        let rec: IdentityRecord = serde_json::from_str(
            r#"{"id":"u1","name":"Alice","role":"moderator"}"#,
        )
        .unwrap();
        assert_eq!(rec.role, Role::Moderator);
        assert!(!rec.ban.active);
        assert!(!rec.mute.active);
        assert!(rec.appearance.figure.is_empty());
    }

    #[test]
    fn room_record_parses_bounds_and_ignores_extras() {
        let rec: RoomRecord = serde_json::from_str(
            r#"{"id":"lobby","name":"Lobby","width":20,"height":15,"spawn":{"x":4,"y":2}}"#,
        )
        .unwrap();
        assert_eq!((rec.width, rec.height), (20, 15));
        assert_eq!(rec.spawn.unwrap(), Position::new(4, 2));
    }
}
