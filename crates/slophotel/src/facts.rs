//! Fact emission: best-effort progress pings for the quest collaborator.
//!
//! Gameplay handlers call [`FactSink::emit`] after the event has already
//! happened; the POST runs on its own task and failures are logged and
//! forgotten. Nothing in here can reject or roll back the triggering event.

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Moved,
    ChatSent,
    WhisperSent,
    ShoutSent,
    FurniturePlaced,
    FurnitureRemoved,
    FurnitureRotated,
    RoomJoined,
}

#[derive(Clone)]
pub struct FactSink {
    http: reqwest::Client,
    /// No base URL means emission is disabled entirely.
    base: Option<String>,
}

impl FactSink {
    pub fn new(base: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.map(|b| b.trim_end_matches('/').to_string()),
        }
    }

    pub fn emit(&self, user_id: &str, kind: FactKind, amount: u32) {
        let Some(base) = self.base.clone() else {
            return;
        };
        let http = self.http.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            let body = serde_json::json!({
                "user_id": user_id,
                "kind": kind,
                "amount": amount,
            });
            match http.post(format!("{base}/facts")).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(user = %user_id, kind = ?kind, status = %resp.status(), "fact emit rejected");
                }
                Err(e) => {
                    warn!(user = %user_id, kind = ?kind, err = %e, "fact emit failed");
                }
                Ok(_) => {}
            }
        });
    }
}
