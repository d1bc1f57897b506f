//! Append-only audit log for privileged effects.
//!
//! One JSON record per line, day-partitioned under the spool directory
//! (`v1/audit/YYYY/MM/DD.log`). Records are never rewritten; the writer only
//! appends and flushes. Audit failures are logged and must not fail the
//! command that produced the record.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

const AUDIT_LAYOUT_VERSION: &str = "v1";

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub enabled: bool,
    pub spool_dir: PathBuf,
    pub flush_interval_s: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spool_dir: PathBuf::from("locks/audit"),
            flush_interval_s: 10,
        }
    }
}

/// One privileged effect, written once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub action: String,
    pub reason: String,
    pub detail: String,
}

pub struct AuditLog {
    cfg: AuditConfig,
    inner: Arc<Mutex<LocalWriter>>,
}

impl AuditLog {
    pub fn new(cfg: AuditConfig) -> Self {
        let inner = Arc::new(Mutex::new(LocalWriter::new(cfg.spool_dir.clone())));

        if cfg.enabled {
            let flush_inner = inner.clone();
            let d = Duration::from_secs(cfg.flush_interval_s.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(d).await;
                    let mut w = flush_inner.lock().await;
                    if let Err(e) = w.flush() {
                        warn!(err = %e, "audit flush failed");
                    }
                }
            });
        }

        Self { cfg, inner }
    }

    pub async fn append(&self, rec: &AuditRecord) {
        if !self.cfg.enabled {
            return;
        }
        let line = match serde_json::to_string(rec) {
            Ok(s) => s,
            Err(e) => {
                warn!(err = %e, "audit record serialization failed");
                return;
            }
        };
        let mut w = self.inner.lock().await;
        w.write_line(rec.at.date_naive(), &line);
    }
}

fn relpath(date: NaiveDate) -> String {
    format!(
        "{}/audit/{:04}/{:02}/{:02}.log",
        AUDIT_LAYOUT_VERSION,
        date.year(),
        date.month(),
        date.day()
    )
}

struct LocalWriter {
    root: PathBuf,
    open: Option<(NaiveDate, BufWriter<std::fs::File>)>,
}

impl LocalWriter {
    fn new(root: PathBuf) -> Self {
        Self { root, open: None }
    }

    fn write_line(&mut self, date: NaiveDate, line: &str) {
        // Rotate on day change: flush and drop the old handle first.
        if let Some((open_date, _)) = &self.open {
            if *open_date != date {
                let _ = self.flush();
                self.open = None;
            }
        }

        if self.open.is_none() {
            let path = {
                let mut p = self.root.clone();
                p.push(relpath(date));
                p
            };
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(err = %e, dir = %parent.display(), "audit mkdir failed");
                    return;
                }
            }
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(f) => self.open = Some((date, BufWriter::new(f))),
                Err(e) => {
                    warn!(err = %e, path = %path.display(), "audit open failed");
                    return;
                }
            }
        }

        if let Some((_, w)) = &mut self.open {
            let _ = w.write_all(line.as_bytes());
            let _ = w.write_all(b"\n");
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some((_, w)) = &mut self.open {
            w.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relpath_is_day_partitioned() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(relpath(d), "v1/audit/2026/03/07.log");
    }

    #[tokio::test]
    async fn append_writes_one_json_line_per_record() {
        let dir = std::env::temp_dir().join(format!("slophotel-audit-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let log = AuditLog::new(AuditConfig {
            enabled: true,
            spool_dir: dir.clone(),
            flush_interval_s: 60,
        });
        let rec = AuditRecord {
            at: Utc::now(),
            actor_id: "admin-1".to_string(),
            target_id: Some("user-2".to_string()),
            action: "kick".to_string(),
            reason: "spam".to_string(),
            detail: String::new(),
        };
        log.append(&rec).await;
        log.append(&rec).await;
        log.inner.lock().await.flush().unwrap();

        let path = dir.join(relpath(rec.at.date_naive()));
        let s = std::fs::read_to_string(&path).unwrap();
        let lines = s.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["action"], "kick");
        assert_eq!(v["target_id"], "user-2");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn disabled_log_writes_nothing() {
        let dir = std::env::temp_dir().join(format!("slophotel-audit-off-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let log = AuditLog::new(AuditConfig {
            enabled: false,
            spool_dir: dir.clone(),
            flush_interval_s: 60,
        });
        log.append(&AuditRecord {
            at: Utc::now(),
            actor_id: "a".to_string(),
            target_id: None,
            action: "announce".to_string(),
            reason: String::new(),
            detail: String::new(),
        })
        .await;
        assert!(!dir.exists());
    }
}
