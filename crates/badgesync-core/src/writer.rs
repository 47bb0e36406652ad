//! Upsert writer: idempotent persistence of parsed events.
//!
//! Remote: REST bulk inserts against the store's `presences` table, batched
//! to bound request size, with duplicate resolution controlled by the
//! `Prefer` header (`ignore` drops duplicates, `merge` overwrites them via
//! `on_conflict`). Local: optional sqlite sink with `INSERT OR IGNORE` on
//! the same `(badgeId, timestamp)` key.

use std::path::PathBuf;

use chrono::SecondsFormat;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::{ConflictMode, StoreConfig};
use crate::error::Result;
use crate::parser::Event;
use crate::portal::excerpt;

/// Rows per upsert request, to respect downstream payload limits.
pub const BATCH_SIZE: usize = 50;
/// Destination table in both the remote store and the local sink.
pub const PRESENCES_TABLE: &str = "presences";

// ---------------------------------------------------------------------------
// WriteResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WriteResult {
    pub inserted: usize,
    pub errors: usize,
    /// Why a write was skipped or degraded, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl WriteResult {
    pub fn skipped(note: impl Into<String>) -> Self {
        Self {
            inserted: 0,
            errors: 0,
            note: Some(note.into()),
        }
    }
}

/// Wire shape for the bulk insert; only the uniqueness key is persisted.
#[derive(Serialize)]
struct PresenceRow<'a> {
    #[serde(rename = "badgeId")]
    badge_id: &'a str,
    timestamp: String,
}

fn presence_row(event: &Event) -> PresenceRow<'_> {
    PresenceRow {
        badge_id: &event.badge_id,
        timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

// ---------------------------------------------------------------------------
// RemoteStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl RemoteStore {
    pub fn new(client: reqwest::Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    /// Bulk-insert endpoint; merge mode names the conflict columns so the
    /// store updates matching rows instead of rejecting them.
    fn endpoint(&self) -> String {
        let base = format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            PRESENCES_TABLE
        );
        match self.config.conflict_mode {
            ConflictMode::Merge => format!("{base}?on_conflict=badgeId,timestamp"),
            ConflictMode::Ignore => base,
        }
    }

    /// Write all events in fixed-size batches. A failed batch adds its size
    /// to the error count and the remaining batches still go out; this never
    /// returns early and never errors.
    pub async fn write(&self, events: &[Event]) -> WriteResult {
        let mut inserted = 0;
        let mut errors = 0;
        let url = self.endpoint();

        for (index, batch) in events.chunks(BATCH_SIZE).enumerate() {
            let rows: Vec<PresenceRow<'_>> = batch.iter().map(presence_row).collect();

            let sent = self
                .client
                .post(&url)
                .header("apikey", self.config.key.as_str())
                .bearer_auth(&self.config.key)
                .header("Prefer", self.config.conflict_mode.prefer_header())
                .json(&rows)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => inserted += batch.len(),
                Ok(resp) => {
                    errors += batch.len();
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    tracing::warn!(
                        batch = index + 1,
                        %status,
                        "store write batch failed: {}",
                        excerpt(&body, 300)
                    );
                }
                Err(e) => {
                    errors += batch.len();
                    tracing::warn!(batch = index + 1, error = %e, "store write batch failed");
                }
            }
        }

        WriteResult {
            inserted,
            errors,
            note: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LocalStore
// ---------------------------------------------------------------------------

/// Optional secondary sqlite sink. The table is owned by the surrounding
/// application; if it does not exist the write is skipped with a note
/// rather than failing the run.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Synchronous; callers on the async path go through `spawn_blocking`.
    pub fn write(&self, events: &[Event]) -> Result<WriteResult> {
        let conn = Connection::open(&self.path)?;

        let table: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                params![PRESENCES_TABLE],
                |row| row.get(0),
            )
            .optional()?;
        if table.is_none() {
            tracing::info!("local sink skipped: no '{PRESENCES_TABLE}' table");
            return Ok(WriteResult::skipped(format!(
                "table '{PRESENCES_TABLE}' does not exist"
            )));
        }

        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO presences (badgeId, timestamp) VALUES (?1, ?2)",
        )?;
        let mut inserted = 0;
        for event in events {
            let row = presence_row(event);
            if stmt.execute(params![row.badge_id, row.timestamp])? > 0 {
                inserted += 1;
            }
        }

        Ok(WriteResult {
            inserted,
            errors: 0,
            note: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
