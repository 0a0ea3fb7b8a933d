// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SQLite-backed message history.
//!
//! One database per project (`dialogs/messages.sqlite`) holding messages,
//! reasoning blocks, tool-result metadata, file edits, and dialog summaries.
//! Reasoning and diffs are gzip-compressed; they are large, cold data read
//! only by the history API.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{FileEditRecord, HistoryPage, MessageKind, MessageRecord, ToolResultMeta};

#[derive(Clone)]
pub struct DialogStore {
    db_path: PathBuf,
}

impl DialogStore {
    /// Open the store, creating the schema when missing.
    pub fn open(db_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                dialog_id  TEXT NOT NULL,
                idx        INTEGER NOT NULL,
                kind       TEXT NOT NULL,
                content    TEXT NOT NULL,
                payload    TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                PRIMARY KEY (dialog_id, idx)
            );
            CREATE TABLE IF NOT EXISTS reasoning (
                dialog_id   TEXT NOT NULL,
                message_idx INTEGER NOT NULL,
                created_at  TEXT NOT NULL,
                content     BLOB NOT NULL,
                PRIMARY KEY (dialog_id, message_idx)
            );
            CREATE TABLE IF NOT EXISTS tool_results (
                tool_call_id TEXT PRIMARY KEY,
                dialog_id    TEXT NOT NULL,
                tool_name    TEXT NOT NULL,
                status       TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                summary      TEXT NOT NULL,
                preview      TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tool_results_dialog
                ON tool_results(dialog_id);
            CREATE TABLE IF NOT EXISTS file_edits (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                dialog_id     TEXT NOT NULL,
                file_path     TEXT NOT NULL,
                diff          BLOB NOT NULL,
                checkpoint_id TEXT,
                message_idx   INTEGER NOT NULL,
                created_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_file_edits_dialog
                ON file_edits(dialog_id);
            CREATE TABLE IF NOT EXISTS summaries (
                dialog_id         TEXT PRIMARY KEY,
                content           TEXT NOT NULL,
                covers_through_idx INTEGER NOT NULL,
                updated_at        TEXT NOT NULL
            );
            "#,
        )
        .context("creating message store schema")?;
        Ok(Self { db_path })
    }

    fn conn(&self) -> anyhow::Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("opening {}", self.db_path.display()))
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Append a message; returns its dense index.
    pub fn append_message(
        &self,
        dialog_id: &str,
        kind: MessageKind,
        content: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        let idx: i64 = conn.query_row(
            "SELECT COALESCE(MAX(idx) + 1, 0) FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO messages (dialog_id, idx, kind, content, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dialog_id,
                idx,
                kind.as_str(),
                content,
                payload.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(idx)
    }

    pub fn message_count(&self, dialog_id: &str) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
            |row| row.get(0),
        )?)
    }

    /// All messages from `from_idx` (inclusive) in index order.
    pub fn messages_from(
        &self,
        dialog_id: &str,
        from_idx: i64,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT idx, kind, content, payload, created_at FROM messages
             WHERE dialog_id = ?1 AND idx >= ?2 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![dialog_id, from_idx], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Cursor-paginated history: the `limit` highest-indexed events strictly
    /// below `before` (or the tail when `before` is None), returned in
    /// ascending index order.
    pub fn history(
        &self,
        dialog_id: &str,
        limit: i64,
        before: Option<i64>,
    ) -> anyhow::Result<HistoryPage> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
            |row| row.get(0),
        )?;
        let bound = before.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT idx, kind, content, payload, created_at FROM messages
             WHERE dialog_id = ?1 AND idx < ?2 ORDER BY idx DESC LIMIT ?3",
        )?;
        let mut records: Vec<MessageRecord> = stmt
            .query_map(params![dialog_id, bound, limit.max(0)], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();

        let first_idx = records.first().map(|r| r.idx);
        let last_idx = records.last().map(|r| r.idx);
        let has_more = first_idx.map(|f| f > 0).unwrap_or(false);

        let events = records
            .into_iter()
            .map(|r| {
                let mut ev = serde_json::json!({
                    "idx": r.idx,
                    "type": r.kind.as_str(),
                    "content": r.content,
                    "created_at": r.created_at.to_rfc3339(),
                });
                if let serde_json::Value::Object(extra) = r.payload {
                    for (k, v) in extra {
                        ev[k] = v;
                    }
                }
                ev
            })
            .collect();

        Ok(HistoryPage {
            events,
            total_events: total,
            has_more,
            first_idx,
            last_idx,
        })
    }

    // ── Reasoning ─────────────────────────────────────────────────────────────

    /// Attach a reasoning block to the assistant message at `message_idx`.
    pub fn add_reasoning(
        &self,
        dialog_id: &str,
        message_idx: i64,
        content: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO reasoning (dialog_id, message_idx, created_at, content)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                dialog_id,
                message_idx,
                Utc::now().to_rfc3339(),
                gz_compress(content.as_bytes())?,
            ],
        )?;
        Ok(())
    }

    pub fn get_reasoning(
        &self,
        dialog_id: &str,
        message_idx: i64,
    ) -> anyhow::Result<Option<String>> {
        let conn = self.conn()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT content FROM reasoning WHERE dialog_id = ?1 AND message_idx = ?2",
                params![dialog_id, message_idx],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&gz_decompress(&bytes)?).into_owned())),
            None => Ok(None),
        }
    }

    // ── Tool result metadata ──────────────────────────────────────────────────

    pub fn put_tool_result_meta(&self, meta: &ToolResultMeta) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO tool_results
             (tool_call_id, dialog_id, tool_name, status, size_bytes, summary, preview, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                meta.tool_call_id,
                meta.dialog_id,
                meta.tool_name,
                meta.status,
                meta.size_bytes as i64,
                meta.summary,
                meta.preview,
                meta.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_tool_result_meta(&self, dialog_id: &str) -> anyhow::Result<Vec<ToolResultMeta>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT tool_call_id, dialog_id, tool_name, status, size_bytes, summary, preview, created_at
             FROM tool_results WHERE dialog_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![dialog_id], row_to_meta)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_tool_result_meta(
        &self,
        tool_call_id: &str,
    ) -> anyhow::Result<Option<ToolResultMeta>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT tool_call_id, dialog_id, tool_name, status, size_bytes, summary, preview, created_at
             FROM tool_results WHERE tool_call_id = ?1",
            params![tool_call_id],
            row_to_meta,
        )
        .optional()
        .map_err(Into::into)
    }

    // ── File edits ────────────────────────────────────────────────────────────

    pub fn record_file_edit(
        &self,
        dialog_id: &str,
        file_path: &str,
        diff: &str,
        checkpoint_id: Option<&str>,
        message_idx: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO file_edits (dialog_id, file_path, diff, checkpoint_id, message_idx, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dialog_id,
                file_path,
                gz_compress(diff.as_bytes())?,
                checkpoint_id,
                message_idx,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_file_edits(&self, dialog_id: &str) -> anyhow::Result<Vec<FileEditRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT dialog_id, file_path, diff, checkpoint_id, message_idx, created_at
             FROM file_edits WHERE dialog_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![dialog_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (dialog_id, file_path, diff_gz, checkpoint_id, message_idx, created_at) = row?;
            out.push(FileEditRecord {
                dialog_id,
                file_path,
                diff: String::from_utf8_lossy(&gz_decompress(&diff_gz)?).into_owned(),
                checkpoint_id,
                message_idx,
                created_at: parse_time(&created_at),
            });
        }
        Ok(out)
    }

    // ── Summaries ─────────────────────────────────────────────────────────────

    pub fn save_summary(
        &self,
        dialog_id: &str,
        content: &str,
        covers_through_idx: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO summaries (dialog_id, content, covers_through_idx, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![dialog_id, content, covers_through_idx, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Returns `(summary_text, covers_through_idx)`.
    pub fn get_summary(&self, dialog_id: &str) -> anyhow::Result<Option<(String, i64)>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT content, covers_through_idx FROM summaries WHERE dialog_id = ?1",
            params![dialog_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Delete every row belonging to a dialog.
    pub fn delete_dialog(&self, dialog_id: &str) -> anyhow::Result<()> {
        let conn = self.conn()?;
        for table in ["messages", "reasoning", "tool_results", "file_edits", "summaries"] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE dialog_id = ?1"),
                params![dialog_id],
            )?;
        }
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let kind_str: String = row.get(1)?;
    let payload_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(MessageRecord {
        idx: row.get(0)?,
        kind: MessageKind::parse(&kind_str).unwrap_or(MessageKind::System),
        content: row.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        created_at: parse_time(&created_at),
    })
}

fn row_to_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolResultMeta> {
    let created_at: String = row.get(7)?;
    Ok(ToolResultMeta {
        tool_call_id: row.get(0)?,
        dialog_id: row.get(1)?,
        tool_name: row.get(2)?,
        status: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        summary: row.get(5)?,
        preview: row.get(6)?,
        created_at: parse_time(&created_at),
    })
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn gz_compress(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes)?;
    Ok(enc.finish()?)
}

fn gz_decompress(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut dec = GzDecoder::new(bytes);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)?;
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
