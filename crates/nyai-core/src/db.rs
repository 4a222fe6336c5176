use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Mutex;

use crate::types::{FeedbackItem, FeedbackSection, HistoryRecord, NewFeedback, QueryHistoryEntry};

const SCHEMA_SQL: &str = include_str!("../../../schema.sql");

pub struct Db {
    conn: Mutex<Connection>,
}

// ── Timestamp helpers ─────────────────────────────────────────────────────

fn parse_ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── JSON column helpers ───────────────────────────────────────────────────

fn to_json_col<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to encode result column")
}

fn from_json_col<T: DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

// ── Row mappers ───────────────────────────────────────────────────────────

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryHistoryEntry> {
    let created_at_str: String = row.get(6)?;
    Ok(QueryHistoryEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        query: row.get(2)?,
        laws_result: from_json_col(row.get(3)?),
        precedents_result: from_json_col(row.get(4)?),
        checklist_result: from_json_col(row.get(5)?),
        timestamp: parse_ts(&created_at_str),
    })
}

fn row_to_feedback(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedbackItem> {
    let section: String = row.get(3)?;
    let created_at_str: String = row.get(6)?;
    Ok(FeedbackItem {
        id: row.get(0)?,
        query_id: row.get(1)?,
        user_id: row.get(2)?,
        section: FeedbackSection::from_db(&section),
        rating: row.get(4)?,
        comments: row.get(5)?,
        timestamp: parse_ts(&created_at_str),
    })
}

const HISTORY_COLUMNS: &str =
    "id, user_id, query, laws_result, precedents_result, checklist_result, created_at";
const FEEDBACK_COLUMNS: &str = "id, query_id, user_id, section, rating, comments, created_at";

// ── Db impl ───────────────────────────────────────────────────────────────

impl Db {
    pub fn raw_conn(&self) -> &Mutex<Connection> {
        &self.conn
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {path:?}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("failed to set PRAGMAs")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&mut self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema migrations")?;
        Ok(())
    }

    // ── Config ────────────────────────────────────────────────────────────

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let value = conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("get_config")?;
        Ok(value)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_str()],
        )
        .context("set_config")?;
        Ok(())
    }

    // ── Query history ─────────────────────────────────────────────────────

    pub fn insert_history(&self, record: &HistoryRecord) -> Result<i64> {
        let laws = to_json_col(&record.laws_result)?;
        let precedents = to_json_col(&record.precedents_result)?;
        let checklist = to_json_col(&record.checklist_result)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO query_history \
             (user_id, query, laws_result, precedents_result, checklist_result, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.user_id,
                record.query,
                laws,
                precedents,
                checklist,
                now_str()
            ],
        )
        .context("insert_history")?;
        Ok(conn.last_insert_rowid())
    }

    /// A user's history, newest first.
    pub fn list_history(&self, user_id: &str, limit: i64) -> Result<Vec<QueryHistoryEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM query_history \
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let entries = stmt
            .query_map(params![user_id, limit], row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list_history")?;
        Ok(entries)
    }

    pub fn get_history(&self, id: i64) -> Result<Option<QueryHistoryEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let entry = conn
            .query_row(
                &format!("SELECT {HISTORY_COLUMNS} FROM query_history WHERE id = ?1"),
                params![id],
                row_to_history,
            )
            .optional()
            .context("get_history")?;
        Ok(entry)
    }

    /// Returns false when no entry had that id.
    pub fn delete_history(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n = conn
            .execute("DELETE FROM query_history WHERE id = ?1", params![id])
            .context("delete_history")?;
        Ok(n > 0)
    }

    // ── Feedback ──────────────────────────────────────────────────────────

    pub fn insert_feedback(&self, feedback: &NewFeedback) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO feedback (query_id, user_id, section, rating, comments, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                feedback.query_id,
                feedback.user_id,
                feedback.section.as_str(),
                feedback.rating,
                feedback.comments,
                now_str()
            ],
        )
        .context("insert_feedback")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn feedback_for_query(&self, query_id: i64) -> Result<Vec<FeedbackItem>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback \
             WHERE query_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let items = stmt
            .query_map(params![query_id], row_to_feedback)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("feedback_for_query")?;
        Ok(items)
    }

    pub fn feedback_for_user(&self, user_id: &str) -> Result<Vec<FeedbackItem>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback \
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let items = stmt
            .query_map(params![user_id], row_to_feedback)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("feedback_for_user")?;
        Ok(items)
    }

    // ── Custom case library ───────────────────────────────────────────────

    pub fn add_library_document(&self, content: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO library_documents (content, created_at) VALUES (?1, ?2)",
            params![content, now_str()],
        )
        .context("add_library_document")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn library_size(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n = conn
            .query_row("SELECT COUNT(*) FROM library_documents", [], |row| row.get(0))
            .context("library_size")?;
        Ok(n)
    }

    /// Library document texts, newest first.
    pub fn library_documents(&self, limit: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT content FROM library_documents ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let docs = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("library_documents")?;
        Ok(docs)
    }
}
