// 📝 Audit Sink - where finished census operations are reported
//
// The engine hands one AuditEntry per successful operation to a sink. Sinks
// are fire-and-forget from the engine's point of view: a failing sink is
// logged and never undoes or fails the operation that already committed.

use crate::db::{insert_event, setup_database, Event};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    /// "reconciliation", "admission", "block", ...
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    /// One human-readable line
    pub summary: String,
    pub data: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: &str, entity_type: &str, entity_id: &str, summary: String) -> Self {
        AuditEntry {
            at: Utc::now(),
            actor: String::new(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            summary,
            data: serde_json::Value::Null,
        }
    }

    /// Builder pattern: timestamp from the engine clock
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn by(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Record and swallow failures with a warning
pub fn record_or_warn(sink: &dyn AuditSink, entry: &AuditEntry) {
    if let Err(e) = sink.record(entry) {
        tracing::warn!(
            action = %entry.action,
            entity = %entry.entity_id,
            error = %e,
            "audit sink failed, operation already committed"
        );
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Appends to the `events` table of a census database
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteAuditSink {
            conn: Mutex::new(conn),
        })
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("audit connection lock poisoned"))?;

        let mut data = entry.data.clone();
        if let serde_json::Value::Object(map) = &mut data {
            map.insert("summary".into(), entry.summary.clone().into());
        } else {
            data = serde_json::json!({ "summary": entry.summary, "details": data });
        }

        let event = Event::new(
            &entry.action,
            &entry.entity_type,
            &entry.entity_id,
            data,
            &entry.actor,
            entry.at,
        );
        insert_event(&conn, &event)
    }
}

/// Writes each entry as a structured `info` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        tracing::info!(
            target: "audit",
            actor = %entry.actor,
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "{}",
            entry.summary
        );
        Ok(())
    }
}

/// Keeps entries in memory; can be told to fail
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    failing: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        MemoryAuditSink {
            entries: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        if self.failing {
            return Err(anyhow!("audit sink offline"));
        }
        self.entries
            .lock()
            .map_err(|_| anyhow!("audit sink lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}
