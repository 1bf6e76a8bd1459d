use crate::{Db, SessionMeta};
use anyhow::{ensure, Result};
use bridgepool_core::BridgeDescriptor;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

impl Db {
    pub fn begin_session(&self, meta: SessionMeta) -> Result<Uuid> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "INSERT INTO sessions(session_id, operation, started_at) VALUES (?,?,?)",
            params![meta.session_id.to_string(), meta.operation, meta.started_at],
        )?;
        Ok(meta.session_id)
    }

    pub fn finish_session(
        &self,
        session_id: &Uuid,
        finished_at: i64,
        descriptor_count: i64,
        error_count: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        conn.execute(
            "UPDATE sessions SET finished_at=?, descriptor_count=?, error_count=? WHERE session_id=?",
            params![finished_at, descriptor_count, error_count, session_id.to_string()],
        )?;
        Ok(())
    }

    /// Persist one descriptor, widening timestamps and unioning sources when
    /// the fingerprint is already known. Only plaintext rows go in; callers
    /// persist before encrypting.
    pub fn upsert_descriptor(&self, d: &BridgeDescriptor) -> Result<()> {
        ensure!(
            !d.encrypted,
            "refusing to persist encrypted descriptor fields"
        );
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let existing: Option<String> = conn
            .query_row(
                "SELECT sources_json FROM bridges WHERE fingerprint=?",
                params![d.fingerprint],
                |r| r.get(0),
            )
            .optional()?;
        let mut sources = match existing {
            Some(json) => serde_json::from_str::<Vec<String>>(&json)?,
            None => Vec::new(),
        };
        for s in &d.sources {
            if !sources.contains(s) {
                sources.push(s.clone());
            }
        }
        let sources_json = serde_json::to_string(&sources)?;
        conn.execute(
            "INSERT INTO bridges(fingerprint,address,port,transport,first_seen_ms,last_seen_ms,sources_json)
             VALUES (?,?,?,?,?,?,?)
             ON CONFLICT(fingerprint) DO UPDATE SET
               address=excluded.address,
               port=excluded.port,
               transport=excluded.transport,
               first_seen_ms=MIN(bridges.first_seen_ms, excluded.first_seen_ms),
               last_seen_ms=MAX(bridges.last_seen_ms, excluded.last_seen_ms),
               sources_json=excluded.sources_json",
            params![
                d.fingerprint,
                d.address,
                d.port as i64,
                d.transport,
                d.first_seen_ms,
                d.last_seen_ms,
                sources_json
            ],
        )?;
        Ok(())
    }

    /// Persist a whole run's worth of descriptors.
    pub fn record_descriptors(&self, descriptors: &[BridgeDescriptor]) -> Result<()> {
        for d in descriptors {
            self.upsert_descriptor(d)?;
        }
        Ok(())
    }
}
