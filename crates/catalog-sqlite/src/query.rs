use crate::{BridgeRow, Db};
use anyhow::Result;
use bridgepool_core::{CatalogEntry, CatalogLookup};
use rusqlite::{params, OptionalExtension};

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let cnt: i64 = conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn bridge_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        Ok(conn.query_row("SELECT COUNT(1) FROM bridges", [], |r| r.get(0))?)
    }

    pub fn get_bridge(&self, fingerprint: &str) -> Result<Option<BridgeRow>> {
        let conn = self.conn.lock().expect("catalog lock poisoned");
        let row = conn
            .query_row(
                "SELECT fingerprint,address,port,transport,first_seen_ms,last_seen_ms,sources_json
                 FROM bridges WHERE fingerprint=?",
                params![fingerprint],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                        r.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((fingerprint, address, port, transport, first_seen_ms, last_seen_ms, sources_json)) => {
                Ok(Some(BridgeRow {
                    fingerprint,
                    address,
                    port: port as u16,
                    transport,
                    first_seen_ms,
                    last_seen_ms,
                    sources: serde_json::from_str(&sources_json)?,
                }))
            }
        }
    }
}

impl CatalogLookup for Db {
    fn lookup(&self, fingerprint: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.get_bridge(fingerprint)?.map(|row| CatalogEntry {
            fingerprint: row.fingerprint,
            first_seen_ms: row.first_seen_ms,
            last_seen_ms: row.last_seen_ms,
        }))
    }
}
