use uuid::Uuid;

/// Row describing one aggregation session.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: Uuid,
    pub operation: String,
    pub started_at: i64,
}

/// One persisted bridge row, as `query` returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRow {
    pub fingerprint: String,
    pub address: String,
    pub port: u16,
    pub transport: String,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub sources: Vec<String>,
}
