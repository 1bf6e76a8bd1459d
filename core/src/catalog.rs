//! Optional lookup of previously observed endpoints.

/// A previously observed endpoint as the catalog remembers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub fingerprint: String,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
}

/// Keyed lookup into a persistent catalog store. The aggregator uses it to
/// pre-seed `first_seen` for endpoints it has met in earlier sessions; the
/// store's schema is not this core's concern.
pub trait CatalogLookup: Send + Sync {
    fn lookup(&self, fingerprint: &str) -> anyhow::Result<Option<CatalogEntry>>;
}
