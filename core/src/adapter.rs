//! The source-adapter capability every data source implements.

use crate::descriptor::RawRecord;
use crate::error::SourceError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Per-run context handed to every adapter invocation.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user_agent: String,
    /// Budget for one `fetch`; the aggregator also enforces it externally.
    pub timeout: Duration,
}

impl SessionContext {
    pub fn new(session_id: Uuid, user_agent: impl Into<String>, timeout: Duration) -> Self {
        SessionContext {
            session_id,
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

/// Uniform interface over heterogeneous, differently-trusted sources.
///
/// Zero results is a valid success; adapters fail only on transport/parse
/// problems, which the aggregator records per source without aborting the
/// run. Implementations must not share mutable state with one another; each
/// returns its own records and the aggregator merges in a fixed pass.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable adapter name used for provenance tagging and error keys.
    fn name(&self) -> &str;

    async fn fetch(&self, ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError>;
}
