//! Lab fixture source: returns a configured set of records verbatim.

use async_trait::async_trait;
use bridgepool_core::{RawRecord, SessionContext, SourceAdapter, SourceError};

pub const ADAPTER_NAME: &str = "lab-fixture";

/// Adapter backed by in-memory lab test data. Useful as the lowest-trust
/// reference source and for exercising a full run without network access.
pub struct LabFixtureAdapter {
    records: Vec<RawRecord>,
}

impl LabFixtureAdapter {
    pub fn new(records: Vec<RawRecord>) -> Self {
        LabFixtureAdapter { records }
    }

    /// The standing lab test bridge.
    pub fn default_fixture() -> Self {
        LabFixtureAdapter::new(vec![RawRecord::new(
            "TEST_FINGERPRINT_001",
            "192.168.1.100",
            443,
        )
        .transport("obfs4")])
    }
}

#[async_trait]
impl SourceAdapter for LabFixtureAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    async fn fetch(&self, _ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError> {
        Ok(self.records.clone())
    }
}
