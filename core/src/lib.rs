//! Core types and orchestration for the bridgepool aggregation engine.

pub mod adapter;
pub mod aggregate;
pub mod catalog;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod findings;
pub mod gate;
pub mod ledger;
pub mod report;

pub use adapter::{SessionContext, SourceAdapter};
pub use aggregate::{AggregationResult, Aggregator, AggregatorConfig, CancelHandle};
pub use catalog::{CatalogEntry, CatalogLookup};
pub use codec::SecretCodec;
pub use descriptor::{normalize, BridgeDescriptor, NormalizationError, RawRecord, DIRECT_TRANSPORT};
pub use error::{
    AggregationError, AuthorizationError, CodecError, ResearchError, SourceError,
};
pub use findings::{
    derive_risk, AreaFinding, FindingCategory, FindingsStore, ResearchPhase, RiskLevel,
    SecurityAssessment, Severity, VulnerabilityFinding,
};
pub use gate::{AuthorizationGate, AuthorizationScope, GateConfig};
pub use ledger::{ActivityRecord, AuditLedger, AuthorizationRecord, LedgerEntry};
pub use report::{RiskReport, SecurityGap};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}

/// RFC3339 timestamp for display edges; empty string on formatting failure.
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::new())
}
