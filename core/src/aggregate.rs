//! The aggregation run: gate-checked fan-out, normalization, dedup, audit.

use crate::adapter::{SessionContext, SourceAdapter};
use crate::catalog::CatalogLookup;
use crate::codec::SecretCodec;
use crate::descriptor::{normalize, BridgeDescriptor};
use crate::error::{AggregationError, SourceError};
use crate::ledger::{ActivityRecord, AuditLedger, AuthorizationRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Explicit run configuration; one value per aggregation session.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Operation name this session is allowed to run.
    pub operation: String,
    /// Budget applied to each adapter fetch.
    pub per_adapter_timeout: Duration,
    /// User agent handed to adapters that speak HTTP.
    pub user_agent: String,
}

impl AggregatorConfig {
    pub fn new(operation: impl Into<String>) -> Self {
        AggregatorConfig {
            operation: operation.into(),
            per_adapter_timeout: Duration::from_millis(10_000),
            user_agent: format!("bridgepool/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn per_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.per_adapter_timeout = timeout;
        self
    }
}

/// Everything one completed run hands back to the caller. Ownership of the
/// descriptor set transfers with this value.
#[derive(Debug, Serialize)]
pub struct AggregationResult {
    pub session_id: Uuid,
    pub descriptors: Vec<BridgeDescriptor>,
    pub per_source_errors: BTreeMap<String, SourceError>,
    pub activity: ActivityRecord,
}

/// Cancels the session's in-flight runs. Cloneable; safe to trigger from
/// another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace so the signal sticks even with no live subscriber yet
        self.0.send_replace(true);
    }
}

/// Orchestrates one aggregation session: holds the session key, fans out to
/// adapters, merges in declared trust order and encrypts before returning.
pub struct Aggregator {
    config: AggregatorConfig,
    ledger: Arc<AuditLedger>,
    catalog: Option<Arc<dyn CatalogLookup>>,
    codec: SecretCodec,
    session_id: Uuid,
    cancel: watch::Sender<bool>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, ledger: Arc<AuditLedger>) -> Self {
        let session_id = Uuid::new_v4();
        let (cancel, _) = watch::channel(false);
        Aggregator {
            config,
            ledger,
            catalog: None,
            codec: SecretCodec::generate(session_id),
            session_id,
            cancel,
        }
    }

    /// Attach a catalog used to pre-seed `first_seen` for endpoints observed
    /// in earlier sessions.
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogLookup>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The session codec, for callers that need to decrypt results they own.
    pub fn codec(&self) -> &SecretCodec {
        &self.codec
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Run one aggregation over `adapters`, listed in trust order (earlier =
    /// more trusted). Requires the authorization record returned by the gate
    /// for this session's operation; a record issued for anything else is a
    /// hard failure before any source is queried.
    pub async fn run(
        &self,
        authorization: &AuthorizationRecord,
        adapters: &[Arc<dyn SourceAdapter>],
    ) -> Result<AggregationResult, AggregationError> {
        if authorization.operation != self.config.operation {
            return Err(AggregationError::AuthorizationMismatch {
                issued: authorization.operation.clone(),
                declared: self.config.operation.clone(),
            });
        }
        if adapters.is_empty() {
            return Err(AggregationError::NoAdapters);
        }

        let ctx = SessionContext::new(
            self.session_id,
            self.config.user_agent.clone(),
            self.config.per_adapter_timeout,
        );
        let budget = self.config.per_adapter_timeout;

        // Fan out; every fetch runs independently and returns its own buffer.
        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let adapter = adapter.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                match timeout(budget, adapter.fetch(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(budget.as_millis() as u64)),
                }
            }));
        }

        // Buffer all results before merging: joining in declared order keeps
        // merge tie-breaks deterministic no matter which fetch finishes first.
        let mut cancelled = self.cancel.subscribe();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            if *cancelled.borrow() {
                return Err(AggregationError::Cancelled);
            }
            tokio::select! {
                joined = handle => {
                    outcomes.push(joined.unwrap_or_else(|e| Err(SourceError::Transport(e.to_string()))));
                }
                _ = cancelled.changed() => {
                    return Err(AggregationError::Cancelled);
                }
            }
        }
        if *cancelled.borrow() {
            return Err(AggregationError::Cancelled);
        }

        let mut per_source_errors = BTreeMap::new();
        let mut merged: Vec<BridgeDescriptor> = Vec::new();
        let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
        let mut fetched = 0usize;
        let mut normalized = 0usize;
        let mut dropped = 0usize;
        let mut collisions = 0usize;

        for (adapter, outcome) in adapters.iter().zip(outcomes) {
            let records = match outcome {
                Ok(records) => records,
                Err(err) => {
                    warn!(source = adapter.name(), error = %err, "source fetch failed");
                    per_source_errors.insert(adapter.name().to_string(), err);
                    continue;
                }
            };
            fetched += records.len();
            for raw in &records {
                let mut descriptor = match normalize(raw, adapter.name()) {
                    Ok(d) => d,
                    Err(reason) => {
                        dropped += 1;
                        debug!(source = adapter.name(), ?reason, "raw record dropped");
                        continue;
                    }
                };
                normalized += 1;
                match by_fingerprint.get(&descriptor.fingerprint) {
                    Some(&slot) => {
                        collisions += 1;
                        merged[slot].merge_from(&descriptor);
                    }
                    None => {
                        self.preseed_first_seen(&mut descriptor);
                        by_fingerprint.insert(descriptor.fingerprint.clone(), merged.len());
                        merged.push(descriptor);
                    }
                }
            }
        }

        for descriptor in &mut merged {
            descriptor.authorized = true;
        }

        let activity = ActivityRecord::new("aggregation-run", &authorization.actor, "lab")
            .detail("operation", &self.config.operation)
            .detail("session_id", self.session_id.to_string())
            .detail(
                "adapters",
                adapters.iter().map(|a| a.name()).collect::<Vec<_>>().join(","),
            )
            .detail("records_fetched", fetched.to_string())
            .detail("records_normalized", normalized.to_string())
            .detail("records_dropped", dropped.to_string())
            .detail("records_deduplicated", collisions.to_string())
            .detail("source_errors", per_source_errors.len().to_string());
        self.ledger.append_activity(activity.clone());

        for descriptor in &mut merged {
            self.codec.encrypt_fields(descriptor)?;
        }

        info!(
            session = %self.session_id,
            descriptors = merged.len(),
            source_errors = per_source_errors.len(),
            "aggregation run complete"
        );

        Ok(AggregationResult {
            session_id: self.session_id,
            descriptors: merged,
            per_source_errors,
            activity,
        })
    }

    fn preseed_first_seen(&self, descriptor: &mut BridgeDescriptor) {
        let Some(catalog) = &self.catalog else { return };
        match catalog.lookup(&descriptor.fingerprint) {
            Ok(Some(entry)) => {
                descriptor.first_seen_ms = descriptor.first_seen_ms.min(entry.first_seen_ms);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "catalog lookup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SessionContext;
    use crate::catalog::CatalogEntry;
    use crate::descriptor::RawRecord;
    use crate::gate::{AuthorizationGate, AuthorizationScope, GateConfig};
    use async_trait::async_trait;

    struct StaticAdapter {
        name: &'static str,
        records: Vec<RawRecord>,
        delay: Duration,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.records.clone())
        }
    }

    struct FailingAdapter(&'static str);

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch(&self, _ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError> {
            Err(SourceError::Transport("connection refused".into()))
        }
    }

    struct HangingAdapter(&'static str);

    #[async_trait]
    impl SourceAdapter for HangingAdapter {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch(&self, _ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn fixture(fp: &str, transport: &str, observed: i64) -> RawRecord {
        RawRecord::new(fp, "1.2.3.4", 443)
            .transport(transport)
            .observed_ms(observed)
    }

    fn adapter(
        name: &'static str,
        records: Vec<RawRecord>,
        delay: Duration,
    ) -> Arc<dyn SourceAdapter> {
        Arc::new(StaticAdapter { name, records, delay })
    }

    fn authorized(ledger: &Arc<AuditLedger>, operation: &str) -> AuthorizationRecord {
        let config = GateConfig::new(true, "research-user", "RESEARCH-PROGRAM-001").allow(operation);
        AuthorizationGate::new(config, ledger.clone())
            .check(operation, AuthorizationScope::AuthorizedResearch)
            .unwrap()
    }

    fn aggregator(ledger: &Arc<AuditLedger>, timeout_ms: u64) -> Aggregator {
        let config = AggregatorConfig::new("enumerate-bridges")
            .per_adapter_timeout(Duration::from_millis(timeout_ms));
        Aggregator::new(config, ledger.clone())
    }

    #[tokio::test]
    async fn merge_prefers_earlier_adapter_regardless_of_completion_order() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 5_000);
        // A is slower than B but listed first, so A's transport must win.
        let adapters = vec![
            adapter("source-a", vec![fixture("X", "obfs4", 100)], Duration::from_millis(80)),
            adapter("source-b", vec![fixture("X", "direct", 200)], Duration::ZERO),
        ];
        let result = agg.run(&auth, &adapters).await.unwrap();
        assert_eq!(result.descriptors.len(), 1);
        let mut d = result.descriptors.into_iter().next().unwrap();
        assert!(d.encrypted);
        agg.codec().decrypt_fields(&mut d).unwrap();
        assert_eq!(d.fingerprint, "X");
        assert_eq!(d.address, "1.2.3.4");
        assert_eq!(d.transport, "obfs4");
        assert_eq!(d.sources, vec!["source-a".to_string(), "source-b".to_string()]);
        assert_eq!(d.first_seen_ms, 100);
        assert_eq!(d.last_seen_ms, 200);
        assert!(d.authorized);
    }

    #[tokio::test]
    async fn identical_inputs_yield_identical_descriptor_counts() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let adapters = vec![
            adapter(
                "source-a",
                vec![fixture("X", "obfs4", 100), fixture("Y", "obfs4", 100)],
                Duration::ZERO,
            ),
            adapter("source-b", vec![fixture("X", "direct", 100)], Duration::ZERO),
        ];
        let first = aggregator(&ledger, 5_000).run(&auth, &adapters).await.unwrap();
        let second = aggregator(&ledger, 5_000).run(&auth, &adapters).await.unwrap();
        assert_eq!(first.descriptors.len(), 2);
        assert_eq!(second.descriptors.len(), first.descriptors.len());
    }

    #[tokio::test]
    async fn one_timeout_among_three_sources_is_not_fatal() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 100);
        let adapters = vec![
            adapter("fast-1", vec![fixture("A", "obfs4", 1)], Duration::ZERO),
            Arc::new(HangingAdapter("stuck")) as Arc<dyn SourceAdapter>,
            adapter("fast-2", vec![fixture("B", "obfs4", 1)], Duration::ZERO),
        ];
        let result = agg.run(&auth, &adapters).await.unwrap();
        assert_eq!(result.descriptors.len(), 2);
        assert_eq!(result.per_source_errors.len(), 1);
        assert!(matches!(result.per_source_errors["stuck"], SourceError::Timeout(100)));
    }

    #[tokio::test]
    async fn transport_failures_are_recorded_per_source() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 1_000);
        let adapters = vec![
            Arc::new(FailingAdapter("broken")) as Arc<dyn SourceAdapter>,
            adapter("ok", vec![fixture("A", "obfs4", 1)], Duration::ZERO),
        ];
        let result = agg.run(&auth, &adapters).await.unwrap();
        assert_eq!(result.descriptors.len(), 1);
        assert!(matches!(result.per_source_errors["broken"], SourceError::Transport(_)));
    }

    #[tokio::test]
    async fn incomplete_raw_records_are_dropped_and_counted() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 1_000);
        let mut bad = RawRecord::new("", "1.2.3.4", 443);
        bad.fingerprint = None;
        let adapters = vec![adapter(
            "mixed",
            vec![fixture("A", "obfs4", 1), bad, RawRecord::new("B", "5.6.7.8", 0)],
            Duration::ZERO,
        )];
        let result = agg.run(&auth, &adapters).await.unwrap();
        assert_eq!(result.descriptors.len(), 1);
        assert_eq!(result.activity.details["records_dropped"], "2");
        assert_eq!(result.activity.details["records_normalized"], "1");
    }

    #[tokio::test]
    async fn mismatched_authorization_is_fatal() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "assess-target");
        let agg = aggregator(&ledger, 1_000);
        let adapters = vec![adapter("a", Vec::new(), Duration::ZERO)];
        let err = agg.run(&auth, &adapters).await.unwrap_err();
        assert!(matches!(err, AggregationError::AuthorizationMismatch { .. }));
        // authorization entry only; no activity logged for a refused run
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn zero_adapters_is_fatal() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 1_000);
        let err = agg.run(&auth, &[]).await.unwrap_err();
        assert!(matches!(err, AggregationError::NoAdapters));
    }

    #[tokio::test]
    async fn cancellation_yields_no_partial_result() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 30_000);
        let adapters = vec![
            adapter("done", vec![fixture("A", "obfs4", 1)], Duration::ZERO),
            Arc::new(HangingAdapter("slow")) as Arc<dyn SourceAdapter>,
        ];
        let handle = agg.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });
        let err = agg.run(&auth, &adapters).await.unwrap_err();
        assert!(matches!(err, AggregationError::Cancelled));
        // one authorization entry, no activity record for the cancelled run
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn run_logs_exactly_one_activity_record() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 1_000);
        let adapters = vec![adapter("only", vec![fixture("A", "obfs4", 1)], Duration::ZERO)];
        let result = agg.run(&auth, &adapters).await.unwrap();
        assert_eq!(ledger.len(), 2); // authorization + activity
        assert_eq!(result.activity.activity, "aggregation-run");
        assert_eq!(result.activity.details["adapters"], "only");
    }

    struct FixedCatalog;

    impl CatalogLookup for FixedCatalog {
        fn lookup(&self, fingerprint: &str) -> anyhow::Result<Option<CatalogEntry>> {
            if fingerprint == "KNOWN" {
                Ok(Some(CatalogEntry {
                    fingerprint: fingerprint.to_string(),
                    first_seen_ms: 10,
                    last_seen_ms: 20,
                }))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn catalog_preseeds_first_seen() {
        let ledger = Arc::new(AuditLedger::new());
        let auth = authorized(&ledger, "enumerate-bridges");
        let agg = aggregator(&ledger, 1_000).with_catalog(Arc::new(FixedCatalog));
        let adapters = vec![adapter(
            "src",
            vec![fixture("KNOWN", "obfs4", 500), fixture("NEW", "obfs4", 500)],
            Duration::ZERO,
        )];
        let result = agg.run(&auth, &adapters).await.unwrap();
        let mut seen = BTreeMap::new();
        for mut d in result.descriptors {
            agg.codec().decrypt_fields(&mut d).unwrap();
            seen.insert(d.fingerprint.clone(), d.first_seen_ms);
        }
        assert_eq!(seen["KNOWN"], 10);
        assert_eq!(seen["NEW"], 500);
    }
}
