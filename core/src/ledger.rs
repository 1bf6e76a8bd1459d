//! Append-only audit ledger shared by the gate and the aggregator.

use crate::gate::AuthorizationScope;
use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Record of one successful authorization check. Created exactly once per
/// check, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationRecord {
    pub operation: String,
    pub scope: AuthorizationScope,
    pub timestamp_ms: i64,
    pub actor: String,
    pub lab_environment: bool,
    pub reference: String,
}

/// Record of one data-gathering activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityRecord {
    pub activity: String,
    pub details: BTreeMap<String, String>,
    pub timestamp_ms: i64,
    pub actor: String,
    pub environment: String,
}

impl ActivityRecord {
    pub fn new(activity: impl Into<String>, actor: impl Into<String>, environment: impl Into<String>) -> Self {
        ActivityRecord {
            activity: activity.into(),
            details: BTreeMap::new(),
            timestamp_ms: now_ms(),
            actor: actor.into(),
            environment: environment.into(),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// The two record kinds share the ledger but stay distinct variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    Authorization(AuthorizationRecord),
    Activity(ActivityRecord),
}

/// Append-only, insertion-ordered sequence of audit records. Appends are
/// serialized; no removal operation is exposed.
#[derive(Debug, Default)]
pub struct AuditLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        AuditLedger::default()
    }

    pub fn append_authorization(&self, record: AuthorizationRecord) {
        let mut entries = self.entries.lock().expect("ledger poisoned");
        entries.push(LedgerEntry::Authorization(record));
    }

    pub fn append_activity(&self, record: ActivityRecord) {
        let mut entries = self.entries.lock().expect("ledger poisoned");
        entries.push(LedgerEntry::Activity(record));
    }

    /// Immutable copy of the ledger for reporting.
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.lock().expect("ledger poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ledger poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AuthorizationScope;
    use std::sync::Arc;

    fn auth_record(op: &str) -> AuthorizationRecord {
        AuthorizationRecord {
            operation: op.to_string(),
            scope: AuthorizationScope::AuthorizedResearch,
            timestamp_ms: now_ms(),
            actor: "research-user".into(),
            lab_environment: true,
            reference: "RESEARCH-PROGRAM-001".into(),
        }
    }

    #[test]
    fn appends_preserve_insertion_order() {
        let ledger = AuditLedger::new();
        ledger.append_authorization(auth_record("first"));
        ledger.append_activity(ActivityRecord::new("second", "research-user", "lab"));
        let snap = ledger.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(matches!(&snap[0], LedgerEntry::Authorization(r) if r.operation == "first"));
        assert!(matches!(&snap[1], LedgerEntry::Activity(a) if a.activity == "second"));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let ledger = AuditLedger::new();
        ledger.append_authorization(auth_record("op"));
        let snap = ledger.snapshot();
        ledger.append_authorization(auth_record("later"));
        assert_eq!(snap.len(), 1);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn entries_serialize_with_kind_tags() {
        let entry = LedgerEntry::Activity(ActivityRecord::new("probe", "worker", "lab"));
        let v: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["kind"], "activity");
        assert_eq!(v["activity"], "probe");
    }

    #[test]
    fn concurrent_appends_are_all_recorded() {
        let ledger = Arc::new(AuditLedger::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    let rec = ActivityRecord::new(format!("t{}-{}", i, j), "worker", "lab");
                    ledger.append_activity(rec);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.len(), 8 * 50);
    }
}
