//! Authorization gate: every data-gathering operation passes here first.

use crate::error::AuthorizationError;
use crate::ledger::{AuditLedger, AuthorizationRecord};
use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Closed set of scopes an operation may be authorized under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizationScope {
    LabOnly,
    AuthorizedResearch,
    DefensiveAnalysis,
}

impl fmt::Display for AuthorizationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorizationScope::LabOnly => "lab-only",
            AuthorizationScope::AuthorizedResearch => "authorized-research",
            AuthorizationScope::DefensiveAnalysis => "defensive-analysis",
        };
        f.write_str(s)
    }
}

impl FromStr for AuthorizationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lab-only" => Ok(AuthorizationScope::LabOnly),
            "authorized-research" => Ok(AuthorizationScope::AuthorizedResearch),
            "defensive-analysis" => Ok(AuthorizationScope::DefensiveAnalysis),
            other => Err(format!("unknown authorization scope: {}", other)),
        }
    }
}

/// Explicit gate configuration; replaces any notion of process-global state.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// True only when running inside the controlled lab environment.
    pub lab_environment: bool,
    /// Operations the gate will authorize.
    pub allowed_operations: BTreeSet<String>,
    /// Actor identity recorded on every ledger entry.
    pub actor: String,
    /// Written-authorization reference string.
    pub reference: String,
}

impl GateConfig {
    pub fn new(lab_environment: bool, actor: impl Into<String>, reference: impl Into<String>) -> Self {
        GateConfig {
            lab_environment,
            allowed_operations: BTreeSet::new(),
            actor: actor.into(),
            reference: reference.into(),
        }
    }

    pub fn allow(mut self, operation: impl Into<String>) -> Self {
        self.allowed_operations.insert(operation.into());
        self
    }
}

/// Validates that a named operation is permitted under a declared scope and
/// records the decision. Exactly one ledger append per successful check,
/// zero on failure.
pub struct AuthorizationGate {
    config: GateConfig,
    ledger: Arc<AuditLedger>,
}

impl AuthorizationGate {
    pub fn new(config: GateConfig, ledger: Arc<AuditLedger>) -> Self {
        AuthorizationGate { config, ledger }
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// Check `operation` under `scope`. The returned record must be handed
    /// to `Aggregator::run`; holding it is proof the check happened.
    pub fn check(
        &self,
        operation: &str,
        scope: AuthorizationScope,
    ) -> Result<AuthorizationRecord, AuthorizationError> {
        if !self.config.lab_environment {
            warn!(operation, %scope, "authorization denied: not in lab environment");
            return Err(AuthorizationError::Environment(operation.to_string()));
        }
        if !self.config.allowed_operations.contains(operation) {
            warn!(operation, %scope, "authorization denied: operation not on allow-list");
            return Err(AuthorizationError::UnauthorizedOperation(operation.to_string()));
        }
        let record = AuthorizationRecord {
            operation: operation.to_string(),
            scope,
            timestamp_ms: now_ms(),
            actor: self.config.actor.clone(),
            lab_environment: self.config.lab_environment,
            reference: self.config.reference.clone(),
        };
        self.ledger.append_authorization(record.clone());
        info!(operation, %scope, actor = %record.actor, "authorization verified");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(lab: bool) -> AuthorizationGate {
        let config = GateConfig::new(lab, "research-user", "RESEARCH-PROGRAM-001")
            .allow("enumerate-bridges")
            .allow("assess-target");
        AuthorizationGate::new(config, Arc::new(AuditLedger::new()))
    }

    #[test]
    fn allowed_operation_appends_exactly_one_record() {
        let g = gate(true);
        for scope in [
            AuthorizationScope::LabOnly,
            AuthorizationScope::AuthorizedResearch,
            AuthorizationScope::DefensiveAnalysis,
        ] {
            let before = g.ledger().len();
            let rec = g.check("enumerate-bridges", scope).unwrap();
            assert_eq!(rec.operation, "enumerate-bridges");
            assert_eq!(rec.scope, scope);
            assert!(rec.lab_environment);
            assert_eq!(g.ledger().len(), before + 1);
        }
    }

    #[test]
    fn non_lab_environment_fails_without_logging() {
        let g = gate(false);
        let err = g
            .check("enumerate-bridges", AuthorizationScope::LabOnly)
            .unwrap_err();
        assert!(matches!(err, AuthorizationError::Environment(_)));
        assert_eq!(g.ledger().len(), 0);
    }

    #[test]
    fn unknown_operation_fails_without_logging() {
        let g = gate(true);
        let err = g
            .check("harvest-credentials", AuthorizationScope::AuthorizedResearch)
            .unwrap_err();
        assert!(matches!(err, AuthorizationError::UnauthorizedOperation(_)));
        assert_eq!(g.ledger().len(), 0);
    }

    #[test]
    fn scope_round_trips_through_strings() {
        for s in ["lab-only", "authorized-research", "defensive-analysis"] {
            let scope: AuthorizationScope = s.parse().unwrap();
            assert_eq!(scope.to_string(), s);
        }
        assert!("full-authority".parse::<AuthorizationScope>().is_err());
    }
}
