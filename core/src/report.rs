//! Risk report generation over the findings store and audit ledger.

use crate::findings::{FindingsStore, RiskLevel, SecurityAssessment, VulnerabilityFinding};
use crate::ledger::{AuditLedger, LedgerEntry};
use crate::now_ms;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A High/Medium area finding surfaced in the report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SecurityGap {
    pub target: String,
    pub area: String,
    pub risk: RiskLevel,
    pub notes: String,
}

/// Immutable summary of one research session: findings, assessments,
/// derived rollups and the ledger snapshot that authorized them.
#[derive(Debug, Serialize)]
pub struct RiskReport {
    pub report_id: String,
    pub generated_ms: i64,
    pub total_findings: usize,
    pub total_assessments: usize,
    /// Highest assessed risk across all targets; low when nothing assessed.
    pub overall_risk: RiskLevel,
    pub category_distribution: BTreeMap<String, usize>,
    pub gaps: Vec<SecurityGap>,
    pub findings: Vec<VulnerabilityFinding>,
    pub assessments: Vec<SecurityAssessment>,
    pub ledger: Vec<LedgerEntry>,
}

impl FindingsStore {
    /// Build the report from the current store contents and a ledger
    /// snapshot. Mutates neither.
    pub fn generate_report(&self, ledger: &AuditLedger) -> RiskReport {
        let mut category_distribution: BTreeMap<String, usize> = BTreeMap::new();
        for finding in self.findings() {
            *category_distribution
                .entry(finding.category.as_str().to_string())
                .or_default() += 1;
        }

        let mut gaps = Vec::new();
        for assessment in self.assessments() {
            for area in &assessment.findings {
                if matches!(area.risk, RiskLevel::High | RiskLevel::Medium) {
                    gaps.push(SecurityGap {
                        target: assessment.target.clone(),
                        area: area.area.clone(),
                        risk: area.risk,
                        notes: area.notes.clone(),
                    });
                }
            }
        }

        let overall_risk = self
            .assessments()
            .iter()
            .map(|a| a.risk)
            .max()
            .unwrap_or(RiskLevel::Low);

        RiskReport {
            report_id: format!("risk-report-{}", Uuid::new_v4()),
            generated_ms: now_ms(),
            total_findings: self.findings().len(),
            total_assessments: self.assessments().len(),
            overall_risk,
            category_distribution,
            gaps,
            findings: self.findings().to_vec(),
            assessments: self.assessments().to_vec(),
            ledger: ledger.snapshot(),
        }
    }
}
