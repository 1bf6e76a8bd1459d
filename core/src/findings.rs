//! Findings store for defensive-research operations.

use crate::error::ResearchError;
use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Closed set of researched areas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FindingCategory {
    Authentication,
    Encryption,
    Network,
    AccessControl,
    Session,
}

impl FindingCategory {
    pub const ALL: [FindingCategory; 5] = [
        FindingCategory::Authentication,
        FindingCategory::Encryption,
        FindingCategory::Network,
        FindingCategory::AccessControl,
        FindingCategory::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Authentication => "authentication",
            FindingCategory::Encryption => "encryption",
            FindingCategory::Network => "network",
            FindingCategory::AccessControl => "access-control",
            FindingCategory::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl From<Severity> for RiskLevel {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
        }
    }
}

/// One vulnerability finding. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VulnerabilityFinding {
    pub id: String,
    pub target: String,
    pub category: FindingCategory,
    pub severity: Severity,
    pub discovered_ms: i64,
    pub description: String,
    pub recommendations: Vec<String>,
}

impl VulnerabilityFinding {
    pub fn new(
        target: impl Into<String>,
        category: FindingCategory,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        VulnerabilityFinding {
            id: format!("{}-{}", category.as_str(), Uuid::new_v4()),
            target: target.into(),
            category,
            severity,
            discovered_ms: now_ms(),
            description: description.into(),
            recommendations: Vec::new(),
        }
    }

    pub fn recommend(mut self, r: impl Into<String>) -> Self {
        self.recommendations.push(r.into());
        self
    }
}

/// One assessed area inside a [`SecurityAssessment`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AreaFinding {
    pub area: String,
    pub risk: RiskLevel,
    pub notes: String,
}

/// Assessment of one target. `risk` is derived from the findings, never set
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityAssessment {
    pub id: String,
    pub target: String,
    pub findings: Vec<AreaFinding>,
    pub risk: RiskLevel,
    pub recommendations: Vec<String>,
    pub assessed_ms: i64,
    pub authorized_by: String,
}

/// Research lifecycle of one target within a session. One-directional;
/// `Assessed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResearchPhase {
    NotResearched,
    Researching,
    FindingsRecorded,
    Assessed,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::NotResearched => "not-researched",
            ResearchPhase::Researching => "researching",
            ResearchPhase::FindingsRecorded => "findings-recorded",
            ResearchPhase::Assessed => "assessed",
        }
    }
}

/// Overall risk as a pure function of finding severities: any high finding
/// makes the target high risk; more than two mediums make it medium;
/// everything else is low.
pub fn derive_risk(severities: &[Severity]) -> RiskLevel {
    if severities.iter().any(|s| *s == Severity::High) {
        return RiskLevel::High;
    }
    let mediums = severities.iter().filter(|s| **s == Severity::Medium).count();
    if mediums > 2 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Accumulates vulnerability findings and produced assessments.
#[derive(Debug, Default)]
pub struct FindingsStore {
    findings: Vec<VulnerabilityFinding>,
    assessments: Vec<SecurityAssessment>,
    phases: BTreeMap<String, ResearchPhase>,
}

impl FindingsStore {
    pub fn new() -> Self {
        FindingsStore::default()
    }

    pub fn phase(&self, target: &str) -> ResearchPhase {
        self.phases
            .get(target)
            .copied()
            .unwrap_or(ResearchPhase::NotResearched)
    }

    pub fn findings(&self) -> &[VulnerabilityFinding] {
        &self.findings
    }

    pub fn assessments(&self) -> &[SecurityAssessment] {
        &self.assessments
    }

    pub fn findings_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a VulnerabilityFinding> {
        self.findings.iter().filter(move |f| f.target == target)
    }

    /// `NotResearched -> Researching`.
    pub fn begin_research(&mut self, target: &str) -> Result<(), ResearchError> {
        match self.phase(target) {
            ResearchPhase::NotResearched => {
                self.phases.insert(target.to_string(), ResearchPhase::Researching);
                Ok(())
            }
            from => Err(ResearchError::InvalidTransition {
                target: target.to_string(),
                from: from.as_str(),
                to: ResearchPhase::Researching.as_str(),
            }),
        }
    }

    /// `Researching -> FindingsRecorded` (repeatable while recording).
    pub fn record(&mut self, finding: VulnerabilityFinding) -> Result<(), ResearchError> {
        match self.phase(&finding.target) {
            ResearchPhase::Researching | ResearchPhase::FindingsRecorded => {
                self.phases
                    .insert(finding.target.clone(), ResearchPhase::FindingsRecorded);
                self.findings.push(finding);
                Ok(())
            }
            from => Err(ResearchError::InvalidTransition {
                target: finding.target.clone(),
                from: from.as_str(),
                to: ResearchPhase::FindingsRecorded.as_str(),
            }),
        }
    }

    /// `FindingsRecorded -> Assessed`; terminal for the target this session.
    pub fn assess(
        &mut self,
        target: &str,
        authorized_by: &str,
    ) -> Result<SecurityAssessment, ResearchError> {
        match self.phase(target) {
            ResearchPhase::FindingsRecorded => {}
            from => {
                return Err(ResearchError::InvalidTransition {
                    target: target.to_string(),
                    from: from.as_str(),
                    to: ResearchPhase::Assessed.as_str(),
                })
            }
        }
        let target_findings: Vec<&VulnerabilityFinding> = self.findings_for(target).collect();
        if target_findings.is_empty() {
            return Err(ResearchError::NoFindings(target.to_string()));
        }
        let severities: Vec<Severity> = target_findings.iter().map(|f| f.severity).collect();
        let areas = target_findings
            .iter()
            .map(|f| AreaFinding {
                area: f.category.as_str().to_string(),
                risk: f.severity.into(),
                notes: f.description.clone(),
            })
            .collect();
        let mut recommendations = Vec::new();
        for f in &target_findings {
            for r in &f.recommendations {
                if !recommendations.contains(r) {
                    recommendations.push(r.clone());
                }
            }
        }
        let assessment = SecurityAssessment {
            id: format!("assessment-{}", Uuid::new_v4()),
            target: target.to_string(),
            findings: areas,
            risk: derive_risk(&severities),
            recommendations,
            assessed_ms: now_ms(),
            authorized_by: authorized_by.to_string(),
        };
        self.phases.insert(target.to_string(), ResearchPhase::Assessed);
        self.assessments.push(assessment.clone());
        Ok(assessment)
    }

    /// Run the canned research areas against a target: one finding per area
    /// with its standing severity and remediation list.
    pub fn research_target(&mut self, target: &str) -> Result<Vec<VulnerabilityFinding>, ResearchError> {
        self.begin_research(target)?;
        let produced: Vec<VulnerabilityFinding> = FindingCategory::ALL
            .iter()
            .map(|&category| canned_finding(target, category))
            .collect();
        for finding in &produced {
            self.record(finding.clone())?;
        }
        Ok(produced)
    }
}

fn canned_finding(target: &str, category: FindingCategory) -> VulnerabilityFinding {
    match category {
        FindingCategory::Authentication => VulnerabilityFinding::new(
            target,
            category,
            Severity::Medium,
            "authentication mechanism weakness",
        )
        .recommend("Implement multi-factor authentication")
        .recommend("Strengthen password policies")
        .recommend("Add rate limiting for authentication attempts"),
        FindingCategory::Encryption => VulnerabilityFinding::new(
            target,
            category,
            Severity::High,
            "encryption implementation weakness",
        )
        .recommend("Upgrade to stronger encryption algorithms")
        .recommend("Implement proper key management")
        .recommend("Add encryption integrity checks"),
        FindingCategory::Network => VulnerabilityFinding::new(
            target,
            category,
            Severity::Medium,
            "network protocol weakness",
        )
        .recommend("Implement network segmentation")
        .recommend("Add intrusion detection systems")
        .recommend("Strengthen network monitoring"),
        FindingCategory::AccessControl => VulnerabilityFinding::new(
            target,
            category,
            Severity::High,
            "access control weakness",
        )
        .recommend("Implement role-based access control")
        .recommend("Add access logging and monitoring")
        .recommend("Strengthen privilege escalation controls"),
        FindingCategory::Session => VulnerabilityFinding::new(
            target,
            category,
            Severity::Medium,
            "session management weakness",
        )
        .recommend("Implement secure session tokens")
        .recommend("Add session timeout controls")
        .recommend("Strengthen session validation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(target: &str, severity: Severity) -> VulnerabilityFinding {
        VulnerabilityFinding::new(target, FindingCategory::Network, severity, "test finding")
            .recommend("Strengthen network monitoring")
    }

    #[test]
    fn risk_derivation_matches_thresholds() {
        assert_eq!(derive_risk(&[Severity::High]), RiskLevel::High);
        assert_eq!(
            derive_risk(&[Severity::Medium, Severity::Medium, Severity::Medium]),
            RiskLevel::Medium
        );
        assert_eq!(derive_risk(&[Severity::Low, Severity::Medium]), RiskLevel::Low);
        assert_eq!(derive_risk(&[]), RiskLevel::Low);
        // two mediums is not enough
        assert_eq!(derive_risk(&[Severity::Medium, Severity::Medium]), RiskLevel::Low);
    }

    #[test]
    fn risk_derivation_is_deterministic() {
        let input = [Severity::Medium, Severity::Medium, Severity::Medium, Severity::Low];
        assert_eq!(derive_risk(&input), derive_risk(&input));
    }

    #[test]
    fn lifecycle_is_one_directional() {
        let mut store = FindingsStore::new();
        assert_eq!(store.phase("t1"), ResearchPhase::NotResearched);

        // cannot record or assess before research starts
        assert!(store.record(finding("t1", Severity::Low)).is_err());
        assert!(store.assess("t1", "program").is_err());

        store.begin_research("t1").unwrap();
        assert_eq!(store.phase("t1"), ResearchPhase::Researching);
        assert!(store.begin_research("t1").is_err());

        // assessing with nothing recorded is a transition error
        assert!(store.assess("t1", "program").is_err());

        store.record(finding("t1", Severity::Medium)).unwrap();
        store.record(finding("t1", Severity::Medium)).unwrap();
        assert_eq!(store.phase("t1"), ResearchPhase::FindingsRecorded);

        let assessment = store.assess("t1", "program").unwrap();
        assert_eq!(assessment.risk, RiskLevel::Low);
        assert_eq!(store.phase("t1"), ResearchPhase::Assessed);

        // assessed is terminal within the session
        assert!(store.record(finding("t1", Severity::High)).is_err());
        assert!(store.assess("t1", "program").is_err());
        assert!(store.begin_research("t1").is_err());
    }

    #[test]
    fn assessment_derives_risk_and_dedupes_recommendations() {
        let mut store = FindingsStore::new();
        store.begin_research("t1").unwrap();
        store.record(finding("t1", Severity::Medium)).unwrap();
        store
            .record(
                VulnerabilityFinding::new("t1", FindingCategory::Encryption, Severity::High, "weak cipher")
                    .recommend("Strengthen network monitoring")
                    .recommend("Implement proper key management"),
            )
            .unwrap();
        let assessment = store.assess("t1", "program").unwrap();
        assert_eq!(assessment.risk, RiskLevel::High);
        assert_eq!(assessment.findings.len(), 2);
        // shared recommendation appears once
        assert_eq!(
            assessment.recommendations,
            vec![
                "Strengthen network monitoring".to_string(),
                "Implement proper key management".to_string(),
            ]
        );
    }

    #[test]
    fn targets_have_independent_lifecycles() {
        let mut store = FindingsStore::new();
        store.begin_research("t1").unwrap();
        store.record(finding("t1", Severity::Low)).unwrap();
        store.assess("t1", "program").unwrap();
        // a second target starts fresh
        store.begin_research("t2").unwrap();
        store.record(finding("t2", Severity::High)).unwrap();
        assert_eq!(store.assess("t2", "program").unwrap().risk, RiskLevel::High);
    }

    #[test]
    fn canned_research_covers_every_area() {
        let mut store = FindingsStore::new();
        let produced = store.research_target("lab-bridge-node-1").unwrap();
        assert_eq!(produced.len(), FindingCategory::ALL.len());
        let assessment = store.assess("lab-bridge-node-1", "program").unwrap();
        // encryption and access-control areas are high severity
        assert_eq!(assessment.risk, RiskLevel::High);
        assert!(!assessment.recommendations.is_empty());
    }
}
