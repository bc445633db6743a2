//! Conditional Access policy analysis engine.
//!
//! Parsing, naming and compliance validation, conflict detection and
//! reconciliation are all pure over their inputs; only
//! [`reconcile::apply`] touches the network, through a
//! [`reconcile::DirectoryClient`].

pub mod compliance;
pub mod conflicts;
pub mod model;
pub mod naming;
pub mod reconcile;
pub mod report;
pub mod scope;

pub use compliance::Ruleset;
pub use conflicts::{ConflictPair, DetectorConfig, OverlapKind};
pub use model::{Dimension, GrantOperator, Policy, PolicyState};
pub use naming::NamingRules;
pub use report::{Severity, ValidationIssue, ValidationReport};
pub use scope::Scope;

use serde_json::Value;

pub const POLICY_PARSE_ERROR: &str = "POLICY_PARSE_ERROR";

/// A declared policy document and where it was read from.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source: String,
    pub document: Value,
}

/// Engine inputs loaded from the baseline directory.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub naming: NamingRules,
    pub compliance: Ruleset,
    pub conflicts: DetectorConfig,
    /// Advisory rules; their findings never block.
    pub best_practices: Ruleset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checks {
    pub naming: bool,
    pub compliance: bool,
    pub conflicts: bool,
    pub best_practices: bool,
}

impl Checks {
    pub fn all() -> Self {
        Self {
            naming: true,
            compliance: true,
            conflicts: true,
            best_practices: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Successfully parsed policies, in document order.
    pub policies: Vec<Policy>,
    pub report: ValidationReport,
    pub conflicts: Vec<ConflictPair>,
    /// Best-practice recommendations, kept apart from the gating report.
    pub advisories: ValidationReport,
}

impl Analysis {
    /// Blocking issues always gate; conflicts only when asked to.
    pub fn is_blocked(&self, fail_on_conflicts: bool) -> bool {
        self.report.has_blocking() || (fail_on_conflicts && !self.conflicts.is_empty())
    }
}

/// Parse every document, then run the selected checks. Issues are grouped
/// per policy in document order: parse failure, or naming then compliance.
pub fn analyze(documents: &[SourceDocument], baseline: &Baseline, checks: Checks) -> Analysis {
    let mut policies: Vec<Policy> = Vec::with_capacity(documents.len());
    // Index into `policies`, or the issue that rejected the document.
    let mut parsed: Vec<Result<usize, ValidationIssue>> = Vec::with_capacity(documents.len());
    for doc in documents {
        match model::parse(&doc.document, &doc.source) {
            Ok(policy) => {
                parsed.push(Ok(policies.len()));
                policies.push(policy);
            }
            Err(err) => {
                let name = model::document_name(&doc.document).unwrap_or_else(|| doc.source.clone());
                tracing::warn!(source = %doc.source, error = %err, "policy document rejected");
                parsed.push(Err(ValidationIssue::new(
                    Severity::Critical,
                    POLICY_PARSE_ERROR,
                    name,
                    format!("{}: {}", doc.source, err),
                )));
            }
        }
    }

    let mut report = ValidationReport::new();
    let mut advisories = ValidationReport::new();
    for entry in parsed {
        match entry {
            Err(issue) => report.push(issue),
            Ok(idx) => {
                let policy = &policies[idx];
                if checks.naming {
                    report.extend(naming::validate(policy, &policies, &baseline.naming));
                }
                if checks.compliance {
                    report.extend(compliance::validate(policy, &baseline.compliance));
                }
                if checks.best_practices {
                    advisories.extend(compliance::validate(policy, &baseline.best_practices));
                }
            }
        }
    }

    let conflicts = if checks.conflicts {
        conflicts::detect(&policies, &baseline.conflicts)
    } else {
        Vec::new()
    };

    tracing::info!(
        documents = documents.len(),
        policies = policies.len(),
        issues = report.len(),
        conflicts = conflicts.len(),
        advisories = advisories.len(),
        "analysis complete"
    );

    Analysis {
        policies,
        report,
        conflicts,
        advisories,
    }
}
