//! Diagnostics produced by the validators, the conflict detector and the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[serde(alias = "critical")]
    Critical,
    #[serde(alias = "high")]
    High,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "info")]
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Info => "INFO",
        }
    }

    /// CRITICAL and HIGH gate deployment; MEDIUM and INFO are advisory.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub policy_name: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        code: impl Into<String>,
        policy_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            policy_name: policy_name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub info: usize,
}

/// Issues in detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn has_blocking(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_blocking())
    }

    pub fn for_policy<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues.iter().filter(move |i| i.policy_name == name)
    }

    pub fn counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for issue in &self.issues {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }
}

impl IntoIterator for ValidationReport {
    type Item = ValidationIssue;
    type IntoIter = std::vec::IntoIter<ValidationIssue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_severities() {
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert!(!Severity::Info.is_blocking());
    }

    #[test]
    fn test_report_preserves_detection_order() {
        let mut report = ValidationReport::new();
        report.push(ValidationIssue::new(Severity::Info, "B", "p2", "second"));
        report.push(ValidationIssue::new(Severity::Critical, "A", "p1", "first"));
        assert_eq!(report.issues()[0].code, "B");
        assert!(report.has_blocking());

        let counts = report.counts();
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.info, 1);
        assert_eq!(report.for_policy("p1").count(), 1);
    }
}
