//! Policy naming convention: `en-<env>-ca-<scope>-<control>-<nnn>`.

use super::model::Policy;
use super::report::{Severity, ValidationIssue};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;

pub const NAME_MALFORMED: &str = "NAME_MALFORMED";
pub const DISPLAY_NAME_MISSING: &str = "DISPLAY_NAME_MISSING";
pub const NAME_DUPLICATE: &str = "NAME_DUPLICATE";
pub const NAME_SEQUENCE_COLLISION: &str = "NAME_SEQUENCE_COLLISION";
pub const DISPLAY_NAME_DUPLICATE: &str = "DISPLAY_NAME_DUPLICATE";
pub const NAME_UNKNOWN_SCOPE: &str = "NAME_UNKNOWN_SCOPE";
pub const NAME_UNKNOWN_CONTROL: &str = "NAME_UNKNOWN_CONTROL";

/// Human-readable form of the grammar, used in messages.
pub const NAME_PATTERN: &str = "en-<prd|tst|dev>-ca-<scope>-<control>-<001..999>";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^en-(?P<env>prd|tst|dev)-ca-(?P<scope>app-[a-z0-9]+|[a-z0-9]+)-(?P<control>[a-z0-9]+)-(?P<seq>[0-9]{3})$",
    )
    .expect("naming grammar regex compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    Prd,
    Tst,
    Dev,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prd => "prd",
            Environment::Tst => "tst",
            Environment::Dev => "dev",
        }
    }
}

/// Components derived from a well-formed policy name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyName {
    pub env: Environment,
    pub scope: String,
    pub control: String,
    pub sequence: u16,
}

impl PolicyName {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = NAME_RE.captures(name)?;
        let env = match &caps["env"] {
            "prd" => Environment::Prd,
            "tst" => Environment::Tst,
            _ => Environment::Dev,
        };
        let sequence: u16 = caps["seq"].parse().ok()?;
        if sequence == 0 {
            return None;
        }
        Some(Self {
            env,
            scope: caps["scope"].to_string(),
            control: caps["control"].to_string(),
            sequence,
        })
    }
}

/// Optional allow-lists from `naming-rules.yaml`. Empty means unrestricted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NamingRules {
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub controls: BTreeSet<String>,
}

/// Validate one policy's name against the grammar and the rest of the set.
///
/// Set-level checks only report on `policy`, so calling this for every
/// member of `all` yields each finding once per affected policy.
pub fn validate(policy: &Policy, all: &[Policy], rules: &NamingRules) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let name = policy.name.as_str();

    let parsed = PolicyName::parse(name);
    match &parsed {
        None => issues.push(ValidationIssue::new(
            Severity::Critical,
            NAME_MALFORMED,
            name,
            format!("Name '{}' does not match pattern {}", name, NAME_PATTERN),
        )),
        Some(parts) => {
            if !rules.scopes.is_empty()
                && !parts.scope.starts_with("app-")
                && !rules.scopes.contains(&parts.scope)
            {
                issues.push(ValidationIssue::new(
                    Severity::High,
                    NAME_UNKNOWN_SCOPE,
                    name,
                    format!(
                        "Invalid scope '{}'. Allowed: {}",
                        parts.scope,
                        join(&rules.scopes)
                    ),
                ));
            }
            if !rules.controls.is_empty() && !rules.controls.contains(&parts.control) {
                issues.push(ValidationIssue::new(
                    Severity::High,
                    NAME_UNKNOWN_CONTROL,
                    name,
                    format!(
                        "Invalid control '{}'. Allowed: {}",
                        parts.control,
                        join(&rules.controls)
                    ),
                ));
            }
        }
    }

    if policy.display_name.is_none() {
        issues.push(ValidationIssue::new(
            Severity::High,
            DISPLAY_NAME_MISSING,
            name,
            "displayName is missing or empty",
        ));
    }

    let same_name: Vec<&Policy> = all.iter().filter(|p| p.name == policy.name).collect();
    if same_name.len() > 1 {
        let sources: Vec<&str> = same_name.iter().map(|p| p.source.as_str()).collect();
        issues.push(ValidationIssue::new(
            Severity::Critical,
            NAME_DUPLICATE,
            name,
            format!(
                "Name '{}' is declared {} times ({})",
                name,
                same_name.len(),
                sources.join(", ")
            ),
        ));
    }

    if let Some(parts) = &parsed {
        if let Some(first) = first_claimant(parts, all) {
            if !std::ptr::eq(first, policy) && first.display_name != policy.display_name {
                issues.push(ValidationIssue::new(
                    Severity::High,
                    NAME_SEQUENCE_COLLISION,
                    name,
                    format!(
                        "Sequence {:03} for {}/{}/{} is already used by '{}' ({}); pick the next free number",
                        parts.sequence,
                        parts.env.as_str(),
                        parts.scope,
                        parts.control,
                        first.display_name(),
                        first.source
                    ),
                ));
            }
        }
    }

    if let Some(display) = &policy.display_name {
        let clashes: Vec<&Policy> = all
            .iter()
            .filter(|p| p.name != policy.name)
            .filter(|p| {
                p.display_name
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(display))
            })
            .collect();
        if !clashes.is_empty() {
            let names: Vec<&str> = clashes.iter().map(|p| p.name.as_str()).collect();
            issues.push(ValidationIssue::new(
                Severity::High,
                DISPLAY_NAME_DUPLICATE,
                name,
                format!(
                    "displayName '{}' is also used by {}; remote policies are matched by displayName",
                    display,
                    names.join(", ")
                ),
            ));
        }
    }

    issues
}

/// First policy in declaration order that claims these name components.
fn first_claimant<'a>(parts: &PolicyName, all: &'a [Policy]) -> Option<&'a Policy> {
    all.iter()
        .find(|p| PolicyName::parse(&p.name).as_ref() == Some(parts))
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::fixtures::{document, policy};
    use serde_json::json;

    fn named(name: &str) -> Policy {
        policy(&document(name))
    }

    #[test]
    fn test_parse_simple_name() {
        let parts = PolicyName::parse("en-prd-ca-allusers-mfa-001").unwrap();
        assert_eq!(parts.env, Environment::Prd);
        assert_eq!(parts.scope, "allusers");
        assert_eq!(parts.control, "mfa");
        assert_eq!(parts.sequence, 1);
    }

    #[test]
    fn test_parse_compound_app_scope() {
        let parts = PolicyName::parse("en-tst-ca-app-salesforce-compliantdevice-042").unwrap();
        assert_eq!(parts.scope, "app-salesforce");
        assert_eq!(parts.control, "compliantdevice");
        assert_eq!(parts.sequence, 42);

        let plain = PolicyName::parse("en-dev-ca-app-mfa-999").unwrap();
        assert_eq!(plain.scope, "app");
        assert_eq!(plain.control, "mfa");
    }

    #[test]
    fn test_malformed_names() {
        for bad in [
            "en-qa-ca-allusers-mfa-001",
            "en-prd-ca-allusers-mfa-000",
            "en-prd-ca-allusers-mfa-1",
            "en-prd-ca-allusers-mfa-1000",
            "en-prd-ca-AllUsers-mfa-001",
            "en-prd-allusers-mfa-001",
            "",
        ] {
            assert!(PolicyName::parse(bad).is_none(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_malformed_name_yields_exactly_one_critical() {
        let p = named("Require MFA for everyone");
        let issues = validate(&p, std::slice::from_ref(&p), &NamingRules::default());
        let criticals: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .collect();
        assert_eq!(criticals.len(), 1);
        assert_eq!(criticals[0].code, NAME_MALFORMED);
    }

    #[test]
    fn test_missing_display_name() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["displayName"] = json!("   ");
        let p = policy(&doc);
        let issues = validate(&p, std::slice::from_ref(&p), &NamingRules::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, DISPLAY_NAME_MISSING);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn test_duplicate_name_reported_on_each_copy() {
        let a = named("en-prd-ca-allusers-mfa-001");
        let mut b = a.clone();
        b.source = "copy.yaml".into();
        let all = vec![a, b];
        for p in &all {
            let issues = validate(p, &all, &NamingRules::default());
            assert!(
                issues
                    .iter()
                    .any(|i| i.code == NAME_DUPLICATE && i.severity == Severity::Critical)
            );
            // Same displayName: a double declaration, not a numbering clash.
            assert!(!issues.iter().any(|i| i.code == NAME_SEQUENCE_COLLISION));
        }
    }

    #[test]
    fn test_sequence_collision_between_different_policies() {
        let a = named("en-prd-ca-allusers-mfa-001");
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["displayName"] = json!("Another MFA policy");
        let b = policy(&doc);
        let all = vec![a, b];

        let first = validate(&all[0], &all, &NamingRules::default());
        assert!(!first.iter().any(|i| i.code == NAME_SEQUENCE_COLLISION));

        let second = validate(&all[1], &all, &NamingRules::default());
        let collision = second
            .iter()
            .find(|i| i.code == NAME_SEQUENCE_COLLISION)
            .unwrap();
        assert_eq!(collision.severity, Severity::High);
        assert!(collision.message.contains("001"));
    }

    #[test]
    fn test_duplicate_display_name() {
        let a = named("en-prd-ca-allusers-mfa-001");
        let mut doc = document("en-prd-ca-allusers-mfa-002");
        doc["displayName"] = json!("EN-PRD-CA-ALLUSERS-MFA-001 DISPLAY");
        let b = policy(&doc);
        let all = vec![a, b];
        let issues = validate(&all[0], &all, &NamingRules::default());
        assert!(issues.iter().any(|i| i.code == DISPLAY_NAME_DUPLICATE));
    }

    #[test]
    fn test_allow_lists() {
        let rules = NamingRules {
            scopes: ["allusers".to_string()].into_iter().collect(),
            controls: ["mfa".to_string()].into_iter().collect(),
        };
        let ok = named("en-prd-ca-app-crm-mfa-001");
        assert!(validate(&ok, std::slice::from_ref(&ok), &rules).is_empty());

        let bad = named("en-prd-ca-guests-block-001");
        let codes: Vec<String> = validate(&bad, std::slice::from_ref(&bad), &rules)
            .into_iter()
            .map(|i| i.code)
            .collect();
        assert_eq!(codes, vec![NAME_UNKNOWN_SCOPE, NAME_UNKNOWN_CONTROL]);
    }
}
