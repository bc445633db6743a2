//! Declarative compliance rules and the interpreter that evaluates them.
//!
//! Rules come from `compliance-rules.yaml`; adding a rule never needs a code
//! change as long as it fits one of the predicate shapes below. The advisory
//! `ms-best-practices.yaml` uses the same format.

use super::model::{Policy, PolicyState, RiskLevel, SessionControlKind};
use super::naming::PolicyName;
use super::report::{Severity, ValidationIssue};
use crate::error::RulesetError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every listed control must be present.
    #[default]
    All,
    /// At least one listed control must be present.
    Any,
}

/// Predicate shapes understood by the evaluator, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Predicate {
    /// includeUsers is All ⇒ excludeGroups must contain the group.
    #[serde(rename_all = "camelCase")]
    RequireExcludeGroup {
        #[serde(default)]
        group: Option<String>,
    },
    /// Scope matches ⇒ controls required.
    #[serde(rename_all = "camelCase")]
    RequireControl {
        scope: String,
        controls: Vec<String>,
        #[serde(default, rename = "match")]
        mode: MatchMode,
    },
    /// Scope matches ⇒ controls forbidden.
    #[serde(rename_all = "camelCase")]
    ForbidControl { scope: String, controls: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ForbidState {
        scope: String,
        states: Vec<PolicyState>,
    },
    #[serde(rename_all = "camelCase")]
    ForbidClientAppType { scope: String, types: Vec<String> },
    #[serde(rename_all = "camelCase")]
    MinimumControls { scope: String, count: usize },
    #[serde(rename_all = "camelCase")]
    AllowedStates { states: Vec<PolicyState> },
    /// Scope matches and the policy targets one of the risk levels (or no
    /// levels are listed) ⇒ the session control must be configured.
    #[serde(rename_all = "camelCase")]
    RequireSessionControl {
        #[serde(default = "any_scope")]
        scope: String,
        control: SessionControlKind,
        #[serde(default)]
        user_risk_levels: Vec<RiskLevel>,
        #[serde(default)]
        sign_in_risk_levels: Vec<RiskLevel>,
    },
    /// Scope matches ⇒ each listed client app type must be targeted.
    #[serde(rename_all = "camelCase")]
    RequireClientAppType { scope: String, types: Vec<String> },
    /// includeUsers is All ⇒ at least one user or group is excluded.
    RequireAnyExclusion,
}

fn any_scope() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleDocument {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
    pub predicate: Predicate,
}

/// Raw `compliance-rules.yaml` content.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RulesetDocument {
    #[serde(default)]
    pub break_glass_group: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

/// Glob over the scope token of a policy name; `*` matches any run of characters.
#[derive(Debug, Clone)]
pub struct ScopePattern {
    source: String,
    regex: Regex,
}

impl ScopePattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            source: glob.to_string(),
            regex: Regex::new(&format!("^{}$", body))?,
        })
    }

    pub fn matches(&self, scope: &str) -> bool {
        self.regex.is_match(scope)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone)]
enum Check {
    RequireExcludeGroup {
        group: String,
    },
    RequireControl {
        scope: ScopePattern,
        controls: Vec<String>,
        mode: MatchMode,
    },
    ForbidControl {
        scope: ScopePattern,
        controls: Vec<String>,
    },
    ForbidState {
        scope: ScopePattern,
        states: Vec<PolicyState>,
    },
    ForbidClientAppType {
        scope: ScopePattern,
        types: Vec<String>,
    },
    MinimumControls {
        scope: ScopePattern,
        count: usize,
    },
    AllowedStates {
        states: Vec<PolicyState>,
    },
    RequireSessionControl {
        scope: ScopePattern,
        control: SessionControlKind,
        user_risk_levels: Vec<RiskLevel>,
        sign_in_risk_levels: Vec<RiskLevel>,
    },
    RequireClientAppType {
        scope: ScopePattern,
        types: Vec<String>,
    },
    RequireAnyExclusion,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    check: Check,
}

/// A checked ruleset, ready for evaluation.
#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    pub break_glass_group: Option<String>,
    rules: Vec<Rule>,
}

impl Ruleset {
    pub fn from_document(doc: RulesetDocument) -> Result<Self, RulesetError> {
        let break_glass_group = doc
            .break_glass_group
            .map(|g| g.trim().to_lowercase())
            .filter(|g| !g.is_empty());

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());

        for rule in doc.rules {
            if !seen.insert(rule.id.clone()) {
                return Err(RulesetError::DuplicateRuleId(rule.id));
            }
            let id = rule.id.clone();
            let pattern = |glob: &str| {
                ScopePattern::new(glob).map_err(|_| RulesetError::InvalidScopePattern {
                    rule: id.clone(),
                    pattern: glob.to_string(),
                })
            };
            let non_empty = |controls: Vec<String>| {
                if controls.is_empty() {
                    Err(RulesetError::EmptyControls(id.clone()))
                } else {
                    Ok(controls)
                }
            };

            let check = match rule.predicate {
                Predicate::RequireExcludeGroup { group } => {
                    let group = group
                        .map(|g| g.trim().to_lowercase())
                        .filter(|g| !g.is_empty())
                        .or_else(|| break_glass_group.clone())
                        .ok_or_else(|| RulesetError::MissingBreakGlassGroup(id.clone()))?;
                    Check::RequireExcludeGroup { group }
                }
                Predicate::RequireControl {
                    scope,
                    controls,
                    mode,
                } => Check::RequireControl {
                    scope: pattern(&scope)?,
                    controls: non_empty(controls)?,
                    mode,
                },
                Predicate::ForbidControl { scope, controls } => Check::ForbidControl {
                    scope: pattern(&scope)?,
                    controls: non_empty(controls)?,
                },
                Predicate::ForbidState { scope, states } => Check::ForbidState {
                    scope: pattern(&scope)?,
                    states,
                },
                Predicate::ForbidClientAppType { scope, types } => Check::ForbidClientAppType {
                    scope: pattern(&scope)?,
                    types,
                },
                Predicate::MinimumControls { scope, count } => Check::MinimumControls {
                    scope: pattern(&scope)?,
                    count,
                },
                Predicate::AllowedStates { states } => Check::AllowedStates { states },
                Predicate::RequireSessionControl {
                    scope,
                    control,
                    user_risk_levels,
                    sign_in_risk_levels,
                } => Check::RequireSessionControl {
                    scope: pattern(&scope)?,
                    control,
                    user_risk_levels,
                    sign_in_risk_levels,
                },
                Predicate::RequireClientAppType { scope, types } => Check::RequireClientAppType {
                    scope: pattern(&scope)?,
                    types: non_empty(types)?,
                },
                Predicate::RequireAnyExclusion => Check::RequireAnyExclusion,
            };

            rules.push(Rule {
                id: rule.id,
                severity: rule.severity,
                message: rule.message,
                check,
            });
        }

        Ok(Self {
            break_glass_group,
            rules,
        })
    }

    pub fn from_yaml(contents: &str) -> crate::error::Result<Self> {
        let doc: RulesetDocument = serde_yaml::from_str(contents)?;
        Ok(Self::from_document(doc)?)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Placeholder values substituted into a rule's message template.
#[derive(Default)]
struct Vars<'a> {
    scope: &'a str,
    group: &'a str,
    control: &'a str,
    state: &'a str,
    count: String,
    kind: &'a str,
    risk: String,
}

fn render(template: &str, policy: &Policy, vars: &Vars<'_>) -> String {
    template
        .replace("{policy}", &policy.name)
        .replace("{scope}", vars.scope)
        .replace("{group}", vars.group)
        .replace("{control}", vars.control)
        .replace("{state}", vars.state)
        .replace("{count}", &vars.count)
        .replace("{type}", vars.kind)
        .replace("{risk}", &vars.risk)
}

/// An empty client app type list targets every type.
fn targets_client_app_type(policy: &Policy, kind: &str) -> bool {
    let targeted = &policy.conditions.client_app_types;
    targeted.is_empty() || targeted.all || targeted.ids.iter().any(|t| t.eq_ignore_ascii_case(kind))
}

/// Evaluate every rule, in declaration order, against one policy.
pub fn validate(policy: &Policy, ruleset: &Ruleset) -> Vec<ValidationIssue> {
    let parsed = PolicyName::parse(&policy.name);
    let scope = parsed.as_ref().map(|p| p.scope.as_str());
    let in_scope = |pattern: &ScopePattern| scope.is_some_and(|s| pattern.matches(s));

    let mut issues = Vec::new();
    for rule in &ruleset.rules {
        let mut emit = |vars: Vars<'_>| {
            issues.push(ValidationIssue::new(
                rule.severity,
                rule.id.clone(),
                policy.name.clone(),
                render(&rule.message, policy, &vars),
            ));
        };
        let scope_str = scope.unwrap_or("");

        match &rule.check {
            Check::RequireExcludeGroup { group } => {
                if policy.includes_all_users()
                    && !policy.conditions.users.exclude_groups.contains(group)
                {
                    emit(Vars {
                        scope: scope_str,
                        group,
                        ..Default::default()
                    });
                }
            }
            Check::RequireControl {
                scope,
                controls,
                mode,
            } if in_scope(scope) => {
                let missing: Vec<&String> = controls
                    .iter()
                    .filter(|c| !policy.grant_controls.contains(c))
                    .collect();
                match mode {
                    MatchMode::All => {
                        for control in missing {
                            emit(Vars {
                                scope: scope_str,
                                control,
                                ..Default::default()
                            });
                        }
                    }
                    MatchMode::Any => {
                        if missing.len() == controls.len() {
                            let wanted = controls.join(" | ");
                            emit(Vars {
                                scope: scope_str,
                                control: &wanted,
                                ..Default::default()
                            });
                        }
                    }
                }
            }
            Check::ForbidControl { scope, controls } if in_scope(scope) => {
                for control in controls.iter().filter(|c| policy.grant_controls.contains(c)) {
                    emit(Vars {
                        scope: scope_str,
                        control,
                        ..Default::default()
                    });
                }
            }
            Check::ForbidState { scope, states } if in_scope(scope) => {
                if states.contains(&policy.state) {
                    emit(Vars {
                        scope: scope_str,
                        state: policy.state.as_str(),
                        ..Default::default()
                    });
                }
            }
            Check::ForbidClientAppType { scope, types } if in_scope(scope) => {
                for kind in types {
                    if targets_client_app_type(policy, kind) {
                        emit(Vars {
                            scope: scope_str,
                            kind,
                            ..Default::default()
                        });
                    }
                }
            }
            Check::MinimumControls { scope, count } if in_scope(scope) => {
                if policy.grant_controls.built_in_controls.len() < *count {
                    emit(Vars {
                        scope: scope_str,
                        count: count.to_string(),
                        ..Default::default()
                    });
                }
            }
            Check::AllowedStates { states } => {
                if !states.contains(&policy.state) {
                    emit(Vars {
                        scope: scope_str,
                        state: policy.state.as_str(),
                        ..Default::default()
                    });
                }
            }
            Check::RequireSessionControl {
                scope,
                control,
                user_risk_levels,
                sign_in_risk_levels,
            } if in_scope(scope) => {
                let c = &policy.conditions;
                let matched: Vec<&str> = user_risk_levels
                    .iter()
                    .filter(|l| c.user_risk_levels.contains(*l))
                    .chain(sign_in_risk_levels.iter().filter(|l| c.sign_in_risk_levels.contains(*l)))
                    .map(RiskLevel::as_str)
                    .collect();
                let triggered = (user_risk_levels.is_empty() && sign_in_risk_levels.is_empty())
                    || !matched.is_empty();
                if triggered && !policy.session_controls.has(*control) {
                    emit(Vars {
                        scope: scope_str,
                        control: control.as_str(),
                        risk: matched.join(", "),
                        ..Default::default()
                    });
                }
            }
            Check::RequireClientAppType { scope, types } if in_scope(scope) => {
                for kind in types.iter().filter(|t| !targets_client_app_type(policy, t)) {
                    emit(Vars {
                        scope: scope_str,
                        kind,
                        ..Default::default()
                    });
                }
            }
            Check::RequireAnyExclusion => {
                let users = &policy.conditions.users;
                if policy.includes_all_users()
                    && users.exclude_users.is_empty()
                    && users.exclude_groups.is_empty()
                {
                    emit(Vars {
                        scope: scope_str,
                        ..Default::default()
                    });
                }
            }
            _ => {}
        }
    }

    tracing::debug!(
        policy = %policy.name,
        rules = ruleset.rules.len(),
        issues = issues.len(),
        "compliance evaluated"
    );
    issues
}
