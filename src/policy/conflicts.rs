//! Pairwise overlap analysis across the active policy set.

use super::model::{ALL, Dimension, GrantRequirement, Policy};
use super::report::Severity;
use super::scope::Scope;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Substrings that mark service and emergency identities as intentionally uncovered.
pub const DEFAULT_EXEMPT_SUBSTRINGS: [&str; 6] = [
    "service-",
    "system-",
    "sync-",
    "breakglass",
    "emergency",
    "aad-device",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OverlapKind {
    Conflicting,
    OperatorMismatch,
    Redundant,
    GapCandidate,
}

impl OverlapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapKind::Conflicting => "Conflicting",
            OverlapKind::OperatorMismatch => "OperatorMismatch",
            OverlapKind::Redundant => "Redundant",
            OverlapKind::GapCandidate => "GapCandidate",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            OverlapKind::Conflicting => Severity::High,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for OverlapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified overlap. `policy_a` sorts before `policy_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPair {
    pub policy_a: String,
    pub policy_b: String,
    #[serde(rename = "overlapKind")]
    pub kind: OverlapKind,
    /// Dimensions that narrow the overlap (or, for gaps, where the gap lies).
    pub dimensions: Vec<Dimension>,
    pub explanation: String,
}

impl ConflictPair {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

/// `conflict-rules.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConflictRulesDocument {
    /// Per-dimension baseline; users entries are `user:<id>` or `group:<id>`.
    #[serde(default)]
    pub gap_baseline: BTreeMap<Dimension, Vec<String>>,
    #[serde(default)]
    pub exempt_identifiers: Vec<String>,
    #[serde(default)]
    pub exempt_substrings: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    gap_baseline: BTreeMap<Dimension, Scope>,
    exempt_identifiers: BTreeSet<String>,
    exempt_substrings: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            gap_baseline: BTreeMap::new(),
            exempt_identifiers: BTreeSet::new(),
            exempt_substrings: DEFAULT_EXEMPT_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DetectorConfig {
    pub fn from_document(doc: ConflictRulesDocument) -> Self {
        let gap_baseline = doc
            .gap_baseline
            .into_iter()
            .map(|(dimension, ids)| {
                let scope = if ids.iter().any(|id| id.trim() == ALL) {
                    Scope::universal()
                } else if dimension == Dimension::Users {
                    Scope::finite(ids.iter().map(|id| id.trim().to_lowercase()))
                } else {
                    Scope::finite(ids.iter().map(|id| id.trim().to_string()))
                };
                (dimension, scope)
            })
            .collect();

        let mut config = Self {
            gap_baseline,
            exempt_identifiers: doc
                .exempt_identifiers
                .iter()
                .map(|id| id.trim().to_lowercase())
                .collect(),
            ..Self::default()
        };
        if let Some(substrings) = doc.exempt_substrings {
            config.exempt_substrings = substrings.iter().map(|s| s.to_lowercase()).collect();
        }
        config
    }

    pub fn from_yaml(contents: &str) -> crate::error::Result<Self> {
        let doc: ConflictRulesDocument = serde_yaml::from_str(contents)?;
        Ok(Self::from_document(doc))
    }

    /// Baseline for a dimension; `All` unless configured.
    pub fn baseline(&self, dimension: Dimension) -> Scope {
        self.gap_baseline
            .get(&dimension)
            .cloned()
            .unwrap_or_else(Scope::universal)
    }

    pub fn is_exempt(&self, atom: &str) -> bool {
        let bare = atom
            .strip_prefix("user:")
            .or_else(|| atom.strip_prefix("group:"))
            .unwrap_or(atom)
            .to_lowercase();
        self.exempt_identifiers.contains(&bare)
            || self.exempt_identifiers.contains(&atom.to_lowercase())
            || self.exempt_substrings.iter().any(|s| bare.contains(s.as_str()))
    }
}

type Scopes = [Scope; 5];

fn scopes_of(policy: &Policy) -> Scopes {
    Dimension::ALL.map(|d| policy.scope(d))
}

/// Classify every overlapping pair of non-disabled policies.
///
/// Output is ordered by `(policy_a, policy_b)` and does not depend on the
/// order of `policies`.
pub fn detect(policies: &[Policy], config: &DetectorConfig) -> Vec<ConflictPair> {
    let mut active: Vec<(&Policy, Scopes)> = policies
        .iter()
        .filter(|p| p.is_active())
        .map(|p| (p, scopes_of(p)))
        .collect();
    active.sort_by(|(a, _), (b, _)| {
        (a.name.as_str(), a.source.as_str()).cmp(&(b.name.as_str(), b.source.as_str()))
    });

    let mut pairs = Vec::new();
    for (i, (a, sa)) in active.iter().enumerate() {
        for (b, sb) in &active[i + 1..] {
            if let Some(pair) = classify(a, sa, b, sb, config) {
                pairs.push(pair);
            }
        }
    }
    pairs.sort_by(|x, y| (&x.policy_a, &x.policy_b).cmp(&(&y.policy_a, &y.policy_b)));

    tracing::debug!(
        policies = active.len(),
        conflicts = pairs.len(),
        "conflict detection finished"
    );
    pairs
}

fn classify(
    a: &Policy,
    sa: &Scopes,
    b: &Policy,
    sb: &Scopes,
    config: &DetectorConfig,
) -> Option<ConflictPair> {
    let shared: Vec<Scope> = sa.iter().zip(sb.iter()).map(|(x, y)| x.intersect(y)).collect();
    if shared.iter().any(Scope::is_empty) {
        return None;
    }

    let narrowed: Vec<Dimension> = Dimension::ALL
        .iter()
        .zip(shared.iter())
        .filter(|(_, s)| !s.is_universal())
        .map(|(d, _)| *d)
        .collect();
    let where_ = describe(&narrowed, &shared);

    let ra = a.grant_controls.requirement();
    let rb = b.grant_controls.requirement();
    let pair = |kind, dimensions, explanation| ConflictPair {
        policy_a: a.name.clone(),
        policy_b: b.name.clone(),
        kind,
        dimensions,
        explanation,
    };

    if ra == rb {
        let a_in_b = sa.iter().zip(sb.iter()).all(|(x, y)| x.is_subset(y));
        let b_in_a = sb.iter().zip(sa.iter()).all(|(x, y)| x.is_subset(y));
        let explanation = if a_in_b || b_in_a {
            let (inner, outer) = if a_in_b { (a, b) } else { (b, a) };
            format!(
                "'{}' is fully covered by '{}' with the same requirement ({})",
                inner.name, outer.name, ra
            )
        } else {
            format!(
                "'{}' and '{}' both require {} on {}",
                a.name, b.name, ra, where_
            )
        };
        return Some(pair(OverlapKind::Redundant, narrowed, explanation));
    }

    if ra.controls == rb.controls {
        return Some(pair(
            OverlapKind::OperatorMismatch,
            narrowed,
            format!(
                "'{}' requires {} but '{}' requires {} on {}",
                a.name, ra, b.name, rb, where_
            ),
        ));
    }

    if ra.implies(&rb) || rb.implies(&ra) {
        return Some(pair(
            OverlapKind::Conflicting,
            narrowed,
            format!("{} on {}", contrast(&a.name, &ra, &b.name, &rb), where_),
        ));
    }

    // Neither requirement subsumes the other; only an uncovered population is reported.
    let mut gap_dims = Vec::new();
    let mut gap_parts = Vec::new();
    for (i, dimension) in Dimension::ALL.iter().enumerate() {
        let uncovered = config
            .baseline(*dimension)
            .intersect(&sa[i].union(&sb[i]).complement());
        if let Some(members) = uncovered.members() {
            let left: Vec<&str> = members
                .iter()
                .filter(|m| !config.is_exempt(m))
                .map(String::as_str)
                .collect();
            if !left.is_empty() {
                gap_dims.push(*dimension);
                gap_parts.push(format!("{}: {}", dimension, left.join(", ")));
            }
        }
    }
    if gap_dims.is_empty() {
        return None;
    }
    Some(pair(
        OverlapKind::GapCandidate,
        gap_dims,
        format!(
            "'{}' and '{}' partially overlap; not covered by either: {}",
            a.name,
            b.name,
            gap_parts.join("; ")
        ),
    ))
}

fn contrast(a: &str, ra: &GrantRequirement, b: &str, rb: &GrantRequirement) -> String {
    match (ra.is_block(), rb.is_block()) {
        (true, false) => format!("'{}' blocks access that '{}' grants with {}", a, b, rb),
        (false, true) => format!("'{}' blocks access that '{}' grants with {}", b, a, ra),
        _ if ra.implies(rb) => format!("'{}' ({}) is stricter than '{}' ({})", a, ra, b, rb),
        _ => format!("'{}' ({}) is stricter than '{}' ({})", b, rb, a, ra),
    }
}

fn describe(dimensions: &[Dimension], shared: &[Scope]) -> String {
    if dimensions.is_empty() {
        return "the whole tenant".to_string();
    }
    dimensions
        .iter()
        .map(|d| {
            let idx = Dimension::ALL.iter().position(|x| x == d).unwrap_or(0);
            format!("{} {}", d, shared[idx])
        })
        .collect::<Vec<_>>()
        .join("; ")
}
