//! Local-versus-remote diffing and plan application.
//!
//! Planning is pure. Applying a plan talks to a [`DirectoryClient`]; each
//! item succeeds or fails on its own, and only an authentication failure
//! stops the items that have not started yet. Nothing is ever deleted.

use super::model::{ALL, GrantOperator, Policy, PolicyState, Selection};
use super::report::{Severity, ValidationIssue};
use crate::error::RemoteFailure;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub const REMOTE_ONLY_POLICY: &str = "REMOTE_ONLY_POLICY";

/// The fields compared between a local policy and its remote counterpart,
/// in a normalized form both sides can be reduced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyShape {
    pub display_name: String,
    pub state: PolicyState,
    pub include_users: BTreeSet<String>,
    pub exclude_users: BTreeSet<String>,
    pub include_groups: BTreeSet<String>,
    pub exclude_groups: BTreeSet<String>,
    pub include_applications: BTreeSet<String>,
    pub exclude_applications: BTreeSet<String>,
    pub include_locations: BTreeSet<String>,
    pub exclude_locations: BTreeSet<String>,
    pub include_platforms: BTreeSet<String>,
    pub exclude_platforms: BTreeSet<String>,
    pub client_app_types: BTreeSet<String>,
    pub sign_in_risk_levels: BTreeSet<String>,
    pub user_risk_levels: BTreeSet<String>,
    /// Only meaningful with more than one grant control.
    pub operator: Option<GrantOperator>,
    pub built_in_controls: BTreeSet<String>,
    pub custom_authentication_factors: BTreeSet<String>,
    pub terms_of_use: BTreeSet<String>,
    /// `<value> <hours|days>`
    pub sign_in_frequency: Option<String>,
    pub persistent_browser: Option<String>,
    pub cloud_app_security: Option<String>,
}

/// User and group identifiers: lowercased, `All` preserved.
pub fn normalize_principals<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| if v == ALL { ALL.to_string() } else { v.to_lowercase() })
        .collect()
}

/// Identifiers that keep their case.
pub fn normalize_kept<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Platforms and client app types, where `all` is case-insensitive.
pub fn normalize_any_case<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| if v.eq_ignore_ascii_case(ALL) { "all".to_string() } else { v.to_string() })
        .collect()
}

/// An empty client app type list means every type.
pub fn normalize_client_app_types<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    let set = normalize_any_case(values);
    if set.is_empty() || set.contains("all") {
        BTreeSet::from(["all".to_string()])
    } else {
        set
    }
}

/// Risk levels compare lowercased.
pub fn normalize_risk_levels<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `grant_controls` counts every built-in control, terms of use and custom factor.
pub fn normalize_operator(operator: GrantOperator, grant_controls: usize) -> Option<GrantOperator> {
    (grant_controls > 1).then_some(operator)
}

fn selection_items(selection: &Selection) -> impl Iterator<Item = &str> {
    selection
        .all
        .then_some(ALL)
        .into_iter()
        .chain(selection.ids.iter().map(String::as_str))
}

/// A declared block with only exclusions is deployed with an `All` include.
fn implicit_all(declared: bool, include: BTreeSet<String>, token: &str) -> BTreeSet<String> {
    if declared && include.is_empty() {
        BTreeSet::from([token.to_string()])
    } else {
        include
    }
}

/// The displayName a local policy is deployed and matched under.
pub fn deployed_name(policy: &Policy) -> &str {
    policy.display_name.as_deref().unwrap_or(&policy.name)
}

impl PolicyShape {
    pub fn from_policy(policy: &Policy) -> Self {
        let c = &policy.conditions;
        let empty = Selection::default();
        let (inc_loc, exc_loc) = c
            .locations
            .as_ref()
            .map_or((&empty, &empty), |l| (&l.include, &l.exclude));
        let (inc_plat, exc_plat) = c
            .platforms
            .as_ref()
            .map_or((&empty, &empty), |p| (&p.include, &p.exclude));
        let g = &policy.grant_controls;
        let controls = normalize_kept(g.built_in_controls.iter().map(String::as_str));
        let factors = normalize_kept(g.custom_authentication_factors.iter().map(String::as_str));
        let terms = normalize_kept(g.terms_of_use.iter().map(String::as_str));
        let session = &policy.session_controls;

        Self {
            display_name: deployed_name(policy).to_string(),
            state: policy.state,
            include_users: normalize_principals(selection_items(&c.users.include_users)),
            exclude_users: normalize_principals(selection_items(&c.users.exclude_users)),
            include_groups: normalize_principals(selection_items(&c.users.include_groups)),
            exclude_groups: normalize_principals(selection_items(&c.users.exclude_groups)),
            include_applications: normalize_kept(selection_items(&c.applications.include)),
            exclude_applications: normalize_kept(selection_items(&c.applications.exclude)),
            include_locations: implicit_all(
                c.locations.is_some(),
                normalize_kept(selection_items(inc_loc)),
                ALL,
            ),
            exclude_locations: normalize_kept(selection_items(exc_loc)),
            include_platforms: implicit_all(
                c.platforms.is_some(),
                normalize_any_case(selection_items(inc_plat)),
                "all",
            ),
            exclude_platforms: normalize_any_case(selection_items(exc_plat)),
            client_app_types: normalize_client_app_types(selection_items(&c.client_app_types)),
            sign_in_risk_levels: normalize_risk_levels(c.sign_in_risk_levels.iter().map(|r| r.as_str())),
            user_risk_levels: normalize_risk_levels(c.user_risk_levels.iter().map(|r| r.as_str())),
            operator: normalize_operator(g.operator, controls.len() + factors.len() + terms.len()),
            built_in_controls: controls,
            custom_authentication_factors: factors,
            terms_of_use: terms,
            sign_in_frequency: session.sign_in_frequency.map(|f| f.to_string()),
            persistent_browser: session.persistent_browser.map(|m| m.as_str().to_string()),
            cloud_app_security: session.cloud_app_security.clone(),
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let set = |s: &BTreeSet<String>| format!("[{}]", s.iter().cloned().collect::<Vec<_>>().join(", "));
        let opt = |o: &Option<String>| o.clone().unwrap_or_else(|| "-".to_string());
        vec![
            ("displayName", self.display_name.clone()),
            ("state", self.state.to_string()),
            ("includeUsers", set(&self.include_users)),
            ("excludeUsers", set(&self.exclude_users)),
            ("includeGroups", set(&self.include_groups)),
            ("excludeGroups", set(&self.exclude_groups)),
            ("includeApplications", set(&self.include_applications)),
            ("excludeApplications", set(&self.exclude_applications)),
            ("includeLocations", set(&self.include_locations)),
            ("excludeLocations", set(&self.exclude_locations)),
            ("includePlatforms", set(&self.include_platforms)),
            ("excludePlatforms", set(&self.exclude_platforms)),
            ("clientAppTypes", set(&self.client_app_types)),
            ("signInRiskLevels", set(&self.sign_in_risk_levels)),
            ("userRiskLevels", set(&self.user_risk_levels)),
            (
                "operator",
                self.operator.map_or_else(|| "-".to_string(), |o| o.as_str().to_string()),
            ),
            ("builtInControls", set(&self.built_in_controls)),
            ("customAuthenticationFactors", set(&self.custom_authentication_factors)),
            ("termsOfUse", set(&self.terms_of_use)),
            ("signInFrequency", opt(&self.sign_in_frequency)),
            ("persistentBrowser", opt(&self.persistent_browser)),
            ("cloudAppSecurity", opt(&self.cloud_app_security)),
        ]
    }
}

/// A policy as it currently exists in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePolicy {
    pub id: String,
    pub shape: PolicyShape,
}

impl RemotePolicy {
    pub fn display_name(&self) -> &str {
        &self.shape.display_name
    }

    /// Remote counterpart that matches `policy` exactly.
    pub fn mirror(id: impl Into<String>, policy: &Policy) -> Self {
        Self {
            id: id.into(),
            shape: PolicyShape::from_policy(policy),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanAction::Create => "Create",
            PlanAction::Update => "Update",
            PlanAction::NoOp => "NoOp",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: String,
    pub remote: String,
    pub local: String,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} → {}", self.field, self.remote, self.local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub action: PlanAction,
    pub policy_name: String,
    pub display_name: String,
    pub remote_id: Option<String>,
    pub diff: Vec<FieldDiff>,
}

impl PlanItem {
    pub fn summary(&self) -> String {
        match self.action {
            PlanAction::Create => "new policy".to_string(),
            PlanAction::NoOp => "up to date".to_string(),
            PlanAction::Update => self
                .diff
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPlan {
    pub items: Vec<PlanItem>,
    /// Advisory notes, such as remote-only policies.
    pub notes: Vec<ValidationIssue>,
}

impl ReconciliationPlan {
    pub fn count(&self, action: PlanAction) -> usize {
        self.items.iter().filter(|i| i.action == action).count()
    }

    pub fn has_changes(&self) -> bool {
        self.items.iter().any(|i| i.action != PlanAction::NoOp)
    }
}

fn diff(remote: &PolicyShape, local: &PolicyShape) -> Vec<FieldDiff> {
    remote
        .fields()
        .into_iter()
        .zip(local.fields())
        .filter(|((_, r), (_, l))| r != l)
        .map(|((field, r), (_, l))| FieldDiff {
            field: field.to_string(),
            remote: r,
            local: l,
        })
        .collect()
}

/// Build the plan for `local` against a remote snapshot. Items follow
/// `local` order; remote-only policies become INFO notes.
pub fn plan(local: &[Policy], remote: &[RemotePolicy]) -> ReconciliationPlan {
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (idx, r) in remote.iter().enumerate() {
        by_name.entry(r.display_name().to_lowercase()).or_insert(idx);
    }

    let mut matched = HashSet::new();
    let mut items = Vec::with_capacity(local.len());

    for policy in local {
        let shape = PolicyShape::from_policy(policy);
        let key = shape.display_name.to_lowercase();
        let item = match by_name.get(&key) {
            None => PlanItem {
                action: PlanAction::Create,
                policy_name: policy.name.clone(),
                display_name: shape.display_name.clone(),
                remote_id: None,
                diff: Vec::new(),
            },
            Some(&idx) => {
                matched.insert(idx);
                let existing = &remote[idx];
                let changes = diff(&existing.shape, &shape);
                PlanItem {
                    action: if changes.is_empty() {
                        PlanAction::NoOp
                    } else {
                        PlanAction::Update
                    },
                    policy_name: policy.name.clone(),
                    display_name: shape.display_name.clone(),
                    remote_id: Some(existing.id.clone()),
                    diff: changes,
                }
            }
        };
        tracing::debug!(policy = %item.policy_name, action = %item.action, "planned");
        items.push(item);
    }

    let notes = remote
        .iter()
        .enumerate()
        .filter(|(idx, _)| !matched.contains(idx))
        .map(|(_, r)| {
            ValidationIssue::new(
                Severity::Info,
                REMOTE_ONLY_POLICY,
                r.display_name(),
                format!(
                    "Remote policy '{}' ({}) has no local definition; it is left untouched",
                    r.display_name(),
                    r.id
                ),
            )
        })
        .collect();

    ReconciliationPlan { items, notes }
}

/// Write side of the remote directory. Implementations own retries and
/// timeouts; each call returns a terminal result.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list(&self) -> Result<Vec<RemotePolicy>, RemoteFailure>;

    /// Create the policy and return its new remote id.
    async fn create(&self, policy: &Policy) -> Result<String, RemoteFailure>;

    async fn update(&self, id: &str, policy: &Policy) -> Result<(), RemoteFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ApplyOutcome {
    #[serde(rename_all = "camelCase")]
    Applied { remote_id: String },
    Failed { reason: RemoteFailureView },
    Skipped,
    Unchanged,
}

/// Serializable view of a [`RemoteFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFailureView {
    pub class: &'static str,
    pub detail: String,
}

impl From<&RemoteFailure> for RemoteFailureView {
    fn from(failure: &RemoteFailure) -> Self {
        let (class, detail) = match failure {
            RemoteFailure::Auth(d) => ("auth", d),
            RemoteFailure::RateLimited(d) => ("rateLimited", d),
            RemoteFailure::Rejected(d) => ("rejected", d),
            RemoteFailure::Transient(d) => ("transient", d),
        };
        Self {
            class,
            detail: detail.clone(),
        }
    }
}

impl ApplyOutcome {
    fn failed(failure: &RemoteFailure) -> Self {
        ApplyOutcome::Failed {
            reason: failure.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ApplyOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub policy_name: String,
    pub action: PlanAction,
    pub outcome: ApplyOutcome,
}

/// Execute the Create/Update items of `plan` with at most `concurrency`
/// calls in flight. Results are returned in plan order.
pub async fn apply(
    plan: &ReconciliationPlan,
    policies: &[Policy],
    client: &dyn DirectoryClient,
    concurrency: usize,
) -> Vec<ApplyResult> {
    let by_name: HashMap<&str, &Policy> = policies.iter().map(|p| (p.name.as_str(), p)).collect();
    let abort = AtomicBool::new(false);

    let calls = plan.items.iter().enumerate().map(|(idx, item)| {
        let abort = &abort;
        let policy = by_name.get(item.policy_name.as_str()).copied();
        async move {
            let outcome = run_item(item, policy, client, abort).await;
            (
                idx,
                ApplyResult {
                    policy_name: item.policy_name.clone(),
                    action: item.action,
                    outcome,
                },
            )
        }
    });

    let mut results: Vec<(usize, ApplyResult)> = stream::iter(calls)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}

async fn run_item(
    item: &PlanItem,
    policy: Option<&Policy>,
    client: &dyn DirectoryClient,
    abort: &AtomicBool,
) -> ApplyOutcome {
    if item.action == PlanAction::NoOp {
        return ApplyOutcome::Unchanged;
    }
    if abort.load(Ordering::SeqCst) {
        return ApplyOutcome::Skipped;
    }
    let Some(policy) = policy else {
        return ApplyOutcome::failed(&RemoteFailure::Rejected(format!(
            "'{}' is not in the local policy set",
            item.policy_name
        )));
    };

    let result = match (item.action, item.remote_id.as_deref()) {
        (PlanAction::Update, Some(id)) => client.update(id, policy).await.map(|()| id.to_string()),
        _ => client.create(policy).await,
    };

    match result {
        Ok(remote_id) => {
            tracing::info!(policy = %item.policy_name, %remote_id, action = %item.action, "applied");
            ApplyOutcome::Applied { remote_id }
        }
        Err(failure) => {
            if failure.is_fatal() {
                tracing::error!(policy = %item.policy_name, error = %failure, "authentication failure, skipping remaining items");
                abort.store(true, Ordering::SeqCst);
            } else {
                tracing::warn!(policy = %item.policy_name, error = %failure, "apply failed");
            }
            ApplyOutcome::failed(&failure)
        }
    }
}
