//! Typed Conditional Access policy as declared in the repository.
//!
//! Documents arrive as generic JSON values (YAML is converted by the loader)
//! and are checked against a strict schema: unknown fields are rejected at
//! every level so a typo never silently widens a policy.

use super::scope::Scope;
use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Reserved include/exclude token meaning "every identifier".
pub const ALL: &str = "All";

/// Grant control that denies access outright.
pub const BLOCK: &str = "block";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyState {
    Disabled,
    Enabled,
    EnabledForReportingButNotEnforced,
}

impl PolicyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyState::Disabled => "disabled",
            PolicyState::Enabled => "enabled",
            PolicyState::EnabledForReportingButNotEnforced => "enabledForReportingButNotEnforced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disabled" => Some(PolicyState::Disabled),
            "enabled" => Some(PolicyState::Enabled),
            "enabledForReportingButNotEnforced" => Some(PolicyState::EnabledForReportingButNotEnforced),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrantOperator {
    And,
    #[default]
    Or,
}

impl GrantOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantOperator::And => "AND",
            GrantOperator::Or => "OR",
        }
    }
}

/// Condition dimensions a policy scopes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Users,
    Applications,
    Locations,
    Platforms,
    ClientAppTypes,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Users,
        Dimension::Applications,
        Dimension::Locations,
        Dimension::Platforms,
        Dimension::ClientAppTypes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Users => "users",
            Dimension::Applications => "applications",
            Dimension::Locations => "locations",
            Dimension::Platforms => "platforms",
            Dimension::ClientAppTypes => "clientAppTypes",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sign-in and user risk levels reported by Identity Protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Hidden,
    None,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Hidden => "hidden",
            RiskLevel::None => "none",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One include or exclude list after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub all: bool,
    pub ids: BTreeSet<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        !self.all && self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Scope of this selection, with each identifier namespaced by `prefix`.
    pub fn to_scope(&self, prefix: &str) -> Scope {
        if self.all {
            Scope::universal()
        } else {
            Scope::finite(self.ids.iter().map(|id| format!("{}{}", prefix, id)))
        }
    }

    /// Canonical list form, `All` first.
    pub fn to_list(&self) -> Vec<String> {
        let mut list = Vec::with_capacity(self.ids.len() + 1);
        if self.all {
            list.push(ALL.to_string());
        }
        list.extend(self.ids.iter().cloned());
        list
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_list().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMetadata {
    pub owner: String,
    pub created_by: Option<String>,
    pub ticket_id: String,
    pub justification: String,
    pub expiration_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserConditions {
    pub include_users: Selection,
    pub exclude_users: Selection,
    pub include_groups: Selection,
    pub exclude_groups: Selection,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncludeExclude {
    pub include: Selection,
    pub exclude: Selection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditions {
    pub users: UserConditions,
    pub applications: IncludeExclude,
    pub locations: Option<IncludeExclude>,
    pub platforms: Option<IncludeExclude>,
    pub client_app_types: Selection,
    pub sign_in_risk_levels: BTreeSet<RiskLevel>,
    pub user_risk_levels: BTreeSet<RiskLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GrantControls {
    pub operator: GrantOperator,
    /// Declaration order, deduplicated.
    pub built_in_controls: Vec<String>,
    pub custom_authentication_factors: Vec<String>,
    pub terms_of_use: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrequencyUnit {
    Hours,
    Days,
}

impl FrequencyUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyUnit::Hours => "hours",
            FrequencyUnit::Days => "days",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignInFrequency {
    pub value: u32,
    pub unit: FrequencyUnit,
}

impl fmt::Display for SignInFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BrowserMode {
    Always,
    Never,
}

impl BrowserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserMode::Always => "always",
            BrowserMode::Never => "never",
        }
    }
}

/// Session controls; `None` means the control is not configured.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionControls {
    pub sign_in_frequency: Option<SignInFrequency>,
    pub persistent_browser: Option<BrowserMode>,
    /// Cloud app security type, when enabled.
    pub cloud_app_security: Option<String>,
}

impl SessionControls {
    pub fn is_empty(&self) -> bool {
        self.sign_in_frequency.is_none()
            && self.persistent_browser.is_none()
            && self.cloud_app_security.is_none()
    }

    pub fn has(&self, kind: SessionControlKind) -> bool {
        match kind {
            SessionControlKind::SignInFrequency => self.sign_in_frequency.is_some(),
            SessionControlKind::PersistentBrowser => self.persistent_browser.is_some(),
            SessionControlKind::CloudAppSecurity => self.cloud_app_security.is_some(),
        }
    }
}

/// Session control names as used in rule files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionControlKind {
    SignInFrequency,
    PersistentBrowser,
    CloudAppSecurity,
}

impl SessionControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionControlKind::SignInFrequency => "signInFrequency",
            SessionControlKind::PersistentBrowser => "persistentBrowser",
            SessionControlKind::CloudAppSecurity => "cloudAppSecurity",
        }
    }
}

/// What a policy demands when it matches. A single control is the same
/// requirement under either operator. Terms of use and custom factors are
/// folded in as `termsOfUse:<id>` and `customFactor:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequirement {
    pub operator: Option<GrantOperator>,
    pub controls: BTreeSet<String>,
}

impl GrantRequirement {
    pub fn is_block(&self) -> bool {
        self.controls.contains(BLOCK)
    }

    /// True when satisfying `self` always satisfies `other`.
    pub fn implies(&self, other: &GrantRequirement) -> bool {
        if self.is_block() {
            return true;
        }
        if other.is_block() {
            return false;
        }
        let op = |r: &GrantRequirement| r.operator.unwrap_or(GrantOperator::And);
        match (op(self), op(other)) {
            (GrantOperator::And, GrantOperator::And) => other.controls.is_subset(&self.controls),
            (GrantOperator::And, GrantOperator::Or) => !self.controls.is_disjoint(&other.controls),
            (GrantOperator::Or, GrantOperator::Or) => self.controls.is_subset(&other.controls),
            (GrantOperator::Or, GrantOperator::And) => {
                other.controls.len() == 1 && self.controls == other.controls
            }
        }
    }
}

impl fmt::Display for GrantRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let controls: Vec<&str> = self.controls.iter().map(String::as_str).collect();
        match self.operator {
            Some(op) => write!(f, "{}({})", op.as_str(), controls.join(", ")),
            None => write!(f, "{}", controls.join(", ")),
        }
    }
}

impl GrantControls {
    pub fn requirement(&self) -> GrantRequirement {
        let controls: BTreeSet<String> = self
            .built_in_controls
            .iter()
            .cloned()
            .chain(self.terms_of_use.iter().map(|t| format!("termsOfUse:{t}")))
            .chain(
                self.custom_authentication_factors
                    .iter()
                    .map(|f| format!("customFactor:{f}")),
            )
            .collect();
        let operator = if controls.len() > 1 {
            Some(self.operator)
        } else {
            None
        };
        GrantRequirement { operator, controls }
    }

    pub fn contains(&self, control: &str) -> bool {
        self.built_in_controls.iter().any(|c| c == control)
    }
}

/// A validated, normalized policy. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub display_name: Option<String>,
    pub state: PolicyState,
    pub metadata: PolicyMetadata,
    pub conditions: Conditions,
    pub grant_controls: GrantControls,
    pub session_controls: SessionControls,
    /// Where the document came from (file path or other label).
    pub source: String,
}

impl Policy {
    pub fn is_active(&self) -> bool {
        self.state != PolicyState::Disabled
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("")
    }

    pub fn includes_all_users(&self) -> bool {
        self.conditions.users.include_users.all
    }

    /// Effective scope of one dimension: include minus exclude.
    pub fn scope(&self, dimension: Dimension) -> Scope {
        let c = &self.conditions;
        match dimension {
            Dimension::Users => {
                let u = &c.users;
                let include = u
                    .include_users
                    .to_scope("user:")
                    .union(&u.include_groups.to_scope("group:"));
                let exclude = u
                    .exclude_users
                    .to_scope("user:")
                    .union(&u.exclude_groups.to_scope("group:"));
                include.difference(&exclude)
            }
            Dimension::Applications => required_scope(&c.applications),
            Dimension::Locations => optional_scope(c.locations.as_ref()),
            Dimension::Platforms => optional_scope(c.platforms.as_ref()),
            Dimension::ClientAppTypes => {
                if c.client_app_types.is_empty() {
                    Scope::universal()
                } else {
                    c.client_app_types.to_scope("")
                }
            }
        }
    }
}

fn required_scope(ie: &IncludeExclude) -> Scope {
    ie.include.to_scope("").difference(&ie.exclude.to_scope(""))
}

fn optional_scope(ie: Option<&IncludeExclude>) -> Scope {
    match ie {
        None => Scope::universal(),
        Some(ie) if ie.include.is_empty() => Scope::universal().difference(&ie.exclude.to_scope("")),
        Some(ie) => required_scope(ie),
    }
}

// ============================================================================
// Document schema
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicyDocument {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    state: PolicyState,
    metadata: MetadataDocument,
    conditions: ConditionsDocument,
    grant_controls: GrantControlsDocument,
    #[serde(default)]
    session_controls: Option<SessionControlsDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MetadataDocument {
    owner: String,
    #[serde(default)]
    created_by: Option<String>,
    ticket_id: String,
    justification: String,
    #[serde(default)]
    expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConditionsDocument {
    users: UsersDocument,
    applications: ApplicationsDocument,
    #[serde(default)]
    locations: Option<LocationsDocument>,
    #[serde(default)]
    platforms: Option<PlatformsDocument>,
    #[serde(default)]
    client_app_types: Vec<String>,
    #[serde(default)]
    sign_in_risk_levels: Vec<RiskLevel>,
    #[serde(default)]
    user_risk_levels: Vec<RiskLevel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UsersDocument {
    #[serde(default)]
    include_users: Vec<String>,
    #[serde(default)]
    exclude_users: Vec<String>,
    #[serde(default)]
    include_groups: Vec<String>,
    #[serde(default)]
    exclude_groups: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApplicationsDocument {
    #[serde(default)]
    include_applications: Vec<String>,
    #[serde(default)]
    exclude_applications: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LocationsDocument {
    #[serde(default)]
    include_locations: Vec<String>,
    #[serde(default)]
    exclude_locations: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlatformsDocument {
    #[serde(default)]
    include_platforms: Vec<String>,
    #[serde(default)]
    exclude_platforms: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GrantControlsDocument {
    #[serde(default)]
    operator: Option<GrantOperator>,
    #[serde(default)]
    built_in_controls: Vec<String>,
    #[serde(default)]
    custom_authentication_factors: Vec<String>,
    #[serde(default)]
    terms_of_use: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SessionControlsDocument {
    #[serde(default)]
    sign_in_frequency: Option<SignInFrequencyDocument>,
    #[serde(default)]
    persistent_browser: Option<PersistentBrowserDocument>,
    #[serde(default)]
    cloud_app_security: Option<CloudAppSecurityDocument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SignInFrequencyDocument {
    #[serde(default)]
    value: Option<u32>,
    #[serde(default, rename = "type")]
    unit: Option<FrequencyUnit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PersistentBrowserDocument {
    #[serde(default)]
    mode: Option<BrowserMode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CloudAppSecurityDocument {
    #[serde(default)]
    is_enabled: bool,
    #[serde(default)]
    cloud_app_security_type: Option<String>,
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Clone, Copy)]
enum Case {
    Lower,
    Keep,
}

#[derive(Clone, Copy)]
enum Sentinel {
    /// Exact `All`.
    Exact,
    /// `all` in any case (platforms, client app types).
    AnyCase,
}

fn normalize(values: &[String], case: Case, sentinel: Sentinel) -> Selection {
    let mut selection = Selection::default();
    for raw in values {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        let is_all = match sentinel {
            Sentinel::Exact => value == ALL,
            Sentinel::AnyCase => value.eq_ignore_ascii_case(ALL),
        };
        if is_all {
            selection.all = true;
            continue;
        }
        let id = match case {
            Case::Lower => value.to_lowercase(),
            Case::Keep => value.to_string(),
        };
        selection.ids.insert(id);
    }
    selection
}

fn check_disjoint(dimension: &str, include: &Selection, exclude: &Selection) -> Result<(), ParseError> {
    if include.all && exclude.all {
        return Err(ParseError::IncludeExcludeOverlap {
            dimension: dimension.to_string(),
            identifier: ALL.to_string(),
        });
    }
    if let Some(id) = include.ids.intersection(&exclude.ids).next() {
        return Err(ParseError::IncludeExcludeOverlap {
            dimension: dimension.to_string(),
            identifier: id.clone(),
        });
    }
    Ok(())
}

fn required_text(field: &str, value: String) -> Result<String, ParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyField(field.to_string()));
    }
    Ok(trimmed.to_string())
}

fn pair(
    dimension: &str,
    include: &[String],
    exclude: &[String],
    case: Case,
    sentinel: Sentinel,
) -> Result<IncludeExclude, ParseError> {
    let ie = IncludeExclude {
        include: normalize(include, case, sentinel),
        exclude: normalize(exclude, case, sentinel),
    };
    check_disjoint(dimension, &ie.include, &ie.exclude)?;
    Ok(ie)
}

/// Trimmed, non-empty, first occurrence wins.
fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim().to_string();
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn session_controls(doc: Option<SessionControlsDocument>) -> Result<SessionControls, ParseError> {
    let doc = doc.unwrap_or_default();

    let sign_in_frequency = match doc.sign_in_frequency.unwrap_or_default() {
        SignInFrequencyDocument {
            value: None,
            unit: None,
        } => None,
        SignInFrequencyDocument {
            value: Some(0), ..
        } => {
            return Err(ParseError::EmptyField(
                "sessionControls.signInFrequency.value".into(),
            ));
        }
        SignInFrequencyDocument {
            value: Some(value),
            unit: Some(unit),
        } => Some(SignInFrequency { value, unit }),
        SignInFrequencyDocument { value: None, .. } => {
            return Err(ParseError::MissingField(
                "sessionControls.signInFrequency.value".into(),
            ));
        }
        SignInFrequencyDocument { unit: None, .. } => {
            return Err(ParseError::MissingField(
                "sessionControls.signInFrequency.type".into(),
            ));
        }
    };

    let cloud_app_security = match doc.cloud_app_security {
        Some(cas) if cas.is_enabled => {
            let kind = cas
                .cloud_app_security_type
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    ParseError::MissingField(
                        "sessionControls.cloudAppSecurity.cloudAppSecurityType".into(),
                    )
                })?;
            Some(kind)
        }
        _ => None,
    };

    Ok(SessionControls {
        sign_in_frequency,
        persistent_browser: doc.persistent_browser.and_then(|p| p.mode),
        cloud_app_security,
    })
}

/// Best-effort policy name for attributing a parse failure.
pub fn document_name(document: &Value) -> Option<String> {
    document
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parse one declared policy document.
pub fn parse(document: &Value, source: &str) -> Result<Policy, ParseError> {
    let doc: PolicyDocument =
        serde_json::from_value(document.clone()).map_err(|e| ParseError::Schema(e.to_string()))?;

    let metadata = PolicyMetadata {
        owner: required_text("metadata.owner", doc.metadata.owner)?,
        created_by: doc.metadata.created_by,
        ticket_id: required_text("metadata.ticketId", doc.metadata.ticket_id)?,
        justification: required_text("metadata.justification", doc.metadata.justification)?,
        expiration_date: doc.metadata.expiration_date,
    };

    let u = doc.conditions.users;
    let users_pair = pair(
        "users",
        &u.include_users,
        &u.exclude_users,
        Case::Lower,
        Sentinel::Exact,
    )?;
    let groups_pair = pair(
        "groups",
        &u.include_groups,
        &u.exclude_groups,
        Case::Lower,
        Sentinel::Exact,
    )?;
    let users = UserConditions {
        include_users: users_pair.include,
        exclude_users: users_pair.exclude,
        include_groups: groups_pair.include,
        exclude_groups: groups_pair.exclude,
    };

    let a = doc.conditions.applications;
    let applications = pair(
        "applications",
        &a.include_applications,
        &a.exclude_applications,
        Case::Keep,
        Sentinel::Exact,
    )?;

    let locations = doc
        .conditions
        .locations
        .map(|l| {
            pair(
                "locations",
                &l.include_locations,
                &l.exclude_locations,
                Case::Keep,
                Sentinel::Exact,
            )
        })
        .transpose()?;

    let platforms = doc
        .conditions
        .platforms
        .map(|p| {
            pair(
                "platforms",
                &p.include_platforms,
                &p.exclude_platforms,
                Case::Keep,
                Sentinel::AnyCase,
            )
        })
        .transpose()?;

    let client_app_types = normalize(
        &doc.conditions.client_app_types,
        Case::Keep,
        Sentinel::AnyCase,
    );

    let built_in_controls = dedup(doc.grant_controls.built_in_controls);
    let custom_authentication_factors = dedup(doc.grant_controls.custom_authentication_factors);
    let terms_of_use = dedup(doc.grant_controls.terms_of_use);
    if built_in_controls.is_empty() {
        return Err(ParseError::EmptyField("grantControls.builtInControls".into()));
    }
    let extra = custom_authentication_factors.len() + terms_of_use.len();
    if built_in_controls.iter().any(|c| c == BLOCK) && (built_in_controls.len() > 1 || extra > 0) {
        let mut all = built_in_controls;
        all.extend(custom_authentication_factors);
        all.extend(terms_of_use);
        return Err(ParseError::BlockNotExclusive(all));
    }

    let session_controls = session_controls(doc.session_controls)?;

    let display_name = doc
        .display_name
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    Ok(Policy {
        name: doc.name,
        display_name,
        state: doc.state,
        metadata,
        conditions: Conditions {
            users,
            applications,
            locations,
            platforms,
            client_app_types,
            sign_in_risk_levels: doc.conditions.sign_in_risk_levels.into_iter().collect(),
            user_risk_levels: doc.conditions.user_risk_levels.into_iter().collect(),
        },
        grant_controls: GrantControls {
            operator: doc.grant_controls.operator.unwrap_or(GrantOperator::Or),
            built_in_controls,
            custom_authentication_factors,
            terms_of_use,
        },
        session_controls,
        source: source.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{Value, json};

    /// Minimal valid document, used as a base by tests across the core.
    pub fn document(name: &str) -> Value {
        json!({
            "name": name,
            "displayName": format!("{} display", name),
            "state": "enabled",
            "metadata": {
                "owner": "identity-team",
                "ticketId": "SEC-1",
                "justification": "baseline"
            },
            "conditions": {
                "users": {
                    "includeUsers": ["All"],
                    "excludeGroups": ["sg-breakglass"]
                },
                "applications": { "includeApplications": ["All"] }
            },
            "grantControls": { "operator": "OR", "builtInControls": ["mfa"] }
        })
    }

    pub fn policy(doc: &Value) -> super::Policy {
        super::parse(doc, "test.yaml").expect("fixture parses")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{document, policy};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_normalizes_identifiers() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["conditions"]["users"] = json!({
            "includeGroups": ["SG-Finance", " sg-hr "],
            "excludeUsers": ["Alice@Contoso.com"]
        });
        let p = policy(&doc);
        let users = &p.conditions.users;
        assert!(users.include_groups.contains("sg-finance"));
        assert!(users.include_groups.contains("sg-hr"));
        assert!(users.exclude_users.contains("alice@contoso.com"));
        assert!(!users.include_users.all);
    }

    #[test]
    fn test_all_is_sentinel_not_identifier() {
        let p = policy(&document("en-prd-ca-allusers-mfa-001"));
        assert!(p.includes_all_users());
        assert!(p.conditions.users.include_users.ids.is_empty());
        assert_eq!(p.conditions.users.include_users.to_list(), vec!["All"]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["conditions"]["users"]["includeRoles"] = json!(["admin"]);
        let err = parse(&doc, "x").unwrap_err();
        assert!(matches!(err, ParseError::Schema(msg) if msg.contains("includeRoles")));
    }

    #[test]
    fn test_missing_metadata_rejected() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc.as_object_mut().unwrap().remove("metadata");
        assert!(matches!(parse(&doc, "x"), Err(ParseError::Schema(_))));

        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["metadata"]["owner"] = json!("  ");
        assert_eq!(
            parse(&doc, "x").unwrap_err(),
            ParseError::EmptyField("metadata.owner".into())
        );
    }

    #[test]
    fn test_invalid_state_rejected() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["state"] = json!("on");
        assert!(matches!(parse(&doc, "x"), Err(ParseError::Schema(_))));
    }

    #[test]
    fn test_block_must_be_exclusive() {
        let mut doc = document("en-prd-ca-allusers-block-001");
        doc["grantControls"]["builtInControls"] = json!(["block", "mfa"]);
        assert!(matches!(parse(&doc, "x"), Err(ParseError::BlockNotExclusive(_))));
    }

    #[test]
    fn test_empty_controls_rejected() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["grantControls"]["builtInControls"] = json!([]);
        assert_eq!(
            parse(&doc, "x").unwrap_err(),
            ParseError::EmptyField("grantControls.builtInControls".into())
        );
    }

    #[test]
    fn test_include_exclude_overlap_after_normalization() {
        let mut doc = document("en-prd-ca-finance-mfa-001");
        doc["conditions"]["users"] = json!({
            "includeGroups": ["SG-Finance"],
            "excludeGroups": ["sg-finance"]
        });
        assert_eq!(
            parse(&doc, "x").unwrap_err(),
            ParseError::IncludeExcludeOverlap {
                dimension: "groups".into(),
                identifier: "sg-finance".into()
            }
        );
    }

    #[test]
    fn test_operator_defaults_to_or() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["grantControls"] = json!({ "builtInControls": ["mfa", "mfa"] });
        let p = policy(&doc);
        assert_eq!(p.grant_controls.operator, GrantOperator::Or);
        assert_eq!(p.grant_controls.built_in_controls, vec!["mfa"]);
    }

    #[test]
    fn test_effective_user_scope() {
        let p = policy(&document("en-prd-ca-allusers-mfa-001"));
        assert_eq!(p.scope(Dimension::Users), Scope::all_except(["group:sg-breakglass"]));
        assert!(p.scope(Dimension::Locations).is_universal());
        assert!(p.scope(Dimension::ClientAppTypes).is_universal());
    }

    #[test]
    fn test_locations_with_only_exclusions() {
        let mut doc = document("en-prd-ca-allusers-block-001");
        doc["conditions"]["locations"] = json!({ "excludeLocations": ["TrustedOffices"] });
        let p = policy(&doc);
        assert_eq!(p.scope(Dimension::Locations), Scope::all_except(["TrustedOffices"]));
    }

    #[test]
    fn test_requirement_normalization() {
        let single_and = GrantControls {
            operator: GrantOperator::And,
            built_in_controls: vec!["mfa".into()],
            ..Default::default()
        };
        let single_or = GrantControls {
            operator: GrantOperator::Or,
            built_in_controls: vec!["mfa".into()],
            ..Default::default()
        };
        assert_eq!(single_and.requirement(), single_or.requirement());

        let pair_and = GrantControls {
            operator: GrantOperator::And,
            built_in_controls: vec!["mfa".into(), "compliantDevice".into()],
            ..Default::default()
        };
        assert!(pair_and.requirement().implies(&single_or.requirement()));
        assert!(!single_or.requirement().implies(&pair_and.requirement()));
    }

    #[test]
    fn test_session_controls_and_risk_levels() {
        let mut doc = document("en-prd-ca-riskyusers-mfa-001");
        doc["conditions"]["userRiskLevels"] = json!(["high"]);
        doc["conditions"]["signInRiskLevels"] = json!(["medium", "high", "medium"]);
        doc["sessionControls"] = json!({
            "signInFrequency": { "value": 4, "type": "hours" },
            "persistentBrowser": { "mode": "never" },
            "cloudAppSecurity": { "isEnabled": false }
        });
        let p = policy(&doc);
        assert_eq!(p.conditions.user_risk_levels, BTreeSet::from([RiskLevel::High]));
        assert_eq!(p.conditions.sign_in_risk_levels.len(), 2);
        assert_eq!(
            p.session_controls.sign_in_frequency.map(|f| f.to_string()).as_deref(),
            Some("4 hours")
        );
        assert!(p.session_controls.has(SessionControlKind::PersistentBrowser));
        assert!(!p.session_controls.has(SessionControlKind::CloudAppSecurity));

        doc["conditions"]["userRiskLevels"] = json!(["extreme"]);
        assert!(matches!(parse(&doc, "x"), Err(ParseError::Schema(_))));
    }

    #[test]
    fn test_incomplete_session_controls_rejected() {
        let mut doc = document("en-prd-ca-allusers-mfa-001");
        doc["sessionControls"] = json!({ "signInFrequency": { "value": 8 } });
        assert_eq!(
            parse(&doc, "x").unwrap_err(),
            ParseError::MissingField("sessionControls.signInFrequency.type".into())
        );

        doc["sessionControls"] = json!({ "cloudAppSecurity": { "isEnabled": true } });
        assert_eq!(
            parse(&doc, "x").unwrap_err(),
            ParseError::MissingField("sessionControls.cloudAppSecurity.cloudAppSecurityType".into())
        );

        doc["sessionControls"] = json!({ "signInFrequency": {} });
        assert!(policy(&doc).session_controls.is_empty());
    }

    #[test]
    fn test_terms_of_use_join_the_requirement() {
        let mut doc = document("en-prd-ca-guests-mfa-001");
        doc["grantControls"] = json!({
            "operator": "AND",
            "builtInControls": ["mfa"],
            "termsOfUse": ["tou-guests"],
            "customAuthenticationFactors": []
        });
        let p = policy(&doc);
        let requirement = p.grant_controls.requirement();
        assert_eq!(requirement.operator, Some(GrantOperator::And));
        assert!(requirement.controls.contains("termsOfUse:tou-guests"));

        doc["grantControls"]["builtInControls"] = json!(["block"]);
        assert!(matches!(parse(&doc, "x"), Err(ParseError::BlockNotExclusive(_))));
    }
}
