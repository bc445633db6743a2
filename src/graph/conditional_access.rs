//! Conditional Access policies on Microsoft Graph.

use crate::error::RemoteFailure;
use crate::graph::{GraphClient, GraphResult};
use crate::policy::model::{
    ALL, GrantOperator, Policy, PolicyState, RiskLevel, Selection, SessionControls,
};
use crate::policy::reconcile::{
    DirectoryClient, PolicyShape, RemotePolicy, normalize_any_case, normalize_client_app_types,
    normalize_kept, normalize_operator, normalize_principals, normalize_risk_levels,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

pub const POLICIES_ENDPOINT: &str = "identity/conditionalAccess/policies";

/// Conditional Access Policy structure for typed responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalAccessPolicy {
    pub id: String,
    pub display_name: String,
    pub state: String,
    #[serde(default)]
    pub created_date_time: Option<String>,
    #[serde(default)]
    pub modified_date_time: Option<String>,
    #[serde(default)]
    pub conditions: Option<PolicyConditions>,
    #[serde(default)]
    pub grant_controls: Option<GrantControls>,
    #[serde(default)]
    pub session_controls: Option<SessionControlsBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConditions {
    #[serde(default)]
    pub users: Option<UserCondition>,
    #[serde(default)]
    pub applications: Option<ApplicationCondition>,
    #[serde(default)]
    pub locations: Option<LocationCondition>,
    #[serde(default)]
    pub platforms: Option<PlatformCondition>,
    #[serde(default)]
    pub client_app_types: Option<Vec<String>>,
    #[serde(default)]
    pub sign_in_risk_levels: Option<Vec<String>>,
    #[serde(default)]
    pub user_risk_levels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCondition {
    #[serde(default)]
    pub include_users: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_users: Option<Vec<String>>,
    #[serde(default)]
    pub include_groups: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCondition {
    #[serde(default)]
    pub include_applications: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_applications: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCondition {
    #[serde(default)]
    pub include_locations: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_locations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCondition {
    #[serde(default)]
    pub include_platforms: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_platforms: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantControls {
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub built_in_controls: Option<Vec<String>>,
    #[serde(default)]
    pub custom_authentication_factors: Option<Vec<String>>,
    #[serde(default)]
    pub terms_of_use: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionControlsBody {
    #[serde(default)]
    pub sign_in_frequency: Option<SignInFrequencyBody>,
    #[serde(default)]
    pub persistent_browser: Option<PersistentBrowserBody>,
    #[serde(default)]
    pub cloud_app_security: Option<CloudAppSecurityBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInFrequencyBody {
    #[serde(default)]
    pub value: Option<u32>,
    #[serde(default, rename = "type")]
    pub unit: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentBrowserBody {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudAppSecurityBody {
    #[serde(default)]
    pub cloud_app_security_type: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

impl SessionControlsBody {
    /// `<value> <unit>` when enabled and complete.
    fn sign_in_frequency(&self) -> Option<String> {
        let f = self.sign_in_frequency.as_ref()?;
        if f.is_enabled == Some(false) {
            return None;
        }
        Some(format!("{} {}", f.value?, f.unit.as_deref()?.to_lowercase()))
    }

    fn persistent_browser(&self) -> Option<String> {
        let p = self.persistent_browser.as_ref()?;
        if p.is_enabled == Some(false) {
            return None;
        }
        p.mode.as_ref().map(|m| m.to_lowercase())
    }

    fn cloud_app_security(&self) -> Option<String> {
        let c = self.cloud_app_security.as_ref()?;
        if c.is_enabled != Some(true) {
            return None;
        }
        Some(c.cloud_app_security_type.clone().unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

fn items(list: &Option<Vec<String>>) -> impl Iterator<Item = &str> {
    list.iter().flatten().map(String::as_str)
}

impl ConditionalAccessPolicy {
    pub fn policy_state(&self) -> Option<PolicyState> {
        PolicyState::parse(&self.state)
    }

    /// Reduce to the fields the reconciler compares.
    pub fn to_remote(&self) -> RemotePolicy {
        let conditions = self.conditions.clone().unwrap_or_default();
        let users = conditions.users.unwrap_or_default();
        let apps = conditions.applications.unwrap_or_default();
        let locations = conditions.locations.unwrap_or_default();
        let platforms = conditions.platforms.unwrap_or_default();
        let grant = self.grant_controls.clone().unwrap_or_default();

        let state = self.policy_state().unwrap_or_else(|| {
            tracing::warn!(policy = %self.display_name, state = %self.state, "unknown remote state");
            PolicyState::Disabled
        });
        let operator = match grant.operator.as_deref() {
            Some(op) if op.eq_ignore_ascii_case("AND") => GrantOperator::And,
            _ => GrantOperator::Or,
        };
        let controls = normalize_kept(items(&grant.built_in_controls));
        let factors = normalize_kept(items(&grant.custom_authentication_factors));
        let terms = normalize_kept(items(&grant.terms_of_use));
        let session = self.session_controls.clone().unwrap_or_default();

        RemotePolicy {
            id: self.id.clone(),
            shape: PolicyShape {
                display_name: self.display_name.trim().to_string(),
                state,
                include_users: normalize_principals(items(&users.include_users)),
                exclude_users: normalize_principals(items(&users.exclude_users)),
                include_groups: normalize_principals(items(&users.include_groups)),
                exclude_groups: normalize_principals(items(&users.exclude_groups)),
                include_applications: normalize_kept(items(&apps.include_applications)),
                exclude_applications: normalize_kept(items(&apps.exclude_applications)),
                include_locations: normalize_kept(items(&locations.include_locations)),
                exclude_locations: normalize_kept(items(&locations.exclude_locations)),
                include_platforms: normalize_any_case(items(&platforms.include_platforms)),
                exclude_platforms: normalize_any_case(items(&platforms.exclude_platforms)),
                client_app_types: normalize_client_app_types(items(&conditions.client_app_types)),
                sign_in_risk_levels: normalize_risk_levels(items(&conditions.sign_in_risk_levels)),
                user_risk_levels: normalize_risk_levels(items(&conditions.user_risk_levels)),
                operator: normalize_operator(operator, controls.len() + factors.len() + terms.len()),
                built_in_controls: controls,
                custom_authentication_factors: factors,
                terms_of_use: terms,
                sign_in_frequency: session.sign_in_frequency(),
                persistent_browser: session.persistent_browser(),
                cloud_app_security: session.cloud_app_security(),
            },
        }
    }
}

fn any_case_list(selection: &Selection) -> Vec<String> {
    let mut list = Vec::with_capacity(selection.ids.len() + 1);
    if selection.all {
        list.push("all".to_string());
    }
    list.extend(selection.ids.iter().cloned());
    list
}

fn risk_list(levels: &BTreeSet<RiskLevel>) -> Vec<&'static str> {
    levels.iter().map(RiskLevel::as_str).collect()
}

/// `null` clears session controls on update.
fn session_payload(session: &SessionControls) -> Value {
    if session.is_empty() {
        return Value::Null;
    }
    let mut body = Map::new();
    if let Some(f) = session.sign_in_frequency {
        body.insert(
            "signInFrequency".into(),
            json!({ "value": f.value, "type": f.unit.as_str(), "isEnabled": true }),
        );
    }
    if let Some(mode) = session.persistent_browser {
        body.insert(
            "persistentBrowser".into(),
            json!({ "mode": mode.as_str(), "isEnabled": true }),
        );
    }
    if let Some(kind) = &session.cloud_app_security {
        body.insert(
            "cloudAppSecurity".into(),
            json!({ "cloudAppSecurityType": kind, "isEnabled": true }),
        );
    }
    Value::Object(body)
}

/// Graph request body for a local policy.
pub fn policy_payload(policy: &Policy) -> Value {
    let c = &policy.conditions;
    let u = &c.users;

    let mut conditions = Map::new();
    conditions.insert(
        "users".into(),
        json!({
            "includeUsers": u.include_users.to_list(),
            "excludeUsers": u.exclude_users.to_list(),
            "includeGroups": u.include_groups.to_list(),
            "excludeGroups": u.exclude_groups.to_list(),
        }),
    );
    conditions.insert(
        "applications".into(),
        json!({
            "includeApplications": c.applications.include.to_list(),
            "excludeApplications": c.applications.exclude.to_list(),
        }),
    );
    if let Some(locations) = &c.locations {
        let include = if locations.include.is_empty() {
            vec![ALL.to_string()]
        } else {
            locations.include.to_list()
        };
        conditions.insert(
            "locations".into(),
            json!({
                "includeLocations": include,
                "excludeLocations": locations.exclude.to_list(),
            }),
        );
    }
    if let Some(platforms) = &c.platforms {
        let include = if platforms.include.is_empty() {
            vec!["all".to_string()]
        } else {
            any_case_list(&platforms.include)
        };
        conditions.insert(
            "platforms".into(),
            json!({
                "includePlatforms": include,
                "excludePlatforms": any_case_list(&platforms.exclude),
            }),
        );
    }
    let client_app_types = if c.client_app_types.is_empty() {
        vec!["all".to_string()]
    } else {
        any_case_list(&c.client_app_types)
    };
    conditions.insert("clientAppTypes".into(), json!(client_app_types));
    conditions.insert("signInRiskLevels".into(), json!(risk_list(&c.sign_in_risk_levels)));
    conditions.insert("userRiskLevels".into(), json!(risk_list(&c.user_risk_levels)));

    let g = &policy.grant_controls;
    json!({
        "displayName": crate::policy::reconcile::deployed_name(policy),
        "state": policy.state.as_str(),
        "conditions": Value::Object(conditions),
        "grantControls": {
            "operator": g.operator.as_str(),
            "builtInControls": g.built_in_controls,
            "customAuthenticationFactors": g.custom_authentication_factors,
            "termsOfUse": g.terms_of_use,
        },
        "sessionControls": session_payload(&policy.session_controls),
    })
}

/// List all CA policies as typed structs, following pagination.
pub async fn list_policies_typed(client: &GraphClient) -> GraphResult<Vec<ConditionalAccessPolicy>> {
    client.get_all_pages(POLICIES_ENDPOINT).await
}

#[async_trait]
impl DirectoryClient for GraphClient {
    async fn list(&self) -> Result<Vec<RemotePolicy>, RemoteFailure> {
        let policies = list_policies_typed(self).await?;
        Ok(policies.iter().map(ConditionalAccessPolicy::to_remote).collect())
    }

    async fn create(&self, policy: &Policy) -> Result<String, RemoteFailure> {
        let created: Created = self.post(POLICIES_ENDPOINT, &policy_payload(policy)).await?;
        Ok(created.id)
    }

    async fn update(&self, id: &str, policy: &Policy) -> Result<(), RemoteFailure> {
        self.patch(&format!("{}/{}", POLICIES_ENDPOINT, id), &policy_payload(policy))
            .await
    }
}
