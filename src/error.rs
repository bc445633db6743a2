use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapctlError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Remote directory call failed: {0}")]
    Remote(#[from] RemoteFailure),

    #[error("Invalid compliance ruleset: {0}")]
    Ruleset(#[from] RulesetError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Directory walk error: {0}")]
    WalkDirError(#[from] walkdir::Error),

    #[error("Interactive prompt error: {0}")]
    DialoguerError(#[from] dialoguer::Error),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Deployment incomplete: {0}")]
    DeploymentFailed(String),

    #[error("Token not found. Please run 'capctl login' first")]
    TokenNotFound,

    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),
}

pub type Result<T> = std::result::Result<T, CapctlError>;

/// A policy document that could not be turned into a [`crate::policy::Policy`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("schema violation: {0}")]
    Schema(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{0}' must not be empty")]
    EmptyField(String),

    #[error("'block' cannot be combined with other controls: {0:?}")]
    BlockNotExclusive(Vec<String>),

    #[error("{dimension}: '{identifier}' is both included and excluded")]
    IncludeExcludeOverlap {
        dimension: String,
        identifier: String,
    },
}

/// Configuration problems found while loading a compliance ruleset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesetError {
    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("rule '{0}' needs a group but no breakGlassGroup is configured")]
    MissingBreakGlassGroup(String),

    #[error("rule '{rule}': invalid scope pattern '{pattern}'")]
    InvalidScopePattern { rule: String, pattern: String },

    #[error("rule '{0}' has an empty control list")]
    EmptyControls(String),
}

/// Terminal failure of a single remote directory call, after the client's own retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("transient network failure: {0}")]
    Transient(String),
}

impl RemoteFailure {
    /// Auth failures make every following call fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteFailure::Auth(_))
    }

    /// Map an HTTP status and (already enhanced) body to a failure class.
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            401 | 403 => RemoteFailure::Auth(detail),
            429 => RemoteFailure::RateLimited(detail),
            400 | 404 | 409 | 422 => RemoteFailure::Rejected(detail),
            _ => RemoteFailure::Transient(detail),
        }
    }
}

/// Parse Graph API error response and provide helpful context
pub fn enhance_graph_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    "\n💡 Hint: Your access token may have expired. Run 'capctl login' again."
                }
                "Forbidden" | "AccessDenied" | "Authorization_RequestDenied" => {
                    if message.contains("scopes are missing") {
                        "\n💡 Hint: Conditional Access requires Entra ID P1/P2 and Policy.ReadWrite.ConditionalAccess."
                    } else {
                        "\n💡 Hint: Check that the app registration has Policy.ReadWrite.ConditionalAccess with admin consent."
                    }
                }
                "BadRequest" => {
                    if message.contains("already exists") {
                        "\n💡 Hint: A policy with this display name already exists."
                    } else {
                        "\n💡 Hint: The policy payload was rejected. Check conditions and grant controls."
                    }
                }
                "NotFound" => "\n💡 Hint: The policy id no longer exists in the tenant.",
                "TooManyRequests" => "\n💡 Hint: API rate limit exceeded. Wait a moment and try again.",
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}
