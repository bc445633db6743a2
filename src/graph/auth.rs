use crate::config::{AuthType, ConfigManager, ENV_ACCESS_TOKEN, TenantConfig, TokenCache};
use crate::error::{CapctlError, Result};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl, EmptyExtraDeviceAuthorizationFields,
    Scope, TokenResponse, TokenUrl, basic::BasicClient, reqwest::async_http_client,
};
use std::time::Duration;

const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Graph permissions capctl needs on its app registration.
pub const REQUIRED_SCOPES: &[&str] = &[
    "Policy.Read.All",
    "Policy.ReadWrite.ConditionalAccess",
    "Application.Read.All",
];

pub struct GraphAuth {
    config_manager: ConfigManager,
}

fn endpoints(tenant_id: &str) -> Result<(AuthUrl, TokenUrl)> {
    let auth_url = AuthUrl::new(format!(
        "{}/{}/oauth2/v2.0/authorize",
        MICROSOFT_AUTHORITY, tenant_id
    ))
    .map_err(|e| CapctlError::AuthError(format!("Invalid auth URL: {}", e)))?;

    let token_url = TokenUrl::new(format!(
        "{}/{}/oauth2/v2.0/token",
        MICROSOFT_AUTHORITY, tenant_id
    ))
    .map_err(|e| CapctlError::AuthError(format!("Invalid token URL: {}", e)))?;

    Ok((auth_url, token_url))
}

fn expiry(expires_in: Option<Duration>) -> chrono::DateTime<chrono::Utc> {
    let lifetime = expires_in.unwrap_or(Duration::from_secs(3600));
    chrono::Utc::now()
        + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::hours(1))
}

impl GraphAuth {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Authenticate using device code flow (interactive)
    pub async fn login_device_code(&self, tenant_config: &TenantConfig) -> Result<TokenCache> {
        println!(
            "🔐 Starting device code authentication for tenant '{}'...",
            tenant_config.name
        );

        let tenant_id = &tenant_config.tenant_id;
        let (auth_url, token_url) = endpoints(tenant_id)?;
        let device_auth_url = DeviceAuthorizationUrl::new(format!(
            "{}/{}/oauth2/v2.0/devicecode",
            MICROSOFT_AUTHORITY, tenant_id
        ))
        .map_err(|e| CapctlError::AuthError(format!("Invalid device auth URL: {}", e)))?;

        let client = BasicClient::new(
            ClientId::new(tenant_config.client_id.clone()),
            None,
            auth_url,
            Some(token_url),
        )
        .set_device_authorization_url(device_auth_url);

        let details: oauth2::DeviceAuthorizationResponse<EmptyExtraDeviceAuthorizationFields> =
            client
                .exchange_device_code()
                .map_err(|e| CapctlError::AuthError(format!("Device code exchange failed: {}", e)))?
                .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
                .request_async(async_http_client)
                .await
                .map_err(|e| {
                    CapctlError::AuthError(format!("Device authorization request failed: {}", e))
                })?;

        println!("\n📱 Please visit: {}", details.verification_uri().as_str());
        println!("🔑 Enter code: {}\n", details.user_code().secret());

        let token = client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| CapctlError::AuthError(format!("Token exchange failed: {}", e)))?;

        let token_cache = TokenCache {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at: expiry(token.expires_in()),
            tenant_id: tenant_id.clone(),
        };

        self.config_manager
            .save_token(&tenant_config.name, &token_cache)?;
        tracing::info!(tenant = %tenant_config.name, "device code login succeeded");

        Ok(token_cache)
    }

    /// Authenticate using client credentials flow (non-interactive)
    pub async fn login_client_credentials(
        &self,
        tenant_config: &TenantConfig,
    ) -> Result<TokenCache> {
        let client_secret = tenant_config.client_secret.as_ref().ok_or_else(|| {
            CapctlError::AuthError("Client secret required for client credentials flow".into())
        })?;

        let tenant_id = &tenant_config.tenant_id;
        let (auth_url, token_url) = endpoints(tenant_id)?;
        let client = BasicClient::new(
            ClientId::new(tenant_config.client_id.clone()),
            Some(ClientSecret::new(client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                CapctlError::AuthError(format!("Client credentials exchange failed: {}", e))
            })?;

        let token_cache = TokenCache {
            access_token: token.access_token().secret().clone(),
            refresh_token: None, // Client credentials don't use refresh tokens
            expires_at: expiry(token.expires_in()),
            tenant_id: tenant_id.clone(),
        };

        self.config_manager
            .save_token(&tenant_config.name, &token_cache)?;
        tracing::info!(tenant = %tenant_config.name, "client credentials login succeeded");

        Ok(token_cache)
    }

    /// Resolve a usable access token: `CAPCTL_ACCESS_TOKEN`, then the cache,
    /// then a silent client-credentials login when the tenant has a secret.
    pub async fn get_access_token(&self, tenant_name: &str) -> Result<String> {
        if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN) {
            if !token.trim().is_empty() {
                tracing::debug!("using access token from {}", ENV_ACCESS_TOKEN);
                return Ok(token.trim().to_string());
            }
        }

        match self.config_manager.load_token(tenant_name) {
            Ok(token) => Ok(token.access_token),
            Err(CapctlError::AuthError(_)) | Err(CapctlError::TokenNotFound) => {
                let tenant = self.config_manager.get_tenant(tenant_name)?;
                if tenant.auth_type == AuthType::ClientCredentials && tenant.client_secret.is_some() {
                    tracing::debug!(tenant = %tenant_name, "token missing or expired, re-acquiring");
                    Ok(self.login_client_credentials(&tenant).await?.access_token)
                } else {
                    Err(CapctlError::TokenNotFound)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Logout (delete token cache)
    pub fn logout(&self, tenant_name: &str) -> Result<()> {
        self.config_manager.delete_token(tenant_name)
    }
}
