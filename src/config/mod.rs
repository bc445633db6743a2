pub mod baseline;

use crate::error::{CapctlError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Pre-acquired bearer token, used as-is (CI pipelines).
pub const ENV_ACCESS_TOKEN: &str = "CAPCTL_ACCESS_TOKEN";
pub const ENV_TENANT_ID: &str = "CAPCTL_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "CAPCTL_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "CAPCTL_CLIENT_SECRET";
/// Graph endpoint override (national clouds, mock servers).
pub const ENV_GRAPH_URL: &str = "CAPCTL_GRAPH_URL";

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub current_tenant: Option<String>,

    #[serde(default)]
    pub log_level: String,

    /// Directory holding naming, compliance and conflict rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Config {
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1)
    }
}

/// Tenant-specific configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TenantConfig {
    pub name: String,
    pub tenant_id: String,
    pub client_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub auth_type: AuthType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    DeviceCode,
    ClientCredentials,
}

/// Token cache structure
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub tenant_id: String,
}

impl TokenCache {
    pub fn is_expired(&self) -> bool {
        self.expires_at < chrono::Utc::now()
    }
}

/// Configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("io", "capctl", "capctl").ok_or_else(|| {
            CapctlError::ConfigError("Failed to determine config directory".into())
        })?;

        Self::with_dir(project_dirs.config_dir())
    }

    /// Use an explicit config directory, created if missing.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let config_dir = dir.as_ref().to_path_buf();
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn tenants_file(&self) -> PathBuf {
        self.config_dir.join("tenants.toml")
    }

    pub fn token_cache_file(&self, tenant_name: &str) -> PathBuf {
        self.config_dir
            .join("cache")
            .join(format!("{}.token", tenant_name))
    }

    pub fn load_config(&self) -> Result<Config> {
        let config_path = self.config_file();

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_config(&self, config: &Config) -> Result<()> {
        let contents = toml::to_string_pretty(config)
            .map_err(|e| CapctlError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(self.config_file(), contents)?;
        Ok(())
    }

    pub fn load_tenants(&self) -> Result<Vec<TenantConfig>> {
        let tenants_path = self.tenants_file();

        if !tenants_path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(tenants_path)?;

        #[derive(Deserialize)]
        struct TenantsFile {
            #[serde(default)]
            tenants: Vec<TenantConfig>,
        }

        let file: TenantsFile = toml::from_str(&contents)?;
        Ok(file.tenants)
    }

    pub fn save_tenants(&self, tenants: &[TenantConfig]) -> Result<()> {
        #[derive(Serialize)]
        struct TenantsFile<'a> {
            tenants: &'a [TenantConfig],
        }

        let contents = toml::to_string_pretty(&TenantsFile { tenants })
            .map_err(|e| CapctlError::ConfigError(format!("Failed to serialize tenants: {}", e)))?;
        fs::write(self.tenants_file(), contents)?;
        Ok(())
    }

    /// Add or replace a tenant by name.
    pub fn add_tenant(&self, tenant: TenantConfig) -> Result<()> {
        let mut tenants = self.load_tenants()?;
        tenants.retain(|t| t.name != tenant.name);
        tenants.push(tenant);
        self.save_tenants(&tenants)
    }

    pub fn get_tenant(&self, name: &str) -> Result<TenantConfig> {
        self.load_tenants()?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CapctlError::TenantNotFound(name.to_string()))
    }

    pub fn get_active_tenant(&self) -> Result<Option<TenantConfig>> {
        match self.load_config()?.current_tenant {
            Some(tenant_name) => Ok(Some(self.get_tenant(&tenant_name)?)),
            None => Ok(None),
        }
    }

    /// Tenant described entirely by `CAPCTL_*` environment variables, if set.
    pub fn tenant_from_env() -> Option<TenantConfig> {
        let tenant_id = std::env::var(ENV_TENANT_ID).ok()?;
        let client_id = std::env::var(ENV_CLIENT_ID).ok()?;
        let client_secret = std::env::var(ENV_CLIENT_SECRET).ok();
        Some(TenantConfig {
            name: "env".to_string(),
            tenant_id,
            client_id,
            auth_type: if client_secret.is_some() {
                AuthType::ClientCredentials
            } else {
                AuthType::DeviceCode
            },
            client_secret,
            description: Some("from environment".to_string()),
        })
    }

    pub fn save_token(&self, tenant_name: &str, token: &TokenCache) -> Result<()> {
        let cache_dir = self.config_dir.join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let contents = serde_json::to_string_pretty(token)?;
        fs::write(self.token_cache_file(tenant_name), contents)?;
        Ok(())
    }

    /// Load a cached token; an expired token is an `AuthError`.
    pub fn load_token(&self, tenant_name: &str) -> Result<TokenCache> {
        let token_path = self.token_cache_file(tenant_name);

        if !token_path.exists() {
            return Err(CapctlError::TokenNotFound);
        }

        let contents = fs::read_to_string(token_path)?;
        let token: TokenCache = serde_json::from_str(&contents)?;

        if token.is_expired() {
            return Err(CapctlError::AuthError("Token expired".into()));
        }

        Ok(token)
    }

    pub fn delete_token(&self, tenant_name: &str) -> Result<()> {
        let token_path = self.token_cache_file(tenant_name);

        if token_path.exists() {
            fs::remove_file(token_path)?;
        }

        Ok(())
    }

    pub fn set_active_tenant(&self, tenant_name: &str) -> Result<()> {
        self.get_tenant(tenant_name)?;

        let mut config = self.load_config()?;
        config.current_tenant = Some(tenant_name.to_string());
        self.save_config(&config)
    }

    pub fn remove_tenant(&self, tenant_name: &str) -> Result<()> {
        let mut tenants = self.load_tenants()?;
        let original_len = tenants.len();
        tenants.retain(|t| !t.name.eq_ignore_ascii_case(tenant_name));

        if tenants.len() == original_len {
            return Err(CapctlError::TenantNotFound(tenant_name.to_string()));
        }

        self.save_tenants(&tenants)?;
        let _ = self.delete_token(tenant_name);

        let mut config = self.load_config()?;
        if config.current_tenant.as_deref() == Some(tenant_name) {
            config.current_tenant = None;
            self.save_config(&config)?;
        }

        Ok(())
    }
}
