pub mod ca;
pub mod deploy;
pub mod loader;
pub mod login;
pub mod progress;
pub mod tenant;
pub mod validate;

use crate::config::{ConfigManager, ENV_ACCESS_TOKEN, ENV_GRAPH_URL, baseline};
use crate::error::{CapctlError, Result};
use crate::graph::GraphClient;
use crate::graph::auth::GraphAuth;
use crate::policy::{self, Analysis, Checks, ValidationReport};
use clap::ValueEnum;
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// `--baseline-path`, then `baseline_path` from config.toml, then `./baseline`.
pub fn resolve_baseline_dir(arg: Option<PathBuf>, config: &ConfigManager) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }
    let config = config.load_config()?;
    Ok(config
        .baseline_path
        .unwrap_or_else(|| PathBuf::from(baseline::DEFAULT_BASELINE_DIR)))
}

/// Load the policy directory and run the selected checks against the baseline.
pub fn analyze_path(path: &Path, baseline_dir: &Path, checks: Checks) -> Result<Analysis> {
    if !path.exists() {
        return Err(CapctlError::ConfigError(format!(
            "Policy path not found: {}",
            path.display()
        )));
    }

    let baseline = baseline::load(baseline_dir, checks.compliance)?;
    let loaded = loader::load(path)?;
    let mut analysis = policy::analyze(&loaded.documents, &baseline, checks);

    if !loaded.unreadable.is_empty() {
        let mut report = ValidationReport::new();
        report.extend(loaded.unreadable);
        report.extend(analysis.report);
        analysis.report = report;
    }
    Ok(analysis)
}

/// Connect to Graph: `CAPCTL_ACCESS_TOKEN`, then client credentials from the
/// environment, then the active tenant.
pub async fn connect(config: &ConfigManager) -> Result<(GraphClient, String)> {
    let base_url = std::env::var(ENV_GRAPH_URL).ok();
    let with_base = |client: GraphClient| match &base_url {
        Some(url) => client.with_endpoint(url.as_str()),
        None => client,
    };

    if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN) {
        if !token.trim().is_empty() {
            tracing::debug!("connecting with {}", ENV_ACCESS_TOKEN);
            let client = with_base(GraphClient::new(token.trim().to_string()));
            return Ok((client, ENV_ACCESS_TOKEN.to_string()));
        }
    }

    if let Some(tenant) = ConfigManager::tenant_from_env() {
        let auth = GraphAuth::new(config.clone());
        let token = auth.login_client_credentials(&tenant).await?;
        return Ok((with_base(GraphClient::new(token.access_token)), tenant.tenant_id));
    }

    let tenant = config.get_active_tenant()?.ok_or_else(|| {
        CapctlError::ConfigError("No active tenant. Run 'capctl login' first".into())
    })?;
    let client = with_base(GraphClient::from_config(config, &tenant.name).await?);
    Ok((client, tenant.name))
}

pub(crate) fn print_tenant(label: &str) {
    println!("→ Tenant: {}", label.cyan().bold());
}
