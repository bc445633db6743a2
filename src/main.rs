use capctl::config::ConfigManager;
use capctl::{cmd, error};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "capctl",
    about = "Conditional Access policy-as-code for Microsoft Entra ID",
    version,
    long_about = "Validate, conflict-check and reconcile Conditional Access policies\n\n\
                  Policies live as YAML/JSON documents in git; capctl checks them against\n\
                  naming and compliance rules, detects overlaps, and deploys the difference."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate policy documents (naming, compliance, conflicts)
    Validate(cmd::validate::ValidateArgs),

    /// Show what a deployment would change in the tenant
    Plan(cmd::deploy::PlanArgs),

    /// Reconcile the tenant with the policy documents (dry run unless --live)
    Deploy(cmd::deploy::DeployArgs),

    /// List Conditional Access policies in the tenant
    List(cmd::ca::ListArgs),

    /// Authenticate to Microsoft Graph API
    Login(cmd::login::LoginArgs),

    /// Logout and clear cached credentials
    Logout(cmd::login::LogoutArgs),

    /// Manage tenant configurations
    #[command(subcommand)]
    Tenant(TenantCommands),
}

#[derive(Subcommand, Debug)]
enum TenantCommands {
    /// Add a new tenant configuration
    Add(cmd::tenant::TenantAddArgs),

    /// List configured tenants
    List(cmd::tenant::TenantListArgs),

    /// Switch active tenant
    Switch(cmd::tenant::TenantSwitchArgs),

    /// Remove a tenant configuration
    Remove(cmd::tenant::TenantRemoveArgs),
}

/// `log_level` from config.toml, scoped to this crate; `warn` otherwise.
fn configured_log_level() -> String {
    ConfigManager::new()
        .and_then(|manager| manager.load_config())
        .ok()
        .map(|config| config.log_level)
        .filter(|level| !level.trim().is_empty())
        .map(|level| format!("capctl={}", level.trim()))
        .unwrap_or_else(|| "warn".to_string())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> error::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("capctl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_log_level()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate(args) => cmd::validate::validate(args).await?,
        Commands::Plan(args) => cmd::deploy::plan(args).await?,
        Commands::Deploy(args) => cmd::deploy::deploy(args).await?,
        Commands::List(args) => cmd::ca::list(args).await?,
        Commands::Login(args) => cmd::login::login(args).await?,
        Commands::Logout(args) => cmd::login::logout(args).await?,
        Commands::Tenant(tenant_cmd) => match tenant_cmd {
            TenantCommands::Add(args) => cmd::tenant::add(args).await?,
            TenantCommands::List(args) => cmd::tenant::list(args).await?,
            TenantCommands::Switch(args) => cmd::tenant::switch(args).await?,
            TenantCommands::Remove(args) => cmd::tenant::remove(args).await?,
        },
    }

    Ok(())
}
