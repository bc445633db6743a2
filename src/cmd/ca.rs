use crate::cmd::{OutputFormat, connect, print_tenant};
use crate::config::ConfigManager;
use crate::error::{CapctlError, Result};
use crate::graph::conditional_access::{self, ConditionalAccessPolicy};
use crate::policy::PolicyState;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by state (enabled, report-only, disabled)
    #[arg(long)]
    pub state: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

fn parse_state_filter(filter: &str) -> Result<PolicyState> {
    match filter.to_ascii_lowercase().as_str() {
        "report-only" | "reportonly" => Ok(PolicyState::EnabledForReportingButNotEnforced),
        other => PolicyState::parse(other)
            .or_else(|| PolicyState::parse(filter))
            .ok_or_else(|| {
                CapctlError::ConfigError(format!(
                    "Unknown state '{}'. Use enabled, report-only or disabled",
                    filter
                ))
            }),
    }
}

fn state_label(policy: &ConditionalAccessPolicy) -> colored::ColoredString {
    match policy.policy_state() {
        Some(PolicyState::Enabled) => "enabled".green(),
        Some(PolicyState::EnabledForReportingButNotEnforced) => "report-only".yellow(),
        Some(PolicyState::Disabled) => "disabled".red(),
        None => policy.state.as_str().dimmed(),
    }
}

pub async fn list(args: ListArgs) -> Result<()> {
    let filter = args.state.as_deref().map(parse_state_filter).transpose()?;

    let config = ConfigManager::new()?;
    let (graph, tenant) = connect(&config).await?;

    let policies = conditional_access::list_policies_typed(&graph).await?;
    let filtered: Vec<&ConditionalAccessPolicy> = policies
        .iter()
        .filter(|p| filter.is_none() || p.policy_state() == filter)
        .collect();

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&filtered)?);
        return Ok(());
    }

    println!("{} Conditional Access policies...", "Listing".cyan().bold());
    print_tenant(&tenant);

    if policies.is_empty() {
        println!("\n{} No Conditional Access policies found", "ℹ".yellow());
        return Ok(());
    }

    let count = |state: PolicyState| {
        policies
            .iter()
            .filter(|p| p.policy_state() == Some(state))
            .count()
    };
    println!(
        "\n{} {} CA policies found ({} enabled, {} report-only, {} disabled)\n",
        "→".cyan(),
        policies.len(),
        count(PolicyState::Enabled).to_string().green(),
        count(PolicyState::EnabledForReportingButNotEnforced)
            .to_string()
            .yellow(),
        count(PolicyState::Disabled).to_string().red()
    );

    println!(
        "{:<50} {:<15} {:<12}",
        "Name".bold(),
        "State".bold(),
        "Modified".bold()
    );
    println!("{}", "─".repeat(80));

    for policy in filtered {
        let modified = policy
            .modified_date_time
            .as_deref()
            .or(policy.created_date_time.as_deref())
            .and_then(|d| d.get(..10))
            .unwrap_or("-");
        println!(
            "{:<50} {:<15} {:<12}",
            policy.display_name,
            state_label(policy),
            modified
        );
    }

    Ok(())
}
