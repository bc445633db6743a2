//! `capctl plan` and `capctl deploy`.

use crate::cmd::progress::{create_spinner, finish_spinner_error, finish_spinner_success};
use crate::cmd::validate::{blocking_summary, print_analysis, print_issues};
use crate::cmd::{OutputFormat, analyze_path, connect, print_tenant, resolve_baseline_dir};
use crate::config::ConfigManager;
use crate::error::{CapctlError, Result};
use crate::graph::GraphClient;
use crate::graph::conditional_access::ConditionalAccessPolicy;
use crate::policy::reconcile::{
    self, ApplyOutcome, ApplyResult, DirectoryClient, PlanAction, ReconciliationPlan, RemotePolicy,
};
use crate::policy::{Analysis, Checks};
use clap::Args;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Directory (or single file) of policy documents
    #[arg(short, long, default_value = "policies")]
    pub path: PathBuf,

    /// Directory holding naming, compliance and conflict rules
    #[arg(long)]
    pub baseline_path: Option<PathBuf>,

    /// Compare against an exported Graph policy list instead of the live tenant
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Directory (or single file) of policy documents
    #[arg(short, long, default_value = "policies")]
    pub path: PathBuf,

    /// Directory holding naming, compliance and conflict rules
    #[arg(long)]
    pub baseline_path: Option<PathBuf>,

    /// Apply changes to the tenant (default is a dry run)
    #[arg(long)]
    pub live: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum concurrent Graph writes (defaults to max_concurrency in config.toml)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Treat any detected conflict as blocking
    #[arg(long)]
    pub fail_on_conflicts: bool,
}

/// A Graph list export: either the raw page or just its `value` array.
#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Page { value: Vec<ConditionalAccessPolicy> },
    List(Vec<ConditionalAccessPolicy>),
}

pub fn read_snapshot(path: &Path) -> Result<Vec<RemotePolicy>> {
    let contents = fs::read_to_string(path)?;
    let policies = match serde_json::from_str::<Snapshot>(&contents)? {
        Snapshot::Page { value } => value,
        Snapshot::List(list) => list,
    };
    Ok(policies.iter().map(ConditionalAccessPolicy::to_remote).collect())
}

async fn fetch_remote(client: &GraphClient) -> Result<Vec<RemotePolicy>> {
    let spinner = create_spinner("Reading Conditional Access policies...");
    match client.list().await {
        Ok(remote) => {
            finish_spinner_success(&spinner, &format!("{} remote policies", remote.len()));
            Ok(remote)
        }
        Err(e) => {
            finish_spinner_error(&spinner, "Could not read remote policies");
            Err(e.into())
        }
    }
}

fn analyze_for_deploy(
    path: &Path,
    baseline_path: Option<PathBuf>,
    fail_on_conflicts: bool,
    config: &ConfigManager,
) -> Result<Analysis> {
    let baseline_dir = resolve_baseline_dir(baseline_path, config)?;
    let analysis = analyze_path(path, &baseline_dir, Checks::all())?;
    if analysis.is_blocked(fail_on_conflicts) {
        print_analysis(&analysis);
        return Err(CapctlError::ValidationFailed(blocking_summary(
            &analysis,
            fail_on_conflicts,
        )));
    }
    Ok(analysis)
}

pub async fn plan(args: PlanArgs) -> Result<()> {
    let config = ConfigManager::new()?;
    let analysis = analyze_for_deploy(&args.path, args.baseline_path, false, &config)?;

    let remote = match &args.snapshot {
        Some(snapshot) => read_snapshot(snapshot)?,
        None => {
            let (client, tenant) = connect(&config).await?;
            if args.format == OutputFormat::Table {
                print_tenant(&tenant);
            }
            fetch_remote(&client).await?
        }
    };

    let reconciliation = reconcile::plan(&analysis.policies, &remote);
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reconciliation)?),
        OutputFormat::Table => print_plan(&reconciliation),
    }
    Ok(())
}

pub async fn deploy(args: DeployArgs) -> Result<()> {
    let config = ConfigManager::new()?;
    let analysis = analyze_for_deploy(
        &args.path,
        args.baseline_path,
        args.fail_on_conflicts,
        &config,
    )?;
    if !analysis.report.is_empty() || !analysis.conflicts.is_empty() {
        print_analysis(&analysis);
    }

    let (client, tenant) = connect(&config).await?;
    print_tenant(&tenant);

    let remote = fetch_remote(&client).await?;
    let reconciliation = reconcile::plan(&analysis.policies, &remote);
    print_plan(&reconciliation);

    if !args.live {
        println!(
            "\n{} Dry run: no changes were made. Re-run with {} to apply.",
            "ℹ".blue(),
            "--live".bold()
        );
        return Ok(());
    }

    if !reconciliation.has_changes() {
        println!("\n{} Tenant already matches the declared policies", "✓".green());
        return Ok(());
    }

    if !args.yes {
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Apply {} create(s) and {} update(s) to {}?",
                reconciliation.count(PlanAction::Create),
                reconciliation.count(PlanAction::Update),
                tenant
            ))
            .default(false)
            .interact()?;
        if !proceed {
            println!("{} Deployment cancelled", "✗".yellow());
            return Ok(());
        }
    }

    let concurrency = match args.concurrency {
        Some(n) => n.max(1),
        None => config.load_config()?.max_concurrency(),
    };
    tracing::info!(concurrency, "applying reconciliation plan");

    let spinner = create_spinner("Applying changes...");
    let results = reconcile::apply(&reconciliation, &analysis.policies, &client, concurrency).await;
    let failed = results.iter().filter(|r| r.outcome.is_failure()).count();
    if failed == 0 {
        finish_spinner_success(&spinner, "Changes applied");
    } else {
        finish_spinner_error(&spinner, &format!("{} change(s) failed", failed));
    }

    print_results(&results);

    let skipped = results
        .iter()
        .filter(|r| r.outcome == ApplyOutcome::Skipped)
        .count();
    if failed > 0 || skipped > 0 {
        return Err(CapctlError::DeploymentFailed(format!(
            "{} failed, {} skipped",
            failed, skipped
        )));
    }
    Ok(())
}

fn action_label(action: PlanAction) -> colored::ColoredString {
    let label = format!("{:<8}", action.to_string());
    match action {
        PlanAction::Create => label.green(),
        PlanAction::Update => label.yellow(),
        PlanAction::NoOp => label.dimmed(),
    }
}

pub(crate) fn print_plan(plan: &ReconciliationPlan) {
    println!("\n{}", "Reconciliation plan:".bold());
    println!("{}", "─".repeat(80));
    for item in &plan.items {
        println!("{} {}", action_label(item.action), item.display_name);
        if item.action == PlanAction::Update {
            for change in &item.diff {
                println!("         {}", change.to_string().dimmed());
            }
        }
    }
    if !plan.notes.is_empty() {
        print_issues(&plan.notes);
    }
    println!("{}", "─".repeat(80));
    println!(
        "{} {} to create, {} to update, {} unchanged",
        "→".cyan(),
        plan.count(PlanAction::Create).to_string().green(),
        plan.count(PlanAction::Update).to_string().yellow(),
        plan.count(PlanAction::NoOp)
    );
}

fn print_results(results: &[ApplyResult]) {
    println!();
    for result in results {
        match &result.outcome {
            ApplyOutcome::Applied { remote_id } => println!(
                "{} {} {} ({})",
                "✓".green(),
                result.action,
                result.policy_name,
                remote_id.dimmed()
            ),
            ApplyOutcome::Failed { reason } => println!(
                "{} {} {}: [{}] {}",
                "✗".red(),
                result.action,
                result.policy_name,
                reason.class,
                reason.detail
            ),
            ApplyOutcome::Skipped => println!(
                "{} {} {} skipped after an authentication failure",
                "⚠".yellow(),
                result.action,
                result.policy_name
            ),
            ApplyOutcome::Unchanged => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_accepts_page_and_list() {
        let dir = TempDir::new().unwrap();
        let page = dir.path().join("page.json");
        fs::write(
            &page,
            r#"{"value":[{"id":"1","displayName":"A","state":"enabled"}],"@odata.context":"x"}"#,
        )
        .unwrap();
        let list = dir.path().join("list.json");
        fs::write(&list, r#"[{"id":"2","displayName":"B","state":"disabled"}]"#).unwrap();

        assert_eq!(read_snapshot(&page).unwrap()[0].id, "1");
        assert_eq!(read_snapshot(&list).unwrap()[0].display_name(), "B");
    }
}
