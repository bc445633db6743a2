use crate::cmd::{OutputFormat, analyze_path, resolve_baseline_dir};
use crate::config::ConfigManager;
use crate::error::{CapctlError, Result};
use crate::policy::report::SeverityCounts;
use crate::policy::{Analysis, Checks, ConflictPair, Severity, ValidationIssue};
use clap::{Args, ValueEnum};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckKind {
    Naming,
    Compliance,
    Conflicts,
    BestPractices,
    All,
}

impl CheckKind {
    pub fn checks(self) -> Checks {
        match self {
            CheckKind::Naming => Checks {
                naming: true,
                compliance: false,
                conflicts: false,
                best_practices: false,
            },
            CheckKind::Compliance => Checks {
                naming: false,
                compliance: true,
                conflicts: false,
                best_practices: false,
            },
            CheckKind::Conflicts => Checks {
                naming: false,
                compliance: false,
                conflicts: true,
                best_practices: false,
            },
            CheckKind::BestPractices => Checks {
                naming: false,
                compliance: false,
                conflicts: false,
                best_practices: true,
            },
            CheckKind::All => Checks::all(),
        }
    }
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Which checks to run
    #[arg(long, value_enum, default_value = "all")]
    pub check: CheckKind,

    /// Directory (or single file) of policy documents
    #[arg(short, long, default_value = "policies")]
    pub path: PathBuf,

    /// Directory holding naming, compliance, conflict and best-practice rules
    #[arg(long)]
    pub baseline_path: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Treat any detected conflict as blocking
    #[arg(long)]
    pub fail_on_conflicts: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    passed: bool,
    policies: usize,
    counts: SeverityCounts,
    issues: &'a [ValidationIssue],
    conflicts: &'a [ConflictPair],
    recommendations: &'a [ValidationIssue],
}

pub async fn validate(args: ValidateArgs) -> Result<()> {
    let config = ConfigManager::new()?;
    let baseline_dir = resolve_baseline_dir(args.baseline_path, &config)?;
    let analysis = analyze_path(&args.path, &baseline_dir, args.check.checks())?;
    let blocked = analysis.is_blocked(args.fail_on_conflicts);

    match args.format {
        OutputFormat::Json => {
            let report = JsonReport {
                passed: !blocked,
                policies: analysis.policies.len(),
                counts: analysis.report.counts(),
                issues: analysis.report.issues(),
                conflicts: &analysis.conflicts,
                recommendations: analysis.advisories.issues(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!(
                "{} {} ({} policies)",
                "Validating".cyan().bold(),
                args.path.display(),
                analysis.policies.len()
            );
            print_analysis(&analysis);
        }
    }

    if blocked {
        return Err(CapctlError::ValidationFailed(blocking_summary(
            &analysis,
            args.fail_on_conflicts,
        )));
    }
    Ok(())
}

pub(crate) fn blocking_summary(analysis: &Analysis, fail_on_conflicts: bool) -> String {
    let counts = analysis.report.counts();
    let mut summary = format!(
        "{} critical, {} high issue(s)",
        counts.critical, counts.high
    );
    if fail_on_conflicts && !analysis.conflicts.is_empty() {
        summary.push_str(&format!(", {} conflict(s)", analysis.conflicts.len()));
    }
    summary
}

fn severity_label(severity: Severity) -> ColoredString {
    let label = format!("{:<8}", severity.as_str());
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Info => label.dimmed(),
    }
}

pub(crate) fn print_issues(issues: &[ValidationIssue]) {
    println!(
        "\n{:<8} {:<28} {:<36} {}",
        "Severity".bold(),
        "Code".bold(),
        "Policy".bold(),
        "Message".bold()
    );
    println!("{}", "─".repeat(110));
    for issue in issues {
        println!(
            "{} {:<28} {:<36} {}",
            severity_label(issue.severity),
            issue.code,
            issue.policy_name,
            issue.message
        );
    }
}

pub(crate) fn print_conflicts(conflicts: &[ConflictPair]) {
    println!("\n{}", "Overlapping policies:".bold());
    println!("{}", "─".repeat(110));
    for pair in conflicts {
        let dimensions: Vec<&str> = pair.dimensions.iter().map(|d| d.as_str()).collect();
        println!(
            "{} {:<16} {} ↔ {}",
            severity_label(pair.severity()),
            pair.kind.to_string(),
            pair.policy_a.cyan(),
            pair.policy_b.cyan()
        );
        if !dimensions.is_empty() {
            println!("         dimensions: {}", dimensions.join(", "));
        }
        println!("         {}", pair.explanation.dimmed());
    }
}

pub(crate) fn print_recommendations(advisories: &[ValidationIssue]) {
    println!("\n{}", "Recommendations:".bold());
    println!("{}", "─".repeat(110));
    for issue in advisories {
        println!(
            "{} {:<8} {}",
            "•".cyan(),
            issue.code,
            issue.message.dimmed()
        );
    }
}

pub(crate) fn print_analysis(analysis: &Analysis) {
    if !analysis.advisories.is_empty() {
        print_recommendations(analysis.advisories.issues());
    }
    if analysis.report.is_empty() && analysis.conflicts.is_empty() {
        println!("\n{} No issues found", "✓".green());
        return;
    }

    if !analysis.report.is_empty() {
        print_issues(analysis.report.issues());
    }
    if !analysis.conflicts.is_empty() {
        print_conflicts(&analysis.conflicts);
    }

    let counts = analysis.report.counts();
    println!("{}", "─".repeat(110));
    println!(
        "{} {} critical, {} high, {} medium, {} info, {} conflict(s)",
        "→".cyan(),
        counts.critical.to_string().red().bold(),
        counts.high.to_string().red(),
        counts.medium.to_string().yellow(),
        counts.info,
        analysis.conflicts.len()
    );
    if analysis.report.has_blocking() {
        println!("{} Blocking issues must be fixed before deploying", "✗".red());
    }
}
