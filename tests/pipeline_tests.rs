//! End-to-end validation pipeline over the fixture documents and the sample
//! baseline shipped in `baseline/`.

use capctl::cmd::deploy::read_snapshot;
use capctl::cmd::{analyze_path, loader};
use capctl::config::baseline;
use capctl::policy::naming::NAME_MALFORMED;
use capctl::policy::reconcile::{self, PlanAction, REMOTE_ONLY_POLICY};
use capctl::policy::{Checks, Dimension, OverlapKind, POLICY_PARSE_ERROR, Severity};
use std::path::PathBuf;

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

#[test]
fn test_sample_baseline_loads() {
    let baseline = baseline::load(&repo_path("baseline"), true).unwrap();
    assert_eq!(baseline.compliance.rules().len(), 4);
    assert_eq!(
        baseline.compliance.break_glass_group.as_deref(),
        Some("sg-breakglass")
    );
    assert!(baseline.naming.scopes.contains("admins"));
    assert!(baseline.conflicts.is_exempt("group:sg-svc-accounts"));
    assert_eq!(baseline.best_practices.rules().len(), 6);
}

#[test]
fn test_valid_fixtures_pass_every_check() {
    let analysis = analyze_path(
        &repo_path("tests/fixtures/valid"),
        &repo_path("baseline"),
        Checks::all(),
    )
    .unwrap();

    assert_eq!(analysis.policies.len(), 3);
    assert!(analysis.report.is_empty(), "{:?}", analysis.report.issues());
    assert!(analysis.conflicts.is_empty(), "{:?}", analysis.conflicts);
    assert!(analysis.advisories.is_empty(), "{:?}", analysis.advisories.issues());
    assert!(!analysis.is_blocked(true));
}

#[test]
fn test_invalid_fixtures_report_in_document_order() {
    let analysis = analyze_path(
        &repo_path("tests/fixtures/invalid"),
        &repo_path("baseline"),
        Checks::all(),
    )
    .unwrap();

    let codes: Vec<&str> = analysis
        .report
        .issues()
        .iter()
        .map(|i| i.code.as_str())
        .collect();
    assert_eq!(
        codes,
        vec![
            POLICY_PARSE_ERROR,
            "CA-BREAKGLASS",
            NAME_MALFORMED,
            POLICY_PARSE_ERROR,
            "CA-ADMIN-MFA",
        ]
    );

    let issues = analysis.report.issues();
    assert!(issues[0].policy_name.ends_with("05-truncated.json"));
    assert_eq!(
        issues[1].message,
        "'en-prd-ca-allusers-mfa-002' targets all users but does not exclude break-glass group 'sg-breakglass'"
    );
    assert_eq!(issues[3].policy_name, "en-prd-ca-guests-block-001");
    assert_eq!(
        issues[4].message,
        "'en-prd-ca-admins-compliant-002' covers admins and must require mfa"
    );

    let counts = analysis.report.counts();
    assert_eq!(counts.critical, 4);
    assert_eq!(counts.high, 1);
    assert!(analysis.is_blocked(false));
}

#[test]
fn test_best_practice_recommendations() {
    let analysis = analyze_path(
        &repo_path("tests/fixtures/invalid"),
        &repo_path("baseline"),
        Checks {
            naming: false,
            compliance: false,
            conflicts: false,
            best_practices: true,
        },
    )
    .unwrap();

    let advisories: Vec<(&str, &str)> = analysis
        .advisories
        .issues()
        .iter()
        .map(|i| (i.code.as_str(), i.policy_name.as_str()))
        .collect();
    assert_eq!(
        advisories,
        vec![
            ("BP001", "en-prd-ca-allusers-mfa-002"),
            ("BP005", "en-prd-ca-allusers-mfa-002"),
            ("BP004", "en-prd-ca-admins-compliant-002"),
        ]
    );
    // Only the two unparseable documents gate the run.
    assert_eq!(analysis.report.len(), 2);
    assert!(analysis.report.issues().iter().all(|i| i.code == POLICY_PARSE_ERROR));
}

#[test]
fn test_invalid_fixtures_conflicts() {
    let analysis = analyze_path(
        &repo_path("tests/fixtures/invalid"),
        &repo_path("baseline"),
        Checks {
            naming: false,
            compliance: false,
            conflicts: true,
            best_practices: false,
        },
    )
    .unwrap();

    assert_eq!(analysis.conflicts.len(), 1);
    let pair = &analysis.conflicts[0];
    assert_eq!(pair.policy_a, "en-prd-ca-admins-compliant-002");
    assert_eq!(pair.policy_b, "en-prd-ca-allusers-mfa-002");
    assert_eq!(pair.kind, OverlapKind::Conflicting);
    assert_eq!(pair.severity(), Severity::High);
    assert_eq!(pair.dimensions, vec![Dimension::Users]);

    // Syntax errors are still reported when only conflicts are checked.
    assert_eq!(analysis.report.len(), 2);
}

#[test]
fn test_missing_policy_path_is_an_error() {
    let err = analyze_path(
        &repo_path("tests/fixtures/does-not-exist"),
        &repo_path("baseline"),
        Checks::all(),
    );
    assert!(err.is_err());
}

#[test]
fn test_loader_reads_sorted_paths() {
    let loaded = loader::load(&repo_path("tests/fixtures/valid")).unwrap();
    let sources: Vec<String> = loaded
        .documents
        .iter()
        .map(|d| {
            PathBuf::from(&d.source)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(
        sources,
        vec!["admins-mfa.yaml", "allusers-mfa.yaml", "legacy-block.json"]
    );
}

#[test]
fn test_plan_against_snapshot() {
    let analysis = analyze_path(
        &repo_path("tests/fixtures/valid"),
        &repo_path("baseline"),
        Checks::all(),
    )
    .unwrap();
    let remote = read_snapshot(&repo_path("tests/fixtures/remote-snapshot.json")).unwrap();
    let plan = reconcile::plan(&analysis.policies, &remote);

    let by_name = |name: &str| {
        plan.items
            .iter()
            .find(|i| i.policy_name == name)
            .unwrap()
    };

    assert_eq!(by_name("en-prd-ca-admins-mfa-001").action, PlanAction::Create);
    assert_eq!(by_name("en-prd-ca-allusers-mfa-001").action, PlanAction::NoOp);

    let legacy = by_name("en-prd-ca-legacy-block-001");
    assert_eq!(legacy.action, PlanAction::Update);
    assert_eq!(
        legacy.summary(),
        "state: enabledForReportingButNotEnforced → disabled"
    );
    assert_eq!(
        legacy.remote_id.as_deref(),
        Some("7f1c0d0e-0000-4000-8000-000000000002")
    );

    assert_eq!(plan.notes.len(), 1);
    assert_eq!(plan.notes[0].code, REMOTE_ONLY_POLICY);
    assert_eq!(plan.notes[0].severity, Severity::Info);
    assert_eq!(plan.notes[0].policy_name, "Old pilot policy");
}
