//! Reconciliation apply against an in-memory directory.

use async_trait::async_trait;
use capctl::error::RemoteFailure;
use capctl::policy::model::{self, Policy};
use capctl::policy::reconcile::{
    self, ApplyOutcome, DirectoryClient, PlanAction, RemotePolicy,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Directory backed by a map of id to policy, with scripted failures.
#[derive(Default)]
struct FakeDirectory {
    policies: Mutex<BTreeMap<String, RemotePolicy>>,
    failures: Mutex<HashMap<String, RemoteFailure>>,
    next_id: AtomicUsize,
    writes: AtomicUsize,
}

impl FakeDirectory {
    fn seeded(policies: &[&Policy]) -> Self {
        let directory = Self::default();
        for policy in policies {
            let id = directory.allocate_id();
            directory
                .policies
                .lock()
                .unwrap()
                .insert(id.clone(), RemotePolicy::mirror(id, policy));
        }
        directory
    }

    fn fail(&self, display_name: &str, failure: RemoteFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(display_name.to_string(), failure);
    }

    fn allocate_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn scripted_failure(&self, policy: &Policy) -> Option<RemoteFailure> {
        let name = reconcile::deployed_name(policy);
        self.failures.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn list(&self) -> Result<Vec<RemotePolicy>, RemoteFailure> {
        Ok(self.policies.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, policy: &Policy) -> Result<String, RemoteFailure> {
        tokio::task::yield_now().await;
        if let Some(failure) = self.scripted_failure(policy) {
            return Err(failure);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let id = self.allocate_id();
        self.policies
            .lock()
            .unwrap()
            .insert(id.clone(), RemotePolicy::mirror(id.clone(), policy));
        Ok(id)
    }

    async fn update(&self, id: &str, policy: &Policy) -> Result<(), RemoteFailure> {
        tokio::task::yield_now().await;
        if let Some(failure) = self.scripted_failure(policy) {
            return Err(failure);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut policies = self.policies.lock().unwrap();
        match policies.get_mut(id) {
            Some(existing) => {
                *existing = RemotePolicy::mirror(id, policy);
                Ok(())
            }
            None => Err(RemoteFailure::Rejected(format!("no policy {id}"))),
        }
    }
}

fn policy(name: &str, display_name: &str, controls: &[&str]) -> Policy {
    model::parse(
        &json!({
            "name": name,
            "displayName": display_name,
            "state": "enabled",
            "metadata": { "owner": "identity", "ticketId": "SEC-1", "justification": "baseline" },
            "conditions": {
                "users": { "includeUsers": ["All"], "excludeGroups": ["sg-breakglass"] },
                "applications": { "includeApplications": ["All"] }
            },
            "grantControls": { "operator": "OR", "builtInControls": controls }
        }),
        "policies/test.yaml",
    )
    .unwrap()
}

#[tokio::test]
async fn test_apply_creates_updates_and_skips_unchanged() {
    let unchanged = policy("en-prd-ca-allusers-mfa-001", "MFA everyone", &["mfa"]);
    let deployed = policy("en-prd-ca-admins-mfa-002", "MFA admins", &["mfa"]);
    let directory = FakeDirectory::seeded(&[&unchanged, &deployed]);

    let changed = policy(
        "en-prd-ca-admins-mfa-002",
        "MFA admins",
        &["mfa", "compliantDevice"],
    );
    let new = policy("en-prd-ca-guests-block-003", "Block guests", &["block"]);
    let local = vec![unchanged, changed, new];

    let remote = directory.list().await.unwrap();
    let plan = reconcile::plan(&local, &remote);
    let actions: Vec<PlanAction> = plan.items.iter().map(|i| i.action).collect();
    assert_eq!(
        actions,
        vec![PlanAction::NoOp, PlanAction::Update, PlanAction::Create]
    );

    let results = reconcile::apply(&plan, &local, &directory, 4).await;
    let names: Vec<&str> = results.iter().map(|r| r.policy_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "en-prd-ca-allusers-mfa-001",
            "en-prd-ca-admins-mfa-002",
            "en-prd-ca-guests-block-003"
        ]
    );
    assert_eq!(results[0].outcome, ApplyOutcome::Unchanged);
    assert!(matches!(results[1].outcome, ApplyOutcome::Applied { ref remote_id } if remote_id == "id-1"));
    assert!(matches!(results[2].outcome, ApplyOutcome::Applied { .. }));
    assert_eq!(directory.writes.load(Ordering::SeqCst), 2);

    // The directory now matches the declared set.
    let replanned = reconcile::plan(&local, &directory.list().await.unwrap());
    assert!(!replanned.has_changes());
}

#[tokio::test]
async fn test_rejected_item_does_not_stop_others() {
    let directory = FakeDirectory::default();
    directory.fail("Bad one", RemoteFailure::Rejected("invalid payload".into()));

    let local = vec![
        policy("en-prd-ca-allusers-mfa-001", "Good one", &["mfa"]),
        policy("en-prd-ca-admins-mfa-002", "Bad one", &["mfa"]),
        policy("en-prd-ca-guests-block-003", "Another good one", &["block"]),
    ];
    let plan = reconcile::plan(&local, &[]);
    let results = reconcile::apply(&plan, &local, &directory, 2).await;

    assert!(matches!(results[0].outcome, ApplyOutcome::Applied { .. }));
    match &results[1].outcome {
        ApplyOutcome::Failed { reason } => {
            assert_eq!(reason.class, "rejected");
            assert!(reason.detail.contains("invalid payload"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(results[2].outcome, ApplyOutcome::Applied { .. }));
}

#[tokio::test]
async fn test_auth_failure_skips_remaining_items() {
    let directory = FakeDirectory::default();
    directory.fail("Second", RemoteFailure::Auth("token expired".into()));

    let local = vec![
        policy("en-prd-ca-allusers-mfa-001", "First", &["mfa"]),
        policy("en-prd-ca-admins-mfa-002", "Second", &["mfa"]),
        policy("en-prd-ca-guests-block-003", "Third", &["block"]),
        policy("en-prd-ca-partners-block-004", "Fourth", &["block"]),
    ];
    let plan = reconcile::plan(&local, &[]);
    let results = reconcile::apply(&plan, &local, &directory, 1).await;

    assert!(matches!(results[0].outcome, ApplyOutcome::Applied { .. }));
    assert!(results[1].outcome.is_failure());
    assert_eq!(results[2].outcome, ApplyOutcome::Skipped);
    assert_eq!(results[3].outcome, ApplyOutcome::Skipped);
    assert_eq!(directory.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_only_policies_are_never_deleted() {
    let stray = policy("en-prd-ca-legacy-block-009", "Legacy block", &["block"]);
    let directory = FakeDirectory::seeded(&[&stray]);

    let local = vec![policy("en-prd-ca-allusers-mfa-001", "MFA everyone", &["mfa"])];
    let plan = reconcile::plan(&local, &directory.list().await.unwrap());
    assert_eq!(plan.notes.len(), 1);
    assert_eq!(plan.notes[0].code, reconcile::REMOTE_ONLY_POLICY);

    reconcile::apply(&plan, &local, &directory, 4).await;
    let remaining = directory.list().await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().any(|r| r.display_name() == "Legacy block"));
}

#[tokio::test]
async fn test_concurrency_zero_is_treated_as_one() {
    let directory = FakeDirectory::default();
    let local = vec![policy("en-prd-ca-allusers-mfa-001", "Only", &["mfa"])];
    let plan = reconcile::plan(&local, &[]);
    let results = reconcile::apply(&plan, &local, &directory, 0).await;
    assert!(matches!(results[0].outcome, ApplyOutcome::Applied { .. }));
}
