//! Plan and apply behavior through the public API: key determinism, cycle
//! guards, dependency ordering, and the dry-run/apply report contracts.
//! Run with: cargo test --test plan_apply_tests

use migration_orchestrator::apply::{ApplyOptions, ApplyStage};
use migration_orchestrator::artifacts::ArtifactTree;
use migration_orchestrator::export::ExportData;
use migration_orchestrator::github::mock::MockGitHub;
use migration_orchestrator::plan::{ActionKind, DependencyGraph, PlanStage};
use migration_orchestrator::transform::content::TransformedIssue;
use migration_orchestrator::transform::labels::TransformedLabel;
use migration_orchestrator::transform::TransformData;
use migration_orchestrator::StageStatus;
use std::sync::Arc;

fn export_fixture() -> ExportData {
    ExportData {
        project_id: 42,
        project_path: "group/widget".into(),
        default_branch: "main".into(),
        visibility: "private".into(),
        ..Default::default()
    }
}

fn transform_fixture() -> TransformData {
    let mut transform = TransformData::default();
    transform.labels = vec![
        TransformedLabel {
            name: "bug".into(),
            color: "ff0000".into(),
            description: String::new(),
        },
        TransformedLabel {
            name: "feature".into(),
            color: "00ff00".into(),
            description: String::new(),
        },
    ];
    transform.issues = (1..=5)
        .map(|iid| TransformedIssue {
            gitlab_iid: iid,
            title: format!("Issue {iid}"),
            state: "open".into(),
            labels: vec!["bug".into()],
            ..Default::default()
        })
        .collect();
    transform
}

#[test]
fn plan_json_stable_across_runs_modulo_timestamp() {
    let export = export_fixture();
    let transform = transform_fixture();

    let render = || {
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        PlanStage::new()
            .run("run-7", "group/widget", "acme/widget", &export, &transform, &tree)
            .unwrap();
        let mut doc: serde_json::Value =
            migration_orchestrator::artifacts::read_json(&dir.path().join("plan/plan.json"))
                .unwrap();
        doc["created_at"] = serde_json::Value::Null;
        doc
    };

    assert_eq!(render(), render());
}

#[test]
fn topological_order_respects_every_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let tree = ArtifactTree::new(dir.path());
    let output = PlanStage::new()
        .run(
            "run-7",
            "group/widget",
            "acme/widget",
            &export_fixture(),
            &transform_fixture(),
            &tree,
        )
        .unwrap();

    let position = |id: &str| {
        output
            .plan
            .actions
            .iter()
            .position(|a| a.id == id)
            .unwrap_or(usize::MAX)
    };
    for action in &output.plan.actions {
        let own = position(&action.id);
        for dep in &action.dependencies {
            assert!(
                position(dep) < own,
                "{} ordered before its dependency {dep}",
                action.id
            );
        }
    }
}

#[test]
fn artificial_cycle_detected_before_sorting() {
    let mut graph = DependencyGraph::new();
    graph.add_node("action-0001");
    graph.add_node("action-0002");
    graph.add_dependency("action-0001", "action-0002");
    graph.add_dependency("action-0002", "action-0001");

    let err = graph.topological_sort().unwrap_err().to_string();
    assert!(err.contains("action-0001"));
    assert!(err.contains("action-0002"));
}

#[tokio::test]
async fn dry_run_then_real_apply_converge() {
    let dir = tempfile::tempdir().unwrap();
    let tree = ArtifactTree::new(dir.path());
    let output = PlanStage::new()
        .run(
            "run-7",
            "group/widget",
            "acme/widget",
            &export_fixture(),
            &transform_fixture(),
            &tree,
        )
        .unwrap();

    let github = Arc::new(MockGitHub::new());
    let stage = ApplyStage::new(github.clone(), "ghp_x");

    // Dry run predicts, writes nothing.
    let dry = stage
        .run(
            &output.plan,
            &tree,
            ApplyOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(dry.dry_run);
    assert_eq!(github.total_writes(), 0);

    // Real apply creates labels and issues (repo_push fails without a
    // bundle, which only blocks the preservation commit).
    let real = stage
        .run(&output.plan, &tree, ApplyOptions::default())
        .await
        .unwrap();
    assert_eq!(real.status, StageStatus::Partial);
    assert_eq!(github.labels.read().await["acme/widget"].len(), 2);
    assert_eq!(github.issues.read().await["acme/widget"].len(), 5);

    // Every issue got an id mapping.
    for iid in 1..=5u64 {
        assert!(real.id_mappings["issue"].contains_key(&iid.to_string()));
    }

    // A second apply over the same destination short-circuits creations:
    // nothing is duplicated.
    let again = stage
        .run(&output.plan, &tree, ApplyOptions::default())
        .await
        .unwrap();
    assert_ne!(again.status, StageStatus::Failed);
    assert_eq!(github.labels.read().await["acme/widget"].len(), 2);
    assert_eq!(github.repos.read().await.len(), 1);
}

#[tokio::test]
async fn failed_action_does_not_abort_loop() {
    let dir = tempfile::tempdir().unwrap();
    let tree = ArtifactTree::new(dir.path());
    let output = PlanStage::new()
        .run(
            "run-7",
            "group/widget",
            "acme/widget",
            &export_fixture(),
            &transform_fixture(),
            &tree,
        )
        .unwrap();

    let github = Arc::new(MockGitHub::new());
    // Labels permanently fail; issues depending on them report unmet
    // dependencies, but independent actions still succeed.
    github
        .fail(
            "create_label",
            migration_orchestrator::error::classify_status(
                migration_orchestrator::error::Forge::GitHub,
                422,
                "label rejected",
                None,
                None,
            ),
            u32::MAX,
        )
        .await;

    let stage = ApplyStage::new(github.clone(), "ghp_x");
    let result = stage
        .run(&output.plan, &tree, ApplyOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, StageStatus::Partial);
    let label_failures = result
        .results
        .iter()
        .filter(|r| r.action_type == ActionKind::LabelCreate && !r.success)
        .count();
    assert_eq!(label_failures, 2);
    // The repository was still created.
    assert!(github.repos.read().await.contains_key("acme/widget"));
}
