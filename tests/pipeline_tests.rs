//! End-to-end pipeline tests over the in-memory mock forges.
//!
//! These exercise the seed scenarios: a minimal project through
//! plan/dry-run/apply/verify, masked-variable user inputs, issue
//! attachments with id mapping, and rollback after an apply.
//! Run with: cargo test --test pipeline_tests

use migration_orchestrator::apply::rollback_migration_file;
use migration_orchestrator::config::{MigrationConfig, Scope};
use migration_orchestrator::gitlab::mock::MockGitLab;
use migration_orchestrator::gitlab::models::{
    CiVariable, Environment, Issue, Label, Project, UserRef,
};
use migration_orchestrator::github::mock::MockGitHub;
use migration_orchestrator::pipeline::{MigrationMode, PipelineOrchestrator, StageName};
use migration_orchestrator::StageStatus;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn config_for(root: &Path) -> MigrationConfig {
    MigrationConfig {
        run_id: "itest-run".into(),
        gitlab_url: "https://gl.example".into(),
        gitlab_token: "glpat-itest-token".into(),
        github_token: "ghp_itest_token".into(),
        github_org: "acme".into(),
        scope: Scope::Project(42),
        artifact_root: root.to_path_buf(),
        resume: false,
        max_retries: 1,
        retry_delay_secs: 0,
        timeouts: Default::default(),
        verify_tolerance: 0.05,
    }
}

/// A minimal empty project: repository only, default branch `main`,
/// private visibility.
async fn minimal_gitlab() -> Arc<MockGitLab> {
    Arc::new(
        MockGitLab::new()
            .with_project(Project {
                id: 42,
                path_with_namespace: "group/widget".into(),
                name: "widget".into(),
                visibility: "private".into(),
                default_branch: Some("main".into()),
                issues_enabled: true,
                merge_requests_enabled: true,
                ..Default::default()
            })
            .await,
    )
}

#[tokio::test]
async fn minimal_project_plan_has_create_then_push() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        minimal_gitlab().await,
        Arc::new(MockGitHub::new()),
        config_for(dir.path()),
    );

    let result = orchestrator
        .run_migration(MigrationMode::PlanOnly, None)
        .await;
    assert_ne!(result.status, StageStatus::Failed);

    let plan: serde_json::Value =
        migration_orchestrator::artifacts::read_json(&dir.path().join("plan/plan.json")).unwrap();
    let actions = plan["actions"].as_array().unwrap();
    assert_eq!(actions[0]["type"], "repo_create");
    assert_eq!(actions[1]["type"], "repo_push");
    assert!(plan["validation"]["no_circular_dependencies"].as_bool().unwrap());
    assert!(plan["validation"]["all_dependencies_resolvable"].as_bool().unwrap());
}

#[tokio::test]
async fn minimal_project_dry_run_then_apply_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let github = Arc::new(MockGitHub::new());

    // Dry run first: no writes at all.
    let orchestrator = PipelineOrchestrator::new(
        minimal_gitlab().await,
        github.clone(),
        config_for(dir.path()),
    );
    let result = orchestrator.run_migration(MigrationMode::DryRun, None).await;
    assert_ne!(result.status, StageStatus::Failed);
    assert_eq!(github.total_writes(), 0);

    let report: serde_json::Value = migration_orchestrator::artifacts::read_json(
        &dir.path().join("apply/dry_run_report.json"),
    )
    .unwrap();
    assert!(report["summary"]["would_create"].as_u64().unwrap() >= 1);

    // Apply: the repo is created (repo_push fails without a git server,
    // which keeps the run partial but the repository exists).
    let result = orchestrator.run_migration(MigrationMode::Apply, None).await;
    assert_ne!(result.status, StageStatus::Failed);
    assert!(github.repos.read().await.contains_key("acme/widget"));

    // Verify-only run loads expected state from the plan artifacts.
    github
        .branches
        .write()
        .await
        .insert("acme/widget".into(), vec!["main".into()]);
    let result = orchestrator.run_migration(MigrationMode::Verify, None).await;
    assert!(result.verify_status.is_some());
}

#[tokio::test]
async fn masked_variable_becomes_required_user_input() {
    let dir = tempfile::tempdir().unwrap();
    let gitlab = minimal_gitlab().await;
    gitlab.environments.write().await.insert(
        42,
        vec![Environment {
            id: 1,
            name: "production".into(),
            state: "available".into(),
        }],
    );
    gitlab.variables.write().await.insert(
        42,
        vec![CiVariable {
            key: "DATABASE_URL".into(),
            value: None,
            masked: true,
            environment_scope: "production".into(),
            ..Default::default()
        }],
    );

    let orchestrator = PipelineOrchestrator::new(
        gitlab,
        Arc::new(MockGitHub::new()),
        config_for(dir.path()),
    );
    let result = orchestrator
        .run_migration(MigrationMode::PlanOnly, None)
        .await;
    assert_ne!(result.status, StageStatus::Failed);

    let plan: serde_json::Value =
        migration_orchestrator::artifacts::read_json(&dir.path().join("plan/plan.json")).unwrap();
    let actions = plan["actions"].as_array().unwrap();
    assert!(actions
        .iter()
        .any(|a| a["type"] == "environment_create"
            && a["parameters"]["name"] == "production"));
    let secret = actions
        .iter()
        .find(|a| a["type"] == "secret_set")
        .expect("secret_set action present");
    assert_eq!(secret["parameters"]["value"], "${USER_INPUT_REQUIRED}");
    assert_eq!(secret["requires_user_input"], true);

    let inputs: serde_json::Value = migration_orchestrator::artifacts::read_json(
        &dir.path().join("plan/user_inputs_required.json"),
    )
    .unwrap();
    let entry = inputs
        .as_array()
        .unwrap()
        .iter()
        .find(|i| i["type"] == "secret_value")
        .expect("secret_value input present");
    assert_eq!(entry["scope"], "environment");
    assert_eq!(entry["environment"], "production");
    assert_eq!(entry["required"], true);
}

#[tokio::test]
async fn issue_with_attachment_maps_ids_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let gitlab = minimal_gitlab().await;
    gitlab.issues.write().await.insert(
        42,
        vec![Issue {
            iid: 7,
            title: "Screenshot attached".into(),
            description: Some(
                "Broken layout ![shot](/uploads/abcdef1234/screenshot.png)".into(),
            ),
            state: "opened".into(),
            author: Some(UserRef {
                username: "alice".into(),
                ..Default::default()
            }),
            ..Default::default()
        }],
    );
    gitlab.labels.write().await.insert(
        42,
        vec![Label {
            name: "bug".into(),
            color: "#ff0000".into(),
            description: None,
        }],
    );

    let github = Arc::new(MockGitHub::new());
    let orchestrator =
        PipelineOrchestrator::new(gitlab, github.clone(), config_for(dir.path()));
    let result = orchestrator.run_migration(MigrationMode::Apply, None).await;
    assert_ne!(result.status, StageStatus::Failed);

    // Export downloaded the attachment under the hash-prefixed name.
    let attachment = dir
        .path()
        .join("export/issues/attachments/abcdef1234_screenshot.png");
    assert!(attachment.exists());
    let metadata: BTreeMap<String, String> = migration_orchestrator::artifacts::read_json(
        &dir.path().join("export/issues/attachment_metadata.json"),
    )
    .unwrap();
    assert_eq!(
        metadata["/uploads/abcdef1234/screenshot.png"],
        "issues/attachments/abcdef1234_screenshot.png"
    );

    // Apply created the destination issue and recorded the id mapping.
    let mappings: BTreeMap<String, BTreeMap<String, String>> =
        migration_orchestrator::artifacts::read_json(
            &dir.path().join("apply/id_mappings.json"),
        )
        .unwrap();
    let destination = mappings["issue"]["7"].parse::<u64>().unwrap();
    let issues = github.issues.read().await;
    assert!(issues["acme/widget"].iter().any(|i| i.number == destination));
    // The issue body references the exported attachment path, not the
    // source upload path.
    let migrated = issues["acme/widget"]
        .iter()
        .find(|i| i.number == destination)
        .unwrap();
    assert!(migrated.body.contains("issues/attachments/abcdef1234_screenshot.png"));
    assert!(!migrated.body.contains("/uploads/abcdef1234/"));
}

#[tokio::test]
async fn rollback_after_apply_removes_reversible_entities() {
    let dir = tempfile::tempdir().unwrap();
    let gitlab = minimal_gitlab().await;
    gitlab.labels.write().await.insert(
        42,
        vec![Label {
            name: "bug".into(),
            color: "#ff0000".into(),
            description: None,
        }],
    );

    let github = Arc::new(MockGitHub::new());
    let orchestrator =
        PipelineOrchestrator::new(gitlab, github.clone(), config_for(dir.path()));
    let result = orchestrator.run_migration(MigrationMode::Apply, None).await;
    assert_ne!(result.status, StageStatus::Failed);
    assert!(github.repos.read().await.contains_key("acme/widget"));

    let report = rollback_migration_file(
        github.clone(),
        "ghp_itest_token",
        &dir.path().join("apply/executed_actions.json"),
    )
    .await
    .unwrap();

    assert_eq!(report.status, "success");
    assert!(report.rolled_back >= 1);
    // Reversible created entities are gone.
    assert!(github.repos.read().await.is_empty());
}

#[tokio::test]
async fn export_resume_processes_each_item_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let gitlab = minimal_gitlab().await;
    gitlab.issues.write().await.insert(
        42,
        (1..=25)
            .map(|iid| Issue {
                iid,
                title: format!("Issue {iid}"),
                description: Some(format!("![f](/uploads/{iid:08x}cafe/f{iid}.png)")),
                state: "opened".into(),
                ..Default::default()
            })
            .collect(),
    );

    // First run: full export.
    let orchestrator = PipelineOrchestrator::new(
        gitlab.clone(),
        Arc::new(MockGitHub::new()),
        config_for(dir.path()),
    );
    let result = orchestrator
        .run_migration(MigrationMode::ExportOnly, None)
        .await;
    assert_ne!(result.status, StageStatus::Failed);
    let downloads_first = gitlab
        .download_count
        .load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(downloads_first, 25);

    // Second run with resume=true: completed components are skipped, so no
    // issue is processed (or downloaded) a second time.
    let mut config = config_for(dir.path());
    config.resume = true;
    let orchestrator = PipelineOrchestrator::new(
        gitlab.clone(),
        Arc::new(MockGitHub::new()),
        config,
    );
    let result = orchestrator
        .run_migration(MigrationMode::ExportOnly, None)
        .await;
    assert_ne!(result.status, StageStatus::Failed);
    let downloads_second = gitlab
        .download_count
        .load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(downloads_second, downloads_first);
}

#[tokio::test]
async fn token_never_persisted_in_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let gitlab = minimal_gitlab().await;
    gitlab.webhooks.write().await.insert(
        42,
        vec![migration_orchestrator::gitlab::models::Webhook {
            id: 1,
            url: "https://hooks.example/x".into(),
            token: Some("hook-token-secret".into()),
            push_events: true,
            ..Default::default()
        }],
    );

    let orchestrator = PipelineOrchestrator::new(
        gitlab,
        Arc::new(MockGitHub::new()),
        config_for(dir.path()),
    );
    orchestrator.run_migration(MigrationMode::Full, None).await;

    // No artifact anywhere contains either credential.
    for entry in walkdir::WalkDir::new(dir.path())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        assert!(
            !content.contains("glpat-itest-token"),
            "gitlab token leaked into {}",
            entry.path().display()
        );
        assert!(
            !content.contains("ghp_itest_token"),
            "github token leaked into {}",
            entry.path().display()
        );
    }
}

#[tokio::test]
async fn resume_from_stage_slices_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        minimal_gitlab().await,
        Arc::new(MockGitHub::new()),
        config_for(dir.path()),
    );

    // Run plan-only fully once so artifacts exist.
    let first = orchestrator
        .run_migration(MigrationMode::PlanOnly, None)
        .await;
    assert_ne!(first.status, StageStatus::Failed);

    // Resume from export: discovery is skipped but export re-derives the
    // project id from the configured scope.
    let resumed = orchestrator
        .run_migration(MigrationMode::PlanOnly, Some(StageName::Export))
        .await;
    assert!(!resumed.stages.contains_key("discovery"));
    assert!(resumed.stages.contains_key("export"));
    assert_ne!(resumed.status, StageStatus::Failed);
}
