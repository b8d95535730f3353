//! Compensating rollback of an executed migration.
//!
//! Walks the executed-actions record in reverse order. Reversible actions
//! are undone by deleting the created entity; non-reversible actions
//! (pushes, commits, issue and PR creations) are counted and skipped.

use crate::apply::actions::ActionRunner;
use crate::apply::stage::ExecutedActionRecord;
use crate::artifacts::read_json;
use crate::github::GitHubApi;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub status: String,
    pub rolled_back: usize,
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<RollbackEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub action_id: String,
    pub action_type: crate::plan::ActionKind,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Roll back a migration from its `executed_actions.json` file.
pub async fn rollback_migration_file(
    github: Arc<dyn GitHubApi>,
    github_token: &str,
    executed_actions_file: &Path,
) -> Result<RollbackReport> {
    let records: Vec<ExecutedActionRecord> = read_json(executed_actions_file)?;
    let work_dir = executed_actions_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let runner = ActionRunner::new(github, github_token, work_dir.clone(), work_dir);
    rollback_records(&runner, &records).await
}

/// Roll back from in-memory records, newest first.
pub async fn rollback_records(
    runner: &ActionRunner,
    records: &[ExecutedActionRecord],
) -> Result<RollbackReport> {
    let mut rolled_back = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    let mut details = Vec::new();

    for record in records.iter().rev() {
        // Only successfully executed, reversible actions with rollback
        // data can be undone.
        if !record.success {
            continue;
        }
        let data = record
            .rollback_data
            .as_ref()
            .filter(|_| record.reversible);
        let Some(data) = data else {
            skipped += 1;
            details.push(RollbackEntry {
                action_id: record.action_id.clone(),
                action_type: record.action_type,
                outcome: "skipped".into(),
                error: None,
            });
            continue;
        };

        match runner.rollback(record.action_type, data).await {
            Ok(true) => {
                rolled_back += 1;
                tracing::info!(
                    action_id = %record.action_id,
                    kind = %record.action_type,
                    "Rolled back action"
                );
                details.push(RollbackEntry {
                    action_id: record.action_id.clone(),
                    action_type: record.action_type,
                    outcome: "rolled_back".into(),
                    error: None,
                });
            }
            Ok(false) => {
                skipped += 1;
                details.push(RollbackEntry {
                    action_id: record.action_id.clone(),
                    action_type: record.action_type,
                    outcome: "skipped".into(),
                    error: None,
                });
            }
            Err(e) => {
                failed += 1;
                tracing::error!(
                    action_id = %record.action_id,
                    error = %e.message,
                    "Rollback failed"
                );
                details.push(RollbackEntry {
                    action_id: record.action_id.clone(),
                    action_type: record.action_type,
                    outcome: "failed".into(),
                    error: Some(e.message),
                });
            }
        }
    }

    let status = if failed == 0 {
        "success"
    } else if rolled_back > 0 {
        "partial"
    } else {
        "failed"
    };

    Ok(RollbackReport {
        status: status.into(),
        rolled_back,
        skipped,
        failed,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::actions::ApplyContext;
    use crate::github::mock::MockGitHub;
    use crate::plan::models::{Action, ActionParams, Phase};
    use serde_json::json;
    use std::path::PathBuf;

    fn make_action(id: &str, params: ActionParams) -> Action {
        let kind = params.kind();
        Action {
            id: id.into(),
            kind,
            component: "test".into(),
            phase: Phase::Foundation,
            description: String::new(),
            dependencies: vec![],
            idempotency_key: format!("{}-{id}", kind.as_str()),
            parameters: params,
            dry_run_safe: true,
            reversible: kind.is_reversible(),
            estimated_duration_seconds: 1,
            requires_user_input: false,
            skip_if: None,
        }
    }

    #[tokio::test]
    async fn test_rollback_undoes_created_entities_in_reverse() {
        let github = Arc::new(MockGitHub::new());
        let runner = ActionRunner::new(
            github.clone(),
            "ghp_x",
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp"),
        );
        let mut ctx = ApplyContext::default();

        // Execute repo + label + release, collecting records.
        let actions = vec![
            make_action(
                "action-0001",
                ActionParams::RepoCreate {
                    org: "acme".into(),
                    name: "widget".into(),
                    description: String::new(),
                    private: true,
                    has_issues: true,
                    has_wiki: false,
                },
            ),
            make_action(
                "action-0002",
                ActionParams::LabelCreate {
                    target_repo: "acme/widget".into(),
                    name: "bug".into(),
                    color: "f00".into(),
                    description: String::new(),
                },
            ),
            make_action(
                "action-0003",
                ActionParams::ReleaseCreate {
                    target_repo: "acme/widget".into(),
                    tag_name: "v1".into(),
                    name: "v1".into(),
                    body: String::new(),
                    draft: false,
                    prerelease: false,
                },
            ),
        ];

        let mut records = Vec::new();
        for action in &actions {
            let result = runner.execute(action, &mut ctx).await.unwrap();
            assert!(result.success);
            records.push(ExecutedActionRecord {
                action_id: action.id.clone(),
                action_type: action.kind,
                idempotency_key: action.idempotency_key.clone(),
                reversible: action.kind.is_reversible(),
                success: true,
                rollback_data: result.rollback_data.clone(),
            });
        }

        let report = rollback_records(&runner, &records).await.unwrap();
        assert_eq!(report.status, "success");
        assert_eq!(report.rolled_back, 3);
        assert_eq!(report.failed, 0);

        // Everything reversible is gone.
        assert!(github.repos.read().await.is_empty());
        assert!(github
            .releases
            .read()
            .await
            .get("acme/widget")
            .map(|r| r.is_empty())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn test_issue_and_pr_creations_skipped_not_tombstoned() {
        let github = Arc::new(MockGitHub::new());
        let issue = github
            .create_issue("acme/widget", "Crash", "boom", &[], None, &[])
            .await
            .unwrap();
        let writes_before = github.total_writes();

        let runner = ActionRunner::new(
            github.clone(),
            "ghp_x",
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp"),
        );
        let records = vec![ExecutedActionRecord {
            action_id: "action-0003".into(),
            action_type: crate::plan::ActionKind::IssueCreate,
            idempotency_key: "issue_create-7-deadbeef".into(),
            reversible: crate::plan::ActionKind::IssueCreate.is_reversible(),
            success: true,
            rollback_data: Some(json!({
                "repo": "acme/widget",
                "issue_number": issue.number,
            })),
        }];

        let report = rollback_records(&runner, &records).await.unwrap();
        assert_eq!(report.rolled_back, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.details[0].outcome, "skipped");

        // The migrated issue was left untouched: still open, no comment.
        assert_eq!(github.total_writes(), writes_before);
        let issues = github.issues.read().await;
        assert_eq!(issues["acme/widget"][0].state, "open");
        assert!(issues["acme/widget"][0].comments.is_empty());
    }

    #[tokio::test]
    async fn test_non_reversible_counted_not_attempted() {
        let github = Arc::new(MockGitHub::new());
        let runner = ActionRunner::new(
            github.clone(),
            "ghp_x",
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp"),
        );

        let records = vec![ExecutedActionRecord {
            action_id: "action-0002".into(),
            action_type: crate::plan::ActionKind::RepoPush,
            idempotency_key: "repo_push-x".into(),
            reversible: false,
            success: true,
            rollback_data: None,
        }];

        let report = rollback_records(&runner, &records).await.unwrap();
        assert_eq!(report.rolled_back, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(github.total_writes(), 0);
    }

    #[tokio::test]
    async fn test_failed_actions_ignored() {
        let github = Arc::new(MockGitHub::new());
        let runner = ActionRunner::new(
            github,
            "ghp_x",
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp"),
        );

        let records = vec![ExecutedActionRecord {
            action_id: "action-0001".into(),
            action_type: crate::plan::ActionKind::RepoCreate,
            idempotency_key: "repo_create-x".into(),
            reversible: true,
            success: false,
            rollback_data: None,
        }];

        let report = rollback_records(&runner, &records).await.unwrap();
        assert_eq!(report.rolled_back, 0);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed, 0);
    }
}
