//! Transform stage: convert exported GitLab data into GitHub shape.
//!
//! Pure with respect to its inputs: the stage reads the in-memory
//! `ExportData`, runs the per-concern converters, writes the transform
//! artifacts, and returns a `TransformData` for Plan. Per-item failures
//! degrade the stage to partial instead of aborting it.

pub mod ci;
pub mod content;
pub mod gaps;
pub mod labels;
pub mod protections;
pub mod users;
pub mod webhooks;

use crate::artifacts::{write_json, write_text, ArtifactTree};
use crate::export::ExportData;
use crate::StageStatus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use content::{ContentRewriter, TransformedIssue, TransformedPullRequest};
use gaps::{ConversionGap, GapAnalysis};
use labels::{TransformedLabel, TransformedMilestone};
use protections::TransformedProtection;
use users::{DestUser, SourceUser, UserMappingResult};
use webhooks::TransformedWebhook;

/// A workflow file ready to commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedWorkflow {
    pub name: String,
    /// Path inside the destination repository.
    pub target_path: String,
    pub content: String,
}

/// A secret destined for the repository or an environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedSecret {
    pub key: String,
    /// `repository` or `environment`.
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// `None` when the source value is masked or unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub masked: bool,
}

/// Everything Plan needs from the transform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformData {
    pub workflows: Vec<TransformedWorkflow>,
    pub ci_jobs: Vec<String>,
    pub user_mappings: UserMappingResult,
    pub issues: Vec<TransformedIssue>,
    pub pull_requests: Vec<TransformedPullRequest>,
    pub labels: Vec<TransformedLabel>,
    pub milestones: Vec<TransformedMilestone>,
    pub branch_protections: Vec<TransformedProtection>,
    pub tag_protections: Vec<protections::TransformedTagProtection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeowners: Option<String>,
    pub webhooks: Vec<TransformedWebhook>,
    pub environments: Vec<String>,
    pub secrets: Vec<TransformedSecret>,
    /// Plain (non-secret) CI variables.
    pub variables: Vec<(String, Option<String>)>,
    pub gap_analysis: GapAnalysis,
    pub status: StageStatus,
}

pub struct TransformStage;

impl TransformStage {
    pub fn new() -> Self {
        Self
    }

    /// Run every converter over the export and write artifacts.
    ///
    /// `github_repo` is the `owner/name` target; `dest_members` are the
    /// destination org members used for user mapping (may be empty).
    pub fn run(
        &self,
        export: &ExportData,
        github_repo: &str,
        dest_members: &[DestUser],
        tree: &ArtifactTree,
    ) -> Result<TransformData> {
        let transform_dir = tree.transform_dir();
        std::fs::create_dir_all(&transform_dir)?;

        let mut data = TransformData::default();
        let mut all_gaps: Vec<ConversionGap> = Vec::new();

        // 1. CI conversion.
        if let Some(ci_yaml) = &export.gitlab_ci_yaml {
            match ci::convert_ci(ci_yaml, github_repo, &export.default_branch) {
                Ok(conversion) => {
                    let workflow = TransformedWorkflow {
                        name: "ci.yml".into(),
                        target_path: ".github/workflows/ci.yml".into(),
                        content: conversion.workflow_yaml,
                    };
                    let workflows_dir = transform_dir.join("workflows");
                    std::fs::create_dir_all(&workflows_dir)?;
                    write_text(&workflows_dir.join(&workflow.name), &workflow.content)?;
                    data.ci_jobs = conversion.job_names;
                    data.workflows.push(workflow);
                    all_gaps.extend(conversion.gaps);
                }
                Err(e) => {
                    tracing::error!(error = %e, "CI conversion failed");
                    all_gaps.push(ConversionGap::new(
                        "ci",
                        gaps::GapSeverity::Critical,
                        ".gitlab-ci.yml",
                        format!("CI configuration could not be converted: {}", e.message),
                    ));
                    data.status = StageStatus::Partial;
                }
            }
        }

        // 2. User mapping. Source users come from membership plus issue and
        // MR authorship, deduplicated by username.
        let source_users = collect_source_users(export);
        data.user_mappings = users::map_users(&source_users, dest_members);
        write_json(
            &transform_dir.join("user_mappings.json"),
            &data.user_mappings,
        )?;
        for username in &data.user_mappings.unmapped_users {
            tracing::warn!(username = %username, "No destination account match");
        }

        // 3/4. Content rewriting for issues and merge requests.
        let issue_rewriter = ContentRewriter::new(
            &data.user_mappings.mappings,
            &export.issue_attachments,
            &export.project_path,
        );
        data.issues = export
            .issues
            .iter()
            .map(|issue| issue_rewriter.transform_issue(issue))
            .collect();
        write_json(&transform_dir.join("issues_transformed.json"), &data.issues)?;

        let mr_rewriter = ContentRewriter::new(
            &data.user_mappings.mappings,
            &export.mr_attachments,
            &export.project_path,
        );
        data.pull_requests = export
            .merge_requests
            .iter()
            .map(|mr| mr_rewriter.transform_merge_request(mr, &export.default_branch))
            .collect();
        write_json(
            &transform_dir.join("pull_requests_transformed.json"),
            &data.pull_requests,
        )?;

        // 5. Labels and milestones.
        data.labels = labels::transform_labels(&export.labels);
        write_json(&transform_dir.join("labels.json"), &data.labels)?;
        data.milestones = labels::transform_milestones(&export.milestones);
        write_json(&transform_dir.join("milestones.json"), &data.milestones)?;

        // 6. Protections.
        let protection_conversion = protections::transform_protections(
            &export.protected_branches,
            &export.protected_tags,
            &export.members,
            &data.ci_jobs,
        );
        let protection_dir = transform_dir.join("protection");
        std::fs::create_dir_all(&protection_dir)?;
        write_json(
            &protection_dir.join("branch_protections.json"),
            &protection_conversion.branch_protections,
        )?;
        write_json(
            &protection_dir.join("tag_protections.json"),
            &protection_conversion.tag_protections,
        )?;
        if let Some(codeowners) = &protection_conversion.codeowners {
            write_text(&protection_dir.join("CODEOWNERS"), codeowners)?;
        }
        data.branch_protections = protection_conversion.branch_protections;
        data.tag_protections = protection_conversion.tag_protections;
        data.codeowners = protection_conversion.codeowners;
        all_gaps.extend(protection_conversion.gaps);

        // 7. Webhooks.
        let webhook_conversion = webhooks::transform_webhooks(&export.webhooks);
        write_json(
            &transform_dir.join("webhooks_transformed.json"),
            &webhook_conversion.webhooks,
        )?;
        for warning in &webhook_conversion.warnings {
            tracing::warn!("{warning}");
        }
        data.webhooks = webhook_conversion.webhooks;
        all_gaps.extend(webhook_conversion.gaps);

        // CI variables split into secrets and plain variables.
        data.environments = export
            .environments
            .iter()
            .map(|e| e.name.clone())
            .collect();
        for variable in &export.variables {
            let scoped_environment = (variable.environment_scope != "*"
                && !variable.environment_scope.is_empty())
            .then(|| variable.environment_scope.clone());

            if variable.masked || variable.protected || scoped_environment.is_some() {
                data.secrets.push(TransformedSecret {
                    key: variable.key.clone(),
                    scope: if scoped_environment.is_some() {
                        "environment".into()
                    } else {
                        "repository".into()
                    },
                    environment: scoped_environment,
                    value: if variable.masked {
                        None
                    } else {
                        variable.value.clone()
                    },
                    masked: variable.masked,
                });
            } else {
                data.variables
                    .push((variable.key.clone(), variable.value.clone()));
            }
        }

        // Schedules have no destination equivalent beyond cron triggers.
        for schedule in &export.schedules {
            all_gaps.push(
                ConversionGap::new(
                    "ci",
                    gaps::GapSeverity::Info,
                    format!("schedule:{}", schedule.description),
                    format!("Pipeline schedule '{}' ({})", schedule.description, schedule.cron),
                )
                .with_recommendation("Recreate as a workflow schedule trigger"),
            );
        }

        // 8. Gap analysis over everything.
        let source_only: Vec<String> = if export.packages.is_empty() {
            Vec::new()
        } else {
            vec!["package registry".to_string()]
        };
        data.gap_analysis = gaps::analyze(all_gaps, &source_only);
        write_json(
            &transform_dir.join("conversion_gaps.json"),
            &data.gap_analysis,
        )?;
        write_text(
            &transform_dir.join("conversion_gaps.md"),
            &gaps::render_report(&data.gap_analysis),
        )?;

        if data.status != StageStatus::Partial {
            data.status = StageStatus::Success;
        }
        tracing::info!(
            workflows = data.workflows.len(),
            issues = data.issues.len(),
            pull_requests = data.pull_requests.len(),
            gaps = data.gap_analysis.summary.total,
            "Transform completed"
        );

        Ok(data)
    }
}

impl Default for TransformStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Gather the distinct source users referenced anywhere in the export.
fn collect_source_users(export: &ExportData) -> Vec<SourceUser> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut users = Vec::new();

    let mut push = |username: &str, email: Option<String>, name: &str| {
        if !username.is_empty() && seen.insert(username.to_string()) {
            users.push(SourceUser {
                username: username.to_string(),
                email,
                name: name.to_string(),
            });
        }
    };

    for member in &export.members {
        push(&member.username, member.email.clone(), &member.name);
    }
    for issue in &export.issues {
        if let Some(author) = &issue.author {
            push(&author.username, author.email.clone(), &author.name);
        }
        for assignee in &issue.assignees {
            push(&assignee.username, assignee.email.clone(), &assignee.name);
        }
        for note in &issue.notes {
            if let Some(author) = &note.author {
                push(&author.username, author.email.clone(), &author.name);
            }
        }
    }
    for mr in &export.merge_requests {
        if let Some(author) = &mr.author {
            push(&author.username, author.email.clone(), &author.name);
        }
        for discussion in &mr.discussions {
            for note in &discussion.notes {
                if let Some(author) = &note.author {
                    push(&author.username, author.email.clone(), &author.name);
                }
            }
        }
    }

    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::models::*;

    fn sample_export() -> ExportData {
        ExportData {
            project_id: 42,
            project_path: "group/widget".into(),
            default_branch: "main".into(),
            visibility: "private".into(),
            gitlab_ci_yaml: Some("build:\n  stage: test\n  script:\n    - make\n".into()),
            labels: vec![Label {
                name: "bug".into(),
                color: "#ff0000".into(),
                description: None,
            }],
            milestones: vec![Milestone {
                title: "v1".into(),
                state: "active".into(),
                ..Default::default()
            }],
            issues: vec![Issue {
                iid: 7,
                title: "Crash".into(),
                description: Some("hi @alice".into()),
                state: "opened".into(),
                author: Some(UserRef {
                    username: "alice".into(),
                    email: Some("alice@example.com".into()),
                    name: "Alice".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            variables: vec![
                CiVariable {
                    key: "DATABASE_URL".into(),
                    value: None,
                    masked: true,
                    environment_scope: "production".into(),
                    ..Default::default()
                },
                CiVariable {
                    key: "LOG_LEVEL".into(),
                    value: Some("info".into()),
                    environment_scope: "*".into(),
                    ..Default::default()
                },
            ],
            environments: vec![Environment {
                id: 1,
                name: "production".into(),
                state: "available".into(),
            }],
            webhooks: vec![Webhook {
                url: "https://hooks.example/x".into(),
                push_events: true,
                enable_ssl_verification: true,
                ..Default::default()
            }],
            protected_branches: vec![ProtectedBranch {
                name: "main".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_transform_produces_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let export = sample_export();

        let members = vec![DestUser {
            login: "alice-gh".into(),
            email: Some("alice@example.com".into()),
            name: Some("Alice".into()),
        }];

        let data = TransformStage::new()
            .run(&export, "acme/widget", &members, &tree)
            .unwrap();

        assert_eq!(data.status, StageStatus::Success);
        assert_eq!(data.workflows.len(), 1);
        assert_eq!(data.ci_jobs, vec!["build"]);
        assert_eq!(data.labels[0].color, "ff0000");
        assert_eq!(data.milestones[0].state, "open");

        for artifact in [
            "transform/workflows/ci.yml",
            "transform/user_mappings.json",
            "transform/issues_transformed.json",
            "transform/pull_requests_transformed.json",
            "transform/labels.json",
            "transform/milestones.json",
            "transform/protection/branch_protections.json",
            "transform/webhooks_transformed.json",
            "transform/conversion_gaps.json",
            "transform/conversion_gaps.md",
        ] {
            assert!(dir.path().join(artifact).exists(), "missing {artifact}");
        }
    }

    #[test]
    fn test_mention_rewritten_via_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let members = vec![DestUser {
            login: "alice-gh".into(),
            email: Some("alice@example.com".into()),
            name: None,
        }];

        let data = TransformStage::new()
            .run(&sample_export(), "acme/widget", &members, &tree)
            .unwrap();

        assert!(data.issues[0].body.contains("@alice-gh"));
        assert!(data.issues[0]
            .body
            .contains("Originally created by alice"));
    }

    #[test]
    fn test_masked_variable_becomes_environment_secret_without_value() {
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let data = TransformStage::new()
            .run(&sample_export(), "acme/widget", &[], &tree)
            .unwrap();

        let secret = data
            .secrets
            .iter()
            .find(|s| s.key == "DATABASE_URL")
            .unwrap();
        assert_eq!(secret.scope, "environment");
        assert_eq!(secret.environment.as_deref(), Some("production"));
        assert!(secret.value.is_none());
        assert!(secret.masked);

        // Plain unmasked wildcard variable stays a variable.
        assert!(data.variables.iter().any(|(k, v)| k == "LOG_LEVEL"
            && v.as_deref() == Some("info")));
    }

    #[test]
    fn test_packages_present_produces_feature_gap() {
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let mut export = sample_export();
        export.packages = vec![Package {
            id: 1,
            name: "lib".into(),
            version: "1.0".into(),
            package_type: "maven".into(),
            files: vec![],
        }];

        let data = TransformStage::new()
            .run(&export, "acme/widget", &[], &tree)
            .unwrap();
        assert!(data
            .gap_analysis
            .gaps
            .iter()
            .any(|g| g.feature == "package registry"));
    }
}
