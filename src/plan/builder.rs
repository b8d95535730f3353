//! Plan generation from transform and export outputs.
//!
//! The builder emits typed actions phase by phase, wires dependencies,
//! assigns deterministic idempotency keys, discovers required user inputs,
//! and validates the dependency graph before the plan document is built.
//! Re-running with identical inputs produces byte-identical output modulo
//! the `created_at` timestamp.

use crate::artifacts::{write_json, write_text, ArtifactTree};
use crate::export::ExportData;
use crate::plan::graph::DependencyGraph;
use crate::plan::models::*;
use crate::transform::TransformData;
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Marker value for parameters the user must supply before apply.
pub const USER_INPUT_REQUIRED: &str = "${USER_INPUT_REQUIRED}";

/// Expected destination state, handed to Verify through the shared context.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExpectedState {
    pub repo: String,
    pub default_branch: String,
    pub min_branch_count: u64,
    pub issues_count: u64,
    pub pull_requests_count: u64,
    pub releases_count: u64,
    pub workflows_count: u64,
    pub environments: Vec<String>,
    pub secrets: Vec<String>,
    pub variables_count: u64,
    pub webhooks_count: u64,
    pub protected_branches: Vec<String>,
    pub labels_count: u64,
    pub milestones_count: u64,
    pub has_wiki: bool,
    pub has_codeowners: bool,
    pub preservation_paths: Vec<String>,
    pub packages_count: u64,
}

struct PlanBuilder {
    run_id: String,
    project_id: String,
    gitlab_project: String,
    github_target: String,
    actions: Vec<Action>,
    counter: usize,
    graph: DependencyGraph,
    user_inputs: Vec<UserInputRequest>,
}

impl PlanBuilder {
    fn new(run_id: &str, project_id: &str, gitlab_project: &str, github_target: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            project_id: project_id.to_string(),
            gitlab_project: gitlab_project.to_string(),
            github_target: github_target.to_string(),
            actions: Vec::new(),
            counter: 0,
            graph: DependencyGraph::new(),
            user_inputs: Vec::new(),
        }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("action-{:04}", self.counter)
    }

    /// `<type>-<cleaned_entity>-<8 hex of sha256(project:type:entity:extra)>`.
    ///
    /// The entity id comes from the parameters' stable identifier; it falls
    /// back to the action id, which still cannot collide within one plan.
    fn idempotency_key(&self, kind: ActionKind, entity: &str) -> String {
        let cleaned: String = entity
            .replace(['/', ':'], "-")
            .chars()
            .take(50)
            .collect();
        let data = format!("{}:{}:{entity}:", self.project_id, kind.as_str());
        let digest = Sha256::digest(data.as_bytes());
        format!("{}-{cleaned}-{}", kind.as_str(), &hex::encode(digest)[..8])
    }

    #[allow(clippy::too_many_arguments)]
    fn add_action(
        &mut self,
        params: ActionParams,
        component: &str,
        phase: Phase,
        description: String,
        dependencies: Vec<String>,
        dry_run_safe: bool,
        estimated_duration_seconds: u64,
        requires_user_input: bool,
        skip_if: Option<SkipCondition>,
    ) -> String {
        let id = self.next_id();
        let kind = params.kind();
        let entity = params.entity_id().unwrap_or_else(|| id.clone());
        let idempotency_key = self.idempotency_key(kind, &entity);

        self.graph.add_node(&id);
        for dep in &dependencies {
            self.graph.add_dependency(&id, dep);
        }

        self.actions.push(Action {
            id: id.clone(),
            kind,
            component: component.to_string(),
            phase,
            description,
            dependencies,
            idempotency_key,
            parameters: params,
            dry_run_safe,
            reversible: kind.is_reversible(),
            estimated_duration_seconds,
            requires_user_input,
            skip_if,
        });

        id
    }

    fn generate(&mut self, export: &ExportData, transform: &TransformData) -> Result<()> {
        let target = self.github_target.clone();
        let (org, repo_name) = target
            .split_once('/')
            .map(|(o, n)| (o.to_string(), n.to_string()))
            .unwrap_or_else(|| ("org".to_string(), target.clone()));

        // ------------------------------------------------------------------
        // Phase 1: Foundation
        // ------------------------------------------------------------------
        let repo_create = self.add_action(
            ActionParams::RepoCreate {
                org,
                name: repo_name,
                description: if export.description.is_empty() {
                    "Migrated from GitLab".to_string()
                } else {
                    export.description.clone()
                },
                private: export.visibility == "private",
                has_issues: true,
                has_wiki: export.has_wiki,
            },
            "repository",
            Phase::Foundation,
            format!("Create GitHub repository {target}"),
            vec![],
            true,
            5,
            false,
            None,
        );

        let repo_push = self.add_action(
            ActionParams::RepoPush {
                bundle_path: "export/repository/bundle.git".into(),
                target_repo: target.clone(),
            },
            "repository",
            Phase::Foundation,
            "Push git bundle to GitHub".into(),
            vec![repo_create.clone()],
            false,
            120,
            false,
            None,
        );

        if export.has_lfs {
            self.add_action(
                ActionParams::LfsConfigure {
                    target_repo: target.clone(),
                    lfs_objects_path: "export/repository/lfs/".into(),
                },
                "repository",
                Phase::Foundation,
                "Configure Git LFS and push objects".into(),
                vec![repo_push.clone()],
                false,
                180,
                false,
                Some(SkipCondition {
                    condition: "no_lfs".into(),
                    check: "lfs_objects_count == 0".into(),
                }),
            );
        }

        // ------------------------------------------------------------------
        // Phase 2: CI setup
        // ------------------------------------------------------------------
        for workflow in &transform.workflows {
            self.add_action(
                ActionParams::WorkflowCommit {
                    target_repo: target.clone(),
                    name: workflow.name.clone(),
                    target_path: workflow.target_path.clone(),
                    content: workflow.content.clone(),
                    branch: export.default_branch.clone(),
                    commit_message: format!(
                        "Add {} workflow (migrated from GitLab CI)",
                        workflow.name
                    ),
                },
                "ci",
                Phase::CiSetup,
                format!("Commit workflow: {}", workflow.name),
                vec![repo_push.clone()],
                false,
                10,
                false,
                None,
            );
        }

        let mut env_actions: BTreeMap<String, String> = BTreeMap::new();
        for environment in &transform.environments {
            let id = self.add_action(
                ActionParams::EnvironmentCreate {
                    target_repo: target.clone(),
                    name: environment.clone(),
                },
                "ci",
                Phase::CiSetup,
                format!("Create environment: {environment}"),
                vec![repo_create.clone()],
                true,
                5,
                false,
                None,
            );
            env_actions.insert(environment.clone(), id);
        }

        for secret in &transform.secrets {
            let requires_input = secret.value.is_none();
            if requires_input {
                self.user_inputs.push(UserInputRequest {
                    input_type: "secret_value".into(),
                    key: Some(secret.key.clone()),
                    url: None,
                    scope: Some(secret.scope.clone()),
                    environment: secret.environment.clone(),
                    reason: "GitLab variable was masked, value not retrievable".into(),
                    required: true,
                    fallback: None,
                });
            }

            let deps = secret
                .environment
                .as_ref()
                .and_then(|env| env_actions.get(env))
                .cloned()
                .unwrap_or_else(|| repo_create.clone());

            let scope_label = secret
                .environment
                .as_deref()
                .unwrap_or("repository")
                .to_string();
            self.add_action(
                ActionParams::SecretSet {
                    target_repo: target.clone(),
                    name: secret.key.clone(),
                    scope: secret.scope.clone(),
                    environment: secret.environment.clone(),
                    value: secret
                        .value
                        .clone()
                        .unwrap_or_else(|| USER_INPUT_REQUIRED.to_string()),
                    value_source: if requires_input {
                        "user_input".into()
                    } else {
                        "export".into()
                    },
                },
                "ci",
                Phase::CiSetup,
                format!("Set secret: {} ({scope_label})", secret.key),
                vec![deps],
                true,
                3,
                requires_input,
                None,
            );
        }

        for (name, value) in &transform.variables {
            let requires_input = value.is_none();
            self.add_action(
                ActionParams::VariableSet {
                    target_repo: target.clone(),
                    name: name.clone(),
                    value: value
                        .clone()
                        .unwrap_or_else(|| USER_INPUT_REQUIRED.to_string()),
                },
                "ci",
                Phase::CiSetup,
                format!("Set variable: {name}"),
                vec![repo_create.clone()],
                true,
                3,
                requires_input,
                None,
            );
        }

        for schedule in &export.schedules {
            self.add_action(
                ActionParams::ScheduleCreate {
                    target_repo: target.clone(),
                    name: schedule.description.clone(),
                    cron: schedule.cron.clone(),
                    target_ref: schedule.target_ref.clone(),
                },
                "ci",
                Phase::CiSetup,
                format!("Document pipeline schedule: {}", schedule.description),
                vec![repo_push.clone()],
                false,
                5,
                false,
                None,
            );
        }

        // ------------------------------------------------------------------
        // Phase 3: Issue setup
        // ------------------------------------------------------------------
        let mut label_actions: BTreeMap<String, String> = BTreeMap::new();
        for label in &transform.labels {
            let id = self.add_action(
                ActionParams::LabelCreate {
                    target_repo: target.clone(),
                    name: label.name.clone(),
                    color: label.color.clone(),
                    description: label.description.clone(),
                },
                "issues",
                Phase::IssueSetup,
                format!("Create label: {}", label.name),
                vec![repo_create.clone()],
                true,
                2,
                false,
                None,
            );
            label_actions.insert(label.name.clone(), id);
        }

        let mut milestone_actions: BTreeMap<String, String> = BTreeMap::new();
        for milestone in &transform.milestones {
            let id = self.add_action(
                ActionParams::MilestoneCreate {
                    target_repo: target.clone(),
                    title: milestone.title.clone(),
                    description: milestone.description.clone(),
                    due_on: milestone.due_on.clone(),
                    state: milestone.state.clone(),
                },
                "issues",
                Phase::IssueSetup,
                format!("Create milestone: {}", milestone.title),
                vec![repo_create.clone()],
                true,
                2,
                false,
                None,
            );
            milestone_actions.insert(milestone.title.clone(), id);
        }

        // ------------------------------------------------------------------
        // Phase 4: Issue import
        // ------------------------------------------------------------------
        for issue in &transform.issues {
            let mut deps = vec![repo_create.clone()];
            for label in &issue.labels {
                if let Some(id) = label_actions.get(label) {
                    deps.push(id.clone());
                }
            }
            if let Some(milestone) = &issue.milestone {
                if let Some(id) = milestone_actions.get(milestone) {
                    deps.push(id.clone());
                }
            }

            let truncated: String = issue.title.chars().take(80).collect();
            let ellipsis = if issue.title.chars().count() > 80 { "..." } else { "" };
            let issue_action = self.add_action(
                ActionParams::IssueCreate {
                    target_repo: target.clone(),
                    gitlab_issue_iid: issue.gitlab_iid,
                    title: issue.title.clone(),
                    body: issue.body.clone(),
                    labels: issue.labels.clone(),
                    milestone: issue.milestone.clone(),
                    assignees: issue.assignees.clone(),
                    state: issue.state.clone(),
                    comments: vec![],
                },
                "issues",
                Phase::IssueImport,
                format!("Import issue #{}: {truncated}{ellipsis}", issue.gitlab_iid),
                deps,
                false,
                5,
                false,
                None,
            );

            for comment in &issue.comments {
                self.add_action(
                    ActionParams::IssueCommentAdd {
                        target_repo: target.clone(),
                        gitlab_issue_iid: issue.gitlab_iid,
                        body: comment.body.clone(),
                    },
                    "issues",
                    Phase::IssueImport,
                    format!("Add comment to issue #{}", issue.gitlab_iid),
                    vec![issue_action.clone()],
                    false,
                    3,
                    false,
                    None,
                );
            }
        }

        // ------------------------------------------------------------------
        // Phase 5: PR import
        // ------------------------------------------------------------------
        for pr in &transform.pull_requests {
            let mut deps = vec![repo_push.clone()];
            for label in &pr.labels {
                if let Some(id) = label_actions.get(label) {
                    deps.push(id.clone());
                }
            }

            let truncated: String = pr.title.chars().take(80).collect();
            let ellipsis = if pr.title.chars().count() > 80 { "..." } else { "" };
            let pr_action = self.add_action(
                ActionParams::PrCreate {
                    target_repo: target.clone(),
                    gitlab_mr_iid: pr.gitlab_iid,
                    title: pr.title.clone(),
                    body: pr.body.clone(),
                    head: pr.head.clone(),
                    base: pr.base.clone(),
                    labels: pr.labels.clone(),
                    state: pr.state.clone(),
                    comments: vec![],
                },
                "pull_requests",
                Phase::PrImport,
                format!("Import MR !{} as PR: {truncated}{ellipsis}", pr.gitlab_iid),
                deps,
                false,
                10,
                false,
                None,
            );

            for comment in &pr.comments {
                self.add_action(
                    ActionParams::PrCommentAdd {
                        target_repo: target.clone(),
                        gitlab_mr_iid: pr.gitlab_iid,
                        body: comment.body.clone(),
                    },
                    "pull_requests",
                    Phase::PrImport,
                    format!("Add comment to PR !{}", pr.gitlab_iid),
                    vec![pr_action.clone()],
                    false,
                    3,
                    false,
                    None,
                );
            }
        }

        // ------------------------------------------------------------------
        // Phase 6: Wiki import
        // ------------------------------------------------------------------
        if export.has_wiki {
            self.add_action(
                ActionParams::WikiPush {
                    target_repo: target.clone(),
                    wiki_bundle_path: "export/wiki/wiki.git".into(),
                },
                "wiki",
                Phase::WikiImport,
                "Push wiki pages to GitHub wiki".into(),
                vec![repo_create.clone()],
                false,
                30,
                false,
                Some(SkipCondition {
                    condition: "no_wiki".into(),
                    check: "wiki_pages_count == 0".into(),
                }),
            );
        }

        // ------------------------------------------------------------------
        // Phase 7: Release import
        // ------------------------------------------------------------------
        for release in &export.releases {
            let release_action = self.add_action(
                ActionParams::ReleaseCreate {
                    target_repo: target.clone(),
                    tag_name: release.tag_name.clone(),
                    name: release
                        .name
                        .clone()
                        .unwrap_or_else(|| release.tag_name.clone()),
                    body: release.description.clone().unwrap_or_default(),
                    draft: false,
                    prerelease: false,
                },
                "releases",
                Phase::ReleaseImport,
                format!("Create release: {}", release.tag_name),
                vec![repo_push.clone()],
                false,
                20,
                false,
                None,
            );

            for asset in &release.assets.links {
                // Only assets that landed on disk during export are upload
                // candidates.
                let Some(local_path) = &asset.local_path else {
                    continue;
                };
                self.add_action(
                    ActionParams::ReleaseAssetUpload {
                        target_repo: target.clone(),
                        release_tag: release.tag_name.clone(),
                        asset_path: local_path.clone(),
                        asset_name: asset.name.clone(),
                        content_type: asset
                            .content_type
                            .clone()
                            .unwrap_or_else(|| "application/octet-stream".into()),
                    },
                    "releases",
                    Phase::ReleaseImport,
                    format!("Upload asset: {}/{}", release.tag_name, asset.name),
                    vec![release_action.clone()],
                    false,
                    10,
                    false,
                    None,
                );
            }
        }

        // ------------------------------------------------------------------
        // Phase 8: Package import (documentation only)
        // ------------------------------------------------------------------
        for package in &export.packages {
            let description = if package.files.is_empty() {
                format!(
                    "Document package without files: {}/{}@{}",
                    package.package_type, package.name, package.version
                )
            } else {
                format!(
                    "Document non-migrable package: {}/{}@{}",
                    package.package_type, package.name, package.version
                )
            };
            self.add_action(
                ActionParams::PackagePublish {
                    target_repo: target.clone(),
                    package_type: package.package_type.clone(),
                    name: package.name.clone(),
                    version: package.version.clone(),
                    migrable: false,
                },
                "packages",
                Phase::PackageImport,
                description,
                vec![repo_create.clone()],
                false,
                5,
                false,
                None,
            );
        }

        // ------------------------------------------------------------------
        // Phase 9: Governance
        // ------------------------------------------------------------------
        for protection in &transform.branch_protections {
            self.add_action(
                ActionParams::ProtectionSet {
                    target_repo: target.clone(),
                    branch: protection.branch.clone(),
                    protection: protection.settings.clone(),
                },
                "settings",
                Phase::Governance,
                format!("Set branch protection: {}", protection.branch),
                vec![repo_push.clone()],
                true,
                5,
                false,
                None,
            );
        }

        for mapping in &transform.user_mappings.mappings {
            let Some(login) = &mapping.destination_login else {
                continue;
            };
            // Only members with at least developer access become
            // collaborators; authorship alone does not grant access.
            let Some(member) = export
                .members
                .iter()
                .find(|m| m.username == mapping.source_username && m.access_level >= 30)
            else {
                continue;
            };
            let permission = match member.access_level {
                level if level >= 50 => "admin",
                level if level >= 40 => "maintain",
                _ => "push",
            };
            self.add_action(
                ActionParams::CollaboratorAdd {
                    target_repo: target.clone(),
                    username: login.clone(),
                    permission: permission.into(),
                },
                "settings",
                Phase::Governance,
                format!("Add collaborator: {login}"),
                vec![repo_create.clone()],
                true,
                3,
                false,
                None,
            );
        }

        if let Some(codeowners) = &transform.codeowners {
            self.add_action(
                ActionParams::CodeownersCommit {
                    target_repo: target.clone(),
                    content: codeowners.clone(),
                    branch: export.default_branch.clone(),
                },
                "settings",
                Phase::Governance,
                "Commit CODEOWNERS file".into(),
                vec![repo_push.clone()],
                false,
                5,
                false,
                None,
            );
        }

        // ------------------------------------------------------------------
        // Phase 10: Integrations
        // ------------------------------------------------------------------
        for webhook in &transform.webhooks {
            // Source webhooks never expose their secret.
            self.user_inputs.push(UserInputRequest {
                input_type: "webhook_secret".into(),
                key: None,
                url: Some(webhook.url.clone()),
                scope: None,
                environment: None,
                reason: "Webhook secret not available in export".into(),
                required: false,
                fallback: Some("generate_random".into()),
            });

            let truncated: String = webhook.url.chars().take(60).collect();
            self.add_action(
                ActionParams::WebhookCreate {
                    target_repo: target.clone(),
                    url: webhook.url.clone(),
                    content_type: webhook.content_type.clone(),
                    secret: USER_INPUT_REQUIRED.into(),
                    events: webhook.events.clone(),
                    active: webhook.active,
                },
                "webhooks",
                Phase::Integrations,
                format!("Create webhook: {truncated}"),
                vec![repo_create.clone()],
                true,
                3,
                true,
                None,
            );
        }

        // ------------------------------------------------------------------
        // Phase 11: Preservation
        // ------------------------------------------------------------------
        self.add_action(
            ActionParams::ArtifactCommit {
                target_repo: target.clone(),
                source_path: "export/ci/pipeline_history.json".into(),
                target_path: "migration/gitlab-pipelines/pipeline_history.json".into(),
                branch: export.default_branch.clone(),
                commit_message: "Add GitLab pipeline history (preserved)".into(),
            },
            "preservation",
            Phase::Preservation,
            "Commit migration artifacts".into(),
            vec![repo_push.clone()],
            false,
            15,
            false,
            None,
        );

        if !export.issue_attachments.is_empty() || !export.mr_attachments.is_empty() {
            self.add_action(
                ActionParams::AttachmentsCommit {
                    target_repo: target.clone(),
                    attachments_dir: "export/issues/attachments".into(),
                    target_path: "migration/attachments".into(),
                    branch: export.default_branch.clone(),
                },
                "preservation",
                Phase::Preservation,
                "Commit migrated attachments".into(),
                vec![repo_push.clone()],
                false,
                15,
                false,
                None,
            );
        }

        Ok(())
    }

    /// Validate, order, organize phases, and emit the plan document.
    fn build(mut self) -> Result<Plan> {
        self.graph.validate()?;
        let order = self.graph.topological_sort()?;

        let by_id: BTreeMap<String, Action> = self
            .actions
            .drain(..)
            .map(|a| (a.id.clone(), a))
            .collect();
        let sorted_actions: Vec<Action> = order
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect();

        // Phases assembled from ordered actions.
        let mut phase_actions: BTreeMap<Phase, Vec<String>> = BTreeMap::new();
        for action in &sorted_actions {
            phase_actions
                .entry(action.phase)
                .or_default()
                .push(action.id.clone());
        }
        let phases: Vec<PhaseSpec> = Phase::ORDERED
            .iter()
            .enumerate()
            .filter_map(|(index, &phase)| {
                let actions = phase_actions.remove(&phase)?;
                Some(PhaseSpec {
                    name: phase,
                    description: phase.description().to_string(),
                    actions,
                    order: index + 1,
                    parallel_safe: phase.is_parallel_safe(),
                })
            })
            .collect();

        let mut actions_by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_duration = 0u64;
        let mut requires_input = 0usize;
        for action in &sorted_actions {
            *actions_by_type
                .entry(action.kind.as_str().to_string())
                .or_default() += 1;
            total_duration += action.estimated_duration_seconds;
            if action.requires_user_input {
                requires_input += 1;
            }
        }

        let total = sorted_actions.len();
        Ok(Plan {
            version: "1.0".into(),
            run_id: self.run_id,
            project_id: self.project_id,
            gitlab_project: self.gitlab_project,
            github_target: self.github_target,
            created_at: chrono::Utc::now().to_rfc3339(),
            summary: PlanSummary {
                total_actions: total,
                actions_by_type,
                estimated_duration_minutes: total_duration / 60,
                requires_user_input: requires_input > 0,
                blocking_issues: vec![],
            },
            actions: sorted_actions,
            phases,
            validation: PlanValidation {
                all_dependencies_resolvable: true,
                no_circular_dependencies: true,
                all_required_inputs_identified: true,
                estimated_github_api_calls: total,
            },
            user_inputs_required: self.user_inputs,
        })
    }
}

/// Plan stage output.
#[derive(Debug, Clone)]
pub struct PlanOutput {
    pub plan: Plan,
    pub expected_state: ExpectedState,
}

pub struct PlanStage;

impl PlanStage {
    pub fn new() -> Self {
        Self
    }

    pub fn run(
        &self,
        run_id: &str,
        gitlab_project: &str,
        github_target: &str,
        export: &ExportData,
        transform: &TransformData,
        tree: &ArtifactTree,
    ) -> Result<PlanOutput> {
        let mut builder = PlanBuilder::new(
            run_id,
            &export.project_id.to_string(),
            gitlab_project,
            github_target,
        );
        builder.generate(export, transform)?;

        let graph_doc = builder.graph.to_document();
        let plan = builder.build()?;

        let plan_dir = tree.plan_dir();
        write_json(&plan_dir.join("plan.json"), &plan)?;
        write_json(&plan_dir.join("dependency_graph.json"), &graph_doc)?;
        write_json(
            &plan_dir.join("user_inputs_required.json"),
            &plan.user_inputs_required,
        )?;

        let stats = serde_json::json!({
            "total_actions": plan.summary.total_actions,
            "actions_by_type": plan.summary.actions_by_type,
            "actions_by_phase": plan
                .phases
                .iter()
                .map(|p| (p.name.as_str().to_string(), p.actions.len()))
                .collect::<BTreeMap<String, usize>>(),
            "estimated_duration_minutes": plan.summary.estimated_duration_minutes,
            "requires_user_input": plan.summary.requires_user_input,
            "user_inputs_count": plan.user_inputs_required.len(),
        });
        write_json(&plan_dir.join("plan_stats.json"), &stats)?;
        write_text(&plan_dir.join("plan.md"), &render_markdown(&plan))?;

        let expected_state = expected_state_for(github_target, export, transform);
        write_json(&plan_dir.join("expected_state.json"), &expected_state)?;

        tracing::info!(
            actions = plan.summary.total_actions,
            phases = plan.phases.len(),
            user_inputs = plan.user_inputs_required.len(),
            "Plan generated"
        );

        Ok(PlanOutput {
            plan,
            expected_state,
        })
    }
}

impl Default for PlanStage {
    fn default() -> Self {
        Self::new()
    }
}

fn expected_state_for(
    github_target: &str,
    export: &ExportData,
    transform: &TransformData,
) -> ExpectedState {
    ExpectedState {
        repo: github_target.to_string(),
        default_branch: export.default_branch.clone(),
        min_branch_count: 1,
        issues_count: transform.issues.len() as u64,
        pull_requests_count: transform.pull_requests.len() as u64,
        releases_count: export.releases.len() as u64,
        workflows_count: transform.workflows.len() as u64,
        environments: transform.environments.clone(),
        secrets: transform.secrets.iter().map(|s| s.key.clone()).collect(),
        variables_count: transform.variables.len() as u64,
        webhooks_count: transform.webhooks.len() as u64,
        protected_branches: transform
            .branch_protections
            .iter()
            .map(|p| p.branch.clone())
            .collect(),
        labels_count: transform.labels.len() as u64,
        milestones_count: transform.milestones.len() as u64,
        has_wiki: export.has_wiki,
        has_codeowners: transform.codeowners.is_some(),
        preservation_paths: vec!["migration/gitlab-pipelines/pipeline_history.json".into()],
        packages_count: export.packages.len() as u64,
    }
}

fn render_markdown(plan: &Plan) -> String {
    let mut lines = vec![
        "# Migration Plan Summary".to_string(),
        String::new(),
        format!("**Source**: {}", plan.gitlab_project),
        format!("**Target**: {}", plan.github_target),
        format!("**Generated**: {}", plan.created_at),
        String::new(),
        "## Overview".to_string(),
        String::new(),
        format!("- **Total Actions**: {}", plan.summary.total_actions),
        format!(
            "- **Estimated Duration**: {} minutes",
            plan.summary.estimated_duration_minutes
        ),
        format!(
            "- **Requires User Input**: {}",
            if plan.summary.requires_user_input { "Yes" } else { "No" }
        ),
        String::new(),
        "## Actions by Type".to_string(),
        String::new(),
    ];

    for (kind, count) in &plan.summary.actions_by_type {
        lines.push(format!("- `{kind}`: {count}"));
    }

    lines.extend([String::new(), "## Execution Phases".to_string(), String::new()]);
    for phase in &plan.phases {
        lines.push(format!("### Phase {}: {}", phase.order, phase.name.as_str()));
        lines.push(format!("*{}*", phase.description));
        lines.push(format!("**Actions**: {}", phase.actions.len()));
        if phase.parallel_safe {
            lines.push("**Parallel Execution**: Supported".to_string());
        }
        lines.push(String::new());
    }

    if !plan.user_inputs_required.is_empty() {
        lines.extend(["## Required User Inputs".to_string(), String::new()]);
        for input in &plan.user_inputs_required {
            let subject = input
                .key
                .as_deref()
                .or(input.url.as_deref())
                .unwrap_or("(unnamed)");
            lines.push(format!("- **{}**: {subject}", input.input_type));
            lines.push(format!("  - Reason: {}", input.reason));
            lines.push(format!(
                "  - Required: {}",
                if input.required { "Yes" } else { "No" }
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
