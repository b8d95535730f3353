//! Plan schema: typed actions, phases, and the plan document.
//!
//! Action parameters are a closed sum type with one variant per action
//! kind, so Apply dispatches by pattern match instead of
//! digging through untyped maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every supported action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RepoCreate,
    RepoPush,
    RepoConfigure,
    LfsConfigure,
    WorkflowCommit,
    EnvironmentCreate,
    SecretSet,
    VariableSet,
    ScheduleCreate,
    LabelCreate,
    MilestoneCreate,
    IssueCreate,
    PrCreate,
    PrCommentAdd,
    IssueCommentAdd,
    WikiPush,
    WikiCommit,
    ReleaseCreate,
    ReleaseAssetUpload,
    PackagePublish,
    ProtectionSet,
    CollaboratorAdd,
    TeamCreate,
    CodeownersCommit,
    WebhookCreate,
    WebhookConfigure,
    ArtifactCommit,
    AttachmentsCommit,
}

impl ActionKind {
    /// Wire name (`repo_create` style), stable across runs: it is part of
    /// every idempotency key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepoCreate => "repo_create",
            Self::RepoPush => "repo_push",
            Self::RepoConfigure => "repo_configure",
            Self::LfsConfigure => "lfs_configure",
            Self::WorkflowCommit => "workflow_commit",
            Self::EnvironmentCreate => "environment_create",
            Self::SecretSet => "secret_set",
            Self::VariableSet => "variable_set",
            Self::ScheduleCreate => "schedule_create",
            Self::LabelCreate => "label_create",
            Self::MilestoneCreate => "milestone_create",
            Self::IssueCreate => "issue_create",
            Self::PrCreate => "pr_create",
            Self::PrCommentAdd => "pr_comment_add",
            Self::IssueCommentAdd => "issue_comment_add",
            Self::WikiPush => "wiki_push",
            Self::WikiCommit => "wiki_commit",
            Self::ReleaseCreate => "release_create",
            Self::ReleaseAssetUpload => "release_asset_upload",
            Self::PackagePublish => "package_publish",
            Self::ProtectionSet => "protection_set",
            Self::CollaboratorAdd => "collaborator_add",
            Self::TeamCreate => "team_create",
            Self::CodeownersCommit => "codeowners_commit",
            Self::WebhookCreate => "webhook_create",
            Self::WebhookConfigure => "webhook_configure",
            Self::ArtifactCommit => "artifact_commit",
            Self::AttachmentsCommit => "attachments_commit",
        }
    }

    /// Whether an executed action of this kind can be undone.
    ///
    /// Issue and PR creations are not undone automatically: rollback
    /// counts them as skipped instead of closing migrated content.
    pub fn is_reversible(self) -> bool {
        matches!(
            self,
            Self::RepoCreate
                | Self::LabelCreate
                | Self::MilestoneCreate
                | Self::ReleaseCreate
                | Self::ProtectionSet
                | Self::CollaboratorAdd
                | Self::WebhookCreate
                | Self::EnvironmentCreate
                | Self::SecretSet
                | Self::VariableSet
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan phases in fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Foundation,
    CiSetup,
    IssueSetup,
    IssueImport,
    PrImport,
    WikiImport,
    ReleaseImport,
    PackageImport,
    Governance,
    Integrations,
    Preservation,
}

impl Phase {
    pub const ORDERED: [Phase; 11] = [
        Phase::Foundation,
        Phase::CiSetup,
        Phase::IssueSetup,
        Phase::IssueImport,
        Phase::PrImport,
        Phase::WikiImport,
        Phase::ReleaseImport,
        Phase::PackageImport,
        Phase::Governance,
        Phase::Integrations,
        Phase::Preservation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::CiSetup => "ci_setup",
            Self::IssueSetup => "issue_setup",
            Self::IssueImport => "issue_import",
            Self::PrImport => "pr_import",
            Self::WikiImport => "wiki_import",
            Self::ReleaseImport => "release_import",
            Self::PackageImport => "package_import",
            Self::Governance => "governance",
            Self::Integrations => "integrations",
            Self::Preservation => "preservation",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Foundation => "Create repository and push code",
            Self::CiSetup => "Set up CI/CD workflows and environments",
            Self::IssueSetup => "Create labels and milestones",
            Self::IssueImport => "Import issues",
            Self::PrImport => "Import pull requests",
            Self::WikiImport => "Import wiki",
            Self::ReleaseImport => "Import releases",
            Self::PackageImport => "Publish packages",
            Self::Governance => "Set protections and permissions",
            Self::Integrations => "Configure webhooks",
            Self::Preservation => "Commit preservation artifacts",
        }
    }

    /// Phases whose actions may execute with inter-action concurrency.
    pub fn is_parallel_safe(self) -> bool {
        matches!(self, Self::IssueImport | Self::PrImport)
    }
}

// ============================================================================
// Typed parameters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionParams {
    RepoCreate {
        org: String,
        name: String,
        description: String,
        private: bool,
        has_issues: bool,
        has_wiki: bool,
    },
    RepoPush {
        bundle_path: String,
        target_repo: String,
    },
    RepoConfigure {
        target_repo: String,
        default_branch: String,
    },
    LfsConfigure {
        target_repo: String,
        lfs_objects_path: String,
    },
    WorkflowCommit {
        target_repo: String,
        name: String,
        target_path: String,
        content: String,
        branch: String,
        commit_message: String,
    },
    EnvironmentCreate {
        target_repo: String,
        name: String,
    },
    SecretSet {
        target_repo: String,
        name: String,
        scope: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        environment: Option<String>,
        /// `${USER_INPUT_REQUIRED}` when the source value is unavailable.
        value: String,
        value_source: String,
    },
    VariableSet {
        target_repo: String,
        name: String,
        value: String,
    },
    ScheduleCreate {
        target_repo: String,
        name: String,
        cron: String,
        target_ref: String,
    },
    LabelCreate {
        target_repo: String,
        name: String,
        color: String,
        description: String,
    },
    MilestoneCreate {
        target_repo: String,
        title: String,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_on: Option<String>,
        state: String,
    },
    IssueCreate {
        target_repo: String,
        gitlab_issue_iid: u64,
        title: String,
        body: String,
        labels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        milestone: Option<String>,
        assignees: Vec<String>,
        state: String,
        comments: Vec<String>,
    },
    PrCreate {
        target_repo: String,
        gitlab_mr_iid: u64,
        title: String,
        body: String,
        head: String,
        base: String,
        labels: Vec<String>,
        state: String,
        comments: Vec<String>,
    },
    IssueCommentAdd {
        target_repo: String,
        gitlab_issue_iid: u64,
        body: String,
    },
    PrCommentAdd {
        target_repo: String,
        gitlab_mr_iid: u64,
        body: String,
    },
    WikiPush {
        target_repo: String,
        wiki_bundle_path: String,
    },
    WikiCommit {
        target_repo: String,
        page_path: String,
        content: String,
    },
    ReleaseCreate {
        target_repo: String,
        tag_name: String,
        name: String,
        body: String,
        draft: bool,
        prerelease: bool,
    },
    ReleaseAssetUpload {
        target_repo: String,
        release_tag: String,
        asset_path: String,
        asset_name: String,
        content_type: String,
    },
    PackagePublish {
        target_repo: String,
        package_type: String,
        name: String,
        version: String,
        migrable: bool,
    },
    ProtectionSet {
        target_repo: String,
        branch: String,
        protection: crate::github::models::BranchProtection,
    },
    CollaboratorAdd {
        target_repo: String,
        username: String,
        permission: String,
    },
    TeamCreate {
        org: String,
        name: String,
    },
    CodeownersCommit {
        target_repo: String,
        content: String,
        branch: String,
    },
    WebhookCreate {
        target_repo: String,
        url: String,
        content_type: String,
        /// `${USER_INPUT_REQUIRED}` or empty for generate-on-apply.
        secret: String,
        events: Vec<String>,
        active: bool,
    },
    WebhookConfigure {
        target_repo: String,
        url: String,
        insecure_ssl: bool,
    },
    ArtifactCommit {
        target_repo: String,
        source_path: String,
        target_path: String,
        branch: String,
        commit_message: String,
    },
    AttachmentsCommit {
        target_repo: String,
        attachments_dir: String,
        target_path: String,
        branch: String,
    },
}

impl ActionParams {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::RepoCreate { .. } => ActionKind::RepoCreate,
            Self::RepoPush { .. } => ActionKind::RepoPush,
            Self::RepoConfigure { .. } => ActionKind::RepoConfigure,
            Self::LfsConfigure { .. } => ActionKind::LfsConfigure,
            Self::WorkflowCommit { .. } => ActionKind::WorkflowCommit,
            Self::EnvironmentCreate { .. } => ActionKind::EnvironmentCreate,
            Self::SecretSet { .. } => ActionKind::SecretSet,
            Self::VariableSet { .. } => ActionKind::VariableSet,
            Self::ScheduleCreate { .. } => ActionKind::ScheduleCreate,
            Self::LabelCreate { .. } => ActionKind::LabelCreate,
            Self::MilestoneCreate { .. } => ActionKind::MilestoneCreate,
            Self::IssueCreate { .. } => ActionKind::IssueCreate,
            Self::PrCreate { .. } => ActionKind::PrCreate,
            Self::IssueCommentAdd { .. } => ActionKind::IssueCommentAdd,
            Self::PrCommentAdd { .. } => ActionKind::PrCommentAdd,
            Self::WikiPush { .. } => ActionKind::WikiPush,
            Self::WikiCommit { .. } => ActionKind::WikiCommit,
            Self::ReleaseCreate { .. } => ActionKind::ReleaseCreate,
            Self::ReleaseAssetUpload { .. } => ActionKind::ReleaseAssetUpload,
            Self::PackagePublish { .. } => ActionKind::PackagePublish,
            Self::ProtectionSet { .. } => ActionKind::ProtectionSet,
            Self::CollaboratorAdd { .. } => ActionKind::CollaboratorAdd,
            Self::TeamCreate { .. } => ActionKind::TeamCreate,
            Self::CodeownersCommit { .. } => ActionKind::CodeownersCommit,
            Self::WebhookCreate { .. } => ActionKind::WebhookCreate,
            Self::WebhookConfigure { .. } => ActionKind::WebhookConfigure,
            Self::ArtifactCommit { .. } => ActionKind::ArtifactCommit,
            Self::AttachmentsCommit { .. } => ActionKind::AttachmentsCommit,
        }
    }

    /// The stable entity identifier used for the idempotency key.
    ///
    /// Priority: issue iid, MR iid, tag name, name, title, branch. `None`
    /// falls back to the action id.
    pub fn entity_id(&self) -> Option<String> {
        match self {
            Self::IssueCreate {
                gitlab_issue_iid, ..
            }
            | Self::IssueCommentAdd {
                gitlab_issue_iid, ..
            } => Some(gitlab_issue_iid.to_string()),
            Self::PrCreate { gitlab_mr_iid, .. } | Self::PrCommentAdd { gitlab_mr_iid, .. } => {
                Some(gitlab_mr_iid.to_string())
            }
            Self::ReleaseCreate { tag_name, .. } => Some(tag_name.clone()),
            Self::ReleaseAssetUpload {
                release_tag,
                asset_name,
                ..
            } => Some(format!("{release_tag}/{asset_name}")),
            Self::RepoCreate { name, .. }
            | Self::WorkflowCommit { name, .. }
            | Self::EnvironmentCreate { name, .. }
            | Self::SecretSet { name, .. }
            | Self::VariableSet { name, .. }
            | Self::ScheduleCreate { name, .. }
            | Self::LabelCreate { name, .. }
            | Self::PackagePublish { name, .. }
            | Self::TeamCreate { name, .. } => Some(name.clone()),
            Self::MilestoneCreate { title, .. } => Some(title.clone()),
            Self::ProtectionSet { branch, .. } => Some(branch.clone()),
            Self::CollaboratorAdd { username, .. } => Some(username.clone()),
            Self::WebhookCreate { url, .. } | Self::WebhookConfigure { url, .. } => {
                Some(url.clone())
            }
            Self::RepoPush { target_repo, .. } => Some(target_repo.clone()),
            Self::WikiPush { target_repo, .. } => Some(format!("{target_repo}/wiki")),
            Self::CodeownersCommit { .. } => Some("CODEOWNERS".into()),
            Self::WikiCommit { page_path, .. } => Some(page_path.clone()),
            Self::ArtifactCommit { target_path, .. }
            | Self::AttachmentsCommit { target_path, .. } => Some(target_path.clone()),
            Self::RepoConfigure { .. } | Self::LfsConfigure { .. } => None,
        }
    }
}

// ============================================================================
// Action & plan documents
// ============================================================================

/// A condition under which Apply skips an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCondition {
    pub condition: String,
    pub check: String,
}

/// The atomic unit of the Apply stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub component: String,
    pub phase: Phase,
    pub description: String,
    pub dependencies: Vec<String>,
    pub idempotency_key: String,
    pub parameters: ActionParams,
    pub dry_run_safe: bool,
    pub reversible: bool,
    pub estimated_duration_seconds: u64,
    #[serde(default)]
    pub requires_user_input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<SkipCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: Phase,
    pub description: String,
    pub actions: Vec<String>,
    pub order: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parallel_safe: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_actions: usize,
    pub actions_by_type: BTreeMap<String, usize>,
    pub estimated_duration_minutes: u64,
    pub requires_user_input: bool,
    pub blocking_issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanValidation {
    pub all_dependencies_resolvable: bool,
    pub no_circular_dependencies: bool,
    pub all_required_inputs_identified: bool,
    pub estimated_github_api_calls: usize,
}

/// A value the user must provide before Apply can fully succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputRequest {
    #[serde(rename = "type")]
    pub input_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub reason: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// The complete migration plan document (`plan.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub version: String,
    pub run_id: String,
    pub project_id: String,
    pub gitlab_project: String,
    pub github_target: String,
    pub created_at: String,
    pub summary: PlanSummary,
    pub actions: Vec<Action>,
    pub phases: Vec<PhaseSpec>,
    pub validation: PlanValidation,
    pub user_inputs_required: Vec<UserInputRequest>,
}

impl Plan {
    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }
}
