//! Pipeline orchestrator: sequences the six stages per run mode.
//!
//! Each stage receives the slice of shared context it needs and returns its
//! outputs; the orchestrator merges them into the explicit `SharedContext`
//! record. The pipeline stops on a stage's terminal failure (not on
//! partial success) and records where it stopped.

pub mod batch;

use crate::apply::{ApplyOptions, ApplyStage};
use crate::artifacts::ArtifactTree;
use crate::config::{MigrationConfig, Scope};
use crate::discovery::{DiscoveryStage, InventoryEntry};
use crate::export::{ExportData, ExportStage};
use crate::gitlab::GitLabApi;
use crate::github::GitHubApi;
use crate::plan::{ExpectedState, Plan, PlanStage};
use crate::transform::users::{DestUser, UserMapping};
use crate::transform::{TransformData, TransformStage};
use crate::verify::{VerifyStage, VerifyStatus};
use crate::StageStatus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Run modes, each mapping to a fixed stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationMode {
    DiscoverOnly,
    ExportOnly,
    TransformOnly,
    PlanOnly,
    DryRun,
    Apply,
    Verify,
    Full,
    SingleProject,
}

/// Stage names in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Discovery,
    Export,
    Transform,
    Plan,
    Apply,
    Verify,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Export => "export",
            Self::Transform => "transform",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Verify => "verify",
        }
    }
}

impl MigrationMode {
    /// The stage sequence this mode runs, exhaustively enumerated.
    pub fn sequence(self) -> Vec<StageName> {
        use StageName::*;
        match self {
            Self::DiscoverOnly => vec![Discovery],
            Self::ExportOnly => vec![Discovery, Export],
            Self::TransformOnly => vec![Discovery, Export, Transform],
            Self::PlanOnly => vec![Discovery, Export, Transform, Plan],
            Self::DryRun | Self::Apply => vec![Discovery, Export, Transform, Plan, Apply],
            Self::Verify => vec![Verify],
            Self::Full => vec![Discovery, Export, Transform, Plan, Apply, Verify],
            // Quick single-project migration prep: the project id is known,
            // so discovery is skipped.
            Self::SingleProject => vec![Export, Transform, Plan],
        }
    }
}

/// Outputs carried between stages. Each field is written exactly once, by
/// its producing stage, and read-only afterwards.
#[derive(Debug, Default)]
pub struct SharedContext {
    pub discovered_projects: Vec<InventoryEntry>,
    pub export_data: Option<ExportData>,
    pub transform_data: Option<TransformData>,
    pub conversion_gaps: usize,
    pub plan: Option<Plan>,
    pub expected_state: Option<ExpectedState>,
    pub apply_results: Option<ApplySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplySummary {
    pub status: StageStatus,
    pub successful: usize,
    pub failed: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub mode: MigrationMode,
    pub status: StageStatus,
    pub started_at: String,
    pub finished_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_stage: Option<StageName>,
    pub stages: BTreeMap<String, StageSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_status: Option<VerifyStatus>,
}

/// Callback invoked as stages start and complete; used by external
/// collaborators for progress reporting.
pub type StageCallback = Arc<dyn Fn(StageName) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(StageName, StageStatus) + Send + Sync>;

pub struct PipelineOrchestrator {
    gitlab: Arc<dyn GitLabApi>,
    github: Arc<dyn GitHubApi>,
    config: MigrationConfig,
    /// Destination org members for user mapping (may be empty).
    dest_members: Vec<DestUser>,
    /// Cross-project user-mapping cache from the batch orchestrator.
    mapping_cache: Option<Arc<tokio::sync::Mutex<BTreeMap<String, UserMapping>>>>,
    stage_callback: Option<StageCallback>,
    complete_callback: Option<CompleteCallback>,
}

impl PipelineOrchestrator {
    pub fn new(
        gitlab: Arc<dyn GitLabApi>,
        github: Arc<dyn GitHubApi>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            gitlab,
            github,
            config,
            dest_members: Vec::new(),
            mapping_cache: None,
            stage_callback: None,
            complete_callback: None,
        }
    }

    pub fn with_dest_members(mut self, members: Vec<DestUser>) -> Self {
        self.dest_members = members;
        self
    }

    pub fn with_mapping_cache(
        mut self,
        cache: Arc<tokio::sync::Mutex<BTreeMap<String, UserMapping>>>,
    ) -> Self {
        self.mapping_cache = Some(cache);
        self
    }

    pub fn on_stage_start(mut self, callback: StageCallback) -> Self {
        self.stage_callback = Some(callback);
        self
    }

    pub fn on_stage_complete(mut self, callback: CompleteCallback) -> Self {
        self.complete_callback = Some(callback);
        self
    }

    /// Run the pipeline for `mode`, optionally resuming from a stage.
    pub async fn run_migration(
        &self,
        mode: MigrationMode,
        resume_from: Option<StageName>,
    ) -> PipelineResult {
        let started_at = chrono::Utc::now().to_rfc3339();
        tracing::info!(mode = ?mode, "Starting migration workflow");

        let mut sequence = mode.sequence();
        if let Some(resume) = resume_from {
            if let Some(index) = sequence.iter().position(|&s| s == resume) {
                sequence = sequence.split_off(index);
                tracing::info!(resume_from = resume.as_str(), "Resuming pipeline");
            }
        }

        let tree = ArtifactTree::new(&self.config.artifact_root);
        let mut context = SharedContext::default();
        let mut stages: BTreeMap<String, StageSummary> = BTreeMap::new();
        let mut verify_status = None;

        for stage in sequence {
            if let Some(callback) = &self.stage_callback {
                callback(stage);
            }
            tracing::info!(stage = stage.as_str(), "Executing stage");

            let outcome = self
                .run_stage_with_retry(stage, mode, &tree, &mut context, &mut verify_status)
                .await;

            match outcome {
                Ok(status) => {
                    stages.insert(
                        stage.as_str().to_string(),
                        StageSummary {
                            status,
                            error: None,
                        },
                    );
                    if let Some(callback) = &self.complete_callback {
                        callback(stage, status);
                    }
                    // Partial success is not terminal; only Failed stops
                    // the pipeline.
                    if status == StageStatus::Failed {
                        tracing::error!(stage = stage.as_str(), "Stage failed, stopping workflow");
                        return PipelineResult {
                            mode,
                            status: StageStatus::Failed,
                            started_at,
                            finished_at: chrono::Utc::now().to_rfc3339(),
                            failed_at_stage: Some(stage),
                            stages,
                            verify_status,
                        };
                    }
                }
                Err(e) => {
                    let message = crate::error::scrub_secrets(
                        &format!("{e:#}"),
                        &[&self.config.gitlab_token, &self.config.github_token],
                    );
                    tracing::error!(stage = stage.as_str(), error = %message, "Stage failed");
                    stages.insert(
                        stage.as_str().to_string(),
                        StageSummary {
                            status: StageStatus::Failed,
                            error: Some(message),
                        },
                    );
                    if let Some(callback) = &self.complete_callback {
                        callback(stage, StageStatus::Failed);
                    }
                    return PipelineResult {
                        mode,
                        status: StageStatus::Failed,
                        started_at,
                        finished_at: chrono::Utc::now().to_rfc3339(),
                        failed_at_stage: Some(stage),
                        stages,
                        verify_status,
                    };
                }
            }
        }

        let status = if stages
            .values()
            .any(|s| s.status == StageStatus::Partial)
        {
            StageStatus::Partial
        } else {
            StageStatus::Success
        };
        tracing::info!(status = ?status, "Migration workflow completed");

        PipelineResult {
            mode,
            status,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            failed_at_stage: None,
            stages,
            verify_status,
        }
    }

    /// Stage-level bounded retry: hard errors retry up to the budget;
    /// partial results are accepted as-is.
    async fn run_stage_with_retry(
        &self,
        stage: StageName,
        mode: MigrationMode,
        tree: &ArtifactTree,
        context: &mut SharedContext,
        verify_status: &mut Option<VerifyStatus>,
    ) -> Result<StageStatus> {
        let mut attempt = 0;
        loop {
            match self.run_stage(stage, mode, tree, context, verify_status).await {
                Ok(status) => return Ok(status),
                Err(e) if attempt + 1 < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        stage = stage.as_str(),
                        attempt,
                        error = %e,
                        "Stage errored, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.retry_delay_secs,
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_stage(
        &self,
        stage: StageName,
        mode: MigrationMode,
        tree: &ArtifactTree,
        context: &mut SharedContext,
        verify_status: &mut Option<VerifyStatus>,
    ) -> Result<StageStatus> {
        match stage {
            StageName::Discovery => {
                let output = DiscoveryStage::new(self.gitlab.clone())
                    .run(&self.config, tree)
                    .await?;
                context.discovered_projects = output.projects;
                Ok(StageStatus::Success)
            }

            StageName::Export => {
                let project_id = self.export_project_id(context)?;
                let output = ExportStage::new(self.gitlab.clone(), &self.config.gitlab_url)
                    .run(&self.config, tree, project_id)
                    .await?;
                let status = output.status;
                context.export_data = Some(output);
                Ok(status)
            }

            StageName::Transform => {
                let export = context
                    .export_data
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Transform requires export data"))?;
                let github_target = self.config.github_target(&export.project_path);
                let mut output = TransformStage::new().run(
                    export,
                    &github_target,
                    &self.dest_members,
                    tree,
                )?;

                // Batch-wide mapping cache: earlier projects' resolutions
                // win, new resolutions are published for later projects.
                if let Some(cache) = &self.mapping_cache {
                    let mut cache = cache.lock().await;
                    for mapping in &mut output.user_mappings.mappings {
                        match cache.get(&mapping.source_username) {
                            Some(cached) => *mapping = cached.clone(),
                            None => {
                                cache.insert(mapping.source_username.clone(), mapping.clone());
                            }
                        }
                    }
                }

                let status = output.status;
                context.conversion_gaps = output.gap_analysis.summary.total;
                context.transform_data = Some(output);
                Ok(status)
            }

            StageName::Plan => {
                let export = context
                    .export_data
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Plan requires export data"))?;
                let transform = context
                    .transform_data
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Plan requires transform data"))?;

                let gitlab_project = context
                    .discovered_projects
                    .first()
                    .map(|p| p.path_with_namespace.clone())
                    .unwrap_or_else(|| export.project_path.clone());
                let github_target = self.config.github_target(&gitlab_project);

                let output = PlanStage::new().run(
                    &self.config.run_id,
                    &gitlab_project,
                    &github_target,
                    export,
                    transform,
                    tree,
                )?;
                context.plan = Some(output.plan);
                context.expected_state = Some(output.expected_state);
                Ok(StageStatus::Success)
            }

            StageName::Apply => {
                let plan = context
                    .plan
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Apply requires a plan"))?;
                let dry_run = mode == MigrationMode::DryRun;
                let output = ApplyStage::new(self.github.clone(), &self.config.github_token)
                    .run(
                        plan,
                        tree,
                        ApplyOptions {
                            dry_run,
                            ..Default::default()
                        },
                    )
                    .await?;
                let status = output.status;
                context.apply_results = Some(ApplySummary {
                    status,
                    successful: output.successful,
                    failed: output.failed,
                    dry_run,
                });
                Ok(status)
            }

            StageName::Verify => {
                // A VERIFY-only run loads the expected state persisted by
                // the plan stage of an earlier run.
                let expected = match &context.expected_state {
                    Some(expected) => expected.clone(),
                    None => crate::artifacts::read_json(
                        &tree.plan_dir().join("expected_state.json"),
                    )?,
                };
                let output = VerifyStage::new(self.github.clone(), self.config.verify_tolerance)
                    .run(&expected, tree)
                    .await?;
                *verify_status = Some(output.status);
                Ok(match output.status {
                    VerifyStatus::Success => StageStatus::Success,
                    VerifyStatus::Partial | VerifyStatus::Pending => StageStatus::Partial,
                    VerifyStatus::Failed => StageStatus::Failed,
                })
            }
        }
    }

    /// Export needs a concrete project id: the first discovered project,
    /// or the configured one in single-project scope.
    fn export_project_id(&self, context: &SharedContext) -> Result<u64> {
        if let Some(project) = context.discovered_projects.first() {
            return Ok(project.id);
        }
        match self.config.scope {
            Scope::Project(id) => Ok(id),
            Scope::Group(_) => anyhow::bail!(
                "No discovered projects available for export; run discovery first"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::mock::MockGitLab;
    use crate::gitlab::models::{Issue, Label, Project};
    use crate::github::mock::MockGitHub;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(root: &std::path::Path) -> MigrationConfig {
        MigrationConfig {
            run_id: "run-1".into(),
            gitlab_url: "https://gl.example".into(),
            gitlab_token: "glpat-x".into(),
            github_token: "ghp_x".into(),
            github_org: "acme".into(),
            scope: Scope::Project(42),
            artifact_root: root.to_path_buf(),
            resume: false,
            max_retries: 2,
            retry_delay_secs: 0,
            timeouts: Default::default(),
            verify_tolerance: 0.05,
        }
    }

    async fn seeded_gitlab() -> Arc<MockGitLab> {
        let mock = MockGitLab::new()
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
            .await;
        mock.issues.write().await.insert(
            42,
            vec![Issue {
                iid: 7,
                title: "Crash".into(),
                state: "opened".into(),
                ..Default::default()
            }],
        );
        mock.labels.write().await.insert(
            42,
            vec![Label {
                name: "bug".into(),
                color: "#ff0000".into(),
                description: None,
            }],
        );
        Arc::new(mock)
    }

    #[test]
    fn test_mode_sequences() {
        assert_eq!(MigrationMode::DiscoverOnly.sequence().len(), 1);
        assert_eq!(MigrationMode::Full.sequence().len(), 6);
        assert_eq!(
            MigrationMode::SingleProject.sequence(),
            vec![StageName::Export, StageName::Transform, StageName::Plan]
        );
        assert_eq!(MigrationMode::Verify.sequence(), vec![StageName::Verify]);
        assert_eq!(
            MigrationMode::DryRun.sequence(),
            MigrationMode::Apply.sequence()
        );
    }

    #[tokio::test]
    async fn test_plan_only_pipeline_flows_context() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(
            seeded_gitlab().await,
            Arc::new(MockGitHub::new()),
            config(dir.path()),
        );

        let result = orchestrator
            .run_migration(MigrationMode::PlanOnly, None)
            .await;

        // Export is partial (no git server), but never terminal.
        assert_ne!(result.status, StageStatus::Failed);
        assert!(result.stages.contains_key("discovery"));
        assert!(result.stages.contains_key("plan"));
        assert!(dir.path().join("plan/plan.json").exists());

        let plan: serde_json::Value =
            crate::artifacts::read_json(&dir.path().join("plan/plan.json")).unwrap();
        assert_eq!(plan["gitlab_project"], "group/widget");
        assert_eq!(plan["github_target"], "acme/widget");
    }

    #[tokio::test]
    async fn test_dry_run_mode_sets_apply_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let github = Arc::new(MockGitHub::new());
        let orchestrator = PipelineOrchestrator::new(
            seeded_gitlab().await,
            github.clone(),
            config(dir.path()),
        );

        let result = orchestrator.run_migration(MigrationMode::DryRun, None).await;
        assert_ne!(result.status, StageStatus::Failed);
        assert!(dir.path().join("apply/dry_run_report.json").exists());
        assert_eq!(github.total_writes(), 0);
    }

    #[tokio::test]
    async fn test_callbacks_fire_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let started_clone = started.clone();
        let completed_clone = completed.clone();
        let orchestrator = PipelineOrchestrator::new(
            seeded_gitlab().await,
            Arc::new(MockGitHub::new()),
            config(dir.path()),
        )
        .on_stage_start(Arc::new(move |_| {
            started_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .on_stage_complete(Arc::new(move |_, _| {
            completed_clone.fetch_add(1, Ordering::SeqCst);
        }));

        orchestrator
            .run_migration(MigrationMode::TransformOnly, None)
            .await;
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resume_from_slices_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(
            seeded_gitlab().await,
            Arc::new(MockGitHub::new()),
            config(dir.path()),
        );

        // Resuming TRANSFORM_ONLY from transform skips discovery/export;
        // transform then fails terminally for missing export data.
        let result = orchestrator
            .run_migration(MigrationMode::TransformOnly, Some(StageName::Transform))
            .await;
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.failed_at_stage, Some(StageName::Transform));
        assert!(!result.stages.contains_key("discovery"));
    }

    #[tokio::test]
    async fn test_export_without_discovery_uses_scope_project() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(
            seeded_gitlab().await,
            Arc::new(MockGitHub::new()),
            config(dir.path()),
        );

        let result = orchestrator
            .run_migration(MigrationMode::SingleProject, None)
            .await;
        assert_ne!(result.status, StageStatus::Failed);
        assert!(dir.path().join("export/export_manifest.json").exists());
    }
}
