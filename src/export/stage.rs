//! Export stage: extract every project component into the artifact tree.
//!
//! Components run in a fixed sequence; each records a terminal status in
//! `export_manifest.json`. A failure in one component never aborts the
//! stage; overall status degrades to `partial` instead. With `resume=true`,
//! components the checkpoint marks completed are skipped and item-streamed
//! components (issues, merge requests) continue strictly after the last
//! checkpointed iid.

use crate::artifacts::{write_json, write_text, ArtifactTree};
use crate::config::MigrationConfig;
use crate::error::scrub_secrets;
use crate::export::attachments::{download_attachments, extract_attachment_paths};
use crate::export::checkpoint::{CheckpointSummary, ExportCheckpoint};
use crate::gitcmd;
use crate::gitlab::models::*;
use crate::gitlab::GitLabApi;
use crate::StageStatus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Component names in execution order.
const COMPONENTS: [&str; 8] = [
    "repository",
    "ci",
    "issues",
    "merge_requests",
    "wiki",
    "releases",
    "packages",
    "settings",
];

/// Terminal outcome of one component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentOutcome {
    pub status: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the export produced, both on disk and in memory for the
/// downstream stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportData {
    pub project_id: u64,
    pub project_path: String,
    pub default_branch: String,
    #[serde(default)]
    pub description: String,
    pub visibility: String,
    pub has_wiki: bool,
    pub has_lfs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab_ci_yaml: Option<String>,
    pub issues: Vec<Issue>,
    pub merge_requests: Vec<MergeRequest>,
    pub labels: Vec<Label>,
    pub milestones: Vec<Milestone>,
    pub releases: Vec<Release>,
    pub packages: Vec<Package>,
    pub webhooks: Vec<Webhook>,
    pub schedules: Vec<PipelineSchedule>,
    pub environments: Vec<Environment>,
    pub variables: Vec<CiVariable>,
    pub protected_branches: Vec<ProtectedBranch>,
    pub protected_tags: Vec<ProtectedTag>,
    pub members: Vec<Member>,
    /// `original upload path → export-relative local path` for issues.
    pub issue_attachments: BTreeMap<String, String>,
    /// Same mapping for merge requests.
    pub mr_attachments: BTreeMap<String, String>,
    pub components: BTreeMap<String, ComponentOutcome>,
    pub warnings: Vec<String>,
    pub status: StageStatus,
}

#[derive(Debug, Serialize)]
struct ExportManifest<'a> {
    project_id: u64,
    project_path: &'a str,
    exported_at: String,
    gitlab_url: &'a str,
    components: &'a BTreeMap<String, ComponentOutcome>,
    checkpoint_summary: CheckpointSummary,
    warnings: &'a [String],
}

pub struct ExportStage {
    gitlab: Arc<dyn GitLabApi>,
    /// Forge base URL, used to build attachment URLs.
    base_url: String,
}

impl ExportStage {
    pub fn new(gitlab: Arc<dyn GitLabApi>, base_url: &str) -> Self {
        Self {
            gitlab,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn run(
        &self,
        config: &MigrationConfig,
        tree: &ArtifactTree,
        project_id: u64,
    ) -> Result<ExportData> {
        let export_dir = tree.export_dir();
        std::fs::create_dir_all(&export_dir)?;

        let mut checkpoint = ExportCheckpoint::open(export_dir.join(".export_checkpoint.json"))?;
        let resume = config.resume;
        if resume {
            let summary = checkpoint.summary();
            tracing::info!(
                completed = summary.completed,
                total = summary.total_components,
                "Resuming export from checkpoint"
            );
        }

        let project = self.gitlab.get_project(project_id).await?;
        checkpoint.set_metadata("project_id", serde_json::json!(project_id))?;
        checkpoint.set_metadata(
            "project_path",
            serde_json::json!(project.path_with_namespace),
        )?;

        let mut data = ExportData {
            project_id,
            project_path: project.path_with_namespace.clone(),
            default_branch: project
                .default_branch
                .clone()
                .unwrap_or_else(|| "main".into()),
            description: project.description.clone().unwrap_or_default(),
            visibility: project.visibility.clone(),
            has_wiki: project.wiki_enabled,
            has_lfs: false,
            ..Default::default()
        };

        for component in COMPONENTS {
            if resume && checkpoint.is_completed(component) {
                tracing::info!(component, "Skipping component (already completed)");
                data.components.insert(
                    component.to_string(),
                    ComponentOutcome {
                        status: "completed".into(),
                        ..Default::default()
                    },
                );
                continue;
            }

            tracing::info!(component, "Exporting component");
            checkpoint.mark_started(component)?;

            let result = match component {
                "repository" => {
                    self.export_repository(config, &project, &export_dir, &mut data)
                        .await
                }
                "ci" => self.export_ci(project_id, &export_dir, &mut data).await,
                "issues" => {
                    self.export_issues(project_id, &project, &export_dir, &mut checkpoint, &mut data)
                        .await
                }
                "merge_requests" => {
                    self.export_merge_requests(
                        project_id,
                        &project,
                        &export_dir,
                        &mut checkpoint,
                        &mut data,
                    )
                    .await
                }
                "wiki" => self.export_wiki(config, &project, &export_dir).await,
                "releases" => {
                    self.export_releases(project_id, &export_dir, &mut data)
                        .await
                }
                "packages" => {
                    self.export_packages(project_id, &export_dir, &mut data)
                        .await
                }
                "settings" => {
                    self.export_settings(project_id, &project, &export_dir, &mut data)
                        .await
                }
                _ => unreachable!(),
            };

            match result {
                Ok(count) => {
                    checkpoint.mark_completed(component, true, None)?;
                    data.components.insert(
                        component.to_string(),
                        ComponentOutcome {
                            status: "completed".into(),
                            count,
                            error: None,
                        },
                    );
                }
                Err(e) => {
                    let message = scrub_secrets(&e.to_string(), &[&config.gitlab_token]);
                    tracing::error!(component, error = %message, "Component export failed");
                    checkpoint.mark_completed(component, false, Some(message.clone()))?;
                    data.components.insert(
                        component.to_string(),
                        ComponentOutcome {
                            status: "failed".into(),
                            count: 0,
                            error: Some(message),
                        },
                    );
                }
            }
        }

        let completed = data
            .components
            .values()
            .filter(|c| c.status == "completed")
            .count();
        let failed = data
            .components
            .values()
            .filter(|c| c.status == "failed")
            .count();
        data.status = if failed == 0 {
            StageStatus::Success
        } else if completed > 0 {
            StageStatus::Partial
        } else {
            StageStatus::Failed
        };

        let manifest = ExportManifest {
            project_id,
            project_path: &data.project_path,
            exported_at: chrono::Utc::now().to_rfc3339(),
            gitlab_url: &config.gitlab_url,
            components: &data.components,
            checkpoint_summary: checkpoint.summary(),
            warnings: &data.warnings,
        };
        write_json(&export_dir.join("export_manifest.json"), &manifest)?;

        tracing::info!(status = ?data.status, "Export completed");
        Ok(data)
    }

    // ========================================================================
    // Components
    // ========================================================================

    async fn export_repository(
        &self,
        config: &MigrationConfig,
        project: &Project,
        export_dir: &Path,
        data: &mut ExportData,
    ) -> Result<u64> {
        let repo_dir = export_dir.join("repository");
        std::fs::create_dir_all(repo_dir.join("lfs"))?;

        let http_url = project
            .http_url_to_repo
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No repository URL found"))?;

        let temp_dir = repo_dir.join("temp_clone");
        if temp_dir.exists() {
            std::fs::remove_dir_all(&temp_dir)?;
        }

        let clone_result = gitcmd::mirror_clone(
            http_url,
            &config.gitlab_token,
            &temp_dir,
            Duration::from_secs(config.timeouts.git_clone),
        )
        .await;

        let result = match clone_result {
            Ok(()) => {
                gitcmd::bundle_create(
                    &temp_dir,
                    &repo_dir.join("bundle.git"),
                    Duration::from_secs(config.timeouts.git_bundle),
                )
                .await?;

                if let Some(submodules) = gitcmd::read_gitmodules(&temp_dir).await {
                    write_text(&repo_dir.join("submodules.txt"), &submodules)?;
                }

                let has_lfs = self.gitlab.has_lfs(project.id).await.unwrap_or(false);
                if has_lfs {
                    write_text(
                        &repo_dir.join("lfs_detected.txt"),
                        "Git LFS detected. LFS objects need to be fetched separately.\n",
                    )?;
                }
                data.has_lfs = has_lfs;
                Ok(1)
            }
            Err(e) => Err(anyhow::anyhow!("{}", e.technical)),
        };

        if temp_dir.exists() {
            let _ = std::fs::remove_dir_all(&temp_dir);
        }
        result
    }

    async fn export_ci(
        &self,
        project_id: u64,
        export_dir: &Path,
        data: &mut ExportData,
    ) -> Result<u64> {
        let ci_dir = export_dir.join("ci");
        std::fs::create_dir_all(&ci_dir)?;

        let ci_yaml = self
            .gitlab
            .get_file_content(project_id, ".gitlab-ci.yml", &data.default_branch)
            .await?;
        if let Some(yaml) = &ci_yaml {
            write_text(&ci_dir.join("gitlab-ci.yml"), yaml)?;
        }
        data.gitlab_ci_yaml = ci_yaml;

        // Variable metadata only; values are never written to disk.
        let variables = self.gitlab.list_variables(project_id).await?;
        write_json(&ci_dir.join("variables.json"), &variables)?;

        let environments = self.gitlab.list_environments(project_id).await?;
        write_json(&ci_dir.join("environments.json"), &environments)?;

        let schedules = self.gitlab.list_pipeline_schedules(project_id).await?;
        write_json(&ci_dir.join("schedules.json"), &schedules)?;

        let pipelines = self.gitlab.list_pipelines(project_id, 100).await?;
        write_json(&ci_dir.join("pipeline_history.json"), &pipelines)?;

        let count = (variables.len() + environments.len() + schedules.len()) as u64;
        data.variables = variables;
        data.environments = environments;
        data.schedules = schedules;
        Ok(count)
    }

    async fn export_issues(
        &self,
        project_id: u64,
        project: &Project,
        export_dir: &Path,
        checkpoint: &mut ExportCheckpoint,
        data: &mut ExportData,
    ) -> Result<u64> {
        let issues_dir = export_dir.join("issues");
        let attachments_dir = issues_dir.join("attachments");
        std::fs::create_dir_all(&attachments_dir)?;

        let resume_after = checkpoint
            .should_resume("issues")
            .then(|| checkpoint.last_processed_item("issues"))
            .flatten();
        if let Some(iid) = resume_after {
            tracing::info!(last_iid = iid, "Resuming issues export");
        }

        let mut all_issues = Vec::new();
        let mut attachment_metadata: BTreeMap<String, String> = BTreeMap::new();

        for summary in self.gitlab.list_issues(project_id).await? {
            if let Some(last) = resume_after {
                if summary.iid <= last {
                    continue;
                }
            }

            let mut issue = self.gitlab.get_issue(project_id, summary.iid).await?;
            issue.notes = self.gitlab.list_issue_notes(project_id, summary.iid).await?;

            let mut found: BTreeSet<String> = BTreeSet::new();
            if let Some(description) = &issue.description {
                found.extend(extract_attachment_paths(description));
            }
            for note in &issue.notes {
                found.extend(extract_attachment_paths(&note.body));
            }
            found.retain(|p| !attachment_metadata.contains_key(p));

            if !found.is_empty() {
                let batch = download_attachments(
                    self.gitlab.as_ref(),
                    &self.base_url,
                    &project.path_with_namespace,
                    &found,
                    &attachments_dir,
                    export_dir,
                )
                .await?;
                attachment_metadata.extend(batch.mapping);
                data.warnings.extend(batch.warnings);
            }

            let iid = issue.iid;
            all_issues.push(issue);

            if all_issues.len() % 10 == 0 {
                tracing::info!(count = all_issues.len(), "Exported issues so far");
                checkpoint.update_progress("issues", all_issues.len() as u64, iid)?;
            }
        }

        write_json(&issues_dir.join("issues.json"), &all_issues)?;
        if !attachment_metadata.is_empty() {
            write_json(
                &issues_dir.join("attachment_metadata.json"),
                &attachment_metadata,
            )?;
        }

        let count = all_issues.len() as u64;
        data.issues = all_issues;
        data.issue_attachments = attachment_metadata;
        Ok(count)
    }

    async fn export_merge_requests(
        &self,
        project_id: u64,
        project: &Project,
        export_dir: &Path,
        checkpoint: &mut ExportCheckpoint,
        data: &mut ExportData,
    ) -> Result<u64> {
        let mrs_dir = export_dir.join("merge_requests");
        let attachments_dir = mrs_dir.join("attachments");
        std::fs::create_dir_all(&attachments_dir)?;

        let resume_after = checkpoint
            .should_resume("merge_requests")
            .then(|| checkpoint.last_processed_item("merge_requests"))
            .flatten();

        let mut all_mrs = Vec::new();
        let mut attachment_metadata: BTreeMap<String, String> = BTreeMap::new();

        for summary in self.gitlab.list_merge_requests(project_id).await? {
            if let Some(last) = resume_after {
                if summary.iid <= last {
                    continue;
                }
            }

            let mut mr = self.gitlab.get_merge_request(project_id, summary.iid).await?;
            mr.discussions = self
                .gitlab
                .list_merge_request_discussions(project_id, summary.iid)
                .await?;
            mr.approvals = Some(
                self.gitlab
                    .get_merge_request_approvals(project_id, summary.iid)
                    .await?,
            );

            let mut found: BTreeSet<String> = BTreeSet::new();
            if let Some(description) = &mr.description {
                found.extend(extract_attachment_paths(description));
            }
            for discussion in &mr.discussions {
                for note in &discussion.notes {
                    found.extend(extract_attachment_paths(&note.body));
                }
            }
            found.retain(|p| !attachment_metadata.contains_key(p));

            if !found.is_empty() {
                let batch = download_attachments(
                    self.gitlab.as_ref(),
                    &self.base_url,
                    &project.path_with_namespace,
                    &found,
                    &attachments_dir,
                    export_dir,
                )
                .await?;
                attachment_metadata.extend(batch.mapping);
                data.warnings.extend(batch.warnings);
            }

            let iid = mr.iid;
            all_mrs.push(mr);

            if all_mrs.len() % 10 == 0 {
                checkpoint.update_progress("merge_requests", all_mrs.len() as u64, iid)?;
            }
        }

        write_json(&mrs_dir.join("merge_requests.json"), &all_mrs)?;
        if !attachment_metadata.is_empty() {
            write_json(
                &mrs_dir.join("attachment_metadata.json"),
                &attachment_metadata,
            )?;
        }

        let count = all_mrs.len() as u64;
        data.merge_requests = all_mrs;
        data.mr_attachments = attachment_metadata;
        Ok(count)
    }

    async fn export_wiki(
        &self,
        config: &MigrationConfig,
        project: &Project,
        export_dir: &Path,
    ) -> Result<u64> {
        let wiki_dir = export_dir.join("wiki");
        std::fs::create_dir_all(&wiki_dir)?;

        if !project.wiki_enabled {
            write_text(
                &wiki_dir.join("wiki_disabled.txt"),
                "Wiki is not enabled for this project.\n",
            )?;
            return Ok(0);
        }

        let http_url = project
            .http_url_to_repo
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No repository URL found"))?;
        let wiki_url = gitcmd::wiki_url(http_url);

        let temp_dir = wiki_dir.join("temp_wiki_clone");
        if temp_dir.exists() {
            std::fs::remove_dir_all(&temp_dir)?;
        }

        let clone_result = gitcmd::mirror_clone(
            &wiki_url,
            &config.gitlab_token,
            &temp_dir,
            Duration::from_secs(config.timeouts.wiki_clone),
        )
        .await;

        let result = match clone_result {
            Ok(()) => {
                gitcmd::bundle_create(
                    &temp_dir,
                    &wiki_dir.join("wiki.git"),
                    Duration::from_secs(60),
                )
                .await
                .map_err(|e| anyhow::anyhow!("{}", e.technical))?;
                Ok(1)
            }
            Err(_) => {
                // Missing or never-initialized wiki repos fail to clone.
                write_text(
                    &wiki_dir.join("wiki_empty.txt"),
                    "Wiki exists but is empty or not initialized.\n",
                )?;
                Ok(0)
            }
        };

        if temp_dir.exists() {
            let _ = std::fs::remove_dir_all(&temp_dir);
        }
        result
    }

    async fn export_releases(
        &self,
        project_id: u64,
        export_dir: &Path,
        data: &mut ExportData,
    ) -> Result<u64> {
        let releases_dir = export_dir.join("releases");
        std::fs::create_dir_all(&releases_dir)?;

        let mut releases = self.gitlab.list_releases(project_id).await?;

        for release in &mut releases {
            let tag_dir = releases_dir.join(&release.tag_name);
            for asset in &mut release.assets.links {
                if asset.url.is_empty() || asset.name.is_empty() {
                    continue;
                }
                let dest = tag_dir.join(&asset.name);
                tracing::info!(tag = %release.tag_name, asset = %asset.name, "Downloading release asset");
                match self.gitlab.download_file(&asset.url, &dest).await {
                    Ok(_) => {
                        asset.local_path = Some(dest.to_string_lossy().to_string());
                    }
                    Err(e) => {
                        data.warnings.push(format!(
                            "Failed to download asset {}/{}: {}",
                            release.tag_name, asset.name, e.message
                        ));
                    }
                }
            }
        }

        write_json(&releases_dir.join("releases.json"), &releases)?;
        let count = releases.len() as u64;
        data.releases = releases;
        Ok(count)
    }

    async fn export_packages(
        &self,
        project_id: u64,
        export_dir: &Path,
        data: &mut ExportData,
    ) -> Result<u64> {
        let packages_dir = export_dir.join("packages");
        std::fs::create_dir_all(&packages_dir)?;

        // Package registries are not available in all editions; absence is
        // an empty export, not a failure.
        let packages = self.gitlab.list_packages(project_id).await.unwrap_or_default();
        write_json(&packages_dir.join("packages.json"), &packages)?;

        let count = packages.len() as u64;
        data.packages = packages;
        Ok(count)
    }

    async fn export_settings(
        &self,
        project_id: u64,
        project: &Project,
        export_dir: &Path,
        data: &mut ExportData,
    ) -> Result<u64> {
        let settings_dir = export_dir.join("settings");
        std::fs::create_dir_all(&settings_dir)?;

        let protected_branches = self.gitlab.list_protected_branches(project_id).await?;
        write_json(
            &settings_dir.join("protected_branches.json"),
            &protected_branches,
        )?;

        let protected_tags = self.gitlab.list_protected_tags(project_id).await?;
        write_json(&settings_dir.join("protected_tags.json"), &protected_tags)?;

        let members = self.gitlab.list_members(project_id).await?;
        write_json(&settings_dir.join("members.json"), &members)?;

        let mut webhooks = self.gitlab.list_webhooks(project_id).await?;
        data.webhooks = webhooks.clone();
        for hook in &mut webhooks {
            if hook.token.is_some() {
                hook.token = Some("***MASKED***".into());
            }
        }
        write_json(&settings_dir.join("webhooks.json"), &webhooks)?;

        let mut deploy_keys = self.gitlab.list_deploy_keys(project_id).await?;
        for key in &mut deploy_keys {
            key.key = mask_key(&key.key);
        }
        write_json(&settings_dir.join("deploy_keys.json"), &deploy_keys)?;

        let project_settings = serde_json::json!({
            "visibility": project.visibility,
            "default_branch": project.default_branch,
            "merge_method": project.merge_method,
            "squash_option": project.squash_option,
            "only_allow_merge_if_pipeline_succeeds": project.only_allow_merge_if_pipeline_succeeds,
            "only_allow_merge_if_all_discussions_are_resolved": project.only_allow_merge_if_all_discussions_are_resolved,
            "remove_source_branch_after_merge": project.remove_source_branch_after_merge,
            "lfs_enabled": project.lfs_enabled,
            "archived": project.archived,
            "issues_enabled": project.issues_enabled,
            "merge_requests_enabled": project.merge_requests_enabled,
            "wiki_enabled": project.wiki_enabled,
            "snippets_enabled": project.snippets_enabled,
            "container_registry_enabled": project.container_registry_enabled,
        });
        write_json(&settings_dir.join("project_settings.json"), &project_settings)?;

        // Labels and milestones ride along with settings so Plan can seed
        // issue setup without re-reading the forge.
        let labels = self.gitlab.list_labels(project_id).await?;
        let milestones = self.gitlab.list_milestones(project_id).await?;

        let count = (protected_branches.len() + members.len() + data.webhooks.len()) as u64;
        data.protected_branches = protected_branches;
        data.protected_tags = protected_tags;
        data.members = members;
        data.labels = labels;
        data.milestones = milestones;
        Ok(count)
    }
}

/// Mask a deploy key, keeping only a recognizable prefix/suffix.
fn mask_key(key: &str) -> String {
    if key.len() > 30 {
        format!("{}...{}", &key[..15], &key[key.len() - 15..])
    } else {
        format!("{}***MASKED***", &key[..key.len().min(10)])
    }
}
