//! In-memory mock implementation of GitLabApi for testing without a real
//! GitLab instance.

use crate::error::{ErrorCategory, MigrationError};
use crate::gitlab::models::*;
use crate::gitlab::traits::GitLabApi;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory mock source forge.
///
/// Seed it with projects and per-project collections; unknown ids return
/// `not_found` errors. Download requests write the configured byte payloads
/// (default 1 KiB of zeros) and are counted for assertions.
#[derive(Default)]
pub struct MockGitLab {
    pub projects: RwLock<HashMap<u64, Project>>,
    pub issues: RwLock<HashMap<u64, Vec<Issue>>>,
    pub issue_notes: RwLock<HashMap<(u64, u64), Vec<NoteBody>>>,
    pub merge_requests: RwLock<HashMap<u64, Vec<MergeRequest>>>,
    pub labels: RwLock<HashMap<u64, Vec<Label>>>,
    pub milestones: RwLock<HashMap<u64, Vec<Milestone>>>,
    pub releases: RwLock<HashMap<u64, Vec<Release>>>,
    pub packages: RwLock<HashMap<u64, Vec<Package>>>,
    pub webhooks: RwLock<HashMap<u64, Vec<Webhook>>>,
    pub schedules: RwLock<HashMap<u64, Vec<PipelineSchedule>>>,
    pub environments: RwLock<HashMap<u64, Vec<Environment>>>,
    pub variables: RwLock<HashMap<u64, Vec<CiVariable>>>,
    pub protected_branches: RwLock<HashMap<u64, Vec<ProtectedBranch>>>,
    pub protected_tags: RwLock<HashMap<u64, Vec<ProtectedTag>>>,
    pub deploy_keys: RwLock<HashMap<u64, Vec<DeployKey>>>,
    pub members: RwLock<HashMap<u64, Vec<Member>>>,
    pub branches: RwLock<HashMap<u64, Vec<Branch>>>,
    pub pipelines: RwLock<HashMap<u64, Vec<Pipeline>>>,
    /// `(project_id, path) → content`; lookups ignore the ref.
    pub files: RwLock<HashMap<(u64, String), String>>,
    /// `url → payload` for download_file; missing urls yield 1 KiB zeros.
    pub download_payloads: RwLock<HashMap<String, Vec<u8>>>,
    /// URLs that fail to download.
    pub failing_downloads: RwLock<Vec<String>>,
    pub download_count: AtomicU64,
    /// When set, `get_project` records `(current, peak)` concurrency and
    /// holds the call briefly so overlap is observable.
    pub concurrency_probe: Option<std::sync::Arc<(AtomicU64, AtomicU64)>>,
}

impl MockGitLab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a minimal project with a default branch.
    pub async fn with_project(self, project: Project) -> Self {
        self.projects.write().await.insert(project.id, project);
        self
    }

    fn not_found(what: &str) -> MigrationError {
        MigrationError::new(
            ErrorCategory::NotFound,
            "GITLAB_NOT_FOUND_001",
            format!("GitLab resource '{what}' not found"),
            format!("mock: no such {what}"),
            "Check the project URL/path is correct.",
        )
    }

    async fn get_vec<T: Clone>(
        map: &RwLock<HashMap<u64, Vec<T>>>,
        project_id: u64,
    ) -> Result<Vec<T>, MigrationError> {
        Ok(map.read().await.get(&project_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl GitLabApi for MockGitLab {
    async fn get_project(&self, project_id: u64) -> Result<Project, MigrationError> {
        if let Some(probe) = &self.concurrency_probe {
            let current = probe.0.fetch_add(1, Ordering::SeqCst) + 1;
            probe.1.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            probe.0.fetch_sub(1, Ordering::SeqCst);
        }
        self.projects
            .read()
            .await
            .get(&project_id)
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("project {project_id}")))
    }

    async fn list_projects(&self, group_path: &str) -> Result<Vec<Project>, MigrationError> {
        let projects = self.projects.read().await;
        let mut out: Vec<Project> = projects
            .values()
            .filter(|p| {
                group_path.is_empty() || p.path_with_namespace.starts_with(group_path)
            })
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn list_branches(&self, project_id: u64) -> Result<Vec<Branch>, MigrationError> {
        Self::get_vec(&self.branches, project_id).await
    }

    async fn list_tags(&self, _project_id: u64) -> Result<Vec<Tag>, MigrationError> {
        Ok(Vec::new())
    }

    async fn get_file_content(
        &self,
        project_id: u64,
        path: &str,
        _reference: &str,
    ) -> Result<Option<String>, MigrationError> {
        Ok(self
            .files
            .read()
            .await
            .get(&(project_id, path.to_string()))
            .cloned())
    }

    async fn list_issues(&self, project_id: u64) -> Result<Vec<Issue>, MigrationError> {
        Self::get_vec(&self.issues, project_id).await
    }

    async fn get_issue(&self, project_id: u64, iid: u64) -> Result<Issue, MigrationError> {
        self.issues
            .read()
            .await
            .get(&project_id)
            .and_then(|issues| issues.iter().find(|i| i.iid == iid))
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("issue {iid}")))
    }

    async fn list_issue_notes(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<NoteBody>, MigrationError> {
        Ok(self
            .issue_notes
            .read()
            .await
            .get(&(project_id, iid))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_merge_requests(
        &self,
        project_id: u64,
    ) -> Result<Vec<MergeRequest>, MigrationError> {
        Self::get_vec(&self.merge_requests, project_id).await
    }

    async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<MergeRequest, MigrationError> {
        self.merge_requests
            .read()
            .await
            .get(&project_id)
            .and_then(|mrs| mrs.iter().find(|m| m.iid == iid))
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("merge request {iid}")))
    }

    async fn list_merge_request_discussions(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<Discussion>, MigrationError> {
        Ok(self
            .get_merge_request(project_id, iid)
            .await
            .map(|mr| mr.discussions)
            .unwrap_or_default())
    }

    async fn get_merge_request_approvals(
        &self,
        _project_id: u64,
        _iid: u64,
    ) -> Result<serde_json::Value, MigrationError> {
        Ok(serde_json::json!({"approved_by": []}))
    }

    async fn list_labels(&self, project_id: u64) -> Result<Vec<Label>, MigrationError> {
        Self::get_vec(&self.labels, project_id).await
    }

    async fn list_milestones(&self, project_id: u64) -> Result<Vec<Milestone>, MigrationError> {
        Self::get_vec(&self.milestones, project_id).await
    }

    async fn list_releases(&self, project_id: u64) -> Result<Vec<Release>, MigrationError> {
        Self::get_vec(&self.releases, project_id).await
    }

    async fn list_packages(&self, project_id: u64) -> Result<Vec<Package>, MigrationError> {
        Self::get_vec(&self.packages, project_id).await
    }

    async fn list_webhooks(&self, project_id: u64) -> Result<Vec<Webhook>, MigrationError> {
        Self::get_vec(&self.webhooks, project_id).await
    }

    async fn list_pipeline_schedules(
        &self,
        project_id: u64,
    ) -> Result<Vec<PipelineSchedule>, MigrationError> {
        Self::get_vec(&self.schedules, project_id).await
    }

    async fn list_environments(
        &self,
        project_id: u64,
    ) -> Result<Vec<Environment>, MigrationError> {
        Self::get_vec(&self.environments, project_id).await
    }

    async fn list_variables(&self, project_id: u64) -> Result<Vec<CiVariable>, MigrationError> {
        Self::get_vec(&self.variables, project_id).await
    }

    async fn list_protected_branches(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProtectedBranch>, MigrationError> {
        Self::get_vec(&self.protected_branches, project_id).await
    }

    async fn list_protected_tags(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProtectedTag>, MigrationError> {
        Self::get_vec(&self.protected_tags, project_id).await
    }

    async fn list_deploy_keys(&self, project_id: u64) -> Result<Vec<DeployKey>, MigrationError> {
        Self::get_vec(&self.deploy_keys, project_id).await
    }

    async fn list_members(&self, project_id: u64) -> Result<Vec<Member>, MigrationError> {
        Self::get_vec(&self.members, project_id).await
    }

    async fn list_pipelines(
        &self,
        project_id: u64,
        max_count: usize,
    ) -> Result<Vec<Pipeline>, MigrationError> {
        let mut pipelines = Self::get_vec(&self.pipelines, project_id).await?;
        pipelines.truncate(max_count);
        Ok(pipelines)
    }

    async fn has_ci(&self, project_id: u64) -> Result<bool, MigrationError> {
        Ok(self
            .files
            .read()
            .await
            .contains_key(&(project_id, ".gitlab-ci.yml".to_string())))
    }

    async fn has_lfs(&self, project_id: u64) -> Result<bool, MigrationError> {
        Ok(self.get_project(project_id).await?.lfs_enabled)
    }

    async fn download_file(&self, url: &str, dest: &Path) -> Result<u64, MigrationError> {
        if self.failing_downloads.read().await.iter().any(|u| u == url) {
            return Err(Self::not_found(url));
        }

        self.download_count.fetch_add(1, Ordering::SeqCst);
        let payload = self
            .download_payloads
            .read()
            .await
            .get(url)
            .cloned()
            .unwrap_or_else(|| vec![0u8; 1024]);

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MigrationError::unknown("mock download", e.to_string()))?;
        }
        std::fs::write(dest, &payload)
            .map_err(|e| MigrationError::unknown("mock download", e.to_string()))?;
        Ok(payload.len() as u64)
    }
}
