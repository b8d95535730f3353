//! GitLabApi trait definition.
//!
//! Abstract interface over the source-forge read API. Mirrors the public
//! async surface of `GitLabClient`, enabling testing with the in-memory
//! mock and keeping the export/discovery stages independent of HTTP.

use crate::error::MigrationError;
use crate::gitlab::models::*;
use async_trait::async_trait;
use std::path::Path;

/// Abstract interface for all source-forge read operations.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    // ========================================================================
    // Projects
    // ========================================================================

    /// Get a project by numeric id.
    async fn get_project(&self, project_id: u64) -> Result<Project, MigrationError>;

    /// List projects in a group (including subgroups), or all accessible
    /// projects when `group_path` is empty.
    async fn list_projects(&self, group_path: &str) -> Result<Vec<Project>, MigrationError>;

    // ========================================================================
    // Repository
    // ========================================================================

    async fn list_branches(&self, project_id: u64) -> Result<Vec<Branch>, MigrationError>;

    async fn list_tags(&self, project_id: u64) -> Result<Vec<Tag>, MigrationError>;

    /// Read a file's content at a ref. `Ok(None)` when the file is absent.
    async fn get_file_content(
        &self,
        project_id: u64,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, MigrationError>;

    // ========================================================================
    // Issues & merge requests
    // ========================================================================

    async fn list_issues(&self, project_id: u64) -> Result<Vec<Issue>, MigrationError>;

    async fn get_issue(&self, project_id: u64, iid: u64) -> Result<Issue, MigrationError>;

    async fn list_issue_notes(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<NoteBody>, MigrationError>;

    async fn list_merge_requests(
        &self,
        project_id: u64,
    ) -> Result<Vec<MergeRequest>, MigrationError>;

    async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<MergeRequest, MigrationError>;

    async fn list_merge_request_discussions(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<Discussion>, MigrationError>;

    async fn get_merge_request_approvals(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<serde_json::Value, MigrationError>;

    // ========================================================================
    // Metadata
    // ========================================================================

    async fn list_labels(&self, project_id: u64) -> Result<Vec<Label>, MigrationError>;

    async fn list_milestones(&self, project_id: u64) -> Result<Vec<Milestone>, MigrationError>;

    async fn list_releases(&self, project_id: u64) -> Result<Vec<Release>, MigrationError>;

    async fn list_packages(&self, project_id: u64) -> Result<Vec<Package>, MigrationError>;

    async fn list_webhooks(&self, project_id: u64) -> Result<Vec<Webhook>, MigrationError>;

    async fn list_pipeline_schedules(
        &self,
        project_id: u64,
    ) -> Result<Vec<PipelineSchedule>, MigrationError>;

    async fn list_environments(
        &self,
        project_id: u64,
    ) -> Result<Vec<Environment>, MigrationError>;

    async fn list_variables(&self, project_id: u64) -> Result<Vec<CiVariable>, MigrationError>;

    async fn list_protected_branches(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProtectedBranch>, MigrationError>;

    async fn list_protected_tags(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProtectedTag>, MigrationError>;

    async fn list_deploy_keys(&self, project_id: u64) -> Result<Vec<DeployKey>, MigrationError>;

    async fn list_members(&self, project_id: u64) -> Result<Vec<Member>, MigrationError>;

    async fn list_pipelines(
        &self,
        project_id: u64,
        max_count: usize,
    ) -> Result<Vec<Pipeline>, MigrationError>;

    // ========================================================================
    // Feature probes
    // ========================================================================

    /// Whether the project has a CI configuration file on its default branch.
    async fn has_ci(&self, project_id: u64) -> Result<bool, MigrationError>;

    /// Whether the project uses Git LFS.
    async fn has_lfs(&self, project_id: u64) -> Result<bool, MigrationError>;

    // ========================================================================
    // Downloads
    // ========================================================================

    /// Stream a URL to disk. Returns the number of bytes written.
    async fn download_file(&self, url: &str, dest: &Path) -> Result<u64, MigrationError>;
}
