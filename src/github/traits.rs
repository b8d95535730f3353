//! GitHubApi trait definition.
//!
//! Abstract interface over the destination-forge API: the write surface
//! used by Apply and the read surface used by Verify and dry-run probes.
//! Mirrors the public async surface of `GitHubClient` so the stages can be
//! tested against the in-memory mock.

use crate::error::MigrationError;
use crate::github::models::*;
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use std::path::Path;

/// Abstract interface for all destination-forge operations.
///
/// `repo` parameters are `owner/name` strings.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    // ========================================================================
    // Repository
    // ========================================================================

    async fn create_repository(
        &self,
        org: &str,
        repo: &NewRepository,
    ) -> Result<Repository, MigrationError>;

    /// `Ok(None)` when the repository does not exist.
    async fn get_repository(&self, repo: &str) -> Result<Option<Repository>, MigrationError>;

    async fn delete_repository(&self, repo: &str) -> Result<(), MigrationError>;

    /// Update repository settings (currently the default branch).
    async fn update_repository(
        &self,
        repo: &str,
        default_branch: &str,
    ) -> Result<(), MigrationError>;

    /// Clone URL for pushing (token injected by the caller via gitcmd).
    fn repo_push_url(&self, repo: &str) -> String;

    // ========================================================================
    // Issues, labels, milestones
    // ========================================================================

    async fn create_label(
        &self,
        repo: &str,
        name: &str,
        color: &str,
        description: &str,
    ) -> Result<(), MigrationError>;

    async fn delete_label(&self, repo: &str, name: &str) -> Result<(), MigrationError>;

    async fn get_label(&self, repo: &str, name: &str) -> Result<Option<serde_json::Value>, MigrationError>;

    async fn create_milestone(
        &self,
        repo: &str,
        title: &str,
        description: &str,
        due_on: Option<&str>,
        state: &str,
    ) -> Result<MilestoneRef, MigrationError>;

    async fn delete_milestone(&self, repo: &str, number: u64) -> Result<(), MigrationError>;

    async fn list_milestones(&self, repo: &str) -> Result<Vec<MilestoneRef>, MigrationError>;

    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
        milestone: Option<u64>,
        assignees: &[String],
    ) -> Result<IssueRef, MigrationError>;

    async fn close_issue(&self, repo: &str, number: u64) -> Result<(), MigrationError>;

    async fn create_issue_comment(
        &self,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), MigrationError>;

    /// Total issue count derived from the Link header (all states).
    async fn count_issues(&self, repo: &str) -> Result<u64, MigrationError>;

    // ========================================================================
    // Pull requests
    // ========================================================================

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, MigrationError>;

    async fn close_pull_request(&self, repo: &str, number: u64) -> Result<(), MigrationError>;

    async fn count_pull_requests(&self, repo: &str) -> Result<u64, MigrationError>;

    // ========================================================================
    // Releases
    // ========================================================================

    async fn create_release(
        &self,
        repo: &str,
        tag: &str,
        name: &str,
        body: &str,
        draft: bool,
        prerelease: bool,
    ) -> Result<ReleaseRef, MigrationError>;

    async fn delete_release(&self, repo: &str, release_id: u64) -> Result<(), MigrationError>;

    async fn get_release_by_tag(
        &self,
        repo: &str,
        tag: &str,
    ) -> Result<Option<ReleaseRef>, MigrationError>;

    async fn list_releases(&self, repo: &str) -> Result<Vec<ReleaseRef>, MigrationError>;

    async fn upload_release_asset(
        &self,
        repo: &str,
        release_id: u64,
        name: &str,
        content_type: &str,
        file: &Path,
    ) -> Result<(), MigrationError>;

    // ========================================================================
    // CI: workflows, environments, secrets, variables
    // ========================================================================

    /// Commit a file (creating or updating it) on a branch. Content is
    /// base64-encoded on the wire.
    async fn create_or_update_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        message: &str,
        branch: &str,
    ) -> Result<(), MigrationError>;

    async fn get_file_content(
        &self,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, MigrationError>;

    async fn list_workflows(&self, repo: &str) -> Result<Vec<Workflow>, MigrationError>;

    async fn create_environment(&self, repo: &str, name: &str) -> Result<(), MigrationError>;

    async fn delete_environment(&self, repo: &str, name: &str) -> Result<(), MigrationError>;

    async fn list_environments(&self, repo: &str) -> Result<Vec<String>, MigrationError>;

    /// Repo-level public key for sealing secret values.
    async fn get_public_key(&self, repo: &str) -> Result<PublicKey, MigrationError>;

    /// Environment-scoped public key.
    async fn get_environment_public_key(
        &self,
        repo: &str,
        environment: &str,
    ) -> Result<PublicKey, MigrationError>;

    /// Store a repo-level secret. `sealed_value` is the base64 sealed box.
    async fn put_secret(
        &self,
        repo: &str,
        name: &str,
        sealed_value: &str,
        key_id: &str,
    ) -> Result<(), MigrationError>;

    async fn put_environment_secret(
        &self,
        repo: &str,
        environment: &str,
        name: &str,
        sealed_value: &str,
        key_id: &str,
    ) -> Result<(), MigrationError>;

    async fn delete_secret(&self, repo: &str, name: &str) -> Result<(), MigrationError>;

    /// Secret names only; values are never readable.
    async fn list_secrets(&self, repo: &str) -> Result<Vec<String>, MigrationError>;

    async fn put_variable(
        &self,
        repo: &str,
        name: &str,
        value: &str,
    ) -> Result<(), MigrationError>;

    async fn delete_variable(&self, repo: &str, name: &str) -> Result<(), MigrationError>;

    async fn list_variables(&self, repo: &str) -> Result<Vec<(String, String)>, MigrationError>;

    // ========================================================================
    // Governance & integrations
    // ========================================================================

    async fn set_branch_protection(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<(), MigrationError>;

    async fn delete_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<(), MigrationError>;

    async fn get_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<serde_json::Value>, MigrationError>;

    async fn add_collaborator(
        &self,
        repo: &str,
        username: &str,
        permission: &str,
    ) -> Result<(), MigrationError>;

    async fn remove_collaborator(&self, repo: &str, username: &str)
        -> Result<(), MigrationError>;

    async fn list_collaborators(&self, repo: &str) -> Result<Vec<String>, MigrationError>;

    async fn create_webhook(
        &self,
        repo: &str,
        url: &str,
        content_type: &str,
        secret: Option<&str>,
        events: &[String],
        active: bool,
    ) -> Result<WebhookRef, MigrationError>;

    async fn delete_webhook(&self, repo: &str, hook_id: u64) -> Result<(), MigrationError>;

    /// Update a webhook's delivery configuration.
    async fn update_webhook(
        &self,
        repo: &str,
        hook_id: u64,
        insecure_ssl: bool,
    ) -> Result<(), MigrationError>;

    async fn list_webhooks(&self, repo: &str) -> Result<Vec<WebhookRef>, MigrationError>;

    async fn create_team(&self, org: &str, name: &str) -> Result<(), MigrationError>;

    // ========================================================================
    // Reads for Verify
    // ========================================================================

    async fn list_branches(&self, repo: &str) -> Result<Vec<BranchRef>, MigrationError>;

    async fn count_tags(&self, repo: &str) -> Result<u64, MigrationError>;

    /// Current core rate-limit state.
    async fn rate_limit(&self) -> Result<RateLimitState, MigrationError>;
}
