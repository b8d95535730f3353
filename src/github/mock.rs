//! In-memory mock implementation of GitHubApi for testing without a real
//! GitHub instance.
//!
//! Records every successful write so tests can assert on destination state,
//! counts write operations (dry-run purity checks), and can be primed to
//! fail specific operations a number of times (retry/rollback tests).

use crate::error::{ErrorCategory, MigrationError};
use crate::github::models::*;
use crate::github::traits::GitHubApi;
use crate::ratelimit::RateLimitState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct MockIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub state: String,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockPull {
    pub number: u64,
    pub title: String,
    pub head: String,
    pub base: String,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockRelease {
    pub id: u64,
    pub tag: String,
    pub assets: Vec<String>,
}

/// In-memory mock destination forge.
#[derive(Default)]
pub struct MockGitHub {
    pub repos: RwLock<HashMap<String, Repository>>,
    /// repo → branch names (seeded by push_bundle-equivalent in tests).
    pub branches: RwLock<HashMap<String, Vec<String>>>,
    pub labels: RwLock<HashMap<String, Vec<(String, String)>>>,
    pub milestones: RwLock<HashMap<String, Vec<MilestoneRef>>>,
    pub issues: RwLock<HashMap<String, Vec<MockIssue>>>,
    pub pulls: RwLock<HashMap<String, Vec<MockPull>>>,
    pub releases: RwLock<HashMap<String, Vec<MockRelease>>>,
    /// repo → path → utf8 content.
    pub files: RwLock<HashMap<String, HashMap<String, String>>>,
    pub environments: RwLock<HashMap<String, Vec<String>>>,
    /// repo → secret names (repo-level and environment-scoped together).
    pub secrets: RwLock<HashMap<String, Vec<String>>>,
    pub variables: RwLock<HashMap<String, Vec<(String, String)>>>,
    pub webhooks: RwLock<HashMap<String, Vec<WebhookRef>>>,
    pub protections: RwLock<HashMap<String, HashMap<String, BranchProtection>>>,
    pub collaborators: RwLock<HashMap<String, Vec<String>>>,
    /// Operation name → (error to return, remaining failures).
    pub failures: RwLock<HashMap<String, (MigrationError, u32)>>,
    pub write_count: AtomicU64,
    pub read_count: AtomicU64,
    next_id: AtomicU64,
}

impl MockGitHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    /// Prime `op` to fail `times` times with `error` before succeeding.
    pub async fn fail(&self, op: &str, error: MigrationError, times: u32) {
        self.failures
            .write()
            .await
            .insert(op.to_string(), (error, times));
    }

    async fn check_failure(&self, op: &str) -> Result<(), MigrationError> {
        let mut failures = self.failures.write().await;
        if let Some((error, remaining)) = failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn writes(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    async fn record_write(&self, op: &str) -> Result<(), MigrationError> {
        self.check_failure(op).await?;
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn record_read(&self) {
        self.read_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Total writes issued (assert zero after a dry run).
    pub fn total_writes(&self) -> u64 {
        self.writes()
    }

    fn not_found(what: &str) -> MigrationError {
        MigrationError::new(
            ErrorCategory::NotFound,
            "GITHUB_NOT_FOUND_001",
            format!("GitHub resource '{what}' not found"),
            format!("mock: no such {what}"),
            "Check that the organization/repository name is correct.",
        )
    }
}

#[async_trait]
impl GitHubApi for MockGitHub {
    async fn create_repository(
        &self,
        org: &str,
        repo: &NewRepository,
    ) -> Result<Repository, MigrationError> {
        self.record_write("create_repository").await?;
        let full_name = format!("{org}/{}", repo.name);
        let repository = Repository {
            id: self.next(),
            full_name: full_name.clone(),
            private: repo.private,
            default_branch: Some("main".into()),
            html_url: Some(format!("https://github.com/{full_name}")),
        };
        self.repos
            .write()
            .await
            .insert(full_name, repository.clone());
        Ok(repository)
    }

    async fn get_repository(&self, repo: &str) -> Result<Option<Repository>, MigrationError> {
        self.check_failure("get_repository").await?;
        self.record_read();
        Ok(self.repos.read().await.get(repo).cloned())
    }

    async fn delete_repository(&self, repo: &str) -> Result<(), MigrationError> {
        self.record_write("delete_repository").await?;
        self.repos
            .write()
            .await
            .remove(repo)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(repo))
    }

    async fn update_repository(
        &self,
        repo: &str,
        default_branch: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("update_repository").await?;
        let mut repos = self.repos.write().await;
        let repository = repos.get_mut(repo).ok_or_else(|| Self::not_found(repo))?;
        repository.default_branch = Some(default_branch.to_string());
        Ok(())
    }

    fn repo_push_url(&self, repo: &str) -> String {
        format!("https://github.com/{repo}.git")
    }

    async fn create_label(
        &self,
        repo: &str,
        name: &str,
        color: &str,
        _description: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("create_label").await?;
        self.labels
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push((name.to_string(), color.to_string()));
        Ok(())
    }

    async fn delete_label(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.record_write("delete_label").await?;
        if let Some(labels) = self.labels.write().await.get_mut(repo) {
            labels.retain(|(n, _)| n != name);
        }
        Ok(())
    }

    async fn get_label(
        &self,
        repo: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, MigrationError> {
        self.record_read();
        Ok(self
            .labels
            .read()
            .await
            .get(repo)
            .and_then(|labels| labels.iter().find(|(n, _)| n == name))
            .map(|(n, c)| serde_json::json!({"name": n, "color": c})))
    }

    async fn create_milestone(
        &self,
        repo: &str,
        title: &str,
        _description: &str,
        _due_on: Option<&str>,
        _state: &str,
    ) -> Result<MilestoneRef, MigrationError> {
        self.record_write("create_milestone").await?;
        let milestone = MilestoneRef {
            number: self.next(),
            title: title.to_string(),
        };
        self.milestones
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push(milestone.clone());
        Ok(milestone)
    }

    async fn delete_milestone(&self, repo: &str, number: u64) -> Result<(), MigrationError> {
        self.record_write("delete_milestone").await?;
        if let Some(milestones) = self.milestones.write().await.get_mut(repo) {
            milestones.retain(|m| m.number != number);
        }
        Ok(())
    }

    async fn list_milestones(&self, repo: &str) -> Result<Vec<MilestoneRef>, MigrationError> {
        self.record_read();
        Ok(self
            .milestones
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
        _milestone: Option<u64>,
        _assignees: &[String],
    ) -> Result<IssueRef, MigrationError> {
        self.record_write("create_issue").await?;
        let number = self.next();
        self.issues
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push(MockIssue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                labels: labels.to_vec(),
                state: "open".into(),
                comments: Vec::new(),
            });
        Ok(IssueRef {
            number,
            html_url: None,
        })
    }

    async fn close_issue(&self, repo: &str, number: u64) -> Result<(), MigrationError> {
        self.record_write("close_issue").await?;
        let mut issues = self.issues.write().await;
        let issue = issues
            .get_mut(repo)
            .and_then(|list| list.iter_mut().find(|i| i.number == number))
            .ok_or_else(|| Self::not_found(&format!("issue {number}")))?;
        issue.state = "closed".into();
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("create_issue_comment").await?;
        let mut issues = self.issues.write().await;
        let issue = issues
            .get_mut(repo)
            .and_then(|list| list.iter_mut().find(|i| i.number == issue_number))
            .ok_or_else(|| Self::not_found(&format!("issue {issue_number}")))?;
        issue.comments.push(body.to_string());
        Ok(())
    }

    async fn count_issues(&self, repo: &str) -> Result<u64, MigrationError> {
        self.record_read();
        Ok(self
            .issues
            .read()
            .await
            .get(repo)
            .map(|v| v.len() as u64)
            .unwrap_or(0))
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        _body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, MigrationError> {
        self.record_write("create_pull_request").await?;
        let number = self.next();
        self.pulls
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push(MockPull {
                number,
                title: title.to_string(),
                head: head.to_string(),
                base: base.to_string(),
                state: "open".into(),
            });
        Ok(PullRequestRef {
            number,
            html_url: None,
        })
    }

    async fn close_pull_request(&self, repo: &str, number: u64) -> Result<(), MigrationError> {
        self.record_write("close_pull_request").await?;
        let mut pulls = self.pulls.write().await;
        let pull = pulls
            .get_mut(repo)
            .and_then(|list| list.iter_mut().find(|p| p.number == number))
            .ok_or_else(|| Self::not_found(&format!("pull {number}")))?;
        pull.state = "closed".into();
        Ok(())
    }

    async fn count_pull_requests(&self, repo: &str) -> Result<u64, MigrationError> {
        self.record_read();
        Ok(self
            .pulls
            .read()
            .await
            .get(repo)
            .map(|v| v.len() as u64)
            .unwrap_or(0))
    }

    async fn create_release(
        &self,
        repo: &str,
        tag: &str,
        _name: &str,
        _body: &str,
        _draft: bool,
        _prerelease: bool,
    ) -> Result<ReleaseRef, MigrationError> {
        self.record_write("create_release").await?;
        let id = self.next();
        self.releases
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push(MockRelease {
                id,
                tag: tag.to_string(),
                assets: Vec::new(),
            });
        Ok(ReleaseRef {
            id,
            tag_name: tag.to_string(),
            upload_url: None,
        })
    }

    async fn delete_release(&self, repo: &str, release_id: u64) -> Result<(), MigrationError> {
        self.record_write("delete_release").await?;
        if let Some(releases) = self.releases.write().await.get_mut(repo) {
            releases.retain(|r| r.id != release_id);
        }
        Ok(())
    }

    async fn get_release_by_tag(
        &self,
        repo: &str,
        tag: &str,
    ) -> Result<Option<ReleaseRef>, MigrationError> {
        self.record_read();
        Ok(self
            .releases
            .read()
            .await
            .get(repo)
            .and_then(|list| list.iter().find(|r| r.tag == tag))
            .map(|r| ReleaseRef {
                id: r.id,
                tag_name: r.tag.clone(),
                upload_url: None,
            }))
    }

    async fn list_releases(&self, repo: &str) -> Result<Vec<ReleaseRef>, MigrationError> {
        self.record_read();
        Ok(self
            .releases
            .read()
            .await
            .get(repo)
            .map(|list| {
                list.iter()
                    .map(|r| ReleaseRef {
                        id: r.id,
                        tag_name: r.tag.clone(),
                        upload_url: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upload_release_asset(
        &self,
        repo: &str,
        release_id: u64,
        name: &str,
        _content_type: &str,
        _file: &Path,
    ) -> Result<(), MigrationError> {
        self.record_write("upload_release_asset").await?;
        let mut releases = self.releases.write().await;
        let release = releases
            .get_mut(repo)
            .and_then(|list| list.iter_mut().find(|r| r.id == release_id))
            .ok_or_else(|| Self::not_found(&format!("release {release_id}")))?;
        release.assets.push(name.to_string());
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        _message: &str,
        _branch: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("create_or_update_file").await?;
        self.files
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .insert(
                path.to_string(),
                String::from_utf8_lossy(content).to_string(),
            );
        Ok(())
    }

    async fn get_file_content(
        &self,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, MigrationError> {
        self.record_read();
        Ok(self
            .files
            .read()
            .await
            .get(repo)
            .and_then(|files| files.get(path))
            .cloned())
    }

    async fn list_workflows(&self, repo: &str) -> Result<Vec<Workflow>, MigrationError> {
        self.record_read();
        Ok(self
            .files
            .read()
            .await
            .get(repo)
            .map(|files| {
                files
                    .keys()
                    .filter(|p| p.starts_with(".github/workflows/"))
                    .enumerate()
                    .map(|(i, p)| Workflow {
                        id: i as u64 + 1,
                        name: p.rsplit('/').next().unwrap_or(p).to_string(),
                        path: p.clone(),
                        state: "active".into(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_environment(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.record_write("create_environment").await?;
        let mut environments = self.environments.write().await;
        let list = environments.entry(repo.to_string()).or_default();
        if !list.iter().any(|e| e == name) {
            list.push(name.to_string());
        }
        Ok(())
    }

    async fn delete_environment(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.record_write("delete_environment").await?;
        if let Some(list) = self.environments.write().await.get_mut(repo) {
            list.retain(|e| e != name);
        }
        Ok(())
    }

    async fn list_environments(&self, repo: &str) -> Result<Vec<String>, MigrationError> {
        self.record_read();
        Ok(self
            .environments
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_public_key(&self, _repo: &str) -> Result<PublicKey, MigrationError> {
        self.record_read();
        // A fixed valid X25519 public key (all-zero scalar's public point
        // is fine for tests; the mock never decrypts).
        Ok(PublicKey {
            key_id: "mock-key-1".into(),
            key: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                [0x2Fu8; 32],
            ),
        })
    }

    async fn get_environment_public_key(
        &self,
        repo: &str,
        _environment: &str,
    ) -> Result<PublicKey, MigrationError> {
        self.get_public_key(repo).await
    }

    async fn put_secret(
        &self,
        repo: &str,
        name: &str,
        _sealed_value: &str,
        _key_id: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("put_secret").await?;
        let mut secrets = self.secrets.write().await;
        let list = secrets.entry(repo.to_string()).or_default();
        if !list.iter().any(|s| s == name) {
            list.push(name.to_string());
        }
        Ok(())
    }

    async fn put_environment_secret(
        &self,
        repo: &str,
        _environment: &str,
        name: &str,
        sealed_value: &str,
        key_id: &str,
    ) -> Result<(), MigrationError> {
        self.put_secret(repo, name, sealed_value, key_id).await
    }

    async fn delete_secret(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.record_write("delete_secret").await?;
        if let Some(list) = self.secrets.write().await.get_mut(repo) {
            list.retain(|s| s != name);
        }
        Ok(())
    }

    async fn list_secrets(&self, repo: &str) -> Result<Vec<String>, MigrationError> {
        self.record_read();
        Ok(self
            .secrets
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_variable(
        &self,
        repo: &str,
        name: &str,
        value: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("put_variable").await?;
        self.variables
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    async fn delete_variable(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.record_write("delete_variable").await?;
        if let Some(list) = self.variables.write().await.get_mut(repo) {
            list.retain(|(n, _)| n != name);
        }
        Ok(())
    }

    async fn list_variables(&self, repo: &str) -> Result<Vec<(String, String)>, MigrationError> {
        self.record_read();
        Ok(self
            .variables
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_branch_protection(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<(), MigrationError> {
        self.record_write("set_branch_protection").await?;
        self.protections
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .insert(branch.to_string(), protection.clone());
        Ok(())
    }

    async fn delete_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("delete_branch_protection").await?;
        if let Some(map) = self.protections.write().await.get_mut(repo) {
            map.remove(branch);
        }
        Ok(())
    }

    async fn get_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<serde_json::Value>, MigrationError> {
        self.record_read();
        Ok(self
            .protections
            .read()
            .await
            .get(repo)
            .and_then(|map| map.get(branch))
            .map(|p| serde_json::to_value(p).unwrap_or_default()))
    }

    async fn add_collaborator(
        &self,
        repo: &str,
        username: &str,
        _permission: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("add_collaborator").await?;
        self.collaborators
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push(username.to_string());
        Ok(())
    }

    async fn remove_collaborator(
        &self,
        repo: &str,
        username: &str,
    ) -> Result<(), MigrationError> {
        self.record_write("remove_collaborator").await?;
        if let Some(list) = self.collaborators.write().await.get_mut(repo) {
            list.retain(|u| u != username);
        }
        Ok(())
    }

    async fn list_collaborators(&self, repo: &str) -> Result<Vec<String>, MigrationError> {
        self.record_read();
        Ok(self
            .collaborators
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        repo: &str,
        url: &str,
        content_type: &str,
        _secret: Option<&str>,
        events: &[String],
        active: bool,
    ) -> Result<WebhookRef, MigrationError> {
        self.record_write("create_webhook").await?;
        let hook = WebhookRef {
            id: self.next(),
            config: WebhookConfig {
                url: url.to_string(),
                content_type: content_type.to_string(),
            },
            events: events.to_vec(),
            active,
        };
        self.webhooks
            .write()
            .await
            .entry(repo.to_string())
            .or_default()
            .push(hook.clone());
        Ok(hook)
    }

    async fn delete_webhook(&self, repo: &str, hook_id: u64) -> Result<(), MigrationError> {
        self.record_write("delete_webhook").await?;
        if let Some(hooks) = self.webhooks.write().await.get_mut(repo) {
            hooks.retain(|h| h.id != hook_id);
        }
        Ok(())
    }

    async fn update_webhook(
        &self,
        repo: &str,
        hook_id: u64,
        _insecure_ssl: bool,
    ) -> Result<(), MigrationError> {
        self.record_write("update_webhook").await?;
        let webhooks = self.webhooks.read().await;
        let exists = webhooks
            .get(repo)
            .map(|hooks| hooks.iter().any(|h| h.id == hook_id))
            .unwrap_or(false);
        if exists {
            Ok(())
        } else {
            Err(Self::not_found(&format!("webhook {hook_id}")))
        }
    }

    async fn list_webhooks(&self, repo: &str) -> Result<Vec<WebhookRef>, MigrationError> {
        self.record_read();
        Ok(self
            .webhooks
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_team(&self, _org: &str, _name: &str) -> Result<(), MigrationError> {
        self.record_write("create_team").await?;
        Ok(())
    }

    async fn list_branches(&self, repo: &str) -> Result<Vec<BranchRef>, MigrationError> {
        self.record_read();
        Ok(self
            .branches
            .read()
            .await
            .get(repo)
            .map(|list| {
                list.iter()
                    .map(|name| BranchRef { name: name.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_tags(&self, _repo: &str) -> Result<u64, MigrationError> {
        self.record_read();
        Ok(0)
    }

    async fn rate_limit(&self) -> Result<RateLimitState, MigrationError> {
        self.record_read();
        Ok(RateLimitState {
            limit: Some(5000),
            remaining: Some(5000),
            reset_at: None,
            retry_after: None,
            throttle_delay: 0.0,
        })
    }
}
