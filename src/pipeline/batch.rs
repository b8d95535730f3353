//! Batch orchestrator: bounded-parallel migration of many projects.
//!
//! N pipelines run concurrently under a semaphore. Shared resources (one
//! rate limiter per API and a mutex-guarded user-mapping cache) are
//! handed to every pipeline so concurrency neither multiplies the request
//! rate nor re-resolves the same users. A project's failure (including a
//! panic) is materialized as a failed result and never aborts the batch.

use crate::config::MigrationConfig;
use crate::gitlab::GitLabApi;
use crate::github::GitHubApi;
use crate::pipeline::{MigrationMode, PipelineOrchestrator, PipelineResult, StageName};
use crate::ratelimit::RateLimiter;
use crate::transform::users::UserMapping;
use crate::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Resources shared across all pipelines of one batch.
pub struct SharedResources {
    pub gitlab_limiter: Arc<RateLimiter>,
    pub github_limiter: Arc<RateLimiter>,
    /// source username → resolved mapping; write-once per user.
    pub user_mapping_cache: Arc<Mutex<BTreeMap<String, UserMapping>>>,
}

impl SharedResources {
    pub fn new() -> Self {
        Self {
            gitlab_limiter: RateLimiter::gitlab(),
            github_limiter: RateLimiter::github(),
            user_mapping_cache: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub async fn get_user_mapping(&self, source_username: &str) -> Option<UserMapping> {
        self.user_mapping_cache
            .lock()
            .await
            .get(source_username)
            .cloned()
    }

    pub async fn set_user_mapping(&self, mapping: UserMapping) {
        self.user_mapping_cache
            .lock()
            .await
            .entry(mapping.source_username.clone())
            .or_insert(mapping);
    }
}

impl Default for SharedResources {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResult {
    pub project_id: u64,
    pub index: usize,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// `success`, `partial_success`, or `failed`.
    pub status: String,
    pub mode: MigrationMode,
    pub started_at: String,
    pub finished_at: String,
    pub total_projects: usize,
    pub successful: usize,
    pub failed: usize,
    pub parallel_limit: usize,
    pub results: Vec<ProjectResult>,
}

/// Clients for one project's pipeline, built by the caller so client
/// construction stays outside the batch (and tests can inject mocks).
pub type ClientFactory =
    Arc<dyn Fn(&MigrationConfig) -> (Arc<dyn GitLabApi>, Arc<dyn GitHubApi>) + Send + Sync>;

pub struct BatchOrchestrator {
    shared: Arc<SharedResources>,
    clients: ClientFactory,
}

impl BatchOrchestrator {
    pub fn new(clients: ClientFactory) -> Self {
        Self {
            shared: Arc::new(SharedResources::new()),
            clients,
        }
    }

    pub fn with_shared_resources(mut self, shared: Arc<SharedResources>) -> Self {
        self.shared = shared;
        self
    }

    pub fn shared_resources(&self) -> Arc<SharedResources> {
        self.shared.clone()
    }

    /// Run every project through the pipeline, at most `parallel_limit`
    /// concurrently.
    pub async fn execute_batch_migration(
        &self,
        project_configs: Vec<MigrationConfig>,
        mode: MigrationMode,
        parallel_limit: usize,
        resume_from: Option<StageName>,
    ) -> BatchResult {
        let parallel_limit = parallel_limit.max(1);
        let started_at = chrono::Utc::now().to_rfc3339();
        let total_projects = project_configs.len();

        tracing::info!(
            total_projects,
            parallel_limit,
            mode = ?mode,
            "Starting batch migration"
        );

        let semaphore = Arc::new(Semaphore::new(parallel_limit));
        let mut handles = Vec::with_capacity(total_projects);

        for (index, config) in project_configs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let shared = self.shared.clone();
            let clients = self.clients.clone();

            let project_id = match config.scope {
                crate::config::Scope::Project(id) => id,
                crate::config::Scope::Group(_) => 0,
            };

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                tracing::info!(project_id, index, "Starting project migration");

                let (gitlab, github) = clients(&config);
                let orchestrator = PipelineOrchestrator::new(gitlab, github, config)
                    .with_mapping_cache(shared.user_mapping_cache.clone());

                let result = orchestrator.run_migration(mode, resume_from).await;
                tracing::info!(
                    project_id,
                    status = ?result.status,
                    "Completed project migration"
                );

                ProjectResult {
                    project_id,
                    index,
                    status: result.status,
                    error: None,
                    pipeline: Some(result),
                }
            }));
        }

        let mut results: Vec<ProjectResult> = Vec::with_capacity(total_projects);
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                // A panicked pipeline becomes a failed result, never a
                // batch abort.
                Err(join_error) => {
                    tracing::error!(index, error = %join_error, "Project migration panicked");
                    results.push(ProjectResult {
                        project_id: 0,
                        index,
                        status: StageStatus::Failed,
                        error: Some(join_error.to_string()),
                        pipeline: None,
                    });
                }
            }
        }
        results.sort_by_key(|r| r.index);

        let successful = results
            .iter()
            .filter(|r| r.status != StageStatus::Failed)
            .count();
        let failed = results.len() - successful;
        let status = if failed == 0 {
            "success"
        } else if successful > 0 {
            "partial_success"
        } else {
            "failed"
        };

        tracing::info!(successful, failed, total_projects, "Batch migration completed");

        BatchResult {
            status: status.into(),
            mode,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            total_projects,
            successful,
            failed,
            parallel_limit,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scope;
    use crate::gitlab::mock::MockGitLab;
    use crate::gitlab::models::Project;
    use crate::github::mock::MockGitHub;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn config_for(id: u64, root: &std::path::Path) -> MigrationConfig {
        MigrationConfig {
            run_id: format!("run-{id}"),
            gitlab_url: "https://gl.example".into(),
            gitlab_token: "glpat-x".into(),
            github_token: "ghp_x".into(),
            github_org: "acme".into(),
            scope: Scope::Project(id),
            artifact_root: root.join(format!("project-{id}")),
            resume: false,
            max_retries: 1,
            retry_delay_secs: 0,
            timeouts: Default::default(),
            verify_tolerance: 0.05,
        }
    }

    /// Factory producing a seeded mock GitLab per project; project id 3 is
    /// unknown so its pipeline fails. The probe records peak `get_project`
    /// concurrency across the batch.
    fn mock_factory(probe: Arc<(AtomicU64, AtomicU64)>) -> ClientFactory {
        Arc::new(move |config: &MigrationConfig| {
            let id = match config.scope {
                Scope::Project(id) => id,
                Scope::Group(_) => 0,
            };
            let mut gitlab = MockGitLab::new();
            gitlab.concurrency_probe = Some(probe.clone());
            if id != 3 {
                // Seed synchronously; the lock is uncontended at this point.
                let project = Project {
                    id,
                    path_with_namespace: format!("group/project-{id}"),
                    name: format!("project-{id}"),
                    visibility: "private".into(),
                    default_branch: Some("main".into()),
                    ..Default::default()
                };
                gitlab
                    .projects
                    .try_write()
                    .expect("uncontended")
                    .insert(id, project);
            }
            (
                Arc::new(gitlab) as Arc<dyn GitLabApi>,
                Arc::new(MockGitHub::new()) as Arc<dyn GitHubApi>,
            )
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_partial_success_with_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let configs: Vec<MigrationConfig> =
            (1..=5).map(|id| config_for(id, dir.path())).collect();

        let probe = Arc::new((AtomicU64::new(0), AtomicU64::new(0)));
        let batch = BatchOrchestrator::new(mock_factory(probe.clone()));

        let result = batch
            .execute_batch_migration(configs, MigrationMode::SingleProject, 3, None)
            .await;

        assert_eq!(result.status, "partial_success");
        assert_eq!(result.total_projects, 5);
        assert_eq!(result.successful, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.parallel_limit, 3);
        // Peak observed concurrency never exceeded the semaphore size.
        let peak = probe.1.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency was {peak}");

        // Project 3 is the failure; its error did not abort the others.
        let failed: Vec<&ProjectResult> = result
            .results
            .iter()
            .filter(|r| r.status == StageStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].project_id, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_all_success() {
        let dir = tempfile::tempdir().unwrap();
        let configs: Vec<MigrationConfig> =
            (1..=2).map(|id| config_for(id, dir.path())).collect();

        let batch = BatchOrchestrator::new(mock_factory(Arc::new((
            AtomicU64::new(0),
            AtomicU64::new(0),
        ))));
        let result = batch
            .execute_batch_migration(configs, MigrationMode::SingleProject, 5, None)
            .await;

        assert_eq!(result.status, "success");
        assert_eq!(result.failed, 0);
        // Disjoint artifact subtrees.
        assert!(dir.path().join("project-1/export").exists());
        assert!(dir.path().join("project-2/export").exists());
    }

    #[tokio::test]
    async fn test_shared_user_mapping_cache_write_once() {
        let shared = SharedResources::new();
        let mapping = UserMapping {
            source_username: "alice".into(),
            source_email: None,
            destination_login: Some("alice-gh".into()),
            confidence: crate::transform::users::Confidence::High,
            method: crate::transform::users::MatchMethod::Email,
            is_manual: false,
        };
        shared.set_user_mapping(mapping.clone()).await;

        // A later, different resolution does not overwrite the first.
        let mut second = mapping.clone();
        second.destination_login = Some("other".into());
        shared.set_user_mapping(second).await;

        let cached = shared.get_user_mapping("alice").await.unwrap();
        assert_eq!(cached.destination_login.as_deref(), Some("alice-gh"));
    }
}
