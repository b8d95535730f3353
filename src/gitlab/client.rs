//! HTTP client for the GitLab REST API.
//!
//! Pagination uses GitLab's native page cursoring (`page`/`per_page` query
//! parameters plus the `x-next-page` response header). Every request is
//! gated by the shared rate limiter and wrapped in the transient-error
//! retry policy.

use crate::error::{classify_status, classify_transport, Forge, MigrationError};
use crate::gitlab::models::*;
use crate::gitlab::traits::GitLabApi;
use crate::ratelimit::{RateLimiter, RetryPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const PER_PAGE: u32 = 100;

pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl GitLabClient {
    pub fn new(
        base_url: &str,
        token: &str,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!(
                "migration-orchestrator/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            limiter,
            retry: RetryPolicy::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issue one rate-limited GET, feeding response headers back into the
    /// limiter. Returns the response plus its headers.
    async fn get_once(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<(reqwest::Response, HashMap<String, String>), MigrationError> {
        self.limiter.acquire().await;

        let response = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(Forge::GitLab, &e))?;

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        self.limiter.update_from_headers(&headers).await;

        let status = response.status();
        if !status.is_success() {
            let retry_after = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("Retry-After"))
                .and_then(|(_, v)| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                Forge::GitLab,
                status.as_u16(),
                &body,
                retry_after,
                None,
            ));
        }

        Ok((response, headers))
    }

    /// GET a single JSON resource with retry.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MigrationError> {
        let url = self.api_url(path);
        self.retry
            .run(|| async {
                let (response, _) = self.get_once(&url, query).await?;
                response.json::<T>().await.map_err(|e| {
                    MigrationError::unknown("gitlab response parsing", e.to_string())
                })
            })
            .await
    }

    /// GET every page of a collection, following `x-next-page`.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>, MigrationError> {
        let url = self.api_url(path);
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            query.extend(extra.iter().map(|(k, v)| (*k, v.clone())));

            let (batch, next_page) = self
                .retry
                .run(|| async {
                    let (response, headers) = self.get_once(&url, &query).await?;
                    let next = headers
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("x-next-page"))
                        .and_then(|(_, v)| v.trim().parse::<u32>().ok());
                    let batch: Vec<T> = response.json().await.map_err(|e| {
                        MigrationError::unknown("gitlab response parsing", e.to_string())
                    })?;
                    Ok((batch, next))
                })
                .await?;

            let batch_len = batch.len();
            items.extend(batch);

            match next_page {
                Some(next) if batch_len > 0 => page = next,
                // An empty x-next-page header means the last page.
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    async fn get_project(&self, project_id: u64) -> Result<Project, MigrationError> {
        self.get_json(&format!("projects/{project_id}"), &[]).await
    }

    async fn list_projects(&self, group_path: &str) -> Result<Vec<Project>, MigrationError> {
        if group_path.is_empty() {
            self.get_paginated("projects", &[("membership", "true".into())])
                .await
        } else {
            let encoded = urlencoding::encode(group_path);
            self.get_paginated(
                &format!("groups/{encoded}/projects"),
                &[("include_subgroups", "true".into())],
            )
            .await
        }
    }

    async fn list_branches(&self, project_id: u64) -> Result<Vec<Branch>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/repository/branches"), &[])
            .await
    }

    async fn list_tags(&self, project_id: u64) -> Result<Vec<Tag>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/repository/tags"), &[])
            .await
    }

    async fn get_file_content(
        &self,
        project_id: u64,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, MigrationError> {
        let encoded = urlencoding::encode(path);
        let url = self.api_url(&format!(
            "projects/{project_id}/repository/files/{encoded}/raw"
        ));
        let result = self
            .retry
            .run(|| async {
                let (response, _) = self
                    .get_once(&url, &[("ref", reference.to_string())])
                    .await?;
                response.text().await.map_err(|e| {
                    MigrationError::unknown("gitlab file content", e.to_string())
                })
            })
            .await;

        match result {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.category == crate::error::ErrorCategory::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_issues(&self, project_id: u64) -> Result<Vec<Issue>, MigrationError> {
        self.get_paginated(
            &format!("projects/{project_id}/issues"),
            &[("order_by", "created_at".into()), ("sort", "asc".into())],
        )
        .await
    }

    async fn get_issue(&self, project_id: u64, iid: u64) -> Result<Issue, MigrationError> {
        self.get_json(&format!("projects/{project_id}/issues/{iid}"), &[])
            .await
    }

    async fn list_issue_notes(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<NoteBody>, MigrationError> {
        self.get_paginated(
            &format!("projects/{project_id}/issues/{iid}/notes"),
            &[("sort", "asc".into())],
        )
        .await
    }

    async fn list_merge_requests(
        &self,
        project_id: u64,
    ) -> Result<Vec<MergeRequest>, MigrationError> {
        self.get_paginated(
            &format!("projects/{project_id}/merge_requests"),
            &[("order_by", "created_at".into()), ("sort", "asc".into())],
        )
        .await
    }

    async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<MergeRequest, MigrationError> {
        self.get_json(&format!("projects/{project_id}/merge_requests/{iid}"), &[])
            .await
    }

    async fn list_merge_request_discussions(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<Discussion>, MigrationError> {
        self.get_paginated(
            &format!("projects/{project_id}/merge_requests/{iid}/discussions"),
            &[],
        )
        .await
    }

    async fn get_merge_request_approvals(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<serde_json::Value, MigrationError> {
        self.get_json(
            &format!("projects/{project_id}/merge_requests/{iid}/approvals"),
            &[],
        )
        .await
    }

    async fn list_labels(&self, project_id: u64) -> Result<Vec<Label>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/labels"), &[])
            .await
    }

    async fn list_milestones(&self, project_id: u64) -> Result<Vec<Milestone>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/milestones"), &[])
            .await
    }

    async fn list_releases(&self, project_id: u64) -> Result<Vec<Release>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/releases"), &[])
            .await
    }

    async fn list_packages(&self, project_id: u64) -> Result<Vec<Package>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/packages"), &[])
            .await
    }

    async fn list_webhooks(&self, project_id: u64) -> Result<Vec<Webhook>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/hooks"), &[])
            .await
    }

    async fn list_pipeline_schedules(
        &self,
        project_id: u64,
    ) -> Result<Vec<PipelineSchedule>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/pipeline_schedules"), &[])
            .await
    }

    async fn list_environments(
        &self,
        project_id: u64,
    ) -> Result<Vec<Environment>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/environments"), &[])
            .await
    }

    async fn list_variables(&self, project_id: u64) -> Result<Vec<CiVariable>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/variables"), &[])
            .await
    }

    async fn list_protected_branches(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProtectedBranch>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/protected_branches"), &[])
            .await
    }

    async fn list_protected_tags(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProtectedTag>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/protected_tags"), &[])
            .await
    }

    async fn list_deploy_keys(&self, project_id: u64) -> Result<Vec<DeployKey>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/deploy_keys"), &[])
            .await
    }

    async fn list_members(&self, project_id: u64) -> Result<Vec<Member>, MigrationError> {
        self.get_paginated(&format!("projects/{project_id}/members/all"), &[])
            .await
    }

    async fn list_pipelines(
        &self,
        project_id: u64,
        max_count: usize,
    ) -> Result<Vec<Pipeline>, MigrationError> {
        let mut pipelines: Vec<Pipeline> = self
            .get_paginated(
                &format!("projects/{project_id}/pipelines"),
                &[("order_by", "id".into()), ("sort", "desc".into())],
            )
            .await?;
        pipelines.truncate(max_count);
        Ok(pipelines)
    }

    async fn has_ci(&self, project_id: u64) -> Result<bool, MigrationError> {
        let project = self.get_project(project_id).await?;
        let branch = project.default_branch.unwrap_or_else(|| "main".into());
        Ok(self
            .get_file_content(project_id, ".gitlab-ci.yml", &branch)
            .await?
            .is_some())
    }

    async fn has_lfs(&self, project_id: u64) -> Result<bool, MigrationError> {
        let project = self.get_project(project_id).await?;
        Ok(project.lfs_enabled)
    }

    async fn download_file(&self, url: &str, dest: &Path) -> Result<u64, MigrationError> {
        self.limiter.acquire().await;

        let response = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| classify_transport(Forge::GitLab, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                Forge::GitLab,
                status.as_u16(),
                &body,
                None,
                Some(url),
            ));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MigrationError::unknown("download target", e.to_string()))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| MigrationError::unknown("download target", e.to_string()))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify_transport(Forge::GitLab, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| MigrationError::unknown("download write", e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| MigrationError::unknown("download write", e.to_string()))?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> GitLabClient {
        GitLabClient::new(
            &server.uri(),
            "glpat-test",
            RateLimiter::gitlab(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_project_sends_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/42"))
            .and(header("PRIVATE-TOKEN", "glpat-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42,
                "path_with_namespace": "group/widget",
                "default_branch": "main"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let project = client.get_project(42).await.unwrap();
        assert_eq!(project.path_with_namespace, "group/widget");
    }

    #[tokio::test]
    async fn test_pagination_follows_next_page_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/labels"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "2")
                    .set_body_json(serde_json::json!([{"name": "bug", "color": "#ff0000"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/labels"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "")
                    .set_body_json(serde_json::json!([{"name": "feature", "color": "#00ff00"}])),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let labels = client.list_labels(1).await.unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].name, "bug");
        assert_eq!(labels[1].name, "feature");
    }

    #[tokio::test]
    async fn test_missing_file_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/repository/files/.gitlab-ci.yml/raw"))
            .respond_with(ResponseTemplate::new(404).set_body_string("404 File Not Found"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let content = client
            .get_file_content(1, ".gitlab-ci.yml", "main")
            .await
            .unwrap();
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn test_429_retried_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/9"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "1")
                    .set_body_string("slow down"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/9"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 9, "path_with_namespace": "g/p"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let start = std::time::Instant::now();
        let project = client.get_project(9).await.unwrap();
        assert_eq!(project.id, 9);
        // Honored the Retry-After before the successful retry.
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_download_file_streams_to_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/abc/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("attachments").join("file.bin");
        let client = client_for(&server).await;
        let written = client
            .download_file(&format!("{}/uploads/abc/file.bin", server.uri()), &dest)
            .await
            .unwrap();
        assert_eq!(written, 2048);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/5"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.get_project(5).await.unwrap_err();
        assert_eq!(err.code, "GITLAB_AUTH_001");
    }
}
