//! HTTP client for the GitHub REST API.
//!
//! Pagination follows the Link-header convention; aggregate counts are
//! derived from the `last` page number with `per_page=1` so Verify never
//! has to fetch full collections. Every request is gated by the shared
//! rate limiter and wrapped in the transient-error retry policy.

use crate::error::{classify_status, classify_transport, Forge, MigrationError};
use crate::github::models::*;
use crate::github::traits::GitHubApi;
use crate::ratelimit::{RateLimitState, RateLimiter, RetryPolicy};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const API_VERSION: &str = "2022-11-28";

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

/// Extract the `last` page number from a Link header.
///
/// `<https://api.github.com/...?page=34>; rel="last"` → 34.
pub fn last_page_from_link(link: &str) -> Option<u64> {
    link.split(',').find_map(|part| {
        let (url_part, rel_part) = part.split_once(';')?;
        if !rel_part.contains("rel=\"last\"") {
            return None;
        }
        let url = url_part.trim().trim_start_matches('<').trim_end_matches('>');
        url.split(['?', '&'])
            .find_map(|kv| kv.strip_prefix("page="))
            .and_then(|v| v.parse().ok())
    })
}

/// Extract the `next` page URL from a Link header.
fn next_url_from_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (url_part, rel_part) = part.split_once(';')?;
        rel_part.contains("rel=\"next\"").then(|| {
            url_part
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

impl GitHubClient {
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

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issue one rate-limited request, feeding headers back to the limiter.
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        resource: Option<&str>,
    ) -> Result<(reqwest::Response, HashMap<String, String>), MigrationError> {
        self.limiter.acquire().await;

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(Forge::GitHub, &e))?;

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
                Forge::GitHub,
                status.as_u16(),
                &body,
                retry_after,
                resource,
            ));
        }

        Ok((response, headers))
    }

    /// Request a JSON resource with retry.
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        resource: Option<&str>,
    ) -> Result<T, MigrationError> {
        let url = self.api_url(path);
        self.retry
            .run(|| async {
                let (response, _) = self
                    .send_once(method.clone(), &url, body.as_ref(), resource)
                    .await?;
                response.json::<T>().await.map_err(|e| {
                    MigrationError::unknown("github response parsing", e.to_string())
                })
            })
            .await
    }

    /// Request where the response body is irrelevant (204s and the like).
    async fn request_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        resource: Option<&str>,
    ) -> Result<(), MigrationError> {
        let url = self.api_url(path);
        self.retry
            .run(|| async {
                self.send_once(method.clone(), &url, body.as_ref(), resource)
                    .await
                    .map(|_| ())
            })
            .await
    }

    /// GET returning `None` on 404.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, MigrationError> {
        match self
            .request_json::<T>(Method::GET, path, None, None)
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.category == crate::error::ErrorCategory::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Collect every page of a Link-paginated collection.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, MigrationError> {
        let mut url = format!("{}?per_page=100", self.api_url(path));
        let mut items = Vec::new();

        loop {
            let (batch, next) = self
                .retry
                .run(|| async {
                    let (response, headers) =
                        self.send_once(Method::GET, &url, None, None).await?;
                    let next = headers
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("link"))
                        .and_then(|(_, v)| next_url_from_link(v));
                    let batch: Vec<T> = response.json().await.map_err(|e| {
                        MigrationError::unknown("github response parsing", e.to_string())
                    })?;
                    Ok((batch, next))
                })
                .await?;

            items.extend(batch);
            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(items)
    }

    /// Total item count for a collection endpoint, from the Link header
    /// with `per_page=1`. Falls back to the first page length (0 or 1)
    /// when no Link header is present.
    async fn count_collection(&self, path: &str) -> Result<u64, MigrationError> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}per_page=1", self.api_url(path));
        self.retry
            .run(|| async {
                let (response, headers) = self.send_once(Method::GET, &url, None, None).await?;
                if let Some(count) = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("link"))
                    .and_then(|(_, v)| last_page_from_link(v))
                {
                    return Ok(count);
                }
                let batch: Vec<serde_json::Value> = response.json().await.map_err(|e| {
                    MigrationError::unknown("github response parsing", e.to_string())
                })?;
                Ok(batch.len() as u64)
            })
            .await
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn create_repository(
        &self,
        org: &str,
        repo: &NewRepository,
    ) -> Result<Repository, MigrationError> {
        self.request_json(
            Method::POST,
            &format!("orgs/{org}/repos"),
            Some(serde_json::to_value(repo).unwrap_or_default()),
            Some(&format!("{org}/{}", repo.name)),
        )
        .await
    }

    async fn get_repository(&self, repo: &str) -> Result<Option<Repository>, MigrationError> {
        self.get_optional(&format!("repos/{repo}")).await
    }

    async fn delete_repository(&self, repo: &str) -> Result<(), MigrationError> {
        self.request_unit(Method::DELETE, &format!("repos/{repo}"), None, Some(repo))
            .await
    }

    async fn update_repository(
        &self,
        repo: &str,
        default_branch: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PATCH,
            &format!("repos/{repo}"),
            Some(json!({"default_branch": default_branch})),
            Some(repo),
        )
        .await
    }

    fn repo_push_url(&self, repo: &str) -> String {
        // api.github.com → github.com; a self-hosted API base keeps its host.
        let host = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host = host.strip_prefix("api.").unwrap_or(host);
        let host = host.strip_suffix("/api/v3").unwrap_or(host);
        format!("https://{host}/{repo}.git")
    }

    async fn create_label(
        &self,
        repo: &str,
        name: &str,
        color: &str,
        description: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::POST,
            &format!("repos/{repo}/labels"),
            Some(json!({"name": name, "color": color, "description": description})),
            Some(name),
        )
        .await
    }

    async fn delete_label(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        let encoded = urlencoding::encode(name);
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/labels/{encoded}"),
            None,
            Some(name),
        )
        .await
    }

    async fn get_label(
        &self,
        repo: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, MigrationError> {
        let encoded = urlencoding::encode(name);
        self.get_optional(&format!("repos/{repo}/labels/{encoded}"))
            .await
    }

    async fn create_milestone(
        &self,
        repo: &str,
        title: &str,
        description: &str,
        due_on: Option<&str>,
        state: &str,
    ) -> Result<MilestoneRef, MigrationError> {
        let mut body = json!({"title": title, "description": description, "state": state});
        if let Some(due) = due_on {
            body["due_on"] = json!(due);
        }
        self.request_json(
            Method::POST,
            &format!("repos/{repo}/milestones"),
            Some(body),
            Some(title),
        )
        .await
    }

    async fn delete_milestone(&self, repo: &str, number: u64) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/milestones/{number}"),
            None,
            None,
        )
        .await
    }

    async fn list_milestones(&self, repo: &str) -> Result<Vec<MilestoneRef>, MigrationError> {
        self.get_all_pages(&format!("repos/{repo}/milestones")).await
    }

    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
        milestone: Option<u64>,
        assignees: &[String],
    ) -> Result<IssueRef, MigrationError> {
        let mut payload = json!({
            "title": title,
            "body": body,
            "labels": labels,
            "assignees": assignees,
        });
        if let Some(milestone) = milestone {
            payload["milestone"] = json!(milestone);
        }
        self.request_json(
            Method::POST,
            &format!("repos/{repo}/issues"),
            Some(payload),
            Some(title),
        )
        .await
    }

    async fn close_issue(&self, repo: &str, number: u64) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PATCH,
            &format!("repos/{repo}/issues/{number}"),
            Some(json!({"state": "closed"})),
            None,
        )
        .await
    }

    async fn create_issue_comment(
        &self,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::POST,
            &format!("repos/{repo}/issues/{issue_number}/comments"),
            Some(json!({"body": body})),
            None,
        )
        .await
    }

    async fn count_issues(&self, repo: &str) -> Result<u64, MigrationError> {
        self.count_collection(&format!("repos/{repo}/issues?state=all&filter=all"))
            .await
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, MigrationError> {
        self.request_json(
            Method::POST,
            &format!("repos/{repo}/pulls"),
            Some(json!({"title": title, "body": body, "head": head, "base": base})),
            Some(title),
        )
        .await
    }

    async fn close_pull_request(&self, repo: &str, number: u64) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PATCH,
            &format!("repos/{repo}/pulls/{number}"),
            Some(json!({"state": "closed"})),
            None,
        )
        .await
    }

    async fn count_pull_requests(&self, repo: &str) -> Result<u64, MigrationError> {
        self.count_collection(&format!("repos/{repo}/pulls?state=all"))
            .await
    }

    async fn create_release(
        &self,
        repo: &str,
        tag: &str,
        name: &str,
        body: &str,
        draft: bool,
        prerelease: bool,
    ) -> Result<ReleaseRef, MigrationError> {
        self.request_json(
            Method::POST,
            &format!("repos/{repo}/releases"),
            Some(json!({
                "tag_name": tag,
                "name": name,
                "body": body,
                "draft": draft,
                "prerelease": prerelease,
            })),
            Some(tag),
        )
        .await
    }

    async fn delete_release(&self, repo: &str, release_id: u64) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/releases/{release_id}"),
            None,
            None,
        )
        .await
    }

    async fn get_release_by_tag(
        &self,
        repo: &str,
        tag: &str,
    ) -> Result<Option<ReleaseRef>, MigrationError> {
        self.get_optional(&format!("repos/{repo}/releases/tags/{tag}"))
            .await
    }

    async fn list_releases(&self, repo: &str) -> Result<Vec<ReleaseRef>, MigrationError> {
        self.get_all_pages(&format!("repos/{repo}/releases")).await
    }

    async fn upload_release_asset(
        &self,
        repo: &str,
        release_id: u64,
        name: &str,
        content_type: &str,
        file: &Path,
    ) -> Result<(), MigrationError> {
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| MigrationError::unknown("release asset read", e.to_string()))?;

        // Uploads go to the uploads host, not the API host.
        let uploads_base = self.base_url.replace("api.github.com", "uploads.github.com");
        let url = format!(
            "{uploads_base}/repos/{repo}/releases/{release_id}/assets?name={}",
            urlencoding::encode(name)
        );

        self.retry
            .run(|| async {
                self.limiter.acquire().await;
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.token)
                    .header("Content-Type", content_type.to_string())
                    .body(bytes.clone())
                    .send()
                    .await
                    .map_err(|e| classify_transport(Forge::GitHub, &e))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(classify_status(
                        Forge::GitHub,
                        status.as_u16(),
                        &body,
                        None,
                        Some(name),
                    ));
                }
                Ok(())
            })
            .await
    }

    async fn create_or_update_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        message: &str,
        branch: &str,
    ) -> Result<(), MigrationError> {
        // An existing file needs its blob sha in the update payload.
        let existing_sha: Option<String> = self
            .get_optional::<serde_json::Value>(&format!("repos/{repo}/contents/{path}"))
            .await?
            .and_then(|v| v.get("sha").and_then(|s| s.as_str()).map(String::from));

        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content),
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = json!(sha);
        }

        self.request_unit(
            Method::PUT,
            &format!("repos/{repo}/contents/{path}"),
            Some(body),
            Some(path),
        )
        .await
    }

    async fn get_file_content(
        &self,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, MigrationError> {
        let value: Option<serde_json::Value> = self
            .get_optional(&format!("repos/{repo}/contents/{path}"))
            .await?;
        Ok(value.and_then(|v| {
            let encoded = v.get("content")?.as_str()?.replace(['\n', '\r'], "");
            let bytes = BASE64.decode(encoded).ok()?;
            String::from_utf8(bytes).ok()
        }))
    }

    async fn list_workflows(&self, repo: &str) -> Result<Vec<Workflow>, MigrationError> {
        #[derive(serde::Deserialize)]
        struct WorkflowsPage {
            #[serde(default)]
            workflows: Vec<Workflow>,
        }
        let page: WorkflowsPage = self
            .request_json(
                Method::GET,
                &format!("repos/{repo}/actions/workflows"),
                None,
                None,
            )
            .await?;
        Ok(page.workflows)
    }

    async fn create_environment(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        let encoded = urlencoding::encode(name);
        self.request_unit(
            Method::PUT,
            &format!("repos/{repo}/environments/{encoded}"),
            Some(json!({})),
            Some(name),
        )
        .await
    }

    async fn delete_environment(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        let encoded = urlencoding::encode(name);
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/environments/{encoded}"),
            None,
            Some(name),
        )
        .await
    }

    async fn list_environments(&self, repo: &str) -> Result<Vec<String>, MigrationError> {
        #[derive(serde::Deserialize)]
        struct EnvironmentsPage {
            #[serde(default)]
            environments: Vec<EnvironmentEntry>,
        }
        #[derive(serde::Deserialize)]
        struct EnvironmentEntry {
            name: String,
        }
        let page: EnvironmentsPage = self
            .request_json(Method::GET, &format!("repos/{repo}/environments"), None, None)
            .await?;
        Ok(page.environments.into_iter().map(|e| e.name).collect())
    }

    async fn get_public_key(&self, repo: &str) -> Result<PublicKey, MigrationError> {
        self.request_json(
            Method::GET,
            &format!("repos/{repo}/actions/secrets/public-key"),
            None,
            None,
        )
        .await
    }

    async fn get_environment_public_key(
        &self,
        repo: &str,
        environment: &str,
    ) -> Result<PublicKey, MigrationError> {
        let encoded = urlencoding::encode(environment);
        self.request_json(
            Method::GET,
            &format!("repos/{repo}/environments/{encoded}/secrets/public-key"),
            None,
            None,
        )
        .await
    }

    async fn put_secret(
        &self,
        repo: &str,
        name: &str,
        sealed_value: &str,
        key_id: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PUT,
            &format!("repos/{repo}/actions/secrets/{name}"),
            Some(json!({"encrypted_value": sealed_value, "key_id": key_id})),
            Some(name),
        )
        .await
    }

    async fn put_environment_secret(
        &self,
        repo: &str,
        environment: &str,
        name: &str,
        sealed_value: &str,
        key_id: &str,
    ) -> Result<(), MigrationError> {
        let encoded = urlencoding::encode(environment);
        self.request_unit(
            Method::PUT,
            &format!("repos/{repo}/environments/{encoded}/secrets/{name}"),
            Some(json!({"encrypted_value": sealed_value, "key_id": key_id})),
            Some(name),
        )
        .await
    }

    async fn delete_secret(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/actions/secrets/{name}"),
            None,
            Some(name),
        )
        .await
    }

    async fn list_secrets(&self, repo: &str) -> Result<Vec<String>, MigrationError> {
        #[derive(serde::Deserialize)]
        struct SecretsPage {
            #[serde(default)]
            secrets: Vec<SecretEntry>,
        }
        #[derive(serde::Deserialize)]
        struct SecretEntry {
            name: String,
        }
        let page: SecretsPage = self
            .request_json(
                Method::GET,
                &format!("repos/{repo}/actions/secrets"),
                None,
                None,
            )
            .await?;
        Ok(page.secrets.into_iter().map(|s| s.name).collect())
    }

    async fn put_variable(
        &self,
        repo: &str,
        name: &str,
        value: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::POST,
            &format!("repos/{repo}/actions/variables"),
            Some(json!({"name": name, "value": value})),
            Some(name),
        )
        .await
    }

    async fn delete_variable(&self, repo: &str, name: &str) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/actions/variables/{name}"),
            None,
            Some(name),
        )
        .await
    }

    async fn list_variables(&self, repo: &str) -> Result<Vec<(String, String)>, MigrationError> {
        #[derive(serde::Deserialize)]
        struct VariablesPage {
            #[serde(default)]
            variables: Vec<VariableEntry>,
        }
        #[derive(serde::Deserialize)]
        struct VariableEntry {
            name: String,
            #[serde(default)]
            value: String,
        }
        let page: VariablesPage = self
            .request_json(
                Method::GET,
                &format!("repos/{repo}/actions/variables"),
                None,
                None,
            )
            .await?;
        Ok(page
            .variables
            .into_iter()
            .map(|v| (v.name, v.value))
            .collect())
    }

    async fn set_branch_protection(
        &self,
        repo: &str,
        branch: &str,
        protection: &BranchProtection,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PUT,
            &format!("repos/{repo}/branches/{branch}/protection"),
            Some(serde_json::to_value(protection).unwrap_or_default()),
            Some(branch),
        )
        .await
    }

    async fn delete_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/branches/{branch}/protection"),
            None,
            Some(branch),
        )
        .await
    }

    async fn get_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<serde_json::Value>, MigrationError> {
        self.get_optional(&format!("repos/{repo}/branches/{branch}/protection"))
            .await
    }

    async fn add_collaborator(
        &self,
        repo: &str,
        username: &str,
        permission: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PUT,
            &format!("repos/{repo}/collaborators/{username}"),
            Some(json!({"permission": permission})),
            Some(username),
        )
        .await
    }

    async fn remove_collaborator(
        &self,
        repo: &str,
        username: &str,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/collaborators/{username}"),
            None,
            Some(username),
        )
        .await
    }

    async fn list_collaborators(&self, repo: &str) -> Result<Vec<String>, MigrationError> {
        #[derive(serde::Deserialize)]
        struct Collaborator {
            login: String,
        }
        let collaborators: Vec<Collaborator> = self
            .get_all_pages(&format!("repos/{repo}/collaborators"))
            .await?;
        Ok(collaborators.into_iter().map(|c| c.login).collect())
    }

    async fn create_webhook(
        &self,
        repo: &str,
        url: &str,
        content_type: &str,
        secret: Option<&str>,
        events: &[String],
        active: bool,
    ) -> Result<WebhookRef, MigrationError> {
        let mut config = json!({"url": url, "content_type": content_type});
        if let Some(secret) = secret {
            config["secret"] = json!(secret);
        }
        self.request_json(
            Method::POST,
            &format!("repos/{repo}/hooks"),
            Some(json!({"config": config, "events": events, "active": active})),
            Some(url),
        )
        .await
    }

    async fn delete_webhook(&self, repo: &str, hook_id: u64) -> Result<(), MigrationError> {
        self.request_unit(
            Method::DELETE,
            &format!("repos/{repo}/hooks/{hook_id}"),
            None,
            None,
        )
        .await
    }

    async fn update_webhook(
        &self,
        repo: &str,
        hook_id: u64,
        insecure_ssl: bool,
    ) -> Result<(), MigrationError> {
        self.request_unit(
            Method::PATCH,
            &format!("repos/{repo}/hooks/{hook_id}"),
            Some(json!({"config": {"insecure_ssl": if insecure_ssl { "1" } else { "0" }}})),
            None,
        )
        .await
    }

    async fn list_webhooks(&self, repo: &str) -> Result<Vec<WebhookRef>, MigrationError> {
        self.get_all_pages(&format!("repos/{repo}/hooks")).await
    }

    async fn create_team(&self, org: &str, name: &str) -> Result<(), MigrationError> {
        self.request_unit(
            Method::POST,
            &format!("orgs/{org}/teams"),
            Some(json!({"name": name, "privacy": "closed"})),
            Some(name),
        )
        .await
    }

    async fn list_branches(&self, repo: &str) -> Result<Vec<BranchRef>, MigrationError> {
        self.get_all_pages(&format!("repos/{repo}/branches")).await
    }

    async fn count_tags(&self, repo: &str) -> Result<u64, MigrationError> {
        self.count_collection(&format!("repos/{repo}/tags")).await
    }

    async fn rate_limit(&self) -> Result<RateLimitState, MigrationError> {
        #[derive(serde::Deserialize)]
        struct RateResponse {
            resources: RateResources,
        }
        #[derive(serde::Deserialize)]
        struct RateResources {
            core: RateCore,
        }
        #[derive(serde::Deserialize)]
        struct RateCore {
            limit: u64,
            remaining: u64,
            reset: i64,
        }

        let response: RateResponse = self
            .request_json(Method::GET, "rate_limit", None, None)
            .await?;
        Ok(RateLimitState {
            limit: Some(response.resources.core.limit),
            remaining: Some(response.resources.core.remaining),
            reset_at: chrono::TimeZone::timestamp_opt(&chrono::Utc, response.resources.core.reset, 0)
                .single(),
            retry_after: None,
            throttle_delay: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> GitHubClient {
        GitHubClient::new(
            &server.uri(),
            "ghp_test",
            RateLimiter::github(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_last_page_from_link() {
        let link = r#"<https://api.github.com/repos/o/r/issues?page=2>; rel="next", <https://api.github.com/repos/o/r/issues?page=34>; rel="last""#;
        assert_eq!(last_page_from_link(link), Some(34));
        assert_eq!(last_page_from_link(""), None);
        assert_eq!(
            last_page_from_link(r#"<https://x/?page=5>; rel="prev""#),
            None
        );
    }

    #[test]
    fn test_repo_push_url_strips_api_host() {
        let client = GitHubClient::new(
            "https://api.github.com",
            "t",
            RateLimiter::github(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.repo_push_url("acme/widget"),
            "https://github.com/acme/widget.git"
        );
    }

    #[tokio::test]
    async fn test_create_repository_posts_to_org() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orgs/acme/repos"))
            .and(header("Authorization", "Bearer ghp_test"))
            .and(body_partial_json(serde_json::json!({"name": "widget", "private": true})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 1001, "full_name": "acme/widget", "private": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let repo = client
            .create_repository(
                "acme",
                &NewRepository {
                    name: "widget".into(),
                    private: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(repo.full_name, "acme/widget");
    }

    #[tokio::test]
    async fn test_get_repository_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.get_repository("acme/ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_issues_from_link_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/issues"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        r#"<https://x/repos/acme/widget/issues?page=2>; rel="next", <https://x/repos/acme/widget/issues?page=57>; rel="last""#,
                    )
                    .set_body_json(serde_json::json!([{"number": 1}])),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.count_issues("acme/widget").await.unwrap(), 57);
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 5, "full_name": "acme/widget"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let repo = client.get_repository("acme/widget").await.unwrap();
        assert!(repo.is_some());
    }

    #[tokio::test]
    async fn test_file_content_decoded_from_base64() {
        let server = MockServer::start().await;
        let content = BASE64.encode("# CODEOWNERS\n* @acme/platform\n");
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/contents/CODEOWNERS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": content, "sha": "abc"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let text = client
            .get_file_content("acme/widget", "CODEOWNERS")
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("@acme/platform"));
    }
}
