//! Migration run configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Scope of a migration run: a whole group or a single project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Scope {
    /// Full path of a GitLab group; discovery enumerates its projects.
    Group(String),
    /// Numeric id of a single GitLab project.
    Project(u64),
}

/// Timeouts for external operations, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub http: u64,
    pub verify_http: u64,
    pub git_clone: u64,
    pub git_bundle: u64,
    pub wiki_clone: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http: 30,
            verify_http: 60,
            git_clone: 600,
            git_bundle: 300,
            wiki_clone: 120,
        }
    }
}

/// Configuration for a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub run_id: String,
    pub gitlab_url: String,
    pub gitlab_token: String,
    pub github_token: String,
    /// Target GitHub organization (repo name comes from the project path).
    pub github_org: String,
    pub scope: Scope,
    /// Root of the artifact tree for this run.
    pub artifact_root: PathBuf,
    /// Resume export from its checkpoint instead of starting over.
    pub resume: bool,
    pub max_retries: u32,
    /// Delay between stage-level retries, seconds.
    pub retry_delay_secs: u64,
    pub timeouts: Timeouts,
    /// Numeric comparison tolerance for Verify (fraction, default 0.05).
    pub verify_tolerance: f64,
}

impl MigrationConfig {
    /// Load configuration from environment variables.
    ///
    /// `GITLAB_URL`, `GITLAB_TOKEN`, `GITHUB_TOKEN`, `GITHUB_ORG` are
    /// required; the rest have defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let require = |key: &str| -> anyhow::Result<String> {
            std::env::var(key).map_err(|_| anyhow::anyhow!("{key} must be set"))
        };

        let scope = match std::env::var("GITLAB_PROJECT_ID") {
            Ok(id) => Scope::Project(id.parse()?),
            Err(_) => Scope::Group(
                std::env::var("GITLAB_GROUP").unwrap_or_else(|_| String::new()),
            ),
        };

        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let artifact_root = std::env::var("ARTIFACT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("artifacts/runs").join(&run_id));

        Ok(Self {
            run_id,
            gitlab_url: require("GITLAB_URL")?,
            gitlab_token: require("GITLAB_TOKEN")?,
            github_token: require("GITHUB_TOKEN")?,
            github_org: require("GITHUB_ORG")?,
            scope,
            artifact_root,
            resume: std::env::var("RESUME").map(|v| v == "1" || v == "true").unwrap_or(false),
            max_retries: std::env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            retry_delay_secs: 5,
            timeouts: Timeouts::default(),
            verify_tolerance: 0.05,
        })
    }

    /// GitHub `owner/repo` target derived from the source project path:
    /// the configured org plus the last path segment.
    pub fn github_target(&self, project_path: &str) -> String {
        let repo = project_path.rsplit('/').next().unwrap_or(project_path);
        format!("{}/{}", self.github_org, repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MigrationConfig {
        MigrationConfig {
            run_id: "run-001".into(),
            gitlab_url: "https://gitlab.example.com".into(),
            gitlab_token: "glpat-test".into(),
            github_token: "ghp_test".into(),
            github_org: "acme".into(),
            scope: Scope::Project(42),
            artifact_root: PathBuf::from("/tmp/run-001"),
            resume: false,
            max_retries: 3,
            retry_delay_secs: 5,
            timeouts: Timeouts::default(),
            verify_tolerance: 0.05,
        }
    }

    #[test]
    fn test_github_target_uses_last_path_segment() {
        let config = test_config();
        assert_eq!(config.github_target("group/subgroup/widget"), "acme/widget");
        assert_eq!(config.github_target("widget"), "acme/widget");
    }

    #[test]
    fn test_default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.git_clone, 600);
        assert_eq!(t.git_bundle, 300);
        assert_eq!(t.wiki_clone, 120);
        assert_eq!(t.http, 30);
        assert_eq!(t.verify_http, 60);
    }

    #[test]
    fn test_scope_serde() {
        let scope = Scope::Group("platform".into());
        let json = serde_json::to_string(&scope).unwrap();
        let parsed: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, scope);
    }
}
