//! GitHub API resource models (the subset the migration writes and reads).

use serde::{Deserialize, Serialize};

/// A repository as returned by the create/get endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Parameters for repository creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRepository {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub private: bool,
    #[serde(default)]
    pub has_issues: bool,
    #[serde(default)]
    pub has_projects: bool,
    #[serde(default)]
    pub has_wiki: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestoneRef {
    pub number: u64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub id: u64,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookRef {
    pub id: u64,
    #[serde(default)]
    pub config: WebhookConfig,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub state: String,
}

/// Repo or environment public key used to seal secret values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicKey {
    pub key_id: String,
    /// Base64-encoded X25519 public key.
    pub key: String,
}

/// Branch protection settings in the destination's shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchProtection {
    pub required_status_checks: Option<RequiredStatusChecks>,
    pub enforce_admins: bool,
    pub required_pull_request_reviews: Option<RequiredReviews>,
    /// User/team push restrictions; always null for migrated projects.
    pub restrictions: Option<serde_json::Value>,
    pub allow_force_pushes: bool,
    pub allow_deletions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredStatusChecks {
    pub strict: bool,
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredReviews {
    pub required_approving_review_count: u32,
    pub require_code_owner_reviews: bool,
    #[serde(default)]
    pub dismiss_stale_reviews: bool,
}
