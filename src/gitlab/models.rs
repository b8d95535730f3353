//! GitLab API resource models (the subset the migration reads).
//!
//! Fields default generously: the export must tolerate older GitLab
//! versions and admin-disabled features without deserialization failures.

use serde::{Deserialize, Serialize};

/// A GitLab project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub http_url_to_repo: Option<String>,
    #[serde(default)]
    pub wiki_enabled: bool,
    #[serde(default)]
    pub issues_enabled: bool,
    #[serde(default)]
    pub merge_requests_enabled: bool,
    #[serde(default)]
    pub lfs_enabled: bool,
    #[serde(default)]
    pub snippets_enabled: bool,
    #[serde(default)]
    pub container_registry_enabled: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub merge_method: Option<String>,
    #[serde(default)]
    pub squash_option: Option<String>,
    #[serde(default)]
    pub only_allow_merge_if_pipeline_succeeds: Option<bool>,
    #[serde(default)]
    pub only_allow_merge_if_all_discussions_are_resolved: Option<bool>,
    #[serde(default)]
    pub remove_source_branch_after_merge: Option<bool>,
    #[serde(default)]
    pub open_issues_count: Option<u64>,
}

/// A user reference embedded in issues, notes and MRs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An issue, optionally enriched with its notes during export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub milestone: Option<Milestone>,
    #[serde(default)]
    pub assignees: Vec<UserRef>,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub notes: Vec<NoteBody>,
}

/// A note (comment) on an issue or merge request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteBody {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub system: bool,
}

/// A merge request, enriched with discussions and approvals during export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub discussions: Vec<Discussion>,
    #[serde(default)]
    pub approvals: Option<serde_json::Value>,
}

/// A discussion thread on a merge request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Discussion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub notes: Vec<NoteBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// A release with its asset links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assets: ReleaseAssets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseAssets {
    #[serde(default)]
    pub links: Vec<ReleaseAssetLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseAssetLink {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Filled in by export after the asset is downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub package_type: String,
    #[serde(default)]
    pub files: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub push_events: bool,
    #[serde(default)]
    pub tag_push_events: bool,
    #[serde(default)]
    pub issues_events: bool,
    #[serde(default)]
    pub merge_requests_events: bool,
    #[serde(default)]
    pub note_events: bool,
    #[serde(default)]
    pub pipeline_events: bool,
    #[serde(default)]
    pub wiki_page_events: bool,
    #[serde(default)]
    pub deployment_events: bool,
    #[serde(default)]
    pub releases_events: bool,
    #[serde(default)]
    pub confidential_issues_events: bool,
    #[serde(default)]
    pub repository_update_events: bool,
    #[serde(default)]
    pub enable_ssl_verification: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSchedule {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cron: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, rename = "ref")]
    pub target_ref: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
}

/// A CI/CD variable. Masked variables never expose their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiVariable {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing)]
    pub value: Option<String>,
    #[serde(default)]
    pub variable_type: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub environment_scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessLevel {
    #[serde(default)]
    pub access_level: u32,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub group_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectedBranch {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub push_access_levels: Vec<AccessLevel>,
    #[serde(default)]
    pub merge_access_levels: Vec<AccessLevel>,
    #[serde(default)]
    pub unprotect_access_levels: Vec<AccessLevel>,
    #[serde(default)]
    pub allow_force_push: bool,
    #[serde(default)]
    pub code_owner_approval_required: bool,
    #[serde(default)]
    pub approvals_before_merge: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectedTag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub create_access_levels: Vec<AccessLevel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployKey {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub can_push: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_level: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "ref")]
    pub target_ref: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_tolerates_sparse_payload() {
        let project: Project =
            serde_json::from_str(r#"{"id": 7, "path_with_namespace": "g/p"}"#).unwrap();
        assert_eq!(project.id, 7);
        assert!(!project.wiki_enabled);
        assert!(project.default_branch.is_none());
    }

    #[test]
    fn test_masked_variable_value_not_serialized() {
        let var = CiVariable {
            key: "DATABASE_URL".into(),
            value: Some("postgres://u:p@h/db".into()),
            masked: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&var).unwrap();
        assert!(!json.contains("postgres://"));
        assert!(json.contains("DATABASE_URL"));
    }

    #[test]
    fn test_release_asset_local_path_roundtrip() {
        let release = Release {
            tag_name: "v1.0.0".into(),
            assets: ReleaseAssets {
                links: vec![ReleaseAssetLink {
                    name: "app.tar.gz".into(),
                    url: "https://example.com/app.tar.gz".into(),
                    content_type: None,
                    local_path: Some("releases/v1.0.0/app.tar.gz".into()),
                }],
            },
            ..Default::default()
        };
        let json = serde_json::to_string(&release).unwrap();
        let parsed: Release = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.assets.links[0].local_path.as_deref(),
            Some("releases/v1.0.0/app.tar.gz")
        );
    }

    #[test]
    fn test_schedule_ref_rename() {
        let schedule: PipelineSchedule =
            serde_json::from_str(r#"{"id": 1, "cron": "0 4 * * *", "ref": "main"}"#).unwrap();
        assert_eq!(schedule.target_ref, "main");
    }
}
