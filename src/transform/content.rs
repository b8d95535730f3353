//! Issue and merge-request content rewriting.
//!
//! Rewrites `@mentions` through the user mapping, converts `#n` / `!n`
//! cross-references to destination form, rewrites attachment links to
//! their exported local paths, and prepends an attribution line carrying
//! the original author and date.

use crate::gitlab::models::{Issue, MergeRequest};
use crate::transform::users::UserMapping;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// An issue in destination form, ready for the plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedIssue {
    pub gitlab_iid: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    pub assignees: Vec<String>,
    pub state: String,
    pub comments: Vec<TransformedComment>,
}

/// A merge request in destination (pull request) form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedPullRequest {
    pub gitlab_iid: u64,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
    pub state: String,
    pub comments: Vec<TransformedComment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedComment {
    pub body: String,
}

pub struct ContentRewriter {
    /// source username → destination login.
    user_map: BTreeMap<String, String>,
    /// original attachment path → export-relative local path.
    attachment_map: BTreeMap<String, String>,
    gitlab_project: String,
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@([A-Za-z0-9][A-Za-z0-9_.\-]*)").unwrap())
}

fn issue_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(^|[\s(])#(\d+)").unwrap())
}

fn mr_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(^|[\s(])!(\d+)").unwrap())
}

impl ContentRewriter {
    pub fn new(
        mappings: &[UserMapping],
        attachment_map: &BTreeMap<String, String>,
        gitlab_project: &str,
    ) -> Self {
        let user_map = mappings
            .iter()
            .filter_map(|m| {
                m.destination_login
                    .as_ref()
                    .map(|login| (m.source_username.clone(), login.clone()))
            })
            .collect();
        Self {
            user_map,
            attachment_map: attachment_map.clone(),
            gitlab_project: gitlab_project.to_string(),
        }
    }

    /// Rewrite one body: mentions, cross-references, attachment links.
    pub fn rewrite_body(&self, body: &str) -> String {
        let mut out = mention_pattern()
            .replace_all(body, |caps: &regex::Captures<'_>| {
                let username = &caps[1];
                match self.user_map.get(username) {
                    Some(login) => format!("@{login}"),
                    // Unmapped mentions are de-linked so they cannot ping
                    // an unrelated destination account.
                    None => format!("`@{username}`"),
                }
            })
            .to_string();

        // Issue references keep their numbers; the migrated issues carry an
        // attribution back to the source, so `#n` stays `#n`.
        out = issue_ref_pattern()
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                format!("{}#{}", &caps[1], &caps[2])
            })
            .to_string();

        // MR references become PR-style references.
        out = mr_ref_pattern()
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                format!("{}#{}", &caps[1], &caps[2])
            })
            .to_string();

        for (original, local) in &self.attachment_map {
            if out.contains(original.as_str()) {
                out = out.replace(original.as_str(), local);
            }
        }

        out
    }

    fn attribution(&self, author: Option<&str>, created_at: Option<&str>) -> String {
        let author = author.unwrap_or("unknown");
        let date = created_at
            .map(|d| d.split('T').next().unwrap_or(d).to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        format!(
            "*Originally created by {author} on {date} (migrated from {})*\n\n",
            self.gitlab_project
        )
    }

    pub fn transform_issue(&self, issue: &Issue) -> TransformedIssue {
        let author = issue.author.as_ref().map(|a| a.username.as_str());
        let body = format!(
            "{}{}",
            self.attribution(author, issue.created_at.as_deref()),
            self.rewrite_body(issue.description.as_deref().unwrap_or("")),
        );

        let comments = issue
            .notes
            .iter()
            .filter(|note| !note.system)
            .map(|note| {
                let note_author = note.author.as_ref().map(|a| a.username.as_str());
                TransformedComment {
                    body: format!(
                        "{}{}",
                        self.attribution(note_author, note.created_at.as_deref()),
                        self.rewrite_body(&note.body),
                    ),
                }
            })
            .collect();

        TransformedIssue {
            gitlab_iid: issue.iid,
            title: issue.title.clone(),
            body,
            labels: issue.labels.clone(),
            milestone: issue.milestone.as_ref().map(|m| m.title.clone()),
            assignees: issue
                .assignees
                .iter()
                .filter_map(|a| self.user_map.get(&a.username).cloned())
                .collect(),
            state: if issue.state == "closed" {
                "closed".into()
            } else {
                "open".into()
            },
            comments,
        }
    }

    pub fn transform_merge_request(
        &self,
        mr: &MergeRequest,
        default_branch: &str,
    ) -> TransformedPullRequest {
        let author = mr.author.as_ref().map(|a| a.username.as_str());
        let body = format!(
            "{}{}",
            self.attribution(author, mr.created_at.as_deref()),
            self.rewrite_body(mr.description.as_deref().unwrap_or("")),
        );

        let comments = mr
            .discussions
            .iter()
            .flat_map(|d| d.notes.iter())
            .filter(|note| !note.system)
            .map(|note| {
                let note_author = note.author.as_ref().map(|a| a.username.as_str());
                TransformedComment {
                    body: format!(
                        "{}{}",
                        self.attribution(note_author, note.created_at.as_deref()),
                        self.rewrite_body(&note.body),
                    ),
                }
            })
            .collect();

        TransformedPullRequest {
            gitlab_iid: mr.iid,
            title: mr.title.clone(),
            body,
            head: mr.source_branch.clone(),
            base: if mr.target_branch.is_empty() {
                default_branch.to_string()
            } else {
                mr.target_branch.clone()
            },
            labels: mr.labels.clone(),
            state: if mr.state == "opened" { "open".into() } else { "closed".into() },
            comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::models::{NoteBody, UserRef};
    use crate::transform::users::{Confidence, MatchMethod};

    fn mapping(source: &str, dest: &str) -> UserMapping {
        UserMapping {
            source_username: source.into(),
            source_email: None,
            destination_login: Some(dest.into()),
            confidence: Confidence::High,
            method: MatchMethod::Email,
            is_manual: false,
        }
    }

    fn rewriter() -> ContentRewriter {
        let mut attachments = BTreeMap::new();
        attachments.insert(
            "/uploads/abc123/shot.png".to_string(),
            "issues/attachments/abc123_shot.png".to_string(),
        );
        ContentRewriter::new(&[mapping("alice", "alice-gh")], &attachments, "group/widget")
    }

    #[test]
    fn test_mapped_mention_rewritten() {
        let out = rewriter().rewrite_body("ping @alice please");
        assert_eq!(out, "ping @alice-gh please");
    }

    #[test]
    fn test_unmapped_mention_delinked() {
        let out = rewriter().rewrite_body("ping @stranger please");
        assert_eq!(out, "ping `@stranger` please");
    }

    #[test]
    fn test_mr_reference_becomes_pr_reference() {
        let out = rewriter().rewrite_body("fixed in !42 and relates to #7");
        assert!(out.contains("#42"));
        assert!(!out.contains("!42"));
        assert!(out.contains("#7"));
    }

    #[test]
    fn test_attachment_link_rewritten() {
        let out = rewriter().rewrite_body("see ![x](/uploads/abc123/shot.png)");
        assert!(out.contains("issues/attachments/abc123_shot.png"));
        assert!(!out.contains("/uploads/abc123/shot.png"));
    }

    #[test]
    fn test_issue_gets_attribution_and_comment_filtering() {
        let issue = Issue {
            iid: 7,
            title: "Crash".into(),
            description: Some("boom".into()),
            state: "opened".into(),
            author: Some(UserRef {
                username: "alice".into(),
                ..Default::default()
            }),
            created_at: Some("2024-03-01T10:00:00Z".into()),
            notes: vec![
                NoteBody {
                    body: "real comment".into(),
                    system: false,
                    ..Default::default()
                },
                NoteBody {
                    body: "changed milestone".into(),
                    system: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let transformed = rewriter().transform_issue(&issue);
        assert!(transformed
            .body
            .starts_with("*Originally created by alice on 2024-03-01"));
        assert_eq!(transformed.state, "open");
        // System notes are dropped.
        assert_eq!(transformed.comments.len(), 1);
        assert!(transformed.comments[0].body.contains("real comment"));
    }

    #[test]
    fn test_mr_base_falls_back_to_default_branch() {
        let mr = MergeRequest {
            iid: 3,
            title: "Add feature".into(),
            source_branch: "feature/x".into(),
            target_branch: String::new(),
            state: "opened".into(),
            ..Default::default()
        };
        let transformed = rewriter().transform_merge_request(&mr, "main");
        assert_eq!(transformed.base, "main");
        assert_eq!(transformed.head, "feature/x");
        assert_eq!(transformed.state, "open");
    }

    #[test]
    fn test_assignees_only_mapped_users() {
        let issue = Issue {
            iid: 1,
            assignees: vec![
                UserRef {
                    username: "alice".into(),
                    ..Default::default()
                },
                UserRef {
                    username: "stranger".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let transformed = rewriter().transform_issue(&issue);
        assert_eq!(transformed.assignees, vec!["alice-gh"]);
    }
}
