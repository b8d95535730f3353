//! Action execution: the execute/simulate/rollback contract.
//!
//! The action kinds form a closed sum type, so the runner dispatches by
//! pattern match rather than through a dynamic registry. Every execution
//! produces an `ActionResult` carrying outputs, rollback data for
//! reversible kinds, and (in dry-run mode) a predicted outcome from
//! read-only destination probes.

use crate::error::{ErrorCategory, MigrationError};
use crate::gitcmd;
use crate::github::secrets::seal_secret;
use crate::github::models::NewRepository;
use crate::github::GitHubApi;
use crate::plan::models::{Action, ActionKind, ActionParams};
use crate::plan::USER_INPUT_REQUIRED;
use crate::ratelimit::RetryPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Predicted effect of an action in dry-run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationOutcome {
    WouldCreate,
    WouldUpdate,
    WouldSkip,
    WouldFail,
    WouldExecute,
}

/// Outcome of executing (or simulating) one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub action_id: String,
    pub action_type: ActionKind,
    #[serde(default)]
    pub outputs: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MigrationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<serde_json::Value>,
    pub reversible: bool,
    #[serde(default)]
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_outcome: Option<SimulationOutcome>,
}

impl ActionResult {
    pub fn success(action: &Action, outputs: serde_json::Value) -> Self {
        Self {
            success: true,
            action_id: action.id.clone(),
            action_type: action.kind,
            outputs,
            error: None,
            rollback_data: None,
            reversible: action.kind.is_reversible(),
            simulated: false,
            simulation_outcome: None,
        }
    }

    pub fn failure(action: &Action, error: MigrationError) -> Self {
        Self {
            success: false,
            action_id: action.id.clone(),
            action_type: action.kind,
            outputs: json!({}),
            error: Some(error),
            rollback_data: None,
            reversible: action.kind.is_reversible(),
            simulated: false,
            simulation_outcome: None,
        }
    }

    pub fn simulated(action: &Action, outcome: SimulationOutcome) -> Self {
        Self {
            success: outcome != SimulationOutcome::WouldFail,
            action_id: action.id.clone(),
            action_type: action.kind,
            outputs: json!({}),
            error: None,
            rollback_data: None,
            reversible: action.kind.is_reversible(),
            simulated: true,
            simulation_outcome: Some(outcome),
        }
    }

    fn with_rollback(mut self, data: serde_json::Value) -> Self {
        self.rollback_data = Some(data);
        self
    }
}

/// Shared, single-writer execution state for one Apply run.
#[derive(Debug, Default)]
pub struct ApplyContext {
    /// entity kind → source id → destination id.
    pub id_mappings: BTreeMap<String, BTreeMap<String, String>>,
    /// idempotency key → result of the action that produced it.
    pub executed: BTreeMap<String, ActionResult>,
    /// Opaque per-action state carried across resumes.
    pub resume_state: serde_json::Value,
    pub dry_run: bool,
}

impl ApplyContext {
    pub fn set_id_mapping(&mut self, kind: &str, source: &str, dest: &str) {
        self.id_mappings
            .entry(kind.to_string())
            .or_default()
            .insert(source.to_string(), dest.to_string());
    }

    pub fn get_id_mapping(&self, kind: &str, source: &str) -> Option<&String> {
        self.id_mappings.get(kind)?.get(source)
    }
}

/// Executes actions against the destination forge.
pub struct ActionRunner {
    github: Arc<dyn GitHubApi>,
    github_token: String,
    /// Root of the artifact tree; action parameter paths are relative to it.
    artifact_root: PathBuf,
    /// Scratch space for git operations.
    work_dir: PathBuf,
    git_timeout: Duration,
}

impl ActionRunner {
    pub fn new(
        github: Arc<dyn GitHubApi>,
        github_token: &str,
        artifact_root: PathBuf,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            github,
            github_token: github_token.to_string(),
            artifact_root,
            work_dir,
            git_timeout: Duration::from_secs(600),
        }
    }

    /// Short-circuit when the idempotency key already produced a success.
    pub fn check_idempotency(
        &self,
        action: &Action,
        ctx: &ApplyContext,
    ) -> Option<ActionResult> {
        let previous = ctx.executed.get(&action.idempotency_key)?;
        if !previous.success {
            return None;
        }
        let mut cached = previous.clone();
        cached.action_id = action.id.clone();
        cached.outputs = json!({
            "idempotent_skip": true,
            "original_outputs": previous.outputs,
        });
        Some(cached)
    }

    /// Run `execute` (or `simulate` when `dry_run`) with bounded retry for
    /// transient failures. Permanent errors fail immediately.
    pub async fn execute_with_retry(
        &self,
        action: &Action,
        ctx: &mut ApplyContext,
        retry: &RetryPolicy,
        dry_run: bool,
    ) -> ActionResult {
        let mut attempt = 0;
        loop {
            let result = if dry_run {
                self.simulate(action, ctx).await
            } else {
                self.execute(action, ctx).await
            };

            match result {
                Ok(result) => return result,
                Err(error) => {
                    let backoff = match retry.backoff_for(&error, attempt) {
                        Some(backoff) if attempt < retry.max_retries => backoff,
                        _ => return ActionResult::failure(action, error),
                    };
                    tracing::warn!(
                        action_id = %action.id,
                        attempt = attempt + 1,
                        category = %error.category,
                        "Action failed transiently, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// Execute one action. Transport/server failures bubble as `Err` so the
    /// retry wrapper can classify them; semantic failures return a failed
    /// `ActionResult` directly.
    pub async fn execute(
        &self,
        action: &Action,
        ctx: &mut ApplyContext,
    ) -> Result<ActionResult, MigrationError> {
        let github = self.github.as_ref();

        let result = match &action.parameters {
            ActionParams::RepoCreate {
                org,
                name,
                description,
                private,
                has_issues,
                has_wiki,
            } => {
                let full_name = format!("{org}/{name}");
                if let Some(existing) = github.get_repository(&full_name).await? {
                    ActionResult::success(
                        action,
                        json!({"repo": full_name, "already_exists": true, "repo_id": existing.id}),
                    )
                } else {
                    let repo = github
                        .create_repository(
                            org,
                            &NewRepository {
                                name: name.clone(),
                                description: description.clone(),
                                private: *private,
                                has_issues: *has_issues,
                                has_projects: true,
                                has_wiki: *has_wiki,
                            },
                        )
                        .await?;
                    ActionResult::success(
                        action,
                        json!({"repo": repo.full_name, "repo_id": repo.id}),
                    )
                    .with_rollback(json!({"repo": repo.full_name}))
                }
            }

            ActionParams::RepoPush {
                bundle_path,
                target_repo,
            } => {
                let bundle = self.artifact_root.join(bundle_path);
                if !bundle.exists() {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            "Repository bundle not found",
                            format!("{} is missing", bundle.display()),
                        ),
                    ));
                }
                let url = github.repo_push_url(target_repo);
                gitcmd::push_bundle(
                    &bundle,
                    &url,
                    &self.github_token,
                    &self.work_dir,
                    self.git_timeout,
                )
                .await?;
                ActionResult::success(action, json!({"pushed": true, "repo": target_repo}))
            }

            ActionParams::RepoConfigure {
                target_repo,
                default_branch,
            } => {
                github.update_repository(target_repo, default_branch).await?;
                ActionResult::success(action, json!({"default_branch": default_branch}))
            }

            ActionParams::LfsConfigure {
                target_repo,
                lfs_objects_path,
            } => {
                // LFS objects are not part of the bundle; record what must
                // be pushed out-of-band.
                ActionResult::success(
                    action,
                    json!({
                        "repo": target_repo,
                        "lfs_objects_path": lfs_objects_path,
                        "note": "LFS objects must be pushed with git lfs push --all",
                    }),
                )
            }

            ActionParams::WorkflowCommit {
                target_repo,
                target_path,
                content,
                branch,
                commit_message,
                ..
            } => {
                github
                    .create_or_update_file(
                        target_repo,
                        target_path,
                        content.as_bytes(),
                        commit_message,
                        branch,
                    )
                    .await?;
                ActionResult::success(action, json!({"path": target_path}))
            }

            ActionParams::EnvironmentCreate { target_repo, name } => {
                github.create_environment(target_repo, name).await?;
                ActionResult::success(action, json!({"environment": name}))
                    .with_rollback(json!({"repo": target_repo, "environment": name}))
            }

            ActionParams::SecretSet {
                target_repo,
                name,
                environment,
                value,
                ..
            } => {
                if value == USER_INPUT_REQUIRED {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            format!("Secret {name} requires a user-provided value"),
                            "value was masked at the source and must be supplied manually"
                                .to_string(),
                        ),
                    ));
                }
                match environment {
                    Some(env) => {
                        let key = github
                            .get_environment_public_key(target_repo, env)
                            .await?;
                        let sealed = seal_secret(&key.key, value)?;
                        github
                            .put_environment_secret(target_repo, env, name, &sealed, &key.key_id)
                            .await?;
                    }
                    None => {
                        let key = github.get_public_key(target_repo).await?;
                        let sealed = seal_secret(&key.key, value)?;
                        github.put_secret(target_repo, name, &sealed, &key.key_id).await?;
                    }
                }
                ActionResult::success(action, json!({"secret": name}))
                    .with_rollback(json!({"repo": target_repo, "secret": name}))
            }

            ActionParams::VariableSet {
                target_repo,
                name,
                value,
            } => {
                if value == USER_INPUT_REQUIRED {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            format!("Variable {name} requires a user-provided value"),
                            "value unavailable in export".to_string(),
                        ),
                    ));
                }
                github.put_variable(target_repo, name, value).await?;
                ActionResult::success(action, json!({"variable": name}))
                    .with_rollback(json!({"repo": target_repo, "variable": name}))
            }

            ActionParams::ScheduleCreate {
                target_repo,
                name,
                cron,
                target_ref,
            } => {
                // Schedules are preserved as documentation; the converted
                // workflow carries the cron trigger.
                github
                    .create_or_update_file(
                        target_repo,
                        &format!("migration/schedules/{}.md", sanitize_doc_name(name)),
                        format!(
                            "# Pipeline schedule: {name}\n\n- cron: `{cron}`\n- ref: `{target_ref}`\n"
                        )
                        .as_bytes(),
                        &format!("Document pipeline schedule {name}"),
                        "main",
                    )
                    .await?;
                ActionResult::success(action, json!({"schedule": name}))
            }

            ActionParams::LabelCreate {
                target_repo,
                name,
                color,
                description,
            } => {
                if github.get_label(target_repo, name).await?.is_some() {
                    ActionResult::success(
                        action,
                        json!({"label": name, "already_exists": true}),
                    )
                } else {
                    github
                        .create_label(target_repo, name, color, description)
                        .await?;
                    ActionResult::success(action, json!({"label": name}))
                        .with_rollback(json!({"repo": target_repo, "label": name}))
                }
            }

            ActionParams::MilestoneCreate {
                target_repo,
                title,
                description,
                due_on,
                state,
            } => {
                let existing = github
                    .list_milestones(target_repo)
                    .await?
                    .into_iter()
                    .find(|m| m.title == *title);
                let milestone = match existing {
                    Some(milestone) => milestone,
                    None => {
                        github
                            .create_milestone(
                                target_repo,
                                title,
                                description,
                                due_on.as_deref(),
                                state,
                            )
                            .await?
                    }
                };
                ctx.set_id_mapping("milestone", title, &milestone.number.to_string());
                ActionResult::success(
                    action,
                    json!({"milestone": title, "number": milestone.number}),
                )
                .with_rollback(json!({"repo": target_repo, "number": milestone.number}))
            }

            ActionParams::IssueCreate {
                target_repo,
                gitlab_issue_iid,
                title,
                body,
                labels,
                milestone,
                assignees,
                state,
                ..
            } => {
                let milestone_number = milestone
                    .as_ref()
                    .and_then(|m| ctx.get_id_mapping("milestone", m))
                    .and_then(|n| n.parse::<u64>().ok());
                let issue = github
                    .create_issue(
                        target_repo,
                        title,
                        body,
                        labels,
                        milestone_number,
                        assignees,
                    )
                    .await?;
                if state == "closed" {
                    github.close_issue(target_repo, issue.number).await?;
                }
                ctx.set_id_mapping(
                    "issue",
                    &gitlab_issue_iid.to_string(),
                    &issue.number.to_string(),
                );
                ActionResult::success(
                    action,
                    json!({
                        "gitlab_iid": gitlab_issue_iid,
                        "issue_number": issue.number,
                    }),
                )
                .with_rollback(json!({"repo": target_repo, "issue_number": issue.number}))
            }

            ActionParams::IssueCommentAdd {
                target_repo,
                gitlab_issue_iid,
                body,
            } => {
                let number = ctx
                    .get_id_mapping("issue", &gitlab_issue_iid.to_string())
                    .and_then(|n| n.parse::<u64>().ok());
                let Some(number) = number else {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            format!("No destination issue for source issue {gitlab_issue_iid}"),
                            "issue id mapping missing".to_string(),
                        ),
                    ));
                };
                github.create_issue_comment(target_repo, number, body).await?;
                ActionResult::success(action, json!({"issue_number": number}))
            }

            ActionParams::PrCreate {
                target_repo,
                gitlab_mr_iid,
                title,
                body,
                head,
                base,
                state,
                ..
            } => {
                let pr = github
                    .create_pull_request(target_repo, title, body, head, base)
                    .await?;
                if state == "closed" {
                    github.close_pull_request(target_repo, pr.number).await?;
                }
                ctx.set_id_mapping(
                    "merge_request",
                    &gitlab_mr_iid.to_string(),
                    &pr.number.to_string(),
                );
                ActionResult::success(
                    action,
                    json!({"gitlab_iid": gitlab_mr_iid, "pr_number": pr.number}),
                )
                .with_rollback(json!({"repo": target_repo, "pr_number": pr.number}))
            }

            ActionParams::PrCommentAdd {
                target_repo,
                gitlab_mr_iid,
                body,
            } => {
                let number = ctx
                    .get_id_mapping("merge_request", &gitlab_mr_iid.to_string())
                    .and_then(|n| n.parse::<u64>().ok());
                let Some(number) = number else {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            format!("No destination PR for source MR {gitlab_mr_iid}"),
                            "merge request id mapping missing".to_string(),
                        ),
                    ));
                };
                // PR conversation comments go through the issue comments API.
                github.create_issue_comment(target_repo, number, body).await?;
                ActionResult::success(action, json!({"pr_number": number}))
            }

            ActionParams::WikiPush {
                target_repo,
                wiki_bundle_path,
            } => {
                let bundle = self.artifact_root.join(wiki_bundle_path);
                if !bundle.exists() {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            "Wiki bundle not found",
                            format!("{} is missing", bundle.display()),
                        ),
                    ));
                }
                let url = github
                    .repo_push_url(target_repo)
                    .replace(".git", ".wiki.git");
                gitcmd::push_bundle(
                    &bundle,
                    &url,
                    &self.github_token,
                    &self.work_dir,
                    self.git_timeout,
                )
                .await?;
                ActionResult::success(action, json!({"wiki_pushed": true}))
            }

            ActionParams::WikiCommit {
                target_repo,
                page_path,
                content,
            } => {
                let url = github
                    .repo_push_url(target_repo)
                    .replace(".git", ".wiki.git");
                gitcmd::commit_file_and_push(
                    &url,
                    &self.github_token,
                    page_path,
                    content,
                    &format!("Add wiki page {page_path}"),
                    &self.work_dir,
                    self.git_timeout,
                )
                .await?;
                ActionResult::success(action, json!({"page": page_path}))
            }

            ActionParams::ReleaseCreate {
                target_repo,
                tag_name,
                name,
                body,
                draft,
                prerelease,
            } => {
                let existing = github.get_release_by_tag(target_repo, tag_name).await?;
                let release = match existing {
                    Some(release) => release,
                    None => {
                        github
                            .create_release(target_repo, tag_name, name, body, *draft, *prerelease)
                            .await?
                    }
                };
                ctx.set_id_mapping("release", tag_name, &release.id.to_string());
                ActionResult::success(
                    action,
                    json!({"tag": tag_name, "release_id": release.id}),
                )
                .with_rollback(json!({"repo": target_repo, "release_id": release.id}))
            }

            ActionParams::ReleaseAssetUpload {
                target_repo,
                release_tag,
                asset_path,
                asset_name,
                content_type,
            } => {
                let release_id = ctx
                    .get_id_mapping("release", release_tag)
                    .and_then(|id| id.parse::<u64>().ok());
                let Some(release_id) = release_id else {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            format!("No destination release for tag {release_tag}"),
                            "release id mapping missing".to_string(),
                        ),
                    ));
                };
                let path = PathBuf::from(asset_path);
                let file = if path.is_absolute() {
                    path
                } else {
                    self.artifact_root.join(asset_path)
                };
                github
                    .upload_release_asset(target_repo, release_id, asset_name, content_type, &file)
                    .await?;
                ActionResult::success(action, json!({"asset": asset_name}))
            }

            ActionParams::PackagePublish {
                target_repo,
                package_type,
                name,
                version,
                migrable,
            } => {
                // Registry bits are out of scope: a migration script with
                // the package coordinates is committed instead.
                let script = format!(
                    "#!/bin/sh\n# Manual migration required for {package_type} package\n\
                     # {name}@{version}\n# Publish to GitHub Packages for {target_repo}\n\
                     echo \"package {name}@{version} must be republished manually\"\n"
                );
                github
                    .create_or_update_file(
                        target_repo,
                        &format!(
                            "migration/packages/{}-{}.sh",
                            sanitize_doc_name(name),
                            sanitize_doc_name(version)
                        ),
                        script.as_bytes(),
                        &format!("Document package migration for {name}@{version}"),
                        "main",
                    )
                    .await?;
                ActionResult::success(
                    action,
                    json!({"package": name, "version": version, "migrable": migrable}),
                )
            }

            ActionParams::ProtectionSet {
                target_repo,
                branch,
                protection,
            } => {
                github
                    .set_branch_protection(target_repo, branch, protection)
                    .await?;
                ActionResult::success(action, json!({"branch": branch}))
                    .with_rollback(json!({"repo": target_repo, "branch": branch}))
            }

            ActionParams::CollaboratorAdd {
                target_repo,
                username,
                permission,
            } => {
                github
                    .add_collaborator(target_repo, username, permission)
                    .await?;
                ActionResult::success(action, json!({"collaborator": username}))
                    .with_rollback(json!({"repo": target_repo, "username": username}))
            }

            ActionParams::TeamCreate { org, name } => {
                github.create_team(org, name).await?;
                ActionResult::success(action, json!({"team": name}))
            }

            ActionParams::CodeownersCommit {
                target_repo,
                content,
                branch,
            } => {
                github
                    .create_or_update_file(
                        target_repo,
                        "CODEOWNERS",
                        content.as_bytes(),
                        "Add CODEOWNERS (migrated from GitLab approval rules)",
                        branch,
                    )
                    .await?;
                ActionResult::success(action, json!({"path": "CODEOWNERS"}))
            }

            ActionParams::WebhookCreate {
                target_repo,
                url,
                content_type,
                secret,
                events,
                active,
            } => {
                let existing = github
                    .list_webhooks(target_repo)
                    .await?
                    .into_iter()
                    .find(|h| h.config.url == *url);
                if let Some(hook) = existing {
                    ActionResult::success(
                        action,
                        json!({"webhook_id": hook.id, "already_exists": true}),
                    )
                } else {
                    // A missing secret falls back to a generated one so the
                    // hook is never created unsigned.
                    let generated;
                    let secret_value = if secret == USER_INPUT_REQUIRED || secret.is_empty() {
                        generated = generate_webhook_secret();
                        Some(generated.as_str())
                    } else {
                        Some(secret.as_str())
                    };
                    let hook = github
                        .create_webhook(
                            target_repo,
                            url,
                            content_type,
                            secret_value,
                            events,
                            *active,
                        )
                        .await?;
                    ActionResult::success(action, json!({"webhook_id": hook.id}))
                        .with_rollback(json!({"repo": target_repo, "webhook_id": hook.id}))
                }
            }

            ActionParams::WebhookConfigure {
                target_repo,
                url,
                insecure_ssl,
            } => {
                let hook = github
                    .list_webhooks(target_repo)
                    .await?
                    .into_iter()
                    .find(|h| h.config.url == *url);
                let Some(hook) = hook else {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            "Webhook to configure does not exist",
                            format!("no hook with url {url}"),
                        ),
                    ));
                };
                github
                    .update_webhook(target_repo, hook.id, *insecure_ssl)
                    .await?;
                ActionResult::success(action, json!({"webhook_id": hook.id}))
            }

            ActionParams::ArtifactCommit {
                target_repo,
                source_path,
                target_path,
                branch,
                commit_message,
            } => {
                let source = self.artifact_root.join(source_path);
                let Ok(bytes) = std::fs::read(&source) else {
                    return Ok(ActionResult::failure(
                        action,
                        MigrationError::validation(
                            "Preservation artifact not found",
                            format!("{} is missing", source.display()),
                        ),
                    ));
                };
                github
                    .create_or_update_file(target_repo, target_path, &bytes, commit_message, branch)
                    .await?;
                ActionResult::success(action, json!({"path": target_path}))
            }

            ActionParams::AttachmentsCommit {
                target_repo,
                attachments_dir,
                target_path,
                branch,
            } => {
                let dir = self.artifact_root.join(attachments_dir);
                let mut committed = 0usize;
                if dir.is_dir() {
                    for entry in walkdir::WalkDir::new(&dir)
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().is_file())
                    {
                        let relative = entry
                            .path()
                            .strip_prefix(&dir)
                            .unwrap_or(entry.path())
                            .to_string_lossy()
                            .to_string();
                        let bytes = std::fs::read(entry.path()).map_err(|e| {
                            MigrationError::unknown("attachment read", e.to_string())
                        })?;
                        github
                            .create_or_update_file(
                                target_repo,
                                &format!("{target_path}/{relative}"),
                                &bytes,
                                &format!("Preserve migrated attachment {relative}"),
                                branch,
                            )
                            .await?;
                        committed += 1;
                    }
                }
                ActionResult::success(action, json!({"attachments_committed": committed}))
            }
        };

        Ok(result)
    }

    // ========================================================================
    // Simulate
    // ========================================================================

    /// Predict the action's effect with read-only probes. Never mutates the
    /// destination.
    pub async fn simulate(
        &self,
        action: &Action,
        ctx: &mut ApplyContext,
    ) -> Result<ActionResult, MigrationError> {
        let github = self.github.as_ref();

        let outcome = match &action.parameters {
            ActionParams::RepoCreate { org, name, .. } => {
                let full_name = format!("{org}/{name}");
                if github.get_repository(&full_name).await?.is_some() {
                    SimulationOutcome::WouldSkip
                } else {
                    // Predicted mappings let downstream simulations reason
                    // about existence; the scratch table is never persisted.
                    ctx.set_id_mapping("repo", &full_name, "(predicted)");
                    SimulationOutcome::WouldCreate
                }
            }
            ActionParams::RepoPush { bundle_path, .. } => {
                if self.artifact_root.join(bundle_path).exists() {
                    SimulationOutcome::WouldExecute
                } else {
                    SimulationOutcome::WouldFail
                }
            }
            ActionParams::LabelCreate { target_repo, name, .. } => {
                match github.get_label(target_repo, name).await {
                    Ok(Some(_)) => SimulationOutcome::WouldSkip,
                    Ok(None) => SimulationOutcome::WouldCreate,
                    Err(e) if e.category == ErrorCategory::NotFound => {
                        SimulationOutcome::WouldCreate
                    }
                    Err(e) => return Err(e),
                }
            }
            ActionParams::MilestoneCreate { target_repo, title, .. } => {
                let exists = github
                    .list_milestones(target_repo)
                    .await
                    .map(|m| m.iter().any(|x| x.title == *title))
                    .unwrap_or(false);
                if exists {
                    SimulationOutcome::WouldSkip
                } else {
                    SimulationOutcome::WouldCreate
                }
            }
            ActionParams::ReleaseCreate { target_repo, tag_name, .. } => {
                match github.get_release_by_tag(target_repo, tag_name).await {
                    Ok(Some(_)) => SimulationOutcome::WouldSkip,
                    _ => SimulationOutcome::WouldCreate,
                }
            }
            ActionParams::EnvironmentCreate { target_repo, name } => {
                let exists = github
                    .list_environments(target_repo)
                    .await
                    .map(|envs| envs.iter().any(|e| e == name))
                    .unwrap_or(false);
                if exists {
                    SimulationOutcome::WouldSkip
                } else {
                    SimulationOutcome::WouldCreate
                }
            }
            ActionParams::SecretSet { target_repo, name, value, .. } => {
                if value == USER_INPUT_REQUIRED {
                    SimulationOutcome::WouldFail
                } else {
                    let exists = github
                        .list_secrets(target_repo)
                        .await
                        .map(|secrets| secrets.iter().any(|s| s == name))
                        .unwrap_or(false);
                    if exists {
                        SimulationOutcome::WouldUpdate
                    } else {
                        SimulationOutcome::WouldCreate
                    }
                }
            }
            ActionParams::VariableSet { value, .. } => {
                if value == USER_INPUT_REQUIRED {
                    SimulationOutcome::WouldFail
                } else {
                    SimulationOutcome::WouldCreate
                }
            }
            ActionParams::WebhookCreate { target_repo, url, .. } => {
                let exists = github
                    .list_webhooks(target_repo)
                    .await
                    .map(|hooks| hooks.iter().any(|h| h.config.url == *url))
                    .unwrap_or(false);
                if exists {
                    SimulationOutcome::WouldSkip
                } else {
                    SimulationOutcome::WouldCreate
                }
            }
            ActionParams::WikiPush { wiki_bundle_path, .. } => {
                if self.artifact_root.join(wiki_bundle_path).exists() {
                    SimulationOutcome::WouldExecute
                } else {
                    SimulationOutcome::WouldFail
                }
            }
            ActionParams::IssueCreate { .. }
            | ActionParams::PrCreate { .. }
            | ActionParams::IssueCommentAdd { .. }
            | ActionParams::PrCommentAdd { .. } => SimulationOutcome::WouldCreate,
            ActionParams::ProtectionSet { .. }
            | ActionParams::CollaboratorAdd { .. }
            | ActionParams::RepoConfigure { .. }
            | ActionParams::WebhookConfigure { .. } => SimulationOutcome::WouldUpdate,
            _ => SimulationOutcome::WouldExecute,
        };

        Ok(ActionResult::simulated(action, outcome))
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Undo a previously executed action using its rollback data. Returns
    /// `Ok(true)` when the destination entity was removed (or tombstoned).
    pub async fn rollback(
        &self,
        kind: ActionKind,
        rollback_data: &serde_json::Value,
    ) -> Result<bool, MigrationError> {
        let github = self.github.as_ref();
        let repo = rollback_data
            .get("repo")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match kind {
            ActionKind::RepoCreate => {
                github.delete_repository(&repo).await?;
                Ok(true)
            }
            ActionKind::LabelCreate => {
                let name = rollback_data["label"].as_str().unwrap_or_default();
                github.delete_label(&repo, name).await?;
                Ok(true)
            }
            ActionKind::MilestoneCreate => {
                let number = rollback_data["number"].as_u64().unwrap_or(0);
                github.delete_milestone(&repo, number).await?;
                Ok(true)
            }
            ActionKind::ReleaseCreate => {
                let id = rollback_data["release_id"].as_u64().unwrap_or(0);
                github.delete_release(&repo, id).await?;
                Ok(true)
            }
            ActionKind::EnvironmentCreate => {
                let name = rollback_data["environment"].as_str().unwrap_or_default();
                github.delete_environment(&repo, name).await?;
                Ok(true)
            }
            ActionKind::SecretSet => {
                let name = rollback_data["secret"].as_str().unwrap_or_default();
                github.delete_secret(&repo, name).await?;
                Ok(true)
            }
            ActionKind::VariableSet => {
                let name = rollback_data["variable"].as_str().unwrap_or_default();
                github.delete_variable(&repo, name).await?;
                Ok(true)
            }
            ActionKind::ProtectionSet => {
                let branch = rollback_data["branch"].as_str().unwrap_or_default();
                github.delete_branch_protection(&repo, branch).await?;
                Ok(true)
            }
            ActionKind::CollaboratorAdd => {
                let username = rollback_data["username"].as_str().unwrap_or_default();
                github.remove_collaborator(&repo, username).await?;
                Ok(true)
            }
            ActionKind::WebhookCreate => {
                let id = rollback_data["webhook_id"].as_u64().unwrap_or(0);
                github.delete_webhook(&repo, id).await?;
                Ok(true)
            }
            ActionKind::IssueCreate => {
                let number = rollback_data["issue_number"].as_u64().unwrap_or(0);
                github
                    .create_issue_comment(
                        &repo,
                        number,
                        "This issue was created by a migration that has been rolled back.",
                    )
                    .await?;
                github.close_issue(&repo, number).await?;
                Ok(true)
            }
            ActionKind::PrCreate => {
                let number = rollback_data["pr_number"].as_u64().unwrap_or(0);
                github
                    .create_issue_comment(
                        &repo,
                        number,
                        "This pull request was created by a migration that has been rolled back.",
                    )
                    .await?;
                github.close_pull_request(&repo, number).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn generate_webhook_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 24] = rng.gen();
    hex::encode(bytes)
}

fn sanitize_doc_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
