//! Apply stage: ordered, idempotent execution of the migration plan.
//!
//! The loop walks the plan in its topological order, honoring the resume
//! cursor, `skip_if` predicates, dependency satisfaction, and the
//! idempotency map. Transient failures retry inside the action; a failed
//! action is recorded and the loop continues; the stage only reports
//! `failed` when nothing succeeded.

use crate::apply::actions::{ActionResult, ActionRunner, ApplyContext, SimulationOutcome};
use crate::artifacts::{write_json, ArtifactTree};
use crate::error::MigrationError;
use crate::github::GitHubApi;
use crate::plan::models::{Action, Plan};
use crate::ratelimit::RetryPolicy;
use crate::StageStatus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Remaining-requests floor below which Apply waits for the window reset.
const RATE_LIMIT_FLOOR: u64 = 100;

/// Inputs to one Apply run.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub dry_run: bool,
    /// Skip all actions strictly before this id.
    pub resume_from_action_id: Option<String>,
    /// Opaque per-action state from a previous run.
    pub resume_state: Option<serde_json::Value>,
}

/// Record of an executed action persisted for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedActionRecord {
    pub action_id: String,
    pub action_type: crate::plan::ActionKind,
    pub idempotency_key: String,
    pub reversible: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<serde_json::Value>,
}

/// Apply stage output.
#[derive(Debug)]
pub struct ApplyOutput {
    pub status: StageStatus,
    pub results: Vec<ActionResult>,
    pub id_mappings: BTreeMap<String, BTreeMap<String, String>>,
    pub successful: usize,
    pub failed: usize,
    pub dry_run: bool,
}

pub struct ApplyStage {
    github: Arc<dyn GitHubApi>,
    github_token: String,
    retry: RetryPolicy,
}

impl ApplyStage {
    pub fn new(github: Arc<dyn GitHubApi>, github_token: &str) -> Self {
        Self {
            github,
            github_token: github_token.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub async fn run(
        &self,
        plan: &Plan,
        tree: &ArtifactTree,
        options: ApplyOptions,
    ) -> Result<ApplyOutput> {
        let apply_dir = tree.apply_dir();
        std::fs::create_dir_all(&apply_dir)?;

        if options.dry_run {
            tracing::info!("Running in DRY RUN mode - no changes will be made");
        }

        let runner = ActionRunner::new(
            self.github.clone(),
            &self.github_token,
            tree.root().to_path_buf(),
            apply_dir.clone(),
        );

        let mut ctx = ApplyContext {
            resume_state: options.resume_state.clone().unwrap_or_default(),
            dry_run: options.dry_run,
            ..Default::default()
        };

        let mut results: Vec<ActionResult> = Vec::with_capacity(plan.actions.len());
        let mut skipping = options.resume_from_action_id.is_some();
        // Actions before the resume cursor were applied by the previous
        // run; they count as satisfied dependencies.
        let mut presumed_complete: std::collections::HashSet<String> =
            std::collections::HashSet::new();

        for action in &plan.actions {
            // Resume: skip everything before the cursor.
            if skipping {
                if Some(&action.id) == options.resume_from_action_id.as_ref() {
                    skipping = false;
                } else {
                    tracing::info!(action_id = %action.id, "Skipping action (resuming)");
                    presumed_complete.insert(action.id.clone());
                    continue;
                }
            }

            // skip_if predicates are evaluated against the artifact tree.
            if let Some(skip) = &action.skip_if {
                if evaluate_skip(action, tree) {
                    tracing::info!(
                        action_id = %action.id,
                        condition = %skip.condition,
                        "Skipping action (condition met)"
                    );
                    continue;
                }
            }

            // Dependency satisfaction: every dependency must have produced
            // a successful result in this run, or have been applied before
            // the resume cursor.
            let satisfied = action.dependencies.iter().all(|dep| {
                presumed_complete.contains(dep)
                    || results.iter().any(|r| &r.action_id == dep && r.success)
            });
            if !satisfied {
                tracing::error!(action_id = %action.id, "Dependencies not met");
                results.push(ActionResult::failure(
                    action,
                    MigrationError::validation(
                        format!("Dependencies not met for action {}", action.id),
                        format!("requires {:?}", action.dependencies),
                    ),
                ));
                continue;
            }

            // A hand-edited plan can carry a type tag that disagrees with
            // its parameters; that action fails without aborting the loop.
            if action.kind != action.parameters.kind() {
                tracing::error!(action_id = %action.id, "Unknown action type");
                results.push(ActionResult::failure(
                    action,
                    MigrationError::validation(
                        format!("Unknown action type for action {}", action.id),
                        format!(
                            "declared type {} does not match parameters for {}",
                            action.kind,
                            action.parameters.kind()
                        ),
                    ),
                ));
                continue;
            }

            // The idempotency map short-circuits duplicate effects.
            if let Some(cached) = runner.check_idempotency(action, &ctx) {
                tracing::info!(action_id = %action.id, "Skipping action (idempotency key seen)");
                results.push(cached);
                continue;
            }

            // Courtesy rate-limit gate before destructive work.
            if !options.dry_run {
                self.wait_for_rate_budget().await;
            }

            let result = runner
                .execute_with_retry(action, &mut ctx, &self.retry, options.dry_run)
                .await;

            if result.success {
                tracing::info!(
                    action_id = %action.id,
                    kind = %action.kind,
                    simulated = result.simulated,
                    "Action completed"
                );
            } else {
                tracing::error!(
                    action_id = %action.id,
                    kind = %action.kind,
                    error = result.error.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown"),
                    "Action failed"
                );
            }

            ctx.executed
                .insert(action.idempotency_key.clone(), result.clone());
            results.push(result);
        }

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        let status = if failed == 0 {
            StageStatus::Success
        } else if successful > 0 {
            StageStatus::Partial
        } else {
            StageStatus::Failed
        };

        // Reports.
        if options.dry_run {
            let report = dry_run_report(plan, &results);
            write_json(&apply_dir.join("dry_run_report.json"), &report)?;
        } else {
            let report = apply_report(plan, &results, &ctx);
            write_json(&apply_dir.join("apply_report.json"), &report)?;
            write_json(&apply_dir.join("id_mappings.json"), &ctx.id_mappings)?;

            let executed: Vec<ExecutedActionRecord> = results
                .iter()
                .map(|r| ExecutedActionRecord {
                    action_id: r.action_id.clone(),
                    action_type: r.action_type,
                    idempotency_key: plan
                        .action(&r.action_id)
                        .map(|a| a.idempotency_key.clone())
                        .unwrap_or_default(),
                    reversible: r.reversible,
                    success: r.success,
                    rollback_data: r.rollback_data.clone(),
                })
                .collect();
            write_json(&apply_dir.join("executed_actions.json"), &executed)?;
        }

        let errors: Vec<&ActionResult> = results.iter().filter(|r| !r.success).collect();
        if !errors.is_empty() {
            write_json(&apply_dir.join("errors.json"), &errors)?;
        }

        let mode = if options.dry_run { "Dry run" } else { "Apply" };
        tracing::info!(
            "{mode} completed: {successful}/{} actions succeeded",
            results.len()
        );

        Ok(ApplyOutput {
            status,
            successful,
            failed,
            id_mappings: ctx.id_mappings,
            results,
            dry_run: options.dry_run,
        })
    }

    /// Sleep until the destination window resets when the remaining budget
    /// is too small to make progress safely.
    async fn wait_for_rate_budget(&self) {
        let Ok(state) = self.github.rate_limit().await else {
            return;
        };
        if let Some(remaining) = state.remaining {
            if remaining < RATE_LIMIT_FLOOR {
                let wait = state.seconds_until_reset().unwrap_or(60.0) + 10.0;
                tracing::warn!(
                    remaining,
                    wait_secs = wait as u64,
                    "Rate limit low, waiting for reset"
                );
                tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
            }
        }
    }
}

/// Evaluate a skip predicate against the artifact tree.
fn evaluate_skip(action: &Action, tree: &ArtifactTree) -> bool {
    let Some(skip) = &action.skip_if else {
        return false;
    };
    match skip.condition.as_str() {
        "no_lfs" => {
            let lfs_dir = tree.export_dir().join("repository/lfs");
            !lfs_dir.is_dir()
                || std::fs::read_dir(lfs_dir)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(true)
        }
        "no_wiki" => !tree.export_dir().join("wiki/wiki.git").exists(),
        _ => false,
    }
}

fn apply_report(
    plan: &Plan,
    results: &[ActionResult],
    ctx: &ApplyContext,
) -> serde_json::Value {
    let total = results.len();
    let successful = results.iter().filter(|r| r.success).count();
    let failed = total - successful;
    serde_json::json!({
        "version": "1.0",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "plan_summary": plan.summary,
        "execution_summary": {
            "total_actions": total,
            "successful": successful,
            "failed": failed,
            "success_rate": if total > 0 {
                format!("{:.1}%", successful as f64 / total as f64 * 100.0)
            } else {
                "0%".to_string()
            },
        },
        "actions": results,
        "id_mappings": ctx.id_mappings,
        "errors": results.iter().filter(|r| !r.success).collect::<Vec<_>>(),
    })
}

fn dry_run_report(plan: &Plan, results: &[ActionResult]) -> serde_json::Value {
    let mut outcomes: BTreeMap<&str, usize> = BTreeMap::new();
    for key in [
        "would_create",
        "would_update",
        "would_skip",
        "would_fail",
        "would_execute",
    ] {
        outcomes.insert(key, 0);
    }
    for result in results {
        if let Some(outcome) = result.simulation_outcome {
            let key = match outcome {
                SimulationOutcome::WouldCreate => "would_create",
                SimulationOutcome::WouldUpdate => "would_update",
                SimulationOutcome::WouldSkip => "would_skip",
                SimulationOutcome::WouldFail => "would_fail",
                SimulationOutcome::WouldExecute => "would_execute",
            };
            *outcomes.entry(key).or_default() += 1;
        }
    }

    let mut warnings: Vec<String> = Vec::new();
    for action in &plan.actions {
        if action.requires_user_input {
            warnings.push(format!(
                "Action {} requires manual configuration",
                action.id
            ));
        }
    }
    if !plan.user_inputs_required.is_empty() {
        warnings.push(format!(
            "{} secrets/values need manual configuration",
            plan.user_inputs_required.len()
        ));
    }

    let total = results.len();
    let successful = results.iter().filter(|r| r.success).count();
    serde_json::json!({
        "version": "1.0",
        "mode": "dry_run",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "plan_summary": plan.summary,
        "summary": {
            "total_actions": total,
            "would_create": outcomes["would_create"],
            "would_update": outcomes["would_update"],
            "would_skip": outcomes["would_skip"],
            "would_fail": outcomes["would_fail"],
            "would_execute": outcomes["would_execute"],
            "simulation_success_rate": if total > 0 {
                format!("{:.1}%", successful as f64 / total as f64 * 100.0)
            } else {
                "0%".to_string()
            },
        },
        "actions": results,
        "warnings": warnings,
        "note": "This is a simulation. No actual changes were made to GitHub.",
    })
}
