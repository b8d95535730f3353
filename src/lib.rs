//! Migration Orchestrator
//!
//! Migrates repository-hosting projects from GitLab to GitHub through a
//! six-stage pipeline:
//! - Discovery: scan the source and build a project inventory
//! - Export: checkpointed extraction into an artifact tree
//! - Transform: GitLab constructs converted to GitHub shape
//! - Plan: a validated DAG of typed, idempotent actions
//! - Apply: ordered execution with retry, dry-run, resume, and rollback
//! - Verify: destination state compared against expectations

pub mod apply;
pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod gitcmd;
pub mod gitlab;
pub mod github;
pub mod pipeline;
pub mod plan;
pub mod ratelimit;
pub mod transform;
pub mod verify;

use serde::{Deserialize, Serialize};

pub use config::MigrationConfig;

/// Terminal status of a stage (or a whole run).
///
/// `Partial` means some items succeeded and some failed; only `Failed`
/// stops the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Partial,
    Failed,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Success
    }
}

impl StageStatus {
    /// Process exit code for the CLI: 0 success, 1 partial, 2 failed.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Failed => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_exit_codes() {
        assert_eq!(StageStatus::Success.exit_code(), 0);
        assert_eq!(StageStatus::Partial.exit_code(), 1);
        assert_eq!(StageStatus::Failed.exit_code(), 2);
    }

    #[test]
    fn test_stage_status_serde() {
        assert_eq!(
            serde_json::to_string(&StageStatus::Partial).unwrap(),
            "\"partial\""
        );
    }
}
