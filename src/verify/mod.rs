//! Verify stage: compare the destination against the expected state.
//!
//! One routine per component reads the destination through the client and
//! accumulates checks, warnings, and errors. Numeric comparisons use a
//! configurable tolerance (default 5%, overridable per component): a miss
//! within tolerance is a warning, above it an error. Counts come from
//! Link-header page totals, so verification never fetches full
//! collections.

use crate::artifacts::{write_json, write_text, ArtifactTree};
use crate::github::GitHubApi;
use crate::plan::ExpectedState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const COMPONENTS: [&str; 9] = [
    "repository",
    "ci_cd",
    "issues",
    "pull_requests",
    "wiki",
    "releases",
    "packages",
    "settings",
    "preservation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyStatus {
    Success,
    Partial,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Accumulated result for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub component: String,
    pub status: VerifyStatus,
    pub checks: Vec<Check>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub stats: BTreeMap<String, serde_json::Value>,
}

impl VerificationResult {
    fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            status: VerifyStatus::Pending,
            checks: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            stats: BTreeMap::new(),
        }
    }

    fn add_check(&mut self, name: &str, passed: bool, details: Option<serde_json::Value>) {
        self.checks.push(Check {
            name: name.to_string(),
            passed,
            details,
        });
    }

    fn stat(&mut self, key: &str, value: impl Serialize) {
        self.stats.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or_default(),
        );
    }

    fn finalize(&mut self) {
        self.status = if !self.errors.is_empty() || self.checks.iter().any(|c| !c.passed) {
            VerifyStatus::Failed
        } else if !self.warnings.is_empty() {
            VerifyStatus::Partial
        } else {
            VerifyStatus::Success
        };
    }
}

/// Verify stage output.
#[derive(Debug)]
pub struct VerifyOutput {
    pub status: VerifyStatus,
    pub results: BTreeMap<String, VerificationResult>,
}

pub struct VerifyStage {
    github: Arc<dyn GitHubApi>,
    default_tolerance: f64,
    tolerance_overrides: BTreeMap<String, f64>,
}

impl VerifyStage {
    pub fn new(github: Arc<dyn GitHubApi>, tolerance: f64) -> Self {
        Self {
            github,
            default_tolerance: tolerance,
            tolerance_overrides: BTreeMap::new(),
        }
    }

    /// Override the tolerance for one component.
    pub fn with_tolerance(mut self, component: &str, tolerance: f64) -> Self {
        self.tolerance_overrides
            .insert(component.to_string(), tolerance);
        self
    }

    fn tolerance_for(&self, component: &str) -> f64 {
        self.tolerance_overrides
            .get(component)
            .copied()
            .unwrap_or(self.default_tolerance)
    }

    fn within_tolerance(&self, component: &str, expected: u64, actual: u64) -> bool {
        if expected == actual {
            return true;
        }
        let tolerance = self.tolerance_for(component);
        let max_diff = expected as f64 * tolerance;
        (expected as f64 - actual as f64).abs() <= max_diff
    }

    /// Compare a count, recording a warning within tolerance and an error
    /// above it.
    fn compare_count(
        &self,
        result: &mut VerificationResult,
        what: &str,
        expected: u64,
        actual: u64,
    ) {
        result.stat(&format!("{what}_expected"), expected);
        result.stat(&format!("{what}_actual"), actual);
        if expected == actual {
            result.add_check(what, true, None);
        } else if self.within_tolerance(&result.component, expected, actual) {
            result.add_check(what, true, None);
            result.warnings.push(format!(
                "{what}: expected {expected}, found {actual} (within tolerance)"
            ));
        } else {
            result
                .errors
                .push(format!("{what}: expected {expected}, found {actual}"));
        }
    }

    pub async fn run(&self, expected: &ExpectedState, tree: &ArtifactTree) -> Result<VerifyOutput> {
        let mut results: BTreeMap<String, VerificationResult> = BTreeMap::new();

        for component in COMPONENTS {
            let mut result = VerificationResult::new(component);
            let outcome = match component {
                "repository" => self.verify_repository(expected, &mut result).await,
                "ci_cd" => self.verify_ci_cd(expected, &mut result).await,
                "issues" => self.verify_issues(expected, &mut result).await,
                "pull_requests" => self.verify_pull_requests(expected, &mut result).await,
                "wiki" => self.verify_wiki(expected, &mut result).await,
                "releases" => self.verify_releases(expected, &mut result).await,
                "packages" => self.verify_packages(expected, &mut result).await,
                "settings" => self.verify_settings(expected, &mut result).await,
                "preservation" => self.verify_preservation(expected, &mut result).await,
                _ => unreachable!(),
            };
            if let Err(e) = outcome {
                result
                    .errors
                    .push(format!("verification query failed: {e}"));
            }
            result.finalize();
            results.insert(component.to_string(), result);
        }

        let status = overall_status(&results);

        let verify_dir = tree.verify_dir();
        write_json(
            &verify_dir.join("verify_report.json"),
            &serde_json::json!({
                "version": "1.0",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "repo": expected.repo,
                "overall_status": status,
                "components": results,
            }),
        )?;
        write_json(
            &verify_dir.join("component_status.json"),
            &results
                .iter()
                .map(|(name, r)| (name.clone(), r.status))
                .collect::<BTreeMap<_, _>>(),
        )?;

        let discrepancies: Vec<serde_json::Value> = results
            .values()
            .flat_map(|r| {
                r.errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "component": r.component,
                            "severity": "error",
                            "message": e,
                        })
                    })
                    .chain(r.warnings.iter().map(|w| {
                        serde_json::json!({
                            "component": r.component,
                            "severity": "warning",
                            "message": w,
                        })
                    }))
                    .collect::<Vec<_>>()
            })
            .collect();
        write_json(
            &verify_dir.join("discrepancies.json"),
            &serde_json::json!({"discrepancies": discrepancies}),
        )?;
        write_text(
            &verify_dir.join("verify_summary.md"),
            &render_summary(&expected.repo, status, &results),
        )?;

        tracing::info!(status = ?status, "Verification completed");
        Ok(VerifyOutput { status, results })
    }

    async fn verify_repository(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let repo = self.github.get_repository(&expected.repo).await?;
        match repo {
            Some(repo) => {
                result.add_check("repository_exists", true, None);
                let branches = self.github.list_branches(&expected.repo).await?;
                result.stat("branch_count", branches.len());
                result.add_check(
                    "branch_count",
                    branches.len() as u64 >= expected.min_branch_count,
                    Some(serde_json::json!({
                        "minimum": expected.min_branch_count,
                        "actual": branches.len(),
                    })),
                );
                if let Some(default_branch) = repo.default_branch {
                    if default_branch != expected.default_branch {
                        result.warnings.push(format!(
                            "default branch is {default_branch}, expected {}",
                            expected.default_branch
                        ));
                    }
                }
                let tags = self.github.count_tags(&expected.repo).await?;
                result.stat("tag_count", tags);
            }
            None => {
                result.add_check("repository_exists", false, None);
                result
                    .errors
                    .push(format!("repository {} does not exist", expected.repo));
            }
        }
        Ok(())
    }

    async fn verify_ci_cd(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let workflows = self.github.list_workflows(&expected.repo).await?;
        self.compare_count(
            result,
            "workflows",
            expected.workflows_count,
            workflows.len() as u64,
        );

        let environments = self.github.list_environments(&expected.repo).await?;
        for environment in &expected.environments {
            let present = environments.iter().any(|e| e == environment);
            result.add_check(&format!("environment:{environment}"), present, None);
            if !present {
                result
                    .errors
                    .push(format!("environment {environment} missing"));
            }
        }

        // Secret values are never readable; names are enough.
        let secrets = self.github.list_secrets(&expected.repo).await?;
        for secret in &expected.secrets {
            if !secrets.iter().any(|s| s == secret) {
                result.warnings.push(format!(
                    "secret {secret} not present (may require user input)"
                ));
            }
        }
        result.stat("secrets_present", secrets.len());

        let variables = self.github.list_variables(&expected.repo).await?;
        self.compare_count(
            result,
            "variables",
            expected.variables_count,
            variables.len() as u64,
        );
        Ok(())
    }

    async fn verify_issues(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let actual = self.github.count_issues(&expected.repo).await?;
        self.compare_count(result, "issues", expected.issues_count, actual);
        Ok(())
    }

    async fn verify_pull_requests(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let actual = self.github.count_pull_requests(&expected.repo).await?;
        self.compare_count(
            result,
            "pull_requests",
            expected.pull_requests_count,
            actual,
        );
        Ok(())
    }

    async fn verify_wiki(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        if !expected.has_wiki {
            result.add_check("wiki_not_expected", true, None);
            return Ok(());
        }
        // The wiki is a separate git remote; existence of the repo flag is
        // all the REST surface exposes.
        let repo = self.github.get_repository(&expected.repo).await?;
        result.add_check("wiki_repo_present", repo.is_some(), None);
        if repo.is_none() {
            result.errors.push("wiki host repository missing".into());
        }
        Ok(())
    }

    async fn verify_releases(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let releases = self.github.list_releases(&expected.repo).await?;
        self.compare_count(
            result,
            "releases",
            expected.releases_count,
            releases.len() as u64,
        );
        Ok(())
    }

    async fn verify_packages(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        // Packages are documented, not transferred; check the docs landed.
        if expected.packages_count == 0 {
            result.add_check("packages_not_expected", true, None);
            return Ok(());
        }
        result.warnings.push(format!(
            "{} packages require manual migration (registry transfer unsupported)",
            expected.packages_count
        ));
        Ok(())
    }

    async fn verify_settings(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        for branch in &expected.protected_branches {
            let protection = self
                .github
                .get_branch_protection(&expected.repo, branch)
                .await?;
            let present = protection.is_some();
            result.add_check(&format!("protection:{branch}"), present, None);
            if !present {
                result
                    .errors
                    .push(format!("branch protection missing on {branch}"));
            }
        }

        let webhooks = self.github.list_webhooks(&expected.repo).await?;
        self.compare_count(
            result,
            "webhooks",
            expected.webhooks_count,
            webhooks.len() as u64,
        );

        if expected.has_codeowners {
            let codeowners = self
                .github
                .get_file_content(&expected.repo, "CODEOWNERS")
                .await?;
            result.add_check("codeowners_present", codeowners.is_some(), None);
            if codeowners.is_none() {
                result.errors.push("CODEOWNERS file missing".into());
            }
        }
        Ok(())
    }

    async fn verify_preservation(
        &self,
        expected: &ExpectedState,
        result: &mut VerificationResult,
    ) -> Result<()> {
        for path in &expected.preservation_paths {
            let content = self.github.get_file_content(&expected.repo, path).await?;
            let present = content.is_some();
            result.add_check(&format!("preserved:{path}"), present, None);
            if !present {
                result
                    .warnings
                    .push(format!("preservation artifact {path} not committed"));
            }
        }
        Ok(())
    }
}

fn overall_status(results: &BTreeMap<String, VerificationResult>) -> VerifyStatus {
    if results.is_empty() {
        return VerifyStatus::Pending;
    }
    if results.values().any(|r| r.status == VerifyStatus::Failed) {
        VerifyStatus::Failed
    } else if results.values().any(|r| r.status == VerifyStatus::Partial) {
        VerifyStatus::Partial
    } else if results.values().all(|r| r.status == VerifyStatus::Success) {
        VerifyStatus::Success
    } else {
        VerifyStatus::Pending
    }
}

fn render_summary(
    repo: &str,
    status: VerifyStatus,
    results: &BTreeMap<String, VerificationResult>,
) -> String {
    let mut lines = vec![
        "# Verification Summary".to_string(),
        String::new(),
        format!("**Repository**: {repo}"),
        format!("**Overall**: {status:?}"),
        String::new(),
        "| Component | Status | Checks | Warnings | Errors |".to_string(),
        "|---|---|---|---|---|".to_string(),
    ];
    for (name, result) in results {
        lines.push(format!(
            "| {name} | {:?} | {} | {} | {} |",
            result.status,
            result.checks.len(),
            result.warnings.len(),
            result.errors.len(),
        ));
    }
    lines.push(String::new());
    for result in results.values() {
        for error in &result.errors {
            lines.push(format!("- **error** ({}): {error}", result.component));
        }
        for warning in &result.warnings {
            lines.push(format!("- warning ({}): {warning}", result.component));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::mock::MockGitHub;
    use crate::github::models::NewRepository;
    use crate::github::GitHubApi as _;

    async fn seeded_github() -> Arc<MockGitHub> {
        let github = Arc::new(MockGitHub::new());
        github
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
        github
            .branches
            .write()
            .await
            .insert("acme/widget".into(), vec!["main".into()]);
        github
    }

    fn expected_minimal() -> ExpectedState {
        ExpectedState {
            repo: "acme/widget".into(),
            default_branch: "main".into(),
            min_branch_count: 1,
            preservation_paths: vec![],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_minimal_project_verifies_success() {
        let github = seeded_github().await;
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());

        let stage = VerifyStage::new(github, 0.05);
        let output = stage.run(&expected_minimal(), &tree).await.unwrap();

        assert_eq!(output.status, VerifyStatus::Success);
        let repository = &output.results["repository"];
        assert_eq!(
            repository.stats["branch_count"],
            serde_json::json!(1)
        );
        assert!(dir.path().join("verify/verify_report.json").exists());
        assert!(dir.path().join("verify/verify_summary.md").exists());
        assert!(dir.path().join("verify/component_status.json").exists());
        assert!(dir.path().join("verify/discrepancies.json").exists());
    }

    #[tokio::test]
    async fn test_missing_repository_fails() {
        let github = Arc::new(MockGitHub::new());
        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());

        let stage = VerifyStage::new(github, 0.05);
        let output = stage.run(&expected_minimal(), &tree).await.unwrap();
        assert_eq!(output.status, VerifyStatus::Failed);
        assert!(!output.results["repository"].errors.is_empty());
    }

    #[tokio::test]
    async fn test_count_within_tolerance_is_warning() {
        let github = seeded_github().await;
        // 100 expected, 96 actual: within 5%.
        for i in 0..96 {
            github
                .create_issue("acme/widget", &format!("issue {i}"), "", &[], None, &[])
                .await
                .unwrap();
        }

        let mut expected = expected_minimal();
        expected.issues_count = 100;

        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let output = VerifyStage::new(github, 0.05)
            .run(&expected, &tree)
            .await
            .unwrap();

        let issues = &output.results["issues"];
        assert_eq!(issues.status, VerifyStatus::Partial);
        assert!(!issues.warnings.is_empty());
        assert!(issues.errors.is_empty());
        assert_eq!(output.status, VerifyStatus::Partial);
    }

    #[tokio::test]
    async fn test_count_beyond_tolerance_is_error() {
        let github = seeded_github().await;
        let mut expected = expected_minimal();
        expected.issues_count = 100;

        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let output = VerifyStage::new(github, 0.05)
            .run(&expected, &tree)
            .await
            .unwrap();

        assert_eq!(output.results["issues"].status, VerifyStatus::Failed);
        assert_eq!(output.status, VerifyStatus::Failed);
    }

    #[tokio::test]
    async fn test_per_component_tolerance_override() {
        let github = seeded_github().await;
        // 10 issues exist, 12 expected: 20% off.
        for i in 0..10 {
            github
                .create_issue("acme/widget", &format!("issue {i}"), "", &[], None, &[])
                .await
                .unwrap();
        }
        let mut expected = expected_minimal();
        expected.issues_count = 12;

        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let output = VerifyStage::new(github, 0.05)
            .with_tolerance("issues", 0.25)
            .run(&expected, &tree)
            .await
            .unwrap();

        // Within the per-component tolerance: warning, not error.
        assert_eq!(output.results["issues"].status, VerifyStatus::Partial);
    }

    #[tokio::test]
    async fn test_missing_protection_and_codeowners_detected() {
        let github = seeded_github().await;
        let mut expected = expected_minimal();
        expected.protected_branches = vec!["main".into()];
        expected.has_codeowners = true;

        let dir = tempfile::tempdir().unwrap();
        let tree = ArtifactTree::new(dir.path());
        let output = VerifyStage::new(github, 0.05)
            .run(&expected, &tree)
            .await
            .unwrap();

        let settings = &output.results["settings"];
        assert_eq!(settings.status, VerifyStatus::Failed);
        assert!(settings.errors.iter().any(|e| e.contains("main")));
        assert!(settings.errors.iter().any(|e| e.contains("CODEOWNERS")));
    }
}
