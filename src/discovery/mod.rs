//! Discovery stage: scan the source forge and build a project inventory.
//!
//! For each project in scope the stage probes fourteen component types,
//! records `{enabled, counts, has_data, error?}` per component, and derives
//! a readiness assessment (complexity, blockers, notes, recommendation).

use crate::artifacts::{write_json, write_text, ArtifactTree};
use crate::config::{MigrationConfig, Scope};
use crate::error::MigrationError;
use crate::gitlab::GitLabApi;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The fourteen component keys probed per project, in inventory order.
pub const COMPONENT_KEYS: [&str; 14] = [
    "repository",
    "ci_cd",
    "issues",
    "merge_requests",
    "wiki",
    "releases",
    "packages",
    "webhooks",
    "schedules",
    "lfs",
    "environments",
    "protected_resources",
    "deploy_keys",
    "variables",
];

/// Per-component detection result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub enabled: bool,
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    pub has_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn disabled() -> Self {
        Self::default()
    }

    fn errored(error: &MigrationError) -> Self {
        Self {
            enabled: false,
            error: Some(error.message.clone()),
            ..Default::default()
        }
    }

    fn with_count(key: &str, count: u64) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(key.to_string(), count);
        Self {
            enabled: true,
            has_data: count > 0,
            counts,
            error: None,
        }
    }
}

/// Migration complexity for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    fn raise_to(&mut self, other: Complexity) {
        if (other as u8) > (*self as u8) {
            *self = other;
        }
    }
}

/// Readiness assessment computed from the component map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub complexity: Complexity,
    pub blockers: Vec<String>,
    pub notes: Vec<String>,
    pub components_detected: usize,
    pub components_with_data: usize,
    pub recommendation: String,
}

/// One project's entry in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: u64,
    pub path_with_namespace: String,
    pub name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    pub visibility: String,
    pub archived: bool,
    pub components: BTreeMap<String, ComponentStatus>,
    pub readiness: Readiness,
}

/// Discovery stage output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOutput {
    pub projects: Vec<InventoryEntry>,
}

pub struct DiscoveryStage {
    gitlab: Arc<dyn GitLabApi>,
}

impl DiscoveryStage {
    pub fn new(gitlab: Arc<dyn GitLabApi>) -> Self {
        Self { gitlab }
    }

    /// Scan the configured scope and write the inventory artifacts.
    pub async fn run(
        &self,
        config: &MigrationConfig,
        tree: &ArtifactTree,
    ) -> Result<DiscoveryOutput> {
        let projects = match &config.scope {
            Scope::Project(id) => vec![self.gitlab.get_project(*id).await?],
            Scope::Group(path) => self.gitlab.list_projects(path).await?,
        };

        tracing::info!(count = projects.len(), "Discovered projects in scope");

        let mut entries = Vec::with_capacity(projects.len());
        for project in projects {
            let components = self.detect_components(project.id, &project).await;
            let readiness = assess_readiness(&components, project.archived);
            entries.push(InventoryEntry {
                id: project.id,
                path_with_namespace: project.path_with_namespace.clone(),
                name: project.name.clone(),
                default_branch: project.default_branch.clone(),
                visibility: project.visibility.clone(),
                archived: project.archived,
                components,
                readiness,
            });
        }

        let output = DiscoveryOutput { projects: entries };

        let dir = tree.discovery_dir();
        write_json(&dir.join("inventory.json"), &output)?;
        write_json(
            &dir.join("readiness.json"),
            &output
                .projects
                .iter()
                .map(|p| (p.path_with_namespace.clone(), p.readiness.clone()))
                .collect::<BTreeMap<_, _>>(),
        )?;
        write_text(&dir.join("summary.md"), &render_summary(&output))?;

        Ok(output)
    }

    /// Probe all fourteen components. Per-component failures are recorded,
    /// not propagated, so one denied endpoint cannot sink discovery.
    async fn detect_components(
        &self,
        project_id: u64,
        project: &crate::gitlab::models::Project,
    ) -> BTreeMap<String, ComponentStatus> {
        let gitlab = &self.gitlab;
        let mut components = BTreeMap::new();

        components.insert(
            "repository".to_string(),
            match gitlab.list_branches(project_id).await {
                Ok(branches) => ComponentStatus::with_count("branches", branches.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "ci_cd".to_string(),
            match gitlab.has_ci(project_id).await {
                Ok(true) => ComponentStatus {
                    enabled: true,
                    has_data: true,
                    ..Default::default()
                },
                Ok(false) => ComponentStatus::disabled(),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "issues".to_string(),
            if project.issues_enabled {
                match gitlab.list_issues(project_id).await {
                    Ok(issues) => ComponentStatus::with_count("total", issues.len() as u64),
                    Err(e) => ComponentStatus::errored(&e),
                }
            } else {
                ComponentStatus::disabled()
            },
        );

        components.insert(
            "merge_requests".to_string(),
            if project.merge_requests_enabled {
                match gitlab.list_merge_requests(project_id).await {
                    Ok(mrs) => ComponentStatus::with_count("total", mrs.len() as u64),
                    Err(e) => ComponentStatus::errored(&e),
                }
            } else {
                ComponentStatus::disabled()
            },
        );

        components.insert(
            "wiki".to_string(),
            ComponentStatus {
                enabled: project.wiki_enabled,
                has_data: project.wiki_enabled,
                ..Default::default()
            },
        );

        components.insert(
            "releases".to_string(),
            match gitlab.list_releases(project_id).await {
                Ok(releases) => ComponentStatus::with_count("total", releases.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "packages".to_string(),
            match gitlab.list_packages(project_id).await {
                Ok(packages) => ComponentStatus::with_count("total", packages.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "webhooks".to_string(),
            match gitlab.list_webhooks(project_id).await {
                Ok(hooks) => ComponentStatus::with_count("total", hooks.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "schedules".to_string(),
            match gitlab.list_pipeline_schedules(project_id).await {
                Ok(schedules) => ComponentStatus::with_count("total", schedules.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "lfs".to_string(),
            match gitlab.has_lfs(project_id).await {
                Ok(detected) => ComponentStatus {
                    enabled: detected,
                    has_data: detected,
                    ..Default::default()
                },
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "environments".to_string(),
            match gitlab.list_environments(project_id).await {
                Ok(environments) => {
                    ComponentStatus::with_count("total", environments.len() as u64)
                }
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "protected_resources".to_string(),
            match gitlab.list_protected_branches(project_id).await {
                Ok(branches) => ComponentStatus::with_count("branches", branches.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "deploy_keys".to_string(),
            match gitlab.list_deploy_keys(project_id).await {
                Ok(keys) => ComponentStatus::with_count("total", keys.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components.insert(
            "variables".to_string(),
            match gitlab.list_variables(project_id).await {
                Ok(variables) => ComponentStatus::with_count("total", variables.len() as u64),
                Err(e) => ComponentStatus::errored(&e),
            },
        );

        components
    }
}

/// Derive the readiness assessment from the component map.
pub fn assess_readiness(
    components: &BTreeMap<String, ComponentStatus>,
    archived: bool,
) -> Readiness {
    let mut blockers = Vec::new();
    let mut notes = Vec::new();
    let mut complexity = Complexity::Low;

    let count_of = |key: &str, counter: &str| -> u64 {
        components
            .get(key)
            .and_then(|c| c.counts.get(counter))
            .copied()
            .unwrap_or(0)
    };
    let has_data = |key: &str| components.get(key).map(|c| c.has_data).unwrap_or(false);

    if has_data("ci_cd") {
        blockers.push(
            "Has GitLab CI/CD pipeline - requires conversion to GitHub Actions".to_string(),
        );
        complexity.raise_to(Complexity::Medium);
    }

    if has_data("lfs") {
        notes.push("Uses Git LFS - ensure GitHub LFS is configured".to_string());
        complexity.raise_to(Complexity::Medium);
    }

    let total_issues = count_of("issues", "total");
    let total_mrs = count_of("merge_requests", "total");
    if total_issues > 100 || total_mrs > 50 {
        complexity.raise_to(Complexity::High);
        notes.push(format!(
            "High activity ({total_issues} issues, {total_mrs} MRs) - review migration strategy"
        ));
    } else if total_issues > 30 || total_mrs > 15 {
        complexity.raise_to(Complexity::Medium);
        notes.push(format!(
            "Moderate activity ({total_issues} issues, {total_mrs} MRs)"
        ));
    }

    if has_data("packages") {
        notes.push("Has packages/registry - requires migration to GitHub Packages".to_string());
        complexity.raise_to(Complexity::Medium);
    }

    if has_data("webhooks") {
        notes.push(format!(
            "{} webhooks need reconfiguration for GitHub",
            count_of("webhooks", "total")
        ));
    }
    if has_data("environments") {
        notes.push(format!(
            "{} environments need to be recreated in GitHub",
            count_of("environments", "total")
        ));
    }
    if has_data("protected_resources") {
        notes.push(
            "Has branch/tag protections - need to configure GitHub branch protection rules"
                .to_string(),
        );
    }
    if has_data("deploy_keys") {
        notes.push(format!(
            "{} deploy keys need to be recreated in GitHub",
            count_of("deploy_keys", "total")
        ));
    }
    if has_data("variables") {
        notes.push(format!(
            "{} CI/CD variables need to be migrated to GitHub Secrets/Variables",
            count_of("variables", "total")
        ));
    }

    if archived {
        notes.push("Project is archived - consider excluding from migration".to_string());
        complexity = Complexity::Low;
    }

    let components_with_data = components.values().filter(|c| c.has_data).count();

    let recommendation = match complexity {
        Complexity::Low => {
            "Ready for migration - straightforward project with minimal complexity"
        }
        Complexity::Medium => {
            "Needs review - some components require manual configuration or conversion"
        }
        Complexity::High => "Complex migration - requires careful planning and staged approach",
    }
    .to_string();

    Readiness {
        complexity,
        blockers,
        notes,
        components_detected: components.len(),
        components_with_data,
        recommendation,
    }
}

fn render_summary(output: &DiscoveryOutput) -> String {
    let mut lines = vec![
        "# Discovery Summary".to_string(),
        String::new(),
        format!("Projects in scope: {}", output.projects.len()),
        String::new(),
    ];
    for project in &output.projects {
        lines.push(format!(
            "- **{}**: complexity {:?}, {} blockers, {} components with data",
            project.path_with_namespace,
            project.readiness.complexity,
            project.readiness.blockers.len(),
            project.readiness.components_with_data,
        ));
    }
    lines.join("\n")
}
