//! GitLab CI → GitHub Actions workflow conversion.
//!
//! The converter is deterministic: the same input YAML always produces the
//! same workflow. Constructs that do not round-trip (includes, anchor
//! templates, rules, runner tags) are registered as typed conversion gaps
//! rather than silently dropped.

use crate::error::MigrationError;
use crate::transform::gaps::{ConversionGap, GapSeverity};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::OnceLock;

/// Top-level keys that are configuration, not jobs.
const RESERVED_KEYS: [&str; 10] = [
    "stages",
    "variables",
    "include",
    "workflow",
    "default",
    "image",
    "services",
    "before_script",
    "after_script",
    "cache",
];

/// GitLab's implicit stage order when `stages:` is absent.
const DEFAULT_STAGES: [&str; 5] = [".pre", "build", "test", "deploy", ".post"];

#[derive(Debug, Clone)]
pub struct CiConversion {
    pub workflow_yaml: String,
    /// Job names ordered by stage; feeds required status checks.
    pub job_names: Vec<String>,
    pub gaps: Vec<ConversionGap>,
}

fn as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

fn image_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Mapping(m) => m
            .get("name")
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}

/// Replace source registry references with the destination registry.
///
/// Both the `$CI_REGISTRY_IMAGE` variable forms and literal
/// `registry.gitlab.com/<path>` references become `ghcr.io/<repo>`.
pub fn rewrite_registry_urls(text: &str, github_repo: &str) -> String {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    let literal =
        LITERAL.get_or_init(|| Regex::new(r"registry\.gitlab\.com/[\w\-./]+").unwrap());

    let replacement = format!("ghcr.io/{github_repo}");
    let text = text
        .replace("${CI_REGISTRY_IMAGE}", &replacement)
        .replace("$CI_REGISTRY_IMAGE", &replacement)
        .replace("${CI_REGISTRY}", "ghcr.io")
        .replace("$CI_REGISTRY", "ghcr.io");
    literal.replace_all(&text, replacement.as_str()).to_string()
}

/// Convert a GitLab CI configuration into one GitHub Actions workflow.
pub fn convert_ci(
    gitlab_ci_yaml: &str,
    github_repo: &str,
    default_branch: &str,
) -> Result<CiConversion, MigrationError> {
    let root: Value = serde_yaml::from_str(gitlab_ci_yaml)
        .map_err(|e| MigrationError::validation("Invalid .gitlab-ci.yml", e.to_string()))?;
    let root = root
        .as_mapping()
        .ok_or_else(|| {
            MigrationError::validation(
                "Invalid .gitlab-ci.yml",
                "top level is not a mapping".to_string(),
            )
        })?
        .clone();

    let mut gaps = Vec::new();

    if root.contains_key("include") {
        gaps.push(
            ConversionGap::new(
                "ci",
                GapSeverity::Critical,
                "include",
                "GitLab CI includes cannot be resolved during conversion",
            )
            .with_recommendation("Inline the included configuration before migrating"),
        );
    }
    if root.contains_key("workflow") {
        gaps.push(ConversionGap::new(
            "ci",
            GapSeverity::Warning,
            "workflow:rules",
            "Pipeline-level workflow rules are not converted",
        ));
    }

    // Stage order drives both job ordering and implicit needs.
    let stages: Vec<String> = root
        .get("stages")
        .map(as_string_list)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STAGES.iter().map(|s| s.to_string()).collect());

    let global_before = root
        .get("before_script")
        .map(as_string_list)
        .unwrap_or_default();
    let global_image = root.get("image").and_then(image_name);

    // Anchor templates (`.name`) are collected for `extends` resolution and
    // reported as gaps since they do not round-trip as YAML anchors.
    let mut templates: Vec<(String, Mapping)> = Vec::new();
    for (key, value) in &root {
        let Some(name) = key.as_str() else { continue };
        if name.starts_with('.') {
            if let Some(mapping) = value.as_mapping() {
                templates.push((name.to_string(), mapping.clone()));
            }
            gaps.push(ConversionGap::new(
                "ci",
                GapSeverity::Info,
                name,
                "Anchor template flattened into extending jobs",
            ));
        }
    }

    // Collect jobs in appearance order, then stable-sort by stage rank.
    struct JobEntry {
        name: String,
        config: Mapping,
        stage_rank: usize,
    }

    let mut jobs = Vec::new();
    for (key, value) in &root {
        let Some(name) = key.as_str() else { continue };
        if name.starts_with('.') || RESERVED_KEYS.contains(&name) {
            continue;
        }
        let Some(mapping) = value.as_mapping() else {
            continue;
        };

        // Resolve extends by underlaying the template (job keys win).
        let mut config = mapping.clone();
        if let Some(extends) = mapping.get("extends") {
            for template_name in as_string_list(extends) {
                if let Some((_, template)) =
                    templates.iter().find(|(n, _)| *n == template_name)
                {
                    let mut merged = template.clone();
                    for (k, v) in &config {
                        merged.insert(k.clone(), v.clone());
                    }
                    config = merged;
                } else {
                    gaps.push(ConversionGap::new(
                        "ci",
                        GapSeverity::Warning,
                        format!("{name}:extends"),
                        format!("Template '{template_name}' not found"),
                    ));
                }
            }
        }

        let stage = config
            .get("stage")
            .and_then(|v| v.as_str())
            .unwrap_or("test")
            .to_string();
        let stage_rank = stages.iter().position(|s| *s == stage).unwrap_or(1);

        jobs.push(JobEntry {
            name: name.to_string(),
            config,
            stage_rank,
        });
    }
    jobs.sort_by_key(|j| j.stage_rank);

    // Jobs grouped by stage for implicit needs wiring.
    let job_names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();

    let mut workflow_jobs = Mapping::new();
    for job in &jobs {
        let mut out = Mapping::new();
        out.insert(Value::from("name"), Value::from(job.name.clone()));
        out.insert(Value::from("runs-on"), Value::from("ubuntu-latest"));

        // Explicit needs win; otherwise depend on every job of the
        // previous stage so stage ordering is preserved.
        let needs: Vec<String> = match job.config.get("needs") {
            Some(needs) => as_string_list(needs),
            None => {
                if job.stage_rank > 0 {
                    jobs.iter()
                        .filter(|other| other.stage_rank == job.stage_rank - 1)
                        .map(|other| other.name.clone())
                        .collect()
                } else {
                    Vec::new()
                }
            }
        };
        if !needs.is_empty() {
            out.insert(
                Value::from("needs"),
                Value::Sequence(needs.into_iter().map(Value::from).collect()),
            );
        }

        if let Some(image) = job
            .config
            .get("image")
            .and_then(image_name)
            .or_else(|| global_image.clone())
        {
            out.insert(
                Value::from("container"),
                Value::from(rewrite_registry_urls(&image, github_repo)),
            );
        }

        if let Some(environment) = job.config.get("environment") {
            let env_name = match environment {
                Value::String(s) => Some(s.clone()),
                Value::Mapping(m) => m
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                _ => None,
            };
            if let Some(env_name) = env_name {
                out.insert(Value::from("environment"), Value::from(env_name));
            }
        }

        if let Some(variables) = job.config.get("variables") {
            if let Some(mapping) = variables.as_mapping() {
                out.insert(Value::from("env"), Value::Mapping(mapping.clone()));
            }
        }

        // Gap registrations for constructs without a faithful equivalent.
        for (key, feature, detail) in [
            ("rules", "rules", "Job rules are not converted; review triggers"),
            ("only", "only/except", "only/except filters are not converted"),
            ("except", "only/except", "only/except filters are not converted"),
            ("tags", "runner tags", "Runner tags have no GitHub equivalent"),
            ("cache", "cache", "Job cache must be re-declared with actions/cache"),
            (
                "artifacts",
                "artifacts",
                "Artifacts must be re-declared with actions/upload-artifact",
            ),
        ] {
            if job.config.contains_key(Value::from(key)) {
                gaps.push(ConversionGap::new(
                    "ci",
                    GapSeverity::Info,
                    format!("{}:{feature}", job.name),
                    detail,
                ));
            }
        }
        if job
            .config
            .get("when")
            .and_then(|v| v.as_str())
            == Some("manual")
        {
            gaps.push(
                ConversionGap::new(
                    "ci",
                    GapSeverity::Warning,
                    format!("{}:when:manual", job.name),
                    "Manual jobs become regular jobs",
                )
                .with_recommendation("Consider a workflow_dispatch trigger"),
            );
        }

        // Steps: checkout, then before_script + script as one run block.
        let mut steps = Vec::new();
        let mut checkout = Mapping::new();
        checkout.insert(Value::from("uses"), Value::from("actions/checkout@v4"));
        steps.push(Value::Mapping(checkout));

        let mut script_lines = Vec::new();
        match job.config.get("before_script") {
            Some(before) => script_lines.extend(as_string_list(before)),
            None => script_lines.extend(global_before.clone()),
        }
        script_lines.extend(
            job.config
                .get("script")
                .map(as_string_list)
                .unwrap_or_default(),
        );
        if !script_lines.is_empty() {
            let rewritten: Vec<String> = script_lines
                .iter()
                .map(|line| rewrite_registry_urls(line, github_repo))
                .collect();
            let mut run = Mapping::new();
            run.insert(Value::from("run"), Value::from(rewritten.join("\n")));
            steps.push(Value::Mapping(run));
        }

        if let Some(after) = job.config.get("after_script") {
            let lines = as_string_list(after);
            if !lines.is_empty() {
                let mut step = Mapping::new();
                step.insert(Value::from("if"), Value::from("always()"));
                step.insert(Value::from("run"), Value::from(lines.join("\n")));
                steps.push(Value::Mapping(step));
            }
        }

        out.insert(Value::from("steps"), Value::Sequence(steps));
        workflow_jobs.insert(
            Value::from(sanitize_job_id(&job.name)),
            Value::Mapping(out),
        );
    }

    // Workflow skeleton.
    let mut on = Mapping::new();
    let mut push = Mapping::new();
    push.insert(
        Value::from("branches"),
        Value::Sequence(vec![Value::from(default_branch)]),
    );
    on.insert(Value::from("push"), Value::Mapping(push));
    on.insert(Value::from("pull_request"), Value::Mapping(Mapping::new()));

    let mut workflow = Mapping::new();
    workflow.insert(Value::from("name"), Value::from("CI"));
    workflow.insert(Value::from("on"), Value::Mapping(on));
    if let Some(variables) = root.get("variables") {
        if let Some(mapping) = variables.as_mapping() {
            let rewritten: Mapping = mapping
                .iter()
                .map(|(k, v)| {
                    let value = match v.as_str() {
                        Some(s) => Value::from(rewrite_registry_urls(s, github_repo)),
                        None => v.clone(),
                    };
                    (k.clone(), value)
                })
                .collect();
            workflow.insert(Value::from("env"), Value::Mapping(rewritten));
        }
    }
    workflow.insert(Value::from("jobs"), Value::Mapping(workflow_jobs));

    let workflow_yaml = serde_yaml::to_string(&Value::Mapping(workflow))
        .map_err(|e| MigrationError::unknown("workflow serialization", e.to_string()))?;

    Ok(CiConversion {
        workflow_yaml,
        job_names,
        gaps,
    })
}

/// Workflow job ids allow only `[A-Za-z0-9_-]`.
fn sanitize_job_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CI: &str = r#"
stages:
  - build
  - test
  - deploy

variables:
  DOCKER_IMAGE: $CI_REGISTRY_IMAGE:latest

before_script:
  - echo global

.test_template:
  script:
    - pytest

build:
  stage: build
  image: python:3.9
  script:
    - pip install -r requirements.txt
  only:
    - branches

unit-tests:
  stage: test
  extends: .test_template
  needs:
    - build

deploy-production:
  stage: deploy
  script:
    - ./deploy.sh production
  environment:
    name: production
  when: manual
"#;

    #[test]
    fn test_job_names_ordered_by_stage() {
        let conversion = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        assert_eq!(
            conversion.job_names,
            vec!["build", "unit-tests", "deploy-production"]
        );
    }

    #[test]
    fn test_extends_template_is_flattened() {
        let conversion = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        let workflow: Value = serde_yaml::from_str(&conversion.workflow_yaml).unwrap();
        let run = workflow["jobs"]["unit-tests"]["steps"][1]["run"]
            .as_str()
            .unwrap();
        assert!(run.contains("pytest"));
        // Global before_script applies when the job has none of its own.
        assert!(run.contains("echo global"));
    }

    #[test]
    fn test_implicit_needs_from_previous_stage() {
        let conversion = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        let workflow: Value = serde_yaml::from_str(&conversion.workflow_yaml).unwrap();
        let needs = workflow["jobs"]["deploy-production"]["needs"]
            .as_sequence()
            .unwrap();
        assert_eq!(needs[0].as_str().unwrap(), "unit-tests");
    }

    #[test]
    fn test_registry_variable_rewritten() {
        let conversion = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        let workflow: Value = serde_yaml::from_str(&conversion.workflow_yaml).unwrap();
        assert_eq!(
            workflow["env"]["DOCKER_IMAGE"].as_str().unwrap(),
            "ghcr.io/acme/widget:latest"
        );
    }

    #[test]
    fn test_registry_literal_rewrite() {
        let rewritten = rewrite_registry_urls(
            "docker pull registry.gitlab.com/group/widget:v1",
            "acme/widget",
        );
        assert_eq!(rewritten, "docker pull ghcr.io/acme/widget:v1");
    }

    #[test]
    fn test_gaps_for_templates_only_and_manual() {
        let conversion = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        let features: Vec<&str> = conversion.gaps.iter().map(|g| g.feature.as_str()).collect();
        assert!(features.contains(&".test_template"));
        assert!(features.contains(&"build:only/except"));
        assert!(features.contains(&"deploy-production:when:manual"));
    }

    #[test]
    fn test_include_is_critical_gap() {
        let yaml = "include:\n  - remote: https://example.com/ci.yml\nbuild:\n  script:\n    - make\n";
        let conversion = convert_ci(yaml, "acme/widget", "main").unwrap();
        assert!(conversion
            .gaps
            .iter()
            .any(|g| g.feature == "include" && g.severity == GapSeverity::Critical));
    }

    #[test]
    fn test_environment_mapped() {
        let conversion = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        let workflow: Value = serde_yaml::from_str(&conversion.workflow_yaml).unwrap();
        assert_eq!(
            workflow["jobs"]["deploy-production"]["environment"]
                .as_str()
                .unwrap(),
            "production"
        );
    }

    #[test]
    fn test_invalid_yaml_is_validation_error() {
        let err = convert_ci("build: [unclosed", "a/b", "main").unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn test_non_mapping_root_is_validation_error() {
        let err = convert_ci("- a\n- b\n", "a/b", "main").unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn test_deterministic_output() {
        let a = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        let b = convert_ci(SAMPLE_CI, "acme/widget", "main").unwrap();
        assert_eq!(a.workflow_yaml, b.workflow_yaml);
    }
}
