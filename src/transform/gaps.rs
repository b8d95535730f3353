//! Conversion gap collection and reporting.
//!
//! A gap is a source-forge construct with no (or only partial) destination
//! equivalent. Gaps are surfaced in a JSON artifact and a human-readable
//! markdown report, never silently dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionGap {
    /// Area the gap belongs to (ci, protection, webhook, users, feature).
    pub category: String,
    pub severity: GapSeverity,
    /// The source construct that does not round-trip.
    pub feature: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ConversionGap {
    pub fn new(
        category: &str,
        severity: GapSeverity,
        feature: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            category: category.to_string(),
            severity,
            feature: feature.into(),
            detail: detail.into(),
            recommendation: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Aggregated gap analysis across all transformers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub gaps: Vec<ConversionGap>,
    pub summary: GapSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapSummary {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

/// Union every transformer's gaps plus source-only features, and compute
/// the summary.
pub fn analyze(mut gaps: Vec<ConversionGap>, source_only_features: &[String]) -> GapAnalysis {
    for feature in source_only_features {
        gaps.push(
            ConversionGap::new(
                "feature",
                GapSeverity::Warning,
                feature.clone(),
                format!("GitLab feature '{feature}' has no GitHub equivalent"),
            )
            .with_recommendation("Review whether this feature is still needed after migration"),
        );
    }

    let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for gap in &gaps {
        let severity = format!("{:?}", gap.severity).to_lowercase();
        *by_severity.entry(severity).or_default() += 1;
        *by_category.entry(gap.category.clone()).or_default() += 1;
    }

    GapAnalysis {
        summary: GapSummary {
            total: gaps.len(),
            by_severity,
            by_category,
        },
        gaps,
    }
}

/// Render the markdown gap report.
pub fn render_report(analysis: &GapAnalysis) -> String {
    let mut lines = vec![
        "# Conversion Gap Report".to_string(),
        String::new(),
        format!("Total gaps: {}", analysis.summary.total),
        String::new(),
    ];

    if analysis.gaps.is_empty() {
        lines.push("No conversion gaps detected.".to_string());
        return lines.join("\n");
    }

    for (category, count) in &analysis.summary.by_category {
        lines.push(format!("- **{category}**: {count}"));
    }
    lines.push(String::new());

    for severity in [GapSeverity::Critical, GapSeverity::Warning, GapSeverity::Info] {
        let matching: Vec<_> = analysis
            .gaps
            .iter()
            .filter(|g| g.severity == severity)
            .collect();
        if matching.is_empty() {
            continue;
        }
        lines.push(format!("## {severity:?}"));
        lines.push(String::new());
        for gap in matching {
            lines.push(format!("- `{}`: {}", gap.feature, gap.detail));
            if let Some(recommendation) = &gap.recommendation {
                lines.push(format!("  - Recommendation: {recommendation}"));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_counts_by_severity_and_category() {
        let gaps = vec![
            ConversionGap::new("ci", GapSeverity::Warning, "include", "not supported"),
            ConversionGap::new("ci", GapSeverity::Info, "cache", "partially supported"),
            ConversionGap::new("protection", GapSeverity::Critical, "push_levels", "no map"),
        ];
        let analysis = analyze(gaps, &["epics".to_string()]);

        assert_eq!(analysis.summary.total, 4);
        assert_eq!(analysis.summary.by_category["ci"], 2);
        assert_eq!(analysis.summary.by_category["feature"], 1);
        assert_eq!(analysis.summary.by_severity["warning"], 2);
    }

    #[test]
    fn test_report_lists_gaps_by_severity() {
        let analysis = analyze(
            vec![ConversionGap::new(
                "ci",
                GapSeverity::Critical,
                "include:remote",
                "remote includes cannot be resolved",
            )
            .with_recommendation("Inline the included file")],
            &[],
        );
        let report = render_report(&analysis);
        assert!(report.contains("## Critical"));
        assert!(report.contains("include:remote"));
        assert!(report.contains("Inline the included file"));
    }

    #[test]
    fn test_empty_report() {
        let report = render_report(&analyze(vec![], &[]));
        assert!(report.contains("No conversion gaps"));
    }
}
