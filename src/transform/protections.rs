//! Branch and tag protection conversion.
//!
//! Emits destination-shaped branch-protection settings, tag protection
//! patterns, and a CODEOWNERS file when approval rules name specific
//! users. Access-level mechanics that do not map (per-user push
//! restrictions, unprotect levels) become conversion gaps.

use crate::github::models::{BranchProtection, RequiredReviews, RequiredStatusChecks};
use crate::gitlab::models::{Member, ProtectedBranch, ProtectedTag};
use crate::transform::gaps::{ConversionGap, GapSeverity};
use serde::{Deserialize, Serialize};

/// A protection rule for one branch in destination shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedProtection {
    pub branch: String,
    #[serde(flatten)]
    pub settings: BranchProtection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedTagProtection {
    pub pattern: String,
}

#[derive(Debug, Default)]
pub struct ProtectionConversion {
    pub branch_protections: Vec<TransformedProtection>,
    pub tag_protections: Vec<TransformedTagProtection>,
    pub codeowners: Option<String>,
    pub gaps: Vec<ConversionGap>,
}

/// Convert protected branches and tags.
///
/// `ci_jobs` feeds the required status-check contexts; `members` with
/// maintainer access (40+) become CODEOWNERS when code-owner approval is
/// required anywhere.
pub fn transform_protections(
    protected_branches: &[ProtectedBranch],
    protected_tags: &[ProtectedTag],
    members: &[Member],
    ci_jobs: &[String],
) -> ProtectionConversion {
    let mut conversion = ProtectionConversion::default();

    for branch in protected_branches {
        let required_reviews = RequiredReviews {
            required_approving_review_count: branch.approvals_before_merge.unwrap_or(1),
            require_code_owner_reviews: branch.code_owner_approval_required,
            dismiss_stale_reviews: false,
        };

        let required_status_checks = (!ci_jobs.is_empty()).then(|| RequiredStatusChecks {
            strict: true,
            contexts: ci_jobs.to_vec(),
        });

        conversion.branch_protections.push(TransformedProtection {
            branch: branch.name.clone(),
            settings: BranchProtection {
                required_status_checks,
                enforce_admins: true,
                required_pull_request_reviews: Some(required_reviews),
                restrictions: None,
                allow_force_pushes: branch.allow_force_push,
                allow_deletions: false,
            },
        });

        // Per-user push access does not translate to destination
        // protection; GitHub restricts by collaborator/team instead.
        if branch
            .push_access_levels
            .iter()
            .any(|level| level.user_id.is_some() || level.group_id.is_some())
        {
            conversion.gaps.push(
                ConversionGap::new(
                    "protection",
                    GapSeverity::Warning,
                    format!("{}:push_access_levels", branch.name),
                    "Per-user/group push restrictions are not converted",
                )
                .with_recommendation(
                    "Recreate push restrictions with GitHub teams after migration",
                ),
            );
        }
        if !branch.unprotect_access_levels.is_empty() {
            conversion.gaps.push(ConversionGap::new(
                "protection",
                GapSeverity::Info,
                format!("{}:unprotect_access_levels", branch.name),
                "Unprotect access levels have no GitHub equivalent",
            ));
        }
    }

    for tag in protected_tags {
        conversion.tag_protections.push(TransformedTagProtection {
            pattern: tag.name.clone(),
        });
    }
    if !protected_tags.is_empty() {
        conversion.gaps.push(
            ConversionGap::new(
                "protection",
                GapSeverity::Warning,
                "protected_tags",
                "Tag protection requires a GitHub plan with tag protection rules",
            )
            .with_recommendation("Verify tag protection is available on the target plan"),
        );
    }

    // CODEOWNERS: maintainers own everything when any branch requires
    // code-owner review.
    let needs_codeowners = protected_branches
        .iter()
        .any(|b| b.code_owner_approval_required);
    if needs_codeowners {
        let owners: Vec<String> = members
            .iter()
            .filter(|m| m.access_level >= 40)
            .map(|m| format!("@{}", m.username))
            .collect();
        if owners.is_empty() {
            conversion.gaps.push(ConversionGap::new(
                "protection",
                GapSeverity::Warning,
                "codeowners",
                "Code-owner review required but no maintainers found to own the tree",
            ));
        } else {
            conversion.codeowners = Some(format!(
                "# Generated from GitLab approval configuration\n* {}\n",
                owners.join(" ")
            ));
        }
    }

    conversion
}
