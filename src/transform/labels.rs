//! Label and milestone conversion.

use crate::gitlab::models::{Label, Milestone};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedLabel {
    pub name: String,
    /// Hex color without the leading `#`.
    pub color: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedMilestone {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
    pub state: String,
}

/// Sanitize labels: the destination rejects `#`-prefixed colors.
pub fn transform_labels(labels: &[Label]) -> Vec<TransformedLabel> {
    labels
        .iter()
        .map(|label| TransformedLabel {
            name: label.name.clone(),
            color: label
                .color
                .trim_start_matches('#')
                .to_lowercase()
                .chars()
                .take(6)
                .collect(),
            description: label.description.clone().unwrap_or_default(),
        })
        .collect()
}

/// Map milestone states: `active` stays open, everything else closes.
pub fn transform_milestones(milestones: &[Milestone]) -> Vec<TransformedMilestone> {
    milestones
        .iter()
        .map(|milestone| TransformedMilestone {
            title: milestone.title.clone(),
            description: milestone.description.clone().unwrap_or_default(),
            due_on: milestone.due_date.clone(),
            state: if milestone.state == "active" {
                "open".into()
            } else {
                "closed".into()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_color_stripped() {
        let labels = transform_labels(&[Label {
            name: "bug".into(),
            color: "#FF0000".into(),
            description: None,
        }]);
        assert_eq!(labels[0].color, "ff0000");
        assert_eq!(labels[0].description, "");
    }

    #[test]
    fn test_label_color_without_hash_unchanged() {
        let labels = transform_labels(&[Label {
            name: "x".into(),
            color: "00ff00".into(),
            description: Some("green".into()),
        }]);
        assert_eq!(labels[0].color, "00ff00");
    }

    #[test]
    fn test_milestone_state_mapping() {
        let milestones = transform_milestones(&[
            Milestone {
                title: "v1".into(),
                state: "active".into(),
                due_date: Some("2026-01-01".into()),
                ..Default::default()
            },
            Milestone {
                title: "v0".into(),
                state: "closed".into(),
                ..Default::default()
            },
        ]);
        assert_eq!(milestones[0].state, "open");
        assert_eq!(milestones[0].due_on.as_deref(), Some("2026-01-01"));
        assert_eq!(milestones[1].state, "closed");
    }
}
