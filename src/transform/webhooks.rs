//! Webhook event translation.
//!
//! Table-driven mapping from source webhook event flags to destination
//! event names. Flags with no destination mapping are recorded in
//! `unmapped_events` and surfaced as gaps; a webhook whose mapped event
//! set comes out empty defaults to `["push"]` with a warning. Secrets are
//! always blank; the source API never returns them.

use crate::gitlab::models::Webhook;
use crate::transform::gaps::{ConversionGap, GapSeverity};
use serde::{Deserialize, Serialize};

/// `(source flag name, accessor, destination events)`.
///
/// `note` fans out to both comment events; `pipeline` to both workflow
/// events.
const EVENT_TABLE: [(&str, fn(&Webhook) -> bool, &[&str]); 9] = [
    ("push_events", |w| w.push_events, &["push"]),
    ("tag_push_events", |w| w.tag_push_events, &["create"]),
    ("issues_events", |w| w.issues_events, &["issues"]),
    (
        "merge_requests_events",
        |w| w.merge_requests_events,
        &["pull_request"],
    ),
    (
        "note_events",
        |w| w.note_events,
        &["issue_comment", "pull_request_review_comment"],
    ),
    (
        "pipeline_events",
        |w| w.pipeline_events,
        &["workflow_run", "check_suite"],
    ),
    ("wiki_page_events", |w| w.wiki_page_events, &["gollum"]),
    ("deployment_events", |w| w.deployment_events, &["deployment"]),
    ("releases_events", |w| w.releases_events, &["release"]),
];

/// Source flags that have no destination mapping at all.
const UNMAPPABLE_FLAGS: [(&str, fn(&Webhook) -> bool); 2] = [
    (
        "confidential_issues_events",
        |w| w.confidential_issues_events,
    ),
    ("repository_update_events", |w| w.repository_update_events),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedWebhook {
    pub url: String,
    pub content_type: String,
    pub events: Vec<String>,
    pub active: bool,
    pub insecure_ssl: bool,
    /// Secrets are not retrievable from the source; always empty.
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmapped_events: Vec<String>,
}

#[derive(Debug, Default)]
pub struct WebhookConversion {
    pub webhooks: Vec<TransformedWebhook>,
    pub gaps: Vec<ConversionGap>,
    pub warnings: Vec<String>,
}

pub fn transform_webhooks(webhooks: &[Webhook]) -> WebhookConversion {
    let mut conversion = WebhookConversion::default();

    for hook in webhooks {
        let mut events: Vec<String> = Vec::new();
        for (_, enabled, targets) in EVENT_TABLE {
            if enabled(hook) {
                for target in targets {
                    if !events.iter().any(|e| e == target) {
                        events.push(target.to_string());
                    }
                }
            }
        }

        let mut unmapped = Vec::new();
        for (flag, enabled) in UNMAPPABLE_FLAGS {
            if enabled(hook) {
                unmapped.push(flag.to_string());
                conversion.gaps.push(ConversionGap::new(
                    "webhook",
                    GapSeverity::Warning,
                    flag,
                    format!("Webhook {} uses '{flag}' which has no GitHub event", hook.url),
                ));
            }
        }
        if !unmapped.is_empty() {
            conversion.warnings.push(format!(
                "Webhook {} has unmapped events: {}",
                hook.url,
                unmapped.join(", ")
            ));
        }

        if events.is_empty() {
            events.push("push".to_string());
            conversion.warnings.push(format!(
                "Webhook {} had no mappable events, defaulting to [push]",
                hook.url
            ));
        }

        conversion.webhooks.push(TransformedWebhook {
            url: hook.url.clone(),
            content_type: "json".into(),
            events,
            active: true,
            insecure_ssl: !hook.enable_ssl_verification,
            secret: None,
            unmapped_events: unmapped,
        });
    }

    conversion
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook() -> Webhook {
        Webhook {
            id: 1,
            url: "https://example.com/webhook".into(),
            enable_ssl_verification: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_basic_push_webhook() {
        let mut source = hook();
        source.push_events = true;
        let conversion = transform_webhooks(&[source]);
        let webhook = &conversion.webhooks[0];
        assert_eq!(webhook.events, vec!["push"]);
        assert!(webhook.active);
        assert!(!webhook.insecure_ssl);
        assert!(webhook.secret.is_none());
    }

    #[test]
    fn test_multiple_events_mapped() {
        let mut source = hook();
        source.push_events = true;
        source.tag_push_events = true;
        source.merge_requests_events = true;
        source.issues_events = true;
        source.wiki_page_events = true;
        let conversion = transform_webhooks(&[source]);
        let events = &conversion.webhooks[0].events;
        for expected in ["push", "create", "pull_request", "issues", "gollum"] {
            assert!(events.iter().any(|e| e == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_note_events_fan_out() {
        let mut source = hook();
        source.note_events = true;
        let conversion = transform_webhooks(&[source]);
        let events = &conversion.webhooks[0].events;
        assert!(events.iter().any(|e| e == "issue_comment"));
        assert!(events.iter().any(|e| e == "pull_request_review_comment"));
    }

    #[test]
    fn test_pipeline_events_fan_out() {
        let mut source = hook();
        source.pipeline_events = true;
        let conversion = transform_webhooks(&[source]);
        let events = &conversion.webhooks[0].events;
        assert!(events.iter().any(|e| e == "workflow_run"));
        assert!(events.iter().any(|e| e == "check_suite"));
    }

    #[test]
    fn test_unmappable_events_recorded_with_warning() {
        let mut source = hook();
        source.push_events = true;
        source.repository_update_events = true;
        let conversion = transform_webhooks(&[source]);
        let webhook = &conversion.webhooks[0];
        assert!(webhook.events.iter().any(|e| e == "push"));
        assert_eq!(webhook.unmapped_events, vec!["repository_update_events"]);
        assert!(!conversion.warnings.is_empty());
        assert!(!conversion.gaps.is_empty());
    }

    #[test]
    fn test_empty_events_default_to_push_with_warning() {
        let conversion = transform_webhooks(&[hook()]);
        assert_eq!(conversion.webhooks[0].events, vec!["push"]);
        assert!(conversion
            .warnings
            .iter()
            .any(|w| w.contains("defaulting to [push]")));
    }

    #[test]
    fn test_ssl_verification_disabled_maps_to_insecure() {
        let mut source = hook();
        source.push_events = true;
        source.enable_ssl_verification = false;
        let conversion = transform_webhooks(&[source]);
        assert!(conversion.webhooks[0].insecure_ssl);
    }
}
