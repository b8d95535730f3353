//! GitLab → GitHub user mapping.
//!
//! Matching ladder, in priority order: email equality (high confidence),
//! case-insensitive username equality (medium), normalized full-name
//! equality (low), token-overlap fuzzy similarity above a threshold (low).
//! Users that survive every rung are reported unmapped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const FUZZY_THRESHOLD: f64 = 0.8;

/// A source-forge user to map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// A destination org member to match against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestUser {
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Email,
    Username,
    Name,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMapping {
    pub source_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_login: Option<String>,
    pub confidence: Confidence,
    pub method: MatchMethod,
    pub is_manual: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingStats {
    pub total: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub by_method: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMappingResult {
    pub mappings: Vec<UserMapping>,
    pub stats: MappingStats,
    pub unmapped_users: Vec<String>,
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-overlap similarity between two identifiers (Jaccard over
/// lowercase word/segment tokens).
fn token_similarity(a: &str, b: &str) -> f64 {
    let tokenize = |s: &str| -> Vec<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    };
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.iter().filter(|t| tokens_b.contains(t)).count();
    let union = tokens_a.len() + tokens_b.len() - intersection;
    intersection as f64 / union as f64
}

/// Map every source user against the destination members.
pub fn map_users(source_users: &[SourceUser], dest_users: &[DestUser]) -> UserMappingResult {
    let mut mappings = Vec::with_capacity(source_users.len());
    let mut unmapped_users = Vec::new();
    let mut by_method: BTreeMap<String, usize> = BTreeMap::new();

    for source in source_users {
        let matched = match_one(source, dest_users);
        let (login, confidence, method) = matched;

        let method_key = format!("{method:?}").to_lowercase();
        *by_method.entry(method_key).or_default() += 1;

        if login.is_none() {
            unmapped_users.push(source.username.clone());
        }

        mappings.push(UserMapping {
            source_username: source.username.clone(),
            source_email: source.email.clone(),
            destination_login: login,
            confidence,
            method,
            is_manual: false,
        });
    }

    let mapped = mappings
        .iter()
        .filter(|m| m.destination_login.is_some())
        .count();
    let stats = MappingStats {
        total: mappings.len(),
        mapped,
        unmapped: mappings.len() - mapped,
        by_method,
    };

    UserMappingResult {
        mappings,
        stats,
        unmapped_users,
    }
}

fn match_one(
    source: &SourceUser,
    dest_users: &[DestUser],
) -> (Option<String>, Confidence, MatchMethod) {
    // 1. Email equality.
    if let Some(email) = &source.email {
        let email_lower = email.to_lowercase();
        if let Some(dest) = dest_users.iter().find(|d| {
            d.email
                .as_ref()
                .map(|e| e.to_lowercase() == email_lower)
                .unwrap_or(false)
        }) {
            return (Some(dest.login.clone()), Confidence::High, MatchMethod::Email);
        }
    }

    // 2. Case-insensitive username equality.
    let username_lower = source.username.to_lowercase();
    if let Some(dest) = dest_users
        .iter()
        .find(|d| d.login.to_lowercase() == username_lower)
    {
        return (
            Some(dest.login.clone()),
            Confidence::Medium,
            MatchMethod::Username,
        );
    }

    // 3. Normalized full-name equality.
    let name_normalized = normalize_name(&source.name);
    if !name_normalized.is_empty() {
        if let Some(dest) = dest_users.iter().find(|d| {
            d.name
                .as_ref()
                .map(|n| normalize_name(n) == name_normalized)
                .unwrap_or(false)
        }) {
            return (Some(dest.login.clone()), Confidence::Low, MatchMethod::Name);
        }
    }

    // 4. Fuzzy token similarity on username or name.
    let mut best: Option<(&DestUser, f64)> = None;
    for dest in dest_users {
        let score = token_similarity(&source.username, &dest.login)
            .max(token_similarity(&source.name, dest.name.as_deref().unwrap_or("")));
        if score >= FUZZY_THRESHOLD && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((dest, score));
        }
    }
    if let Some((dest, _)) = best {
        return (Some(dest.login.clone()), Confidence::Low, MatchMethod::Fuzzy);
    }

    (None, Confidence::Unmapped, MatchMethod::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(username: &str, email: &str, name: &str) -> SourceUser {
        SourceUser {
            username: username.into(),
            email: (!email.is_empty()).then(|| email.into()),
            name: name.into(),
        }
    }

    fn dest(login: &str, email: &str, name: &str) -> DestUser {
        DestUser {
            login: login.into(),
            email: (!email.is_empty()).then(|| email.into()),
            name: (!name.is_empty()).then(|| name.into()),
        }
    }

    #[test]
    fn test_email_match_high_confidence() {
        let result = map_users(
            &[source("johndoe", "john@example.com", "John Doe")],
            &[dest("jdoe-gh", "john@example.com", "John Doe")],
        );
        let mapping = &result.mappings[0];
        assert_eq!(mapping.confidence, Confidence::High);
        assert_eq!(mapping.method, MatchMethod::Email);
        assert_eq!(mapping.destination_login.as_deref(), Some("jdoe-gh"));
    }

    #[test]
    fn test_username_match_medium_confidence() {
        let result = map_users(
            &[source("JohnDoe", "a@x.com", "John")],
            &[dest("johndoe", "b@y.com", "John")],
        );
        let mapping = &result.mappings[0];
        assert_eq!(mapping.confidence, Confidence::Medium);
        assert_eq!(mapping.method, MatchMethod::Username);
    }

    #[test]
    fn test_name_match_low_confidence() {
        let result = map_users(
            &[source("jdoe", "jd@x.com", "John  Doe")],
            &[dest("john-doe", "j@y.com", "john doe")],
        );
        let mapping = &result.mappings[0];
        assert_eq!(mapping.confidence, Confidence::Low);
        assert_eq!(mapping.method, MatchMethod::Name);
    }

    #[test]
    fn test_fuzzy_match_on_username_tokens() {
        let result = map_users(
            &[source("alice.smith", "", "")],
            &[dest("alice-smith", "", "")],
        );
        let mapping = &result.mappings[0];
        assert_eq!(mapping.method, MatchMethod::Fuzzy);
        assert_eq!(mapping.confidence, Confidence::Low);
    }

    #[test]
    fn test_no_match_unmapped_with_stats() {
        let result = map_users(
            &[source("olduser", "old@x.com", "Old User")],
            &[dest("newuser", "new@y.com", "New Person")],
        );
        let mapping = &result.mappings[0];
        assert_eq!(mapping.confidence, Confidence::Unmapped);
        assert_eq!(mapping.method, MatchMethod::None);
        assert!(mapping.destination_login.is_none());
        assert_eq!(result.unmapped_users, vec!["olduser"]);
        assert_eq!(result.stats.unmapped, 1);
        assert_eq!(result.stats.mapped, 0);
    }

    #[test]
    fn test_email_wins_over_username() {
        // Email points to one member, username to another; email wins.
        let result = map_users(
            &[source("shared", "target@x.com", "Someone")],
            &[
                dest("shared", "other@x.com", "Other"),
                dest("real-target", "target@x.com", "Target"),
            ],
        );
        assert_eq!(
            result.mappings[0].destination_login.as_deref(),
            Some("real-target")
        );
        assert_eq!(result.mappings[0].method, MatchMethod::Email);
    }

    #[test]
    fn test_stats_by_method() {
        let result = map_users(
            &[
                source("a", "a@x.com", "A"),
                source("b", "", "B"),
                source("ghost", "", ""),
            ],
            &[dest("a", "a@x.com", "A"), dest("b", "", "")],
        );
        assert_eq!(result.stats.total, 3);
        assert_eq!(result.stats.by_method["email"], 1);
        assert_eq!(result.stats.by_method["username"], 1);
        assert_eq!(result.stats.by_method["none"], 1);
    }
}
