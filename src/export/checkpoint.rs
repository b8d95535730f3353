//! File-backed export checkpoint.
//!
//! Tracks per-component progress so a crashed or cancelled export resumes
//! where it stopped: completed components are skipped entirely, a
//! started-but-unfinished component resumes strictly after its last
//! processed item id. Every mutation is flushed with an atomic replace so
//! mid-run termination never corrupts the file.

use crate::artifacts::{read_json, write_json};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Pending,
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: ComponentState,
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub last_item_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for CheckpointEntry {
    fn default() -> Self {
        Self {
            status: ComponentState::Pending,
            processed_count: 0,
            last_item_id: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
    components: BTreeMap<String, CheckpointEntry>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Progress summary exposed to the export stage and manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub total_components: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

pub struct ExportCheckpoint {
    path: PathBuf,
    state: CheckpointFile,
}

impl ExportCheckpoint {
    /// Open (or create) the checkpoint file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            read_json(&path)?
        } else {
            CheckpointFile::default()
        };
        Ok(Self { path, state })
    }

    fn persist(&self) -> Result<()> {
        write_json(&self.path, &self.state)
    }

    fn entry_mut(&mut self, component: &str) -> &mut CheckpointEntry {
        self.state
            .components
            .entry(component.to_string())
            .or_default()
    }

    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        self.state.metadata.insert(key.to_string(), value);
        self.persist()
    }

    pub fn mark_started(&mut self, component: &str) -> Result<()> {
        let entry = self.entry_mut(component);
        if entry.status != ComponentState::Completed {
            entry.status = ComponentState::Started;
        }
        self.persist()
    }

    /// Record progress within a component. `last_item_id` is monotonic:
    /// a stale id (from out-of-order updates) never rewinds the cursor.
    pub fn update_progress(
        &mut self,
        component: &str,
        processed_count: u64,
        last_item_id: u64,
    ) -> Result<()> {
        let entry = self.entry_mut(component);
        entry.processed_count = entry.processed_count.max(processed_count);
        entry.last_item_id = Some(entry.last_item_id.map_or(last_item_id, |prev| {
            prev.max(last_item_id)
        }));
        self.persist()
    }

    pub fn mark_completed(
        &mut self,
        component: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<()> {
        let entry = self.entry_mut(component);
        entry.status = if success {
            ComponentState::Completed
        } else {
            ComponentState::Failed
        };
        entry.error = error;
        self.persist()
    }

    pub fn is_completed(&self, component: &str) -> bool {
        self.state
            .components
            .get(component)
            .map(|e| e.status == ComponentState::Completed)
            .unwrap_or(false)
    }

    /// Whether a resumed run should skip already-processed items in this
    /// component (it was started but never completed).
    pub fn should_resume(&self, component: &str) -> bool {
        self.state
            .components
            .get(component)
            .map(|e| e.status == ComponentState::Started && e.last_item_id.is_some())
            .unwrap_or(false)
    }

    pub fn last_processed_item(&self, component: &str) -> Option<u64> {
        self.state
            .components
            .get(component)
            .and_then(|e| e.last_item_id)
    }

    pub fn entry(&self, component: &str) -> Option<&CheckpointEntry> {
        self.state.components.get(component)
    }

    pub fn summary(&self) -> CheckpointSummary {
        let entries = self.state.components.values();
        let completed = entries
            .clone()
            .filter(|e| e.status == ComponentState::Completed)
            .count();
        let failed = entries
            .clone()
            .filter(|e| e.status == ComponentState::Failed)
            .count();
        let total = self.state.components.len();
        CheckpointSummary {
            total_components: total,
            completed,
            failed,
            pending: total - completed - failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checkpoint_has_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = ExportCheckpoint::open(dir.path().join(".export_checkpoint.json")).unwrap();
        assert!(!checkpoint.is_completed("issues"));
        assert!(!checkpoint.should_resume("issues"));
        assert_eq!(checkpoint.summary().total_components, 0);
    }

    #[test]
    fn test_progress_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".export_checkpoint.json");

        {
            let mut checkpoint = ExportCheckpoint::open(&path).unwrap();
            checkpoint.mark_started("issues").unwrap();
            checkpoint.update_progress("issues", 10, 17).unwrap();
        }

        let checkpoint = ExportCheckpoint::open(&path).unwrap();
        assert!(checkpoint.should_resume("issues"));
        assert_eq!(checkpoint.last_processed_item("issues"), Some(17));
        assert_eq!(checkpoint.entry("issues").unwrap().processed_count, 10);
    }

    #[test]
    fn test_last_item_id_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint =
            ExportCheckpoint::open(dir.path().join(".cp.json")).unwrap();
        checkpoint.mark_started("issues").unwrap();
        checkpoint.update_progress("issues", 10, 30).unwrap();
        checkpoint.update_progress("issues", 5, 12).unwrap();
        assert_eq!(checkpoint.last_processed_item("issues"), Some(30));
    }

    #[test]
    fn test_completed_component_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint =
            ExportCheckpoint::open(dir.path().join(".cp.json")).unwrap();
        checkpoint.mark_started("wiki").unwrap();
        checkpoint.mark_completed("wiki", true, None).unwrap();
        assert!(checkpoint.is_completed("wiki"));
        assert!(!checkpoint.should_resume("wiki"));
    }

    #[test]
    fn test_failed_component_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint =
            ExportCheckpoint::open(dir.path().join(".cp.json")).unwrap();
        checkpoint.mark_started("releases").unwrap();
        checkpoint
            .mark_completed("releases", false, Some("asset download failed".into()))
            .unwrap();

        let summary = checkpoint.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(
            checkpoint.entry("releases").unwrap().error.as_deref(),
            Some("asset download failed")
        );
    }

    #[test]
    fn test_restart_does_not_demote_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint =
            ExportCheckpoint::open(dir.path().join(".cp.json")).unwrap();
        checkpoint.mark_started("ci").unwrap();
        checkpoint.mark_completed("ci", true, None).unwrap();
        checkpoint.mark_started("ci").unwrap();
        assert!(checkpoint.is_completed("ci"));
    }
}
