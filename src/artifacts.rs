//! Artifact tree layout and file helpers.
//!
//! The on-disk layout under the artifact root is contractual: downstream
//! tools read these files by relative path. All JSON writes go through an
//! atomic replace (write to a sibling temp file, then rename) so a crash
//! mid-write never leaves a torn artifact.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Stage subdirectories under the artifact root.
pub const DISCOVERY_DIR: &str = "discovery";
pub const EXPORT_DIR: &str = "export";
pub const TRANSFORM_DIR: &str = "transform";
pub const PLAN_DIR: &str = "plan";
pub const APPLY_DIR: &str = "apply";
pub const VERIFY_DIR: &str = "verify";

/// Paths into one run's artifact tree.
#[derive(Debug, Clone)]
pub struct ArtifactTree {
    root: PathBuf,
}

impl ArtifactTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.root.join(stage)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.stage_dir(EXPORT_DIR)
    }

    pub fn transform_dir(&self) -> PathBuf {
        self.stage_dir(TRANSFORM_DIR)
    }

    pub fn plan_dir(&self) -> PathBuf {
        self.stage_dir(PLAN_DIR)
    }

    pub fn apply_dir(&self) -> PathBuf {
        self.stage_dir(APPLY_DIR)
    }

    pub fn verify_dir(&self) -> PathBuf {
        self.stage_dir(VERIFY_DIR)
    }

    pub fn discovery_dir(&self) -> PathBuf {
        self.stage_dir(DISCOVERY_DIR)
    }
}

/// Serialize `data` as pretty JSON and atomically replace `path`.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data).context("Failed to serialize artifact")?;
    write_atomic(path, &json)
}

/// Read and deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse artifact {}", path.display()))
}

/// Write bytes to `path` via a temp-file-and-rename so concurrent readers
/// and crashes never observe a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Artifact path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let temp_path = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp_path, bytes)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Write a text artifact (markdown reports, sentinel files).
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    write_atomic(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_and_read_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        let data = json!({"status": "success", "count": 3});
        write_json(&path, &data).unwrap();

        let read: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(read["status"], "success");
        assert_eq!(read["count"], 3);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write_json(&path, &json!({"ok": true})).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["manifest.json"]);
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json(&path, &json!({"v": 1})).unwrap();
        write_json(&path, &json!({"v": 2})).unwrap();

        let read: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(read["v"], 2);
    }

    #[test]
    fn test_tree_stage_dirs() {
        let tree = ArtifactTree::new("/tmp/run-7");
        assert_eq!(tree.export_dir(), PathBuf::from("/tmp/run-7/export"));
        assert_eq!(tree.plan_dir(), PathBuf::from("/tmp/run-7/plan"));
    }
}
