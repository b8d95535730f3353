//! Attachment discovery and download discipline.
//!
//! Issue and merge-request bodies reference uploaded files with
//! `/uploads/<hash>/<name>` paths. Three patterns (markdown images,
//! markdown links, and bare upload paths) are kept separate because each
//! corresponds to a distinct construct and evolves independently.

use crate::error::MigrationError;
use crate::gitlab::GitLabApi;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// GitHub's hard attachment limit.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
/// Warn above this size.
pub const WARN_FILE_SIZE: u64 = 50 * 1024 * 1024;

fn patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Images: ![alt](/uploads/...)
            Regex::new(r"!\[[^\]]*\]\((/uploads/[^)]+)\)").unwrap(),
            // Files: [name](/uploads/...)
            Regex::new(r"\[[^\]]*\]\((/uploads/[^)]+)\)").unwrap(),
            // Bare upload links with a hex hash segment.
            Regex::new(r"(/uploads/[a-fA-F0-9]+/[^\s)]+)").unwrap(),
        ]
    })
}

/// Extract every unique attachment path referenced by `content`.
pub fn extract_attachment_paths(content: &str) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    if content.is_empty() {
        return paths;
    }
    for pattern in patterns() {
        for capture in pattern.captures_iter(content) {
            if let Some(m) = capture.get(1) {
                paths.insert(m.as_str().to_string());
            }
        }
    }
    paths
}

/// Sanitize a filename to `[\w\-.]`, collapsing interior dots so only the
/// extension separator survives.
pub fn sanitize_filename(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^\w\-.]").unwrap());
    let safe = unsafe_chars.replace_all(name, "_").to_string();

    match safe.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.{ext}", stem.replace('.', "_"))
        }
        _ => safe,
    }
}

/// Local filename for an upload path: the hash segment prefixes the
/// sanitized name so distinct uploads of the same filename stay unique.
pub fn local_filename(attachment_path: &str) -> String {
    let parts: Vec<&str> = attachment_path.trim_matches('/').split('/').collect();
    if parts.len() >= 3 {
        // uploads/<hash>/<name>
        let hash = parts[1];
        let name = parts[parts.len() - 1];
        format!("{hash}_{}", sanitize_filename(name))
    } else {
        sanitize_filename(&attachment_path.replace('/', "_"))
    }
}

/// Reject paths that escape the uploads tree.
pub fn is_traversal(attachment_path: &str) -> bool {
    attachment_path.contains("..") || attachment_path.starts_with("/..")
}

/// Result of downloading one batch of attachments.
#[derive(Debug, Default)]
pub struct AttachmentBatch {
    /// `original_path → path relative to the export root`.
    pub mapping: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Download every attachment in `paths` into `dest_dir`, enforcing the
/// traversal, size and filename rules. Failures become warnings; the
/// mapping only contains files that landed on disk.
pub async fn download_attachments(
    gitlab: &dyn GitLabApi,
    base_url: &str,
    project_path: &str,
    paths: &BTreeSet<String>,
    dest_dir: &Path,
    export_root: &Path,
) -> Result<AttachmentBatch, MigrationError> {
    let mut batch = AttachmentBatch::default();

    for attachment_path in paths {
        if is_traversal(attachment_path) {
            batch.warnings.push(format!(
                "Suspicious attachment path rejected: {attachment_path}"
            ));
            continue;
        }

        let url = format!("{base_url}/{project_path}{attachment_path}");
        let filename = local_filename(attachment_path);
        let dest: PathBuf = dest_dir.join(&filename);

        match gitlab.download_file(&url, &dest).await {
            Ok(size) if size > MAX_FILE_SIZE => {
                batch.warnings.push(format!(
                    "Attachment {attachment_path} exceeds the 100 MB limit ({:.1} MB), dropped",
                    size as f64 / 1024.0 / 1024.0
                ));
                let _ = std::fs::remove_file(&dest);
            }
            Ok(size) => {
                if size > WARN_FILE_SIZE {
                    batch.warnings.push(format!(
                        "Large attachment {attachment_path}: {:.1} MB (limit is 100 MB)",
                        size as f64 / 1024.0 / 1024.0
                    ));
                }
                let relative = dest
                    .strip_prefix(export_root)
                    .unwrap_or(&dest)
                    .to_string_lossy()
                    .to_string();
                batch.mapping.insert(attachment_path.clone(), relative);
            }
            Err(e) => {
                batch.warnings.push(format!(
                    "Failed to download attachment {attachment_path}: {}",
                    e.message
                ));
            }
        }
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_image_and_link_patterns() {
        let content = "Here ![shot](/uploads/abcdef1234/screenshot.png) and \
                       [log](/uploads/0011ff/build.log) plus text";
        let paths = extract_attachment_paths(content);
        assert!(paths.contains("/uploads/abcdef1234/screenshot.png"));
        assert!(paths.contains("/uploads/0011ff/build.log"));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_extract_bare_upload_path() {
        let content = "see /uploads/deadbeef01/trace.txt for details";
        let paths = extract_attachment_paths(content);
        assert!(paths.contains("/uploads/deadbeef01/trace.txt"));
    }

    #[test]
    fn test_extract_deduplicates_across_patterns() {
        // The image pattern and the bare pattern both match this path.
        let content = "![x](/uploads/aa11/pic.png)";
        let paths = extract_attachment_paths(content);
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_extract_empty_content() {
        assert!(extract_attachment_paths("").is_empty());
        assert!(extract_attachment_paths("no uploads here").is_empty());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("screenshot.png"), "screenshot.png");
        assert_eq!(sanitize_filename("weird name (1).png"), "weird_name__1_.png");
        assert_eq!(sanitize_filename("a.b.c.tar"), "a_b_c.tar");
        assert_eq!(sanitize_filename("héllo.txt"), "h_llo.txt");
    }

    #[test]
    fn test_local_filename_prefixes_hash() {
        assert_eq!(
            local_filename("/uploads/abcdef1234/screenshot.png"),
            "abcdef1234_screenshot.png"
        );
    }

    #[test]
    fn test_local_filename_only_safe_chars() {
        let name = local_filename("/uploads/aa/../../etc/passwd");
        assert!(name.chars().all(|c| c.is_alphanumeric() || "._-".contains(c)));
    }

    #[test]
    fn test_traversal_detection() {
        assert!(is_traversal("/uploads/../../../etc/passwd"));
        assert!(is_traversal("/../uploads/x/y"));
        assert!(!is_traversal("/uploads/abc123/file.png"));
    }

    #[tokio::test]
    async fn test_download_batch_maps_and_warns() {
        use crate::gitlab::mock::MockGitLab;

        let mock = MockGitLab::new();
        mock.failing_downloads
            .write()
            .await
            .push("https://gl.example/g/p/uploads/bad00/gone.bin".into());

        let dir = tempfile::tempdir().unwrap();
        let export_root = dir.path();
        let dest = export_root.join("issues").join("attachments");

        let mut paths = BTreeSet::new();
        paths.insert("/uploads/abc123/shot.png".to_string());
        paths.insert("/uploads/bad00/gone.bin".to_string());
        paths.insert("/uploads/../../etc/passwd".to_string());

        let batch = download_attachments(
            &mock,
            "https://gl.example",
            "g/p",
            &paths,
            &dest,
            export_root,
        )
        .await
        .unwrap();

        assert_eq!(batch.mapping.len(), 1);
        assert_eq!(
            batch.mapping["/uploads/abc123/shot.png"],
            "issues/attachments/abc123_shot.png"
        );
        // One failed download + one traversal rejection.
        assert_eq!(batch.warnings.len(), 2);
        assert!(dest.join("abc123_shot.png").exists());
    }

    #[tokio::test]
    async fn test_oversized_download_removed() {
        use crate::gitlab::mock::MockGitLab;

        let mock = MockGitLab::new();
        mock.download_payloads.write().await.insert(
            "https://gl.example/g/p/uploads/ff00/huge.bin".into(),
            vec![0u8; (MAX_FILE_SIZE + 1) as usize],
        );

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("attachments");
        let mut paths = BTreeSet::new();
        paths.insert("/uploads/ff00/huge.bin".to_string());

        let batch = download_attachments(
            &mock,
            "https://gl.example",
            "g/p",
            &paths,
            &dest,
            dir.path(),
        )
        .await
        .unwrap();

        assert!(batch.mapping.is_empty());
        assert!(batch.warnings[0].contains("100 MB"));
        assert!(!dest.join("ff00_huge.bin").exists());
    }
}
