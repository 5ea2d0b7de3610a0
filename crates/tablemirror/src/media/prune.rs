use std::collections::BTreeSet;
use std::path::Path;

use super::error::MediaError;

/// Result of removing unreferenced cached files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Number of files deleted.
    pub removed: usize,
    /// Names of deleted files, sorted.
    pub files: Vec<String>,
}

/// Delete every regular file in `media_dir` whose name is not in `in_use`.
///
/// Directories and symlinks are left alone. A missing directory prunes nothing.
pub async fn prune_stale_media(
    media_dir: &Path,
    in_use: &BTreeSet<String>,
) -> Result<PruneReport, MediaError> {
    let mut entries = match tokio::fs::read_dir(media_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PruneReport::default()),
        Err(e) => return Err(MediaError::io(media_dir, e)),
    };

    let mut report = PruneReport::default();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MediaError::io(media_dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| MediaError::io(entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if in_use.contains(&name) {
            continue;
        }

        let path = entry.path();
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| MediaError::io(&path, e))?;
        tracing::debug!(file = %name, "Removed stale media file");
        report.files.push(name);
    }

    report.files.sort();
    report.removed = report.files.len();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prune_removes_only_unreferenced_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["keep.png", "stale.pdf", "old.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let in_use: BTreeSet<String> = ["keep.png".to_string()].into_iter().collect();
        let report = prune_stale_media(dir.path(), &in_use).await.unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.files, vec!["old.jpg", "stale.pdf"]);
        assert!(dir.path().join("keep.png").exists());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_prune_missing_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let report = prune_stale_media(&dir.path().join("absent"), &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
