//! Result types returned by the render entry points.

use crate::error::{RecoverletteError, Warning};
use crate::pipeline::resolve::{Diagnostics, ResolvedToken};
use crate::pipeline::rewrite::RewriteStats;
use crate::remote::TempArtifact;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A template filled locally, ready to upload.
#[derive(Debug, Clone)]
pub struct FilledTemplate {
    /// The rewritten `.docx` package.
    pub bytes: Vec<u8>,
    /// Every token found, with its classification.
    pub tokens: Vec<ResolvedToken>,
    pub diagnostics: Diagnostics,
    pub rewrite: RewriteStats,
    /// Non-fatal findings (undefined required placeholders).
    pub warnings: Vec<Warning>,
}

/// What happened to the temporary copy after a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    /// Deletion failed; the copy is still on the drive.
    Failed { detail: String },
}

/// Timings and sizes for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderStats {
    pub template_bytes: usize,
    pub filled_bytes: usize,
    pub output_bytes: usize,
    pub tokens_found: usize,
    pub tokens_replaced: usize,
    pub tokens_deleted: usize,
    pub tokens_unresolved: usize,
    pub fill_duration_ms: u64,
    pub remote_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of a full remote render.
#[derive(Debug, Clone)]
pub struct RenderReport {
    /// Where the rendered file was written.
    pub output_path: PathBuf,
    /// The temporary copy that was uploaded.
    pub artifact: TempArtifact,
    pub cleanup: CleanupOutcome,
    pub diagnostics: Diagnostics,
    pub warnings: Vec<Warning>,
    pub stats: RenderStats,
}

/// Write `bytes` to `path` via a sibling temp file and a rename, so a
/// reader never sees a partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RecoverletteError> {
    let failed = |e: std::io::Error| RecoverletteError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(failed(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("Letter.pdf");
        write_atomic(&path, b"%PDF-1.7").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn atomic_write_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let path = blocker.join("nested.pdf");
        let err = write_atomic(&path, b"data").await.unwrap_err();
        match err {
            RecoverletteError::OutputWriteFailed { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cleanup_outcome_serialises_tagged() {
        let json = serde_json::to_string(&CleanupOutcome::Deleted).unwrap();
        assert_eq!(json, "\"deleted\"");
    }
}
