//! Artifact hand-off.
//!
//! Every finished artifact goes through an [`ArtifactSink`]. The library
//! ships two: [`MemorySink`] keeps artifacts in memory for embedding and
//! tests, [`DirectorySink`] writes them to disk. A sink failure fails only
//! the task (or merge pass) that produced the artifact.

use crate::config::OutputKind;
use crate::error::EmitError;
use crate::registry::FileId;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// A finished output file.
#[derive(Clone, Serialize)]
pub struct Artifact {
    /// File name, e.g. `IMG_0001.jpg` or `merged_1718000000000.pdf`.
    pub name: String,
    pub kind: OutputKind,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Source files that contributed, in page order.
    pub sources: Vec<FileId>,
    /// Page count for documents, 1 for raster images.
    pub pages: usize,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bytes", &self.bytes.len())
            .field("sources", &self.sources)
            .field("pages", &self.pages)
            .finish()
    }
}

/// Artifact name for a single-source output: `<basename>.<ext>`.
pub fn artifact_name(basename: &str, kind: OutputKind) -> String {
    format!("{}.{}", basename, kind.extension())
}

/// Name of the merged document of one batch: `merged_<unix millis>.pdf`.
pub fn merged_name() -> String {
    format!(
        "merged_{}.{}",
        chrono::Utc::now().timestamp_millis(),
        OutputKind::Document.extension()
    )
}

/// Destination for finished artifacts. Shared by every task of a batch.
pub trait ArtifactSink: Send + Sync {
    fn emit<'a>(&'a self, artifact: &'a Artifact) -> BoxFuture<'a, Result<(), EmitError>>;
}

/// Collects artifacts in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return everything emitted so far.
    pub fn take(&self) -> Vec<Artifact> {
        std::mem::take(&mut *self.artifacts.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, name: &str) -> Option<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.name == name)
            .cloned()
    }
}

impl ArtifactSink for MemorySink {
    fn emit<'a>(&'a self, artifact: &'a Artifact) -> BoxFuture<'a, Result<(), EmitError>> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(artifact.clone());
        futures::future::ready(Ok(())).boxed()
    }
}

/// Writes artifacts into one directory.
///
/// Each file is written to a temporary file in the same directory and then
/// renamed into place, so a reader never sees a partial artifact. An
/// existing file with the same name is replaced.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, EmitError> {
    let write_err = |detail: String| EmitError::Write {
        name: name.to_string(),
        detail,
    };
    std::fs::create_dir_all(dir).map_err(|e| write_err(e.to_string()))?;
    let target = dir.join(name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(bytes).map_err(|e| write_err(e.to_string()))?;
    tmp.as_file().sync_all().map_err(|e| write_err(e.to_string()))?;
    tmp.persist(&target).map_err(|e| write_err(e.error.to_string()))?;
    Ok(target)
}

impl ArtifactSink for DirectorySink {
    fn emit<'a>(&'a self, artifact: &'a Artifact) -> BoxFuture<'a, Result<(), EmitError>> {
        async move {
            if artifact.name.contains(['/', '\\']) || artifact.name.starts_with('.') {
                return Err(EmitError::Rejected {
                    name: artifact.name.clone(),
                    detail: "artifact names must be plain file names".into(),
                });
            }
            let dir = self.dir.clone();
            let name = artifact.name.clone();
            let bytes = artifact.bytes.clone();
            let target = tokio::task::spawn_blocking(move || write_atomic(&dir, &name, &bytes))
                .await
                .map_err(|e| EmitError::Write {
                    name: artifact.name.clone(),
                    detail: e.to_string(),
                })??;
            debug!("Wrote {} ({} bytes)", target.display(), artifact.bytes.len());
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> Artifact {
        Artifact {
            name: name.into(),
            kind: OutputKind::Raster,
            bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            sources: vec![FileId::from_raw(1)],
            pages: 1,
        }
    }

    #[test]
    fn names_follow_basename_and_kind() {
        assert_eq!(artifact_name("IMG_0001", OutputKind::Raster), "IMG_0001.jpg");
        assert_eq!(artifact_name("scan", OutputKind::Document), "scan.pdf");
        let merged = merged_name();
        assert!(merged.starts_with("merged_") && merged.ends_with(".pdf"));
        let stamp = &merged["merged_".len()..merged.len() - ".pdf".len()];
        assert!(stamp.parse::<i64>().is_ok(), "got: {merged}");
    }

    #[tokio::test]
    async fn memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        sink.emit(&artifact("a.jpg")).await.unwrap();
        sink.emit(&artifact("b.jpg")).await.unwrap();
        let names: Vec<_> = sink.artifacts().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert!(sink.get("b.jpg").is_some());
        assert_eq!(sink.take().len(), 2);
        assert!(sink.artifacts().is_empty());
    }

    #[tokio::test]
    async fn directory_sink_writes_and_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("nested/out");
        let sink = DirectorySink::new(&out);

        tokio_test::assert_ok!(sink.emit(&artifact("a.jpg")).await);

        let written = std::fs::read(out.join("a.jpg")).unwrap();
        assert_eq!(written, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        // Only the artifact remains; the temp file was renamed away.
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn directory_sink_rejects_path_like_names() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(tmp.path());
        let err = sink.emit(&artifact("../escape.jpg")).await.unwrap_err();
        assert!(matches!(err, EmitError::Rejected { .. }));
    }

    #[test]
    fn artifact_serialises_without_bytes() {
        let json = serde_json::to_value(artifact("a.jpg")).unwrap();
        assert_eq!(json["name"], "a.jpg");
        assert_eq!(json["kind"], "raster");
        assert!(json.get("bytes").is_none());
    }
}
