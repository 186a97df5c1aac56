//! Source inputs: ingestion-time validation and in-task byte reading.
//!
//! A source is either already in memory or a path on disk. Path sources are
//! only `stat`ed at ingestion (the size check needs no bytes); their contents
//! are read inside the task so the read is a suspension point of the batch
//! and large files are not all resident at once.

use crate::config::ConversionConfig;
use crate::error::{ConvertError, TaskError, ValidationError};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Where a source file's bytes live.
#[derive(Debug, Clone)]
pub enum SourceData {
    Memory(Bytes),
    Path(PathBuf),
}

/// A source file offered for ingestion. `size` is always derived from the
/// data itself.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) data: SourceData,
}

impl SourceInput {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte length at the time the input was created.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// An in-memory source. `size` is the byte length.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            data: SourceData::Memory(bytes),
        }
    }

    /// A file on disk. Reads metadata only; contents are read during conversion.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let path = path.as_ref().to_path_buf();
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(ConvertError::PermissionDenied { path });
            }
            Err(_) => return Err(ConvertError::FileNotFound { path }),
        };
        if !meta.is_file() {
            return Err(ConvertError::FileNotFound { path });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!("Resolved local source: {}", path.display());
        Ok(Self {
            name,
            size: meta.len(),
            data: SourceData::Path(path),
        })
    }
}

/// Check extension and size limits. Nothing is read.
pub fn validate(input: &SourceInput, config: &ConversionConfig) -> Result<(), ValidationError> {
    if !config.accepts_extension(&input.name) {
        return Err(ValidationError::UnsupportedExtension {
            name: input.name.clone(),
            expected: config.accepted_extensions.join(", "),
        });
    }
    if input.size > config.max_file_bytes {
        return Err(ValidationError::TooLarge {
            name: input.name.clone(),
            size: input.size,
            limit: config.max_file_bytes,
        });
    }
    if input.size == 0 {
        return Err(ValidationError::EmptyFile {
            name: input.name.clone(),
        });
    }
    Ok(())
}

/// Load a source's bytes, refusing anything above `limit`.
///
/// In-memory sources are a cheap reference-count bump. A file on disk may
/// have changed since ingestion, so its length is checked again and at most
/// `limit + 1` bytes are read.
pub async fn read_source(data: &SourceData, limit: u64) -> Result<Bytes, TaskError> {
    let bytes = match data {
        SourceData::Memory(bytes) => bytes.clone(),
        SourceData::Path(path) => {
            let read_err = |e: std::io::Error| TaskError::Read {
                detail: format!("{}: {}", path.display(), e),
            };
            let file = tokio::fs::File::open(path).await.map_err(read_err)?;
            let size = file.metadata().await.map_err(read_err)?.len();
            if size > limit {
                return Err(TaskError::SourceTooLarge { size, limit });
            }
            let mut buf = Vec::with_capacity(size as usize);
            file.take(limit.saturating_add(1))
                .read_to_end(&mut buf)
                .await
                .map_err(read_err)?;
            Bytes::from(buf)
        }
    };
    let size = bytes.len() as u64;
    if size > limit {
        return Err(TaskError::SourceTooLarge { size, limit });
    }
    Ok(bytes)
}
