//! Error types for the heicpress library.
//!
//! Two tiers reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal for the call**: the requested operation
//!   cannot proceed at all (file rejected at ingestion, batch already
//!   running, bad configuration). Returned as `Err(ConvertError)`.
//!
//! * [`TaskError`] — **Non-fatal**: a single conversion task failed (corrupt
//!   source, emit failure) but its siblings are unaffected. Recorded on the
//!   [`crate::registry::Registry`] as the file's terminal failure and as the
//!   latest error message, never propagated out of the batch.
//!
//! Transform failures are a third, quieter category: [`TransformError`] is
//! always recovered by continuing with the untransformed bitmap.

use crate::registry::FileId;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the heicpress library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// A source file was rejected at ingestion.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Routes and the registry are frozen while a batch runs.
    #[error("A batch is already running; wait for it to finish before editing the file list")]
    BatchInProgress,

    /// The id does not name a registered file.
    #[error("No registered file with id {id}")]
    UnknownFile { id: FileId },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a source file was refused at ingestion. No task is ever created for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'{name}' is {size} bytes, above the {limit}-byte size limit")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("'{name}' does not have a supported extension (expected one of: {expected})")]
    UnsupportedExtension { name: String, expected: String },

    #[error("'{name}' is empty")]
    EmptyFile { name: String },
}

/// Decoding failures. Fails only the owning task.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The bytes are not in any container this decoder understands.
    #[error("unsupported image format{}", hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
    UnsupportedFormat { hint: Option<String> },

    /// The container was recognised but the payload is corrupt or truncated.
    #[error("malformed image data: {0}")]
    Malformed(String),
}

/// Geometry failures in the transform stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("target dimensions must be non-zero (got {width}x{height})")]
    ZeroTarget { width: u32, height: u32 },

    #[error("source bitmap is empty")]
    EmptySource,
}

/// Document assembly failures. Fails the whole artifact being assembled.
#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    /// Nothing to assemble: every contributing task failed.
    #[error("no pages to assemble")]
    Empty,

    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },

    #[error("PDF serialisation failed: {0}")]
    Pdf(String),
}

/// Failures while handing a finished artifact to its sink.
#[derive(Debug, Clone, Error)]
pub enum EmitError {
    #[error("failed to write '{name}': {detail}")]
    Write { name: String, detail: String },

    #[error("sink rejected '{name}': {detail}")]
    Rejected { name: String, detail: String },
}

/// A non-fatal error for a single conversion task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("could not read source bytes: {detail}")]
    Read { detail: String },

    /// The bytes read at conversion time exceed the size limit.
    #[error("source is {size} bytes, above the {limit}-byte size limit")]
    SourceTooLarge { size: u64, limit: u64 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("encoding failed: {detail}")]
    Encode { detail: String },

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    /// A blocking worker panicked or was cancelled.
    #[error("worker failed: {detail}")]
    Internal { detail: String },
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(e: tokio::task::JoinError) -> Self {
        TaskError::Internal {
            detail: e.to_string(),
        }
    }
}
