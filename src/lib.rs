//! # heicpress
//!
//! Batch-convert HEIC/HEIF photos into standalone JPEG images or PDF
//! documents, one page per photo or one merged document per batch.
//!
//! ## Pipeline Overview
//!
//! ```text
//! HEIC
//!  │
//!  ├─ 1. Ingest     extension + size checks, register with a route
//!  ├─ 2. Read       bytes from memory or disk (inside the task)
//!  ├─ 3. Decode     container → upright RGB bitmap (spawn_blocking)
//!  ├─ 4. Transform  Bound / Crop / Stretch to the target box
//!  ├─ 5. Encode     JPEG, or a PDF page embedding that JPEG
//!  └─ 6. Emit       hand the artifact to a sink (memory, directory)
//! ```
//!
//! Files are scheduled in three lanes: independent rasters and independent
//! documents in bounded concurrent chunks, merged documents strictly in
//! submission order. See [`convert`] for the details.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heicpress::{ConversionConfig, Converter, MemorySink, SourceInput};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = Arc::new(MemorySink::new());
//!     let converter = Converter::builder()
//!         .config(ConversionConfig::builder().target_width(1024).build()?)
//!         .sink(sink.clone())
//!         .build();
//!
//!     let bytes = std::fs::read("IMG_0001.HEIC")?;
//!     converter.add_files([SourceInput::from_bytes("IMG_0001.HEIC", bytes)]);
//!     converter.run_batch().await?;
//!
//!     for artifact in sink.artifacts() {
//!         println!("{} ({} bytes)", artifact.name, artifact.bytes.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `heicpress` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `heif`  | off     | Native HEIC/HEIF decoding through the system libheif |
//!
//! Without `heif`, the default decoder handles every container the `image`
//! crate recognises from the bytes. Plug in any other decoder through
//! [`SourceDecoder`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod emit;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, DocumentConfig, FitMode, MergeMode, OutputKind,
    PageSizing, PaperSize, TransformConfig,
};
pub use convert::{BatchReport, Converter, ConverterBuilder};
pub use emit::{Artifact, ArtifactSink, DirectorySink, MemorySink};
pub use error::{
    AssemblyError, ConvertError, DecodeError, EmitError, TaskError, TransformError,
    ValidationError,
};
pub use executor::{BoundedConcurrentExecutor, SequentialExecutor, TaskExecutor};
#[cfg(feature = "heif")]
pub use pipeline::decode::HeifDecoder;
pub use pipeline::decode::{Bitmap, ImageCrateDecoder, SourceDecoder};
pub use pipeline::input::SourceInput;
pub use progress::{Checkpoint, ProgressEntry, RegistryEvent};
pub use registry::{FileId, Registry};
pub use stream::{registry_events, EventStream};
