//! Configuration types for batch conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The [`crate::Converter`] keeps one
//! global copy; every batch clones it once at dispatch so later edits never
//! leak into tasks that are already scheduled.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};

/// Default ingestion size ceiling: 10 MiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Default concurrency batch size for the independent lanes.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Configuration for a conversion batch.
///
/// # Example
/// ```rust
/// use heicpress::{ConversionConfig, FitMode, OutputKind};
///
/// let config = ConversionConfig::builder()
///     .output_kind(OutputKind::Raster)
///     .target_width(800)
///     .fit_mode(FitMode::Bound)
///     .build()
///     .unwrap();
/// assert_eq!(config.transform.target_width, Some(800));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Route given to newly ingested files. Default: [`OutputKind::Raster`].
    pub output_kind: OutputKind,

    /// Geometry applied to every decoded bitmap.
    pub transform: TransformConfig,

    /// Page layout and merge behaviour for document-routed files.
    pub document: DocumentConfig,

    /// Ingestion size ceiling in bytes. Default: 10 MiB.
    pub max_file_bytes: u64,

    /// Accepted source extensions, lower-case, without the dot.
    /// Default: `heic`, `heif`.
    pub accepted_extensions: Vec<String>,

    /// JPEG quality (1–100) for raster artifacts and embedded pages. Default: 92.
    pub jpeg_quality: u8,

    /// Tasks started together in the raster lane. Default: 3.
    pub raster_batch_size: usize,

    /// Tasks started together in the separate-document lane. Default: 3.
    pub document_batch_size: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            output_kind: OutputKind::default(),
            transform: TransformConfig::default(),
            document: DocumentConfig::default(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            accepted_extensions: vec!["heic".to_string(), "heif".to_string()],
            jpeg_quality: 92,
            raster_batch_size: DEFAULT_BATCH_SIZE,
            document_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `name` carries one of the accepted extensions (case-insensitive).
    pub fn accepts_extension(&self, name: &str) -> bool {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return false;
        };
        self.accepted_extensions
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(ext))
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn output_kind(mut self, kind: OutputKind) -> Self {
        self.config.output_kind = kind;
        self
    }

    pub fn merge_mode(mut self, mode: MergeMode) -> Self {
        self.config.document.merge_mode = mode;
        self
    }

    pub fn page_sizing(mut self, sizing: PageSizing) -> Self {
        self.config.document.page_sizing = sizing;
        self
    }

    pub fn transform(mut self, transform: TransformConfig) -> Self {
        self.config.transform = transform;
        self
    }

    pub fn target_width(mut self, width: u32) -> Self {
        self.config.transform.target_width = Some(width);
        self
    }

    pub fn target_height(mut self, height: u32) -> Self {
        self.config.transform.target_height = Some(height);
        self
    }

    pub fn fit_mode(mut self, mode: FitMode) -> Self {
        self.config.transform.fit_mode = mode;
        self
    }

    pub fn strip_metadata(mut self, v: bool) -> Self {
        self.config.transform.strip_metadata = v;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn accepted_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.accepted_extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn raster_batch_size(mut self, n: usize) -> Self {
        self.config.raster_batch_size = n;
        self
    }

    pub fn document_batch_size(mut self, n: usize) -> Self {
        self.config.document_batch_size = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.raster_batch_size == 0 || c.document_batch_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "Batch sizes must be ≥ 1".into(),
            ));
        }
        if c.max_file_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "Maximum file size must be > 0".into(),
            ));
        }
        if c.accepted_extensions.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "At least one accepted extension is required".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What a source file turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// A standalone JPEG image. (default)
    #[default]
    Raster,
    /// A PDF document.
    Document,
}

impl OutputKind {
    /// File extension of artifacts of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Raster => "jpg",
            OutputKind::Document => "pdf",
        }
    }
}

/// How document-routed files are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// One single-page document per source file. (default)
    #[default]
    Separate,
    /// One multi-page document for the whole batch, pages in submission order.
    Merge,
}

/// How a bitmap maps into the requested target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Scale down to fit inside the box, keeping aspect ratio. Never upscales. (default)
    #[default]
    Bound,
    /// Scale to cover the box, then center-crop the overflow.
    Crop,
    /// Force the exact box, ignoring aspect ratio.
    Stretch,
}

/// Geometry applied by the transform stage.
///
/// When neither dimension is set the transform is a no-op. Only [`FitMode::Bound`]
/// derives a missing dimension proportionally; `Crop` and `Stretch` substitute
/// the source's own size for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub fit_mode: FitMode,
    /// Drop EXIF metadata from raster artifacts. Default: true.
    pub strip_metadata: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            target_width: None,
            target_height: None,
            fit_mode: FitMode::default(),
            strip_metadata: true,
        }
    }
}

impl TransformConfig {
    pub fn is_passthrough(&self) -> bool {
        self.target_width.is_none() && self.target_height.is_none()
    }
}

/// Standard paper sizes, in PDF points (1/72 in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
}

impl PaperSize {
    /// Portrait `(width, height)` in points.
    pub fn dimensions_pt(self) -> (f32, f32) {
        match self {
            PaperSize::A4 => (595.28, 841.89),
            PaperSize::Letter => (612.0, 792.0),
        }
    }
}

/// Physical page sizing for document artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSizing {
    /// Each page takes its size from its own image. (default)
    #[default]
    ContentSized,
    /// Fixed paper size; images are fitted and centered.
    Standard(PaperSize),
}

/// Document assembly settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub page_sizing: PageSizing,
    pub merge_mode: MergeMode,
}
