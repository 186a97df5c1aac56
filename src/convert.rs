//! Batch conversion: the scheduler that drives registered files through the
//! pipeline.
//!
//! ## Lanes
//!
//! A batch partitions its files into three lanes by route and merge mode:
//!
//! | Lane | Files | Executor |
//! |------|-------|----------|
//! | A | routed to raster | [`BoundedConcurrentExecutor`] (`raster_batch_size`) |
//! | B | routed to document, separate mode | [`BoundedConcurrentExecutor`] (`document_batch_size`) |
//! | C | routed to document, merge mode | [`SequentialExecutor`], then one merge pass |
//!
//! Lanes run one after another (A, then B, then C), which bounds the number
//! of decoded bitmaps resident at once. A task failure is recorded on the
//! registry and never affects its siblings.
//!
//! ## Configuration snapshot
//!
//! [`Converter::run_batch`] clones the global configuration once. Calls to
//! [`Converter::set_config`] made while the batch runs apply to the next one.

use crate::config::{ConversionConfig, MergeMode, OutputKind};
use crate::emit::{artifact_name, merged_name, Artifact, ArtifactSink, MemorySink};
use crate::error::{AssemblyError, ConvertError, TaskError, ValidationError};
use crate::executor::{BoundedConcurrentExecutor, SequentialExecutor, TaskExecutor};
use crate::pipeline::decode::{Bitmap, SourceDecoder};
use crate::pipeline::document::DocumentAssembler;
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::input::{self, SourceInput};
use crate::pipeline::transform;
use crate::progress::{Checkpoint, RegistryEvent};
use crate::registry::{FileId, Registry, SourceFile};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one [`Converter::run_batch`] call.
///
/// Carries counts and artifact names only. Failure messages live on the
/// registry ([`Registry::failure`], [`Registry::last_error`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Emitted artifact names, lane A first, then lane B, then the merged document.
    pub artifacts: Vec<String>,
    /// Files that reached 100%.
    pub succeeded: usize,
    /// Files that ended the batch with a terminal failure.
    pub failed: usize,
    /// Page count of the merged document, when one was emitted.
    pub merged_pages: Option<usize>,
    pub duration_ms: u64,
}

/// Owns a [`Registry`], the global configuration, a decoder and a sink.
///
/// # Example
///
/// ```rust,no_run
/// use heicpress::{ConversionConfig, Converter, DirectorySink, OutputKind};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = Converter::builder()
///     .config(ConversionConfig::builder().output_kind(OutputKind::Document).build()?)
///     .sink(Arc::new(DirectorySink::new("out")))
///     .build();
/// converter.add_paths(["IMG_0001.HEIC", "IMG_0002.HEIC"]).await;
/// let report = converter.run_batch().await?;
/// println!("{} converted, {} failed", report.succeeded, report.failed);
/// # Ok(())
/// # }
/// ```
pub struct Converter {
    registry: Arc<Registry>,
    decoder: Arc<dyn SourceDecoder>,
    sink: Arc<dyn ArtifactSink>,
    config: Mutex<ConversionConfig>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("registry", &self.registry)
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`Converter`].
#[derive(Default)]
pub struct ConverterBuilder {
    config: Option<ConversionConfig>,
    decoder: Option<Arc<dyn SourceDecoder>>,
    sink: Option<Arc<dyn ArtifactSink>>,
    registry: Option<Arc<Registry>>,
}

impl ConverterBuilder {
    pub fn config(mut self, config: ConversionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Decoder for source bytes. Default: the `image`-crate decoder, or the
    /// libheif decoder when built with the `heif` feature.
    pub fn decoder(mut self, decoder: Arc<dyn SourceDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Destination for artifacts. Default: a private [`MemorySink`].
    pub fn sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an existing registry (e.g. one already being observed).
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Converter {
        Converter {
            registry: self.registry.unwrap_or_default(),
            decoder: self.decoder.unwrap_or_else(default_decoder),
            sink: self.sink.unwrap_or_else(|| Arc::new(MemorySink::new())),
            config: Mutex::new(self.config.unwrap_or_default()),
        }
    }
}

#[cfg(feature = "heif")]
fn default_decoder() -> Arc<dyn SourceDecoder> {
    Arc::new(crate::pipeline::decode::HeifDecoder::default())
}

#[cfg(not(feature = "heif"))]
fn default_decoder() -> Arc<dyn SourceDecoder> {
    Arc::new(crate::pipeline::decode::ImageCrateDecoder)
}

impl Converter {
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder::default()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Current global configuration.
    pub fn config(&self) -> ConversionConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the global configuration. Files already registered keep
    /// their routes; a running batch keeps its snapshot.
    pub fn set_config(&self, config: ConversionConfig) {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Register in-memory or path sources, validated against the current
    /// configuration.
    pub fn add_files<I>(&self, inputs: I) -> Vec<Result<FileId, ValidationError>>
    where
        I: IntoIterator<Item = SourceInput>,
    {
        self.registry.add_files(inputs, &self.config())
    }

    /// Register files on disk. Only metadata is read here; a missing or
    /// unreadable path is reported for that path alone.
    pub async fn add_paths<I, P>(&self, paths: I) -> Vec<Result<FileId, ConvertError>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let config = self.config();
        let mut out = Vec::new();
        for path in paths {
            let result = match SourceInput::from_path(path).await {
                Ok(source) => self
                    .registry
                    .add_file(source, &config)
                    .map_err(ConvertError::from),
                Err(e) => {
                    warn!("{}", e);
                    Err(e)
                }
            };
            out.push(result);
        }
        out
    }

    /// Whether merge mode would take effect for the next batch.
    pub fn merge_available(&self) -> bool {
        self.registry.merge_available()
    }

    /// Convert every registered file that has neither been emitted nor failed.
    ///
    /// Returns [`ConvertError::BatchInProgress`] if another batch is running;
    /// every other failure is per task and recorded on the registry. To retry
    /// a failed file, remove it and add it again.
    pub async fn run_batch(&self) -> Result<BatchReport, ConvertError> {
        let start = Instant::now();
        let config = Arc::new(self.config());
        let snapshot = self.registry.begin_batch()?;
        let _batch = BatchGuard(&self.registry);

        let documents = snapshot
            .iter()
            .filter(|(_, route)| *route == OutputKind::Document)
            .count();
        let merge = config.document.merge_mode == MergeMode::Merge && documents >= 2;
        if config.document.merge_mode == MergeMode::Merge && !merge {
            debug!("Merge mode needs at least two document files; using separate documents");
        }

        let mut raster = Vec::new();
        let mut separate = Vec::new();
        let mut merged = Vec::new();
        for (file, route) in snapshot {
            match route {
                OutputKind::Raster => raster.push(file),
                OutputKind::Document if merge => merged.push(file),
                OutputKind::Document => separate.push(file),
            }
        }
        let total = raster.len() + separate.len() + merged.len();
        info!(
            "Starting batch: {} files ({} raster, {} document, {} merged)",
            total,
            raster.len(),
            separate.len(),
            merged.len()
        );
        self.registry.notify(RegistryEvent::BatchStarted { tasks: total });
        for file in raster.iter().chain(&separate).chain(&merged) {
            self.registry.advance(file.id, Checkpoint::Enqueued);
        }

        let ctx = TaskContext {
            registry: Arc::clone(&self.registry),
            decoder: Arc::clone(&self.decoder),
            sink: Arc::clone(&self.sink),
            config,
        };
        let mut report = BatchReport::default();

        // ── Lane A: independent raster ───────────────────────────────────
        if !raster.is_empty() {
            let lane = BoundedConcurrentExecutor::new(ctx.config.raster_batch_size);
            info!("Lane A: {} raster tasks, batch size {}", raster.len(), lane.batch_size());
            let tasks: Vec<BoxFuture<'_, Option<String>>> = raster
                .iter()
                .map(|f| ctx.settle(f, ctx.raster_task(f)).boxed())
                .collect();
            report.tally(lane.run_all(tasks).await);
        }

        // ── Lane B: independent documents ────────────────────────────────
        if !separate.is_empty() {
            let lane = BoundedConcurrentExecutor::new(ctx.config.document_batch_size);
            info!("Lane B: {} document tasks, batch size {}", separate.len(), lane.batch_size());
            let tasks: Vec<BoxFuture<'_, Option<String>>> = separate
                .iter()
                .map(|f| ctx.settle(f, ctx.document_task(f)).boxed())
                .collect();
            report.tally(lane.run_all(tasks).await);
        }

        // ── Lane C: merged document ──────────────────────────────────────
        if !merged.is_empty() {
            info!("Lane C: {} pages to merge", merged.len());
            ctx.merge_lane(&merged, &SequentialExecutor, &mut report).await;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Batch complete: {}/{} succeeded, {} artifacts, {}ms",
            report.succeeded,
            total,
            report.artifacts.len(),
            report.duration_ms
        );
        self.registry.notify(RegistryEvent::BatchFinished {
            succeeded: report.succeeded,
            failed: report.failed,
        });
        Ok(report)
    }
}

impl BatchReport {
    fn tally(&mut self, outcomes: Vec<Option<String>>) {
        for outcome in outcomes {
            match outcome {
                Some(name) => {
                    self.succeeded += 1;
                    self.artifacts.push(name);
                }
                None => self.failed += 1,
            }
        }
    }
}

/// Unfreezes the registry on every exit path, including cancellation of
/// the `run_batch` future.
struct BatchGuard<'a>(&'a Registry);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.end_batch();
    }
}

/// Everything a task needs, shared by reference across a lane.
struct TaskContext {
    registry: Arc<Registry>,
    decoder: Arc<dyn SourceDecoder>,
    sink: Arc<dyn ArtifactSink>,
    config: Arc<ConversionConfig>,
}

impl TaskContext {
    /// Run `task`, recording a failure against `file` instead of propagating
    /// it. Yields the emitted artifact name on success.
    async fn settle(
        &self,
        file: &SourceFile,
        task: impl std::future::Future<Output = Result<String, TaskError>>,
    ) -> Option<String> {
        match task.await {
            Ok(name) => Some(name),
            Err(e) => {
                self.record_failure(file, &e);
                None
            }
        }
    }

    fn record_failure(&self, file: &SourceFile, e: &TaskError) {
        warn!("{} ({}) failed: {}", file.name, file.id, e);
        self.registry.fail(Some(file.id), format!("{}: {}", file.name, e));
    }

    /// Read → decode → transform. Shared prefix of every task.
    async fn prepare(&self, file: &SourceFile) -> Result<Bitmap, TaskError> {
        let bytes = input::read_source(&file.data, self.config.max_file_bytes).await?;
        self.registry.advance(file.id, Checkpoint::BytesRead);

        self.registry.advance(file.id, Checkpoint::DecodeStarted);
        let decoder = Arc::clone(&self.decoder);
        let bitmap = tokio::task::spawn_blocking(move || decoder.decode(&bytes)).await??;
        self.registry.advance(file.id, Checkpoint::Decoded);
        debug!("{}: decoded {}x{}", file.name, bitmap.width(), bitmap.height());

        let bitmap = match transform::plan(bitmap.dimensions(), &self.config.transform) {
            Ok(transform::Plan::Passthrough) => bitmap,
            Ok(plan) => {
                tokio::task::spawn_blocking(move || transform::apply_plan(bitmap, plan)).await?
            }
            Err(e) => {
                warn!("{}: transform skipped, keeping original size: {}", file.name, e);
                bitmap
            }
        };
        self.registry.advance(file.id, Checkpoint::Transformed);
        Ok(bitmap)
    }

    async fn raster_task(&self, file: &SourceFile) -> Result<String, TaskError> {
        let bitmap = self.prepare(file).await?;
        let quality = self.config.jpeg_quality;
        let keep_metadata = !self.config.transform.strip_metadata;
        let jpeg =
            tokio::task::spawn_blocking(move || encode_jpeg(&bitmap, quality, keep_metadata))
                .await??;
        self.registry.advance(file.id, Checkpoint::Encoded);

        self.emit(Artifact {
            name: artifact_name(file.basename(), OutputKind::Raster),
            kind: OutputKind::Raster,
            bytes: jpeg,
            sources: vec![file.id],
            pages: 1,
        })
        .await
    }

    async fn document_task(&self, file: &SourceFile) -> Result<String, TaskError> {
        let bitmap = self.prepare(file).await?;
        let sizing = self.config.document.page_sizing;
        let quality = self.config.jpeg_quality;
        let pdf = tokio::task::spawn_blocking(move || {
            let mut assembler = DocumentAssembler::new(sizing, quality);
            assembler.add_page(&bitmap)?;
            assembler.finish()
        })
        .await??;
        self.registry.advance(file.id, Checkpoint::Encoded);

        self.emit(Artifact {
            name: artifact_name(file.basename(), OutputKind::Document),
            kind: OutputKind::Document,
            bytes: pdf,
            sources: vec![file.id],
            pages: 1,
        })
        .await
    }

    /// Hand `artifact` to the sink and mark its sources as done.
    async fn emit(&self, artifact: Artifact) -> Result<String, TaskError> {
        self.sink.emit(&artifact).await?;
        for id in &artifact.sources {
            self.registry.complete(*id);
        }
        info!("Emitted {} ({} bytes)", artifact.name, artifact.bytes.len());
        self.registry.notify(RegistryEvent::ArtifactEmitted {
            name: artifact.name.clone(),
            kind: artifact.kind,
            sources: artifact.sources,
        });
        Ok(artifact.name)
    }

    /// Accumulate bitmaps one file at a time, then assemble and emit one
    /// document from the successful subset.
    async fn merge_lane(
        &self,
        files: &[SourceFile],
        executor: &dyn TaskExecutor<Option<(FileId, Bitmap)>>,
        report: &mut BatchReport,
    ) {
        let tasks: Vec<BoxFuture<'_, Option<(FileId, Bitmap)>>> = files
            .iter()
            .map(|file| {
                async move {
                    match self.prepare(file).await {
                        Ok(bitmap) => {
                            self.registry.advance(file.id, Checkpoint::Encoded);
                            Some((file.id, bitmap))
                        }
                        Err(e) => {
                            self.record_failure(file, &e);
                            None
                        }
                    }
                }
                .boxed()
            })
            .collect();

        let pages: Vec<(FileId, Bitmap)> =
            executor.run_all(tasks).await.into_iter().flatten().collect();
        report.failed += files.len() - pages.len();

        if pages.is_empty() {
            let message = format!("merge pass: {}", AssemblyError::Empty);
            warn!("{}", message);
            self.registry.fail(None, message);
            return;
        }

        let sources: Vec<FileId> = pages.iter().map(|(id, _)| *id).collect();
        let sizing = self.config.document.page_sizing;
        let quality = self.config.jpeg_quality;
        let assembled = tokio::task::spawn_blocking(move || {
            let mut assembler = DocumentAssembler::new(sizing, quality);
            for (_, bitmap) in &pages {
                assembler.add_page(bitmap)?;
            }
            let count = assembler.page_count();
            assembler.finish().map(|pdf| (pdf, count))
        })
        .await
        .map_err(TaskError::from)
        .and_then(|r| r.map_err(TaskError::from));

        let result = match assembled {
            Ok((pdf, count)) => self
                .emit(Artifact {
                    name: merged_name(),
                    kind: OutputKind::Document,
                    bytes: pdf,
                    sources: sources.clone(),
                    pages: count,
                })
                .await
                .map(|name| (name, count)),
            Err(e) => Err(e),
        };

        match result {
            Ok((name, count)) => {
                report.succeeded += sources.len();
                report.merged_pages = Some(count);
                report.artifacts.push(name);
            }
            Err(e) => {
                let message = format!("merge pass: {}", e);
                warn!("{}", message);
                for id in &sources {
                    self.registry.fail(Some(*id), message.clone());
                }
                report.failed += sources.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitMode;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 100, 50])))
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn converter(config: ConversionConfig) -> (Converter, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let conv = Converter::builder().config(config).sink(sink.clone()).build();
        (conv, sink)
    }

    /// Sink that refuses artifacts whose name starts with a prefix.
    struct Refusing(&'static str, MemorySink);

    impl ArtifactSink for Refusing {
        fn emit<'a>(
            &'a self,
            artifact: &'a Artifact,
        ) -> BoxFuture<'a, Result<(), crate::error::EmitError>> {
            if artifact.name.starts_with(self.0) {
                let err = crate::error::EmitError::Rejected {
                    name: artifact.name.clone(),
                    detail: "disk full".into(),
                };
                return futures::future::ready(Err(err)).boxed();
            }
            self.1.emit(artifact)
        }
    }

    #[tokio::test]
    async fn raster_batch_applies_transform_snapshot() {
        let config = ConversionConfig::builder()
            .target_width(50)
            .fit_mode(FitMode::Bound)
            .build()
            .unwrap();
        let (conv, sink) = converter(config);
        conv.add_files([SourceInput::from_bytes("IMG_1.HEIC", png(100, 60))]);

        let report = conv.run_batch().await.unwrap();

        assert_eq!(report.artifacts, vec!["IMG_1.jpg"]);
        let jpeg = sink.get("IMG_1.jpg").unwrap();
        let img = image::load_from_memory(&jpeg.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (50, 30));
    }

    #[tokio::test]
    async fn zero_target_falls_back_to_original_size() {
        let config = ConversionConfig::builder().target_width(0).build().unwrap();
        let (conv, sink) = converter(config);
        let id = conv.add_files([SourceInput::from_bytes("a.heic", png(20, 10))])[0]
            .clone()
            .unwrap();

        let report = conv.run_batch().await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(conv.registry().progress(id), Some(100));
        let img = image::load_from_memory(&sink.get("a.jpg").unwrap().bytes).unwrap();
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[tokio::test]
    async fn emit_failure_fails_only_that_task() {
        let sink = Arc::new(Refusing("b.jpg", MemorySink::new()));
        let conv = Converter::builder().sink(sink.clone()).build();
        let ids: Vec<_> = conv
            .add_files([
                SourceInput::from_bytes("a.heic", png(4, 4)),
                SourceInput::from_bytes("b.heic", png(4, 4)),
            ])
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let report = conv.run_batch().await.unwrap();

        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert_eq!(conv.registry().progress(ids[0]), Some(100));
        assert!(conv.registry().progress(ids[1]).unwrap() < 100);
        assert!(conv.registry().failure(ids[1]).unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn single_document_file_in_merge_mode_uses_separate_lane() {
        let config = ConversionConfig::builder()
            .output_kind(OutputKind::Document)
            .merge_mode(MergeMode::Merge)
            .build()
            .unwrap();
        let (conv, sink) = converter(config);
        conv.add_files([SourceInput::from_bytes("solo.heic", png(8, 8))]);
        assert!(!conv.merge_available());

        let report = conv.run_batch().await.unwrap();

        assert_eq!(report.artifacts, vec!["solo.pdf"]);
        assert_eq!(report.merged_pages, None);
        assert_eq!(sink.artifacts().len(), 1);
    }

    #[tokio::test]
    async fn emitted_files_are_not_converted_twice() {
        let (conv, sink) = converter(ConversionConfig::default());
        conv.add_files([SourceInput::from_bytes("a.heic", png(4, 4))]);
        conv.run_batch().await.unwrap();
        conv.add_files([SourceInput::from_bytes("b.heic", png(4, 4))]);

        let report = conv.run_batch().await.unwrap();

        assert_eq!(report.artifacts, vec!["b.jpg"]);
        assert_eq!(sink.artifacts().len(), 2);
        assert!(!conv.registry().is_batch_active());
    }

    #[tokio::test]
    async fn config_edits_after_dispatch_do_not_leak() {
        let (conv, _sink) = converter(ConversionConfig::default());
        conv.add_files([SourceInput::from_bytes("a.heic", png(4, 4))]);
        let mut events = conv.registry().subscribe();

        let batch = conv.run_batch();
        tokio::pin!(batch);
        // Drive the batch until it has started, then edit the config.
        let report = loop {
            tokio::select! {
                r = &mut batch => break r.unwrap(),
                Ok(ev) = events.recv() => {
                    if matches!(ev, RegistryEvent::BatchStarted { .. }) {
                        let document = ConversionConfig::builder()
                            .output_kind(OutputKind::Document)
                            .build()
                            .unwrap();
                        conv.set_config(document);
                    }
                }
            }
        };
        assert_eq!(report.artifacts, vec!["a.jpg"]);
        assert_eq!(conv.config().output_kind, OutputKind::Document);
    }

    #[tokio::test]
    async fn failed_merge_emit_fails_every_contributor() {
        let config = ConversionConfig::builder()
            .output_kind(OutputKind::Document)
            .merge_mode(MergeMode::Merge)
            .build()
            .unwrap();
        let sink = Arc::new(Refusing("merged_", MemorySink::new()));
        let conv = Converter::builder().config(config).sink(sink.clone()).build();
        let ids: Vec<_> = conv
            .add_files([
                SourceInput::from_bytes("p1.heic", png(8, 8)),
                SourceInput::from_bytes("p2.heic", png(8, 8)),
            ])
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let report = conv.run_batch().await.unwrap();

        assert_eq!((report.succeeded, report.failed), (0, 2));
        assert!(report.artifacts.is_empty());
        assert_eq!(report.merged_pages, None);
        assert!(sink.1.artifacts().is_empty());
        for id in &ids {
            assert!(conv.registry().progress(*id).unwrap() < 100);
            assert!(conv.registry().failure(*id).unwrap().contains("disk full"));
        }
        assert!(conv.registry().is_batch_complete());
    }

    /// Decoder that records how many decodes overlap.
    #[derive(Default)]
    struct Overlap {
        current: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    impl SourceDecoder for Overlap {
        fn decode(&self, bytes: &[u8]) -> Result<Bitmap, crate::error::DecodeError> {
            use std::sync::atomic::Ordering::SeqCst;
            let now = self.current.fetch_add(1, SeqCst) + 1;
            self.peak.fetch_max(now, SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            let result = crate::pipeline::decode::ImageCrateDecoder.decode(bytes);
            self.current.fetch_sub(1, SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn raster_lane_runs_one_chunk_concurrently() {
        let decoder = Arc::new(Overlap::default());
        let config = ConversionConfig::builder().raster_batch_size(3).build().unwrap();
        let conv = Converter::builder()
            .config(config)
            .decoder(decoder.clone())
            .build();
        conv.add_files((0..4).map(|i| SourceInput::from_bytes(format!("{i}.heic"), png(4, 4))));

        let report = conv.run_batch().await.unwrap();

        assert_eq!(report.succeeded, 4);
        assert_eq!(decoder.peak.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn later_batch_with_one_new_document_is_not_merged() {
        let config = ConversionConfig::builder()
            .output_kind(OutputKind::Document)
            .merge_mode(MergeMode::Merge)
            .build()
            .unwrap();
        let (conv, _sink) = converter(config);
        conv.add_files([
            SourceInput::from_bytes("p1.heic", png(8, 8)),
            SourceInput::from_bytes("p2.heic", png(8, 8)),
        ]);
        let first = conv.run_batch().await.unwrap();
        assert_eq!(first.merged_pages, Some(2));

        conv.add_files([SourceInput::from_bytes("p3.heic", png(8, 8))]);
        assert!(!conv.merge_available());
        let second = conv.run_batch().await.unwrap();

        assert_eq!(second.artifacts, vec!["p3.pdf"]);
        assert_eq!(second.merged_pages, None);
    }

    #[test]
    fn report_serialises_for_json_output() {
        let report = BatchReport {
            artifacts: vec!["a.jpg".into()],
            succeeded: 1,
            failed: 0,
            merged_pages: None,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["succeeded"], 1);
        assert!(json["merged_pages"].is_null());
    }
}
