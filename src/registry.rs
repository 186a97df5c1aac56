//! The file registry: source files, their output routes and their progress.
//!
//! One [`Registry`] owns all three so they are created and destroyed
//! together. Components that care about changes subscribe to the broadcast
//! channel ([`Registry::subscribe`] or [`crate::stream::registry_events`])
//! rather than polling.
//!
//! Routes and removals are frozen while a batch is running; adding files is
//! always allowed and the new files simply join the next batch. Emitted and
//! failed files are terminal: their progress never changes again.

use crate::config::{ConversionConfig, OutputKind};
use crate::error::{ConvertError, ValidationError};
use crate::pipeline::input::{self, SourceData, SourceInput};
use crate::progress::{Checkpoint, ProgressEntry, RegistryEvent, MAX_IN_FLIGHT_PERCENT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 1024;

/// Identity of a registered file. Unique for the lifetime of the registry,
/// independent of the file's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl FileId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub data: SourceData,
}

impl SourceFile {
    /// File name without its final extension (`IMG_1.HEIC` → `IMG_1`).
    pub fn basename(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

struct Entry {
    file: SourceFile,
    route: OutputKind,
    percent: u8,
    failure: Option<String>,
}

impl Entry {
    fn is_pending(&self) -> bool {
        self.failure.is_none() && self.percent < Checkpoint::Emitted.percent()
    }

    fn snapshot(&self) -> ProgressEntry {
        ProgressEntry {
            id: self.file.id,
            name: self.file.name.clone(),
            route: self.route,
            percent: self.percent,
            failure: self.failure.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    next_id: u64,
    batch_active: bool,
    last_error: Option<String>,
}

impl Inner {
    fn entry_mut(&mut self, id: FileId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.file.id == id)
    }

    fn entry(&self, id: FileId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.file.id == id)
    }

    fn register(
        &mut self,
        source: SourceInput,
        config: &ConversionConfig,
        events: &mut Vec<RegistryEvent>,
    ) -> Result<FileId, ValidationError> {
        if let Err(e) = input::validate(&source, config) {
            warn!("Rejected {}: {}", source.name, e);
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        let id = FileId(self.next_id);
        self.next_id += 1;
        let route = config.output_kind;
        debug!("Registered {} as {} ({:?})", source.name, id, route);
        events.push(RegistryEvent::FileAdded {
            id,
            name: source.name.clone(),
            route,
        });
        self.entries.push(Entry {
            file: SourceFile {
                id,
                name: source.name,
                size: source.size,
                data: source.data,
            },
            route,
            percent: 0,
            failure: None,
        });
        Ok(id)
    }
}

/// Owned registry of source files, routes and progress entries.
pub struct Registry {
    inner: Mutex<Inner>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Registry")
            .field("files", &inner.entries.len())
            .field("batch_active", &inner.batch_active)
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
            events,
        }
    }

    /// Subscribe to registry events. Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: impl IntoIterator<Item = RegistryEvent>) {
        for ev in events {
            // No subscribers is not an error.
            let _ = self.events.send(ev);
        }
    }

    // ── Ingestion & routing ──────────────────────────────────────────────

    /// Register source files.
    ///
    /// Each input is validated independently against `config`; accepted files
    /// get the route `config.output_kind`. A rejected input leaves the
    /// registry untouched and becomes the latest error.
    pub fn add_files<I>(
        &self,
        inputs: I,
        config: &ConversionConfig,
    ) -> Vec<Result<FileId, ValidationError>>
    where
        I: IntoIterator<Item = SourceInput>,
    {
        let mut events = Vec::new();
        let results: Vec<_> = {
            let mut inner = self.lock();
            inputs
                .into_iter()
                .map(|source| inner.register(source, config, &mut events))
                .collect()
        };
        self.publish(events);
        results
    }

    /// Register a single source file. See [`Registry::add_files`].
    pub fn add_file(
        &self,
        source: SourceInput,
        config: &ConversionConfig,
    ) -> Result<FileId, ValidationError> {
        let mut events = Vec::new();
        let result = self.lock().register(source, config, &mut events);
        self.publish(events);
        result
    }

    /// Override one file's output route. Rejected while a batch runs.
    pub fn set_route(&self, id: FileId, route: OutputKind) -> Result<(), ConvertError> {
        {
            let mut inner = self.lock();
            if inner.batch_active {
                return Err(ConvertError::BatchInProgress);
            }
            let entry = inner
                .entry_mut(id)
                .ok_or(ConvertError::UnknownFile { id })?;
            if entry.route == route {
                return Ok(());
            }
            entry.route = route;
        }
        self.publish([RegistryEvent::RouteChanged { id, route }]);
        Ok(())
    }

    /// Delete a file together with its route and progress entry.
    pub fn remove_file(&self, id: FileId) -> Result<(), ConvertError> {
        {
            let mut inner = self.lock();
            if inner.batch_active {
                return Err(ConvertError::BatchInProgress);
            }
            let pos = inner
                .entries
                .iter()
                .position(|e| e.file.id == id)
                .ok_or(ConvertError::UnknownFile { id })?;
            inner.entries.remove(pos);
        }
        self.publish([RegistryEvent::FileRemoved { id }]);
        Ok(())
    }

    /// Delete every file. Returns how many were removed.
    pub fn remove_all(&self) -> Result<usize, ConvertError> {
        let removed = {
            let mut inner = self.lock();
            if inner.batch_active {
                return Err(ConvertError::BatchInProgress);
            }
            inner.last_error = None;
            std::mem::take(&mut inner.entries).len()
        };
        self.publish([RegistryEvent::Cleared]);
        Ok(removed)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in submission order.
    pub fn ids(&self) -> Vec<FileId> {
        self.lock().entries.iter().map(|e| e.file.id).collect()
    }

    pub fn route(&self, id: FileId) -> Option<OutputKind> {
        self.lock().entry(id).map(|e| e.route)
    }

    pub fn progress(&self, id: FileId) -> Option<u8> {
        self.lock().entry(id).map(|e| e.percent)
    }

    pub fn failure(&self, id: FileId) -> Option<String> {
        self.lock().entry(id).and_then(|e| e.failure.clone())
    }

    pub fn entry(&self, id: FileId) -> Option<ProgressEntry> {
        self.lock().entry(id).map(Entry::snapshot)
    }

    /// Snapshot of every entry in submission order.
    pub fn entries(&self) -> Vec<ProgressEntry> {
        self.lock().entries.iter().map(Entry::snapshot).collect()
    }

    /// The most recent error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn is_batch_active(&self) -> bool {
        self.lock().batch_active
    }

    /// Merging is only meaningful when the next batch would convert at
    /// least two document-routed files. Settled files do not count.
    pub fn merge_available(&self) -> bool {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.route == OutputKind::Document && e.is_pending())
            .count()
            >= 2
    }

    /// Every registered file is either emitted or terminally failed.
    pub fn is_batch_complete(&self) -> bool {
        self.lock().entries.iter().all(|e| e.snapshot().is_settled())
    }

    // ── Batch lifecycle (scheduler side) ─────────────────────────────────

    /// Freeze the registry and snapshot every file still awaiting output.
    ///
    /// Emitted and failed files are both terminal and are skipped. A failed
    /// file is resubmitted by removing it and adding it again, which gives
    /// it a fresh id and a fresh progress entry.
    pub(crate) fn begin_batch(&self) -> Result<Vec<(SourceFile, OutputKind)>, ConvertError> {
        let mut inner = self.lock();
        if inner.batch_active {
            return Err(ConvertError::BatchInProgress);
        }
        inner.batch_active = true;
        let snapshot = inner
            .entries
            .iter()
            .filter(|e| e.is_pending())
            .map(|e| (e.file.clone(), e.route))
            .collect();
        Ok(snapshot)
    }

    pub(crate) fn end_batch(&self) {
        self.lock().batch_active = false;
    }

    /// Raise a file's progress to `checkpoint`. Never lowers it and never
    /// reaches 100; use [`Registry::complete`] for that.
    pub(crate) fn advance(&self, id: FileId, checkpoint: Checkpoint) {
        let target = checkpoint.percent().min(MAX_IN_FLIGHT_PERCENT);
        let changed = {
            let mut inner = self.lock();
            match inner.entry_mut(id) {
                Some(e) if e.failure.is_none() && e.percent < target => {
                    e.percent = target;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish([RegistryEvent::Progress {
                id,
                percent: target,
            }]);
        }
    }

    /// Mark a file as successfully emitted (100%).
    pub(crate) fn complete(&self, id: FileId) {
        let percent = Checkpoint::Emitted.percent();
        let changed = {
            let mut inner = self.lock();
            match inner.entry_mut(id) {
                Some(e) if e.failure.is_none() && e.percent < percent => {
                    e.percent = percent;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish([RegistryEvent::Progress { id, percent }]);
        }
    }

    /// Record a terminal failure. `id` is `None` for failures that belong to
    /// no single file (a merge pass with nothing to assemble).
    pub(crate) fn fail(&self, id: Option<FileId>, message: impl Into<String>) {
        let message = message.into();
        {
            let mut inner = self.lock();
            if let Some(id) = id {
                if let Some(e) = inner.entry_mut(id) {
                    e.failure = Some(message.clone());
                }
            }
            inner.last_error = Some(message.clone());
        }
        self.publish([RegistryEvent::TaskFailed { id, message }]);
    }

    pub(crate) fn notify(&self, event: RegistryEvent) {
        self.publish([event]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, size: usize) -> SourceInput {
        SourceInput::from_bytes(name, vec![0u8; size])
    }

    fn registry_with(names: &[&str]) -> (Registry, Vec<FileId>) {
        let reg = Registry::new();
        let ids = reg
            .add_files(
                names.iter().map(|n| input(n, 16)),
                &ConversionConfig::default(),
            )
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        (reg, ids)
    }

    #[test]
    fn add_files_assigns_unique_ids_even_for_duplicate_names() {
        let (reg, ids) = registry_with(&["a.heic", "a.heic"]);
        assert_eq!(reg.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn oversize_file_leaves_registry_unchanged() {
        let (reg, _) = registry_with(&["a.heic"]);
        let config = ConversionConfig::builder().max_file_bytes(8).build().unwrap();
        let results = reg.add_files([input("big.heic", 9)], &config);
        assert!(matches!(
            results[0],
            Err(ValidationError::TooLarge { size: 9, limit: 8, .. })
        ));
        assert_eq!(reg.len(), 1);
        assert!(reg.last_error().unwrap().contains("big.heic"));
    }

    #[test]
    fn default_route_follows_global_output_kind() {
        let reg = Registry::new();
        let config = ConversionConfig::builder()
            .output_kind(OutputKind::Document)
            .build()
            .unwrap();
        let id = reg.add_files([input("a.heic", 4)], &config)[0]
            .clone()
            .unwrap();
        assert_eq!(reg.route(id), Some(OutputKind::Document));
    }

    #[test]
    fn remove_file_leaves_other_entries_untouched() {
        let (reg, ids) = registry_with(&["a.heic", "b.heic", "c.heic"]);
        reg.set_route(ids[2], OutputKind::Document).unwrap();
        reg.advance(ids[2], Checkpoint::Decoded);
        let before = reg.entry(ids[2]).unwrap();

        reg.remove_file(ids[1]).unwrap();

        assert_eq!(reg.ids(), vec![ids[0], ids[2]]);
        assert_eq!(reg.route(ids[1]), None);
        assert_eq!(reg.progress(ids[1]), None);
        assert_eq!(reg.entry(ids[2]).unwrap(), before);
    }

    #[test]
    fn remove_unknown_file_errors() {
        let reg = Registry::new();
        let err = reg.remove_file(FileId::from_raw(42)).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownFile { .. }));
    }

    #[test]
    fn routes_are_frozen_during_a_batch() {
        let (reg, ids) = registry_with(&["a.heic"]);
        let snapshot = reg.begin_batch().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(matches!(
            reg.set_route(ids[0], OutputKind::Document),
            Err(ConvertError::BatchInProgress)
        ));
        assert!(matches!(
            reg.remove_file(ids[0]),
            Err(ConvertError::BatchInProgress)
        ));
        assert!(matches!(reg.begin_batch(), Err(ConvertError::BatchInProgress)));
        reg.end_batch();
        reg.set_route(ids[0], OutputKind::Document).unwrap();
    }

    #[test]
    fn progress_is_monotonic_and_capped_below_100() {
        let (reg, ids) = registry_with(&["a.heic"]);
        let id = ids[0];
        reg.advance(id, Checkpoint::Decoded);
        reg.advance(id, Checkpoint::BytesRead);
        assert_eq!(reg.progress(id), Some(60));
        reg.advance(id, Checkpoint::Emitted);
        assert_eq!(reg.progress(id), Some(MAX_IN_FLIGHT_PERCENT));
        reg.complete(id);
        assert_eq!(reg.progress(id), Some(100));
    }

    #[test]
    fn failed_file_never_reaches_100() {
        let (reg, ids) = registry_with(&["a.heic"]);
        let id = ids[0];
        reg.advance(id, Checkpoint::DecodeStarted);
        reg.fail(Some(id), "a.heic: malformed image data");
        reg.complete(id);
        reg.advance(id, Checkpoint::Encoded);
        assert_eq!(reg.progress(id), Some(40));
        assert!(reg.failure(id).is_some());
        assert!(reg.is_batch_complete());
        assert_eq!(
            reg.last_error().as_deref(),
            Some("a.heic: malformed image data")
        );
    }

    #[test]
    fn begin_batch_skips_emitted_and_failed_files() {
        let (reg, ids) = registry_with(&["a.heic", "b.heic", "c.heic"]);
        reg.complete(ids[0]);
        reg.advance(ids[1], Checkpoint::DecodeStarted);
        reg.fail(Some(ids[1]), "nope");
        let mut rx = reg.subscribe();

        let snapshot = reg.begin_batch().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.id, ids[2]);
        assert_eq!(reg.failure(ids[1]).as_deref(), Some("nope"));
        assert_eq!(reg.progress(ids[1]), Some(40));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn merge_requires_two_document_routes() {
        let (reg, ids) = registry_with(&["a.heic", "b.heic"]);
        assert!(!reg.merge_available());
        reg.set_route(ids[0], OutputKind::Document).unwrap();
        assert!(!reg.merge_available());
        reg.set_route(ids[1], OutputKind::Document).unwrap();
        assert!(reg.merge_available());
    }

    #[test]
    fn settled_documents_do_not_count_towards_merge() {
        let (reg, ids) = registry_with(&["a.heic", "b.heic", "c.heic"]);
        for id in &ids {
            reg.set_route(*id, OutputKind::Document).unwrap();
        }
        reg.complete(ids[0]);
        reg.fail(Some(ids[1]), "nope");
        assert!(!reg.merge_available());
    }

    #[test]
    fn basename_strips_only_the_last_extension() {
        let (reg, ids) = registry_with(&["trip.day1.HEIC"]);
        let inner = reg.lock();
        let file = &inner.entry(ids[0]).unwrap().file;
        assert_eq!(file.basename(), "trip.day1");
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let (reg, ids) = registry_with(&["a.heic"]);
        let mut rx = reg.subscribe();
        reg.set_route(ids[0], OutputKind::Document).unwrap();
        reg.remove_all().unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::RouteChanged {
                id: ids[0],
                route: OutputKind::Document
            }
        );
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::Cleared);
        assert!(reg.is_empty());
    }
}
