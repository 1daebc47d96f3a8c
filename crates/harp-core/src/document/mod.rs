//! Document graph: audio sources, modifications and playback regions
//!
//! The host owns the document structure. Here it is modelled as an arena
//! keyed by integer handles, so renderers and jobs refer to entities by id
//! and a region removed mid-job simply stops resolving.
//!
//! ```text
//! AudioSource 1──* AudioModification 1──* PlaybackRegion
//! ```
//!
//! Structural edits go through [`Document::edit`] (write lock). The audio
//! thread only ever calls [`Document::processing_lock`], a `try_read` that
//! gives up instead of waiting. Processed audio is not covered by the lock:
//! it is published through a `basedrop::SharedCell` on each modification.

pub mod archive;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use basedrop::{Handle, Shared, SharedCell};
use thiserror::Error;

use crate::time_map::RegionTiming;
use crate::types::{AudioBuffer, SourceAudio};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle_type!(
    /// Handle of an [`AudioSource`]
    SourceId
);
handle_type!(
    /// Handle of an [`AudioModification`]
    ModificationId
);
handle_type!(
    /// Handle of a [`PlaybackRegion`]
    RegionId
);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Unknown audio source: {0}")]
    UnknownSource(SourceId),

    #[error("Unknown audio modification: {0}")]
    UnknownModification(ModificationId),

    #[error("Unknown playback region: {0}")]
    UnknownRegion(RegionId),
}

/// Original audio provided by the host
#[derive(Debug)]
pub struct AudioSource {
    id: SourceId,
    persistent_id: String,
    audio: SourceAudio,
}

impl AudioSource {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn persistent_id(&self) -> &str {
        &self.persistent_id
    }

    pub fn name(&self) -> &str {
        &self.audio.name
    }

    pub fn sample_rate(&self) -> f64 {
        self.audio.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.audio.buffer.num_channels()
    }

    pub fn num_frames(&self) -> usize {
        self.audio.buffer.num_frames()
    }

    pub fn audio(&self) -> &SourceAudio {
        &self.audio
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.audio.buffer
    }
}

/// Per-source edit state: processed audio plus dimmed/modified flags
///
/// Processed buffers are stored at the source sample rate.
pub struct AudioModification {
    id: ModificationId,
    source: SourceId,
    persistent_id: String,
    dimmed: AtomicBool,
    modified: AtomicBool,
    /// Bumped whenever what this modification sounds like changes
    version: AtomicU64,
    processed: SharedCell<Option<AudioBuffer>>,
    gc: Handle,
}

impl fmt::Debug for AudioModification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioModification")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("persistent_id", &self.persistent_id)
            .field("dimmed", &self.is_dimmed())
            .field("modified", &self.is_modified())
            .field("version", &self.version())
            .finish()
    }
}

impl AudioModification {
    fn new(id: ModificationId, source: SourceId, persistent_id: String, gc: Handle) -> Self {
        Self {
            id,
            source,
            persistent_id,
            dimmed: AtomicBool::new(false),
            modified: AtomicBool::new(false),
            version: AtomicU64::new(0),
            processed: SharedCell::new(Shared::new(&gc, None)),
            gc,
        }
    }

    pub fn id(&self) -> ModificationId {
        self.id
    }

    pub fn source_id(&self) -> SourceId {
        self.source
    }

    pub fn persistent_id(&self) -> &str {
        &self.persistent_id
    }

    pub fn is_dimmed(&self) -> bool {
        self.dimmed.load(Ordering::Acquire)
    }

    /// Returns true if the state changed
    pub fn set_dimmed(&self, dimmed: bool) -> bool {
        let changed = self.dimmed.swap(dimmed, Ordering::AcqRel) != dimmed;
        if changed {
            self.bump_version();
        }
        changed
    }

    /// True once processed audio replaces the original
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Currently published processed buffer (real-time safe)
    pub fn processed(&self) -> Shared<Option<AudioBuffer>> {
        self.processed.get()
    }

    /// Publish a new processed buffer and mark the modification as modified
    pub fn publish(&self, buffer: AudioBuffer) {
        self.processed.set(Shared::new(&self.gc, Some(buffer)));
        self.modified.store(true, Ordering::Release);
        self.bump_version();
    }

    /// Put back an earlier state (used by undo)
    pub fn restore(&self, buffer: Option<AudioBuffer>, modified: bool) {
        self.processed.set(Shared::new(&self.gc, buffer));
        self.modified.store(modified, Ordering::Release);
        self.bump_version();
    }

    /// The audio this modification currently plays: processed if modified,
    /// the source otherwise
    pub fn current_audio(&self, source: &AudioSource) -> AudioBuffer {
        if self.is_modified() {
            let processed = self.processed();
            if let Some(buffer) = &*processed {
                return buffer.clone();
            }
        }
        source.buffer().clone()
    }
}

/// A placement of a modification on the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRegion {
    pub id: RegionId,
    pub modification: ModificationId,
    pub timing: RegionTiming,
    /// Participates in the next processing job
    pub selected: bool,
}

/// A modification to run through the model, with the source it edits
#[derive(Debug, Clone)]
pub struct ProcessTarget {
    pub modification: Arc<AudioModification>,
    pub source: Arc<AudioSource>,
}

impl ProcessTarget {
    /// What the modification currently sounds like, at the source rate
    pub fn current_audio(&self) -> SourceAudio {
        SourceAudio::new(
            self.source.name(),
            self.source.sample_rate(),
            self.modification.current_audio(&self.source),
        )
    }
}

/// The arena itself, accessed through [`Document`]
pub struct DocumentGraph {
    sources: BTreeMap<SourceId, Arc<AudioSource>>,
    modifications: BTreeMap<ModificationId, Arc<AudioModification>>,
    regions: BTreeMap<RegionId, PlaybackRegion>,
    next_id: u64,
    gc: Handle,
}

impl DocumentGraph {
    fn new(gc: Handle) -> Self {
        Self {
            sources: BTreeMap::new(),
            modifications: BTreeMap::new(),
            regions: BTreeMap::new(),
            next_id: 1,
            gc,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_source(&mut self, persistent_id: impl Into<String>, audio: SourceAudio) -> SourceId {
        let id = SourceId(self.allocate_id());
        let persistent_id = persistent_id.into();
        log::debug!("DocumentGraph::add_source: {} '{}' ({})", id, audio.name, persistent_id);
        self.sources.insert(
            id,
            Arc::new(AudioSource {
                id,
                persistent_id,
                audio,
            }),
        );
        id
    }

    pub fn add_modification(
        &mut self,
        source: SourceId,
        persistent_id: impl Into<String>,
    ) -> Result<ModificationId, DocumentError> {
        if !self.sources.contains_key(&source) {
            return Err(DocumentError::UnknownSource(source));
        }
        let id = ModificationId(self.allocate_id());
        let modification = AudioModification::new(id, source, persistent_id.into(), self.gc.clone());
        self.modifications.insert(id, Arc::new(modification));
        Ok(id)
    }

    pub fn add_region(
        &mut self,
        modification: ModificationId,
        timing: RegionTiming,
    ) -> Result<RegionId, DocumentError> {
        if !self.modifications.contains_key(&modification) {
            return Err(DocumentError::UnknownModification(modification));
        }
        let id = RegionId(self.allocate_id());
        self.regions.insert(
            id,
            PlaybackRegion {
                id,
                modification,
                timing,
                selected: false,
            },
        );
        Ok(id)
    }

    pub fn remove_region(&mut self, id: RegionId) -> Result<PlaybackRegion, DocumentError> {
        self.regions.remove(&id).ok_or(DocumentError::UnknownRegion(id))
    }

    /// Remove a modification and every region placing it
    pub fn remove_modification(&mut self, id: ModificationId) -> Result<(), DocumentError> {
        self.modifications
            .remove(&id)
            .ok_or(DocumentError::UnknownModification(id))?;
        self.regions.retain(|_, region| region.modification != id);
        Ok(())
    }

    /// Remove a source with its modifications and their regions
    pub fn remove_source(&mut self, id: SourceId) -> Result<(), DocumentError> {
        self.sources.remove(&id).ok_or(DocumentError::UnknownSource(id))?;
        let orphaned: Vec<ModificationId> = self
            .modifications
            .values()
            .filter(|m| m.source_id() == id)
            .map(|m| m.id())
            .collect();
        for modification in orphaned {
            self.remove_modification(modification)?;
        }
        Ok(())
    }

    pub fn source(&self, id: SourceId) -> Option<&Arc<AudioSource>> {
        self.sources.get(&id)
    }

    pub fn modification(&self, id: ModificationId) -> Option<&Arc<AudioModification>> {
        self.modifications.get(&id)
    }

    pub fn region(&self, id: RegionId) -> Option<&PlaybackRegion> {
        self.regions.get(&id)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut PlaybackRegion> {
        self.regions.get_mut(&id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<AudioSource>> {
        self.sources.values()
    }

    pub fn modifications(&self) -> impl Iterator<Item = &Arc<AudioModification>> {
        self.modifications.values()
    }

    pub fn regions(&self) -> impl Iterator<Item = &PlaybackRegion> {
        self.regions.values()
    }

    /// Source feeding a modification
    pub fn source_of(&self, modification: ModificationId) -> Option<&Arc<AudioSource>> {
        let modification = self.modifications.get(&modification)?;
        self.sources.get(&modification.source_id())
    }

    /// Modification and source a region plays
    pub fn resolve_region(&self, id: RegionId) -> Option<(&PlaybackRegion, &Arc<AudioModification>, &Arc<AudioSource>)> {
        let region = self.regions.get(&id)?;
        let modification = self.modifications.get(&region.modification)?;
        let source = self.sources.get(&modification.source_id())?;
        Some((region, modification, source))
    }

    pub fn set_region_selected(&mut self, id: RegionId, selected: bool) -> Result<(), DocumentError> {
        let region = self.regions.get_mut(&id).ok_or(DocumentError::UnknownRegion(id))?;
        region.selected = selected;
        Ok(())
    }

    /// Distinct modifications of all selected regions, with their sources
    pub fn selected_targets(&self) -> Vec<ProcessTarget> {
        let mut seen = Vec::new();
        let mut targets = Vec::new();
        for region in self.regions.values().filter(|r| r.selected) {
            if seen.contains(&region.modification) {
                continue;
            }
            seen.push(region.modification);
            if let (Some(modification), Some(source)) =
                (self.modification(region.modification), self.source_of(region.modification))
            {
                targets.push(ProcessTarget {
                    modification: modification.clone(),
                    source: source.clone(),
                });
            }
        }
        targets
    }

    pub fn find_modification(&self, persistent_id: &str) -> Option<&Arc<AudioModification>> {
        self.modifications
            .values()
            .find(|m| m.persistent_id() == persistent_id)
    }
}

/// Which region the editor is previewing, written by the UI and read by the
/// editor renderer without locking
#[derive(Debug, Default)]
pub struct PreviewState {
    /// Region id, 0 when nothing is previewed
    region: AtomicU64,
    /// Preview position in playback seconds (f64 bits)
    time: AtomicU64,
}

impl PreviewState {
    pub fn set(&self, region: RegionId, time_in_playback: f64) {
        self.time.store(time_in_playback.to_bits(), Ordering::Release);
        self.region.store(region.0, Ordering::Release);
    }

    pub fn clear(&self) {
        self.region.store(0, Ordering::Release);
    }

    pub fn get(&self) -> Option<(RegionId, f64)> {
        match self.region.load(Ordering::Acquire) {
            0 => None,
            id => Some((RegionId(id), f64::from_bits(self.time.load(Ordering::Acquire)))),
        }
    }
}

/// Shared handle to the document graph
#[derive(Clone)]
pub struct Document {
    graph: Arc<RwLock<DocumentGraph>>,
    preview: Arc<PreviewState>,
}

impl Document {
    pub fn new(gc: Handle) -> Self {
        Self {
            graph: Arc::new(RwLock::new(DocumentGraph::new(gc))),
            preview: Arc::new(PreviewState::default()),
        }
    }

    /// Exclusive access for structural edits (blocks until renderers finish
    /// their current block)
    pub fn edit(&self) -> RwLockWriteGuard<'_, DocumentGraph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared access for the UI and job threads
    pub fn read(&self) -> RwLockReadGuard<'_, DocumentGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking shared access for the audio thread
    ///
    /// `None` while an edit is in progress.
    pub fn processing_lock(&self) -> Option<RwLockReadGuard<'_, DocumentGraph>> {
        match self.graph.try_read() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn preview(&self) -> &PreviewState {
        &self.preview
    }
}
