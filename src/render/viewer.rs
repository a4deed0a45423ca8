//! Control side of the viewer: entry list, render scheduling and display
//!
//! Everything here runs on one thread. The only blocking waits are for the
//! worker to go idle before the entry list is reset or a changed file is
//! re-read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::Context;
use flume::RecvTimeoutError;
use image::imageops::{self, FilterType};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::DEFAULT_KEEP_DECODED;
use super::cache::EntryLru;
use super::color::{ColorSpace, srgb_to_linear};
use super::decode::{FileDecoder, ImageSource};
use super::entry::{Entry, ImageRecord, lock_buffers};
use super::generation::{Generation, GenerationGuard};
use super::queue::{RenderJob, RenderQueue};
use super::request::{RenderCompletion, RenderOutcome, RenderTicket};
use super::transform::{DisplayImage, RenderFingerprint, Size, build_linear, orient};
use super::tweaks::{PasteMask, TweakSet};
use super::worker::RenderWorker;
use crate::catalog::{self, Listing};
use crate::tweak_store::TweakStore;

/// Fill around the image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundStyle {
    #[default]
    Black,
    Dark,
    Mid,
    Light,
    White,
    /// Grey matching the luminance of the image border
    Auto,
}

impl BackgroundStyle {
    pub const ALL: [BackgroundStyle; 6] = [
        Self::Black,
        Self::Dark,
        Self::Mid,
        Self::Light,
        Self::White,
        Self::Auto,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::Dark => "dark",
            Self::Mid => "mid",
            Self::Light => "light",
            Self::White => "white",
            Self::Auto => "auto",
        }
    }

    /// Background color; `border_luma` is only used by `Auto`.
    #[must_use]
    pub fn fill(self, border_luma: f64) -> [u8; 3] {
        let grey = match self {
            Self::Black => 0x00,
            Self::Dark => 0x40,
            Self::Mid => 0x80,
            Self::Light => 0xc0,
            Self::White => 0xff,
            Self::Auto => (border_luma.clamp(0.0, 1.0) * 255.0) as u8,
        };
        [grey; 3]
    }
}

/// What the display sink receives
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub image: Arc<DisplayImage>,
    pub background: [u8; 3],
    /// Quick rendition of the source shown until the real render arrives
    pub provisional: bool,
}

/// Receives frames on the control thread
pub trait DisplaySink {
    fn present(&mut self, frame: Frame);
}

impl DisplaySink for Vec<Frame> {
    fn present(&mut self, frame: Frame) {
        self.push(frame);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewerConfig {
    /// Decoded images kept besides the displayed one
    pub keep_decoded: usize,
    pub viewport: Size,
    pub scale_to_fit: bool,
    pub tweaks_enabled: bool,
    pub background: BackgroundStyle,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            keep_decoded: DEFAULT_KEEP_DECODED,
            viewport: Size::new(1280, 800),
            scale_to_fit: true,
            tweaks_enabled: true,
            background: BackgroundStyle::Black,
        }
    }
}

pub struct Viewer<S: DisplaySink> {
    dir: PathBuf,
    entries: Vec<Entry>,
    first_file: usize,
    current: Option<usize>,
    queue: RenderQueue,
    lru: EntryLru,
    in_flight: bool,
    dispatching: bool,
    generation: GenerationGuard,
    worker: RenderWorker,
    source: Box<dyn ImageSource>,
    store: Box<dyn TweakStore>,
    sink: S,
    config: ViewerConfig,
    clipboard: Option<TweakSet>,
    last_presented: Option<Frame>,
}

impl<S: DisplaySink> Viewer<S> {
    pub fn new(
        config: ViewerConfig,
        source: Box<dyn ImageSource>,
        store: Box<dyn TweakStore>,
        sink: S,
    ) -> anyhow::Result<Self> {
        let generation = GenerationGuard::new();
        let worker = RenderWorker::spawn(generation.clone()).context("starting render worker")?;
        Ok(Self {
            dir: PathBuf::new(),
            entries: Vec::new(),
            first_file: 0,
            current: None,
            queue: RenderQueue::new(),
            lru: EntryLru::new(),
            in_flight: false,
            dispatching: false,
            generation,
            worker,
            source,
            store,
            sink,
            config,
            clipboard: None,
            last_presented: None,
        })
    }

    /// Viewer decoding from the filesystem
    pub fn with_files(
        config: ViewerConfig,
        store: Box<dyn TweakStore>,
        sink: S,
    ) -> anyhow::Result<Self> {
        Self::new(config, Box::new(FileDecoder), store, sink)
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub fn current_entry(&self) -> Option<&Entry> {
        self.current.and_then(|i| self.entries.get(i))
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn first_file(&self) -> usize {
        self.first_file
    }

    #[must_use]
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation.current()
    }

    #[must_use]
    pub fn is_render_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Pending jobs from head to tail; the tail is served next
    #[must_use]
    pub fn queued_jobs(&self) -> Vec<RenderJob> {
        self.queue.iter().copied().collect()
    }

    /// Decoded entries eligible for eviction, most recent first
    #[must_use]
    pub fn lru_entries(&self) -> Vec<usize> {
        self.lru.entries()
    }

    /// Entries other than the displayed one that hold decoded pixels
    #[must_use]
    pub fn decoded_count(&self) -> usize {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| Some(*i) != self.current && e.is_decoded())
            .count()
    }

    #[must_use]
    pub fn clipboard(&self) -> Option<&TweakSet> {
        self.clipboard.as_ref()
    }

    /// Open a file or directory, replacing the current listing
    pub fn open(&mut self, path: &Path) -> anyhow::Result<()> {
        let listing =
            catalog::scan(path).with_context(|| format!("opening {}", path.display()))?;
        self.install(listing, None);
        Ok(())
    }

    /// Replace the listing with the directory at `index`
    pub fn enter_directory(&mut self, index: usize) -> anyhow::Result<bool> {
        let Some(entry) = self.entries.get(index) else {
            return Ok(false);
        };
        if !entry.is_dir {
            return Ok(false);
        }
        let path = entry.path.clone();
        let listing =
            catalog::scan_dir(&path).with_context(|| format!("entering {}", path.display()))?;
        self.install(listing, None);
        Ok(true)
    }

    /// Re-read the directory, keeping the displayed file selected if it still exists
    pub fn rescan(&mut self) -> anyhow::Result<()> {
        let keep = self.current_entry().map(|e| e.name.clone());
        let listing = catalog::scan_dir(&self.dir)
            .with_context(|| format!("rescanning {}", self.dir.display()))?;
        self.install(listing, keep.as_deref());
        Ok(())
    }

    fn install(&mut self, listing: Listing, prefer: Option<&str>) {
        self.discard_entries();
        let Listing {
            dir,
            entries,
            first_file,
            selected,
        } = listing;
        self.dir = dir;
        self.entries = entries;
        self.first_file = first_file;

        let preferred = selected.or_else(|| {
            prefer.and_then(|name| self.entries.iter().position(|e| e.name == name))
        });
        if let Some(index) = preferred {
            if self.switch_to(index) {
                return;
            }
        }
        self.show_first_image();
    }

    fn show_first_image(&mut self) -> bool {
        for index in self.first_file..self.entries.len() {
            if self.switch_to(index) {
                return true;
            }
        }
        false
    }

    /// Drop every entry. Waits for the render in flight, then invalidates its
    /// result and anything still queued.
    pub fn discard_entries(&mut self) {
        self.worker.wait_idle();
        let generation = self.generation.advance();
        debug!(
            "Discarding {} entries, generation now {}",
            self.entries.len(),
            generation.0
        );

        self.current = None;
        self.queue.clear();
        self.lru.clear();
        self.entries.clear();
        self.first_file = 0;
        self.in_flight = false;
        self.last_presented = None;
        self.flush_store();
    }

    /// Take `index` out of the listing, e.g. after its file was deleted.
    /// Other decoded images stay cached.
    pub fn remove_entry(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        self.worker.wait_idle();
        self.generation.advance();
        self.in_flight = false;

        let removed = self.entries.remove(index);
        info!("Removed {} from the listing", removed.name);
        self.lru.remap_after_removal(index);
        self.queue.remap_after_removal(index);
        if index < self.first_file {
            self.first_file -= 1;
        }

        match self.current {
            Some(c) if c == index => {
                self.current = None;
                self.last_presented = None;
                let replaced = (index..self.entries.len())
                    .chain((self.first_file..index).rev())
                    .any(|i| self.switch_to(i));
                if !replaced {
                    debug!("No image left to show");
                    self.current = None;
                }
            }
            Some(c) => {
                if c > index {
                    self.current = Some(c - 1);
                }
                // The completion of a render that finished before the advance
                // is dropped as stale, so show its buffers from here.
                self.rescale_current();
                if self.current_corrected().is_none() {
                    if let Some(current) = self.current {
                        self.queue.enqueue(current, false, false);
                    }
                }
            }
            None => {}
        }
        self.dispatch_next();
        true
    }

    /// Make `index` the displayed entry. Returns false if it cannot be shown;
    /// it stays current anyway.
    pub fn switch_to(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        if self.current == Some(index) {
            return true;
        }

        if let Some(old) = self.current {
            if self.entries[old].is_decoded() {
                self.lru.touch(old, Some(index));
            }
        }
        self.current = Some(index);
        self.lru.remove(index);

        if !self.load(index, true) {
            return false;
        }
        info!("Showing {}", self.entries[index].name);
        self.rescale_current();
        true
    }

    /// Step to the next image and prefetch the one after it
    pub fn next_image(&mut self) -> bool {
        let Some(mut next) = self.current else {
            return false;
        };
        let mut switched = false;
        while next + 1 < self.entries.len() {
            next += 1;
            if self.switch_to(next) {
                switched = true;
                break;
            }
        }
        if next + 1 < self.entries.len() {
            self.enqueue_render(next + 1, false, true);
        }
        switched
    }

    /// Step to the previous image and prefetch the one before it.
    /// Stops at directories.
    pub fn prev_image(&mut self) -> bool {
        let Some(mut prev) = self.current else {
            return false;
        };
        let mut switched = false;
        while prev > 0 {
            prev -= 1;
            if self.entries[prev].is_dir {
                return false;
            }
            if self.switch_to(prev) {
                switched = true;
                break;
            }
        }
        if prev > 0 && !self.entries[prev - 1].is_dir {
            self.enqueue_render(prev - 1, false, true);
        }
        switched
    }

    /// Decode `index` unless its pixels are already loaded and the file is
    /// unchanged. Returns false if the entry has no image.
    pub fn load(&mut self, index: usize, queue: bool) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.is_dir {
            return false;
        }

        let modified = self.source.modified(&entry.path);
        if entry.record.is_some() {
            if entry.modified == modified {
                return true;
            }
            info!("{} changed on disk, reloading", entry.name);
            self.worker.wait_idle();
            entry.discard_record();
            entry.tweaks = TweakSet::neutral();
        }

        let decoded = match self.source.decode(&entry.path) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("{e}");
                entry.hash = None;
                return false;
            }
        };
        entry.hash = match self.source.content_hash(&entry.path) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("No content hash for {}: {e}", entry.name);
                None
            }
        };
        entry.modified = modified;
        entry.record = Some(ImageRecord::new(decoded));
        if let Some(stored) = entry.hash.as_deref().and_then(|h| self.store.load(h)) {
            entry.tweaks = stored;
        }
        debug!("Decoded {} ({})", entry.name, entry.tweaks);

        if self.current != Some(index) {
            self.lru.touch(index, self.current);
        }
        if queue {
            self.enqueue_render(index, false, false);
        }
        true
    }

    /// Queue a render for `index`, merging with a queued one, and try to dispatch.
    pub fn enqueue_render(&mut self, index: usize, changed: bool, load: bool) {
        self.queue.enqueue(index, changed, load);
        self.dispatch_next();
    }

    /// Submit the next job unless a render is in flight. The displayed entry
    /// goes first.
    pub fn dispatch_next(&mut self) {
        if self.dispatching {
            error!("Render dispatch re-entered");
            std::process::abort();
        }
        self.dispatching = true;
        self.dispatch_queued();
        self.dispatching = false;
    }

    fn dispatch_queued(&mut self) {
        if let Some(current) = self.current {
            self.queue.promote(current);
        }

        loop {
            if self.in_flight {
                return;
            }
            let Some(job) = self.queue.pop() else {
                return;
            };
            if job.index >= self.entries.len() {
                continue;
            }
            if job.load {
                self.load(job.index, false);
            }

            let entry = &self.entries[job.index];
            let Some(record) = &entry.record else {
                continue;
            };
            if job.changed {
                lock_buffers(&record.buffers).invalidate_corrected();
            }
            if !self.worker.permit().try_acquire() {
                error!("Render permit unavailable while no render is in flight");
                std::process::abort();
            }

            let ticket = RenderTicket {
                index: job.index,
                generation: self.generation.current(),
                tweaks: self.effective_tweaks(entry),
                target: self.config.viewport,
                record: record.clone(),
            };
            debug!("Dispatching render of {}", entry.name);
            self.in_flight = true;
            if let Err(e) = self.worker.submit(ticket) {
                error!("{e}");
                self.in_flight = false;
            }
            return;
        }
    }

    /// Handle every completion that has arrived. Returns how many there were.
    pub fn poll_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Some(completion) = self.worker.try_recv() {
            self.on_complete(completion);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for one completion and handle it
    pub fn wait_for_render(&mut self, timeout: Duration) -> bool {
        match self.worker.recv_timeout(timeout) {
            Ok(completion) => {
                self.on_complete(completion);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                error!("Render worker is gone");
                false
            }
        }
    }

    /// Process completions until nothing is queued or in flight.
    /// Returns false if `timeout` ran out first.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_completions();
            if !self.in_flight {
                if self.queue.is_empty() {
                    return true;
                }
                self.dispatch_next();
                if !self.in_flight {
                    return self.queue.is_empty();
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_for_render(deadline - now);
        }
    }

    fn on_complete(&mut self, completion: RenderCompletion) {
        if !self.generation.is_current(completion.generation) {
            debug!(
                "Dropping render of entry {} from generation {}",
                completion.index, completion.generation.0
            );
            return;
        }

        self.in_flight = false;
        match &completion.outcome {
            RenderOutcome::Rendered => debug!("Rendered entry {}", completion.index),
            RenderOutcome::Failed(reason) => {
                warn!("Render of entry {} failed: {reason}", completion.index);
            }
            RenderOutcome::Aborted | RenderOutcome::Stale => {
                debug!("Render of entry {} produced nothing", completion.index);
            }
        }

        self.prune_lru();
        if self.current == Some(completion.index) {
            self.rescale_current();
        }
        self.dispatch_next();
    }

    /// Evict decoded images beyond the configured count. Only while idle.
    fn prune_lru(&mut self) {
        let evicted = self.lru.prune(self.config.keep_decoded);
        if evicted.is_empty() {
            return;
        }
        for &index in &evicted {
            if let Some(entry) = self.entries.get_mut(index) {
                debug!("Evicting {}", entry.name);
                entry.discard_record();
            }
        }
        let current = self.current;
        self.queue
            .retain(|job| Some(job.index) == current || !evicted.contains(&job.index));
    }

    fn effective_tweaks(&self, entry: &Entry) -> TweakSet {
        if self.config.tweaks_enabled {
            entry.tweaks.clone()
        } else {
            TweakSet::neutral()
        }
    }

    /// Show the best available rendition of the current entry
    pub fn rescale_current(&mut self) {
        let Some(index) = self.current else {
            return;
        };
        let entry = &self.entries[index];
        let Some(record) = &entry.record else {
            return;
        };

        let tweaks = self.effective_tweaks(entry);
        let fit = self.config.scale_to_fit;
        let viewport = self.config.viewport;
        let source_size = Size::of(&record.on_disk);
        let wanted = source_size.oriented(tweaks.rotation).fit_within(viewport);
        let background = self
            .config
            .background
            .fill(record.border.visible(source_size, viewport));

        let (preferred, stale) = {
            let buffers = lock_buffers(&record.buffers);
            let cached = if fit {
                buffers.scaled.clone()
            } else {
                buffers.corrected.clone()
            };
            match cached {
                Some(image)
                    if buffers.fingerprint == Some(RenderFingerprint::of(&tweaks))
                        && (!fit || Size::of(&image) == wanted) =>
                {
                    (Some(image), false)
                }
                Some(_) => (None, true),
                None => (None, false),
            }
        };

        let (image, provisional) = match preferred {
            Some(image) => (image, false),
            None => {
                let oriented = orient((*record.on_disk).clone(), tweaks.rotation, tweaks.mirrored);
                let quick = if fit && !wanted.is_empty() && Size::of(&oriented) != wanted {
                    imageops::resize(&oriented, wanted.width, wanted.height, FilterType::Nearest)
                } else {
                    oriented
                };
                (Arc::new(quick), true)
            }
        };

        if stale {
            self.enqueue_render(index, false, false);
        }
        self.present(Frame {
            index,
            image,
            background,
            provisional,
        });
    }

    fn present(&mut self, frame: Frame) {
        if self.last_presented.as_ref() == Some(&frame) {
            return;
        }
        self.last_presented = Some(frame.clone());
        self.sink.present(frame);
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        if self.config.viewport != viewport {
            self.config.viewport = viewport;
            self.rescale_current();
        }
    }

    pub fn set_scale_to_fit(&mut self, fit: bool) {
        if self.config.scale_to_fit != fit {
            self.config.scale_to_fit = fit;
            self.rescale_current();
        }
    }

    pub fn set_background(&mut self, style: BackgroundStyle) {
        if self.config.background != style {
            self.config.background = style;
            self.rescale_current();
        }
    }

    /// Switch between the stored tweaks and the untouched image
    pub fn set_tweaks_enabled(&mut self, enabled: bool) {
        if self.config.tweaks_enabled == enabled {
            return;
        }
        self.config.tweaks_enabled = enabled;
        if let Some(index) = self.current {
            self.enqueue_render(index, true, false);
        }
    }

    /// Full-resolution corrected image of the current entry, if rendered for
    /// its present tweaks
    #[must_use]
    pub fn current_corrected(&self) -> Option<Arc<DisplayImage>> {
        let entry = self.current_entry()?;
        let record = entry.record.as_ref()?;
        let fingerprint = RenderFingerprint::of(&self.effective_tweaks(entry));
        let buffers = lock_buffers(&record.buffers);
        if buffers.fingerprint == Some(fingerprint) {
            buffers.corrected.clone()
        } else {
            None
        }
    }

    /// Apply `edit` to the current tweaks. An effective change is persisted and
    /// re-rendered. A failed save is returned but the change stays in effect.
    fn update_tweaks(&mut self, edit: impl FnOnce(&mut TweakSet)) -> anyhow::Result<bool> {
        let Some(index) = self.current else {
            return Ok(false);
        };
        let entry = &mut self.entries[index];
        let before = entry.tweaks.clone();
        edit(&mut entry.tweaks);
        if entry.tweaks == before {
            return Ok(false);
        }
        debug!("Tweaks for {}: {}", entry.name, entry.tweaks);

        let reoriented = entry.tweaks.rotation != before.rotation
            || entry.tweaks.mirrored != before.mirrored;

        let saved = match entry.hash.as_deref() {
            Some(hash) => self.store.save(hash, &entry.tweaks),
            None => Ok(()),
        };
        self.enqueue_render(index, true, false);
        if reoriented {
            self.rescale_current();
        }
        if let Err(e) = &saved {
            warn!("Failed to save tweaks: {e:#}");
        }
        saved.context("saving tweaks").map(|()| true)
    }

    /// Replace the current tweaks wholesale
    pub fn apply_tweaks(&mut self, tweaks: TweakSet) -> anyhow::Result<bool> {
        self.update_tweaks(|t| *t = tweaks)
    }

    pub fn set_black_level(&mut self, level: u8) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.black_level = level)
    }

    pub fn set_gamma(&mut self, gamma: i32) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.set_gamma(gamma))
    }

    pub fn set_brightness(&mut self, brightness: i32) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.set_brightness(brightness))
    }

    pub fn set_saturation(&mut self, saturation: i32) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.set_saturation(saturation))
    }

    pub fn set_white(&mut self, white: [u8; 3]) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.white = white)
    }

    pub fn set_color_space(&mut self, index: u8) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.color_space_index = index)
    }

    pub fn rotate_clockwise(&mut self) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.rotation = t.rotation.clockwise())
    }

    pub fn rotate_counter_clockwise(&mut self) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.rotation = t.rotation.counter_clockwise())
    }

    pub fn toggle_mirror(&mut self) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.mirrored = !t.mirrored)
    }

    pub fn clear_white(&mut self) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.white = TweakSet::neutral().white)
    }

    pub fn clear_black(&mut self) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.black_level = 0)
    }

    pub fn clear_gamma(&mut self) -> anyhow::Result<bool> {
        self.update_tweaks(|t| t.gamma = 0)
    }

    /// Set the black level so the darkest pixel average becomes black
    pub fn auto_black(&mut self) -> anyhow::Result<bool> {
        let Some(entry) = self.current_entry() else {
            return Ok(false);
        };
        let Some(record) = &entry.record else {
            return Ok(false);
        };

        let space = ColorSpace::resolve(entry.tweaks.color_space_index, record.embedded);
        let cached = lock_buffers(&record.buffers)
            .linear
            .clone()
            .filter(|linear| linear.color_space == space);
        let linear = match cached {
            Some(linear) => linear,
            None => {
                let linear = build_linear(&record.on_disk, space, &AtomicBool::new(false))
                    .context("measuring black level")?;
                lock_buffers(&record.buffers).linear = Some(linear.clone());
                linear
            }
        };

        let level = linear.stats.auto_black_level();
        self.update_tweaks(|t| t.black_level = level)
    }

    /// Use the source pixel at `x`, `y` as the white point
    pub fn pick_white_at(&mut self, x: u32, y: u32) -> anyhow::Result<bool> {
        let Some(record) = self.current_entry().and_then(|e| e.record.as_ref()) else {
            return Ok(false);
        };
        let Some(pixel) = record.on_disk.get_pixel_checked(x, y) else {
            return Ok(false);
        };
        let white = pixel.0.map(|c| (srgb_to_linear(c) * 255.0) as u8);
        self.update_tweaks(|t| t.white = white)
    }

    /// Remember the current tweaks for pasting onto other images
    pub fn copy_tweaks(&mut self) -> bool {
        match self.current_entry() {
            Some(entry) => {
                self.clipboard = Some(entry.tweaks.clone());
                true
            }
            None => false,
        }
    }

    pub fn paste_tweaks(&mut self, mask: PasteMask) -> anyhow::Result<bool> {
        let Some(from) = self.clipboard.clone() else {
            return Ok(false);
        };
        self.update_tweaks(|t| {
            mask.apply(&from, t);
        })
    }

    /// Write batched tweak changes
    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.store.flush()
    }

    fn flush_store(&mut self) {
        if let Err(e) = self.store.flush() {
            warn!("Failed to save tweaks: {e:#}");
        }
    }
}

impl<S: DisplaySink> Drop for Viewer<S> {
    fn drop(&mut self) {
        self.flush_store();
    }
}
