//! Directory entries and the decoded data they own

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::color::ColorSpace;
use super::decode::{BorderAverages, DecodedImage};
use super::transform::{DisplayImage, LinearBuffer, RenderFingerprint, RenderOutput, RenderSource};
use super::tweaks::TweakSet;

/// Derived buffers shared with the render worker
#[derive(Debug, Default)]
pub struct RenderBuffers {
    pub linear: Option<LinearBuffer>,
    pub corrected: Option<Arc<DisplayImage>>,
    pub scaled: Option<Arc<DisplayImage>>,
    /// What `corrected` and `scaled` were built with
    pub fingerprint: Option<RenderFingerprint>,
}

impl RenderBuffers {
    /// Forget `corrected` and `scaled`, keeping `linear`
    pub fn invalidate_corrected(&mut self) {
        self.corrected = None;
        self.scaled = None;
        self.fingerprint = None;
    }

    pub fn store(&mut self, output: RenderOutput) {
        if output.linear.is_some() {
            self.linear = output.linear;
        }
        self.corrected = Some(output.corrected);
        self.scaled = Some(output.scaled);
        self.fingerprint = Some(output.fingerprint);
    }
}

pub type SharedBuffers = Arc<Mutex<RenderBuffers>>;

/// Lock shared buffers, recovering from a poisoned mutex
pub fn lock_buffers(buffers: &SharedBuffers) -> MutexGuard<'_, RenderBuffers> {
    buffers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decoded source plus everything derived from it.
/// Clones share the same pixels and buffers.
#[derive(Clone, Debug)]
pub struct ImageRecord {
    pub on_disk: Arc<DisplayImage>,
    pub embedded: Option<ColorSpace>,
    pub border: BorderAverages,
    pub buffers: SharedBuffers,
}

impl ImageRecord {
    #[must_use]
    pub fn new(decoded: DecodedImage) -> Self {
        let border = BorderAverages::measure(&decoded.pixels);
        Self {
            on_disk: Arc::new(decoded.pixels),
            embedded: decoded.embedded,
            border,
            buffers: SharedBuffers::default(),
        }
    }

    /// Snapshot of the inputs a render needs
    #[must_use]
    pub fn render_source(&self) -> RenderSource {
        let buffers = lock_buffers(&self.buffers);
        RenderSource {
            on_disk: Arc::clone(&self.on_disk),
            embedded: self.embedded,
            linear: buffers.linear.clone(),
            corrected: buffers
                .corrected
                .as_ref()
                .zip(buffers.fingerprint)
                .map(|(image, fingerprint)| (Arc::clone(image), fingerprint)),
        }
    }
}

/// One item of the listed directory
#[derive(Debug)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Content hash, known after the first successful decode
    pub hash: Option<String>,
    pub modified: Option<SystemTime>,
    pub tweaks: TweakSet,
    pub record: Option<ImageRecord>,
}

impl Entry {
    #[must_use]
    pub fn new(name: impl Into<String>, path: PathBuf, is_dir: bool) -> Self {
        Self {
            name: name.into(),
            path,
            is_dir,
            hash: None,
            modified: None,
            tweaks: TweakSet::neutral(),
            record: None,
        }
    }

    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.record.is_some()
    }

    /// Free all pixel data
    pub fn discard_record(&mut self) {
        self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::transform::Size;
    use image::Rgb;

    fn record() -> ImageRecord {
        ImageRecord::new(DecodedImage {
            pixels: DisplayImage::from_pixel(3, 3, Rgb([1, 2, 3])),
            embedded: None,
        })
    }

    #[test]
    fn render_source_carries_cached_pair_only_with_fingerprint() {
        let record = record();
        {
            let mut buffers = lock_buffers(&record.buffers);
            buffers.corrected = Some(Arc::clone(&record.on_disk));
        }
        assert!(record.render_source().corrected.is_none());

        let fingerprint = RenderFingerprint::of(&TweakSet::neutral());
        lock_buffers(&record.buffers).fingerprint = Some(fingerprint);
        let source = record.render_source();
        assert_eq!(source.corrected.map(|(_, f)| f), Some(fingerprint));
        assert_eq!(Size::of(&source.on_disk), Size::new(3, 3));
    }

    #[test]
    fn invalidate_corrected_keeps_linear() {
        let record = record();
        let mut buffers = lock_buffers(&record.buffers);
        buffers.scaled = Some(Arc::clone(&record.on_disk));
        buffers.corrected = Some(Arc::clone(&record.on_disk));
        buffers.invalidate_corrected();
        assert!(buffers.corrected.is_none());
        assert!(buffers.scaled.is_none());
        assert!(buffers.fingerprint.is_none());
    }
}
