//! Color transform: decoded source + tweak set -> display buffers
//!
//! Everything here is pure with respect to its inputs. The worker copies the
//! cached buffers out of an image record, calls [`transform`] without holding
//! any lock, and stores the result back afterwards.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fast_image_resize as fr;
use image::{ImageBuffer, Rgb, RgbImage, imageops};
use rayon::prelude::*;

use super::color::{ColorSpace, FULL_SCALE, encode_srgb, luminance};
use super::tweaks::{Rotation, TweakSet};

/// 8-bit sRGB pixels as decoded from disk and as handed to the display
pub type DisplayImage = RgbImage;

/// 16-bit linear-light pixels
pub type LinearImage = ImageBuffer<Rgb<u16>, Vec<u16>>;

/// Pixel dimensions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn of(image: &DisplayImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Dimensions after rotating by `rotation`
    #[must_use]
    pub const fn oriented(self, rotation: Rotation) -> Self {
        if rotation.swaps_axes() {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }

    /// Largest size with this aspect ratio that fits inside `bounds`.
    /// Scales up as well as down.
    #[must_use]
    pub fn fit_within(self, bounds: Size) -> Size {
        if self.is_empty() || bounds.is_empty() {
            return self;
        }
        let (w, h) = (u64::from(self.width), u64::from(self.height));
        let (bw, bh) = (u64::from(bounds.width), u64::from(bounds.height));

        let width_for_bh = bh * w / h;
        let (fw, fh) = if width_for_bh <= bw {
            (width_for_bh, bh)
        } else {
            (bw, bw * h / w)
        };
        Size::new(fw.max(1) as u32, fh.max(1) as u32)
    }
}

/// Extremes of the linear buffer, gathered in the same pass that builds it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelStats {
    pub max: [u16; 3],
    pub min: [u16; 3],
    /// Smallest per-pixel average of the three channels
    pub min_average: u16,
}

impl ChannelStats {
    const EMPTY: ChannelStats = ChannelStats {
        max: [1; 3],
        min: [FULL_SCALE; 3],
        min_average: FULL_SCALE,
    };

    fn observe(&mut self, px: &[u16]) {
        for c in 0..3 {
            self.max[c] = self.max[c].max(px[c]);
            self.min[c] = self.min[c].min(px[c]);
        }
        let avg = (u32::from(px[0]) + u32::from(px[1]) + u32::from(px[2])) / 3;
        self.min_average = self.min_average.min(avg as u16);
    }

    fn merge(mut self, other: &ChannelStats) -> ChannelStats {
        for c in 0..3 {
            self.max[c] = self.max[c].max(other.max[c]);
            self.min[c] = self.min[c].min(other.min[c]);
        }
        self.min_average = self.min_average.min(other.min_average);
        self
    }

    /// Black level that maps the darkest average pixel to zero
    #[must_use]
    pub fn auto_black_level(&self) -> u8 {
        (u32::from(self.min_average) * 255 / u32::from(FULL_SCALE)) as u8
    }
}

/// A linear buffer together with what it was built from
#[derive(Clone, Debug)]
pub struct LinearBuffer {
    pub image: Arc<LinearImage>,
    pub stats: ChannelStats,
    pub color_space: ColorSpace,
}

/// Render parameters a cached `corrected`/`scaled` pair was built with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderFingerprint {
    pub rotation: Rotation,
    pub mirrored: bool,
    pub tweaked: bool,
    pub color_space_index: u8,
}

impl RenderFingerprint {
    #[must_use]
    pub fn of(tweaks: &TweakSet) -> Self {
        Self {
            rotation: tweaks.rotation,
            mirrored: tweaks.mirrored,
            tweaked: tweaks.affects_pixels(),
            color_space_index: tweaks.color_space_index,
        }
    }
}

/// Inputs copied out of an image record
#[derive(Clone, Debug)]
pub struct RenderSource {
    pub on_disk: Arc<DisplayImage>,
    pub embedded: Option<ColorSpace>,
    pub linear: Option<LinearBuffer>,
    pub corrected: Option<(Arc<DisplayImage>, RenderFingerprint)>,
}

/// Buffers produced by one transform
#[derive(Clone, Debug)]
pub struct RenderOutput {
    pub linear: Option<LinearBuffer>,
    pub corrected: Arc<DisplayImage>,
    pub scaled: Arc<DisplayImage>,
    pub fingerprint: RenderFingerprint,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("render aborted")]
    Aborted,

    #[error("source image has no pixels")]
    EmptySource,

    #[error("resize failed: {0}")]
    Resize(String),
}

#[inline]
fn check_abort(abort: &AtomicBool) -> Result<(), TransformError> {
    if abort.load(Ordering::Relaxed) {
        Err(TransformError::Aborted)
    } else {
        Ok(())
    }
}

/// Produce `corrected` and `scaled` for `tweaks`, reusing what `source` has cached.
pub fn transform(
    source: &RenderSource,
    tweaks: &TweakSet,
    target: Size,
    abort: &AtomicBool,
) -> Result<RenderOutput, TransformError> {
    if Size::of(&source.on_disk).is_empty() {
        return Err(TransformError::EmptySource);
    }

    let fingerprint = RenderFingerprint::of(tweaks);
    let mut linear = source.linear.clone();

    let corrected = match &source.corrected {
        Some((cached, built_with)) if *built_with == fingerprint => Arc::clone(cached),
        _ => {
            let display = if tweaks.affects_pixels() || tweaks.color_space_index != 0 {
                let color_space = ColorSpace::resolve(tweaks.color_space_index, source.embedded);
                let buffer = match linear.take() {
                    Some(buffer) if buffer.color_space == color_space => buffer,
                    _ => build_linear(&source.on_disk, color_space, abort)?,
                };
                let encoded = if tweaks.affects_pixels() {
                    let adjusted = adjust(&buffer.image, &buffer.stats, tweaks, abort)?;
                    encode_display(&adjusted, abort)?
                } else {
                    encode_display(&buffer.image, abort)?
                };
                linear = Some(buffer);
                encoded
            } else {
                (*source.on_disk).clone()
            };
            Arc::new(orient(display, tweaks.rotation, tweaks.mirrored))
        }
    };

    check_abort(abort)?;
    let scaled = scale_to_fit(&corrected, target)?;

    Ok(RenderOutput {
        linear,
        corrected,
        scaled,
        fingerprint,
    })
}

/// Decode `on_disk` with the transfer function of `color_space` into 16-bit
/// linear light, collecting channel statistics on the way.
pub fn build_linear(
    on_disk: &DisplayImage,
    color_space: ColorSpace,
    abort: &AtomicBool,
) -> Result<LinearBuffer, TransformError> {
    let (width, height) = on_disk.dimensions();
    if width == 0 || height == 0 {
        return Err(TransformError::EmptySource);
    }
    let table = color_space.transfer().decode_table();
    let row_len = width as usize * 3;
    let mut data = vec![0u16; row_len * height as usize];

    let stats = data
        .par_chunks_mut(row_len)
        .zip(on_disk.as_raw().par_chunks(row_len))
        .map(|(dst, src)| -> Result<ChannelStats, TransformError> {
            check_abort(abort)?;
            let mut stats = ChannelStats::EMPTY;
            for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                for c in 0..3 {
                    d[c] = table[usize::from(s[c])];
                }
                stats.observe(d);
            }
            Ok(stats)
        })
        .try_reduce(|| ChannelStats::EMPTY, |a, b| Ok(a.merge(&b)))?;

    let image = LinearImage::from_raw(width, height, data).ok_or(TransformError::EmptySource)?;
    Ok(LinearBuffer {
        image: Arc::new(image),
        stats,
        color_space,
    })
}

/// Per-channel white balance gains and the highlight protection factor.
///
/// The brightest target channel keeps a gain of 1. `limit` scales everything
/// down just enough that no channel's maximum passes full scale.
#[must_use]
pub fn white_balance_gains(white: [u8; 3], stats: &ChannelStats) -> ([f64; 3], f64) {
    let w = white.map(|c| f64::from(c.max(1)));
    let wmax = w.iter().copied().fold(0.0, f64::max);
    let gain = w.map(|c| wmax / c);

    let full = f64::from(FULL_SCALE);
    let limit = (0..3)
        .map(|c| full / (f64::from(stats.max[c].max(1)) * gain[c]))
        .fold(1.0, f64::min);
    (gain, limit)
}

fn gamma_table(gamma: i32) -> Option<Vec<u16>> {
    if gamma == 0 {
        return None;
    }
    let exponent = 1.0 + f64::from(gamma) / 100.1;
    let full = f64::from(FULL_SCALE);
    Some(
        (0..=u32::from(FULL_SCALE))
            .map(|v| ((f64::from(v) / full).powf(exponent) * full).round() as u16)
            .collect(),
    )
}

/// Scalar parameters shared by every pixel of one adjustment pass
struct PixelAdjust<'a> {
    gain: [f64; 3],
    scale: f64,
    offset: f64,
    saturation: f64,
    gamma: Option<&'a [u16]>,
}

impl PixelAdjust<'_> {
    #[inline]
    fn apply(&self, px: &mut [u16]) {
        let full = f64::from(FULL_SCALE);
        let mut leveled = [0u32; 3];
        for c in 0..3 {
            leveled[c] = (f64::from(px[c]) * self.gain[c] * self.scale - self.offset)
                .clamp(0.0, full)
                .round() as u32;
        }

        let luma = f64::from(luminance(leveled[0], leveled[1], leveled[2]));
        for c in 0..3 {
            let v = f64::from(leveled[c]);
            let saturated = (v + self.saturation * (luma - v)).clamp(0.0, full).round() as u16;
            px[c] = match self.gamma {
                Some(table) => table[usize::from(saturated)],
                None => saturated,
            };
        }
    }
}

/// Black level, brightness, white balance, saturation and gamma, in that order.
fn adjust(
    linear: &LinearImage,
    stats: &ChannelStats,
    tweaks: &TweakSet,
    abort: &AtomicBool,
) -> Result<LinearImage, TransformError> {
    let full = f64::from(FULL_SCALE);
    let (gain, limit) = white_balance_gains(tweaks.white, stats);

    let black = f64::from(tweaks.black_level) * full / 255.0;
    let bright = 1.0 + f64::from(tweaks.brightness) / 100.0;
    let scale = bright * limit * full / (full - black).max(1.0);
    let gamma = gamma_table(tweaks.gamma);

    let params = PixelAdjust {
        gain,
        scale,
        offset: black * scale,
        saturation: -f64::from(tweaks.saturation) / 100.0,
        gamma: gamma.as_deref(),
    };

    let (width, height) = linear.dimensions();
    let row_len = width as usize * 3;
    let mut data = linear.as_raw().clone();
    data.par_chunks_mut(row_len)
        .try_for_each(|row| -> Result<(), TransformError> {
            check_abort(abort)?;
            for px in row.chunks_exact_mut(3) {
                params.apply(px);
            }
            Ok(())
        })?;

    LinearImage::from_raw(width, height, data).ok_or(TransformError::EmptySource)
}

fn encode_display(linear: &LinearImage, abort: &AtomicBool) -> Result<DisplayImage, TransformError> {
    let (width, height) = linear.dimensions();
    let row_len = width as usize * 3;
    let mut data = vec![0u8; row_len * height as usize];
    data.par_chunks_mut(row_len)
        .zip(linear.as_raw().par_chunks(row_len))
        .try_for_each(|(dst, src)| -> Result<(), TransformError> {
            check_abort(abort)?;
            for (d, s) in dst.iter_mut().zip(src) {
                *d = encode_srgb(*s);
            }
            Ok(())
        })?;
    DisplayImage::from_raw(width, height, data).ok_or(TransformError::EmptySource)
}

/// Rotate clockwise, then mirror horizontally.
#[must_use]
pub fn orient(image: DisplayImage, rotation: Rotation, mirrored: bool) -> DisplayImage {
    let rotated = match rotation {
        Rotation::None => image,
        Rotation::Quarter => imageops::rotate90(&image),
        Rotation::Half => imageops::rotate180(&image),
        Rotation::ThreeQuarters => imageops::rotate270(&image),
    };
    if mirrored {
        imageops::flip_horizontal(&rotated)
    } else {
        rotated
    }
}

fn non_zero(v: u32) -> Result<NonZeroU32, TransformError> {
    NonZeroU32::new(v).ok_or_else(|| TransformError::Resize(format!("invalid dimension {v}")))
}

/// Fit `corrected` into `target`, keeping the aspect ratio.
pub fn scale_to_fit(
    corrected: &Arc<DisplayImage>,
    target: Size,
) -> Result<Arc<DisplayImage>, TransformError> {
    let source = Size::of(corrected);
    let wanted = source.fit_within(target);
    if target.is_empty() || wanted == source {
        return Ok(Arc::clone(corrected));
    }

    let src = fr::Image::from_vec_u8(
        non_zero(source.width)?,
        non_zero(source.height)?,
        corrected.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| TransformError::Resize(e.to_string()))?;
    let mut dst = fr::Image::new(
        non_zero(wanted.width)?,
        non_zero(wanted.height)?,
        fr::PixelType::U8x3,
    );

    let mut resizer = fr::Resizer::new(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    resizer
        .resize(&src.view(), &mut dst.view_mut())
        .map_err(|e| TransformError::Resize(e.to_string()))?;

    DisplayImage::from_raw(wanted.width, wanted.height, dst.into_vec())
        .map(Arc::new)
        .ok_or_else(|| TransformError::Resize("resized buffer has the wrong length".to_string()))
}
