//! Image rendering infrastructure

mod cache;
mod color;
mod decode;
mod entry;
mod generation;
mod queue;
mod request;
mod transform;
mod tweaks;
mod viewer;
mod worker;

pub use cache::EntryLru;
pub use color::{
    ColorSpace, FULL_SCALE, LUMA_B, LUMA_G, LUMA_R, LUMA_SHIFT, TransferFunction, encode_srgb,
    linear_to_srgb, luminance, srgb_to_linear,
};
pub use decode::{BorderAverages, DecodeError, DecodedImage, FileDecoder, ImageSource};
pub use entry::{Entry, ImageRecord, RenderBuffers, SharedBuffers, lock_buffers};
pub use generation::{Generation, GenerationGuard};
pub use queue::{RenderJob, RenderQueue};
pub use request::{RenderCompletion, RenderOutcome, RenderRequest, RenderTicket};
pub use transform::{
    ChannelStats, DisplayImage, LinearBuffer, LinearImage, RenderFingerprint, RenderOutput,
    RenderSource, Size, TransformError, build_linear, orient, scale_to_fit, transform,
    white_balance_gains,
};
pub use tweaks::{NEUTRAL_WHITE, PasteMask, Rotation, TweakParseError, TweakSet};
pub use viewer::{BackgroundStyle, DisplaySink, Frame, Viewer, ViewerConfig};
pub use worker::{CompletionPermit, RenderWorker, WorkerGone};

/// Decoded images kept besides the displayed one
pub const DEFAULT_KEEP_DECODED: usize = 5;
