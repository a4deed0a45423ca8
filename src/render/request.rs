//! Messages between the viewer and the render worker

use super::entry::ImageRecord;
use super::generation::Generation;
use super::transform::Size;
use super::tweaks::TweakSet;

/// Everything the worker needs for one render
#[derive(Clone, Debug)]
pub struct RenderTicket {
    pub index: usize,
    pub generation: Generation,
    /// Neutral when tweaks are switched off
    pub tweaks: TweakSet,
    pub target: Size,
    pub record: ImageRecord,
}

/// Request sent to the render worker
#[derive(Debug)]
pub enum RenderRequest {
    Render(Box<RenderTicket>),

    /// Shutdown the worker
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Buffers were written back to the record
    Rendered,
    /// Stopped by the abort flag, nothing written
    Aborted,
    /// Superseded by a newer generation, nothing written
    Stale,
    Failed(String),
}

/// Sent after every ticket, whatever happened to it
#[derive(Debug, Clone)]
pub struct RenderCompletion {
    pub index: usize,
    pub generation: Generation,
    pub outcome: RenderOutcome,
}
