// Export modules for use in tests
pub mod catalog;
pub mod panic_handler;
pub mod render;
pub mod settings;
pub mod tweak_store;

pub use catalog::{Listing, ScanError, scan};
pub use render::{
    BackgroundStyle, DisplaySink, Frame, RenderWorker, TweakSet, Viewer, ViewerConfig,
};
pub use tweak_store::{JsonTweakStore, TweakStore};
