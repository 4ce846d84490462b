mod compositor;
mod ffmpeg;
mod fetcher;
mod sync;

pub use compositor::Compositor;
pub use ffmpeg::{Ffmpeg, MediaTool};
pub use fetcher::ClipFetcher;
pub use sync::{SyncEngine, SyncPlan};
