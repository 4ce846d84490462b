pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod narration;
pub mod pipeline;
pub mod scene;
pub mod scheduler;
pub mod video;

pub use config::PipelineConfig;
pub use error::{Result, VideoError};
pub use pipeline::Pipeline;
pub use scene::{RunResult, Script};
