pub mod buffer;
pub mod frames;
pub mod keypoints;
pub mod postprocess;

pub use buffer::{LandmarkBuffer, SessionRecording};
pub use postprocess::{
    PostProcessorSettings, ProcessingArtifact, ProcessingJob, ProcessingMode, SessionPostProcessor,
};
