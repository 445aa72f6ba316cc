pub mod controller;
pub mod device;
pub mod ffmpeg;

pub use controller::{CaptureController, CaptureHandle, CaptureMachine, CaptureState};
pub use device::CaptureDevice;
pub use ffmpeg::{FfmpegDevice, FfmpegSettings};
