use super::buffer::SessionRecording;
use super::{frames, keypoints};
use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a finished session is turned into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One row per correlated frame
    #[default]
    Keypoints,
    /// Still images decoded from the recorded video
    SampledFrames,
}

/// Output of one completed session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingArtifact {
    pub tabular_file_path: Option<PathBuf>,
    pub sampled_frame_paths: Option<Vec<PathBuf>>,
}

pub struct ProcessingJob {
    pub mode: ProcessingMode,
    pub video: PathBuf,
    pub recording: SessionRecording,
}

#[derive(Debug, Clone)]
pub struct PostProcessorSettings {
    pub output_dir: PathBuf,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub default_frame_rate: f64,
    pub frame_stride: u32,
    /// Keypoint mode with nothing buffered falls back to sampled frames
    pub fallback_to_frames: bool,
}

/// Turns a finished session into its artifact
///
/// `process` blocks on file I/O and video decoding; callers run it off the
/// detection path.
pub struct SessionPostProcessor {
    settings: PostProcessorSettings,
}

impl SessionPostProcessor {
    pub fn new(settings: PostProcessorSettings) -> Self {
        Self { settings }
    }

    pub fn process(&self, job: ProcessingJob) -> SessionResult<ProcessingArtifact> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        tracing::info!(
            "Post-processing session: mode={:?}, frames={}, video={:?}",
            job.mode,
            job.recording.len(),
            job.video
        );

        match job.mode {
            ProcessingMode::Keypoints if job.recording.is_empty() => {
                if !self.settings.fallback_to_frames {
                    return Err(SessionError::BufferEmpty);
                }
                tracing::warn!("No landmarks recorded, falling back to sampled frames");
                self.sample_frames(&job.video, &stamp)
            }
            ProcessingMode::Keypoints => {
                let path = keypoints::write_series_file(&self.settings.output_dir, &job.recording, &stamp)?;
                Ok(ProcessingArtifact {
                    tabular_file_path: Some(path),
                    sampled_frame_paths: None,
                })
            }
            ProcessingMode::SampledFrames => self.sample_frames(&job.video, &stamp),
        }
    }

    fn sample_frames(&self, video: &Path, stamp: &str) -> SessionResult<ProcessingArtifact> {
        if !video.exists() {
            return Err(SessionError::Decode(format!("recorded video {:?} is missing", video)));
        }

        let meta = frames::probe_video(&self.settings.ffprobe, video).unwrap_or_else(|e| {
            tracing::warn!("Could not probe {:?}, using default frame rate: {}", video, e);
            frames::VideoMetadata::default()
        });
        let rate = frames::sampling_rate(&meta, self.settings.default_frame_rate, self.settings.frame_stride);

        let dir = self.settings.output_dir.join(format!("frames_{}", stamp));
        let paths = frames::extract_frames(&self.settings.ffmpeg, video, &dir, stamp, rate)?;

        Ok(ProcessingArtifact {
            tabular_file_path: None,
            sampled_frame_paths: Some(paths),
        })
    }
}
