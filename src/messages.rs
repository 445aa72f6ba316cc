use crate::capture::CaptureState;
use crate::detection::CorrelatedFrame;
use crate::error::{CaptureErrorKind, DetectorChannel, ErrorReport};
use crate::processing::{ProcessingArtifact, ProcessingMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Debounced hand presence edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChanged {
    pub present: bool,
}

/// Logical recording session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Stopped,
}

/// Post-processing state of the last session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    #[default]
    Idle,
    Processing,
    Uploading,
    Completed,
    Error,
}

/// Commands for the CaptureController service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Reset,
}

/// Raw lifecycle events reported by a capture device binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Started,
    Finalized(Result<PathBuf, CaptureErrorKind>),
    Error(CaptureErrorKind),
}

/// Events the CaptureController reports to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Started,
    Stopped(PathBuf),
    Error(CaptureErrorKind),
}

/// Output of the correlator service
#[derive(Debug, Clone)]
pub enum DetectionEvent {
    Frame(CorrelatedFrame),
    Presence(PresenceChanged),
    ChannelFailed {
        channel: DetectorChannel,
        detail: String,
    },
}

/// Commands for the SessionController service
pub enum SessionCommand {
    StartRecording,
    StopRecording,
    SetProcessingMode(ProcessingMode),
    Status(oneshot::Sender<SessionStatus>),
}

/// Snapshot of the session controller (observable via `SessionHandle::status`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub recording: RecordingState,
    pub processing: ProcessingState,
    pub mode: ProcessingMode,
    pub buffered_frames: usize,
    pub capture: CaptureState,
}

impl SessionStatus {
    /// No capture is running and no post-processing or hand-off is in flight
    pub fn is_settled(&self) -> bool {
        self.recording == RecordingState::Idle
            && !matches!(self.processing, ProcessingState::Processing | ProcessingState::Uploading)
            && matches!(self.capture, CaptureState::Idle | CaptureState::Error(_))
    }
}

/// Final result of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    pub success: bool,
    pub message: String,
    pub artifact: Option<ProcessingArtifact>,
    pub error: Option<ErrorReport>,
}

/// Everything UI and the upload stage can observe
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification {
    Presence(PresenceChanged),
    /// Capture device is active and the session is recording
    Started,
    RecordingStateChanged(RecordingState),
    ProcessingStateChanged(ProcessingState),
    ProcessingCompleted(ProcessingOutcome),
    DetectorUnavailable(ErrorReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(recording: RecordingState, processing: ProcessingState, capture: CaptureState) -> SessionStatus {
        SessionStatus {
            recording,
            processing,
            mode: ProcessingMode::Keypoints,
            buffered_frames: 0,
            capture,
        }
    }

    #[test]
    fn test_settled_only_when_nothing_in_flight() {
        use ProcessingState as P;
        use RecordingState as R;

        assert!(status(R::Idle, P::Idle, CaptureState::Idle).is_settled());
        assert!(status(R::Idle, P::Completed, CaptureState::Idle).is_settled());
        assert!(status(R::Idle, P::Error, CaptureState::Error(CaptureErrorKind::NoData)).is_settled());

        assert!(!status(R::Recording, P::Idle, CaptureState::Starting).is_settled());
        assert!(!status(R::Stopped, P::Processing, CaptureState::Idle).is_settled());
        assert!(!status(R::Stopped, P::Uploading, CaptureState::Idle).is_settled());
        assert!(!status(R::Idle, P::Idle, CaptureState::Finalizing).is_settled());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_value(status(RecordingState::Recording, ProcessingState::Idle, CaptureState::Active { paused: false })).unwrap();
        assert_eq!(json["recording"], "recording");
        assert_eq!(json["bufferedFrames"], 0);
        assert_eq!(json["capture"]["state"], "active");
    }
}
