use crate::clock::Millis;
use crate::detection::CorrelatedFrame;

/// Frames captured for one session, handed to post-processing
#[derive(Debug, Clone, Default)]
pub struct SessionRecording {
    pub started_at: Millis,
    pub frames: Vec<CorrelatedFrame>,
}

impl SessionRecording {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Append-only, session-scoped collection of correlated frames
///
/// Owned by the session controller; only written while recording.
#[derive(Debug, Default)]
pub struct LandmarkBuffer {
    started_at: Millis,
    frames: Vec<CorrelatedFrame>,
}

impl LandmarkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop anything buffered and start a new session at `started_at`
    pub fn reset(&mut self, started_at: Millis) {
        self.started_at = started_at;
        self.frames.clear();
    }

    pub fn push(&mut self, frame: CorrelatedFrame) {
        self.frames.push(frame);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Move the buffered frames out, leaving the buffer empty
    pub fn take(&mut self) -> SessionRecording {
        SessionRecording {
            started_at: self.started_at,
            frames: std::mem::take(&mut self.frames),
        }
    }
}
