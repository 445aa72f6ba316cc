use crate::capture::{CaptureHandle, CaptureState};
use crate::clock::FrameClock;
use crate::error::{ErrorReport, SessionError, SessionResult};
use crate::hooks;
use crate::messages::{
    CaptureEvent, DetectionEvent, PresenceChanged, ProcessingOutcome, ProcessingState,
    RecordingState, SessionCommand, SessionNotification, SessionStatus,
};
use crate::processing::{
    LandmarkBuffer, ProcessingArtifact, ProcessingJob, ProcessingMode, SessionPostProcessor,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Everything that can drive the session state machines
pub enum SessionInput {
    StartRecording,
    StopRecording,
    SetProcessingMode(ProcessingMode),
    Detection(DetectionEvent),
    Capture(CaptureEvent),
    ProcessingFinished(SessionResult<ProcessingArtifact>),
    HandoffFinished { delivered: bool },
}

/// Work the controller performs after a transition
pub enum SessionEffect {
    StartCapture,
    StopCapture,
    ResetCapture,
    Process(ProcessingJob),
    Handoff(ProcessingArtifact),
    Notify(SessionNotification),
}

/// Recording and processing state machines for one capture context
///
/// Each input runs to completion before the next is accepted; the resulting
/// effects are the only way the machine talks to the capture device and the
/// post-processor.
pub struct SessionMachine {
    clock: Arc<dyn FrameClock>,
    auto_capture: bool,
    has_handoff: bool,
    recording: RecordingState,
    processing: ProcessingState,
    mode: ProcessingMode,
    buffer: LandmarkBuffer,
    hand_present: bool,
    stop_requested: bool,
    handoff_artifact: Option<ProcessingArtifact>,
}

impl SessionMachine {
    pub fn new(clock: Arc<dyn FrameClock>, settings: &SessionSettings) -> Self {
        Self {
            clock,
            auto_capture: settings.auto_capture,
            has_handoff: settings.artifact_hook.is_some(),
            recording: RecordingState::Idle,
            processing: ProcessingState::Idle,
            mode: settings.mode,
            buffer: LandmarkBuffer::new(),
            hand_present: false,
            stop_requested: false,
            handoff_artifact: None,
        }
    }

    pub fn recording(&self) -> RecordingState {
        self.recording
    }

    pub fn processing(&self) -> ProcessingState {
        self.processing
    }

    /// Last debounced presence edge seen
    pub fn hand_present(&self) -> bool {
        self.hand_present
    }

    pub fn status(&self, capture: CaptureState) -> SessionStatus {
        SessionStatus {
            recording: self.recording,
            processing: self.processing,
            mode: self.mode,
            buffered_frames: self.buffer.len(),
            capture,
        }
    }

    pub fn handle(&mut self, input: SessionInput, capture: CaptureState) -> Vec<SessionEffect> {
        let mut effects = Vec::new();

        match input {
            SessionInput::StartRecording => self.start_recording(capture, &mut effects),
            SessionInput::StopRecording => self.stop_recording(capture, &mut effects),
            SessionInput::SetProcessingMode(mode) => self.set_mode(mode),
            SessionInput::Detection(DetectionEvent::Frame(frame)) => {
                if self.recording == RecordingState::Recording {
                    self.buffer.push(frame);
                }
            }
            SessionInput::Detection(DetectionEvent::Presence(change)) => {
                self.on_presence(change, capture, &mut effects)
            }
            SessionInput::Detection(DetectionEvent::ChannelFailed { channel, detail }) => {
                let error = SessionError::DetectorInit { channel, detail };
                effects.push(SessionEffect::Notify(SessionNotification::DetectorUnavailable(
                    ErrorReport::from(error),
                )));
            }
            SessionInput::Capture(event) => self.on_capture(event, &mut effects),
            SessionInput::ProcessingFinished(result) => self.on_processed(result, &mut effects),
            SessionInput::HandoffFinished { delivered } => {
                if self.processing == ProcessingState::Uploading {
                    let artifact = self.handoff_artifact.take().unwrap_or_default();
                    let message = if delivered {
                        "Artifact produced and handed off"
                    } else {
                        "Artifact produced; hand-off failed, kept locally"
                    };
                    self.complete(artifact, message, &mut effects);
                }
            }
        }

        effects
    }

    fn start_recording(&mut self, capture: CaptureState, effects: &mut Vec<SessionEffect>) {
        if self.recording != RecordingState::Idle {
            tracing::warn!("Ignoring start: session is {:?}", self.recording);
            return;
        }

        let reset_first = match capture {
            CaptureState::Idle => false,
            CaptureState::Error(_) => true,
            other => {
                tracing::warn!("Ignoring start: capture device is {:?}", other);
                return;
            }
        };

        tracing::info!("Starting recording session");
        self.buffer.reset(self.clock.now_ms());
        self.stop_requested = false;
        self.set_recording(RecordingState::Recording, effects);
        self.set_processing(ProcessingState::Idle, effects);

        if reset_first {
            effects.push(SessionEffect::ResetCapture);
        }
        effects.push(SessionEffect::StartCapture);
    }

    fn stop_recording(&mut self, capture: CaptureState, effects: &mut Vec<SessionEffect>) {
        if self.recording != RecordingState::Recording {
            tracing::debug!("Ignoring stop: session is {:?}", self.recording);
            return;
        }

        if capture.is_active() {
            tracing::info!("Stopping capture ({} frames buffered)", self.buffer.len());
            effects.push(SessionEffect::StopCapture);
        } else {
            tracing::debug!("Capture is {:?}, stopping once it is active", capture);
            self.stop_requested = true;
        }
    }

    fn set_mode(&mut self, mode: ProcessingMode) {
        if self.recording != RecordingState::Idle {
            tracing::warn!("Processing mode can only change while idle");
            return;
        }
        tracing::info!("Processing mode set to {:?}", mode);
        self.mode = mode;
    }

    fn on_presence(&mut self, change: PresenceChanged, capture: CaptureState, effects: &mut Vec<SessionEffect>) {
        self.hand_present = change.present;
        effects.push(SessionEffect::Notify(SessionNotification::Presence(change)));

        if change.present {
            if self.auto_capture && self.recording == RecordingState::Idle {
                self.start_recording(capture, effects);
            }
        } else {
            self.stop_recording(capture, effects);
        }
    }

    fn on_capture(&mut self, event: CaptureEvent, effects: &mut Vec<SessionEffect>) {
        match event {
            CaptureEvent::Started => {
                if self.recording != RecordingState::Recording {
                    tracing::warn!("Capture started outside a session, stopping it");
                    effects.push(SessionEffect::StopCapture);
                    return;
                }

                effects.push(SessionEffect::Notify(SessionNotification::Started));
                if self.stop_requested {
                    self.stop_requested = false;
                    tracing::info!("Stop was requested while capture was starting");
                    effects.push(SessionEffect::StopCapture);
                }
            }
            CaptureEvent::Stopped(video) => {
                if self.recording != RecordingState::Recording {
                    tracing::warn!("Capture stopped while session is {:?}, ignoring", self.recording);
                    return;
                }

                self.set_recording(RecordingState::Stopped, effects);
                let recording = self.buffer.take();
                tracing::info!("Capture finished at {:?} with {} frames", video, recording.len());

                self.set_processing(ProcessingState::Processing, effects);
                effects.push(SessionEffect::Process(ProcessingJob {
                    mode: self.mode,
                    video,
                    recording,
                }));
            }
            CaptureEvent::Error(kind) => {
                effects.push(SessionEffect::ResetCapture);

                if self.processing == ProcessingState::Processing {
                    // the session's outcome now belongs to post-processing
                    tracing::warn!("Capture error [{}] during post-processing", kind.code());
                    return;
                }

                self.buffer.clear();
                self.stop_requested = false;
                self.handoff_artifact = None;
                self.set_recording(RecordingState::Idle, effects);
                self.fail(SessionError::Capture(kind), effects);
            }
        }
    }

    fn on_processed(&mut self, result: SessionResult<ProcessingArtifact>, effects: &mut Vec<SessionEffect>) {
        if self.processing != ProcessingState::Processing {
            tracing::warn!("Post-processing result arrived while {:?}, dropping", self.processing);
            return;
        }

        match result {
            Ok(artifact) if self.has_handoff => {
                self.handoff_artifact = Some(artifact.clone());
                self.set_processing(ProcessingState::Uploading, effects);
                effects.push(SessionEffect::Handoff(artifact));
            }
            Ok(artifact) => self.complete(artifact, "Artifact produced", effects),
            Err(error) => {
                self.buffer.clear();
                self.set_recording(RecordingState::Idle, effects);
                self.fail(error, effects);
            }
        }
    }

    fn complete(&mut self, artifact: ProcessingArtifact, message: &str, effects: &mut Vec<SessionEffect>) {
        tracing::info!("Session completed: {}", message);
        self.set_processing(ProcessingState::Completed, effects);
        self.set_recording(RecordingState::Idle, effects);
        effects.push(SessionEffect::Notify(SessionNotification::ProcessingCompleted(
            ProcessingOutcome {
                success: true,
                message: message.to_string(),
                artifact: Some(artifact),
                error: None,
            },
        )));
    }

    fn fail(&mut self, error: SessionError, effects: &mut Vec<SessionEffect>) {
        tracing::error!("Session failed [{}]: {}", error.code(), error);
        self.set_processing(ProcessingState::Error, effects);
        let report = ErrorReport::from(&error);
        effects.push(SessionEffect::Notify(SessionNotification::ProcessingCompleted(
            ProcessingOutcome {
                success: false,
                message: report.message.clone(),
                artifact: None,
                error: Some(report),
            },
        )));
    }

    fn set_recording(&mut self, state: RecordingState, effects: &mut Vec<SessionEffect>) {
        if self.recording != state {
            tracing::debug!("Recording state: {:?} -> {:?}", self.recording, state);
            self.recording = state;
            effects.push(SessionEffect::Notify(SessionNotification::RecordingStateChanged(state)));
        }
    }

    fn set_processing(&mut self, state: ProcessingState, effects: &mut Vec<SessionEffect>) {
        if self.processing != state {
            tracing::debug!("Processing state: {:?} -> {:?}", self.processing, state);
            self.processing = state;
            effects.push(SessionEffect::Notify(SessionNotification::ProcessingStateChanged(state)));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub auto_capture: bool,
    pub mode: ProcessingMode,
    pub artifact_hook: Option<String>,
}

/// Top-level orchestrator
///
/// This service:
/// - Feeds correlated frames and presence edges into `SessionMachine`
/// - Commands the capture controller and reacts to its events
/// - Runs post-processing on the blocking pool, off the detection path
/// - Broadcasts notifications to UI and the upload stage
pub struct SessionController {
    machine: SessionMachine,
    hook: Option<String>,
    capture: CaptureHandle,
    capture_state: watch::Receiver<CaptureState>,
    post: Arc<SessionPostProcessor>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    detection_rx: mpsc::Receiver<DetectionEvent>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    internal_tx: mpsc::UnboundedSender<SessionInput>,
    internal_rx: mpsc::UnboundedReceiver<SessionInput>,
    notify_tx: broadcast::Sender<SessionNotification>,
}

/// Channels the controller consumes
pub struct SessionInputs {
    pub detection_rx: mpsc::Receiver<DetectionEvent>,
    pub capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    pub capture: CaptureHandle,
    pub capture_state: watch::Receiver<CaptureState>,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        clock: Arc<dyn FrameClock>,
        inputs: SessionInputs,
        post: SessionPostProcessor,
    ) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notify_tx, _) = broadcast::channel(256);

        let controller = Self {
            machine: SessionMachine::new(clock, &settings),
            hook: settings.artifact_hook,
            capture: inputs.capture,
            capture_state: inputs.capture_state,
            post: Arc::new(post),
            cmd_rx,
            detection_rx: inputs.detection_rx,
            capture_rx: inputs.capture_rx,
            internal_tx,
            internal_rx,
            notify_tx: notify_tx.clone(),
        };

        let handle = SessionHandle {
            tx: cmd_tx,
            notify_tx,
        };

        (controller, handle)
    }

    pub async fn run(mut self) {
        loop {
            let input = tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Status(reply)) => {
                        let _ = reply.send(self.machine.status(*self.capture_state.borrow()));
                        continue;
                    }
                    Some(SessionCommand::StartRecording) => SessionInput::StartRecording,
                    Some(SessionCommand::StopRecording) => SessionInput::StopRecording,
                    Some(SessionCommand::SetProcessingMode(mode)) => SessionInput::SetProcessingMode(mode),
                    None => break,
                },
                Some(event) = self.detection_rx.recv() => SessionInput::Detection(event),
                Some(event) = self.capture_rx.recv() => SessionInput::Capture(event),
                Some(input) = self.internal_rx.recv() => input,
            };

            let capture = *self.capture_state.borrow();
            let effects = self.machine.handle(input, capture);
            self.apply(effects);
        }

        tracing::info!("Session controller stopped");
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::StartCapture => self.capture.start(),
                SessionEffect::StopCapture => self.capture.stop(),
                SessionEffect::ResetCapture => self.capture.reset(),
                SessionEffect::Process(job) => self.spawn_processing(job),
                SessionEffect::Handoff(artifact) => self.spawn_handoff(artifact),
                SessionEffect::Notify(notification) => {
                    // no subscribers is fine
                    let _ = self.notify_tx.send(notification);
                }
            }
        }
    }

    fn spawn_processing(&self, job: ProcessingJob) {
        let post = Arc::clone(&self.post);
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || post.process(job))
                .await
                .unwrap_or_else(|e| Err(SessionError::Task(e.to_string())));
            let _ = tx.send(SessionInput::ProcessingFinished(result));
        });
    }

    fn spawn_handoff(&self, artifact: ProcessingArtifact) {
        let tx = self.internal_tx.clone();
        let Some(command) = self.hook.clone() else {
            let _ = tx.send(SessionInput::HandoffFinished { delivered: false });
            return;
        };

        tokio::spawn(async move {
            let delivered = match hooks::run_artifact_hook(&command, &artifact).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("[artifact] Hand-off failed: {:#}", e);
                    false
                }
            };
            let _ = tx.send(SessionInput::HandoffFinished { delivered });
        });
    }
}

/// Handle for communicating with the SessionController
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    notify_tx: broadcast::Sender<SessionNotification>,
}

impl SessionHandle {
    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send session command: {}", e))
    }

    pub async fn start_recording(&self) -> Result<()> {
        self.send(SessionCommand::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.send(SessionCommand::StopRecording).await
    }

    pub async fn set_processing_mode(&self, mode: ProcessingMode) -> Result<()> {
        self.send(SessionCommand::SetProcessingMode(mode)).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Status(reply)).await?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive session status: {}", e))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notify_tx.subscribe()
    }

    /// Wait until no capture, post-processing or hand-off is in flight
    pub async fn wait_until_settled(&self) -> Result<SessionStatus> {
        // subscribe before the first status so no transition slips between them
        let mut notifications = self.subscribe();

        loop {
            let status = self.status().await?;
            if status.is_settled() {
                return Ok(status);
            }

            match notifications.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(status),
            }
        }
    }
}
