use super::device::CaptureDevice;
use crate::error::CaptureErrorKind;
use crate::messages::{CaptureCommand, CaptureEvent, DeviceEvent};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

/// Lifecycle of the physical capture device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Idle,
    Starting,
    Active {
        paused: bool,
    },
    Finalizing,
    Error(CaptureErrorKind),
}

impl CaptureState {
    pub fn is_active(&self) -> bool {
        matches!(self, CaptureState::Active { .. })
    }
}

/// Side effects requested by a capture transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureAction {
    StartDevice,
    StopDevice,
    PauseDevice,
    ResumeDevice,
    Emit(CaptureEvent),
}

/// Pure transition table for the capture device
#[derive(Debug, Default)]
pub struct CaptureMachine {
    state: CaptureState,
}

impl CaptureMachine {
    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn command(&mut self, cmd: CaptureCommand) -> Vec<CaptureAction> {
        match (cmd, self.state) {
            (CaptureCommand::Start, CaptureState::Idle) => {
                self.state = CaptureState::Starting;
                vec![CaptureAction::StartDevice]
            }
            (CaptureCommand::Stop, CaptureState::Active { .. }) => {
                self.state = CaptureState::Finalizing;
                vec![CaptureAction::StopDevice]
            }
            (CaptureCommand::Pause, CaptureState::Active { paused: false }) => {
                vec![CaptureAction::PauseDevice]
            }
            (CaptureCommand::Resume, CaptureState::Active { paused: true }) => {
                vec![CaptureAction::ResumeDevice]
            }
            (CaptureCommand::Reset, CaptureState::Error(_)) => {
                self.state = CaptureState::Idle;
                Vec::new()
            }
            (cmd, state) => {
                tracing::warn!("Ignoring capture {:?} while {:?}", cmd, state);
                Vec::new()
            }
        }
    }

    pub fn device_event(&mut self, event: DeviceEvent) -> Vec<CaptureAction> {
        match (event, self.state) {
            (DeviceEvent::Started, CaptureState::Starting) => {
                self.state = CaptureState::Active { paused: false };
                vec![CaptureAction::Emit(CaptureEvent::Started)]
            }
            (
                DeviceEvent::Finalized(Ok(path)),
                CaptureState::Finalizing | CaptureState::Active { .. } | CaptureState::Starting,
            ) => {
                self.state = CaptureState::Idle;
                vec![CaptureAction::Emit(CaptureEvent::Stopped(path))]
            }
            (
                DeviceEvent::Finalized(Err(kind)) | DeviceEvent::Error(kind),
                CaptureState::Starting | CaptureState::Active { .. } | CaptureState::Finalizing,
            ) => {
                self.fail(kind)
            }
            (DeviceEvent::Error(kind), CaptureState::Idle) => self.fail(kind),
            (event, state) => {
                tracing::debug!("Dropping device event {:?} while {:?}", event, state);
                Vec::new()
            }
        }
    }

    /// The device accepted a pause or resume request
    pub fn set_paused(&mut self, paused: bool) {
        if let CaptureState::Active { .. } = self.state {
            self.state = CaptureState::Active { paused };
        }
    }

    fn fail(&mut self, kind: CaptureErrorKind) -> Vec<CaptureAction> {
        tracing::error!("Capture device failed [{}]: {}", kind.code(), kind);
        self.state = CaptureState::Error(kind);
        vec![CaptureAction::Emit(CaptureEvent::Error(kind))]
    }
}

/// Owns a capture device and drives it through `CaptureMachine`
///
/// Commands arrive from the session controller; device events arrive from the
/// binding. Both are handled one at a time on this task.
pub struct CaptureController {
    machine: CaptureMachine,
    device: Box<dyn CaptureDevice>,
    output_dir: PathBuf,
    cmd_rx: mpsc::UnboundedReceiver<CaptureCommand>,
    device_tx: mpsc::UnboundedSender<DeviceEvent>,
    device_rx: mpsc::UnboundedReceiver<DeviceEvent>,
    event_tx: mpsc::UnboundedSender<CaptureEvent>,
    state_tx: watch::Sender<CaptureState>,
}

impl CaptureController {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        output_dir: PathBuf,
        event_tx: mpsc::UnboundedSender<CaptureEvent>,
    ) -> (Self, CaptureHandle, watch::Receiver<CaptureState>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CaptureState::Idle);

        let controller = Self {
            machine: CaptureMachine::default(),
            device,
            output_dir,
            cmd_rx,
            device_tx,
            device_rx,
            event_tx,
            state_tx,
        };

        (controller, CaptureHandle { tx: cmd_tx }, state_rx)
    }

    pub async fn run(mut self) {
        loop {
            let actions = tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.machine.command(cmd),
                    None => break,
                },
                Some(event) = self.device_rx.recv() => self.machine.device_event(event),
            };

            self.apply(actions).await;
        }

        if self.machine.state().is_active() {
            tracing::info!("Capture controller shutting down, stopping device");
            self.device.stop().await;
        }
    }

    async fn apply(&mut self, actions: Vec<CaptureAction>) {
        let mut pending = actions;

        while !pending.is_empty() {
            let mut follow_up = Vec::new();

            for action in pending {
                match action {
                    CaptureAction::StartDevice => {
                        if let Err(kind) = self.start_device().await {
                            follow_up.extend(self.machine.device_event(DeviceEvent::Error(kind)));
                        }
                    }
                    CaptureAction::StopDevice => self.device.stop().await,
                    CaptureAction::PauseDevice => match self.device.pause().await {
                        Ok(()) => self.machine.set_paused(true),
                        Err(e) => tracing::warn!("Capture device refused to pause: {:#}", e),
                    },
                    CaptureAction::ResumeDevice => match self.device.resume().await {
                        Ok(()) => self.machine.set_paused(false),
                        Err(e) => tracing::warn!("Capture device refused to resume: {:#}", e),
                    },
                    CaptureAction::Emit(event) => {
                        // listeners read the state as soon as the event lands
                        self.state_tx.send_replace(self.machine.state());
                        if self.event_tx.send(event).is_err() {
                            tracing::debug!("No listener for capture events");
                        }
                    }
                }
            }

            pending = follow_up;
        }

        self.state_tx.send_replace(self.machine.state());
    }

    async fn start_device(&mut self) -> Result<(), CaptureErrorKind> {
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            tracing::error!("Cannot create capture directory {:?}: {}", self.output_dir, e);
            if e.kind() == std::io::ErrorKind::StorageFull {
                CaptureErrorKind::StorageExhausted
            } else {
                CaptureErrorKind::InvalidConfiguration
            }
        })?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let output = self.output_dir.join(format!("video_{}.mp4", stamp));
        tracing::info!("Starting capture into {:?}", output);

        self.device.start(&output, self.device_tx.clone()).await
    }
}

/// Handle for communicating with the CaptureController
#[derive(Clone)]
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<CaptureCommand>,
}

impl CaptureHandle {
    fn send(&self, cmd: CaptureCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!("Capture controller is gone, dropping {:?}", cmd);
        }
    }

    pub fn start(&self) {
        self.send(CaptureCommand::Start);
    }

    pub fn stop(&self) {
        self.send(CaptureCommand::Stop);
    }

    pub fn pause(&self) {
        self.send(CaptureCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(CaptureCommand::Resume);
    }

    pub fn reset(&self) {
        self.send(CaptureCommand::Reset);
    }
}
