use crate::capture::{CaptureController, FfmpegDevice};
use crate::clock::{FrameClock, MonotonicClock};
use crate::config::Config;
use crate::detection::{source, Correlator, CorrelatorService, DetectorHandle, HandResult, PoseResult};
use crate::messages::{DetectionEvent, SessionNotification};
use crate::processing::SessionPostProcessor;
use crate::services::{SessionController, SessionHandle, SessionInputs};

use anyhow::Result;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};

pub struct App {
    session: SessionHandle,
    notifications: broadcast::Receiver<SessionNotification>,
    hand: DetectorHandle<HandResult>,
    pose: DetectorHandle<PoseResult>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let clock: Arc<dyn FrameClock> = Arc::new(MonotonicClock::new());

        let (detection_tx, detection_rx) = mpsc::channel(config.detector_queue_depth.max(1) * 4);
        let (hand, pose) = Self::setup_detection(&config, Arc::clone(&clock), detection_tx);
        let session = Self::setup_session(&config, clock, detection_rx);
        let notifications = session.subscribe();

        tracing::info!(
            "Ready! Capturing from {} into {:?} (auto capture: {})",
            config.capture_input,
            config.output_dir,
            config.auto_capture
        );

        Ok(Self {
            session,
            notifications,
            hand,
            pose,
        })
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            session,
            mut notifications,
            hand,
            pose,
        } = self;

        let stdin = BufReader::new(tokio::io::stdin());
        let mut detector = tokio::spawn(source::pump_detector_lines(stdin, hand, pose));
        let mut detector_done = false;

        loop {
            tokio::select! {
                result = &mut detector, if !detector_done => {
                    detector_done = true;
                    match result {
                        Ok(Ok(())) => tracing::info!("Detector input closed"),
                        Ok(Err(e)) => tracing::error!("Detector input failed: {:#}", e),
                        Err(e) => tracing::error!("Detector task failed: {}", e),
                    }
                }
                notification = notifications.recv() => match notification {
                    Ok(notification) => log_notification(&notification),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Missed {} session notifications", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    session.stop_recording().await?;
                    tokio::select! {
                        settled = session.wait_until_settled() => {
                            settled?;
                        }
                        _ = tokio::signal::ctrl_c() => {
                            tracing::warn!("Second Ctrl+C, abandoning the in-flight session");
                        }
                    }
                    break;
                }
            }
        }

        if let Ok(status) = session.status().await {
            tracing::info!(
                "Final status: {}",
                serde_json::to_string(&status).unwrap_or_default()
            );
        }

        tracing::info!("signcap shutdown complete");
        Ok(())
    }

    fn setup_detection(
        config: &Config,
        clock: Arc<dyn FrameClock>,
        detection_tx: mpsc::Sender<DetectionEvent>,
    ) -> (DetectorHandle<HandResult>, DetectorHandle<PoseResult>) {
        let correlator = Correlator::new(config.join_policy, clock, config.debounce_window_ms);
        let (service, hand, pose) =
            CorrelatorService::new(correlator, config.detector_queue_depth, detection_tx);
        tokio::spawn(service.run());

        (hand, pose)
    }

    fn setup_session(
        config: &Config,
        clock: Arc<dyn FrameClock>,
        detection_rx: mpsc::Receiver<DetectionEvent>,
    ) -> SessionHandle {
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let device = FfmpegDevice::new(config.ffmpeg_settings());
        let (capture_controller, capture, capture_state) =
            CaptureController::new(Box::new(device), config.output_dir.clone(), capture_tx);
        tokio::spawn(capture_controller.run());

        let inputs = SessionInputs {
            detection_rx,
            capture_rx,
            capture,
            capture_state,
        };
        let post = SessionPostProcessor::new(config.post_processor_settings());
        let (controller, handle) =
            SessionController::new(config.session_settings(), clock, inputs, post);
        tokio::spawn(controller.run());

        handle
    }
}

fn log_notification(notification: &SessionNotification) {
    match notification {
        SessionNotification::Presence(change) => {
            tracing::info!("Hands {}", if change.present { "detected" } else { "lost" });
        }
        SessionNotification::Started => tracing::info!("Recording started"),
        SessionNotification::RecordingStateChanged(state) => {
            tracing::debug!("Recording state: {:?}", state);
        }
        SessionNotification::ProcessingStateChanged(state) => {
            tracing::debug!("Processing state: {:?}", state);
        }
        SessionNotification::ProcessingCompleted(outcome) if outcome.success => {
            tracing::info!(
                "Complete! {}",
                serde_json::to_string(&outcome.artifact).unwrap_or_default()
            );
        }
        SessionNotification::ProcessingCompleted(outcome) => {
            tracing::error!("Session failed: {}", outcome.message);
        }
        SessionNotification::DetectorUnavailable(report) => {
            tracing::error!("Detector unavailable [{}]: {}", report.code, report.message);
        }
    }
}
