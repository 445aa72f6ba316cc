//! Camera capture through an ffmpeg subprocess
//!
//! ffmpeg reads the camera directly and encodes to the session's video file.
//! Stopping writes `q` to its stdin so the container is finalized properly;
//! the exit status and stderr decide which lifecycle event is reported.

use super::device::CaptureDevice;
use crate::error::CaptureErrorKind;
use crate::messages::DeviceEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;

/// Lines of ffmpeg stderr kept for error classification
const STDERR_TAIL: usize = 50;

static STDERR_PATTERNS: LazyLock<Vec<(Regex, CaptureErrorKind)>> = LazyLock::new(|| {
    [
        (
            r"(?i)no space left on device|disk quota exceeded",
            CaptureErrorKind::StorageExhausted,
        ),
        (
            r"(?i)unrecognized option|invalid argument|unknown encoder|option \S+ not found",
            CaptureErrorKind::InvalidConfiguration,
        ),
        (
            r"(?i)no such file or directory|device or resource busy|input/output error|cannot open video device",
            CaptureErrorKind::SourceInactive,
        ),
        (
            r"(?i)error while opening encoder|error initializing output stream|conversion failed",
            CaptureErrorKind::EncodingFailure,
        ),
        (
            r"(?i)output file is empty|does not contain any stream",
            CaptureErrorKind::NoData,
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
    .collect()
});

/// Map ffmpeg diagnostics onto the capture failure taxonomy
pub fn classify_stderr(stderr: &str) -> Option<CaptureErrorKind> {
    STDERR_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(stderr))
        .map(|(_, kind)| *kind)
}

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub program: String,
    pub input_format: String,
    pub input: String,
    pub framerate: u32,
    pub video_codec: String,
}

struct Running {
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
    stopping: Arc<AtomicBool>,
}

pub struct FfmpegDevice {
    settings: FfmpegSettings,
    running: Option<Running>,
}

impl FfmpegDevice {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self {
            settings,
            running: None,
        }
    }

    fn args(&self, output: &Path) -> Vec<String> {
        let s = &self.settings;
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            s.input_format.clone(),
            "-framerate".into(),
            s.framerate.to_string(),
            "-i".into(),
            s.input.clone(),
            "-c:v".into(),
            s.video_codec.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            output.to_string_lossy().into_owned(),
        ]
    }

    async fn signal(&self, signal: &str) -> Result<()> {
        let pid = self
            .running
            .as_ref()
            .and_then(|r| r.pid)
            .context("ffmpeg is not running")?;

        let status = Command::new("kill")
            .arg(signal)
            .arg(pid.to_string())
            .status()
            .await
            .context("Failed to run kill")?;

        if !status.success() {
            anyhow::bail!("kill {} {} exited with {}", signal, pid, status);
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureDevice for FfmpegDevice {
    async fn start(
        &mut self,
        output: &Path,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<(), CaptureErrorKind> {
        let mut child = Command::new(&self.settings.program)
            .args(self.args(output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn {}: {}", self.settings.program, e);
                match e.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        CaptureErrorKind::InvalidConfiguration
                    }
                    _ => CaptureErrorKind::EncoderFault,
                }
            })?;

        let stopping = Arc::new(AtomicBool::new(false));
        self.running = Some(Running {
            stdin: child.stdin.take(),
            pid: child.id(),
            stopping: Arc::clone(&stopping),
        });

        let stderr = child.stderr.take();
        let output = output.to_path_buf();
        let _ = events.send(DeviceEvent::Started);

        tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("ffmpeg: {}", line);
                    if tail.len() == STDERR_TAIL {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            }

            let status = child.wait().await;
            let diagnostics = tail.join("\n");
            let event = exit_event(
                status.map(|s| s.success()).unwrap_or(false),
                stopping.load(Ordering::SeqCst),
                &diagnostics,
                output,
            );
            let _ = events.send(event);
        });

        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        running.stopping.store(true, Ordering::SeqCst);
        if let Some(mut stdin) = running.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::warn!("Failed to ask ffmpeg to finish: {}", e);
            }
            let _ = stdin.flush().await;
        }

        // a paused encoder never reads the request
        if let Err(e) = self.signal("-CONT").await {
            tracing::debug!("Could not continue ffmpeg before stopping: {:#}", e);
        }
        self.running = None;
    }

    async fn pause(&mut self) -> Result<()> {
        self.signal("-STOP").await
    }

    async fn resume(&mut self) -> Result<()> {
        self.signal("-CONT").await
    }
}

/// Decide what an exited ffmpeg process means for the session
fn exit_event(success: bool, requested: bool, stderr: &str, output: PathBuf) -> DeviceEvent {
    if !requested {
        let kind = classify_stderr(stderr).unwrap_or(CaptureErrorKind::SourceInactive);
        return DeviceEvent::Error(kind);
    }

    if !success {
        let kind = classify_stderr(stderr).unwrap_or(CaptureErrorKind::EncoderFault);
        return DeviceEvent::Finalized(Err(kind));
    }

    match std::fs::metadata(&output) {
        Ok(meta) if meta.len() > 0 => DeviceEvent::Finalized(Ok(output)),
        _ => DeviceEvent::Finalized(Err(CaptureErrorKind::NoData)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(program: &str) -> FfmpegSettings {
        FfmpegSettings {
            program: program.to_string(),
            input_format: "v4l2".to_string(),
            input: "/dev/video0".to_string(),
            framerate: 30,
            video_codec: "libx264".to_string(),
        }
    }

    #[test]
    fn test_classify_stderr() {
        assert_eq!(
            classify_stderr("av_interleaved_write_frame(): No space left on device"),
            Some(CaptureErrorKind::StorageExhausted)
        );
        assert_eq!(
            classify_stderr("/dev/video0: Device or resource busy"),
            Some(CaptureErrorKind::SourceInactive)
        );
        assert_eq!(
            classify_stderr("Unknown encoder 'libx265'"),
            Some(CaptureErrorKind::InvalidConfiguration)
        );
        assert_eq!(
            classify_stderr("Error while opening encoder for output stream #0:0"),
            Some(CaptureErrorKind::EncodingFailure)
        );
        assert_eq!(classify_stderr("frame=  120 fps= 30"), None);
    }

    #[test]
    fn test_exit_event_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");

        assert_eq!(
            exit_event(false, false, "", video.clone()),
            DeviceEvent::Error(CaptureErrorKind::SourceInactive)
        );
        assert_eq!(
            exit_event(true, true, "", video.clone()),
            DeviceEvent::Finalized(Err(CaptureErrorKind::NoData))
        );

        std::fs::write(&video, b"not really mp4").unwrap();
        assert_eq!(
            exit_event(true, true, "", video.clone()),
            DeviceEvent::Finalized(Ok(video.clone()))
        );
        assert_eq!(
            exit_event(false, true, "No space left on device", video),
            DeviceEvent::Finalized(Err(CaptureErrorKind::StorageExhausted))
        );
    }

    #[test]
    fn test_args_end_with_output() {
        let device = FfmpegDevice::new(settings("ffmpeg"));
        let args = device.args(Path::new("/tmp/out.mp4"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "v4l2"));
    }

    #[tokio::test]
    async fn test_missing_program_is_invalid_configuration() {
        let mut device = FfmpegDevice::new(settings("signcap-no-such-encoder-binary"));
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = device.start(Path::new("/tmp/never.mp4"), tx).await;
        assert_eq!(result, Err(CaptureErrorKind::InvalidConfiguration));
    }

    #[tokio::test]
    async fn test_started_precedes_unexpected_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = FfmpegDevice::new(settings("true"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        device.start(&dir.path().join("video.mp4"), tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(DeviceEvent::Started));
        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(exit, Some(DeviceEvent::Error(CaptureErrorKind::SourceInactive)));
    }
}
