//! Sampled still frames from the recorded video, via ffprobe/ffmpeg

use crate::error::{SessionError, SessionResult};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// What ffprobe could tell us about the recorded video
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoMetadata {
    pub duration_ms: Option<u64>,
    pub fps: Option<f64>,
}

/// Parse `key=value` lines from
/// `ffprobe -show_entries stream=r_frame_rate:format=duration -of default=noprint_wrappers=1`
pub fn parse_probe_output(output: &str) -> VideoMetadata {
    let mut meta = VideoMetadata::default();

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "r_frame_rate" | "avg_frame_rate" if meta.fps.is_none() => {
                meta.fps = parse_rate(value);
            }
            "duration" => {
                meta.duration_ms = value
                    .parse::<f64>()
                    .ok()
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .map(|d| (d * 1000.0).round() as u64);
            }
            _ => {}
        }
    }

    meta
}

/// "30/1", "30000/1001" or a plain number
fn parse_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}

pub fn probe_video(ffprobe: &str, video: &Path) -> SessionResult<VideoMetadata> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate:format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(video)
        .output()
        .map_err(|e| SessionError::Decode(format!("Failed to run {}: {}", ffprobe, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SessionError::Decode(format!("ffprobe failed: {}", stderr.trim())));
    }

    Ok(parse_probe_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Rate at which stills are taken: the video's own rate (or `default_fps`)
/// divided by `stride`
pub fn sampling_rate(meta: &VideoMetadata, default_fps: f64, stride: u32) -> f64 {
    let fps = meta.fps.unwrap_or(default_fps);
    fps / f64::from(stride.max(1))
}

pub fn frame_file_name(stamp: &str, index: usize) -> String {
    format!("frame_{}_{:04}.jpg", stamp, index)
}

/// Decode `video` and write one JPEG per sampled instant into `dir`.
///
/// Frames are decoded into a staging directory first; nothing appears in
/// `dir` unless the whole extraction succeeded.
pub fn extract_frames(
    ffmpeg: &str,
    video: &Path,
    dir: &Path,
    stamp: &str,
    rate: f64,
) -> SessionResult<Vec<PathBuf>> {
    let created = !dir.exists();
    std::fs::create_dir_all(dir)?;

    let result = decode_into(ffmpeg, video, dir, stamp, rate);
    if result.is_err() && created {
        // staging is gone by now; remove_dir only succeeds on an empty dir
        if let Err(e) = std::fs::remove_dir(dir) {
            tracing::warn!("Could not remove {:?} after failed extraction: {}", dir, e);
        }
    }
    result
}

fn decode_into(
    ffmpeg: &str,
    video: &Path,
    dir: &Path,
    stamp: &str,
    rate: f64,
) -> SessionResult<Vec<PathBuf>> {
    let staging = tempfile::Builder::new().prefix(".frames-").tempdir_in(dir)?;

    tracing::info!("Extracting frames from {:?} at {:.3} fps", video, rate);

    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(video)
        .args([
            "-vf",
            &format!("fps={}", rate),
            "-q:v",
            "2",
            "-start_number",
            "0",
        ])
        .arg(staging.path().join("%06d.jpg"))
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SessionError::Decode(format!("Failed to run {}: {}", ffmpeg, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SessionError::Decode(format!("ffmpeg failed: {}", stderr.trim())));
    }

    let mut decoded: Vec<PathBuf> = std::fs::read_dir(staging.path())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
        .collect();
    decoded.sort();

    if decoded.is_empty() {
        return Err(SessionError::Decode("no frames could be decoded".to_string()));
    }

    publish_frames(&decoded, dir, stamp)
}

/// Move staged frames into place under their final sequence names
fn publish_frames(staged: &[PathBuf], dir: &Path, stamp: &str) -> SessionResult<Vec<PathBuf>> {
    let mut published = Vec::with_capacity(staged.len());

    for (index, source) in staged.iter().enumerate() {
        let target = dir.join(frame_file_name(stamp, index));
        if let Err(e) = std::fs::rename(source, &target) {
            for done in &published {
                let _ = std::fs::remove_file(done);
            }
            return Err(e.into());
        }
        published.push(target);
    }

    tracing::info!("Extracted {} frames into {:?}", published.len(), dir);
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let meta = parse_probe_output("r_frame_rate=30000/1001\nduration=3.200000\n");
        assert!((meta.fps.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(meta.duration_ms, Some(3200));
    }

    #[test]
    fn test_parse_probe_output_unknown_values() {
        let meta = parse_probe_output("r_frame_rate=0/0\nduration=N/A\n");
        assert_eq!(meta, VideoMetadata::default());
    }

    #[test]
    fn test_sampling_rate_falls_back_to_default() {
        let unknown = VideoMetadata::default();
        assert_eq!(sampling_rate(&unknown, 30.0, 1), 30.0);

        let known = VideoMetadata {
            duration_ms: Some(1000),
            fps: Some(24.0),
        };
        assert_eq!(sampling_rate(&known, 30.0, 2), 12.0);
        assert_eq!(sampling_rate(&known, 30.0, 0), 24.0);
    }

    #[test]
    fn test_frame_file_name_is_zero_padded() {
        assert_eq!(frame_file_name("20260101_120000", 7), "frame_20260101_120000_0007.jpg");
        assert_eq!(frame_file_name("s", 12345), "frame_s_12345.jpg");
    }

    #[test]
    fn test_publish_frames_renames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir_in(dir.path()).unwrap();
        let staged: Vec<_> = (1..=3)
            .map(|i| {
                let p = staging.path().join(format!("{:06}.jpg", i));
                std::fs::write(&p, [i as u8]).unwrap();
                p
            })
            .collect();

        let published = publish_frames(&staged, dir.path(), "stamp").unwrap();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].file_name().unwrap(), "frame_stamp_0000.jpg");
        assert_eq!(std::fs::read(&published[2]).unwrap(), vec![3u8]);
    }

    #[test]
    fn test_missing_decoder_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_frames(
            "signcap-no-such-ffmpeg",
            Path::new("/nonexistent.mp4"),
            dir.path(),
            "s",
            30.0,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
    }

    #[test]
    fn test_failed_extraction_removes_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let frames_dir = dir.path().join("frames_s");

        let err = extract_frames(
            "signcap-no-such-ffmpeg",
            Path::new("/nonexistent.mp4"),
            &frames_dir,
            "s",
            30.0,
        )
        .unwrap_err();

        assert!(matches!(err, SessionError::Decode(_)));
        assert!(!frames_dir.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
