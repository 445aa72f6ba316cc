use crate::capture::FfmpegSettings;
use crate::detection::JoinPolicy;
use crate::processing::{PostProcessorSettings, ProcessingMode};
use crate::services::SessionSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub processing_mode: ProcessingMode,

    #[serde(default = "default_debounce_window")]
    pub debounce_window_ms: u64,

    #[serde(default)]
    pub join_policy: JoinPolicy,

    #[serde(default = "default_auto_capture")]
    pub auto_capture: bool,

    #[serde(default)]
    pub fallback_to_frames: bool,

    #[serde(default = "default_queue_depth")]
    pub detector_queue_depth: usize,

    #[serde(default = "default_capture_program")]
    pub capture_program: String,

    #[serde(default = "default_probe_program")]
    pub probe_program: String,

    #[serde(default = "default_input_format")]
    pub capture_input_format: String,

    #[serde(default = "default_input")]
    pub capture_input: String,

    #[serde(default = "default_capture_framerate")]
    pub capture_framerate: u32,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    #[serde(default = "default_frame_rate")]
    pub default_frame_rate: f64,

    #[serde(default = "default_frame_stride")]
    pub frame_stride: u32,

    #[serde(default)]
    pub artifact_hook: Option<String>,
}

fn default_output_dir() -> PathBuf {
    let data_dir = if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(dir)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("share")
    } else {
        std::env::temp_dir()
    };

    data_dir.join("signcap")
}

fn default_debounce_window() -> u64 {
    1000
}

fn default_auto_capture() -> bool {
    true
}

fn default_queue_depth() -> usize {
    8
}

fn default_capture_program() -> String {
    "ffmpeg".to_string()
}

fn default_probe_program() -> String {
    "ffprobe".to_string()
}

fn default_input_format() -> String {
    "v4l2".to_string()
}

fn default_input() -> String {
    "/dev/video0".to_string()
}

fn default_capture_framerate() -> u32 {
    30
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_frame_rate() -> f64 {
    30.0
}

fn default_frame_stride() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            processing_mode: ProcessingMode::default(),
            debounce_window_ms: default_debounce_window(),
            join_policy: JoinPolicy::default(),
            auto_capture: default_auto_capture(),
            fallback_to_frames: false,
            detector_queue_depth: default_queue_depth(),
            capture_program: default_capture_program(),
            probe_program: default_probe_program(),
            capture_input_format: default_input_format(),
            capture_input: default_input(),
            capture_framerate: default_capture_framerate(),
            video_codec: default_video_codec(),
            default_frame_rate: default_frame_rate(),
            frame_stride: default_frame_stride(),
            artifact_hook: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/signcap/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("signcap").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_window_ms == 0 {
            return Err(anyhow::anyhow!("debounce_window_ms must be greater than 0"));
        }

        if self.detector_queue_depth == 0 {
            return Err(anyhow::anyhow!("detector_queue_depth must be greater than 0"));
        }

        if self.capture_framerate == 0 {
            return Err(anyhow::anyhow!("capture_framerate must be greater than 0"));
        }

        if self.frame_stride == 0 {
            return Err(anyhow::anyhow!("frame_stride must be greater than 0"));
        }

        if !(self.default_frame_rate.is_finite() && self.default_frame_rate > 0.0) {
            return Err(anyhow::anyhow!("default_frame_rate must be a positive number"));
        }

        if self.capture_program.is_empty() || self.probe_program.is_empty() {
            return Err(anyhow::anyhow!("capture_program and probe_program cannot be empty"));
        }

        if self.capture_input.is_empty() {
            return Err(anyhow::anyhow!("capture_input cannot be empty"));
        }

        Ok(())
    }

    pub fn ffmpeg_settings(&self) -> FfmpegSettings {
        FfmpegSettings {
            program: self.capture_program.clone(),
            input_format: self.capture_input_format.clone(),
            input: self.capture_input.clone(),
            framerate: self.capture_framerate,
            video_codec: self.video_codec.clone(),
        }
    }

    pub fn post_processor_settings(&self) -> PostProcessorSettings {
        PostProcessorSettings {
            output_dir: self.output_dir.clone(),
            ffmpeg: self.capture_program.clone(),
            ffprobe: self.probe_program.clone(),
            default_frame_rate: self.default_frame_rate,
            frame_stride: self.frame_stride,
            fallback_to_frames: self.fallback_to_frames,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            auto_capture: self.auto_capture,
            mode: self.processing_mode,
            artifact_hook: self.artifact_hook.clone().filter(|hook| !hook.trim().is_empty()),
        }
    }
}
