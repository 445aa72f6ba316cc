use crate::processing::ProcessingArtifact;
use anyhow::{Context, Result};
use tokio::process::Command;

/// Hand a finished artifact to an external command (upload, export, ...).
///
/// The command runs through `sh -c` with the artifact in its environment:
/// `SIGNCAP_ARTIFACT` (JSON), `SIGNCAP_TABULAR_PATH` and `SIGNCAP_FRAMES_DIR`.
pub async fn run_artifact_hook(command: &str, artifact: &ProcessingArtifact) -> Result<()> {
    tracing::info!("[artifact] Running hook: {}", command);

    let json = serde_json::to_string(artifact).context("Failed to serialize artifact")?;
    let tabular = artifact
        .tabular_file_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let frames_dir = artifact
        .sampled_frame_paths
        .as_ref()
        .and_then(|paths| paths.first())
        .and_then(|p| p.parent())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("SIGNCAP_ARTIFACT", json)
        .env("SIGNCAP_TABULAR_PATH", tabular)
        .env("SIGNCAP_FRAMES_DIR", frames_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .context("Failed to spawn artifact hook")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("hook exited with {}: {}", output.status, stderr.trim());
    }

    Ok(())
}
