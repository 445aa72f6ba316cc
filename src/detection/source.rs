use super::correlator::DetectorHandle;
use super::result::{HandResult, PoseResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One line of the detector binding protocol
///
/// ```text
/// {"channel":"hand","result":{"hands":[...]}}
/// {"channel":"pose","result":{"poses":[[...]]}}
/// {"channel":"pose","error":"pose_landmarker_full.task not found"}
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
enum SourceLine {
    Hand {
        #[serde(default)]
        result: Option<HandResult>,
        #[serde(default)]
        error: Option<String>,
    },
    Pose {
        #[serde(default)]
        result: Option<PoseResult>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Read newline-delimited detector output and route it to the correlator.
///
/// Returns when the reader hits EOF or both channels have closed.
/// Malformed lines are logged and skipped.
pub async fn pump_detector_lines<R>(
    reader: R,
    hand: DetectorHandle<HandResult>,
    pose: DetectorHandle<PoseResult>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read detector output")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed: SourceLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Skipping malformed detector line: {}", e);
                continue;
            }
        };

        match parsed {
            SourceLine::Hand { error: Some(e), .. } => hand.fail(e).await,
            SourceLine::Hand {
                result: Some(r), ..
            } => {
                hand.submit(r);
            }
            SourceLine::Pose { error: Some(e), .. } => pose.fail(e).await,
            SourceLine::Pose {
                result: Some(r), ..
            } => {
                pose.submit(r);
            }
            _ => tracing::warn!("Detector line has neither result nor error"),
        }
    }

    tracing::info!("Detector output closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detection::correlator::{Correlator, CorrelatorService, JoinPolicy};
    use crate::messages::DetectionEvent;
    use std::sync::Arc;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_lines_are_routed_and_garbage_skipped() {
        let input = concat!(
            "{\"channel\":\"pose\",\"result\":{\"poses\":[[{\"x\":0.1,\"y\":0.2}]]}}\n",
            "not json at all\n",
            "\n",
            "{\"channel\":\"hand\",\"result\":{\"hands\":[{\"handedness\":\"Left\",\"keypoints\":[]}]}}\n",
            "{\"channel\":\"pose\",\"error\":\"model missing\"}\n",
        );

        let correlator = Correlator::new(JoinPolicy::Latest, Arc::new(ManualClock::new(0)), 100);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (service, hand, pose) = CorrelatorService::new(correlator, 8, out_tx);

        pump_detector_lines(BufReader::new(input.as_bytes()), hand, pose)
            .await
            .unwrap();
        service.run().await;

        let mut frames = 0;
        let mut failures = 0;
        while let Ok(event) = out_rx.try_recv() {
            match event {
                DetectionEvent::Frame(_) => frames += 1,
                DetectionEvent::ChannelFailed { .. } => failures += 1,
                DetectionEvent::Presence(_) => {}
            }
        }
        assert_eq!(frames, 1);
        assert_eq!(failures, 1);
    }
}
