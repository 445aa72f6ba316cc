//! Keypoint-series tabular artifact
//!
//! One header row, then one row per correlated frame:
//!
//! ```text
//! timestamp_ms | pose 17 x (x,y,z,visibility) | left hand 21 x (x,y,z) | right hand 21 x (x,y,z)
//! ```
//!
//! Every row has exactly [`COLUMN_COUNT`] fields. A block with no data is
//! written as `0.000000` repeated to the block's width.

use super::buffer::SessionRecording;
use crate::detection::{CorrelatedFrame, HandResult, Handedness, Keypoint, PoseResult};
use crate::error::{SessionError, SessionResult};
use std::fmt::Write as _;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const POSE_KEYPOINTS: usize = 17;
pub const POSE_VALUES: usize = 4;
pub const HAND_KEYPOINTS: usize = 21;
pub const HAND_VALUES: usize = 3;

pub const POSE_COLUMNS: usize = POSE_KEYPOINTS * POSE_VALUES;
pub const HAND_COLUMNS: usize = HAND_KEYPOINTS * HAND_VALUES;
pub const COLUMN_COUNT: usize = 1 + POSE_COLUMNS + 2 * HAND_COLUMNS;

const ZERO: &str = "0.000000";

/// Pose keypoints at or below this visibility are written as zeros
pub const VISIBILITY_THRESHOLD: f32 = 0.3;

pub fn header() -> String {
    let mut header = String::from("timestamp_ms");
    for i in 0..COLUMN_COUNT - 1 {
        let _ = write!(header, ",kp_{}", i);
    }
    header
}

/// Visibility of a pose keypoint: the detector's own score when it has one,
/// otherwise [`geometric_visibility`].
pub fn pose_visibility(index: usize, kp: &Keypoint) -> f32 {
    kp.visibility
        .or(kp.presence)
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| geometric_visibility(index, kp))
        .clamp(0.0, 1.0)
}

/// Estimate from frame bounds, depth and how reliably each joint is tracked
pub fn geometric_visibility(index: usize, kp: &Keypoint) -> f32 {
    let mut visibility = 1.0f32;

    if !(0.0..=1.0).contains(&kp.x) || !(0.0..=1.0).contains(&kp.y) {
        visibility *= 0.3;
    }

    if kp.z < -0.5 {
        visibility *= 0.7;
    } else if kp.z < -0.2 {
        visibility *= 0.85;
    }

    visibility *= match index {
        11 | 12 => 0.95, // shoulders
        13 | 14 => 0.90, // elbows
        15 | 16 => 0.80, // wrists
        _ => 0.85,
    };

    visibility.clamp(0.0, 1.0)
}

fn push_value(row: &mut String, value: f32) {
    let value = if value.is_finite() { value } else { 0.0 };
    let _ = write!(row, ",{:.6}", value);
}

fn push_zeros(row: &mut String, count: usize) {
    for _ in 0..count {
        row.push(',');
        row.push_str(ZERO);
    }
}

fn push_pose(row: &mut String, pose: Option<&PoseResult>) {
    let Some(keypoints) = pose.and_then(PoseResult::primary) else {
        push_zeros(row, POSE_COLUMNS);
        return;
    };

    for index in 0..POSE_KEYPOINTS {
        let visible = keypoints
            .get(index)
            .map(|kp| (kp, pose_visibility(index, kp)))
            .filter(|(_, visibility)| *visibility > VISIBILITY_THRESHOLD);

        match visible {
            Some((kp, visibility)) => {
                push_value(row, kp.x);
                push_value(row, kp.y);
                push_value(row, kp.z);
                push_value(row, visibility);
            }
            None => push_zeros(row, POSE_VALUES),
        }
    }
}

fn push_hand(row: &mut String, hand: Option<&HandResult>, side: Handedness) {
    let Some(instance) = hand.and_then(|h| h.side(side)) else {
        push_zeros(row, HAND_COLUMNS);
        return;
    };

    for index in 0..HAND_KEYPOINTS {
        match instance.keypoints.get(index) {
            Some(kp) => {
                push_value(row, kp.x);
                push_value(row, kp.y);
                push_value(row, kp.z);
            }
            None => push_zeros(row, HAND_VALUES),
        }
    }
}

/// Encode one frame into `row` (cleared first)
pub fn encode_row(row: &mut String, timestamp_ms: u64, frame: &CorrelatedFrame) {
    row.clear();
    let _ = write!(row, "{}", timestamp_ms);
    push_pose(row, frame.pose.as_deref());
    push_hand(row, frame.hand.as_deref(), Handedness::Left);
    push_hand(row, frame.hand.as_deref(), Handedness::Right);
}

/// Write the full table. Returns the number of data rows.
pub fn write_series<W: Write>(writer: W, recording: &SessionRecording) -> io::Result<usize> {
    let mut writer = BufWriter::new(writer);
    writeln!(writer, "{}", header())?;

    let mut row = String::with_capacity(COLUMN_COUNT * 10);
    let mut last = 0u64;
    for frame in &recording.frames {
        // relative to session start and never running backwards
        let timestamp = frame.timestamp.saturating_sub(recording.started_at).max(last);
        last = timestamp;

        encode_row(&mut row, timestamp, frame);
        writeln!(writer, "{}", row)?;
    }

    writer.flush()?;
    Ok(recording.frames.len())
}

/// Write `landmarks_<stamp>.csv` into `dir`.
///
/// The table is written to a temporary file in the same directory and only
/// renamed into place once complete, so a failed write leaves nothing behind.
pub fn write_series_file(dir: &Path, recording: &SessionRecording, stamp: &str) -> SessionResult<PathBuf> {
    if recording.is_empty() {
        return Err(SessionError::BufferEmpty);
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("landmarks_{}.csv", stamp));

    let mut tmp = tempfile::Builder::new()
        .prefix(".landmarks-")
        .suffix(".csv.part")
        .tempfile_in(dir)?;
    let rows = write_series(tmp.as_file_mut(), recording)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| SessionError::Serialization(e.error))?;

    tracing::info!("Wrote {} landmark rows to {:?}", rows, path);
    Ok(path)
}
