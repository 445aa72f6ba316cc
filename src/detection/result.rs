use serde::{Deserialize, Serialize};

/// One normalized landmark as reported by a detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,

    /// Detector confidence that the point is visible, when the model exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,

    /// Detector confidence that the point is present in frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<f32>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
            presence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    #[serde(alias = "left", alias = "LEFT")]
    Left,
    #[serde(alias = "right", alias = "RIGHT")]
    Right,
}

/// A single detected hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandInstance {
    #[serde(default)]
    pub handedness: Option<Handedness>,
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
}

/// Output of one hand-detector invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandResult {
    /// Source camera frame, when the binding tags it
    #[serde(default)]
    pub frame_id: Option<u64>,
    #[serde(default)]
    pub hands: Vec<HandInstance>,
}

impl HandResult {
    pub fn has_instances(&self) -> bool {
        !self.hands.is_empty()
    }

    /// First instance labelled with the given side
    pub fn side(&self, side: Handedness) -> Option<&HandInstance> {
        self.hands.iter().find(|h| h.handedness == Some(side))
    }
}

/// Output of one body-pose-detector invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    #[serde(default)]
    pub frame_id: Option<u64>,
    /// One keypoint list per detected person
    #[serde(default)]
    pub poses: Vec<Vec<Keypoint>>,
}

impl PoseResult {
    /// Only the first detected person is tracked
    pub fn primary(&self) -> Option<&[Keypoint]> {
        self.poses.first().map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hand_result_from_binding_json() {
        let json = r#"{
            "frame_id": 7,
            "hands": [
                {"handedness": "right", "keypoints": [{"x": 0.1, "y": 0.2}]},
                {"handedness": "Left", "keypoints": [{"x": 0.3, "y": 0.4, "z": -0.1}]}
            ]
        }"#;

        let result: HandResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.frame_id, Some(7));
        assert!(result.has_instances());
        assert_eq!(result.side(Handedness::Left).unwrap().keypoints[0].x, 0.3);
        assert_eq!(result.side(Handedness::Right).unwrap().keypoints[0].z, 0.0);
    }

    #[test]
    fn test_side_ignores_unlabelled_instances() {
        let result = HandResult {
            frame_id: None,
            hands: vec![HandInstance {
                handedness: None,
                keypoints: vec![Keypoint::new(0.5, 0.5, 0.0)],
            }],
        };

        assert!(result.has_instances());
        assert!(result.side(Handedness::Left).is_none());
        assert!(result.side(Handedness::Right).is_none());
    }

    #[test]
    fn test_pose_primary_is_first_person() {
        let result = PoseResult {
            frame_id: None,
            poses: vec![
                vec![Keypoint::new(0.1, 0.1, 0.0)],
                vec![Keypoint::new(0.9, 0.9, 0.0)],
            ],
        };
        assert_eq!(result.primary().unwrap()[0].x, 0.1);
        assert!(PoseResult::default().primary().is_none());
    }
}
