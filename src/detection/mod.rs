pub mod correlator;
pub mod debounce;
pub mod result;
pub mod source;

pub use correlator::{
    CorrelatedFrame, Correlator, CorrelatorService, DetectorHandle, DetectorMessage, JoinPolicy,
};
pub use debounce::PresenceDebouncer;
pub use result::{HandInstance, HandResult, Handedness, Keypoint, PoseResult};
