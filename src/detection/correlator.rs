use super::debounce::PresenceDebouncer;
use super::result::{HandResult, PoseResult};
use crate::clock::{FrameClock, Millis};
use crate::error::DetectorChannel;
use crate::messages::DetectionEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Timestamped pairing of the latest hand and pose results
#[derive(Debug, Clone)]
pub struct CorrelatedFrame {
    pub timestamp: Millis,
    pub hand: Option<Arc<HandResult>>,
    pub pose: Option<Arc<PoseResult>>,
}

/// How results from the two channels are paired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Pair whatever is newest on each channel; may mix camera frames under load
    #[default]
    Latest,
    /// Only pair results tagged with the same source frame id
    FrameId,
}

/// Message carried on a detector channel
#[derive(Debug, Clone)]
pub enum DetectorMessage<T> {
    Result(T),
    /// The detector could not be initialised; the channel stays silent afterwards
    Failed(String),
}

#[derive(Debug)]
enum Slot<T> {
    Empty,
    Latest(Arc<T>),
    Failed,
}

impl<T> Slot<T> {
    fn is_ready(&self) -> bool {
        !matches!(self, Slot::Empty)
    }

    fn value(&self) -> Option<Arc<T>> {
        match self {
            Slot::Latest(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }
}

/// Latest-value join of the hand and pose channels
///
/// Owns both single-slot holders and the presence debouncer. Only the
/// correlator service task touches it.
pub struct Correlator {
    policy: JoinPolicy,
    clock: Arc<dyn FrameClock>,
    debouncer: PresenceDebouncer,
    hand: Slot<HandResult>,
    pose: Slot<PoseResult>,
    last_joined_id: Option<u64>,
}

impl Correlator {
    pub fn new(policy: JoinPolicy, clock: Arc<dyn FrameClock>, debounce_window_ms: Millis) -> Self {
        Self {
            policy,
            clock,
            debouncer: PresenceDebouncer::new(debounce_window_ms),
            hand: Slot::Empty,
            pose: Slot::Empty,
            last_joined_id: None,
        }
    }

    pub fn on_hand_result(&mut self, result: HandResult) -> Vec<DetectionEvent> {
        if matches!(self.hand, Slot::Failed) {
            return Vec::new();
        }

        let mut events = Vec::new();
        let now = self.clock.now_ms();
        if let Some(change) = self.debouncer.sample(result.has_instances(), now) {
            events.push(DetectionEvent::Presence(change));
        }

        self.hand = Slot::Latest(Arc::new(result));
        events.extend(self.try_emit(now).map(DetectionEvent::Frame));
        events
    }

    pub fn on_pose_result(&mut self, result: PoseResult) -> Vec<DetectionEvent> {
        if matches!(self.pose, Slot::Failed) {
            return Vec::new();
        }

        self.pose = Slot::Latest(Arc::new(result));
        let now = self.clock.now_ms();
        self.try_emit(now).map(DetectionEvent::Frame).into_iter().collect()
    }

    /// Marks a channel dead. Reported once; later failures are swallowed.
    pub fn on_channel_failed(&mut self, channel: DetectorChannel, detail: String) -> Vec<DetectionEvent> {
        let already_failed = match channel {
            DetectorChannel::Hand => {
                matches!(std::mem::replace(&mut self.hand, Slot::Failed), Slot::Failed)
            }
            DetectorChannel::Pose => {
                matches!(std::mem::replace(&mut self.pose, Slot::Failed), Slot::Failed)
            }
        };

        if already_failed {
            return Vec::new();
        }

        tracing::error!("{} detector unavailable: {}", channel, detail);
        let mut events = vec![DetectionEvent::ChannelFailed { channel, detail }];

        // no more hand results will ever arrive to close an open presence edge
        if channel == DetectorChannel::Hand {
            let now = self.clock.now_ms();
            events.extend(self.debouncer.force_absent(now).map(DetectionEvent::Presence));
        }
        events
    }

    fn try_emit(&mut self, now: Millis) -> Option<CorrelatedFrame> {
        if !self.hand.is_ready() || !self.pose.is_ready() {
            return None;
        }

        let hand = self.hand.value();
        let pose = self.pose.value();
        if hand.is_none() && pose.is_none() {
            return None;
        }

        if self.policy == JoinPolicy::FrameId {
            let hand_id = hand.as_ref().map(|h| h.frame_id);
            let pose_id = pose.as_ref().map(|p| p.frame_id);
            let joined = match (hand_id, pose_id) {
                (Some(Some(a)), Some(Some(b))) if a == b => a,
                (Some(Some(a)), None) => a,
                (None, Some(Some(b))) => b,
                _ => return None,
            };
            if self.last_joined_id == Some(joined) {
                return None;
            }
            self.last_joined_id = Some(joined);
        }

        Some(CorrelatedFrame {
            timestamp: now,
            hand,
            pose,
        })
    }
}

/// Sending side of one detector channel
#[derive(Debug)]
pub struct DetectorHandle<T> {
    channel: DetectorChannel,
    tx: mpsc::Sender<DetectorMessage<T>>,
}

impl<T> Clone for DetectorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            tx: self.tx.clone(),
        }
    }
}

impl<T> DetectorHandle<T> {
    /// Hand a result to the correlator without blocking the detector thread.
    ///
    /// Returns false if the result was dropped because the queue is full or
    /// the correlator has shut down.
    pub fn submit(&self, result: T) -> bool {
        match self.tx.try_send(DetectorMessage::Result(result)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("{} detector queue full, dropping stale result", self.channel);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub async fn fail(&self, detail: impl Into<String>) {
        let _ = self.tx.send(DetectorMessage::Failed(detail.into())).await;
    }
}

/// Runs the correlator on its own task, fed by two bounded channels
pub struct CorrelatorService {
    correlator: Correlator,
    hand_rx: mpsc::Receiver<DetectorMessage<HandResult>>,
    pose_rx: mpsc::Receiver<DetectorMessage<PoseResult>>,
    out: mpsc::Sender<DetectionEvent>,
}

impl CorrelatorService {
    pub fn new(
        correlator: Correlator,
        queue_depth: usize,
        out: mpsc::Sender<DetectionEvent>,
    ) -> (Self, DetectorHandle<HandResult>, DetectorHandle<PoseResult>) {
        let (hand_tx, hand_rx) = mpsc::channel(queue_depth);
        let (pose_tx, pose_rx) = mpsc::channel(queue_depth);

        let service = Self {
            correlator,
            hand_rx,
            pose_rx,
            out,
        };
        let hand = DetectorHandle {
            channel: DetectorChannel::Hand,
            tx: hand_tx,
        };
        let pose = DetectorHandle {
            channel: DetectorChannel::Pose,
            tx: pose_tx,
        };

        (service, hand, pose)
    }

    pub async fn run(mut self) {
        let mut hand_open = true;
        let mut pose_open = true;

        while hand_open || pose_open {
            let events = tokio::select! {
                msg = self.hand_rx.recv(), if hand_open => match msg {
                    Some(DetectorMessage::Result(result)) => self.correlator.on_hand_result(result),
                    Some(DetectorMessage::Failed(detail)) => {
                        self.correlator.on_channel_failed(DetectorChannel::Hand, detail)
                    }
                    None => {
                        hand_open = false;
                        Vec::new()
                    }
                },
                msg = self.pose_rx.recv(), if pose_open => match msg {
                    Some(DetectorMessage::Result(result)) => self.correlator.on_pose_result(result),
                    Some(DetectorMessage::Failed(detail)) => {
                        self.correlator.on_channel_failed(DetectorChannel::Pose, detail)
                    }
                    None => {
                        pose_open = false;
                        Vec::new()
                    }
                },
            };

            for event in events {
                if self.out.send(event).await.is_err() {
                    tracing::debug!("Session controller gone, stopping correlator");
                    return;
                }
            }
        }

        tracing::debug!("Both detector channels closed, correlator exiting");
    }
}
