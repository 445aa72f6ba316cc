use crate::clock::Millis;
use crate::messages::PresenceChanged;

/// Turns the per-frame "hands present" signal into stable edges
///
/// The first sample that disagrees with the last stable value is emitted
/// immediately and opens a cool-down window. Samples arriving inside the
/// window never produce an event, which absorbs single-frame detector
/// flicker around the present/absent boundary.
#[derive(Debug, Clone)]
pub struct PresenceDebouncer {
    window_ms: Millis,
    last_stable: bool,
    changed_at: Option<Millis>,
}

impl PresenceDebouncer {
    pub fn new(window_ms: Millis) -> Self {
        Self {
            window_ms,
            last_stable: false,
            changed_at: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.last_stable
    }

    pub fn sample(&mut self, present: bool, now: Millis) -> Option<PresenceChanged> {
        if let Some(changed_at) = self.changed_at {
            if now.saturating_sub(changed_at) < self.window_ms {
                return None;
            }
            self.changed_at = None;
        }

        if present == self.last_stable {
            return None;
        }

        self.last_stable = present;
        self.changed_at = Some(now);
        tracing::debug!("Presence changed to {} at {}ms", present, now);

        Some(PresenceChanged { present })
    }

    /// The hand signal is gone for good: drop to absent regardless of the window
    pub fn force_absent(&mut self, now: Millis) -> Option<PresenceChanged> {
        if !self.last_stable {
            return None;
        }

        self.last_stable = false;
        self.changed_at = Some(now);
        tracing::debug!("Presence forced absent at {}ms", now);

        Some(PresenceChanged { present: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_transition_is_immediate() {
        let mut debouncer = PresenceDebouncer::new(500);

        assert_eq!(debouncer.sample(false, 0), None);
        assert_eq!(
            debouncer.sample(true, 10),
            Some(PresenceChanged { present: true })
        );
        assert!(debouncer.is_present());
    }

    #[test]
    fn test_flicker_inside_window_is_ignored() {
        let mut debouncer = PresenceDebouncer::new(1000);

        // 30 frames at ~33ms alternating every frame, all inside one window
        let events: Vec<_> = (0..30u64)
            .filter_map(|i| debouncer.sample(i % 2 == 0, i * 33))
            .collect();

        assert!(events.len() <= 1, "got {} events", events.len());
    }

    #[test]
    fn test_at_most_one_event_per_window() {
        let window = 300;
        let mut debouncer = PresenceDebouncer::new(window);
        let mut emitted_at = Vec::new();

        for t in (0..5000u64).step_by(7) {
            let raw = (t / 11) % 2 == 0;
            if debouncer.sample(raw, t).is_some() {
                emitted_at.push(t);
            }
        }

        assert!(!emitted_at.is_empty());
        for pair in emitted_at.windows(2) {
            assert!(pair[1] - pair[0] >= window);
        }
    }

    #[test]
    fn test_change_held_through_window_is_emitted_after_it() {
        let mut debouncer = PresenceDebouncer::new(200);

        assert!(debouncer.sample(true, 0).is_some());
        // hand lost right away, still cooling down
        assert_eq!(debouncer.sample(false, 50), None);
        assert_eq!(debouncer.sample(false, 150), None);
        // still absent once the window has elapsed
        assert_eq!(
            debouncer.sample(false, 210),
            Some(PresenceChanged { present: false })
        );
        assert!(!debouncer.is_present());
    }

    #[test]
    fn test_steady_signal_emits_nothing() {
        let mut debouncer = PresenceDebouncer::new(100);
        assert!(debouncer.sample(true, 0).is_some());
        for t in 1..100u64 {
            assert_eq!(debouncer.sample(true, t * 40), None);
        }
    }

    #[test]
    fn test_force_absent_ignores_window() {
        let mut debouncer = PresenceDebouncer::new(1000);
        assert_eq!(debouncer.force_absent(0), None);

        debouncer.sample(true, 0);
        assert_eq!(debouncer.force_absent(10), Some(PresenceChanged { present: false }));
        assert!(!debouncer.is_present());
        assert_eq!(debouncer.force_absent(20), None);
    }
}
