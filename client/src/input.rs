//! Client input sampling with sequencing and change detection

use macroquad::prelude::{is_key_down, is_key_pressed, KeyCode};
use shared::InputIntent;
use std::time::{Duration, Instant};

/// Movement keys held during one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionKeys {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl DirectionKeys {
    fn matches(&self, intent: &InputIntent) -> bool {
        self.up == intent.up
            && self.down == intent.down
            && self.left == intent.left
            && self.right == intent.right
    }

    pub fn is_idle(&self) -> bool {
        !(self.up || self.down || self.left || self.right)
    }
}

/// Debug and session keys pressed this frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlKeys {
    pub toggle_prediction: bool,
    pub toggle_reconciliation: bool,
    pub toggle_interpolation: bool,
    pub rejoin: bool,
    pub quit: bool,
}

/// Turns held keys into numbered intents
///
/// A new intent is produced when the keys change, and re-sent every
/// `resend_interval` while a direction is held so the server keeps an
/// up-to-date acknowledgement for reconciliation.
#[derive(Debug, Clone)]
pub struct InputSequencer {
    next_sequence: u32,
    current: InputIntent,
    last_sent: Option<Instant>,
    resend_interval: Duration,
}

impl InputSequencer {
    pub fn new(resend_interval: Duration) -> Self {
        Self {
            next_sequence: 1,
            current: InputIntent::default(),
            last_sent: None,
            resend_interval,
        }
    }

    /// Returns the intent to send this frame, if any
    pub fn sample(
        &mut self,
        keys: DirectionKeys,
        now: Instant,
        timestamp: u64,
    ) -> Option<InputIntent> {
        let changed = !keys.matches(&self.current);
        let resend_due = !keys.is_idle()
            && self
                .last_sent
                .map_or(true, |sent| now.duration_since(sent) >= self.resend_interval);

        if !changed && !resend_due {
            return None;
        }

        self.current = InputIntent {
            sequence: self.next_sequence,
            timestamp,
            up: keys.up,
            down: keys.down,
            left: keys.left,
            right: keys.right,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        self.last_sent = Some(now);
        Some(self.current)
    }

    /// The most recently issued intent; sequence 0 before the first one
    pub fn current(&self) -> &InputIntent {
        &self.current
    }

    /// Starts numbering again for a fresh match
    pub fn reset(&mut self) {
        *self = Self::new(self.resend_interval);
    }
}

/// Reads WASD and the arrow keys
pub fn read_direction_keys() -> DirectionKeys {
    DirectionKeys {
        up: is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
        down: is_key_down(KeyCode::S) || is_key_down(KeyCode::Down),
        left: is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
        right: is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
    }
}

/// Reads key presses (not holds) for toggles and session control
pub fn read_control_keys() -> ControlKeys {
    ControlKeys {
        toggle_prediction: is_key_pressed(KeyCode::Key1),
        toggle_reconciliation: is_key_pressed(KeyCode::Key2),
        toggle_interpolation: is_key_pressed(KeyCode::Key3),
        rejoin: is_key_pressed(KeyCode::Space) || is_key_pressed(KeyCode::Enter),
        quit: is_key_pressed(KeyCode::Escape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESEND: Duration = Duration::from_millis(16);

    fn right() -> DirectionKeys {
        DirectionKeys {
            right: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequencer_creation() {
        let sequencer = InputSequencer::new(RESEND);
        assert_eq!(sequencer.next_sequence, 1);
        assert_eq!(sequencer.current().sequence, 0);
    }

    #[test]
    fn test_idle_keys_send_nothing() {
        let mut sequencer = InputSequencer::new(RESEND);
        let now = Instant::now();
        assert!(sequencer.sample(DirectionKeys::default(), now, 0).is_none());
        assert!(sequencer
            .sample(DirectionKeys::default(), now + Duration::from_secs(1), 0)
            .is_none());
    }

    #[test]
    fn test_change_sends_with_increasing_sequence() {
        let mut sequencer = InputSequencer::new(RESEND);
        let now = Instant::now();

        let first = sequencer.sample(right(), now, 10).unwrap();
        assert_eq!(first.sequence, 1);
        assert!(first.right);
        assert_eq!(first.timestamp, 10);

        // Releasing is a change too, even inside the resend interval
        let released = sequencer.sample(DirectionKeys::default(), now, 11).unwrap();
        assert_eq!(released.sequence, 2);
        assert!(released.is_idle());
    }

    #[test]
    fn test_held_keys_resend_after_interval() {
        let mut sequencer = InputSequencer::new(RESEND);
        let start = Instant::now();

        assert!(sequencer.sample(right(), start, 0).is_some());
        assert!(sequencer
            .sample(right(), start + Duration::from_millis(5), 0)
            .is_none());

        let resent = sequencer
            .sample(right(), start + Duration::from_millis(16), 0)
            .unwrap();
        assert_eq!(resent.sequence, 2);
        assert_eq!(sequencer.current().sequence, 2);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut sequencer = InputSequencer::new(RESEND);
        sequencer.sample(right(), Instant::now(), 0);
        sequencer.reset();
        assert_eq!(sequencer.current().sequence, 0);
        let next = sequencer.sample(right(), Instant::now(), 0).unwrap();
        assert_eq!(next.sequence, 1);
    }
}
