//! Client-side prediction for the local player
//!
//! Inputs move the predicted position immediately using the same movement rule
//! as the server. Every applied input is kept as a pending move until a snapshot
//! acknowledges its sequence number; reconciliation replays the moves the server
//! has not seen yet on top of the authoritative position.
//!
//! Small disagreements are never applied as a jump. They become a correction
//! offset that shrinks at a bounded rate, so the visible position glides onto
//! the corrected path. Large disagreements snap.

use log::debug;
use shared::{
    clamp_to_world, intent_velocity, integrate_position, InputIntent, Vector2, PLAYER_RADIUS,
};
use std::collections::VecDeque;

/// Upper bound on unacknowledged moves kept for replay
const MAX_PENDING_MOVES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMove {
    pub sequence: u32,
    pub velocity: Vector2,
    pub dt: f32,
}

/// Outcome of reconciling against one authoritative position
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// Divergence exceeded the threshold; the prediction was replaced
    Snapped { divergence: f32 },
    /// Divergence is being blended out through the correction offset
    Smoothed { divergence: f32 },
}

#[derive(Debug, Clone)]
pub struct PredictionEngine {
    predicted: Vector2,
    correction: Vector2,
    pending: VecDeque<PendingMove>,
    speed: f32,
    snap_threshold: f32,
    correction_rate: f32,
}

impl PredictionEngine {
    pub fn new(speed: f32, snap_threshold: f32, correction_rate: f32) -> Self {
        Self {
            predicted: Vector2::ZERO,
            correction: Vector2::ZERO,
            pending: VecDeque::new(),
            speed,
            snap_threshold,
            correction_rate,
        }
    }

    /// Moves the prediction by one local frame and records the move for replay
    pub fn apply_input(&mut self, intent: &InputIntent, dt: f32) {
        let velocity = intent_velocity(intent, self.speed);
        self.predicted = integrate_position(self.predicted, velocity, dt, PLAYER_RADIUS);

        self.pending.push_back(PendingMove {
            sequence: intent.sequence,
            velocity,
            dt,
        });
        if self.pending.len() > MAX_PENDING_MOVES {
            self.pending.pop_front();
        }

        self.decay_correction(dt);
    }

    /// Drops moves the server has already processed
    pub fn acknowledge(&mut self, last_processed_sequence: u32) {
        while let Some(front) = self.pending.front() {
            if front.sequence > last_processed_sequence {
                break;
            }
            self.pending.pop_front();
        }
    }

    pub fn reconcile(
        &mut self,
        authoritative: Vector2,
        last_processed_sequence: u32,
    ) -> Reconciliation {
        self.acknowledge(last_processed_sequence);

        let corrected = self.pending.iter().fold(authoritative, |pos, mv| {
            integrate_position(pos, mv.velocity, mv.dt, PLAYER_RADIUS)
        });
        let divergence = corrected.distance(&self.predicted);

        if divergence > self.snap_threshold {
            debug!("Prediction off by {:.1}px, snapping", divergence);
            self.predicted = corrected;
            self.correction = Vector2::ZERO;
            return Reconciliation::Snapped { divergence };
        }

        // Keep the visible position where it is and bleed the error off over time
        let visible = self.position();
        self.predicted = corrected;
        self.correction = visible.sub(&corrected);
        Reconciliation::Smoothed { divergence }
    }

    /// Shrinks the correction offset by at most `correction_rate * dt`
    pub fn decay_correction(&mut self, dt: f32) {
        let remaining = self.correction.magnitude();
        let step = self.correction_rate * dt.max(0.0);
        self.correction = if remaining <= step {
            Vector2::ZERO
        } else {
            self.correction.sub(&self.correction.normalize().scale(step))
        };
    }

    /// Position to draw: prediction plus whatever correction is still pending
    pub fn position(&self) -> Vector2 {
        clamp_to_world(self.predicted.add(&self.correction), PLAYER_RADIUS)
    }

    pub fn predicted(&self) -> Vector2 {
        self.predicted
    }

    pub fn correction(&self) -> Vector2 {
        self.correction
    }

    pub fn reset(&mut self, position: Vector2) {
        self.predicted = position;
        self.correction = Vector2::ZERO;
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::PLAYER_SPEED;

    const DT: f32 = 0.1;
    const WORLD_EDGE: f32 = shared::WORLD_WIDTH - PLAYER_RADIUS;

    fn right(sequence: u32) -> InputIntent {
        InputIntent {
            sequence,
            right: true,
            ..Default::default()
        }
    }

    fn engine_at(x: f32, y: f32) -> PredictionEngine {
        let mut engine = PredictionEngine::new(PLAYER_SPEED, 50.0, 100.0);
        engine.reset(Vector2::new(x, y));
        engine
    }

    #[test]
    fn test_apply_input_moves_immediately() {
        let mut engine = engine_at(100.0, 100.0);
        engine.apply_input(&right(1), DT);

        assert_approx_eq!(engine.position().x, 120.0, 0.001);
        assert_eq!(engine.pending_len(), 1);
    }

    #[test]
    fn test_prediction_clamps_like_server() {
        let mut engine = engine_at(WORLD_EDGE - 5.0, 100.0);
        engine.apply_input(&right(1), 1.0);
        assert_eq!(engine.position().x, WORLD_EDGE);
    }

    #[test]
    fn test_reconcile_in_sync_keeps_position() {
        let mut engine = engine_at(100.0, 100.0);
        for seq in 1..=3 {
            engine.apply_input(&right(seq), DT);
        }

        // Server processed the first move exactly as predicted
        engine.reconcile(Vector2::new(120.0, 100.0), 1);
        assert_eq!(engine.pending_len(), 2);
        assert_approx_eq!(engine.position().x, 160.0, 0.001);
        assert_approx_eq!(engine.correction().magnitude(), 0.0, 0.001);
    }

    #[test]
    fn test_small_divergence_is_smoothed_not_jumped() {
        let mut engine = engine_at(100.0, 100.0);
        engine.apply_input(&right(1), DT);
        let before = engine.position();

        let outcome = engine.reconcile(Vector2::new(110.0, 100.0), 1);
        assert!(matches!(outcome, Reconciliation::Smoothed { .. }));
        // Visible position unchanged at the moment of reconciliation
        assert_approx_eq!(engine.position().x, before.x, 0.001);
        assert_approx_eq!(engine.predicted().x, 110.0, 0.001);

        // Correction bleeds off no faster than the configured rate
        engine.decay_correction(0.05);
        assert_approx_eq!(engine.position().x, before.x - 5.0, 0.001);
        engine.decay_correction(1.0);
        assert_approx_eq!(engine.position().x, 110.0, 0.001);
    }

    #[test]
    fn test_large_divergence_snaps() {
        let mut engine = engine_at(100.0, 100.0);
        engine.apply_input(&right(1), DT);
        engine.apply_input(&right(2), DT);

        let outcome = engine.reconcile(Vector2::new(400.0, 300.0), 1);
        match outcome {
            Reconciliation::Snapped { divergence } => assert!(divergence > 50.0),
            other => panic!("expected snap, got {:?}", other),
        }
        // Remaining move is replayed on top of the authoritative position
        assert_approx_eq!(engine.position().x, 420.0, 0.001);
        assert_approx_eq!(engine.position().y, 300.0, 0.001);
    }

    #[test]
    fn test_acknowledge_drops_processed_moves() {
        let mut engine = engine_at(100.0, 100.0);
        for seq in 1..=5 {
            engine.apply_input(&right(seq), DT);
        }
        engine.acknowledge(3);
        assert_eq!(engine.pending_len(), 2);
        engine.acknowledge(10);
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn test_visible_step_bounded_under_repeated_small_corrections() {
        let mut engine = engine_at(300.0, 300.0);
        let mut last = engine.position();
        for seq in 1..=60u32 {
            engine.apply_input(&right(seq), DT);
            // Authoritative position lags slightly behind the prediction
            let auth = Vector2::new(300.0 + 20.0 * seq as f32 - 3.0, 300.0);
            engine.reconcile(auth, seq);

            let now = engine.position();
            let step = now.distance(&last);
            assert!(step <= PLAYER_SPEED * DT + 100.0 * DT + 0.01);
            last = now;
        }
    }
}
