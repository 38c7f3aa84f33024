//! Entity interpolation for remote players
//!
//! Remote players are drawn slightly in the past, between two snapshots the
//! client already holds, instead of at the newest known position. Each remote
//! player keeps a short timeline of samples keyed by server time; the render
//! time is `server_now - interpolation_delay`.

use shared::{clamp_to_world, StateSnapshot, Vector2, PLAYER_RADIUS};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    /// Server time in milliseconds
    pub timestamp: u64,
    pub position: Vector2,
}

/// Timeline of authoritative positions for one remote entity
#[derive(Debug, Clone)]
pub struct InterpolationBuffer {
    samples: VecDeque<PositionSample>,
    max_extrapolation_ms: u64,
    retention_ms: u64,
}

impl InterpolationBuffer {
    pub fn new(max_extrapolation_ms: u64, retention_ms: u64) -> Self {
        Self {
            samples: VecDeque::new(),
            max_extrapolation_ms,
            retention_ms,
        }
    }

    /// Appends a sample; out-of-order or duplicate timestamps are ignored
    pub fn push(&mut self, sample: PositionSample) -> bool {
        if let Some(newest) = self.samples.back() {
            if sample.timestamp <= newest.timestamp {
                return false;
            }
        }
        self.samples.push_back(sample);
        true
    }

    pub fn position_at(&self, render_time: u64) -> Option<Vector2> {
        let oldest = self.samples.front()?;
        let newest = self.samples.back()?;

        if render_time <= oldest.timestamp {
            return Some(oldest.position);
        }
        if render_time >= newest.timestamp {
            return Some(self.extrapolate(newest, render_time));
        }

        // First sample at or after render time; its predecessor brackets from below
        let upper = self
            .samples
            .iter()
            .position(|s| s.timestamp >= render_time)?;
        let after = self.samples.get(upper)?;
        let before = self.samples.get(upper.checked_sub(1)?)?;

        let span = (after.timestamp - before.timestamp) as f32;
        let t = (render_time - before.timestamp) as f32 / span;
        Some(before.position.lerp(&after.position, t))
    }

    fn extrapolate(&self, newest: &PositionSample, render_time: u64) -> Vector2 {
        let len = self.samples.len();
        let previous = match len.checked_sub(2).and_then(|i| self.samples.get(i)) {
            Some(previous) => previous,
            None => return newest.position,
        };

        let span = (newest.timestamp - previous.timestamp) as f32;
        let per_ms = newest.position.sub(&previous.position).scale(1.0 / span);
        let ahead = (render_time - newest.timestamp).min(self.max_extrapolation_ms);
        newest.position.add(&per_ms.scale(ahead as f32))
    }

    /// Forgets samples older than the retention window, keeping at least two
    pub fn prune(&mut self, render_time: u64) {
        let cutoff = render_time.saturating_sub(self.retention_ms);
        while self.samples.len() > 2 {
            match self.samples.front() {
                Some(front) if front.timestamp < cutoff => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    pub fn newest(&self) -> Option<&PositionSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One interpolation buffer per remote player
#[derive(Debug, Clone)]
pub struct RemoteEntities {
    buffers: BTreeMap<u32, InterpolationBuffer>,
    interpolation_delay_ms: u64,
    max_extrapolation_ms: u64,
    retention_ms: u64,
}

impl RemoteEntities {
    pub fn new(interpolation_delay_ms: u64, max_extrapolation_ms: u64, retention_ms: u64) -> Self {
        Self {
            buffers: BTreeMap::new(),
            interpolation_delay_ms,
            max_extrapolation_ms,
            retention_ms,
        }
    }

    /// Records every player except `local_id` and drops players missing from the snapshot
    ///
    /// Buffers are pruned against the snapshot's own render time, so memory stays
    /// bounded even when nothing asks for interpolated positions.
    pub fn ingest(&mut self, snapshot: &StateSnapshot, local_id: Option<u32>) {
        self.buffers
            .retain(|id, _| snapshot.players.iter().any(|p| p.id == *id));

        let render_time = self.render_time(snapshot.server_time);
        for player in snapshot.players.iter().filter(|p| Some(p.id) != local_id) {
            let (max_extrapolation_ms, retention_ms) =
                (self.max_extrapolation_ms, self.retention_ms);
            let buffer = self
                .buffers
                .entry(player.id)
                .or_insert_with(|| InterpolationBuffer::new(max_extrapolation_ms, retention_ms));
            buffer.push(PositionSample {
                timestamp: snapshot.server_time,
                position: player.pos,
            });
            buffer.prune(render_time);
        }
    }

    pub fn render_time(&self, server_now: u64) -> u64 {
        server_now.saturating_sub(self.interpolation_delay_ms)
    }

    /// Interpolated positions at `server_now - interpolation_delay`
    pub fn render_positions(&mut self, server_now: u64) -> BTreeMap<u32, Vector2> {
        let render_time = self.render_time(server_now);
        let mut positions = BTreeMap::new();
        for (id, buffer) in self.buffers.iter_mut() {
            buffer.prune(render_time);
            if let Some(position) = buffer.position_at(render_time) {
                positions.insert(*id, clamp_to_world(position, PLAYER_RADIUS));
            }
        }
        positions
    }

    /// Newest known positions, used when interpolation is switched off
    pub fn latest_positions(&self) -> BTreeMap<u32, Vector2> {
        self.buffers
            .iter()
            .filter_map(|(id, buffer)| buffer.newest().map(|s| (*id, s.position)))
            .collect()
    }

    pub fn remove(&mut self, id: u32) {
        self.buffers.remove(&id);
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn buffer(&self, id: u32) -> Option<&InterpolationBuffer> {
        self.buffers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Maps local wall-clock time onto the server's time base
///
/// Every snapshot gives `local_receive - server_send`, which is the true clock
/// offset plus the one-way delay. The smallest value seen is the best estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerClock {
    offset_ms: Option<i64>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, server_time: u64, local_time: u64) {
        let offset = local_time as i64 - server_time as i64;
        self.offset_ms = Some(match self.offset_ms {
            Some(current) => current.min(offset),
            None => offset,
        });
    }

    /// Local time expressed as server time; identity until a snapshot arrives
    pub fn to_server_time(&self, local_time: u64) -> u64 {
        let offset = self.offset_ms.unwrap_or(0);
        (local_time as i64 - offset).max(0) as u64
    }

    pub fn offset_ms(&self) -> Option<i64> {
        self.offset_ms
    }

    pub fn reset(&mut self) {
        self.offset_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::PlayerSnapshot;
    use shared::MatchPhase;

    fn sample(timestamp: u64, x: f32, y: f32) -> PositionSample {
        PositionSample {
            timestamp,
            position: Vector2::new(x, y),
        }
    }

    fn buffer_with(samples: &[(u64, f32, f32)]) -> InterpolationBuffer {
        let mut buffer = InterpolationBuffer::new(200, 1000);
        for &(t, x, y) in samples {
            assert!(buffer.push(sample(t, x, y)));
        }
        buffer
    }

    fn snapshot(server_time: u64, players: &[(u32, f32, f32)]) -> StateSnapshot {
        StateSnapshot {
            players: players
                .iter()
                .map(|&(id, x, y)| PlayerSnapshot {
                    id,
                    name: format!("P{}", id),
                    pos: Vector2::new(x, y),
                    score: 0,
                    color_index: 0,
                    last_seq: 0,
                })
                .collect(),
            coins: Vec::new(),
            clock_remaining: 60.0,
            tick: server_time / 16,
            server_time,
            phase: MatchPhase::Playing,
        }
    }

    #[test]
    fn test_midpoint_interpolation() {
        let buffer = buffer_with(&[(0, 0.0, 0.0), (100, 10.0, 0.0)]);
        let pos = buffer.position_at(50).unwrap();
        assert_approx_eq!(pos.x, 5.0, 0.001);
        assert_approx_eq!(pos.y, 0.0, 0.001);
    }

    #[test]
    fn test_interpolation_picks_bracketing_pair() {
        let buffer = buffer_with(&[(0, 0.0, 0.0), (100, 10.0, 0.0), (200, 10.0, 40.0)]);
        let pos = buffer.position_at(150).unwrap();
        assert_approx_eq!(pos.x, 10.0, 0.001);
        assert_approx_eq!(pos.y, 20.0, 0.001);

        let exact = buffer.position_at(100).unwrap();
        assert_approx_eq!(exact.x, 10.0, 0.001);
    }

    #[test]
    fn test_before_oldest_holds_oldest() {
        let buffer = buffer_with(&[(100, 3.0, 4.0), (200, 10.0, 0.0)]);
        assert_eq!(buffer.position_at(20), Some(Vector2::new(3.0, 4.0)));
    }

    #[test]
    fn test_empty_buffer_has_no_position() {
        let buffer = InterpolationBuffer::new(200, 1000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.position_at(100), None);
    }

    #[test]
    fn test_single_sample_holds() {
        let buffer = buffer_with(&[(100, 7.0, 8.0)]);
        assert_eq!(buffer.position_at(50), Some(Vector2::new(7.0, 8.0)));
        assert_eq!(buffer.position_at(500), Some(Vector2::new(7.0, 8.0)));
    }

    #[test]
    fn test_underrun_extrapolates_then_caps() {
        // 0.1 px/ms to the right
        let buffer = buffer_with(&[(0, 0.0, 0.0), (100, 10.0, 0.0)]);

        let ahead = buffer.position_at(150).unwrap();
        assert_approx_eq!(ahead.x, 15.0, 0.001);

        let at_cap = buffer.position_at(300).unwrap();
        assert_approx_eq!(at_cap.x, 30.0, 0.001);

        let past_cap = buffer.position_at(5_000).unwrap();
        assert_approx_eq!(past_cap.x, 30.0, 0.001);
    }

    #[test]
    fn test_push_rejects_stale_and_duplicate_samples() {
        let mut buffer = buffer_with(&[(100, 0.0, 0.0)]);
        assert!(!buffer.push(sample(100, 5.0, 5.0)));
        assert!(!buffer.push(sample(50, 5.0, 5.0)));
        assert!(buffer.push(sample(101, 5.0, 5.0)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_prune_keeps_two_newest() {
        let mut buffer = buffer_with(&[(0, 0.0, 0.0), (100, 1.0, 0.0), (200, 2.0, 0.0)]);
        buffer.prune(10_000);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.newest().map(|s| s.timestamp), Some(200));

        let mut recent = buffer_with(&[(900, 0.0, 0.0), (950, 1.0, 0.0), (1000, 2.0, 0.0)]);
        recent.prune(1_500);
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn test_remote_entities_skip_local_player() {
        let mut remotes = RemoteEntities::new(100, 200, 1000);
        remotes.ingest(&snapshot(1_000, &[(1, 10.0, 10.0), (2, 50.0, 50.0)]), Some(1));

        assert!(remotes.buffer(1).is_none());
        assert!(remotes.buffer(2).is_some());
        assert_eq!(remotes.len(), 1);
    }

    #[test]
    fn test_remote_entities_render_in_the_past() {
        let mut remotes = RemoteEntities::new(100, 200, 1000);
        remotes.ingest(&snapshot(1_000, &[(2, 100.0, 100.0)]), None);
        remotes.ingest(&snapshot(1_100, &[(2, 200.0, 100.0)]), None);

        // Server time 1150 renders at 1050, halfway between the samples
        let positions = remotes.render_positions(1_150);
        assert_approx_eq!(positions[&2].x, 150.0, 0.001);

        let latest = remotes.latest_positions();
        assert_approx_eq!(latest[&2].x, 200.0, 0.001);
    }

    #[test]
    fn test_ingest_bounds_buffer_without_rendering() {
        let mut remotes = RemoteEntities::new(100, 200, 1000);
        for i in 0..5_000u64 {
            remotes.ingest(&snapshot(1_000 + i * 16, &[(2, 10.0, 10.0)]), None);
        }

        // Everything newer than render time minus retention, 1100ms at 16ms spacing
        let len = remotes.buffer(2).map_or(0, |b| b.len());
        assert!(len <= 1_100 / 16 + 2, "buffer holds {} samples", len);
        assert!(len >= 2);
    }

    #[test]
    fn test_remote_entities_drop_departed_players() {
        let mut remotes = RemoteEntities::new(100, 200, 1000);
        remotes.ingest(&snapshot(1_000, &[(2, 10.0, 10.0), (3, 20.0, 20.0)]), None);
        remotes.ingest(&snapshot(1_016, &[(3, 21.0, 20.0)]), None);

        assert!(remotes.buffer(2).is_none());
        assert!(remotes.buffer(3).is_some());

        remotes.remove(3);
        assert!(remotes.is_empty());
    }

    #[test]
    fn test_render_positions_stay_in_bounds() {
        let mut remotes = RemoteEntities::new(0, 200, 1000);
        remotes.ingest(&snapshot(0, &[(2, 700.0, 300.0)]), None);
        remotes.ingest(&snapshot(100, &[(2, 780.0, 300.0)]), None);

        let positions = remotes.render_positions(300);
        assert!(positions[&2].x <= shared::WORLD_WIDTH - PLAYER_RADIUS);
    }

    #[test]
    fn test_server_clock_keeps_smallest_offset() {
        let mut clock = ServerClock::new();
        assert_eq!(clock.to_server_time(5_000), 5_000);

        clock.observe(1_000, 1_300);
        clock.observe(1_100, 1_350);
        clock.observe(1_200, 1_600);
        assert_eq!(clock.offset_ms(), Some(250));
        assert_eq!(clock.to_server_time(1_450), 1_200);
    }

    #[test]
    fn test_server_clock_handles_server_ahead() {
        let mut clock = ServerClock::new();
        clock.observe(10_000, 9_000);
        assert_eq!(clock.offset_ms(), Some(-1_000));
        assert_eq!(clock.to_server_time(9_500), 10_500);
    }
}
