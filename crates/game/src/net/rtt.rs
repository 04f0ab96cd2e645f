use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_PENDING: usize = 1024;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5);

/// Matches echoed sequence numbers against their send time.
///
/// Sequences are scoped to one session. Create a fresh tracker on reconnect
/// so echoes from an old session cannot match.
#[derive(Debug)]
pub struct RttTracker {
    pending: HashMap<u32, Instant>,
    max_pending: usize,
    max_age: Duration,
    average_ms: f64,
    sample_count: u64,
    last_sample: Option<Duration>,
}

impl Default for RttTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING, DEFAULT_MAX_AGE)
    }
}

impl RttTracker {
    pub fn new(max_pending: usize, max_age: Duration) -> Self {
        Self {
            pending: HashMap::with_capacity(max_pending.min(DEFAULT_MAX_PENDING)),
            max_pending: max_pending.max(1),
            max_age,
            average_ms: 0.0,
            sample_count: 0,
            last_sample: None,
        }
    }

    /// Records a send. Reusing a sequence replaces its pending entry.
    pub fn on_send(&mut self, sequence: u32, now: Instant) {
        if self.pending.len() >= self.max_pending && !self.pending.contains_key(&sequence) {
            self.sweep(now);

            if self.pending.len() >= self.max_pending {
                self.evict_oldest();
            }
        }

        self.pending.insert(sequence, now);
    }

    /// Resolves an echo. Unknown, late and duplicate echoes return `None`
    /// and leave the statistics untouched.
    pub fn on_echo(&mut self, sequence: u32, now: Instant) -> Option<Duration> {
        let sent_at = self.pending.remove(&sequence)?;
        let sample = now.saturating_duration_since(sent_at);

        self.sample_count += 1;
        let n = self.sample_count as f64;
        self.average_ms = (self.average_ms * (n - 1.0) + duration_ms(sample)) / n;
        self.last_sample = Some(sample);

        Some(sample)
    }

    /// Drops entries older than `max_age`, returning how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let max_age = self.max_age;
        self.pending
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) <= max_age);
        before - self.pending.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, sent_at)| **sent_at)
            .map(|(&sequence, _)| sequence);

        if let Some(sequence) = oldest {
            self.pending.remove(&sequence);
        }
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn last_sample(&self) -> Option<Duration> {
        self.last_sample
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, sequence: u32) -> bool {
        self.pending.contains_key(&sequence)
    }
}

#[inline]
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_resolves_once() {
        let mut tracker = RttTracker::default();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(12);

        tracker.on_send(5, t0);
        assert_eq!(tracker.on_echo(5, t1), Some(Duration::from_millis(12)));
        assert!(!tracker.is_pending(5));
        assert_eq!(tracker.on_echo(5, t1), None);
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn test_unknown_echo_leaves_average() {
        let mut tracker = RttTracker::default();
        let t0 = Instant::now();

        tracker.on_send(1, t0);
        tracker.on_echo(1, t0 + Duration::from_millis(8));

        assert_eq!(tracker.on_echo(99, t0 + Duration::from_millis(50)), None);
        assert_eq!(tracker.sample_count(), 1);
        assert!((tracker.average_ms() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_average() {
        let mut tracker = RttTracker::default();
        let t0 = Instant::now();

        for (sequence, ms) in [(0u32, 10u64), (1, 20), (2, 30)] {
            tracker.on_send(sequence, t0);
            tracker.on_echo(sequence, t0 + Duration::from_millis(ms));
        }

        assert_eq!(tracker.sample_count(), 3);
        assert!((tracker.average_ms() - 20.0).abs() < 1e-9);
        assert_eq!(tracker.last_sample(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_sequence_reuse_overwrites() {
        let mut tracker = RttTracker::default();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(100);

        tracker.on_send(u32::MAX, t0);
        tracker.on_send(u32::MAX, t1);
        assert_eq!(tracker.pending_len(), 1);
        assert_eq!(
            tracker.on_echo(u32::MAX, t1 + Duration::from_millis(4)),
            Some(Duration::from_millis(4))
        );
    }

    #[test]
    fn test_sweep_drops_stale_entries() {
        let mut tracker = RttTracker::new(16, Duration::from_millis(100));
        let t0 = Instant::now();

        tracker.on_send(1, t0);
        tracker.on_send(2, t0 + Duration::from_millis(80));

        assert_eq!(tracker.sweep(t0 + Duration::from_millis(150)), 1);
        assert!(!tracker.is_pending(1));
        assert!(tracker.is_pending(2));
    }

    #[test]
    fn test_pending_is_bounded() {
        let mut tracker = RttTracker::new(4, Duration::from_secs(60));
        let t0 = Instant::now();

        for sequence in 0..10u32 {
            tracker.on_send(sequence, t0 + Duration::from_millis(sequence as u64));
        }

        assert_eq!(tracker.pending_len(), 4);
        assert!(!tracker.is_pending(0));
        assert!(tracker.is_pending(9));
    }
}
